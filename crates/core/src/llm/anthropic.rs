use crate::config::Settings;
use crate::domain::contract::{LlmSentimentResult, SentimentAssessment};
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::json;
use crate::llm::{LlmClient, SentimentInput};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROVIDER: &str = "anthropic";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const TOOL_NAME_EMIT_SENTIMENT: &str = "emit_sentiment";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        ticker: &str,
        req: CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: PROVIDER,
                ticker: ticker.to_string(),
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn tools() -> Vec<Tool> {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["ticker", "sentiment", "confidence", "reasoning"],
            "properties": {
                "ticker": {"type": "string"},
                "sentiment": {"type": "string", "enum": ["bullish", "bearish", "neutral"]},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "reasoning": {"type": "string"}
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_SENTIMENT,
            description: "Emit the sentiment verdict for the ticker as structured JSON",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_SENTIMENT,
        }
    }

    fn system_prompt() -> String {
        [
            "You are a market sentiment analyst for US equities and ETFs.",
            "Answer with a single JSON object and nothing else: no markdown, no additional keys.",
            "Expected shape:",
            "{",
            "  \"ticker\": \"SPY\",",
            "  \"sentiment\": \"bullish|bearish|neutral\",",
            "  \"confidence\": 0.0,",
            "  \"reasoning\": \"brief explanation (1-2 sentences)\"",
            "}",
            "Rules:",
            "- sentiment must be exactly one of bullish, bearish, neutral",
            "- confidence must be in [0, 1]",
            "- base the verdict on the creator content first, market context second",
        ]
        .join("\n")
    }

    pub fn user_prompt(input: &SentimentInput) -> String {
        format!(
            "Analyze the sentiment for stock ticker {ticker}.\n\n\
## Creator Content (from market analysts):\n{content}\n\
## Market Context:\n{context}\n",
            ticker = input.ticker,
            content = format_content(&input.creator_content),
            context = if input.market_context.trim().is_empty() {
                "No market context available."
            } else {
                input.market_context.trim()
            },
        )
    }

    fn repair_prompt(previous_output: &str, ticker: &str) -> String {
        format!(
            "The last reply could not be parsed as the required JSON object.\n\n\
Reply again with exactly one JSON object holding ticker, sentiment, confidence, reasoning.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- ticker MUST be \"{ticker}\".\n\
- sentiment MUST be one of bullish, bearish, neutral.\n\
- confidence MUST be a number between 0 and 1.\n\n\
Unparseable reply, shown for reference:\n{previous_output}"
        )
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn response_tool_result(
        res: &CreateMessageResponse,
    ) -> anyhow::Result<Option<LlmSentimentResult>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input } = block {
                if name == TOOL_NAME_EMIT_SENTIMENT {
                    let parsed = serde_json::from_value::<LlmSentimentResult>(input.clone())
                        .context("failed to decode tool_use.input into LlmSentimentResult")?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    fn request(&self, content: String) -> CreateMessageRequest {
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(Self::system_prompt()),
            messages: vec![Message {
                role: "user",
                content,
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(Self::tool_choice()),
        }
    }

    async fn try_parse_with_repairs(
        &self,
        ticker: &str,
        initial_text: String,
        initial_raw_json: serde_json::Value,
    ) -> anyhow::Result<SentimentAssessment> {
        let first_err = match json::parse_sentiment(&initial_text, ticker) {
            Ok(assessment) => return Ok(assessment),
            Err(err) => err,
        };
        tracing::warn!(%ticker, error = %first_err, "LLM output invalid; requesting repair");

        let (repair_raw_json, repair_res) = match self
            .create_message(ticker, self.request(Self::repair_prompt(&initial_text, ticker)))
            .await
        {
            Ok(out) => out,
            Err(err) => {
                tracing::warn!(%ticker, error = %err, "repair request failed");
                return Err(LlmDiagnosticsError {
                    provider: PROVIDER,
                    ticker: ticker.to_string(),
                    stage: "parse",
                    detail: format!("error={first_err}"),
                    raw_output: Some(initial_text),
                    raw_response_json: Some(initial_raw_json),
                }
                .into());
            }
        };

        if let Some(result) = Self::response_tool_result(&repair_res)? {
            return result.validate_and_into_assessment(ticker);
        }
        let repair_text = Self::response_text(&repair_res);
        json::parse_sentiment(&repair_text, ticker).map_err(|last_err| {
            LlmDiagnosticsError {
                provider: PROVIDER,
                ticker: ticker.to_string(),
                stage: "parse_after_repair",
                detail: format!("final_error={last_err}"),
                raw_output: Some(repair_text.clone()),
                raw_response_json: Some(repair_raw_json),
            }
            .into()
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    async fn analyze_sentiment(&self, input: SentimentInput) -> anyhow::Result<SentimentAssessment> {
        let ticker = input.ticker.clone();
        let (raw_json, res) = self
            .create_message(&ticker, self.request(Self::user_prompt(&input)))
            .await?;

        if let Some(result) = Self::response_tool_result(&res)? {
            return result.validate_and_into_assessment(&ticker);
        }

        // Model ignored the forced tool call.
        let text = Self::response_text(&res);
        self.try_parse_with_repairs(&ticker, text, raw_json).await
    }
}

fn format_content(content: &[String]) -> String {
    if content.is_empty() {
        return "No recent content available.\n".to_string();
    }
    content
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}\n\n", i + 1, c.trim()))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sentiment::Sentiment;
    use serde_json::json;

    #[test]
    fn parses_tool_use_sentiment_input() {
        let raw = json!({
            "id": "msg_1",
            "content": [
                {"type": "thinking", "thinking": "..."},
                {
                    "type": "tool_use",
                    "id": "toolu_1",
                    "name": TOOL_NAME_EMIT_SENTIMENT,
                    "input": {
                        "ticker": "QQQ",
                        "sentiment": "bullish",
                        "confidence": 0.72,
                        "reasoning": "Creators expect tech earnings to beat."
                    }
                }
            ],
            "stop_reason": "tool_use"
        });
        let res: CreateMessageResponse = serde_json::from_value(raw).unwrap();
        let result = AnthropicClient::response_tool_result(&res).unwrap().unwrap();
        let a = result.validate_and_into_assessment("QQQ").unwrap();
        assert_eq!(a.sentiment, Sentiment::Bullish);
        assert_eq!(a.confidence, 0.72);
    }

    #[test]
    fn text_blocks_are_joined() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "{\"sentiment\": \"neutral\","},
                {"type": "text", "text": "\"confidence\": 0.4}"}
            ]
        });
        let res: CreateMessageResponse = serde_json::from_value(raw).unwrap();
        assert!(AnthropicClient::response_tool_result(&res).unwrap().is_none());
        let text = AnthropicClient::response_text(&res);
        let a = json::parse_sentiment(&text, "VTI").unwrap();
        assert_eq!(a.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn user_prompt_numbers_creator_content() {
        let input = SentimentInput {
            ticker: "PLTR".to_string(),
            creator_content: vec!["Loading up on $PLTR".to_string(), "Trimmed PLTR".to_string()],
            market_context: String::new(),
        };
        let prompt = AnthropicClient::user_prompt(&input);
        assert!(prompt.contains("stock ticker PLTR"));
        assert!(prompt.contains("1. Loading up on $PLTR"));
        assert!(prompt.contains("2. Trimmed PLTR"));
        assert!(prompt.contains("No market context available."));
    }
}
