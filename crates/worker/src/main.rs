use anyhow::Context;
use athena_core::config::Settings;
use athena_core::domain::portfolio::Holding;
use athena_core::domain::recommendation::RecommendationRun;
use athena_core::engine::{Engine, EngineConfig, EngineError, MarketRegime, RunSettings};
use athena_core::storage::{self, content, market, recommendations};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod ingest;
mod inputs;
mod portfolio;
mod sentiment;

#[derive(Debug, Parser)]
#[command(name = "athena_worker", about = "Daily market intelligence pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch the latest quote for each tracked ticker (SPY is always included).
    FetchMarket {
        /// Also fetch VIX for regime detection.
        #[arg(long)]
        with_vix: bool,

        /// Override the tracked ticker list (comma separated).
        #[arg(long, value_delimiter = ',')]
        tickers: Vec<String>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Recompute technical indicators from stored market data.
    Indicators {
        #[arg(long)]
        dry_run: bool,
    },

    /// Store a creator post; tickers are extracted from the text.
    AddContent {
        #[arg(long)]
        creator: String,

        #[arg(long)]
        text: String,

        #[arg(long, default_value = "manual")]
        platform: String,

        /// Unique id of the post. Generated when omitted.
        #[arg(long)]
        content_id: Option<String>,

        /// RFC 3339 timestamp. Defaults to now.
        #[arg(long)]
        posted_at: Option<String>,
    },

    /// Store many posts from a JSON Lines file (one `{"creator", "text", ...}` object per line).
    AddBatch {
        path: PathBuf,
    },

    /// Print the most recent creator posts.
    ListContent {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Add or replace a portfolio position.
    AddHolding {
        #[arg(long)]
        ticker: String,

        #[arg(long)]
        quantity: f64,

        #[arg(long, default_value_t = 0.0)]
        avg_cost: f64,

        #[arg(long, default_value_t = 0.0)]
        current_price: f64,
    },

    /// Import positions from a CSV file (`ticker,quantity[,avg_cost[,current_price]]`).
    ImportHoldings {
        path: PathBuf,

        #[arg(long)]
        dry_run: bool,
    },

    /// Delete every stored position.
    ClearHoldings,

    /// Print stored positions with totals.
    ShowPortfolio,

    /// Label unanalysed creator posts with the LLM.
    Sentiment {
        /// Maximum posts per ticker sent in one prompt.
        #[arg(long)]
        max_posts: Option<usize>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Generate (and persist) today's recommendations.
    Recommend(RecommendArgs),

    /// fetch-market, indicators, sentiment, then recommend.
    RunAll {
        #[command(flatten)]
        recommend: RecommendArgs,

        #[arg(long)]
        with_vix: bool,
    },

    /// Show table counts, data freshness, and the latest run.
    Status,
}

#[derive(Debug, Clone, clap::Args)]
struct RecommendArgs {
    /// Budget to allocate. Defaults to MONTHLY_CONTRIBUTION or the config table.
    #[arg(long)]
    budget: Option<f64>,

    /// Run date (YYYY-MM-DD). Defaults to today's UTC date.
    #[arg(long)]
    run_date: Option<String>,

    /// Do everything except writing to the database.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let cli = Cli::parse();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping after the current ticker");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    if let Err(err) = run(cli.command, &settings, &stop).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %format!("{err:#}"), "worker failed");
        return Err(err);
    }
    Ok(())
}

async fn run(command: Command, settings: &Settings, stop: &AtomicBool) -> anyhow::Result<()> {
    let pool = connect(settings).await?;

    match command {
        Command::FetchMarket {
            with_vix,
            tickers,
            dry_run,
        } => {
            let (_, mut run) = load_config(&pool).await?;
            if !tickers.is_empty() {
                run.tracked_tickers = athena_core::engine::config::parse_ticker_list(&tickers.join(","));
            }
            fetch_market(&pool, settings, &run, with_vix, dry_run, stop).await
        }
        Command::Indicators { dry_run } => {
            let (_, run) = load_config(&pool).await?;
            indicators(&pool, &run, dry_run, stop).await
        }
        Command::AddContent {
            creator,
            text,
            platform,
            content_id,
            posted_at,
        } => {
            let posted_at = posted_at
                .as_deref()
                .map(|s| {
                    chrono::DateTime::parse_from_rfc3339(s)
                        .map(|t| t.with_timezone(&chrono::Utc))
                        .with_context(|| format!("invalid --posted-at: {s}"))
                })
                .transpose()?;
            let draft = content::ContentDraft {
                creator,
                text,
                platform: Some(platform),
                content_id,
                posted_at,
            };
            store_content(&pool, draft.into_new_content()).await.map(|_| ())
        }
        Command::AddBatch { path } => add_batch(&pool, &path).await,
        Command::ListContent { limit } => list_content(&pool, limit).await,
        Command::AddHolding {
            ticker,
            quantity,
            avg_cost,
            current_price,
        } => {
            let holding = Holding::new(&ticker, quantity, avg_cost, current_price)?;
            portfolio::add_holding(&pool, holding).await
        }
        Command::ImportHoldings { path, dry_run } => portfolio::import_csv(&pool, &path, dry_run).await,
        Command::ClearHoldings => portfolio::clear(&pool).await,
        Command::ShowPortfolio => portfolio::show(&pool).await,
        Command::Sentiment { max_posts, dry_run } => {
            let (_, run) = load_config(&pool).await?;
            analyze_sentiment(&pool, settings, &run, max_posts, dry_run, stop).await
        }
        Command::Recommend(args) => recommend(&pool, &args, stop).await,
        Command::RunAll {
            recommend: args,
            with_vix,
        } => run_all(&pool, settings, &args, with_vix, stop).await,
        Command::Status => status(&pool).await,
    }
}

async fn connect(settings: &Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    storage::migrate(&pool).await?;
    Ok(pool)
}

/// Environment first, then the `config` table on top.
async fn load_config(pool: &sqlx::PgPool) -> anyhow::Result<(EngineConfig, RunSettings)> {
    let mut engine = EngineConfig::from_env().context("invalid engine configuration in env")?;
    let mut run = RunSettings::from_env().context("invalid run settings in env")?;
    storage::settings::apply_db_overrides(pool, &mut engine, &mut run).await?;
    Ok((engine, run))
}

/// Tracked tickers plus SPY, whose RSI drives regime detection.
fn with_benchmark(run: &RunSettings) -> Vec<String> {
    let mut tickers = run.tracked_tickers.clone();
    if !tickers.iter().any(|t| t == "SPY") {
        tickers.push("SPY".to_string());
    }
    tickers
}

async fn fetch_market(
    pool: &sqlx::PgPool,
    settings: &Settings,
    run: &RunSettings,
    with_vix: bool,
    dry_run: bool,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let client = athena_core::ingest::provider::AlphaVantageClient::from_settings(settings)?;
    let mut tickers = with_benchmark(run);
    if with_vix {
        tickers.push("VIX".to_string());
    }

    let summary = ingest::fetch_market_data(pool, &client, &tickers, dry_run, stop).await?;
    tracing::info!(ok = summary.ok, failed = summary.failed, dry_run, "market data fetch finished");
    Ok(())
}

async fn indicators(
    pool: &sqlx::PgPool,
    run: &RunSettings,
    dry_run: bool,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let summary = ingest::compute_indicators(pool, &with_benchmark(run), dry_run, stop).await?;
    tracing::info!(ok = summary.ok, skipped = summary.failed, dry_run, "indicator computation finished");
    Ok(())
}

/// Returns whether the post was new.
async fn store_content(pool: &sqlx::PgPool, post: content::NewContent) -> anyhow::Result<bool> {
    match content::insert_content(pool, &post).await? {
        Some(tickers) => {
            tracing::info!(content_id = %post.content_id, creator = %post.creator_name, ?tickers, "content stored");
            if tickers.is_empty() {
                tracing::warn!(content_id = %post.content_id, "no tickers found in content");
            }
            Ok(true)
        }
        None => {
            tracing::info!(content_id = %post.content_id, "content already exists; skipped");
            Ok(false)
        }
    }
}

async fn add_batch(pool: &sqlx::PgPool, path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read content batch failed: {}", path.display()))?;
    let drafts = content::parse_content_batch(&raw)?;

    let total = drafts.len();
    let mut stored = 0usize;
    for draft in drafts {
        if store_content(pool, draft.into_new_content()).await? {
            stored += 1;
        }
    }
    tracing::info!(path = %path.display(), total, stored, "content batch finished");
    Ok(())
}

async fn list_content(pool: &sqlx::PgPool, limit: i64) -> anyhow::Result<()> {
    anyhow::ensure!(limit > 0, "--limit must be positive");
    let rows = content::recent_content(pool, limit).await?;
    if rows.is_empty() {
        println!("No creator content yet.");
        return Ok(());
    }

    for (i, row) in rows.iter().enumerate() {
        println!(
            "\n[{}] @{} ({}) - {}",
            i + 1,
            row.creator_name,
            row.platform,
            row.posted_at.format("%Y-%m-%d %H:%M")
        );
        println!("    {}", preview(&row.content_text, 200));
        if !row.mentioned_tickers.is_empty() {
            println!("    Tickers: {}", row.mentioned_tickers.join(", "));
        }
        println!(
            "    Sentiment: {}",
            row.sentiment.as_deref().unwrap_or("(not analyzed)")
        );
    }
    Ok(())
}

/// First `max_chars` characters, with an ellipsis when cut.
fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

async fn analyze_sentiment(
    pool: &sqlx::PgPool,
    settings: &Settings,
    run: &RunSettings,
    max_posts: Option<usize>,
    dry_run: bool,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let llm = athena_core::llm::anthropic::AnthropicClient::from_settings(settings)?;
    let summary =
        sentiment::analyze_pending(pool, &llm, &run.tracked_tickers, max_posts, dry_run, stop).await?;
    tracing::info!(ok = summary.ok, failed = summary.failed, dry_run, "sentiment analysis finished");
    Ok(())
}

async fn recommend(pool: &sqlx::PgPool, args: &RecommendArgs, stop: &AtomicBool) -> anyhow::Result<()> {
    let (engine_config, mut run) = load_config(pool).await?;
    if let Some(budget) = args.budget {
        run.budget = budget;
    }
    let run_date = resolve_run_date(args.run_date.as_deref())?;
    let engine = Engine::new(engine_config)?;

    if args.dry_run {
        return generate_and_persist(pool, &engine, &run, run_date, false, stop).await;
    }

    let Some(lock) = storage::lock::try_acquire_run_lock(pool, run_date).await? else {
        tracing::warn!(%run_date, "run lock not acquired; another run in progress");
        return Ok(());
    };

    let result = generate_and_persist(pool, &engine, &run, run_date, true, stop).await;

    if let Err(err) = lock.release().await {
        tracing::warn!(error = %format!("{err:#}"), %run_date, "run lock release failed");
    }
    result
}

async fn generate_and_persist(
    pool: &sqlx::PgPool,
    engine: &Engine,
    settings: &RunSettings,
    run_date: chrono::NaiveDate,
    persist: bool,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let Some(run) = generate(pool, engine, settings, run_date, stop).await? else {
        return Ok(());
    };
    print_run(&run);

    if !persist {
        tracing::info!(%run_date, dry_run = true, items = run.items.len(), "recommendations not persisted");
        return Ok(());
    }

    let run_id = recommendations::persist_run(pool, &run).await?;
    tracing::info!(%run_date, %run_id, items = run.items.len(), "persisted recommendation run");
    Ok(())
}

/// Returns `None` when the run was interrupted.
async fn generate(
    pool: &sqlx::PgPool,
    engine: &Engine,
    run: &RunSettings,
    run_date: chrono::NaiveDate,
    stop: &AtomicBool,
) -> anyhow::Result<Option<RecommendationRun>> {
    let snapshot = market::market_snapshot(pool).await?;
    let (regime, vix_level) = engine.detect_regime(snapshot);
    let loaded = if needs_ticker_inputs(regime) {
        inputs::load_all(pool, &run.tracked_tickers, stop).await
    } else {
        tracing::info!(%regime, vix_level, "volatile market; skipping per-ticker inputs");
        BTreeMap::new()
    };

    let items = match engine.generate_recommendations_until(
        &run.tracked_tickers,
        run.budget,
        snapshot,
        &loaded,
        || stop.load(Ordering::Relaxed),
    ) {
        Ok(items) => items,
        Err(EngineError::Cancelled { completed, total }) => {
            tracing::warn!(completed, total, "recommendation run cancelled; nothing persisted");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    if items.is_empty() {
        tracing::warn!(%run_date, "no recommendations produced");
        return Ok(None);
    }

    Ok(Some(RecommendationRun {
        run_date,
        generated_at: chrono::Utc::now(),
        budget: run.budget,
        regime,
        vix_level,
        items,
    }))
}

/// A volatile market yields a single market-wide wait, so per-ticker data is never read.
fn needs_ticker_inputs(regime: MarketRegime) -> bool {
    regime != MarketRegime::Volatile
}

async fn run_all(
    pool: &sqlx::PgPool,
    settings: &Settings,
    args: &RecommendArgs,
    with_vix: bool,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let (_, run) = load_config(pool).await?;

    tracing::info!("step 1/4: market data");
    if settings.alphavantage_api_key.is_some() {
        if let Err(err) = fetch_market(pool, settings, &run, with_vix, args.dry_run, stop).await {
            sentry_anyhow::capture_anyhow(&err);
            tracing::warn!(error = %format!("{err:#}"), "market data fetch failed; continuing");
        }
    } else {
        tracing::warn!("ALPHAVANTAGE_API_KEY not set; skipping market data fetch");
    }

    tracing::info!("step 2/4: technical indicators");
    if let Err(err) = indicators(pool, &run, args.dry_run, stop).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::warn!(error = %format!("{err:#}"), "indicator computation failed; continuing");
    }

    tracing::info!("step 3/4: sentiment analysis");
    if settings.anthropic_api_key.is_some() {
        if let Err(err) = analyze_sentiment(pool, settings, &run, None, args.dry_run, stop).await {
            sentry_anyhow::capture_anyhow(&err);
            tracing::warn!(error = %format!("{err:#}"), "sentiment analysis failed; continuing");
        }
    } else {
        tracing::warn!("ANTHROPIC_API_KEY not set; skipping sentiment analysis");
    }

    if stop.load(Ordering::Relaxed) {
        tracing::warn!("interrupted before recommendations");
        return Ok(());
    }

    tracing::info!("step 4/4: recommendations");
    recommend(pool, args, stop).await
}

async fn status(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    println!("=== Database status ===");
    for (table, count) in storage::table_counts(pool).await? {
        println!("{table:<22} {count:>8}");
    }

    println!("\n=== Latest market data ===");
    for (ticker, ts) in market::latest_bar_times(pool).await? {
        println!("{ticker:<8} {}", ts.format("%Y-%m-%d %H:%M"));
    }

    match recommendations::fetch_run(pool, None).await? {
        Some((run_id, run)) => {
            println!("\n=== Latest run ({run_id}) ===");
            print_run(&run);
        }
        None => println!("\nNo recommendation runs yet."),
    }
    Ok(())
}

fn print_run(run: &RecommendationRun) {
    println!(
        "{} | regime={} VIX={:.2} | budget=${:.2} allocated=${:.2}",
        run.run_date,
        run.regime,
        run.vix_level,
        run.budget,
        run.total_allocated()
    );
    for rec in &run.items {
        println!(
            "  {:<6} {:<5} ${:>9.2}  {:>3.0}%  {}",
            rec.ticker.as_deref().unwrap_or("-"),
            rec.action.as_str(),
            rec.amount,
            rec.confidence_score * 100.0,
            rec.reasoning
        );
    }
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

fn resolve_run_date(run_date_arg: Option<&str>) -> anyhow::Result<chrono::NaiveDate> {
    if let Some(s) = run_date_arg {
        return chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid --run-date: {s}"));
    }
    Ok(chrono::Utc::now().date_naive())
}
