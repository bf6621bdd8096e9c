use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use athena_core::config::Settings;
use athena_core::domain::recommendation::RecommendationRun;
use athena_core::storage::recommendations::{self, TickerSignal};

const DEFAULT_HISTORY_LIMIT: i64 = 30;
const MAX_HISTORY_LIMIT: i64 = 365;

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

    let pool = connect(&settings).await;
    let app = router(AppState { pool });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// `None` puts the API in degraded mode: data routes answer 503.
async fn connect(settings: &Settings) -> Option<PgPool> {
    let db_url = match settings.require_database_url() {
        Ok(url) => url,
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            return None;
        }
    };

    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            let err = anyhow::Error::new(e);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
            return None;
        }
    };

    match athena_core::storage::migrate(&pool).await {
        Ok(()) => Some(pool),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
            None
        }
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/runs/latest", get(get_latest_run))
        .route("/runs/:run_date", get(get_run_by_date))
        .route("/signals/:ticker", get(get_ticker_signals))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<PgPool>,
}

#[derive(Debug, Serialize)]
struct ApiRun {
    run_id: Uuid,
    total_allocated: f64,
    run: RecommendationRun,
}

impl ApiRun {
    fn new(run_id: Uuid, run: RecommendationRun) -> Self {
        Self {
            run_id,
            total_allocated: run.total_allocated(),
            run,
        }
    }
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %format!("{e:#}"), "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn get_latest_run(State(state): State<AppState>) -> Result<Json<ApiRun>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let (run_id, run) = recommendations::fetch_run(pool, None)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ApiRun::new(run_id, run)))
}

async fn get_run_by_date(
    State(state): State<AppState>,
    Path(run_date): Path<String>,
) -> Result<Json<ApiRun>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let run_date =
        NaiveDate::parse_from_str(&run_date, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)?;

    let (run_id, run) = recommendations::fetch_run(pool, Some(run_date))
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ApiRun::new(run_id, run)))
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

impl HistoryQuery {
    fn effective_limit(&self) -> Result<i64, StatusCode> {
        match self.limit {
            None => Ok(DEFAULT_HISTORY_LIMIT),
            Some(n) if (1..=MAX_HISTORY_LIMIT).contains(&n) => Ok(n),
            Some(_) => Err(StatusCode::BAD_REQUEST),
        }
    }
}

async fn get_ticker_signals(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<TickerSignal>>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let ticker = ticker.trim().to_ascii_uppercase();
    if ticker.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let limit = query.effective_limit()?;

    let signals = recommendations::fetch_ticker_history(pool, &ticker, limit)
        .await
        .map_err(internal_error)?;

    Ok(Json(signals))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use athena_core::domain::recommendation::{Action, Recommendation};
    use athena_core::engine::MarketRegime;

    #[test]
    fn history_limit_bounds() {
        assert_eq!(HistoryQuery::default().effective_limit(), Ok(DEFAULT_HISTORY_LIMIT));
        assert_eq!(HistoryQuery { limit: Some(5) }.effective_limit(), Ok(5));
        assert_eq!(
            HistoryQuery { limit: Some(0) }.effective_limit(),
            Err(StatusCode::BAD_REQUEST)
        );
        assert_eq!(
            HistoryQuery { limit: Some(10_000) }.effective_limit(),
            Err(StatusCode::BAD_REQUEST)
        );
    }

    #[test]
    fn run_payload_shape() {
        let run = RecommendationRun {
            run_date: NaiveDate::from_ymd_opt(2026, 10, 15).unwrap(),
            generated_at: chrono::Utc::now(),
            budget: 1000.0,
            regime: MarketRegime::Calm,
            vix_level: 15.0,
            items: vec![Recommendation {
                ticker: Some("SPY".to_string()),
                action: Action::Buy,
                amount: 400.0,
                confidence_score: 0.7,
                reasoning: "Standard allocation (70% confidence)".to_string(),
                regime: MarketRegime::Calm,
                vix_level: 15.0,
            }],
        };

        let v = serde_json::to_value(ApiRun::new(Uuid::nil(), run)).unwrap();
        assert_eq!(v["total_allocated"], 400.0);
        assert_eq!(v["run"]["regime"], "calm");
        assert_eq!(v["run"]["items"][0]["action"], "buy");
    }
}
