use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, Json},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use color_eyre::eyre::{Result, WrapErr};

use crate::config::Config;
use crate::error::LedgerError;
use crate::ledger::{PriceLedger, PriceRecord};
use crate::positions::{PortfolioSummary, PositionBook};

/// Read-only view over the two ledgers for a browser. Writes still go
/// through the chat flow only.
pub struct AppState {
    ledger: PriceLedger,
    positions: PositionBook,
    recent_limit: usize,
    closed_limit: usize,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ledger: PriceLedger::new(&config.price_history_file),
            positions: PositionBook::new(&config.positions_file, config.market_fee_rate),
            recent_limit: config.recent_records_shown,
            closed_limit: config.closed_positions_shown,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/api/subjects", get(list_subjects))
        .route("/api/history/{subject}", get(get_history))
        .route("/api/recent", get(get_recent))
        .route("/api/portfolio", get(get_portfolio))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

async fn list_subjects(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, StatusCode> {
    match state.ledger.all_subjects() {
        Ok(subjects) => Ok(Json(subjects)),
        Err(e) => {
            error!("❌ Failed to list subjects: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(subject): Path<String>,
) -> Result<Json<Vec<PriceRecord>>, StatusCode> {
    match state.ledger.history_for(&subject) {
        Ok(history) => Ok(Json(history)),
        Err(LedgerError::StoreNotFound { .. }) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("❌ Failed to read history for {}: {}", subject, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_recent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<PriceRecord>>, StatusCode> {
    let limit = query.limit.unwrap_or(state.recent_limit);
    match state.ledger.recent(limit) {
        Ok(records) => Ok(Json(records)),
        Err(e) => {
            error!("❌ Failed to read recent records: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_portfolio(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PortfolioSummary>, StatusCode> {
    match state.positions.portfolio_summary(state.closed_limit) {
        Ok(summary) => Ok(Json(summary)),
        Err(e) => {
            error!("❌ Failed to read portfolio: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn start_web_server(config: &Config) -> Result<()> {
    let state = Arc::new(AppState::from_config(config));
    let app = create_router(state);
    let port = config.web_ui_port as u16;

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .wrap_err_with(|| format!("Failed to bind to port {}", port))?;
    info!("🌐 Web dashboard starting on http://localhost:{}", port);

    axum::serve(listener, app)
        .await
        .wrap_err("Failed to start web server")?;

    Ok(())
}
