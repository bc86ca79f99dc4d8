//! HTTP API
//!
//! Thin route layer over the query service. Endpoint shapes follow the
//! collector's historical surface: `/health`, `/latest`, and
//! `/price/{symbol}` with optional `timestamp`/`tolerance` params.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::query::{QueryError, QueryService};
use crate::supervisor::StatusHandle;
use crate::types::PricePoint;

const DEFAULT_TOLERANCE_SECS: i64 = 60;

#[derive(Clone)]
pub struct ApiState {
    pub query: QueryService,
    pub feed_status: StatusHandle,
    /// Source label reported in responses (e.g. "polymarket_rtds")
    pub source: String,
}

/// Create the API router with all endpoints
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/latest", get(get_latest))
        .route("/price/:symbol", get(get_price))
        .with_state(state)
        // CORS for browser consumers
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    source: String,
    symbols: Vec<String>,
    feed_connected: bool,
}

/// GET /health - service liveness and feed connection state
async fn get_health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().timestamp(),
        source: state.source.clone(),
        symbols: state.query.symbols(),
        feed_connected: state.feed_status.is_connected(),
    })
}

#[derive(Serialize)]
struct LatestResponse {
    prices: Vec<PricePoint>,
    source: String,
}

/// GET /latest - latest price per symbol
async fn get_latest(State(state): State<ApiState>) -> impl IntoResponse {
    Json(LatestResponse {
        prices: state.query.get_all(),
        source: state.source.clone(),
    })
}

#[derive(Debug, Deserialize)]
struct PriceQuery {
    timestamp: Option<i64>,
    tolerance: Option<i64>,
}

#[derive(Serialize)]
struct PriceResponse {
    symbol: String,
    price: f64,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    requested_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    round_id: Option<u64>,
    source: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// GET /price/{symbol} - latest price, or the price nearest to `timestamp`
/// within `tolerance` seconds when a timestamp is given
async fn get_price(
    Path(symbol): Path<String>,
    Query(params): Query<PriceQuery>,
    State(state): State<ApiState>,
) -> Response {
    let result = match params.timestamp {
        Some(timestamp) => state.query.get_at_timestamp(
            &symbol,
            timestamp,
            params.tolerance.unwrap_or(DEFAULT_TOLERANCE_SECS),
        ),
        None => state.query.get_latest(&symbol),
    };

    match result {
        Ok(point) => Json(PriceResponse {
            symbol: point.symbol.clone(),
            price: point.price,
            timestamp: point.timestamp,
            requested_timestamp: params.timestamp,
            round_id: point.round_id,
            source: state.source.clone(),
        })
        .into_response(),
        Err(err) => error_response(&symbol, &params, err),
    }
}

fn error_response(symbol: &str, params: &PriceQuery, err: QueryError) -> Response {
    let status = match err {
        QueryError::UnknownSymbol(_) | QueryError::InvalidTolerance => StatusCode::BAD_REQUEST,
        QueryError::NotFound => StatusCode::NOT_FOUND,
    };

    let message = match (&err, params.timestamp) {
        (QueryError::NotFound, Some(timestamp)) => format!(
            "No price found for {} at timestamp {} (±{}s)",
            symbol.to_uppercase(),
            timestamp,
            params.tolerance.unwrap_or(DEFAULT_TOLERANCE_SECS)
        ),
        (QueryError::NotFound, None) => {
            format!("No price data available for {}", symbol.to_uppercase())
        }
        _ => err.to_string(),
    };

    (status, Json(ErrorResponse { error: message })).into_response()
}
