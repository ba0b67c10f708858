//! HTTP API handlers for the matching engine

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use common::{Amount, OrderId, OrderType, Pair, Side, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::{BookSnapshot, NewOrder, Order, Trade};
use crate::error::MatchingError;
use crate::exchange::{Exchange, Finality, TradeView};
use crate::metrics::MetricsSnapshot;
use crate::pool::PoolStats;
use crate::result::OrderState;

const DEFAULT_TRADE_LIMIT: usize = 50;

/// Shared state for the API routes
#[derive(Clone)]
pub struct ApiState {
    pub exchange: Arc<Exchange>,
}

/// Error body: `{"success": false, "message": ...}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<MatchingError> for ApiError {
    fn from(e: MatchingError) -> Self {
        let status = match &e {
            MatchingError::UnknownPair(_) => StatusCode::NOT_FOUND,
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            e if e.is_backpressure() => StatusCode::TOO_MANY_REQUESTS,
            MatchingError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "success": false,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn parse_pair(raw: &str) -> Result<Pair, ApiError> {
    raw.parse()
        .map_err(|e: common::Error| ApiError::bad_request(e.to_string()))
}

// ============================================================================
// Orders
// ============================================================================

/// Request to submit an order; amounts are decimal strings
#[derive(Debug, Deserialize)]
pub struct SubmitOrderRequest {
    pub user_id: String,
    pub pair: String,
    pub side: Side,
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    pub price: Option<Amount>,
    pub amount: Amount,
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_order_type() -> OrderType {
    OrderType::Limit
}

#[derive(Debug, Serialize)]
pub struct SubmitOrderResponse {
    pub success: bool,
    pub order: Order,
    pub state: OrderState,
    pub trades: Vec<Trade>,
    pub expired_makers: Vec<OrderId>,
}

pub async fn submit_order(
    State(state): State<ApiState>,
    Json(req): Json<SubmitOrderRequest>,
) -> ApiResult<SubmitOrderResponse> {
    let user_id = UserId::new(&req.user_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let request = NewOrder {
        user_id,
        pair: parse_pair(&req.pair)?,
        side: req.side,
        order_type: req.order_type,
        price: req.price,
        amount: req.amount,
        expires_at: req.expires_at,
    };

    let result = state.exchange.submit_order(request).await?;
    Ok(Json(SubmitOrderResponse {
        success: true,
        order: result.order,
        state: result.state,
        trades: result.trades,
        expired_makers: result.expired_makers,
    }))
}

#[derive(Debug, Serialize)]
pub struct CancelOrderResponse {
    pub success: bool,
    pub cancelled: bool,
    pub order: Option<Order>,
}

pub async fn cancel_order(
    State(state): State<ApiState>,
    Path(order_id): Path<OrderId>,
) -> ApiResult<CancelOrderResponse> {
    let result = state.exchange.cancel_order(order_id).await?;
    Ok(Json(CancelOrderResponse {
        success: true,
        cancelled: result.cancelled,
        order: result.order,
    }))
}

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BookQuery {
    pub depth: Option<usize>,
}

pub async fn get_order_book(
    State(state): State<ApiState>,
    Path(pair): Path<String>,
    Query(query): Query<BookQuery>,
) -> ApiResult<BookSnapshot> {
    let pair = parse_pair(&pair)?;
    Ok(Json(state.exchange.get_book_snapshot(&pair, query.depth).await?))
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TradesResponse {
    pub success: bool,
    pub pair: Pair,
    pub trades: Vec<TradeView>,
}

pub async fn get_trades(
    State(state): State<ApiState>,
    Path(pair): Path<String>,
    Query(query): Query<TradesQuery>,
) -> ApiResult<TradesResponse> {
    let pair = parse_pair(&pair)?;
    let trades = state
        .exchange
        .get_recent_trades(&pair, query.limit.unwrap_or(DEFAULT_TRADE_LIMIT))
        .await?;
    Ok(Json(TradesResponse {
        success: true,
        pair,
        trades,
    }))
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub engine: MetricsSnapshot,
    pub pools: Vec<PoolStats>,
}

pub async fn get_metrics(State(state): State<ApiState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        engine: state.exchange.metrics(),
        pools: state.exchange.pool_stats(),
    })
}

// ============================================================================
// Settlement
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FinalityRequest {
    pub finalized_through: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FinalityResponse {
    pub advanced: bool,
    pub finality: Finality,
}

pub async fn set_finality(
    State(state): State<ApiState>,
    Json(req): Json<FinalityRequest>,
) -> Json<FinalityResponse> {
    let advanced = state.exchange.set_finality(req.finalized_through);
    Json(FinalityResponse {
        advanced,
        finality: state.exchange.finality(),
    })
}

/// Health check
pub async fn health(State(state): State<ApiState>) -> Response {
    let store = state.exchange.store();
    match store.ping().await {
        Ok(()) => Json(serde_json::json!({
            "status": "healthy",
            "service": "matching-engine",
            "store": store.backend(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unhealthy",
                "service": "matching-engine",
                "store": store.backend(),
                "message": e.to_string(),
            })),
        )
            .into_response(),
    }
}
