//! Request Handlers
//!
//! Thin adapters between HTTP and the settlement coordinator. Bodies are
//! validated through the `models` conversions before any engine call.

use super::{
    errors::ApiError,
    middleware::RequestId,
    models::*,
    security::AdminGuard,
};
use crate::{
    metrics::WagerMetrics,
    wager::{
        coordinator::{CreateEntryRequest, InitPoolRequest, SettlementCoordinator},
        types::{Currency, OddsQuote, PoolOverview, SettleState, SettlementReport},
    },
};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state
pub struct AppState {
    pub coordinator: SettlementCoordinator,
    pub admin: AdminGuard,
    pub metrics: Arc<WagerMetrics>,
    pub version: String,
}

fn parse_body<T>(request_id: &RequestId, payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(request_id.0.clone(), rejection.body_text()))
}

fn parse_entry_id(request_id: &RequestId, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::bad_request(request_id.0.clone(), format!("invalid entry id: {}", raw)))
}

fn parse_currency(request_id: &RequestId, raw: &str) -> Result<Currency, ApiError> {
    Currency::parse(raw).map_err(|e| ApiError::from_wager(request_id.0.clone(), e))
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: state.version.clone(),
        timestamp: Utc::now(),
    })
}

/// GET /pool/:currency
pub async fn pool_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(currency): Path<String>,
) -> Result<Json<PoolOverview>, ApiError> {
    let currency = parse_currency(&request_id, &currency)?;
    state
        .coordinator
        .pool_overview(currency)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_wager(request_id.0, e))
}

/// POST /calculate-odds
pub async fn calculate_odds_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<OddsRequestBody>, JsonRejection>,
) -> Result<Json<OddsQuote>, ApiError> {
    let body = parse_body(&request_id, payload)?;
    let request = OddsRequest::try_from(body).map_err(|e| ApiError::from_wager(request_id.0.clone(), e))?;

    state
        .coordinator
        .calculate_odds(request.stake, request.premium, request.risk_level, request.currency)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_wager(request_id.0, e))
}

/// POST /entry
pub async fn create_entry_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateEntryBody>, JsonRejection>,
) -> Result<(StatusCode, Json<EntryResponse>), ApiError> {
    let body = parse_body(&request_id, payload)?;
    let request =
        CreateEntryRequest::try_from(body).map_err(|e| ApiError::from_wager(request_id.0.clone(), e))?;

    let entry = state
        .coordinator
        .create_entry(request)
        .await
        .map_err(|e| ApiError::from_wager(request_id.0, e))?;

    Ok((StatusCode::CREATED, Json(EntryResponse::from(entry))))
}

/// POST /settle/:entry_id
///
/// Answers 202 while a won entry still waits for its refund.
pub async fn settle_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
) -> Result<(StatusCode, Json<SettlementReport>), ApiError> {
    let entry_id = parse_entry_id(&request_id, &entry_id)?;
    let report = state
        .coordinator
        .settle(entry_id)
        .await
        .map_err(|e| ApiError::from_wager(request_id.0, e))?;

    Ok((settlement_status(&report), Json(report)))
}

/// GET /entry/:entry_id
pub async fn entry_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
) -> Result<Json<EntryResponse>, ApiError> {
    let entry_id = parse_entry_id(&request_id, &entry_id)?;
    state
        .coordinator
        .entry(entry_id)
        .await
        .map(|entry| Json(EntryResponse::from(entry)))
        .map_err(|e| ApiError::from_wager(request_id.0, e))
}

/// GET /recent-wins?limit=N
pub async fn recent_wins_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    query: Result<Query<RecentWinsQuery>, QueryRejection>,
) -> Result<Json<RecentWinsResponse>, ApiError> {
    let Query(query) =
        query.map_err(|rejection| ApiError::bad_request(request_id.0.clone(), rejection.body_text()))?;
    state
        .coordinator
        .recent_wins(query.limit)
        .await
        .map(|wins| Json(RecentWinsResponse { wins }))
        .map_err(|e| ApiError::from_wager(request_id.0, e))
}

/// POST /pool/init (admin)
pub async fn init_pool_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<InitPoolBody>, JsonRejection>,
) -> Result<(StatusCode, Json<PoolOverview>), ApiError> {
    state.admin.authorize(&headers, &request_id.0)?;
    let body = parse_body(&request_id, payload)?;
    let request = InitPoolRequest::try_from(body).map_err(|e| ApiError::from_wager(request_id.0.clone(), e))?;

    let overview = state
        .coordinator
        .init_pool(request)
        .await
        .map_err(|e| ApiError::from_wager(request_id.0, e))?;

    Ok((StatusCode::CREATED, Json(overview)))
}

/// POST /pool/:currency/seed (admin)
pub async fn seed_pool_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(currency): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<SeedPoolBody>, JsonRejection>,
) -> Result<Json<PoolOverview>, ApiError> {
    state.admin.authorize(&headers, &request_id.0)?;
    let currency = parse_currency(&request_id, &currency)?;
    let body = parse_body(&request_id, payload)?;

    state
        .coordinator
        .seed_pool(currency, body.amount)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_wager(request_id.0, e))
}

/// POST /pool/:currency/pause (admin)
pub async fn pause_pool_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(currency): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<PausePoolBody>, JsonRejection>,
) -> Result<Json<PoolOverview>, ApiError> {
    state.admin.authorize(&headers, &request_id.0)?;
    let currency = parse_currency(&request_id, &currency)?;
    let body = parse_body(&request_id, payload)?;

    state
        .coordinator
        .set_paused(currency, body.paused)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_wager(request_id.0, e))
}

/// POST /entry/:entry_id/retry-refund (admin)
pub async fn retry_refund_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<SettlementReport>), ApiError> {
    state.admin.authorize(&headers, &request_id.0)?;
    let entry_id = parse_entry_id(&request_id, &entry_id)?;

    let report = state
        .coordinator
        .retry_refund(entry_id)
        .await
        .map_err(|e| ApiError::from_wager(request_id.0, e))?;

    Ok((settlement_status(&report), Json(report)))
}

fn settlement_status(report: &SettlementReport) -> StatusCode {
    match report.state {
        SettleState::WonRefundPending => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    }
}
