//! Control API route handlers.
//!
//! All endpoints return JSON. Mutating endpoints answer with the session's
//! status after the change so callers never need a second round trip.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::engine::portfolio::DEFAULT_TOP;
use crate::engine::{EngineStatus, PortfolioSummary, SessionManager};
use crate::storage::Outcome;
use crate::strategy::profile::{StrategyKind, StrategyProfile};
use crate::types::{PurchaseMode, Robux, SniperError, UgcPolicy};

pub type AppState = Arc<SessionManager>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// A domain error mapped to an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<SniperError> for ApiError {
    fn from(err: SniperError) -> Self {
        let status = match &err {
            SniperError::Config(_) => StatusCode::BAD_REQUEST,
            SniperError::InvalidTransition { .. } => StatusCode::CONFLICT,
            SniperError::SessionNotFound(_) | SniperError::NoPendingAlert(_) => StatusCode::NOT_FOUND,
            SniperError::SourceUnavailable(_) | SniperError::Purchase { .. } => StatusCode::BAD_GATEWAY,
            SniperError::Notify(_) | SniperError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: err.to_string() }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<SniperError>() {
            Some(domain) => domain.clone().into(),
            None => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: format!("{err:#}"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "Control request failed");
        }
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Either a preset name or a full custom profile.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyRequest {
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub profile: Option<StrategyProfile>,
    #[serde(default)]
    pub ugc_policy: Option<String>,
}

impl StrategyRequest {
    fn into_profile(self) -> Result<StrategyProfile, SniperError> {
        let mut profile = match (self.profile, self.strategy) {
            (Some(profile), _) => profile,
            (None, Some(name)) => StrategyProfile::preset(name.parse::<StrategyKind>()?),
            (None, None) => {
                return Err(SniperError::Config(
                    "Expected either 'strategy' or 'profile'".into(),
                ))
            }
        };
        if let Some(policy) = self.ugc_policy {
            profile = profile.with_ugc_policy(policy.parse::<UgcPolicy>()?);
        }
        Ok(profile)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModeRequest {
    pub mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdRequest {
    pub threshold: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetRequest {
    pub max_price_per_item: Robux,
    pub total_budget: Robux,
    #[serde(default)]
    pub max_purchases_per_hour: Option<u32>,
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetParams {
    /// Also zero the session statistics.
    #[serde(default)]
    pub stats: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortfolioParams {
    /// Length of the best and worst lists.
    #[serde(default)]
    pub top: Option<usize>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<EngineStatus>> {
    Json(state.list())
}

/// GET /api/sessions/:id/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<EngineStatus> {
    Ok(Json(state.get(&id)?.status()))
}

/// GET /api/sessions/:id/portfolio[?top=N]
pub async fn get_portfolio(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PortfolioParams>,
) -> ApiResult<PortfolioSummary> {
    let engine = state.get(&id)?;
    Ok(Json(engine.portfolio(params.top.unwrap_or(DEFAULT_TOP))))
}

/// POST /api/sessions/:id/start
pub async fn start(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<EngineStatus> {
    let engine = state.get_or_create(&id)?;
    engine.start().await?;
    Ok(Json(engine.status()))
}

/// POST /api/sessions/:id/stop
pub async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<EngineStatus> {
    let engine = state.get(&id)?;
    engine.stop().await?;
    Ok(Json(engine.status()))
}

/// POST /api/sessions/:id/pause
pub async fn pause(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<EngineStatus> {
    let engine = state.get(&id)?;
    engine.pause()?;
    Ok(Json(engine.status()))
}

/// POST /api/sessions/:id/resume
pub async fn resume(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<EngineStatus> {
    let engine = state.get(&id)?;
    engine.resume()?;
    Ok(Json(engine.status()))
}

/// POST /api/sessions/:id/reset[?stats=true]
pub async fn reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ResetParams>,
) -> ApiResult<EngineStatus> {
    let engine = state.get(&id)?;
    if params.stats {
        engine.reset();
    } else {
        engine.reset_budget();
    }
    Ok(Json(engine.status()))
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmResponse {
    pub outcome: Outcome,
    pub status: EngineStatus,
}

/// POST /api/sessions/:id/confirm/:item_id
pub async fn confirm(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(String, u64)>,
) -> ApiResult<ConfirmResponse> {
    let engine = state.get(&id)?;
    let outcome = engine.confirm_purchase(item_id).await?;
    Ok(Json(ConfirmResponse { outcome, status: engine.status() }))
}

/// PUT /api/sessions/:id/strategy
pub async fn set_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StrategyRequest>,
) -> ApiResult<EngineStatus> {
    let engine = state.get(&id)?;
    engine.set_strategy(req.into_profile()?)?;
    Ok(Json(engine.status()))
}

/// PUT /api/sessions/:id/mode
pub async fn set_mode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ModeRequest>,
) -> ApiResult<EngineStatus> {
    let engine = state.get(&id)?;
    engine.set_mode(req.mode.parse::<PurchaseMode>()?);
    Ok(Json(engine.status()))
}

/// PUT /api/sessions/:id/threshold
pub async fn set_threshold(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ThresholdRequest>,
) -> ApiResult<EngineStatus> {
    let engine = state.get(&id)?;
    engine.set_threshold(req.threshold)?;
    Ok(Json(engine.status()))
}

/// PUT /api/sessions/:id/budget
pub async fn set_budget(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<BudgetRequest>,
) -> ApiResult<EngineStatus> {
    let engine = state.get(&id)?;
    let current = engine.guard().limits();
    let limits = crate::engine::BudgetLimits {
        max_price_per_item: req.max_price_per_item,
        total_budget: req.total_budget,
        max_purchases_per_hour: req.max_purchases_per_hour.unwrap_or(current.max_purchases_per_hour),
        cooldown_secs: req.cooldown_secs.unwrap_or(current.cooldown_secs),
    };
    engine.set_limits(limits)?;
    Ok(Json(engine.status()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
