use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::errors::EngineError;
use crate::middleware::{AuthAdmin, AuthStaff};
use crate::services::loyalty::ProgramDraft;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/loyalty/status", get(loyalty_status))
        .route("/loyalty/redeem-visit", post(redeem_visit))
        .route("/loyalty/redeem-points", post(redeem_points))
        .route("/loyalty/adjust", post(adjust_balance))
        .route("/loyalty/program", put(activate_program))
}

// GET /api/loyalty/status?customer_id=
#[derive(Debug, Deserialize, Validate)]
struct StatusQuery {
    #[validate(range(min = 1))]
    customer_id: i64,
}

async fn loyalty_status(
    State(state): State<Arc<AppState>>,
    staff: AuthStaff,
    Query(params): Query<StatusQuery>,
) -> Result<impl IntoResponse, EngineError> {
    params.validate().map_err(|e| EngineError::Validation(e.to_string()))?;
    let status = state.loyalty.status(params.customer_id, staff.merchant_id).await?;
    Ok(Json(status))
}

// POST /api/loyalty/redeem-visit
#[derive(Debug, Deserialize, Validate)]
struct RedeemVisitRequest {
    #[validate(range(min = 1))]
    customer_id: i64,
    reason: Option<String>,
}

async fn redeem_visit(
    State(state): State<Arc<AppState>>,
    staff: AuthStaff,
    Json(req): Json<RedeemVisitRequest>,
) -> Result<impl IntoResponse, EngineError> {
    req.validate().map_err(|e| EngineError::Validation(e.to_string()))?;
    let result = state
        .loyalty
        .redeem_visit_reward(req.customer_id, staff.merchant_id, req.reason)
        .await?;
    Ok(Json(result))
}

// POST /api/loyalty/redeem-points
#[derive(Debug, Deserialize, Validate)]
struct RedeemPointsRequest {
    #[validate(range(min = 1))]
    customer_id: i64,
    #[validate(range(min = 1))]
    points: i64,
    reason: Option<String>,
}

async fn redeem_points(
    State(state): State<Arc<AppState>>,
    staff: AuthStaff,
    Json(req): Json<RedeemPointsRequest>,
) -> Result<impl IntoResponse, EngineError> {
    req.validate().map_err(|e| EngineError::Validation(e.to_string()))?;
    let result = state
        .loyalty
        .redeem_points(req.customer_id, staff.merchant_id, req.points, req.reason)
        .await?;
    Ok(Json(result))
}

// POST /api/loyalty/adjust — manual correction, admin only.
#[derive(Debug, Deserialize, Validate)]
struct AdjustRequest {
    #[validate(range(min = 1))]
    customer_id: i64,
    delta: i64,
    #[validate(length(min = 1))]
    reason: String,
}

async fn adjust_balance(
    State(state): State<Arc<AppState>>,
    AuthAdmin(staff): AuthAdmin,
    Json(req): Json<AdjustRequest>,
) -> Result<impl IntoResponse, EngineError> {
    req.validate().map_err(|e| EngineError::Validation(e.to_string()))?;
    let txn = state
        .loyalty
        .adjust(req.customer_id, staff.merchant_id, req.delta, req.reason)
        .await?;
    Ok(Json(txn))
}

// PUT /api/loyalty/program — activate or replace the merchant's program.
#[derive(Debug, Deserialize)]
struct ActivateProgramRequest {
    program_type: String,
    visits_required: Option<i64>,
    reward_type: Option<String>,
    reward_value: Option<i64>,
    points_per_dollar: Option<i64>,
    point_value_cents: Option<i64>,
}

async fn activate_program(
    State(state): State<Arc<AppState>>,
    AuthAdmin(staff): AuthAdmin,
    Json(req): Json<ActivateProgramRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let program = state
        .loyalty
        .activate_program(ProgramDraft {
            merchant_id: staff.merchant_id,
            program_type: req.program_type,
            visits_required: req.visits_required,
            reward_type: req.reward_type,
            reward_value: req.reward_value,
            points_per_dollar: req.points_per_dollar,
            point_value_cents: req.point_value_cents,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(program)))
}
