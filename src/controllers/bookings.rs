use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::errors::EngineError;
use crate::middleware::{AuthAdmin, AuthStaff};
use crate::models::booking::{BookingAction, BookingStatus};
use crate::services::availability::SlotOverride;
use crate::services::booking::CreateBookingInput;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", get(list_bookings))
        .route("/bookings", post(create_booking))
        .route("/bookings/transition", patch(transition_booking))
        .route("/bookings/reschedule", patch(reschedule_booking))
        .route("/admin/bookings", post(create_booking_admin))
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
#[derive(Debug, Deserialize, Validate)]
struct CreateBookingRequest {
    #[validate(range(min = 1))]
    customer_id: i64,
    #[validate(range(min = 1))]
    staff_id: i64,
    #[validate(length(min = 1))]
    service_ids: Vec<i64>,
    start_time: DateTime<Utc>,
    /// PENDING (default) or CONFIRMED, decided by the caller's channel
    /// policy (walk-in desks typically confirm immediately).
    initial_status: Option<BookingStatus>,
}

impl CreateBookingRequest {
    fn into_input(self, merchant_id: i64) -> CreateBookingInput {
        CreateBookingInput {
            merchant_id,
            customer_id: self.customer_id,
            staff_id: self.staff_id,
            service_ids: self.service_ids,
            start_time: self.start_time,
            initial_status: self.initial_status.unwrap_or(BookingStatus::Pending),
        }
    }
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    staff: AuthStaff,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, EngineError> {
    req.validate().map_err(|e| EngineError::Validation(e.to_string()))?;
    let booking = state.bookings.create(req.into_input(staff.merchant_id)).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// POST /api/admin/bookings
//
// Same payload plus the explicit bypass flag. This is the only route that
// can create overlapping bookings; it requires the admin extractor and the
// bypass is recorded on the row.
#[derive(Debug, Deserialize, Validate)]
struct AdminCreateBookingRequest {
    #[serde(flatten)]
    #[validate(nested)]
    booking: CreateBookingRequest,
    #[serde(default)]
    bypass_conflict_check: bool,
}

async fn create_booking_admin(
    State(state): State<Arc<AppState>>,
    AuthAdmin(staff): AuthAdmin,
    Json(req): Json<AdminCreateBookingRequest>,
) -> Result<impl IntoResponse, EngineError> {
    req.validate().map_err(|e| EngineError::Validation(e.to_string()))?;
    let slot_override = if req.bypass_conflict_check {
        SlotOverride::BypassConflictCheck
    } else {
        SlotOverride::Enforce
    };
    let booking = state
        .bookings
        .create_as_admin(req.booking.into_input(staff.merchant_id), slot_override)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings
async fn list_bookings(
    State(state): State<Arc<AppState>>,
    staff: AuthStaff,
) -> Result<impl IntoResponse, EngineError> {
    let bookings = state.bookings.list_for_merchant(staff.merchant_id).await?;
    Ok(Json(bookings))
}

// PATCH /api/bookings/transition
#[derive(Debug, Deserialize, Validate)]
struct TransitionRequest {
    #[validate(range(min = 1))]
    booking_id: i64,
    action: BookingAction,
}

async fn transition_booking(
    State(state): State<Arc<AppState>>,
    staff: AuthStaff,
    Json(req): Json<TransitionRequest>,
) -> Result<impl IntoResponse, EngineError> {
    req.validate().map_err(|e| EngineError::Validation(e.to_string()))?;
    let booking = state
        .bookings
        .transition(req.booking_id, staff.merchant_id, req.action)
        .await?;
    Ok(Json(booking))
}

// PATCH /api/bookings/reschedule
#[derive(Debug, Deserialize, Validate)]
struct RescheduleRequest {
    #[validate(range(min = 1))]
    booking_id: i64,
    new_staff_id: Option<i64>,
    new_start_time: Option<DateTime<Utc>>,
}

async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    staff: AuthStaff,
    Json(req): Json<RescheduleRequest>,
) -> Result<impl IntoResponse, EngineError> {
    req.validate().map_err(|e| EngineError::Validation(e.to_string()))?;
    let booking = state
        .bookings
        .reschedule(req.booking_id, staff.merchant_id, req.new_staff_id, req.new_start_time)
        .await?;
    Ok(Json(booking))
}
