//! Booking lifecycle: creation, state transitions and rescheduling.
//!
//! All writes for one operation happen inside a single transaction. Creation
//! and rescheduling additionally take a transaction-scoped advisory lock on
//! the staff member, so the conflict-check read and the insert/update cannot
//! be split by a concurrent request for the same staff; different staff
//! members proceed fully in parallel.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Postgres, Transaction};
use tracing::{info, warn};

use crate::config::BookingPolicyConfig;
use crate::database::Database;
use crate::errors::EngineError;
use crate::models::booking::{apply_transition, Booking, BookingAction, BookingStatus};
use crate::models::catalog::Service;
use crate::services::availability::{self, SlotOverride};
use crate::services::loyalty::LoyaltyService;

#[derive(Debug, Clone)]
pub struct CreateBookingInput {
    pub merchant_id: i64,
    pub customer_id: i64,
    pub staff_id: i64,
    pub service_ids: Vec<i64>,
    pub start_time: DateTime<Utc>,
    /// PENDING or CONFIRMED, per the caller's channel policy.
    pub initial_status: BookingStatus,
}

#[derive(Clone)]
pub struct BookingService {
    db: Database,
    policy: BookingPolicyConfig,
    loyalty: LoyaltyService,
}

/// Check-in is accepted from `window_minutes` before the start until the
/// scheduled end of the appointment.
fn within_check_in_window(
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    window_minutes: i64,
) -> bool {
    now >= start - Duration::minutes(window_minutes) && now < end
}

impl BookingService {
    pub fn new(db: Database, policy: BookingPolicyConfig, loyalty: LoyaltyService) -> Self {
        Self { db, policy, loyalty }
    }

    /// Create a booking through the normal, conflict-checked path.
    pub async fn create(&self, input: CreateBookingInput) -> Result<Booking, EngineError> {
        self.create_inner(input, SlotOverride::Enforce).await
    }

    /// Administrative creation that may bypass the conflict check, used by
    /// seeding and fixture tooling. Never wired to the public creation
    /// route; every bypass is logged and flagged on the row.
    pub async fn create_as_admin(
        &self,
        input: CreateBookingInput,
        slot_override: SlotOverride,
    ) -> Result<Booking, EngineError> {
        if slot_override.bypasses() {
            warn!(
                staff_id = input.staff_id,
                start = %input.start_time,
                "creating booking with conflict check bypassed"
            );
        }
        self.create_inner(input, slot_override).await
    }

    async fn create_inner(
        &self,
        input: CreateBookingInput,
        slot_override: SlotOverride,
    ) -> Result<Booking, EngineError> {
        if !matches!(input.initial_status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(EngineError::Validation(
                "bookings can only be created as PENDING or CONFIRMED".into(),
            ));
        }
        if input.service_ids.is_empty() {
            return Err(EngineError::Validation("at least one service is required".into()));
        }

        let services =
            Service::fetch_for_merchant(&self.db.pool, input.merchant_id, &input.service_ids)
                .await?;
        if services.len() != input.service_ids.len() {
            return Err(EngineError::NotFound("service"));
        }

        let duration_minutes: i64 = services.iter().map(|s| s.duration_minutes as i64).sum();
        if duration_minutes <= 0 {
            return Err(EngineError::Validation("total service duration must be positive".into()));
        }
        let total_amount_cents: i64 = services.iter().map(|s| s.price_cents).sum();
        let end_time = input.start_time + Duration::minutes(duration_minutes);

        if !customer_in_merchant(&self.db.pool, input.customer_id, input.merchant_id).await? {
            return Err(EngineError::NotFound("customer"));
        }
        if !staff_in_merchant(&self.db.pool, input.staff_id, input.merchant_id).await? {
            return Err(EngineError::NotFound("staff"));
        }

        let mut tx = self.db.pool.begin().await?;
        lock_staff(&mut tx, input.staff_id).await?;

        if !slot_override.bypasses()
            && availability::has_conflict(
                &mut *tx,
                input.staff_id,
                input.start_time,
                end_time,
                None,
            )
            .await?
        {
            return Err(EngineError::Conflict);
        }

        let booking = sqlx::query_as::<_, Booking>(
            r#"
            INSERT INTO bookings
                (merchant_id, customer_id, staff_id, start_time, end_time, status,
                 total_amount_cents, confirmed_at, created_with_override)
            VALUES ($1, $2, $3, $4, $5, $6, $7,
                    CASE WHEN $6 = 'CONFIRMED' THEN NOW() END, $8)
            RETURNING *
            "#,
        )
        .bind(input.merchant_id)
        .bind(input.customer_id)
        .bind(input.staff_id)
        .bind(input.start_time)
        .bind(end_time)
        .bind(input.initial_status.as_str())
        .bind(total_amount_cents)
        .bind(slot_override.bypasses())
        .fetch_one(&mut *tx)
        .await?;

        for service in &services {
            sqlx::query("INSERT INTO booking_services (booking_id, service_id) VALUES ($1, $2)")
                .bind(booking.id)
                .bind(service.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(
            booking_id = booking.id,
            staff_id = booking.staff_id,
            status = booking.status.as_str(),
            "booking created"
        );
        Ok(booking)
    }

    /// Apply one state-machine action to a booking.
    ///
    /// The row is locked for the whole guard-and-write sequence. A
    /// transition into COMPLETED triggers exactly one ledger accrual inside
    /// the same transaction; a retried `Complete` fails with
    /// `AlreadyCompleted` before the ledger is ever consulted.
    pub async fn transition(
        &self,
        booking_id: i64,
        merchant_id: i64,
        action: BookingAction,
    ) -> Result<Booking, EngineError> {
        let mut tx = self.db.pool.begin().await?;
        let booking = fetch_locked(&mut tx, booking_id, merchant_id).await?;

        let next = apply_transition(booking.status, action)?;
        let now = Utc::now();

        match action {
            BookingAction::Confirm => {
                // Slot must still be free at confirmation time.
                lock_staff(&mut tx, booking.staff_id).await?;
                if availability::has_conflict(
                    &mut *tx,
                    booking.staff_id,
                    booking.start_time,
                    booking.end_time,
                    Some(booking.id),
                )
                .await?
                {
                    return Err(EngineError::Conflict);
                }
            }
            BookingAction::CheckIn => {
                if !within_check_in_window(
                    now,
                    booking.start_time,
                    booking.end_time,
                    self.policy.check_in_window_minutes,
                ) {
                    return Err(EngineError::InvalidTransition { from: booking.status, action });
                }
            }
            BookingAction::MarkNoShow => {
                if now < booking.start_time {
                    return Err(EngineError::InvalidTransition { from: booking.status, action });
                }
            }
            BookingAction::Complete | BookingAction::Cancel => {}
        }

        let timestamp_column = match next {
            BookingStatus::Confirmed => "confirmed_at",
            BookingStatus::InProgress => "checked_in_at",
            BookingStatus::Completed => "completed_at",
            BookingStatus::Cancelled => "cancelled_at",
            BookingStatus::NoShow => "no_show_at",
            BookingStatus::Pending => unreachable!("no transition leads back to PENDING"),
        };
        let sql = format!(
            "UPDATE bookings SET status = $1, {timestamp_column} = NOW() WHERE id = $2 RETURNING *"
        );
        let updated = sqlx::query_as::<_, Booking>(&sql)
            .bind(next.as_str())
            .bind(booking.id)
            .fetch_one(&mut *tx)
            .await?;

        if action == BookingAction::Complete {
            match self
                .loyalty
                .accrue_in_tx(
                    &mut tx,
                    booking.customer_id,
                    booking.merchant_id,
                    booking.id,
                    booking.total_amount_cents,
                )
                .await
            {
                Ok(Some(txn)) => {
                    info!(booking_id = booking.id, amount = txn.amount, "loyalty accrued");
                }
                Ok(None) => {} // already accrued for this booking
                // A merchant without a program still completes bookings.
                Err(EngineError::ProgramNotConfigured) => {}
                Err(e) => return Err(e),
            }
        }

        tx.commit().await?;
        info!(
            booking_id = updated.id,
            from = booking.status.as_str(),
            to = updated.status.as_str(),
            "booking transitioned"
        );
        Ok(updated)
    }

    /// Move a booking to a new time and/or staff member. Re-runs the
    /// conflict check with the booking's own slot excluded; any conflict
    /// fails the whole operation with nothing changed.
    pub async fn reschedule(
        &self,
        booking_id: i64,
        merchant_id: i64,
        new_staff_id: Option<i64>,
        new_start_time: Option<DateTime<Utc>>,
    ) -> Result<Booking, EngineError> {
        if new_staff_id.is_none() && new_start_time.is_none() {
            return Err(EngineError::Validation(
                "reschedule requires a new staff member or a new start time".into(),
            ));
        }

        let mut tx = self.db.pool.begin().await?;
        let booking = fetch_locked(&mut tx, booking_id, merchant_id).await?;

        if booking.status.is_terminal() {
            return Err(EngineError::Validation(format!(
                "cannot reschedule a booking in status {}",
                booking.status.as_str()
            )));
        }

        let staff_id = new_staff_id.unwrap_or(booking.staff_id);
        if staff_id != booking.staff_id
            && !staff_in_merchant_tx(&mut tx, staff_id, merchant_id).await?
        {
            return Err(EngineError::NotFound("staff"));
        }

        let duration = booking.end_time - booking.start_time;
        let start_time = new_start_time.unwrap_or(booking.start_time);
        let end_time = start_time + duration;

        lock_staff(&mut tx, staff_id).await?;
        if availability::has_conflict(&mut *tx, staff_id, start_time, end_time, Some(booking.id))
            .await?
        {
            return Err(EngineError::Conflict);
        }

        let updated = sqlx::query_as::<_, Booking>(
            "UPDATE bookings SET staff_id = $1, start_time = $2, end_time = $3
             WHERE id = $4 RETURNING *",
        )
        .bind(staff_id)
        .bind(start_time)
        .bind(end_time)
        .bind(booking.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(booking_id = updated.id, staff_id, start = %start_time, "booking rescheduled");
        Ok(updated)
    }

    pub async fn list_for_merchant(&self, merchant_id: i64) -> Result<Vec<Booking>, EngineError> {
        let bookings = sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings WHERE merchant_id = $1 ORDER BY start_time DESC LIMIT 200",
        )
        .bind(merchant_id)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(bookings)
    }
}

async fn fetch_locked(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: i64,
    merchant_id: i64,
) -> Result<Booking, EngineError> {
    sqlx::query_as::<_, Booking>(
        "SELECT * FROM bookings WHERE id = $1 AND merchant_id = $2 FOR UPDATE",
    )
    .bind(booking_id)
    .bind(merchant_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(EngineError::NotFound("booking"))
}

/// Transaction-scoped advisory lock serializing slot writes per staff
/// member. Released automatically at commit/rollback.
async fn lock_staff(tx: &mut Transaction<'_, Postgres>, staff_id: i64) -> Result<(), EngineError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(staff_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn staff_in_merchant(
    pool: &sqlx::PgPool,
    staff_id: i64,
    merchant_id: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM staff WHERE id = $1 AND merchant_id = $2 AND is_active)",
    )
    .bind(staff_id)
    .bind(merchant_id)
    .fetch_one(pool)
    .await
}

async fn staff_in_merchant_tx(
    tx: &mut Transaction<'_, Postgres>,
    staff_id: i64,
    merchant_id: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM staff WHERE id = $1 AND merchant_id = $2 AND is_active)",
    )
    .bind(staff_id)
    .bind(merchant_id)
    .fetch_one(&mut **tx)
    .await
}

async fn customer_in_merchant(
    pool: &sqlx::PgPool,
    customer_id: i64,
    merchant_id: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM customers WHERE id = $1 AND merchant_id = $2)",
    )
    .bind(customer_id)
    .bind(merchant_id)
    .fetch_one(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, min, 0).unwrap()
    }

    #[test]
    fn check_in_window_opens_before_start_and_closes_at_end() {
        let start = at(10, 0);
        let end = at(11, 0);
        assert!(!within_check_in_window(at(9, 15), start, end, 30));
        assert!(within_check_in_window(at(9, 30), start, end, 30));
        assert!(within_check_in_window(at(10, 0), start, end, 30));
        assert!(within_check_in_window(at(10, 59), start, end, 30));
        assert!(!within_check_in_window(at(11, 0), start, end, 30));
    }

    #[test]
    fn zero_window_means_check_in_from_start_only() {
        let start = at(10, 0);
        let end = at(11, 0);
        assert!(!within_check_in_window(at(9, 59), start, end, 0));
        assert!(within_check_in_window(at(10, 0), start, end, 0));
    }
}
