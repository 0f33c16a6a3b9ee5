use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::errors::EngineError;

/// Lifecycle status of an appointment. Statuses form a fixed set; a booking
/// is never deleted, cancellation is a terminal status rather than erasure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BookingStatus::Pending),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "IN_PROGRESS" => Some(BookingStatus::InProgress),
            "COMPLETED" => Some(BookingStatus::Completed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            "NO_SHOW" => Some(BookingStatus::NoShow),
            _ => None,
        }
    }

    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }

    /// Whether a booking in this status occupies its staff member's time
    /// for conflict purposes. Cancelled and no-show bookings never block.
    pub fn blocks_slot(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending
                | BookingStatus::Confirmed
                | BookingStatus::InProgress
                | BookingStatus::Completed
        )
    }
}

/// Actions a caller can request against a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingAction {
    Confirm,
    CheckIn,
    Complete,
    Cancel,
    MarkNoShow,
}

/// The transition table, as a pure function of (status, action).
///
/// Time- and slot-based guards (check-in window, slot still free, appointment
/// time passed) are evaluated by the booking service, which owns the clock
/// and the store; this function only decides whether the edge exists.
///
/// `Complete` on an already completed booking is surfaced as
/// [`EngineError::AlreadyCompleted`] instead of a generic invalid transition:
/// accrual is financially meaningful and callers retrying a `complete` must
/// be able to recognize the retry as harmless.
pub fn apply_transition(
    from: BookingStatus,
    action: BookingAction,
) -> Result<BookingStatus, EngineError> {
    use BookingAction as A;
    use BookingStatus as S;

    match (from, action) {
        (S::Pending | S::Confirmed, A::Confirm) => Ok(S::Confirmed),
        (S::Confirmed, A::CheckIn) => Ok(S::InProgress),
        (S::Completed, A::Complete) => Err(EngineError::AlreadyCompleted),
        (s, A::Complete) if !s.is_terminal() => Ok(S::Completed),
        (s, A::Cancel) if !s.is_terminal() => Ok(S::Cancelled),
        (S::Confirmed | S::InProgress, A::MarkNoShow) => Ok(S::NoShow),
        (from, action) => Err(EngineError::InvalidTransition { from, action }),
    }
}

/// An appointment for one staff member covering `[start_time, end_time)`.
#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub id: i64,
    pub merchant_id: i64,
    pub customer_id: i64,
    pub staff_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub total_amount_cents: i64,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub no_show_at: Option<DateTime<Utc>>,
    /// Set only by the administrative creation path that bypasses the
    /// conflict check; kept on the row so overlapping slots stay auditable.
    pub created_with_override: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for Booking {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status_raw: String = row.try_get("status")?;
        let status = BookingStatus::parse(&status_raw).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "status".into(),
            source: format!("unknown booking status '{status_raw}'").into(),
        })?;
        Ok(Booking {
            id: row.try_get("id")?,
            merchant_id: row.try_get("merchant_id")?,
            customer_id: row.try_get("customer_id")?,
            staff_id: row.try_get("staff_id")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            status,
            total_amount_cents: row.try_get("total_amount_cents")?,
            confirmed_at: row.try_get("confirmed_at")?,
            checked_in_at: row.try_get("checked_in_at")?,
            completed_at: row.try_get("completed_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
            no_show_at: row.try_get("no_show_at")?,
            created_with_override: row.try_get("created_with_override")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingAction as A;
    use BookingStatus as S;

    const ALL: [S; 6] = [S::Pending, S::Confirmed, S::InProgress, S::Completed, S::Cancelled, S::NoShow];

    #[test]
    fn happy_path_walks_the_whole_lifecycle() {
        let mut status = S::Pending;
        for (action, expected) in [
            (A::Confirm, S::Confirmed),
            (A::CheckIn, S::InProgress),
            (A::Complete, S::Completed),
        ] {
            status = apply_transition(status, action).unwrap();
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn completing_twice_is_a_distinct_error() {
        let status = apply_transition(S::InProgress, A::Complete).unwrap();
        assert!(matches!(
            apply_transition(status, A::Complete),
            Err(EngineError::AlreadyCompleted)
        ));
    }

    #[test]
    fn complete_reachable_from_any_non_terminal() {
        for s in [S::Pending, S::Confirmed, S::InProgress] {
            assert_eq!(apply_transition(s, A::Complete).unwrap(), S::Completed);
        }
        for s in [S::Cancelled, S::NoShow] {
            assert!(matches!(
                apply_transition(s, A::Complete),
                Err(EngineError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn cancel_reachable_from_any_non_terminal_only() {
        for s in ALL {
            let res = apply_transition(s, A::Cancel);
            if s.is_terminal() {
                assert!(res.is_err(), "{s:?} should not be cancellable");
            } else {
                assert_eq!(res.unwrap(), S::Cancelled);
            }
        }
    }

    #[test]
    fn no_show_only_from_confirmed_or_in_progress() {
        assert_eq!(apply_transition(S::Confirmed, A::MarkNoShow).unwrap(), S::NoShow);
        assert_eq!(apply_transition(S::InProgress, A::MarkNoShow).unwrap(), S::NoShow);
        for s in [S::Pending, S::Completed, S::Cancelled, S::NoShow] {
            assert!(apply_transition(s, A::MarkNoShow).is_err());
        }
    }

    #[test]
    fn check_in_only_from_confirmed() {
        assert_eq!(apply_transition(S::Confirmed, A::CheckIn).unwrap(), S::InProgress);
        for s in [S::Pending, S::InProgress, S::Completed, S::Cancelled, S::NoShow] {
            assert!(apply_transition(s, A::CheckIn).is_err());
        }
    }

    #[test]
    fn terminal_statuses_never_block_a_slot() {
        for s in ALL {
            assert_eq!(s.blocks_slot(), !matches!(s, S::Cancelled | S::NoShow));
        }
        // COMPLETED is terminal but still occupied real time on the calendar.
        assert!(S::Completed.blocks_slot());
    }

    #[test]
    fn status_strings_round_trip() {
        for s in ALL {
            assert_eq!(BookingStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(BookingStatus::parse("paid"), None);
    }
}
