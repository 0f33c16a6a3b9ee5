use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgramType {
    Visits,
    Points,
}

impl ProgramType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramType::Visits => "VISITS",
            ProgramType::Points => "POINTS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VISITS" => Some(ProgramType::Visits),
            "POINTS" => Some(ProgramType::Points),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardType {
    Free,
    Percentage,
}

impl RewardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardType::Free => "FREE",
            RewardType::Percentage => "PERCENTAGE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FREE" => Some(RewardType::Free),
            "PERCENTAGE" => Some(RewardType::Percentage),
            _ => None,
        }
    }
}

/// A merchant's loyalty program as stored: one row with nullable columns for
/// both rule sets. [`LoyaltyProgram::rules`] is the only way to obtain usable
/// rules, so a row that mixes or under-fills its rule sets cannot reach the
/// ledger.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LoyaltyProgram {
    pub id: i64,
    pub merchant_id: i64,
    pub program_type: String,
    pub visits_required: Option<i64>,
    pub reward_type: Option<String>,
    pub reward_value: Option<i64>,
    pub points_per_dollar: Option<i64>,
    pub point_value_cents: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Exhaustively validated program rules. Exactly one variant matches the
/// stored `program_type`, so downstream code never sees a half-configured
/// program or reaches for a missing field at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgramRules {
    /// Punch card: every qualifying completed visit is one punch; a full
    /// card of `visits_required` punches buys the configured reward.
    Visits {
        visits_required: i64,
        reward_type: RewardType,
        /// Percentage off for `PERCENTAGE` rewards; ignored for `FREE`.
        reward_value: i64,
    },
    /// Spend-based: `points_per_dollar` points accrue per whole dollar,
    /// each point redeemable at `point_value_cents`.
    Points {
        points_per_dollar: i64,
        point_value_cents: i64,
    },
}

impl LoyaltyProgram {
    /// Validates the flat row into [`ProgramRules`].
    ///
    /// Rejects unknown types, missing or non-positive numeric fields, and
    /// rows where the rule set of the *other* program type is populated —
    /// the two rule sets are mutually exclusive.
    pub fn rules(&self) -> Result<ProgramRules, EngineError> {
        let program_type = ProgramType::parse(&self.program_type).ok_or_else(|| {
            EngineError::Validation(format!("unknown program type '{}'", self.program_type))
        })?;

        match program_type {
            ProgramType::Visits => {
                if self.points_per_dollar.is_some() || self.point_value_cents.is_some() {
                    return Err(EngineError::Validation(
                        "VISITS program must not carry point rules".into(),
                    ));
                }
                let visits_required = self
                    .visits_required
                    .filter(|v| *v > 0)
                    .ok_or_else(|| EngineError::Validation("visitsRequired must be > 0".into()))?;
                let reward_type = self
                    .reward_type
                    .as_deref()
                    .and_then(RewardType::parse)
                    .ok_or_else(|| {
                        EngineError::Validation("rewardType must be FREE or PERCENTAGE".into())
                    })?;
                let reward_value = self
                    .reward_value
                    .filter(|v| *v > 0)
                    .ok_or_else(|| EngineError::Validation("rewardValue must be > 0".into()))?;
                if reward_type == RewardType::Percentage && reward_value > 100 {
                    return Err(EngineError::Validation(
                        "percentage reward cannot exceed 100".into(),
                    ));
                }
                Ok(ProgramRules::Visits { visits_required, reward_type, reward_value })
            }
            ProgramType::Points => {
                if self.visits_required.is_some()
                    || self.reward_type.is_some()
                    || self.reward_value.is_some()
                {
                    return Err(EngineError::Validation(
                        "POINTS program must not carry visit rules".into(),
                    ));
                }
                let points_per_dollar = self
                    .points_per_dollar
                    .filter(|v| *v > 0)
                    .ok_or_else(|| EngineError::Validation("pointsPerDollar must be > 0".into()))?;
                let point_value_cents = self
                    .point_value_cents
                    .filter(|v| *v > 0)
                    .ok_or_else(|| EngineError::Validation("pointValue must be > 0".into()))?;
                Ok(ProgramRules::Points { points_per_dollar, point_value_cents })
            }
        }
    }
}

impl ProgramRules {
    pub fn program_type(&self) -> ProgramType {
        match self {
            ProgramRules::Visits { .. } => ProgramType::Visits,
            ProgramRules::Points { .. } => ProgramType::Points,
        }
    }

    /// Amount credited for one completed booking with the given basis.
    ///
    /// Visits programs count the visit, not the spend. Points programs earn
    /// `floor(basis_dollars * points_per_dollar)` — integer division on
    /// cents keeps the floor exact, no float arithmetic.
    pub fn accrual_amount(&self, basis_cents: i64) -> i64 {
        match self {
            ProgramRules::Visits { .. } => 1,
            ProgramRules::Points { points_per_dollar, .. } => basis_cents * points_per_dollar / 100,
        }
    }

    /// Whether a reward can be claimed at the given balance. Points programs
    /// have no fixed threshold; any positive balance is redeemable up to a
    /// caller-chosen amount.
    pub fn reward_available(&self, balance: i64) -> bool {
        match self {
            ProgramRules::Visits { visits_required, .. } => balance >= *visits_required,
            ProgramRules::Points { .. } => balance > 0,
        }
    }
}

/// Applies a signed delta to a balance, refusing to go negative. Every
/// ledger mutation funnels through this so the running-sum invariant cannot
/// be broken by one forgotten bounds check.
pub fn apply_delta(balance: i64, delta: i64) -> Result<i64, EngineError> {
    let next = balance.checked_add(delta).ok_or_else(|| {
        EngineError::Validation("balance arithmetic overflow".into())
    })?;
    if next < 0 {
        return Err(EngineError::InsufficientBalance {
            available: balance,
            requested: -delta,
        });
    }
    Ok(next)
}

/// Per-customer, per-program balance. Owned by the ledger; rows are only
/// ever touched inside a ledger transaction holding the row lock.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LoyaltyAccount {
    pub id: i64,
    pub customer_id: i64,
    pub program_id: i64,
    pub balance: i64,
    pub lifetime_earned: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Earned,
    Redeemed,
    Adjusted,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Earned => "EARNED",
            TransactionType::Redeemed => "REDEEMED",
            TransactionType::Adjusted => "ADJUSTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EARNED" => Some(TransactionType::Earned),
            "REDEEMED" => Some(TransactionType::Redeemed),
            "ADJUSTED" => Some(TransactionType::Adjusted),
            _ => None,
        }
    }
}

/// One immutable ledger entry. `balance_after` is the exact running sum of
/// all entries for the account up to and including this one; corrections are
/// new ADJUSTED entries, never edits.
#[derive(Debug, Clone, Serialize)]
pub struct LoyaltyTransaction {
    pub id: i64,
    pub account_id: i64,
    pub txn_type: TransactionType,
    pub amount: i64,
    pub balance_after: i64,
    pub reference_booking_id: Option<i64>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for LoyaltyTransaction {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let type_raw: String = row.try_get("txn_type")?;
        let txn_type = TransactionType::parse(&type_raw).ok_or_else(|| {
            sqlx::Error::ColumnDecode {
                index: "txn_type".into(),
                source: format!("unknown transaction type '{type_raw}'").into(),
            }
        })?;
        Ok(LoyaltyTransaction {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            txn_type,
            amount: row.try_get("amount")?,
            balance_after: row.try_get("balance_after")?,
            reference_booking_id: row.try_get("reference_booking_id")?,
            reason: row.try_get("reason")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// What a successful redemption bought.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewardKind {
    FreeService,
    PercentageOff { percent: i64 },
    DollarValue { value_cents: i64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct RewardResult {
    pub reward: RewardKind,
    pub transaction: LoyaltyTransaction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn visits_row() -> LoyaltyProgram {
        LoyaltyProgram {
            id: 1,
            merchant_id: 1,
            program_type: "VISITS".into(),
            visits_required: Some(5),
            reward_type: Some("FREE".into()),
            reward_value: Some(1),
            points_per_dollar: None,
            point_value_cents: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn points_row() -> LoyaltyProgram {
        LoyaltyProgram {
            id: 2,
            merchant_id: 1,
            program_type: "POINTS".into(),
            visits_required: None,
            reward_type: None,
            reward_value: None,
            points_per_dollar: Some(10),
            point_value_cents: Some(1),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn valid_rows_validate_into_their_variant() {
        assert!(matches!(visits_row().rules().unwrap(), ProgramRules::Visits { .. }));
        assert!(matches!(points_row().rules().unwrap(), ProgramRules::Points { .. }));
    }

    #[test]
    fn rule_sets_are_mutually_exclusive() {
        let mut row = visits_row();
        row.points_per_dollar = Some(10);
        assert!(row.rules().is_err());

        let mut row = points_row();
        row.visits_required = Some(3);
        assert!(row.rules().is_err());
    }

    #[test]
    fn non_positive_numeric_fields_are_rejected() {
        let mut row = visits_row();
        row.visits_required = Some(0);
        assert!(row.rules().is_err());

        let mut row = points_row();
        row.points_per_dollar = Some(-1);
        assert!(row.rules().is_err());

        let mut row = points_row();
        row.point_value_cents = None;
        assert!(row.rules().is_err());
    }

    #[test]
    fn percentage_reward_capped_at_100() {
        let mut row = visits_row();
        row.reward_type = Some("PERCENTAGE".into());
        row.reward_value = Some(150);
        assert!(row.rules().is_err());
        row.reward_value = Some(20);
        assert!(row.rules().is_ok());
    }

    #[test]
    fn points_accrual_floors_on_cents() {
        let rules = ProgramRules::Points { points_per_dollar: 10, point_value_cents: 1 };
        // $50.00 at 10 pts/dollar -> exactly 500 points.
        assert_eq!(rules.accrual_amount(5000), 500);
        // $4.99 -> floor(49.9) = 49.
        assert_eq!(rules.accrual_amount(499), 49);
        assert_eq!(rules.accrual_amount(0), 0);
    }

    #[test]
    fn visit_accrual_ignores_spend() {
        let rules = ProgramRules::Visits {
            visits_required: 2,
            reward_type: RewardType::Free,
            reward_value: 1,
        };
        assert_eq!(rules.accrual_amount(0), 1);
        assert_eq!(rules.accrual_amount(100_000), 1);
    }

    #[test]
    fn visit_threshold_gates_reward() {
        let rules = ProgramRules::Visits {
            visits_required: 2,
            reward_type: RewardType::Free,
            reward_value: 1,
        };
        assert!(!rules.reward_available(0));
        assert!(!rules.reward_available(1));
        assert!(rules.reward_available(2));
        assert!(rules.reward_available(3));
    }

    #[test]
    fn any_positive_point_balance_is_redeemable() {
        let rules = ProgramRules::Points { points_per_dollar: 10, point_value_cents: 1 };
        assert!(!rules.reward_available(0));
        assert!(rules.reward_available(1));
    }

    #[test]
    fn delta_cannot_drive_balance_negative() {
        assert_eq!(apply_delta(10, -10).unwrap(), 0);
        assert!(matches!(
            apply_delta(10, -11),
            Err(EngineError::InsufficientBalance { available: 10, requested: 11 })
        ));
    }

    proptest! {
        #[test]
        fn delta_application_is_exact_or_rejected(balance in 0i64..1_000_000, delta in -1_000_000i64..1_000_000) {
            match apply_delta(balance, delta) {
                Ok(next) => {
                    prop_assert_eq!(next, balance + delta);
                    prop_assert!(next >= 0);
                }
                Err(_) => prop_assert!(balance + delta < 0),
            }
        }

        #[test]
        fn running_sum_matches_balance(deltas in proptest::collection::vec(-50i64..50, 0..40)) {
            let mut balance = 0i64;
            let mut applied = Vec::new();
            for d in deltas {
                if let Ok(next) = apply_delta(balance, d) {
                    balance = next;
                    applied.push(d);
                }
            }
            prop_assert_eq!(balance, applied.iter().sum::<i64>());
        }
    }
}
