//! The loyalty ledger: an append-only transaction log plus a derived balance
//! per customer per program.
//!
//! Every mutation is one transaction that locks the account row for the
//! whole read-validate-write sequence, so a concurrent accrual and
//! redemption on the same account cannot interleave. The derived balance is
//! always the running sum of the log; `balance_after` is written on every
//! entry so the invariant is checkable row by row.

use chrono::Utc;
use serde::Serialize;
use sqlx::{PgExecutor, Postgres, Transaction};
use tracing::info;

use crate::database::Database;
use crate::errors::EngineError;
use crate::models::loyalty::{
    apply_delta, LoyaltyAccount, LoyaltyProgram, LoyaltyTransaction, ProgramRules, ProgramType,
    RewardKind, RewardResult, RewardType, TransactionType,
};

#[derive(Clone)]
pub struct LoyaltyService {
    db: Database,
}

/// Candidate program configuration submitted for activation. Flat like the
/// stored row; `activate` validates it into [`ProgramRules`] before anything
/// is written.
#[derive(Debug, Clone)]
pub struct ProgramDraft {
    pub merchant_id: i64,
    pub program_type: String,
    pub visits_required: Option<i64>,
    pub reward_type: Option<String>,
    pub reward_value: Option<i64>,
    pub points_per_dollar: Option<i64>,
    pub point_value_cents: Option<i64>,
}

/// Snapshot returned by `getLoyaltyStatus`.
#[derive(Debug, Clone, Serialize)]
pub struct LoyaltyStatus {
    pub program_type: ProgramType,
    pub current_balance: i64,
    pub lifetime_earned: i64,
    pub reward_available: bool,
}

impl LoyaltyService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Activate a merchant's loyalty program, replacing any currently active
    /// one atomically so exactly one program is active at a time.
    ///
    /// Existing accounts under a previous program are left untouched; they
    /// keep their history and balance under the old program id.
    pub async fn activate_program(&self, draft: ProgramDraft) -> Result<LoyaltyProgram, EngineError> {
        // Validate through the same path the ledger uses at read time.
        let candidate = LoyaltyProgram {
            id: 0,
            merchant_id: draft.merchant_id,
            program_type: draft.program_type.clone(),
            visits_required: draft.visits_required,
            reward_type: draft.reward_type.clone(),
            reward_value: draft.reward_value,
            points_per_dollar: draft.points_per_dollar,
            point_value_cents: draft.point_value_cents,
            is_active: true,
            created_at: Utc::now(),
        };
        candidate.rules()?;

        let mut tx = self.db.pool.begin().await?;
        sqlx::query(
            "UPDATE loyalty_programs SET is_active = FALSE WHERE merchant_id = $1 AND is_active",
        )
        .bind(draft.merchant_id)
        .execute(&mut *tx)
        .await?;

        let program = sqlx::query_as::<_, LoyaltyProgram>(
            r#"
            INSERT INTO loyalty_programs
                (merchant_id, program_type, visits_required, reward_type, reward_value,
                 points_per_dollar, point_value_cents, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
            RETURNING *
            "#,
        )
        .bind(draft.merchant_id)
        .bind(&draft.program_type)
        .bind(draft.visits_required)
        .bind(&draft.reward_type)
        .bind(draft.reward_value)
        .bind(draft.points_per_dollar)
        .bind(draft.point_value_cents)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            merchant_id = program.merchant_id,
            program_id = program.id,
            program_type = %program.program_type,
            "loyalty program activated"
        );
        Ok(program)
    }

    /// Credit the ledger for one completed booking, inside the caller's
    /// transaction (the completion transition commits booking and accrual
    /// together).
    ///
    /// Idempotent per booking: if an EARNED entry referencing `booking_id`
    /// already exists this is a no-op returning `None`. For VISITS programs
    /// the credit is one punch; for POINTS it is `floor(basis *
    /// pointsPerDollar)`. A zero-point basis still writes the entry — it is
    /// the exactly-once marker for the booking.
    pub async fn accrue_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        customer_id: i64,
        merchant_id: i64,
        booking_id: i64,
        basis_cents: i64,
    ) -> Result<Option<LoyaltyTransaction>, EngineError> {
        let (program, rules) = active_program(&mut **tx, merchant_id).await?;

        let already_accrued = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
               SELECT 1 FROM loyalty_transactions
               WHERE reference_booking_id = $1 AND txn_type = 'EARNED'
             )",
        )
        .bind(booking_id)
        .fetch_one(&mut **tx)
        .await?;
        if already_accrued {
            return Ok(None);
        }

        let account = lock_account(tx, customer_id, program.id).await?;
        let amount = rules.accrual_amount(basis_cents);
        let balance_after = apply_delta(account.balance, amount)?;

        let txn = insert_transaction(
            tx,
            account.id,
            TransactionType::Earned,
            amount,
            balance_after,
            Some(booking_id),
            None,
        )
        .await?;

        sqlx::query(
            "UPDATE loyalty_accounts SET balance = $1, lifetime_earned = lifetime_earned + $2
             WHERE id = $3",
        )
        .bind(balance_after)
        .bind(amount)
        .bind(account.id)
        .execute(&mut **tx)
        .await?;

        Ok(Some(txn))
    }

    pub async fn status(
        &self,
        customer_id: i64,
        merchant_id: i64,
    ) -> Result<LoyaltyStatus, EngineError> {
        let (program, rules) = active_program(&self.db.pool, merchant_id).await?;

        // No account yet means no activity yet, not an error.
        let account = sqlx::query_as::<_, LoyaltyAccount>(
            "SELECT * FROM loyalty_accounts WHERE customer_id = $1 AND program_id = $2",
        )
        .bind(customer_id)
        .bind(program.id)
        .fetch_optional(&self.db.pool)
        .await?;

        let (balance, lifetime) = account.map(|a| (a.balance, a.lifetime_earned)).unwrap_or((0, 0));
        Ok(LoyaltyStatus {
            program_type: rules.program_type(),
            current_balance: balance,
            lifetime_earned: lifetime,
            reward_available: rules.reward_available(balance),
        })
    }

    /// Redeem a full punch card: debits exactly `visitsRequired` and returns
    /// the configured reward.
    pub async fn redeem_visit_reward(
        &self,
        customer_id: i64,
        merchant_id: i64,
        reason: Option<String>,
    ) -> Result<RewardResult, EngineError> {
        let mut tx = self.db.pool.begin().await?;
        let (program, rules) = active_program(&mut *tx, merchant_id).await?;

        let ProgramRules::Visits { visits_required, reward_type, reward_value } = rules else {
            return Err(EngineError::Validation(
                "visit rewards can only be redeemed under a VISITS program".into(),
            ));
        };

        ensure_customer(&mut tx, customer_id, merchant_id).await?;
        let account = lock_account(&mut tx, customer_id, program.id).await?;
        if account.balance < visits_required {
            return Err(EngineError::InsufficientBalance {
                available: account.balance,
                requested: visits_required,
            });
        }
        let balance_after = apply_delta(account.balance, -visits_required)?;

        let txn = insert_transaction(
            &mut tx,
            account.id,
            TransactionType::Redeemed,
            -visits_required,
            balance_after,
            None,
            reason,
        )
        .await?;
        set_balance(&mut tx, account.id, balance_after).await?;
        tx.commit().await?;

        let reward = match reward_type {
            RewardType::Free => RewardKind::FreeService,
            RewardType::Percentage => RewardKind::PercentageOff { percent: reward_value },
        };
        info!(customer_id, merchant_id, "visit reward redeemed");
        Ok(RewardResult { reward, transaction: txn })
    }

    /// Redeem an arbitrary number of points at the program's fixed dollar
    /// value per point.
    pub async fn redeem_points(
        &self,
        customer_id: i64,
        merchant_id: i64,
        points: i64,
        reason: Option<String>,
    ) -> Result<RewardResult, EngineError> {
        if points <= 0 {
            return Err(EngineError::Validation("points to redeem must be positive".into()));
        }

        let mut tx = self.db.pool.begin().await?;
        let (program, rules) = active_program(&mut *tx, merchant_id).await?;

        let ProgramRules::Points { point_value_cents, .. } = rules else {
            return Err(EngineError::Validation(
                "points can only be redeemed under a POINTS program".into(),
            ));
        };

        ensure_customer(&mut tx, customer_id, merchant_id).await?;
        let account = lock_account(&mut tx, customer_id, program.id).await?;
        if points > account.balance {
            return Err(EngineError::InsufficientBalance {
                available: account.balance,
                requested: points,
            });
        }
        let balance_after = apply_delta(account.balance, -points)?;

        let txn = insert_transaction(
            &mut tx,
            account.id,
            TransactionType::Redeemed,
            -points,
            balance_after,
            None,
            reason,
        )
        .await?;
        set_balance(&mut tx, account.id, balance_after).await?;
        tx.commit().await?;

        info!(customer_id, merchant_id, points, "points redeemed");
        Ok(RewardResult {
            reward: RewardKind::DollarValue { value_cents: points * point_value_cents },
            transaction: txn,
        })
    }

    /// Manual signed correction. The balance may never go negative as a
    /// result; lifetime_earned tracks accrual only and is not touched here.
    pub async fn adjust(
        &self,
        customer_id: i64,
        merchant_id: i64,
        delta: i64,
        reason: String,
    ) -> Result<LoyaltyTransaction, EngineError> {
        if delta == 0 {
            return Err(EngineError::Validation("adjustment delta must be non-zero".into()));
        }

        let mut tx = self.db.pool.begin().await?;
        let (program, _rules) = active_program(&mut *tx, merchant_id).await?;

        ensure_customer(&mut tx, customer_id, merchant_id).await?;
        let account = lock_account(&mut tx, customer_id, program.id).await?;
        let balance_after = apply_delta(account.balance, delta)?;

        let txn = insert_transaction(
            &mut tx,
            account.id,
            TransactionType::Adjusted,
            delta,
            balance_after,
            None,
            Some(reason),
        )
        .await?;
        set_balance(&mut tx, account.id, balance_after).await?;
        tx.commit().await?;

        info!(customer_id, merchant_id, delta, "loyalty balance adjusted");
        Ok(txn)
    }
}

/// The merchant's single active program, validated into usable rules.
async fn active_program<'e, E>(
    executor: E,
    merchant_id: i64,
) -> Result<(LoyaltyProgram, ProgramRules), EngineError>
where
    E: PgExecutor<'e>,
{
    let program = sqlx::query_as::<_, LoyaltyProgram>(
        "SELECT * FROM loyalty_programs WHERE merchant_id = $1 AND is_active",
    )
    .bind(merchant_id)
    .fetch_optional(executor)
    .await?
    .ok_or(EngineError::ProgramNotConfigured)?;

    let rules = program.rules()?;
    Ok((program, rules))
}

/// Lazily create the account on first activity, then lock its row for the
/// remainder of the transaction.
async fn lock_account(
    tx: &mut Transaction<'_, Postgres>,
    customer_id: i64,
    program_id: i64,
) -> Result<LoyaltyAccount, EngineError> {
    sqlx::query(
        "INSERT INTO loyalty_accounts (customer_id, program_id)
         VALUES ($1, $2)
         ON CONFLICT (customer_id, program_id) DO NOTHING",
    )
    .bind(customer_id)
    .bind(program_id)
    .execute(&mut **tx)
    .await?;

    let account = sqlx::query_as::<_, LoyaltyAccount>(
        "SELECT * FROM loyalty_accounts WHERE customer_id = $1 AND program_id = $2 FOR UPDATE",
    )
    .bind(customer_id)
    .bind(program_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(account)
}

async fn insert_transaction(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i64,
    txn_type: TransactionType,
    amount: i64,
    balance_after: i64,
    reference_booking_id: Option<i64>,
    reason: Option<String>,
) -> Result<LoyaltyTransaction, EngineError> {
    let txn = sqlx::query_as::<_, LoyaltyTransaction>(
        r#"
        INSERT INTO loyalty_transactions
            (account_id, txn_type, amount, balance_after, reference_booking_id, reason)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(account_id)
    .bind(txn_type.as_str())
    .bind(amount)
    .bind(balance_after)
    .bind(reference_booking_id)
    .bind(reason)
    .fetch_one(&mut **tx)
    .await?;
    Ok(txn)
}

async fn set_balance(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i64,
    balance: i64,
) -> Result<(), EngineError> {
    sqlx::query("UPDATE loyalty_accounts SET balance = $1 WHERE id = $2")
        .bind(balance)
        .bind(account_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn ensure_customer(
    tx: &mut Transaction<'_, Postgres>,
    customer_id: i64,
    merchant_id: i64,
) -> Result<(), EngineError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM customers WHERE id = $1 AND merchant_id = $2)",
    )
    .bind(customer_id)
    .bind(merchant_id)
    .fetch_one(&mut **tx)
    .await?;
    if exists {
        Ok(())
    } else {
        Err(EngineError::NotFound("customer"))
    }
}
