use serde::Serialize;
use sqlx::FromRow;

/// An entry in the merchant's service catalogue. The catalogue is maintained
/// by out-of-scope admin tooling; the engine only reads duration (to derive
/// a booking's end time) and price (the accrual basis).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Service {
    pub id: i64,
    pub merchant_id: i64,
    pub name: String,
    pub duration_minutes: i32,
    pub price_cents: i64,
}

impl Service {
    /// Fetch the requested services, scoped to the merchant. Callers must
    /// check that every requested id came back.
    pub async fn fetch_for_merchant(
        pool: &sqlx::PgPool,
        merchant_id: i64,
        ids: &[i64],
    ) -> Result<Vec<Service>, sqlx::Error> {
        sqlx::query_as::<_, Service>(
            "SELECT id, merchant_id, name, duration_minutes, price_cents
             FROM services
             WHERE merchant_id = $1 AND id = ANY($2)",
        )
        .bind(merchant_id)
        .bind(ids)
        .fetch_all(pool)
        .await
    }
}
