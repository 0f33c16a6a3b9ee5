use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;

/// Authenticated staff member making the request. Carries the merchant id so
/// every downstream query is tenant-scoped.
#[derive(Debug, Clone)]
pub struct AuthStaff {
    pub staff_id: i64,
    pub merchant_id: i64,
    pub email: String,
    pub is_admin: bool,
}

#[derive(sqlx::FromRow)]
struct StaffRow {
    id: i64,
    merchant_id: i64,
    email: String,
    password_hash: String,
    is_admin: bool,
}

// Basic Auth extractor against the staff table.
impl FromRequestParts<Arc<crate::AppState>> for AuthStaff {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let encoded = auth_header
            .strip_prefix("Basic ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

        let mut parts = credentials.splitn(2, ':');
        let email = parts.next().ok_or(StatusCode::UNAUTHORIZED)?;
        let password = parts.next().ok_or(StatusCode::UNAUTHORIZED)?;

        let row: Option<StaffRow> = sqlx::query_as(
            "SELECT id, merchant_id, email, password_hash, is_admin
             FROM staff
             WHERE email = $1 AND is_active",
        )
        .bind(email)
        .fetch_optional(&state.db.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let staff = row.ok_or(StatusCode::UNAUTHORIZED)?;

        let password_ok = bcrypt::verify(password, &staff.password_hash).unwrap_or(false);
        if !password_ok {
            return Err(StatusCode::UNAUTHORIZED);
        }

        Ok(AuthStaff {
            staff_id: staff.id,
            merchant_id: staff.merchant_id,
            email: staff.email,
            is_admin: staff.is_admin,
        })
    }
}

/// Extractor that additionally requires the admin flag. Routes carrying
/// administrative capabilities (conflict-check bypass, manual ledger
/// adjustments, program activation) demand this instead of [`AuthStaff`].
#[derive(Debug, Clone)]
pub struct AuthAdmin(pub AuthStaff);

impl FromRequestParts<Arc<crate::AppState>> for AuthAdmin {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let staff = AuthStaff::from_request_parts(parts, state).await?;
        if !staff.is_admin {
            return Err(StatusCode::FORBIDDEN);
        }
        Ok(AuthAdmin(staff))
    }
}
