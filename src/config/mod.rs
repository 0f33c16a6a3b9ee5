use serde::Deserialize;
use std::env;

// Top-level configuration container for the whole application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub booking: BookingPolicyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Merchant-independent booking policy knobs. Per-merchant policy (e.g. which
// creation status the online channel gets) arrives with each request.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingPolicyConfig {
    /// How many minutes before the appointment start a check-in is accepted.
    pub check_in_window_minutes: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "salon_system=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            booking: BookingPolicyConfig {
                check_in_window_minutes: env::var("CHECK_IN_WINDOW_MINUTES")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .expect("CHECK_IN_WINDOW_MINUTES must be a valid number"),
            },
        }
    }
}
