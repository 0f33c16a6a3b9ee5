pub mod config;
pub mod controllers;
pub mod database;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use services::booking::BookingService;
use services::loyalty::LoyaltyService;

// Shared state for the whole application.
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub config: config::Config,
    pub bookings: BookingService,
    pub loyalty: LoyaltyService,
}

impl AppState {
    pub async fn new(config: config::Config) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let db = database::Database::new(&config.database.url, config.database.pool_size).await?;

        db.run_migrations().await?;

        let loyalty = LoyaltyService::new(db.clone());
        let bookings = BookingService::new(db.clone(), config.booking.clone(), loyalty.clone());

        Ok(Arc::new(Self { db, config, bookings, loyalty }))
    }
}
