//! Vaccination scheduling application.
//!
//! Wires configuration, the `PostgreSQL` store and the scheduler together:
//!
//! 1. Load [`Config`] from the environment
//! 2. Connect the pool and run migrations
//! 3. Optionally start the Prometheus exporter
//! 4. Build an [`AppointmentScheduler`] over the store
//!
//! # Example
//!
//! ```rust,ignore
//! let config = Config::from_env()?;
//! let app = SchedulingApp::new(config).await?;
//!
//! let operator = Operator::from_registration_claim(claims.get("registration"))?;
//! let appointment = app.scheduler.book(&operator, request).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod metrics;

pub use config::{Config, ConfigError};

use crate::metrics::{MetricsError, MetricsServer};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use vaccine_scheduling_core::{
    AppointmentScheduler, SchedulerEnvironment, StoreError, SystemClock,
};
use vaccine_scheduling_postgres::PostgresSchedulingStore;

/// Errors raised while starting the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration is present but unusable
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The database could not be reached
    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    /// Migrations or other store setup failed
    #[error("Store setup failed: {0}")]
    Store(#[from] StoreError),

    /// The metrics exporter could not be started
    #[error("Metrics setup failed: {0}")]
    Metrics(#[from] MetricsError),
}

/// Running application resources.
#[derive(Clone)]
pub struct SchedulingApp {
    /// Application configuration
    pub config: Arc<Config>,
    /// `PostgreSQL` store shared by every unit of work
    pub store: Arc<PostgresSchedulingStore>,
    /// Scheduler over the store
    pub scheduler: AppointmentScheduler,
    /// Prometheus exporter, when enabled
    pub metrics: Option<Arc<MetricsServer>>,
}

impl SchedulingApp {
    /// Initialize all resources from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The metrics host is invalid or the exporter cannot start
    /// - Database connection fails
    /// - Database migrations fail
    pub async fn new(config: Config) -> Result<Self, AppError> {
        let metrics = if config.server.metrics_enabled {
            let mut server = MetricsServer::new(config.server.metrics_addr()?);
            server.start()?;
            Some(Arc::new(server))
        } else {
            None
        };

        info!("Connecting to scheduling database...");
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .min_connections(config.postgres.min_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .idle_timeout(Duration::from_secs(config.postgres.idle_timeout))
            .connect(&config.postgres.url)
            .await?;

        let store = Arc::new(PostgresSchedulingStore::from_pool(pool));

        info!("Running scheduling migrations...");
        store.migrate().await?;
        info!("Scheduling migrations complete");

        let scheduler = AppointmentScheduler::new(
            SchedulerEnvironment::new(Arc::new(SystemClock), store.clone()),
            config.scheduling.dose_scope,
        );
        info!(dose_scope = %config.scheduling.dose_scope, "Scheduler ready");

        Ok(Self {
            config: Arc::new(config),
            store,
            scheduler,
            metrics,
        })
    }
}
