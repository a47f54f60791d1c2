//! `PostgreSQL` scheduling store for vaccination appointments.
//!
//! This crate provides a PostgreSQL-based implementation of the `SchedulingStore`
//! and `UnitOfWork` traits from `vaccine-scheduling-core`. It uses sqlx and
//! supports:
//!
//! - One database transaction per unit of work
//! - Oversell-free lot reservation (conditional decrement on a locked row)
//! - Per-patient serialisation through transaction-scoped advisory locks
//! - Embedded migrations with stock, dose and status constraints
//!
//! # Example
//!
//! ```ignore
//! use vaccine_scheduling_postgres::PostgresSchedulingStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresSchedulingStore::connect("postgres://localhost/vaccination").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod store;

pub use store::PostgresSchedulingStore;

/// Lot reservations repeated because a concurrent booking emptied the chosen lot.
pub const LOT_RESERVATION_RETRIES: &str = "scheduling_lot_reservation_retries_total";

/// Register descriptions for the metrics this crate records.
pub fn describe_metrics() {
    metrics::describe_counter!(
        LOT_RESERVATION_RETRIES,
        "Total number of lot reservations retried after losing a race for the last unit"
    );
}
