//! Error types for scheduling operations.
//!
//! Two layers of failure exist:
//!
//! - [`StoreError`]: the data-access interface failed (connection lost, constraint
//!   violated, a row could not be decoded). Always infrastructure.
//! - [`SchedulingError`]: the taxonomy surfaced to callers of the scheduler. Business
//!   rule failures (`NoStockAvailable`, `ValidationFailed`, not-found) are kept apart
//!   from infrastructure failures (`Persistence`), which carry the [`StoreError`] as
//!   their source for diagnostics.
//!
//! Every failure aborts the operation that produced it and rolls back its unit of
//! work. Nothing is retried automatically.

use crate::types::{AppointmentId, ApplicationId, VaccineTypeId};
use thiserror::Error;

/// Errors raised by a [`SchedulingStore`](crate::store::SchedulingStore) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database connection, query or transaction failure.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored record violates a domain invariant and cannot be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Errors surfaced by the appointment scheduler.
#[derive(Error, Debug)]
pub enum SchedulingError {
    /// No lot of the requested vaccine type has remaining stock.
    #[error("No stock available for vaccine type {vaccine_type}")]
    NoStockAvailable {
        /// The vaccine type that was requested.
        vaccine_type: VaccineTypeId,
    },

    /// The request is malformed or breaks a precondition. Nothing was persisted.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The appointment to operate on does not exist.
    #[error("Appointment {0} not found")]
    AppointmentNotFound(AppointmentId),

    /// The vaccine application referenced by an appointment does not exist.
    #[error("Vaccine application {0} not found")]
    ApplicationNotFound(ApplicationId),

    /// The transactional store failed; the unit of work was rolled back in full.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl SchedulingError {
    /// Stable machine-readable code for this error.
    ///
    /// Both not-found variants share `NOT_FOUND` so request-handling layers can map
    /// them to a single response.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoStockAvailable { .. } => "NO_STOCK_AVAILABLE",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::AppointmentNotFound(_) | Self::ApplicationNotFound(_) => "NOT_FOUND",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }

    /// Whether this failure is a business-rule outcome rather than an infrastructure fault.
    #[must_use]
    pub const fn is_business_rule(&self) -> bool {
        !matches!(self, Self::Persistence(_))
    }

    /// Shorthand for a [`SchedulingError::ValidationFailed`].
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn no_stock_message_names_vaccine_type() {
        let error = SchedulingError::NoStockAvailable {
            vaccine_type: VaccineTypeId::new(7),
        };

        assert_eq!(error.to_string(), "No stock available for vaccine type 7");
        assert_eq!(error.code(), "NO_STOCK_AVAILABLE");
        assert!(error.is_business_rule());
    }

    #[test]
    fn persistence_keeps_underlying_cause() {
        let error = SchedulingError::from(StoreError::Database("connection reset".to_string()));

        assert_eq!(error.code(), "PERSISTENCE_ERROR");
        assert!(!error.is_business_rule());
        assert!(error.to_string().contains("connection reset"));

        let source = error.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("Database error: connection reset"));
    }

    #[test]
    fn not_found_variants_share_a_code() {
        assert_eq!(
            SchedulingError::AppointmentNotFound(AppointmentId::new(1)).code(),
            SchedulingError::ApplicationNotFound(ApplicationId::new(1)).code()
        );
    }
}
