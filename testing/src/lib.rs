//! # Vaccine Scheduling Testing
//!
//! Testing utilities for the vaccination scheduler.
//!
//! This crate provides:
//! - [`FixedClock`]: deterministic time
//! - [`InMemorySchedulingStore`]: transactional store with fault injection
//! - [`fixtures`]: ready-made schedulers, operators and requests
//!
//! ## Example
//!
//! ```ignore
//! use vaccine_scheduling_testing::{fixtures, InMemorySchedulingStore};
//!
//! #[tokio::test]
//! async fn books_first_dose() {
//!     let store = InMemorySchedulingStore::new();
//!     let lot = store.add_lot(VaccineTypeId::new(7), LaboratoryId::new(1), 5).await;
//!     let scheduler = fixtures::scheduler(&store);
//!
//!     scheduler
//!         .book(&fixtures::operator(), fixtures::booking(PatientId::new(1), VaccineTypeId::new(7)))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(store.lot(lot).await.unwrap().remaining_quantity, 4);
//! }
//! ```

use chrono::{DateTime, Utc};
use vaccine_scheduling_core::environment::Clock;

pub mod fixtures;
pub mod in_memory_store;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use vaccine_scheduling_testing::mocks::FixedClock;
    /// use vaccine_scheduling_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Route `tracing` output through the test harness.
///
/// Honours `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use in_memory_store::{FaultPoint, InMemorySchedulingStore};
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }
}
