//! Ready-made schedulers, operators and requests.
//!
//! Every fixture works off [`test_clock`], so requests built here are always valid
//! against schedulers built here.

use crate::in_memory_store::InMemorySchedulingStore;
use crate::mocks::test_clock;
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use vaccine_scheduling_core::environment::Clock;
use vaccine_scheduling_core::{
    AgentId, AppointmentId, AppointmentScheduler, BookingRequest, DoseScope, GuardianId, Operator,
    PatientId, RescheduleRequest, SchedulerEnvironment, VaccineTypeId,
};

/// Registration number of the default operator
pub const OPERATOR_AGENT: i64 = 4821;

/// Guardian used by default requests
pub const GUARDIAN: i64 = 12;

/// Scheduler over `store` with the test clock and per-vaccine-type doses
#[must_use]
pub fn scheduler(store: &InMemorySchedulingStore) -> AppointmentScheduler {
    scheduler_with_scope(store, DoseScope::PerVaccineType)
}

/// Scheduler over `store` with the test clock and the given dose scope
#[must_use]
pub fn scheduler_with_scope(store: &InMemorySchedulingStore, scope: DoseScope) -> AppointmentScheduler {
    AppointmentScheduler::new(
        SchedulerEnvironment::new(Arc::new(test_clock()), Arc::new(store.clone())),
        scope,
    )
}

/// The default operator
#[must_use]
pub const fn operator() -> Operator {
    Operator::new(AgentId::new(OPERATOR_AGENT))
}

/// A time `days` after the test clock's now
#[must_use]
pub fn days_ahead(days: i64) -> DateTime<Utc> {
    test_clock().now() + Duration::days(days)
}

/// Booking for tomorrow with the default guardian
#[must_use]
pub fn booking(patient_id: PatientId, vaccine_type_id: VaccineTypeId) -> BookingRequest {
    BookingRequest {
        patient_id,
        vaccine_type_id,
        guardian_id: GuardianId::new(GUARDIAN),
        scheduled_for: days_ahead(1),
    }
}

/// Move an appointment to next week, keeping vaccine type and guardian
#[must_use]
pub fn reschedule(appointment_id: AppointmentId) -> RescheduleRequest {
    RescheduleRequest {
        appointment_id,
        vaccine_type_id: None,
        guardian_id: None,
        scheduled_for: days_ahead(7),
    }
}

/// Strategy for valid booking requests over small id ranges
pub fn booking_strategy() -> impl Strategy<Value = BookingRequest> {
    (1_i64..50, 1_i64..5, 1_i64..20, 0_i64..365).prop_map(
        |(patient, vaccine_type, guardian, days)| BookingRequest {
            patient_id: PatientId::new(patient),
            vaccine_type_id: VaccineTypeId::new(vaccine_type),
            guardian_id: GuardianId::new(guardian),
            scheduled_for: days_ahead(days),
        },
    )
}
