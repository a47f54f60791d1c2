//! Domain types for vaccination scheduling.
//!
//! Identifiers, the three persisted records (inventory lots, vaccine applications,
//! appointments), the insert shapes the store accepts, and the requests accepted by
//! the scheduler.

use crate::error::{SchedulingError, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            #[doc = concat!("Creates a `", stringify!($name), "` from its database key")]
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the database key
            #[must_use]
            pub const fn get(&self) -> i64 {
                self.0
            }

            /// Keys are issued starting at 1; zero and negatives never reference a record
            #[must_use]
            pub const fn is_valid(&self) -> bool {
                self.0 > 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Unique identifier for an appointment
    AppointmentId
);
entity_id!(
    /// Unique identifier for a vaccine application
    ApplicationId
);
entity_id!(
    /// Unique identifier for an inventory lot
    LotId
);
entity_id!(
    /// Reference to a registered patient
    PatientId
);
entity_id!(
    /// Reference to a catalogued vaccine type
    VaccineTypeId
);
entity_id!(
    /// Reference to the patient's guardian
    GuardianId
);
entity_id!(
    /// Reference to an operator agent (registration number)
    AgentId
);
entity_id!(
    /// Reference to the laboratory that produced a lot
    LaboratoryId
);

// ============================================================================
// Dose ordinal
// ============================================================================

/// Returned when a dose ordinal of zero is supplied.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("dose number must be a positive integer")]
pub struct InvalidDoseNumber;

/// 1-based position of a vaccine unit within a patient's dosing history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct DoseNumber(NonZeroU32);

impl DoseNumber {
    /// The first dose.
    pub const FIRST: Self = Self(NonZeroU32::MIN);

    /// Creates a dose number, or `None` for zero.
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        match NonZeroU32::new(value) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Returns the ordinal.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// The dose that follows `highest`, or [`DoseNumber::FIRST`] when there is no history.
    ///
    /// Returns `None` only if the sequence would overflow `u32`.
    #[must_use]
    pub const fn following(highest: Option<Self>) -> Option<Self> {
        match highest {
            None => Some(Self::FIRST),
            Some(previous) => match previous.0.checked_add(1) {
                Some(next) => Some(Self(next)),
                None => None,
            },
        }
    }
}

impl TryFrom<u32> for DoseNumber {
    type Error = InvalidDoseNumber;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidDoseNumber)
    }
}

impl From<DoseNumber> for u32 {
    fn from(dose: DoseNumber) -> Self {
        dose.get()
    }
}

impl fmt::Display for DoseNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Inventory
// ============================================================================

/// A batch of one vaccine type with a countable remaining quantity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLot {
    /// Lot identifier
    pub id: LotId,
    /// Vaccine type contained in the lot
    pub vaccine_type_id: VaccineTypeId,
    /// Producing laboratory
    pub laboratory_id: LaboratoryId,
    /// Units left; never negative
    pub remaining_quantity: u32,
}

/// Proof that one unit was taken from a lot inside the current unit of work.
///
/// Only a store's `reserve_lot` hands these out: the decrement has already been
/// applied when the handle exists, and it is undone if the unit of work rolls back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LotHandle {
    lot_id: LotId,
    vaccine_type_id: VaccineTypeId,
    remaining: u32,
}

impl LotHandle {
    /// Records a completed reservation. `remaining` is the quantity after the decrement.
    #[must_use]
    pub const fn reserved(lot_id: LotId, vaccine_type_id: VaccineTypeId, remaining: u32) -> Self {
        Self {
            lot_id,
            vaccine_type_id,
            remaining,
        }
    }

    /// The lot the unit was drawn from
    #[must_use]
    pub const fn lot_id(&self) -> LotId {
        self.lot_id
    }

    /// The vaccine type of the lot
    #[must_use]
    pub const fn vaccine_type_id(&self) -> VaccineTypeId {
        self.vaccine_type_id
    }

    /// Units left in the lot after this reservation
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }
}

// ============================================================================
// Vaccine applications
// ============================================================================

/// Lifecycle status of a vaccine application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    /// Booked, not yet administered
    Pending,
    /// Superseded or withdrawn; terminal
    Cancelled,
    /// Administered; terminal
    Completed,
}

impl ApplicationStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Parse status from its database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            _ => Err(StoreError::Corrupt(format!(
                "Invalid application status: {s}"
            ))),
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One vaccine unit drawn from a lot and assigned to a patient.
///
/// `lot_id` and `dose` never change after creation. A correction is a cancellation
/// followed by a new application that `supersedes` the old one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaccineApplication {
    /// Application identifier
    pub id: ApplicationId,
    /// Lot the unit was drawn from
    pub lot_id: LotId,
    /// Patient receiving the dose
    pub patient_id: PatientId,
    /// Vaccine type of the lot at creation time
    pub vaccine_type_id: VaccineTypeId,
    /// Administering agent; unset until the dose is given
    pub agent_id: Option<AgentId>,
    /// Dose ordinal
    pub dose: DoseNumber,
    /// Current status
    pub status: ApplicationStatus,
    /// Application this one replaced on reschedule
    pub supersedes: Option<ApplicationId>,
    /// When the application was created
    pub created_at: DateTime<Utc>,
    /// When the application was cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl VaccineApplication {
    /// Whether the application still holds its appointment's slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status != ApplicationStatus::Cancelled
    }
}

/// Insert shape for a vaccine application. The store always writes it as `Pending`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewApplication {
    /// Lot the unit was drawn from
    pub lot_id: LotId,
    /// Patient receiving the dose
    pub patient_id: PatientId,
    /// Vaccine type of the lot
    pub vaccine_type_id: VaccineTypeId,
    /// Administering agent, if already known
    pub agent_id: Option<AgentId>,
    /// Dose ordinal
    pub dose: DoseNumber,
    /// Application being replaced
    pub supersedes: Option<ApplicationId>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Appointments
// ============================================================================

/// A scheduled vaccination event pointing at exactly one current application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Appointment identifier
    pub id: AppointmentId,
    /// Patient being vaccinated
    pub patient_id: PatientId,
    /// Requested vaccine type
    pub vaccine_type_id: VaccineTypeId,
    /// Guardian accompanying the patient
    pub guardian_id: GuardianId,
    /// Operator who last booked or rescheduled the appointment
    pub agent_id: Option<AgentId>,
    /// Current, non-cancelled application
    pub application_id: ApplicationId,
    /// When the vaccination takes place
    pub scheduled_for: DateTime<Utc>,
    /// When the appointment was booked
    pub created_at: DateTime<Utc>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

/// Insert shape for an appointment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAppointment {
    /// Patient being vaccinated
    pub patient_id: PatientId,
    /// Requested vaccine type
    pub vaccine_type_id: VaccineTypeId,
    /// Guardian accompanying the patient
    pub guardian_id: GuardianId,
    /// Booking operator
    pub agent_id: Option<AgentId>,
    /// Application created for this booking
    pub application_id: ApplicationId,
    /// When the vaccination takes place
    pub scheduled_for: DateTime<Utc>,
    /// Booking timestamp
    pub created_at: DateTime<Utc>,
}

/// An appointment with its current application and the lot it draws from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentDetails {
    /// The appointment
    pub appointment: Appointment,
    /// Its current application
    pub application: VaccineApplication,
    /// The lot backing that application
    pub lot: InventoryLot,
}

// ============================================================================
// Requests
// ============================================================================

/// Input for booking a new appointment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    /// Patient to vaccinate
    pub patient_id: PatientId,
    /// Vaccine type requested
    pub vaccine_type_id: VaccineTypeId,
    /// Accompanying guardian
    pub guardian_id: GuardianId,
    /// When the vaccination should take place
    pub scheduled_for: DateTime<Utc>,
}

impl BookingRequest {
    /// Checks required references and the requested time.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::ValidationFailed`] naming the first offending field.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), SchedulingError> {
        if !self.patient_id.is_valid() {
            return Err(SchedulingError::validation(format!(
                "patient_id must be positive, got {}",
                self.patient_id
            )));
        }
        if !self.vaccine_type_id.is_valid() {
            return Err(SchedulingError::validation(format!(
                "vaccine_type_id must be positive, got {}",
                self.vaccine_type_id
            )));
        }
        if !self.guardian_id.is_valid() {
            return Err(SchedulingError::validation(format!(
                "guardian_id must be positive, got {}",
                self.guardian_id
            )));
        }
        validate_schedule(self.scheduled_for, now)
    }
}

/// Input for rescheduling an existing appointment.
///
/// Fields left as `None` keep the appointment's current value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleRequest {
    /// Appointment to reschedule
    pub appointment_id: AppointmentId,
    /// New vaccine type, if it changes
    pub vaccine_type_id: Option<VaccineTypeId>,
    /// New guardian, if it changes
    pub guardian_id: Option<GuardianId>,
    /// New time for the vaccination
    pub scheduled_for: DateTime<Utc>,
}

impl RescheduleRequest {
    /// Checks the target and any replacement references.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::ValidationFailed`] naming the first offending field.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), SchedulingError> {
        if !self.appointment_id.is_valid() {
            return Err(SchedulingError::validation(format!(
                "appointment_id must be positive, got {}",
                self.appointment_id
            )));
        }
        if let Some(vaccine_type_id) = self.vaccine_type_id.filter(|id| !id.is_valid()) {
            return Err(SchedulingError::validation(format!(
                "vaccine_type_id must be positive, got {vaccine_type_id}"
            )));
        }
        if let Some(guardian_id) = self.guardian_id.filter(|id| !id.is_valid()) {
            return Err(SchedulingError::validation(format!(
                "guardian_id must be positive, got {guardian_id}"
            )));
        }
        validate_schedule(self.scheduled_for, now)
    }
}

fn validate_schedule(scheduled_for: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), SchedulingError> {
    if scheduled_for < now {
        return Err(SchedulingError::validation(format!(
            "scheduled_for {scheduled_for} is in the past"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn booking() -> BookingRequest {
        BookingRequest {
            patient_id: PatientId::new(10),
            vaccine_type_id: VaccineTypeId::new(2),
            guardian_id: GuardianId::new(4),
            scheduled_for: now() + Duration::days(3),
        }
    }

    #[test]
    fn first_dose_without_history() {
        assert_eq!(DoseNumber::following(None), Some(DoseNumber::FIRST));
        assert_eq!(DoseNumber::FIRST.get(), 1);
    }

    #[test]
    fn zero_is_not_a_dose() {
        assert_eq!(DoseNumber::new(0), None);
        assert_eq!(DoseNumber::try_from(0), Err(InvalidDoseNumber));
        assert!(serde_json::from_str::<DoseNumber>("0").is_err());
        assert_eq!(serde_json::from_str::<DoseNumber>("3").unwrap().get(), 3);
    }

    #[test]
    fn dose_sequence_stops_at_overflow() {
        let last = DoseNumber::new(u32::MAX).unwrap();
        assert_eq!(DoseNumber::following(Some(last)), None);
    }

    proptest! {
        #[test]
        fn following_is_one_past_highest(highest in 1u32..u32::MAX) {
            let next = DoseNumber::following(DoseNumber::new(highest)).unwrap();
            prop_assert_eq!(next.get(), highest + 1);
        }
    }

    #[test]
    fn status_round_trips_through_database_strings() {
        for status in [
            ApplicationStatus::Pending,
            ApplicationStatus::Cancelled,
            ApplicationStatus::Completed,
        ] {
            assert_eq!(ApplicationStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(matches!(
            ApplicationStatus::parse("cancelada"),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn valid_booking_passes() {
        assert!(booking().validate(now()).is_ok());
    }

    #[test]
    fn booking_rejects_missing_references() {
        let mut request = booking();
        request.guardian_id = GuardianId::new(0);

        let error = request.validate(now()).unwrap_err();
        assert!(matches!(error, SchedulingError::ValidationFailed(ref m) if m.contains("guardian_id")));
    }

    #[test]
    fn booking_rejects_past_time() {
        let mut request = booking();
        request.scheduled_for = now() - Duration::minutes(1);

        assert!(matches!(
            request.validate(now()),
            Err(SchedulingError::ValidationFailed(_))
        ));
    }

    #[test]
    fn reschedule_checks_only_supplied_overrides() {
        let request = RescheduleRequest {
            appointment_id: AppointmentId::new(1),
            vaccine_type_id: None,
            guardian_id: None,
            scheduled_for: now(),
        };
        assert!(request.validate(now()).is_ok());

        let request = RescheduleRequest {
            vaccine_type_id: Some(VaccineTypeId::new(-3)),
            ..request
        };
        assert!(matches!(
            request.validate(now()),
            Err(SchedulingError::ValidationFailed(ref m)) if m.contains("vaccine_type_id")
        ));
    }

    #[test]
    fn cancelled_applications_are_inactive() {
        let mut application = VaccineApplication {
            id: ApplicationId::new(1),
            lot_id: LotId::new(1),
            patient_id: PatientId::new(1),
            vaccine_type_id: VaccineTypeId::new(1),
            agent_id: None,
            dose: DoseNumber::FIRST,
            status: ApplicationStatus::Pending,
            supersedes: None,
            created_at: now(),
            cancelled_at: None,
        };
        assert!(application.is_active());

        application.status = ApplicationStatus::Cancelled;
        assert!(!application.is_active());
    }
}
