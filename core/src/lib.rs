//! # Vaccine Scheduling Core
//!
//! Appointment booking for a vaccination service: each booking draws one unit
//! from an inventory lot, records a vaccine application with the patient's next
//! dose number, and links the appointment to that application.
//!
//! ## Components
//!
//! - **Inventory lot store** ([`inventory`]): picks the lowest-id lot of a vaccine
//!   type with stock and decrements it atomically
//! - **Dose sequencer** ([`dose`]): next dose = highest non-cancelled dose + 1
//! - **Application ledger** ([`ledger`]): creates and cancels applications
//! - **Appointment scheduler** ([`scheduler`]): runs each booking or reschedule as
//!   one all-or-nothing unit of work
//!
//! Persistence sits behind [`store::SchedulingStore`] and [`store::UnitOfWork`];
//! the Postgres crate and the in-memory testing store both implement them.
//!
//! ## Example
//!
//! ```ignore
//! use vaccine_scheduling_core::*;
//!
//! let scheduler = AppointmentScheduler::new(
//!     SchedulerEnvironment::new(Arc::new(SystemClock), store),
//!     DoseScope::PerVaccineType,
//! );
//!
//! let operator = Operator::from_registration_claim(Some("4711"))?;
//! let appointment = scheduler
//!     .book(&operator, BookingRequest {
//!         patient_id: PatientId::new(1),
//!         vaccine_type_id: VaccineTypeId::new(7),
//!         guardian_id: GuardianId::new(3),
//!         scheduled_for: tomorrow,
//!     })
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dose;
pub mod environment;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod metrics;
pub mod scheduler;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub use dose::{DoseScope, DoseSequencer, ParseDoseScopeError};
pub use environment::{Clock, Operator, SystemClock};
pub use error::{SchedulingError, StoreError};
pub use inventory::InventoryLotStore;
pub use ledger::{ApplicationLedger, ApplicationRequest};
pub use scheduler::{AppointmentScheduler, SchedulerEnvironment};
pub use store::{SchedulingStore, StoreFuture, UnitOfWork};
pub use types::{
    AgentId, Appointment, AppointmentDetails, AppointmentId, ApplicationId, ApplicationStatus,
    BookingRequest, DoseNumber, GuardianId, InvalidDoseNumber, InventoryLot, LaboratoryId, LotHandle,
    LotId, NewApplication, NewAppointment, PatientId, RescheduleRequest, VaccineApplication,
    VaccineTypeId,
};
