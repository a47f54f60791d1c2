//! Transactional data-access interface for scheduling.
//!
//! A [`SchedulingStore`] hands out [`UnitOfWork`]s. Each unit of work is one
//! transaction: everything done through it becomes visible together on
//! [`UnitOfWork::commit`], or not at all on [`UnitOfWork::rollback`] (dropping an
//! uncommitted unit also rolls it back).
//!
//! # Implementations
//!
//! - `PostgresSchedulingStore` (in `vaccine-scheduling-postgres`): production
//! - `InMemorySchedulingStore` (in `vaccine-scheduling-testing`): tests, with fault injection
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the store can
//! be shared as `Arc<dyn SchedulingStore>` and units of work passed as
//! `&mut dyn UnitOfWork`.

use crate::error::StoreError;
use crate::types::{
    Appointment, AppointmentId, ApplicationId, DoseNumber, InventoryLot, LotHandle, LotId,
    NewApplication, NewAppointment, PatientId, VaccineApplication, VaccineTypeId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Entry point to the backing store.
pub trait SchedulingStore: Send + Sync {
    /// Open a new unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if no transaction can be started.
    fn begin(&self) -> StoreFuture<'_, Box<dyn UnitOfWork>>;
}

/// One transaction over lots, applications and appointments.
///
/// All quantity and status changes go through the conditional operations here
/// ([`reserve_lot`](Self::reserve_lot), [`cancel_application`](Self::cancel_application));
/// there is no general-purpose update for either.
pub trait UnitOfWork: Send {
    /// Serialise this unit of work against any other unit that locks the same patient.
    ///
    /// The lock is held until commit or rollback.
    fn lock_patient(&mut self, patient_id: PatientId) -> StoreFuture<'_, ()>;

    /// Atomically take one unit from the lowest-id lot of `vaccine_type_id` that has
    /// stock left.
    ///
    /// Two units of work can never both take the last unit of a lot. Returns `None`
    /// when no lot of that type has stock.
    ///
    /// An implementation may give up on a lot that stays contended while stock
    /// still exists. That surfaces as [`StoreError::Database`], so callers see
    /// a persistence failure rather than an empty inventory.
    fn reserve_lot(&mut self, vaccine_type_id: VaccineTypeId) -> StoreFuture<'_, Option<LotHandle>>;

    /// Load a lot by id.
    fn load_lot(&mut self, lot_id: LotId) -> StoreFuture<'_, Option<InventoryLot>>;

    /// Highest dose among the patient's non-cancelled applications, optionally
    /// restricted to one vaccine type.
    fn highest_dose(
        &mut self,
        patient_id: PatientId,
        vaccine_type_id: Option<VaccineTypeId>,
    ) -> StoreFuture<'_, Option<DoseNumber>>;

    /// Insert a new application in `Pending` status.
    fn insert_application(&mut self, application: NewApplication) -> StoreFuture<'_, VaccineApplication>;

    /// Load an application by id.
    fn load_application(&mut self, application_id: ApplicationId) -> StoreFuture<'_, Option<VaccineApplication>>;

    /// Move an application from `Pending` to `Cancelled`.
    ///
    /// Returns the updated record, or `None` when the application does not exist or
    /// is not `Pending` (nothing is written in that case).
    fn cancel_application(
        &mut self,
        application_id: ApplicationId,
        cancelled_at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<VaccineApplication>>;

    /// Insert a new appointment.
    fn insert_appointment(&mut self, appointment: NewAppointment) -> StoreFuture<'_, Appointment>;

    /// Load an appointment without locking it.
    fn load_appointment(&mut self, appointment_id: AppointmentId) -> StoreFuture<'_, Option<Appointment>>;

    /// Load an appointment and lock it for update until the unit of work ends.
    fn lock_appointment(&mut self, appointment_id: AppointmentId) -> StoreFuture<'_, Option<Appointment>>;

    /// Persist every field of an existing appointment.
    fn update_appointment(&mut self, appointment: Appointment) -> StoreFuture<'_, Appointment>;

    /// All appointments ordered by id.
    fn list_appointments(&mut self) -> StoreFuture<'_, Vec<Appointment>>;

    /// Make every change in this unit of work durable.
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;

    /// Discard every change in this unit of work.
    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()>;
}
