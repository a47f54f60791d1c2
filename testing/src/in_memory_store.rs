//! In-memory scheduling store.
//!
//! Units of work are serialised: [`InMemorySchedulingStore::begin`] waits for the
//! previous unit to commit or roll back, then works on a private copy of the
//! tables. Commit writes the copy back; rollback or drop discards it. That gives
//! the same all-or-nothing and no-oversell guarantees the Postgres store provides
//! with row locks.
//!
//! [`FaultPoint`]s make a chosen store operation fail with
//! [`StoreError::Database`] so tests can check that partial work is rolled back.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned fault set

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use vaccine_scheduling_core::{
    Appointment, AppointmentId, ApplicationId, ApplicationStatus, DateTime, DoseNumber,
    InventoryLot, LaboratoryId, LotHandle, LotId, NewApplication, NewAppointment, PatientId,
    SchedulingStore, StoreError, StoreFuture, UnitOfWork, Utc, VaccineApplication, VaccineTypeId,
};

/// Store operations that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Opening a unit of work
    Begin,
    /// Reserving a lot unit
    ReserveLot,
    /// Inserting an application
    InsertApplication,
    /// Cancelling an application
    CancelApplication,
    /// Inserting an appointment
    InsertAppointment,
    /// Updating an appointment
    UpdateAppointment,
    /// Committing
    Commit,
}

#[derive(Clone, Debug, Default)]
struct Tables {
    lots: BTreeMap<LotId, InventoryLot>,
    applications: BTreeMap<ApplicationId, VaccineApplication>,
    appointments: BTreeMap<AppointmentId, Appointment>,
    last_lot: i64,
    last_application: i64,
    last_appointment: i64,
}

type Faults = Arc<Mutex<HashSet<FaultPoint>>>;

fn check(faults: &Faults, point: FaultPoint) -> Result<(), StoreError> {
    if faults.lock().unwrap().contains(&point) {
        tracing::debug!(?point, "Injected fault triggered");
        return Err(StoreError::Database(format!("injected fault at {point:?}")));
    }
    Ok(())
}

/// In-memory [`SchedulingStore`] for fast, deterministic tests.
///
/// Clones share the same tables and fault set.
///
/// # Example
///
/// ```
/// use vaccine_scheduling_testing::{FaultPoint, InMemorySchedulingStore};
/// use vaccine_scheduling_core::{LaboratoryId, VaccineTypeId};
///
/// # async fn example() {
/// let store = InMemorySchedulingStore::new();
/// let lot = store.add_lot(VaccineTypeId::new(7), LaboratoryId::new(1), 5).await;
/// store.inject_fault(FaultPoint::Commit);
/// assert_eq!(store.lot(lot).await.unwrap().remaining_quantity, 5);
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySchedulingStore {
    tables: Arc<AsyncMutex<Tables>>,
    faults: Faults,
}

impl InMemorySchedulingStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stock a new lot and return its id. Ids are issued in ascending order.
    pub async fn add_lot(
        &self,
        vaccine_type_id: VaccineTypeId,
        laboratory_id: LaboratoryId,
        remaining_quantity: u32,
    ) -> LotId {
        let mut tables = self.tables.lock().await;
        tables.last_lot += 1;
        let id = LotId::new(tables.last_lot);
        tables.lots.insert(
            id,
            InventoryLot {
                id,
                vaccine_type_id,
                laboratory_id,
                remaining_quantity,
            },
        );
        id
    }

    /// Committed state of a lot
    pub async fn lot(&self, lot_id: LotId) -> Option<InventoryLot> {
        self.tables.lock().await.lots.get(&lot_id).cloned()
    }

    /// Every committed application, ordered by id
    pub async fn applications(&self) -> Vec<VaccineApplication> {
        self.tables.lock().await.applications.values().cloned().collect()
    }

    /// Every committed appointment, ordered by id
    pub async fn appointments(&self) -> Vec<Appointment> {
        self.tables.lock().await.appointments.values().cloned().collect()
    }

    /// Mark an application as administered. Returns `false` if it does not exist.
    pub async fn mark_completed(&self, application_id: ApplicationId) -> bool {
        let mut tables = self.tables.lock().await;
        match tables.applications.get_mut(&application_id) {
            Some(application) => {
                application.status = ApplicationStatus::Completed;
                true
            }
            None => false,
        }
    }

    /// Overwrite an application's `supersedes` link without any checks, as a
    /// hand-edited row would. Returns `false` if the application does not exist.
    pub async fn relink(&self, application_id: ApplicationId, supersedes: Option<ApplicationId>) -> bool {
        let mut tables = self.tables.lock().await;
        match tables.applications.get_mut(&application_id) {
            Some(application) => {
                application.supersedes = supersedes;
                true
            }
            None => false,
        }
    }

    /// Make every subsequent call at `point` fail until cleared
    pub fn inject_fault(&self, point: FaultPoint) {
        self.faults.lock().unwrap().insert(point);
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        self.faults.lock().unwrap().clear();
    }
}

impl SchedulingStore for InMemorySchedulingStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn UnitOfWork>> {
        let tables = Arc::clone(&self.tables);
        let faults = Arc::clone(&self.faults);
        Box::pin(async move {
            check(&faults, FaultPoint::Begin)?;
            let guard = tables.lock_owned().await;
            let working = guard.clone();
            let uow: Box<dyn UnitOfWork> = Box::new(InMemoryUnitOfWork {
                guard,
                working,
                faults,
            });
            Ok::<_, StoreError>(uow)
        })
    }
}

/// Unit of work over a private copy of the tables.
struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    faults: Faults,
}

impl InMemoryUnitOfWork {
    fn fail_at(&self, point: FaultPoint) -> Result<(), StoreError> {
        check(&self.faults, point)
    }

    fn reserve(&mut self, vaccine_type_id: VaccineTypeId) -> Result<Option<LotHandle>, StoreError> {
        self.fail_at(FaultPoint::ReserveLot)?;
        let lot = self
            .working
            .lots
            .values_mut()
            .find(|lot| lot.vaccine_type_id == vaccine_type_id && lot.remaining_quantity > 0);

        Ok(lot.map(|lot| {
            lot.remaining_quantity -= 1;
            LotHandle::reserved(lot.id, lot.vaccine_type_id, lot.remaining_quantity)
        }))
    }

    fn highest(
        &self,
        patient_id: PatientId,
        vaccine_type_id: Option<VaccineTypeId>,
    ) -> Option<DoseNumber> {
        self.working
            .applications
            .values()
            .filter(|application| application.patient_id == patient_id)
            .filter(|application| application.status != ApplicationStatus::Cancelled)
            .filter(|application| {
                vaccine_type_id.is_none_or(|wanted| application.vaccine_type_id == wanted)
            })
            .map(|application| application.dose)
            .max()
    }

    fn insert_app(&mut self, new: NewApplication) -> Result<VaccineApplication, StoreError> {
        self.fail_at(FaultPoint::InsertApplication)?;
        if !self.working.lots.contains_key(&new.lot_id) {
            return Err(StoreError::Database(format!(
                "application references missing lot {}",
                new.lot_id
            )));
        }
        if let Some(superseded) = new.supersedes {
            if !self.working.applications.contains_key(&superseded) {
                return Err(StoreError::Database(format!(
                    "application supersedes missing application {superseded}"
                )));
            }
        }

        self.working.last_application += 1;
        let application = VaccineApplication {
            id: ApplicationId::new(self.working.last_application),
            lot_id: new.lot_id,
            patient_id: new.patient_id,
            vaccine_type_id: new.vaccine_type_id,
            agent_id: new.agent_id,
            dose: new.dose,
            status: ApplicationStatus::Pending,
            supersedes: new.supersedes,
            created_at: new.created_at,
            cancelled_at: None,
        };
        self.working
            .applications
            .insert(application.id, application.clone());
        Ok(application)
    }

    fn cancel(
        &mut self,
        application_id: ApplicationId,
        cancelled_at: DateTime<Utc>,
    ) -> Result<Option<VaccineApplication>, StoreError> {
        self.fail_at(FaultPoint::CancelApplication)?;
        Ok(self
            .working
            .applications
            .get_mut(&application_id)
            .filter(|application| application.status == ApplicationStatus::Pending)
            .map(|application| {
                application.status = ApplicationStatus::Cancelled;
                application.cancelled_at = Some(cancelled_at);
                application.clone()
            }))
    }

    fn insert_appt(&mut self, new: NewAppointment) -> Result<Appointment, StoreError> {
        self.fail_at(FaultPoint::InsertAppointment)?;
        if !self.working.applications.contains_key(&new.application_id) {
            return Err(StoreError::Database(format!(
                "appointment references missing application {}",
                new.application_id
            )));
        }

        self.working.last_appointment += 1;
        let appointment = Appointment {
            id: AppointmentId::new(self.working.last_appointment),
            patient_id: new.patient_id,
            vaccine_type_id: new.vaccine_type_id,
            guardian_id: new.guardian_id,
            agent_id: new.agent_id,
            application_id: new.application_id,
            scheduled_for: new.scheduled_for,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        self.working
            .appointments
            .insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    fn update_appt(&mut self, appointment: Appointment) -> Result<Appointment, StoreError> {
        self.fail_at(FaultPoint::UpdateAppointment)?;
        if !self.working.applications.contains_key(&appointment.application_id) {
            return Err(StoreError::Database(format!(
                "appointment references missing application {}",
                appointment.application_id
            )));
        }
        let Some(stored) = self.working.appointments.get_mut(&appointment.id) else {
            return Err(StoreError::Database(format!(
                "appointment {} does not exist",
                appointment.id
            )));
        };
        *stored = appointment.clone();
        Ok(appointment)
    }
}

impl UnitOfWork for InMemoryUnitOfWork {
    fn lock_patient(&mut self, _patient_id: PatientId) -> StoreFuture<'_, ()> {
        // Units of work are already exclusive.
        Box::pin(async { Ok(()) })
    }

    fn reserve_lot(&mut self, vaccine_type_id: VaccineTypeId) -> StoreFuture<'_, Option<LotHandle>> {
        let result = self.reserve(vaccine_type_id);
        Box::pin(async move { result })
    }

    fn load_lot(&mut self, lot_id: LotId) -> StoreFuture<'_, Option<InventoryLot>> {
        let lot = self.working.lots.get(&lot_id).cloned();
        Box::pin(async move { Ok(lot) })
    }

    fn highest_dose(
        &mut self,
        patient_id: PatientId,
        vaccine_type_id: Option<VaccineTypeId>,
    ) -> StoreFuture<'_, Option<DoseNumber>> {
        let highest = self.highest(patient_id, vaccine_type_id);
        Box::pin(async move { Ok(highest) })
    }

    fn insert_application(&mut self, application: NewApplication) -> StoreFuture<'_, VaccineApplication> {
        let result = self.insert_app(application);
        Box::pin(async move { result })
    }

    fn load_application(&mut self, application_id: ApplicationId) -> StoreFuture<'_, Option<VaccineApplication>> {
        let application = self.working.applications.get(&application_id).cloned();
        Box::pin(async move { Ok(application) })
    }

    fn cancel_application(
        &mut self,
        application_id: ApplicationId,
        cancelled_at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<VaccineApplication>> {
        let result = self.cancel(application_id, cancelled_at);
        Box::pin(async move { result })
    }

    fn insert_appointment(&mut self, appointment: NewAppointment) -> StoreFuture<'_, Appointment> {
        let result = self.insert_appt(appointment);
        Box::pin(async move { result })
    }

    fn load_appointment(&mut self, appointment_id: AppointmentId) -> StoreFuture<'_, Option<Appointment>> {
        let appointment = self.working.appointments.get(&appointment_id).cloned();
        Box::pin(async move { Ok(appointment) })
    }

    fn lock_appointment(&mut self, appointment_id: AppointmentId) -> StoreFuture<'_, Option<Appointment>> {
        self.load_appointment(appointment_id)
    }

    fn update_appointment(&mut self, appointment: Appointment) -> StoreFuture<'_, Appointment> {
        let result = self.update_appt(appointment);
        Box::pin(async move { result })
    }

    fn list_appointments(&mut self) -> StoreFuture<'_, Vec<Appointment>> {
        let appointments = self.working.appointments.values().cloned().collect();
        Box::pin(async move { Ok(appointments) })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        let Self {
            mut guard,
            working,
            faults,
        } = *self;
        let result = check(&faults, FaultPoint::Commit).map(|()| *guard = working);
        Box::pin(async move { result })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        drop(self);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_takes_lowest_lot_with_stock() {
        let store = InMemorySchedulingStore::new();
        let vaccine = VaccineTypeId::new(7);
        let empty = store.add_lot(vaccine, LaboratoryId::new(1), 0).await;
        let stocked = store.add_lot(vaccine, LaboratoryId::new(1), 2).await;
        store.add_lot(vaccine, LaboratoryId::new(2), 9).await;

        let mut uow = store.begin().await.unwrap();
        let handle = uow.reserve_lot(vaccine).await.unwrap().unwrap();
        assert_eq!(handle.lot_id(), stocked);
        assert_eq!(handle.remaining(), 1);
        uow.commit().await.unwrap();

        assert_eq!(store.lot(empty).await.unwrap().remaining_quantity, 0);
        assert_eq!(store.lot(stocked).await.unwrap().remaining_quantity, 1);
    }

    #[tokio::test]
    async fn dropped_unit_of_work_discards_changes() {
        let store = InMemorySchedulingStore::new();
        let vaccine = VaccineTypeId::new(7);
        let lot = store.add_lot(vaccine, LaboratoryId::new(1), 1).await;

        {
            let mut uow = store.begin().await.unwrap();
            assert!(uow.reserve_lot(vaccine).await.unwrap().is_some());
        }

        assert_eq!(store.lot(lot).await.unwrap().remaining_quantity, 1);
    }

    #[tokio::test]
    async fn commit_fault_discards_changes() {
        let store = InMemorySchedulingStore::new();
        let vaccine = VaccineTypeId::new(7);
        let lot = store.add_lot(vaccine, LaboratoryId::new(1), 1).await;
        store.inject_fault(FaultPoint::Commit);

        let mut uow = store.begin().await.unwrap();
        uow.reserve_lot(vaccine).await.unwrap();
        assert!(uow.commit().await.is_err());

        assert_eq!(store.lot(lot).await.unwrap().remaining_quantity, 1);
    }

    #[tokio::test]
    async fn cancel_only_moves_pending_applications() {
        let store = InMemorySchedulingStore::new();
        let vaccine = VaccineTypeId::new(7);
        let lot = store.add_lot(vaccine, LaboratoryId::new(1), 1).await;
        let now = Utc::now();

        let mut uow = store.begin().await.unwrap();
        let application = uow
            .insert_application(NewApplication {
                lot_id: lot,
                patient_id: PatientId::new(1),
                vaccine_type_id: vaccine,
                agent_id: None,
                dose: DoseNumber::FIRST,
                supersedes: None,
                created_at: now,
            })
            .await
            .unwrap();

        let cancelled = uow.cancel_application(application.id, now).await.unwrap();
        assert_eq!(cancelled.unwrap().status, ApplicationStatus::Cancelled);
        assert!(uow.cancel_application(application.id, now).await.unwrap().is_none());
    }
}
