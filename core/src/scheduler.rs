//! Appointment scheduler.
//!
//! Orchestrates the lot store, dose sequencer and application ledger inside one
//! unit of work per request:
//!
//! ```text
//! book:        lock patient → reserve lot → next dose → create application → insert appointment
//! reschedule:  lock appointment → lock patient → reserve lot → cancel current application
//!              → next dose → create superseding application → repoint appointment
//! ```
//!
//! Either every step commits or the unit of work is rolled back, so a failed
//! request leaves no appointment, no application and no lot decrement behind.
//!
//! Rescheduling never restocks the lot of the cancelled application: each
//! reschedule consumes one more unit than a plain edit would. The dose is
//! recomputed after the current application is cancelled, so rescheduling the
//! patient's latest dose keeps its ordinal, while rescheduling an earlier one
//! moves it past the highest dose still standing.

use crate::dose::{DoseScope, DoseSequencer};
use crate::environment::{Clock, Operator};
use crate::error::SchedulingError;
use crate::inventory::InventoryLotStore;
use crate::ledger::{ApplicationLedger, ApplicationRequest};
use crate::metrics;
use crate::store::{SchedulingStore, UnitOfWork};
use crate::types::{
    Appointment, AppointmentDetails, AppointmentId, ApplicationStatus, BookingRequest,
    NewAppointment, RescheduleRequest, VaccineApplication,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

const BOOK: &str = "book";
const RESCHEDULE: &str = "reschedule";

/// Environment dependencies for the scheduler
#[derive(Clone)]
pub struct SchedulerEnvironment {
    /// Clock for timestamps and schedule validation
    pub clock: Arc<dyn Clock>,
    /// Transactional store
    pub store: Arc<dyn SchedulingStore>,
}

impl SchedulerEnvironment {
    /// Creates a new `SchedulerEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, store: Arc<dyn SchedulingStore>) -> Self {
        Self { clock, store }
    }
}

/// Books and reschedules vaccination appointments.
///
/// Cheap to clone; clones share the same store and clock.
#[derive(Clone)]
pub struct AppointmentScheduler {
    env: SchedulerEnvironment,
    lots: InventoryLotStore,
    doses: DoseSequencer,
    ledger: ApplicationLedger,
}

impl AppointmentScheduler {
    /// Creates a scheduler computing doses with `dose_scope`.
    #[must_use]
    pub fn new(env: SchedulerEnvironment, dose_scope: DoseScope) -> Self {
        Self {
            env,
            lots: InventoryLotStore::new(),
            doses: DoseSequencer::new(dose_scope),
            ledger: ApplicationLedger::new(),
        }
    }

    /// The dose scope this scheduler uses.
    #[must_use]
    pub const fn dose_scope(&self) -> DoseScope {
        self.doses.scope()
    }

    /// Book a new appointment, drawing one unit from inventory.
    ///
    /// The acting operator is recorded on the appointment. The new application's
    /// agent stays unset until the dose is administered.
    ///
    /// # Errors
    ///
    /// - [`SchedulingError::ValidationFailed`]: malformed request; nothing was persisted
    /// - [`SchedulingError::NoStockAvailable`]: no lot of the vaccine type has stock
    /// - [`SchedulingError::Persistence`]: the store failed; everything was rolled back
    #[tracing::instrument(
        skip(self, operator, request),
        fields(
            patient = %request.patient_id,
            vaccine_type = %request.vaccine_type_id,
            operator = %operator.agent_id(),
        )
    )]
    pub async fn book(
        &self,
        operator: &Operator,
        request: BookingRequest,
    ) -> Result<Appointment, SchedulingError> {
        let started = Instant::now();
        let result = self.try_book(operator, &request).await;
        record_outcome(BOOK, started, &result);
        result
    }

    /// Reschedule an appointment onto a freshly reserved unit.
    ///
    /// The current application is cancelled (not restocked) and replaced by a new
    /// `Pending` application that supersedes it; the appointment is repointed to
    /// the replacement.
    ///
    /// # Errors
    ///
    /// - [`SchedulingError::ValidationFailed`]: malformed request, or the current
    ///   application was already administered
    /// - [`SchedulingError::AppointmentNotFound`] / [`SchedulingError::ApplicationNotFound`]
    /// - [`SchedulingError::NoStockAvailable`]: no lot of the vaccine type has stock
    /// - [`SchedulingError::Persistence`]: the store failed; everything was rolled back
    #[tracing::instrument(
        skip(self, operator, request),
        fields(
            appointment = %request.appointment_id,
            operator = %operator.agent_id(),
        )
    )]
    pub async fn reschedule(
        &self,
        operator: &Operator,
        request: RescheduleRequest,
    ) -> Result<Appointment, SchedulingError> {
        let started = Instant::now();
        let result = self.try_reschedule(operator, &request).await;
        record_outcome(RESCHEDULE, started, &result);
        result
    }

    /// Load an appointment with its current application and lot.
    ///
    /// # Errors
    ///
    /// - [`SchedulingError::AppointmentNotFound`] if it does not exist
    /// - [`SchedulingError::Persistence`] if the store fails
    #[tracing::instrument(skip(self))]
    pub async fn find_appointment(
        &self,
        appointment_id: AppointmentId,
    ) -> Result<AppointmentDetails, SchedulingError> {
        let mut uow = self.env.store.begin().await?;
        let outcome = self.find_within(uow.as_mut(), appointment_id).await;
        discard(uow, outcome).await
    }

    /// Every appointment with its current application and lot, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::Persistence`] if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn list_appointments(&self) -> Result<Vec<AppointmentDetails>, SchedulingError> {
        let mut uow = self.env.store.begin().await?;
        let outcome = self.list_within(uow.as_mut()).await;
        discard(uow, outcome).await
    }

    /// All applications ever created for an appointment, newest first.
    ///
    /// The first entry is the current application; the rest were cancelled by
    /// successive reschedules.
    ///
    /// # Errors
    ///
    /// - [`SchedulingError::AppointmentNotFound`] if it does not exist
    /// - [`SchedulingError::Persistence`] if the store fails
    #[tracing::instrument(skip(self))]
    pub async fn application_history(
        &self,
        appointment_id: AppointmentId,
    ) -> Result<Vec<VaccineApplication>, SchedulingError> {
        let mut uow = self.env.store.begin().await?;
        let outcome = self.history_within(uow.as_mut(), appointment_id).await;
        discard(uow, outcome).await
    }

    async fn try_book(
        &self,
        operator: &Operator,
        request: &BookingRequest,
    ) -> Result<Appointment, SchedulingError> {
        let now = self.env.clock.now();
        request.validate(now)?;

        let mut uow = self.env.store.begin().await?;
        let outcome = self.book_within(uow.as_mut(), operator, request, now).await;
        finish(uow, outcome).await
    }

    async fn book_within(
        &self,
        uow: &mut dyn UnitOfWork,
        operator: &Operator,
        request: &BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, SchedulingError> {
        uow.lock_patient(request.patient_id).await?;

        let lot = self.lots.reserve_lot(uow, request.vaccine_type_id).await?;
        let dose = self
            .doses
            .next_dose(uow, request.patient_id, request.vaccine_type_id)
            .await?;
        let application = self
            .ledger
            .create(
                uow,
                &lot,
                ApplicationRequest {
                    patient_id: request.patient_id,
                    dose,
                    agent_id: None,
                    supersedes: None,
                },
                now,
            )
            .await?;

        let appointment = uow
            .insert_appointment(NewAppointment {
                patient_id: request.patient_id,
                vaccine_type_id: request.vaccine_type_id,
                guardian_id: request.guardian_id,
                agent_id: Some(operator.agent_id()),
                application_id: application.id,
                scheduled_for: request.scheduled_for,
                created_at: now,
            })
            .await?;

        info!(
            appointment = %appointment.id,
            application = %application.id,
            lot = %lot.lot_id(),
            dose = dose.get(),
            lot_remaining = lot.remaining(),
            "Appointment booked"
        );
        Ok(appointment)
    }

    async fn try_reschedule(
        &self,
        operator: &Operator,
        request: &RescheduleRequest,
    ) -> Result<Appointment, SchedulingError> {
        let now = self.env.clock.now();
        request.validate(now)?;

        let mut uow = self.env.store.begin().await?;
        let outcome = self
            .reschedule_within(uow.as_mut(), operator, request, now)
            .await;
        finish(uow, outcome).await
    }

    async fn reschedule_within(
        &self,
        uow: &mut dyn UnitOfWork,
        operator: &Operator,
        request: &RescheduleRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, SchedulingError> {
        let mut appointment = uow
            .lock_appointment(request.appointment_id)
            .await?
            .ok_or(SchedulingError::AppointmentNotFound(request.appointment_id))?;
        uow.lock_patient(appointment.patient_id).await?;

        let current = uow
            .load_application(appointment.application_id)
            .await?
            .ok_or(SchedulingError::ApplicationNotFound(appointment.application_id))?;
        if current.status == ApplicationStatus::Completed {
            return Err(SchedulingError::validation(format!(
                "appointment {} was already administered (application {})",
                appointment.id, current.id
            )));
        }

        let vaccine_type_id = request.vaccine_type_id.unwrap_or(appointment.vaccine_type_id);
        let lot = self.lots.reserve_lot(uow, vaccine_type_id).await?;
        let superseded = self.ledger.cancel(uow, current.id, now).await?;
        let dose = self
            .doses
            .next_dose(uow, appointment.patient_id, vaccine_type_id)
            .await?;
        let replacement = self
            .ledger
            .create(
                uow,
                &lot,
                ApplicationRequest {
                    patient_id: appointment.patient_id,
                    dose,
                    agent_id: None,
                    supersedes: Some(superseded.id),
                },
                now,
            )
            .await?;

        appointment.vaccine_type_id = vaccine_type_id;
        appointment.guardian_id = request.guardian_id.unwrap_or(appointment.guardian_id);
        appointment.scheduled_for = request.scheduled_for;
        appointment.agent_id = Some(operator.agent_id());
        appointment.application_id = replacement.id;
        appointment.updated_at = now;
        let appointment = uow.update_appointment(appointment).await?;

        info!(
            appointment = %appointment.id,
            cancelled_application = %superseded.id,
            cancelled_lot = %superseded.lot_id,
            application = %replacement.id,
            lot = %lot.lot_id(),
            dose = dose.get(),
            lot_remaining = lot.remaining(),
            units_consumed_by_reschedule = 1,
            "Appointment rescheduled"
        );
        Ok(appointment)
    }

    async fn find_within(
        &self,
        uow: &mut dyn UnitOfWork,
        appointment_id: AppointmentId,
    ) -> Result<AppointmentDetails, SchedulingError> {
        let appointment = uow
            .load_appointment(appointment_id)
            .await?
            .ok_or(SchedulingError::AppointmentNotFound(appointment_id))?;
        self.details(uow, appointment).await
    }

    async fn list_within(
        &self,
        uow: &mut dyn UnitOfWork,
    ) -> Result<Vec<AppointmentDetails>, SchedulingError> {
        let appointments = uow.list_appointments().await?;
        let mut details = Vec::with_capacity(appointments.len());
        for appointment in appointments {
            details.push(self.details(uow, appointment).await?);
        }
        Ok(details)
    }

    async fn history_within(
        &self,
        uow: &mut dyn UnitOfWork,
        appointment_id: AppointmentId,
    ) -> Result<Vec<VaccineApplication>, SchedulingError> {
        let appointment = uow
            .load_appointment(appointment_id)
            .await?
            .ok_or(SchedulingError::AppointmentNotFound(appointment_id))?;
        self.ledger.history(uow, appointment.application_id).await
    }

    async fn details(
        &self,
        uow: &mut dyn UnitOfWork,
        appointment: Appointment,
    ) -> Result<AppointmentDetails, SchedulingError> {
        let application = uow
            .load_application(appointment.application_id)
            .await?
            .ok_or(SchedulingError::ApplicationNotFound(appointment.application_id))?;
        let lot = self.lots.lot(uow, application.lot_id).await?;

        Ok(AppointmentDetails {
            appointment,
            application,
            lot,
        })
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    uow: Box<dyn UnitOfWork>,
    outcome: Result<T, SchedulingError>,
) -> Result<T, SchedulingError> {
    match outcome {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = uow.rollback().await {
                warn!(error = %rollback_error, "Rollback failed; transaction abandoned");
            }
            Err(error)
        }
    }
}

/// End a read-only unit of work.
async fn discard<T>(
    uow: Box<dyn UnitOfWork>,
    outcome: Result<T, SchedulingError>,
) -> Result<T, SchedulingError> {
    if let Err(rollback_error) = uow.rollback().await {
        warn!(error = %rollback_error, "Rollback of read-only transaction failed");
    }
    outcome
}

fn record_outcome<T>(operation: &'static str, started: Instant, result: &Result<T, SchedulingError>) {
    ::metrics::histogram!(metrics::OPERATION_DURATION, "operation" => operation)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(_) => {
            let name = if operation == BOOK {
                metrics::APPOINTMENTS_BOOKED
            } else {
                metrics::APPOINTMENTS_RESCHEDULED
            };
            ::metrics::counter!(name).increment(1);
            ::metrics::counter!(metrics::UNITS_RESERVED).increment(1);
        }
        Err(failure) => {
            ::metrics::counter!(
                metrics::FAILURES,
                "operation" => operation,
                "code" => failure.code()
            )
            .increment(1);

            if failure.is_business_rule() {
                warn!(operation, code = failure.code(), error = %failure, "Scheduling request rejected");
            } else {
                error!(operation, code = failure.code(), error = %failure, "Scheduling request failed");
            }
        }
    }
}
