//! Application ledger.
//!
//! The only place vaccine applications are created or change status. An
//! application is bound to its lot and dose at creation and never rebound;
//! cancelling does not restock the lot and does not free the dose ordinal for
//! another application.

use crate::error::{SchedulingError, StoreError};
use crate::store::UnitOfWork;
use crate::types::{
    AgentId, ApplicationId, ApplicationStatus, DoseNumber, LotHandle, NewApplication, PatientId,
    VaccineApplication,
};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Who an application is for and what it replaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApplicationRequest {
    /// Patient receiving the dose
    pub patient_id: PatientId,
    /// Dose ordinal from the sequencer
    pub dose: DoseNumber,
    /// Administering agent, if already known
    pub agent_id: Option<AgentId>,
    /// Application being superseded, on reschedule
    pub supersedes: Option<ApplicationId>,
}

/// Creates and cancels vaccine applications.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApplicationLedger;

impl ApplicationLedger {
    /// Creates a new `ApplicationLedger`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Record a `Pending` application drawing from the reserved `lot`.
    ///
    /// If the insert fails the caller's unit of work is rolled back, which also
    /// undoes the lot reservation.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::Persistence`] if the store write fails.
    pub async fn create(
        &self,
        uow: &mut dyn UnitOfWork,
        lot: &LotHandle,
        request: ApplicationRequest,
        now: DateTime<Utc>,
    ) -> Result<VaccineApplication, SchedulingError> {
        let application = uow
            .insert_application(NewApplication {
                lot_id: lot.lot_id(),
                patient_id: request.patient_id,
                vaccine_type_id: lot.vaccine_type_id(),
                agent_id: request.agent_id,
                dose: request.dose,
                supersedes: request.supersedes,
                created_at: now,
            })
            .await?;

        debug!(
            application = %application.id,
            lot = %application.lot_id,
            dose = application.dose.get(),
            supersedes = ?application.supersedes.map(|id| id.get()),
            "Created vaccine application"
        );
        Ok(application)
    }

    /// Cancel an application. Cancelling one that is already cancelled is a no-op
    /// that returns it unchanged.
    ///
    /// # Errors
    ///
    /// - [`SchedulingError::ApplicationNotFound`] if it does not exist
    /// - [`SchedulingError::ValidationFailed`] if it was already administered
    /// - [`SchedulingError::Persistence`] if the store fails
    pub async fn cancel(
        &self,
        uow: &mut dyn UnitOfWork,
        application_id: ApplicationId,
        now: DateTime<Utc>,
    ) -> Result<VaccineApplication, SchedulingError> {
        if let Some(cancelled) = uow.cancel_application(application_id, now).await? {
            debug!(application = %application_id, "Cancelled vaccine application");
            return Ok(cancelled);
        }

        match uow.load_application(application_id).await? {
            None => Err(SchedulingError::ApplicationNotFound(application_id)),
            Some(application) if application.status == ApplicationStatus::Cancelled => {
                debug!(application = %application_id, "Application already cancelled");
                Ok(application)
            }
            Some(application) => Err(SchedulingError::validation(format!(
                "vaccine application {application_id} is {} and cannot be cancelled",
                application.status
            ))),
        }
    }

    /// Every application in the supersession chain ending at `current`, newest first.
    ///
    /// # Errors
    ///
    /// - [`SchedulingError::ApplicationNotFound`] if a link in the chain is missing
    /// - [`SchedulingError::Persistence`] if the store fails
    pub async fn history(
        &self,
        uow: &mut dyn UnitOfWork,
        current: ApplicationId,
    ) -> Result<Vec<VaccineApplication>, SchedulingError> {
        let mut chain: Vec<VaccineApplication> = Vec::new();
        let mut next = Some(current);

        while let Some(application_id) = next {
            if chain.iter().any(|seen| seen.id == application_id) {
                return Err(SchedulingError::Persistence(StoreError::Corrupt(format!(
                    "supersession chain of application {current} loops at {application_id}"
                ))));
            }
            let application = uow
                .load_application(application_id)
                .await?
                .ok_or(SchedulingError::ApplicationNotFound(application_id))?;
            next = application.supersedes;
            chain.push(application);
        }

        Ok(chain)
    }
}
