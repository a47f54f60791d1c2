//! Dose sequencer.
//!
//! The next dose for a patient is one past the highest dose among their
//! non-cancelled applications, or the first dose when they have none. [`DoseScope`]
//! decides whether that history is taken per vaccine type (default) or across all
//! vaccine types.
//!
//! The read-then-decide step is only correct while the caller holds the patient
//! lock for the unit of work (see [`UnitOfWork::lock_patient`]).

use crate::error::SchedulingError;
use crate::store::UnitOfWork;
use crate::types::{DoseNumber, PatientId, VaccineTypeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Which prior applications count toward the next dose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DoseScope {
    /// Only applications of the same vaccine type
    #[default]
    PerVaccineType,
    /// Every application the patient has, whatever the vaccine type
    AllVaccineTypes,
}

impl DoseScope {
    /// Configuration string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PerVaccineType => "per-vaccine-type",
            Self::AllVaccineTypes => "all-vaccine-types",
        }
    }
}

impl fmt::Display for DoseScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a dose scope string is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown dose scope `{0}` (expected per-vaccine-type or all-vaccine-types)")]
pub struct ParseDoseScopeError(String);

impl FromStr for DoseScope {
    type Err = ParseDoseScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-vaccine-type" => Ok(Self::PerVaccineType),
            "all-vaccine-types" => Ok(Self::AllVaccineTypes),
            other => Err(ParseDoseScopeError(other.to_string())),
        }
    }
}

/// Computes dose ordinals from a patient's application history.
#[derive(Clone, Copy, Debug, Default)]
pub struct DoseSequencer {
    scope: DoseScope,
}

impl DoseSequencer {
    /// Creates a sequencer using `scope`
    #[must_use]
    pub const fn new(scope: DoseScope) -> Self {
        Self { scope }
    }

    /// The history scope in use
    #[must_use]
    pub const fn scope(&self) -> DoseScope {
        self.scope
    }

    /// Next dose for `patient_id` receiving `vaccine_type_id`.
    ///
    /// # Errors
    ///
    /// - [`SchedulingError::ValidationFailed`] if the sequence would overflow
    /// - [`SchedulingError::Persistence`] if the store fails
    pub async fn next_dose(
        &self,
        uow: &mut dyn UnitOfWork,
        patient_id: PatientId,
        vaccine_type_id: VaccineTypeId,
    ) -> Result<DoseNumber, SchedulingError> {
        let filter = match self.scope {
            DoseScope::PerVaccineType => Some(vaccine_type_id),
            DoseScope::AllVaccineTypes => None,
        };

        let highest = uow.highest_dose(patient_id, filter).await?;
        let next = DoseNumber::following(highest).ok_or_else(|| {
            SchedulingError::validation(format!("dose sequence exhausted for patient {patient_id}"))
        })?;

        debug!(
            patient = %patient_id,
            vaccine_type = %vaccine_type_id,
            scope = %self.scope,
            highest = ?highest.map(DoseNumber::get),
            next = next.get(),
            "Computed next dose"
        );
        Ok(next)
    }
}
