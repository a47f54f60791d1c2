//! Row decoding for the scheduling tables.

use sqlx::postgres::PgRow;
use sqlx::{Decode, Postgres, Row, Type};
use vaccine_scheduling_core::{
    AgentId, Appointment, AppointmentId, ApplicationId, ApplicationStatus, DoseNumber, GuardianId,
    InventoryLot, LaboratoryId, LotId, PatientId, StoreError, VaccineApplication, VaccineTypeId,
};

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("Failed to read column {name}: {e}")))
}

pub(crate) fn quantity(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("Negative remaining quantity: {value}")))
}

pub(crate) fn dose(value: i32) -> Result<DoseNumber, StoreError> {
    u32::try_from(value)
        .ok()
        .and_then(DoseNumber::new)
        .ok_or_else(|| StoreError::Corrupt(format!("Invalid dose number: {value}")))
}

/// Convert a database row to an `InventoryLot`.
pub(crate) fn lot_from_row(row: &PgRow) -> Result<InventoryLot, StoreError> {
    Ok(InventoryLot {
        id: LotId::new(column(row, "id")?),
        vaccine_type_id: VaccineTypeId::new(column(row, "vaccine_type_id")?),
        laboratory_id: LaboratoryId::new(column(row, "laboratory_id")?),
        remaining_quantity: quantity(column(row, "remaining_quantity")?)?,
    })
}

/// Convert a database row to a `VaccineApplication`.
pub(crate) fn application_from_row(row: &PgRow) -> Result<VaccineApplication, StoreError> {
    let status: String = column(row, "status")?;
    let agent_id: Option<i64> = column(row, "agent_id")?;
    let supersedes: Option<i64> = column(row, "supersedes")?;

    Ok(VaccineApplication {
        id: ApplicationId::new(column(row, "id")?),
        lot_id: LotId::new(column(row, "lot_id")?),
        patient_id: PatientId::new(column(row, "patient_id")?),
        vaccine_type_id: VaccineTypeId::new(column(row, "vaccine_type_id")?),
        agent_id: agent_id.map(AgentId::new),
        dose: dose(column(row, "dose")?)?,
        status: ApplicationStatus::parse(&status)?,
        supersedes: supersedes.map(ApplicationId::new),
        created_at: column(row, "created_at")?,
        cancelled_at: column(row, "cancelled_at")?,
    })
}

/// Convert a database row to an `Appointment`.
pub(crate) fn appointment_from_row(row: &PgRow) -> Result<Appointment, StoreError> {
    let agent_id: Option<i64> = column(row, "agent_id")?;

    Ok(Appointment {
        id: AppointmentId::new(column(row, "id")?),
        patient_id: PatientId::new(column(row, "patient_id")?),
        vaccine_type_id: VaccineTypeId::new(column(row, "vaccine_type_id")?),
        guardian_id: GuardianId::new(column(row, "guardian_id")?),
        agent_id: agent_id.map(AgentId::new),
        application_id: ApplicationId::new(column(row, "application_id")?),
        scheduled_for: column(row, "scheduled_for")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_quantity() {
        assert_eq!(quantity(3), Ok(3));
        assert!(matches!(quantity(-1), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn rejects_non_positive_dose() {
        assert_eq!(dose(2).map(DoseNumber::get), Ok(2));
        assert!(dose(0).is_err());
        assert!(dose(-4).is_err());
    }
}
