//! `PostgreSQL` implementation of the scheduling store.

use crate::rows::{appointment_from_row, application_from_row, dose, lot_from_row};
use crate::LOT_RESERVATION_RETRIES;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use vaccine_scheduling_core::{
    Appointment, AppointmentId, ApplicationId, ApplicationStatus, DoseNumber, InventoryLot,
    LotHandle, LotId, NewApplication, NewAppointment, PatientId, SchedulingStore, StoreError,
    StoreFuture, UnitOfWork, VaccineApplication, VaccineTypeId,
};

/// Reservation attempts before giving up on a contended vaccine type.
const MAX_RESERVATION_ATTEMPTS: u32 = 5;

/// `PostgreSQL`-based scheduling store.
///
/// Each unit of work is a database transaction. Lot reservation is a single
/// conditional `UPDATE` against a row locked with `FOR UPDATE`, so concurrent
/// bookings can never take the same last unit; per-patient serialisation uses a
/// transaction-scoped advisory lock.
///
/// # Example
///
/// ```no_run
/// use vaccine_scheduling_postgres::PostgresSchedulingStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresSchedulingStore::connect("postgres://localhost/vaccination").await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresSchedulingStore {
    pool: PgPool,
}

impl PostgresSchedulingStore {
    /// Create a store from an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }
}

impl SchedulingStore for PostgresSchedulingStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn UnitOfWork>> {
        Box::pin(async move {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StoreError::Database(format!("Failed to begin transaction: {e}")))?;
            let uow: Box<dyn UnitOfWork> = Box::new(PgUnitOfWork { tx });
            Ok::<_, StoreError>(uow)
        })
    }
}

/// One scheduling transaction.
struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn advisory_lock(&mut self, patient_id: PatientId) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended('patient:' || $1::text, 0))")
            .bind(patient_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to lock patient: {e}")))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn reserve(
        &mut self,
        vaccine_type_id: VaccineTypeId,
    ) -> Result<Option<LotHandle>, StoreError> {
        for attempt in 1..=MAX_RESERVATION_ATTEMPTS {
            let reserved = sqlx::query(
                r"
                UPDATE inventory_lots
                SET remaining_quantity = remaining_quantity - 1
                WHERE id = (
                    SELECT id FROM inventory_lots
                    WHERE vaccine_type_id = $1 AND remaining_quantity > 0
                    ORDER BY id
                    LIMIT 1
                    FOR UPDATE
                )
                AND remaining_quantity > 0
                RETURNING id, vaccine_type_id, laboratory_id, remaining_quantity
                ",
            )
            .bind(vaccine_type_id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to reserve lot: {e}")))?;

            if let Some(row) = reserved {
                let lot = lot_from_row(&row)?;
                return Ok(Some(LotHandle::reserved(
                    lot.id,
                    lot.vaccine_type_id,
                    lot.remaining_quantity,
                )));
            }

            // The locked candidate may have been emptied by a concurrent commit
            // while we waited; only stop if nothing is left at all.
            let in_stock: bool = sqlx::query_scalar(
                r"
                SELECT EXISTS (
                    SELECT 1 FROM inventory_lots
                    WHERE vaccine_type_id = $1 AND remaining_quantity > 0
                )
                ",
            )
            .bind(vaccine_type_id.get())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to check stock: {e}")))?;

            if !in_stock {
                return Ok(None);
            }

            metrics::counter!(LOT_RESERVATION_RETRIES).increment(1);
            debug!(attempt, "Lot emptied by a concurrent reservation, retrying");
        }

        Err(StoreError::Database(format!(
            "Failed to reserve lot for vaccine type {vaccine_type_id}: \
             still contended after {MAX_RESERVATION_ATTEMPTS} attempts"
        )))
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn fetch_lot(&mut self, lot_id: LotId) -> Result<Option<InventoryLot>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, vaccine_type_id, laboratory_id, remaining_quantity
            FROM inventory_lots
            WHERE id = $1
            ",
        )
        .bind(lot_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to load lot: {e}")))?;

        row.as_ref().map(lot_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn max_dose(
        &mut self,
        patient_id: PatientId,
        vaccine_type_id: Option<VaccineTypeId>,
    ) -> Result<Option<DoseNumber>, StoreError> {
        let highest: Option<i32> = sqlx::query_scalar(
            r"
            SELECT MAX(dose)
            FROM vaccine_applications
            WHERE patient_id = $1
              AND status <> 'cancelled'
              AND ($2::BIGINT IS NULL OR vaccine_type_id = $2)
            ",
        )
        .bind(patient_id.get())
        .bind(vaccine_type_id.map(|id| id.get()))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to compute highest dose: {e}")))?;

        highest.map(dose).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self, application), err)]
    async fn create_application(
        &mut self,
        application: NewApplication,
    ) -> Result<VaccineApplication, StoreError> {
        let ordinal = i32::try_from(application.dose.get()).map_err(|_| {
            StoreError::Database(format!("Dose {} exceeds the column range", application.dose))
        })?;

        let row = sqlx::query(
            r"
            INSERT INTO vaccine_applications (
                lot_id, patient_id, vaccine_type_id, agent_id, dose, status, supersedes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, lot_id, patient_id, vaccine_type_id, agent_id, dose, status,
                      supersedes, created_at, cancelled_at
            ",
        )
        .bind(application.lot_id.get())
        .bind(application.patient_id.get())
        .bind(application.vaccine_type_id.get())
        .bind(application.agent_id.map(|id| id.get()))
        .bind(ordinal)
        .bind(ApplicationStatus::Pending.as_str())
        .bind(application.supersedes.map(|id| id.get()))
        .bind(application.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to insert application: {e}")))?;

        application_from_row(&row)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn fetch_application(
        &mut self,
        application_id: ApplicationId,
    ) -> Result<Option<VaccineApplication>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, lot_id, patient_id, vaccine_type_id, agent_id, dose, status,
                   supersedes, created_at, cancelled_at
            FROM vaccine_applications
            WHERE id = $1
            ",
        )
        .bind(application_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to load application: {e}")))?;

        row.as_ref().map(application_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn cancel_pending(
        &mut self,
        application_id: ApplicationId,
        cancelled_at: DateTime<Utc>,
    ) -> Result<Option<VaccineApplication>, StoreError> {
        let row = sqlx::query(
            r"
            UPDATE vaccine_applications
            SET status = 'cancelled', cancelled_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING id, lot_id, patient_id, vaccine_type_id, agent_id, dose, status,
                      supersedes, created_at, cancelled_at
            ",
        )
        .bind(application_id.get())
        .bind(cancelled_at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to cancel application: {e}")))?;

        row.as_ref().map(application_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self, appointment), err)]
    async fn create_appointment(
        &mut self,
        appointment: NewAppointment,
    ) -> Result<Appointment, StoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO appointments (
                patient_id, vaccine_type_id, guardian_id, agent_id, application_id,
                scheduled_for, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING id, patient_id, vaccine_type_id, guardian_id, agent_id, application_id,
                      scheduled_for, created_at, updated_at
            ",
        )
        .bind(appointment.patient_id.get())
        .bind(appointment.vaccine_type_id.get())
        .bind(appointment.guardian_id.get())
        .bind(appointment.agent_id.map(|id| id.get()))
        .bind(appointment.application_id.get())
        .bind(appointment.scheduled_for)
        .bind(appointment.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to insert appointment: {e}")))?;

        appointment_from_row(&row)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn fetch_appointment(
        &mut self,
        appointment_id: AppointmentId,
        for_update: bool,
    ) -> Result<Option<Appointment>, StoreError> {
        let sql = if for_update {
            r"
            SELECT id, patient_id, vaccine_type_id, guardian_id, agent_id, application_id,
                   scheduled_for, created_at, updated_at
            FROM appointments
            WHERE id = $1
            FOR UPDATE
            "
        } else {
            r"
            SELECT id, patient_id, vaccine_type_id, guardian_id, agent_id, application_id,
                   scheduled_for, created_at, updated_at
            FROM appointments
            WHERE id = $1
            "
        };

        let row = sqlx::query(sql)
            .bind(appointment_id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to load appointment: {e}")))?;

        row.as_ref().map(appointment_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self, appointment), fields(appointment = %appointment.id), err)]
    async fn save_appointment(&mut self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let row = sqlx::query(
            r"
            UPDATE appointments
            SET vaccine_type_id = $2,
                guardian_id = $3,
                agent_id = $4,
                application_id = $5,
                scheduled_for = $6,
                updated_at = $7
            WHERE id = $1
            RETURNING id, patient_id, vaccine_type_id, guardian_id, agent_id, application_id,
                      scheduled_for, created_at, updated_at
            ",
        )
        .bind(appointment.id.get())
        .bind(appointment.vaccine_type_id.get())
        .bind(appointment.guardian_id.get())
        .bind(appointment.agent_id.map(|id| id.get()))
        .bind(appointment.application_id.get())
        .bind(appointment.scheduled_for)
        .bind(appointment.updated_at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to update appointment: {e}")))?
        .ok_or_else(|| {
            StoreError::Database(format!("Appointment {} does not exist", appointment.id))
        })?;

        appointment_from_row(&row)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn all_appointments(&mut self) -> Result<Vec<Appointment>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, patient_id, vaccine_type_id, guardian_id, agent_id, application_id,
                   scheduled_for, created_at, updated_at
            FROM appointments
            ORDER BY id
            ",
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to list appointments: {e}")))?;

        rows.iter().map(appointment_from_row).collect()
    }
}

impl UnitOfWork for PgUnitOfWork {
    fn lock_patient(&mut self, patient_id: PatientId) -> StoreFuture<'_, ()> {
        Box::pin(self.advisory_lock(patient_id))
    }

    fn reserve_lot(&mut self, vaccine_type_id: VaccineTypeId) -> StoreFuture<'_, Option<LotHandle>> {
        Box::pin(self.reserve(vaccine_type_id))
    }

    fn load_lot(&mut self, lot_id: LotId) -> StoreFuture<'_, Option<InventoryLot>> {
        Box::pin(self.fetch_lot(lot_id))
    }

    fn highest_dose(
        &mut self,
        patient_id: PatientId,
        vaccine_type_id: Option<VaccineTypeId>,
    ) -> StoreFuture<'_, Option<DoseNumber>> {
        Box::pin(self.max_dose(patient_id, vaccine_type_id))
    }

    fn insert_application(&mut self, application: NewApplication) -> StoreFuture<'_, VaccineApplication> {
        Box::pin(self.create_application(application))
    }

    fn load_application(&mut self, application_id: ApplicationId) -> StoreFuture<'_, Option<VaccineApplication>> {
        Box::pin(self.fetch_application(application_id))
    }

    fn cancel_application(
        &mut self,
        application_id: ApplicationId,
        cancelled_at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<VaccineApplication>> {
        Box::pin(self.cancel_pending(application_id, cancelled_at))
    }

    fn insert_appointment(&mut self, appointment: NewAppointment) -> StoreFuture<'_, Appointment> {
        Box::pin(self.create_appointment(appointment))
    }

    fn load_appointment(&mut self, appointment_id: AppointmentId) -> StoreFuture<'_, Option<Appointment>> {
        Box::pin(self.fetch_appointment(appointment_id, false))
    }

    fn lock_appointment(&mut self, appointment_id: AppointmentId) -> StoreFuture<'_, Option<Appointment>> {
        Box::pin(self.fetch_appointment(appointment_id, true))
    }

    fn update_appointment(&mut self, appointment: Appointment) -> StoreFuture<'_, Appointment> {
        Box::pin(self.save_appointment(appointment))
    }

    fn list_appointments(&mut self) -> StoreFuture<'_, Vec<Appointment>> {
        Box::pin(self.all_appointments())
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            self.tx
                .commit()
                .await
                .map_err(|e| StoreError::Database(format!("Failed to commit transaction: {e}")))
        })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            self.tx
                .rollback()
                .await
                .map_err(|e| StoreError::Database(format!("Failed to roll back transaction: {e}")))
        })
    }
}
