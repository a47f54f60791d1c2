//! Inventory lot store.
//!
//! Selects the lot a booking draws from. Selection is the lowest lot id of the
//! requested vaccine type with stock left; expiry dates play no part.
//!
//! Reservation and decrement are a single store operation, so a failed reservation
//! never leaves a decrement behind and two concurrent bookings can't both take the
//! last unit.

use crate::error::{SchedulingError, StoreError};
use crate::store::UnitOfWork;
use crate::types::{InventoryLot, LotHandle, LotId, VaccineTypeId};
use tracing::{debug, warn};

/// Reserves units from inventory lots.
#[derive(Clone, Copy, Debug, Default)]
pub struct InventoryLotStore;

impl InventoryLotStore {
    /// Creates a new `InventoryLotStore`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Take one unit of `vaccine_type_id` from inventory.
    ///
    /// # Errors
    ///
    /// - [`SchedulingError::NoStockAvailable`] when no lot of that type has stock;
    ///   the caller must abort the whole operation
    /// - [`SchedulingError::Persistence`] if the store fails, including when
    ///   reservation gives up under contention while stock remains
    pub async fn reserve_lot(
        &self,
        uow: &mut dyn UnitOfWork,
        vaccine_type_id: VaccineTypeId,
    ) -> Result<LotHandle, SchedulingError> {
        let Some(handle) = uow.reserve_lot(vaccine_type_id).await? else {
            warn!(vaccine_type = %vaccine_type_id, "No lot with remaining stock");
            return Err(SchedulingError::NoStockAvailable {
                vaccine_type: vaccine_type_id,
            });
        };

        debug!(
            vaccine_type = %vaccine_type_id,
            lot = %handle.lot_id(),
            remaining = handle.remaining(),
            "Reserved one unit"
        );
        Ok(handle)
    }

    /// Load the lot an application draws from.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::Persistence`] if the store fails or the lot is
    /// missing (applications always reference an existing lot).
    pub async fn lot(
        &self,
        uow: &mut dyn UnitOfWork,
        lot_id: LotId,
    ) -> Result<InventoryLot, SchedulingError> {
        uow.load_lot(lot_id).await?.ok_or_else(|| {
            SchedulingError::Persistence(StoreError::Corrupt(format!(
                "lot {lot_id} referenced by an application does not exist"
            )))
        })
    }
}
