//! Add / disable / reactivate tracked addresses while keeping the in-memory
//! filter a superset of the active set.

use crate::{
    error::StoreError,
    filter::AddressFilter,
    repo::{StoreResult, TrackedAddress, WatchStore},
    utils::AccountAddress,
};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct TrackingService {
    store: Arc<dyn WatchStore>,
    filter: Arc<AddressFilter>,
}

impl TrackingService {
    pub fn new(store: Arc<dyn WatchStore>, filter: Arc<AddressFilter>) -> Self {
        Self { store, filter }
    }

    pub fn filter(&self) -> &AddressFilter {
        &self.filter
    }

    pub async fn get(
        &self,
        address: &AccountAddress,
    ) -> StoreResult<Option<TrackedAddress>> {
        self.store
            .find_tracked_address(address.workchain, &address.fingerprint)
            .await
    }

    /// Starts tracking `address`. An existing record, active or disabled, is
    /// a conflict; disabled ones come back through [`Self::reactivate`].
    pub async fn add(
        &self,
        address: &AccountAddress,
    ) -> StoreResult<TrackedAddress> {
        if let Some(existing) = self.get(address).await? {
            return Err(StoreError::Conflict(if existing.active {
                format!("{address} is already tracked")
            } else {
                format!("{address} is disabled, reactivate it instead")
            }));
        }
        let record = self
            .store
            .insert_tracked_address(address.workchain, &address.fingerprint)
            .await?;
        // the record is durable before the filter learns about it
        self.filter.add(&record.fingerprint);
        info!(%address, id = %record.id, "address tracked");
        Ok(record)
    }

    /// Returns `false` when the address is unknown or already disabled. The
    /// filter keeps its bits; the store check rejects later hits.
    pub async fn disable(&self, address: &AccountAddress) -> StoreResult<bool> {
        let Some(record) = self.get(address).await? else {
            return Ok(false);
        };
        if !record.active {
            return Ok(false);
        }
        let changed = self.store.deactivate_tracked_address(record.id).await?;
        if changed {
            info!(%address, id = %record.id, "address disabled");
        }
        Ok(changed)
    }

    /// Re-enables a disabled record. Reactivating an active record is a
    /// no-op that returns it unchanged.
    pub async fn reactivate(
        &self,
        address: &AccountAddress,
    ) -> StoreResult<TrackedAddress> {
        let Some(mut record) = self.get(address).await? else {
            return Err(StoreError::NotFound(address.to_string()));
        };
        if record.active {
            return Ok(record);
        }
        if self.store.reactivate_tracked_address(record.id).await? {
            info!(%address, id = %record.id, "address reactivated");
        }
        self.filter.add(&record.fingerprint);
        record.active = true;
        Ok(record)
    }

    pub async fn is_tracked(
        &self,
        address: &AccountAddress,
    ) -> StoreResult<bool> {
        Ok(self.get(address).await?.is_some_and(|r| r.active))
    }
}
