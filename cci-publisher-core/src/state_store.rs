//! Change-detection store for aggregation state.
//!
//! Every call goes to the backend; nothing is cached in process, so an update
//! made by another tool is seen on the very next read. Records are addressed by
//! a SHA-256 of the dataset id, which makes `upsert` overwrite rather than add.

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::contract::{AggregationState, StateBackend};
use crate::error::StateStoreError;

pub struct StateStore {
    backend: Box<dyn StateBackend>,
}

impl StateStore {
    pub fn new(backend: impl StateBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Deterministic storage key for a dataset id.
    pub fn storage_key(dataset_id: &str) -> String {
        let digest = Sha256::digest(dataset_id.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Stored state for `dataset_id`, or `None` when the dataset was never recorded.
    pub async fn get(&self, dataset_id: &str) -> Result<Option<AggregationState>, StateStoreError> {
        match self.backend.fetch(&Self::storage_key(dataset_id)).await {
            Ok(state) => Ok(Some(state)),
            Err(StateStoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// True when no state exists or any of the three tracked fields differ.
    pub async fn has_changed(
        &self,
        dataset_id: &str,
        file_count: u64,
        aggregate: bool,
        wms: bool,
    ) -> Result<bool, StateStoreError> {
        let stored = self.get(dataset_id).await?;
        let changed = state_differs(stored.as_ref(), file_count, aggregate, wms);
        debug!(
            dataset = %dataset_id,
            file_count,
            aggregate,
            wms,
            known = stored.is_some(),
            changed,
            "[STATE] Compared against stored state"
        );
        Ok(changed)
    }

    pub async fn upsert(
        &self,
        dataset_id: &str,
        file_count: u64,
        aggregate: bool,
        wms: bool,
    ) -> Result<(), StateStoreError> {
        let state = AggregationState {
            id: dataset_id.to_string(),
            file_count,
            aggregate,
            wms,
        };
        self.backend
            .put(&Self::storage_key(dataset_id), &state)
            .await?;
        info!(dataset = %dataset_id, file_count, aggregate, wms, "[STATE] Recorded state");
        Ok(())
    }

    /// Remove the record for `dataset_id`. Removing an unknown id is a no-op.
    pub async fn remove(&self, dataset_id: &str) -> Result<(), StateStoreError> {
        match self.backend.delete(&Self::storage_key(dataset_id)).await {
            Ok(()) => {
                info!(dataset = %dataset_id, "[STATE] Removed state");
                Ok(())
            }
            Err(StateStoreError::NotFound(_)) => {
                debug!(dataset = %dataset_id, "[STATE] Nothing to remove");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Pure comparison behind [`StateStore::has_changed`].
pub fn state_differs(
    stored: Option<&AggregationState>,
    file_count: u64,
    aggregate: bool,
    wms: bool,
) -> bool {
    match stored {
        None => true,
        Some(state) => {
            state.file_count != file_count || state.aggregate != aggregate || state.wms != wms
        }
    }
}
