#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cci_publisher_core::contract::{
    AggregationCreator, AggregationRequest, AggregationState, FileRecord, FileRegistry,
    StateBackend,
};
use cci_publisher_core::error::{AggregationError, RegistryError, StateStoreError};

/// In-memory state backend whose records and write count outlive the store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub records: Arc<Mutex<HashMap<String, AggregationState>>>,
    pub writes: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn contains_dataset(&self, id: &str) -> bool {
        self.records.lock().unwrap().values().any(|s| s.id == id)
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn fetch(&self, key: &str) -> Result<AggregationState, StateStoreError> {
        self.records
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StateStoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, state: &AggregationState) -> Result<(), StateStoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StateStoreError::NotFound(key.to_string()))
    }
}

/// File registry backed by a fixed map; ids in `failing` answer with an error.
#[derive(Default)]
pub struct StaticRegistry {
    pub files: HashMap<String, Vec<FileRecord>>,
    pub failing: HashSet<String>,
    pub list_calls: AtomicUsize,
}

impl StaticRegistry {
    pub fn with_dataset(mut self, id: &str, count: usize) -> Self {
        self.files.insert(id.to_string(), netcdf_files(count));
        self
    }

    pub fn with_failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileRegistry for StaticRegistry {
    async fn count_files(&self, dataset_id: &str, _format: &str) -> Result<u64, RegistryError> {
        if self.failing.contains(dataset_id) {
            return Err(RegistryError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(self.files.get(dataset_id).map_or(0, |f| f.len() as u64))
    }

    async fn list_files(
        &self,
        dataset_id: &str,
        _format: &str,
    ) -> Result<Vec<FileRecord>, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut files = self.files.get(dataset_id).cloned().unwrap_or_default();
        // registries make no ordering promise
        files.reverse();
        Ok(files)
    }
}

/// Monthly files of one product, 100 bytes each.
pub fn netcdf_files(count: usize) -> Vec<FileRecord> {
    (0..count)
        .map(|i| FileRecord {
            directory: format!("/neodc/esacci/product/v1/{:04}", 2000 + i / 12),
            name: format!("ESACCI-PRODUCT-{:04}{:02}01-fv1.nc", 2000 + i / 12, i % 12 + 1),
            size: 100,
        })
        .collect()
}

pub fn sample_ncml(files: &[String]) -> String {
    let members: String = files
        .iter()
        .map(|f| format!(r#"<netcdf location="{f}"/>"#))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><netcdf xmlns="http://www.unidata.ucar.edu/namespaces/netcdf/ncml-2.2"><aggregation dimName="time" type="joinExisting">{members}</aggregation></netcdf>"#
    )
}

/// Creator that echoes the request's files into a tiny NcML document.
#[derive(Clone, Default)]
pub struct EchoCreator {
    pub fail: bool,
    pub calls: Arc<AtomicUsize>,
}

impl EchoCreator {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl AggregationCreator for EchoCreator {
    async fn probe_coordinates(
        &self,
        _file: &str,
        _dimension: &str,
    ) -> Result<(), AggregationError> {
        Ok(())
    }

    async fn create_aggregation(
        &self,
        request: &AggregationRequest,
    ) -> Result<String, AggregationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AggregationError::Build("aggregation tool crashed".to_string()));
        }
        Ok(sample_ncml(&request.files))
    }
}
