//! # contract: collaborator interfaces for the publish pipeline
//!
//! Everything the core talks to but does not own is described here as a trait:
//!
//! - [`FileRegistry`]: counts and lists the data files of a dataset.
//! - [`StateBackend`]: raw key/value persistence behind [`crate::state_store::StateStore`].
//! - [`CollectionsIndex`]: one page of the published-collections composite search.
//! - [`CatalogTemplater`]: renders brand-new catalog documents.
//! - [`AggregationCreator`]: builds NcML aggregations from an ordered file list.
//! - [`BatchSubmitter`]: hands a single-dataset run to an external cluster.
//!
//! ## Mocking & Testing
//! - Traits are annotated for `mockall`; with the `test-export-mocks` feature
//!   (on by default) the generated `Mock*` types are visible to integration tests.
//!
//! ## Adding New Backends
//! - Implement the trait in the binary crate (see the Elasticsearch clients there).
//! - Map transport failures onto the error type the trait names; the pipeline
//!   relies on the error kind to decide between "skip this dataset" and "degrade".

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::catalog::ServiceKind;
use crate::error::{AggregationError, BatchError, CatalogError, RegistryError, StateStoreError};

/// Content-type filter applied to every file registry query.
pub const NETCDF_FORMAT: &str = "NetCDF";

/// One data file as reported by the file registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub directory: String,
    pub name: String,
    pub size: u64,
}

impl FileRecord {
    /// Full path of the file on the data archive.
    pub fn path(&self) -> String {
        if self.directory.ends_with('/') {
            format!("{}{}", self.directory, self.name)
        } else {
            format!("{}/{}", self.directory, self.name)
        }
    }
}

/// Change-detection record, one per dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationState {
    pub id: String,
    pub file_count: u64,
    pub aggregate: bool,
    pub wms: bool,
}

/// A dataset selected for publication, with its per-dataset flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetCandidate {
    pub id: String,
    pub aggregate: bool,
    pub wms: bool,
}

impl DatasetCandidate {
    pub fn new(id: impl Into<String>, wms: bool) -> Self {
        Self {
            id: id.into(),
            aggregate: true,
            wms,
        }
    }
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait FileRegistry: Send + Sync {
    /// Number of files of `format` belonging to the dataset. The fast path.
    async fn count_files(&self, dataset_id: &str, format: &str) -> Result<u64, RegistryError>;

    /// Every file of `format` belonging to the dataset. Only called on rebuild.
    async fn list_files(
        &self,
        dataset_id: &str,
        format: &str,
    ) -> Result<Vec<FileRecord>, RegistryError>;
}

/// Remote persistence for aggregation state, addressed by storage key.
///
/// Implementations report a missing record as [`StateStoreError::NotFound`],
/// from both `fetch` and `delete`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<AggregationState, StateStoreError>;

    /// Create or overwrite the record stored under `key`.
    async fn put(&self, key: &str, state: &AggregationState) -> Result<(), StateStoreError>;

    async fn delete(&self, key: &str) -> Result<(), StateStoreError>;
}

/// One (identifier, path) bucket of the composite search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeBucket {
    pub drs_id: String,
    pub path: String,
}

/// A page of published collections plus the key to resume after, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositePage {
    pub buckets: Vec<CompositeBucket>,
    pub after_key: Option<serde_json::Value>,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CollectionsIndex: Send + Sync {
    /// Fetch the page that follows `after` (the first page when `None`).
    async fn published_page(
        &self,
        after: Option<serde_json::Value>,
    ) -> Result<CompositePage, RegistryError>;
}

/// Short summary of the files behind a dataset, for the templater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationSummary {
    pub file_count: u64,
    pub total_size: u64,
}

impl AggregationSummary {
    pub fn from_files(files: &[FileRecord]) -> Self {
        Self {
            file_count: files.len() as u64,
            total_size: files.iter().map(|f| f.size).sum(),
        }
    }
}

/// Input to [`CatalogTemplater::dataset_catalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogContext {
    pub services: BTreeSet<ServiceKind>,
    pub dataset_id: String,
    pub aggregation: Option<AggregationSummary>,
}

/// Link from the root catalog to one dataset catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRef {
    pub name: String,
    pub title: String,
    pub href: String,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait CatalogTemplater: Send + Sync {
    /// Render a fresh dataset catalog as serialized XML.
    fn dataset_catalog(&self, context: &CatalogContext) -> Result<String, CatalogError>;

    /// Render the root catalog linking every dataset catalog.
    fn root_catalog(&self, name: &str, catalogs: &[CatalogRef]) -> Result<String, CatalogError>;
}

/// Everything the aggregation builder needs for one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRequest {
    pub dataset_id: String,
    /// Representative THREDDS URL recorded in the aggregation.
    pub thredds_url: String,
    pub dimension: String,
    pub files: Vec<String>,
    /// Whether coordinate values may be cached in the NcML.
    pub cache: bool,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait AggregationCreator: Send + Sync {
    /// Check that `dimension` can be read as a coordinate variable in `file`.
    async fn probe_coordinates(&self, file: &str, dimension: &str)
        -> Result<(), AggregationError>;

    /// Build the NcML document and return it serialized.
    async fn create_aggregation(
        &self,
        request: &AggregationRequest,
    ) -> Result<String, AggregationError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BatchSubmitter: Send + Sync {
    /// Submit one single-dataset pipeline run as an external job.
    async fn submit(&self, candidate: &DatasetCandidate, force: bool) -> Result<(), BatchError>;
}
