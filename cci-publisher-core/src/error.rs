//! Error taxonomy for the publish pipeline.
//!
//! Each collaborator has its own error type so callers can tell a registry
//! outage from a failed aggregation. [`PublishError`] is the per-dataset
//! umbrella: anything that reaches it aborts the current dataset only.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The file or dataset registry could not answer.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Transport-level failure talking to the registry.
    #[error("registry request failed: {0}")]
    Request(String),

    /// Registry answered with a non-success status.
    #[error("registry returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Registry answered, but not with anything we can read.
    #[error("malformed registry response: {0}")]
    Malformed(String),
}

/// Failures of the aggregation state store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// No record for the requested key. Never surfaced by [`crate::state_store::StateStore`].
    #[error("no state record for key {0}")]
    NotFound(String),

    #[error("state store request failed: {0}")]
    Request(String),

    #[error("state store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed state record: {0}")]
    Malformed(String),
}

/// The external aggregation builder could not produce an artifact.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("aggregation failed: {0}")]
    Build(String),

    /// The aggregation dimension could not be read as a coordinate variable.
    #[error("coordinates error: {0}")]
    Coordinates(String),
}

/// Problems reading, mutating or writing a catalog (or NcML) document.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("xml parse error: {0}")]
    Parse(String),

    #[error("xml write error: {0}")]
    Write(String),

    #[error("catalog has no top-level dataset")]
    MissingDataset,

    #[error("top-level dataset has no ID attribute")]
    MissingId,
}

/// Batch job submission failed.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("submission for {dataset} exited with {status}: {stderr}")]
    Rejected {
        dataset: String,
        status: String,
        stderr: String,
    },
}

/// Everything that can stop a single dataset's pipeline.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PublishError {
    pub fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PublishError::Filesystem {
            path: path.into(),
            source,
        }
    }
}
