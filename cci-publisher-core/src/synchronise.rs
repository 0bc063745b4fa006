//! High-level pipeline: publish → aggregate → record state, and reconcile deletions.
//!
//! This module drives one dataset at a time through
//!
//! ```text
//! Init → Counted → (Unchanged | ToBuild) → CatalogBuilt → AggregationBuilt → StateUpdated
//! ```
//!
//!   - the file registry is asked for the dataset's NetCDF file count
//!   - the [`StateStore`] decides whether anything changed since the last run
//!   - changed (or forced) datasets get a freshly rendered catalog, then the
//!     [`AggregationLinker`] edits it in place and writes the NcML
//!   - only after all writes succeeded is the new state recorded
//!
//! # Responsibilities
//! - Catalog and aggregation writes are whole-file replacements, so re-running
//!   a dataset whose state write never happened is always safe.
//! - A failing dataset is logged and reported; the run moves on to the next one.
//! - Reconciliation ([`DatasetSynchronizer::unpublish_orphans`]) deletes catalogs
//!   of datasets that are no longer candidates and prunes their state records.
//!
//! # Navigation
//! - Per-dataset entrypoint: [`DatasetSynchronizer::publish`]
//! - Whole run: [`DatasetSynchronizer::publish_all`], [`DatasetSynchronizer::unpublish_orphans`]
//! - Batch mode: [`submit_batch`]

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::aggregation::{AggregationLinker, LinkOptions, LinkWarning};
use crate::catalog::{write_replacing, ServiceKind};
use crate::contract::{
    AggregationSummary, BatchSubmitter, CatalogContext, CatalogTemplater, DatasetCandidate,
    FileRecord, FileRegistry, NETCDF_FORMAT,
};
use crate::error::PublishError;
use crate::layout::CatalogLayout;
use crate::state_store::StateStore;

/// Where a dataset got to in the publish pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetPhase {
    Init,
    Counted,
    Unchanged,
    ToBuild,
    CatalogBuilt,
    AggregationBuilt,
    StateUpdated,
}

/// Final classification of one dataset in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// State matched and nothing was forced.
    Unchanged,
    /// The registry has no matching files; nothing was written.
    NoFiles,
    /// Catalog rebuilt and state recorded.
    Published { aggregated: bool },
    Failed,
}

#[derive(Debug, Clone)]
pub struct DatasetReport {
    pub dataset_id: String,
    pub outcome: SyncOutcome,
    /// Last phase reached; for failures, the phase the error interrupted.
    pub phase: DatasetPhase,
    pub file_count: Option<u64>,
    pub warnings: Vec<LinkWarning>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub unchanged: usize,
    pub no_files: usize,
    pub published: usize,
    pub aggregated: usize,
    pub failed: usize,
}

impl SyncStats {
    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Unchanged => self.unchanged += 1,
            SyncOutcome::NoFiles => self.no_files += 1,
            SyncOutcome::Published { aggregated } => {
                self.published += 1;
                if aggregated {
                    self.aggregated += 1;
                }
            }
            SyncOutcome::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.unchanged + self.no_files + self.published + self.failed
    }
}

#[derive(Debug, Default)]
pub struct SynchroniseReport {
    pub datasets: Vec<DatasetReport>,
    pub stats: SyncStats,
}

#[derive(Debug, Default)]
pub struct UnpublishReport {
    pub on_disk: usize,
    pub to_delete: usize,
    pub removed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub submitted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Bookkeeping carried through one dataset's run, kept even if it fails.
struct Progress {
    phase: DatasetPhase,
    file_count: Option<u64>,
    warnings: Vec<LinkWarning>,
}

pub struct DatasetSynchronizer<'a> {
    registry: &'a dyn FileRegistry,
    state: &'a StateStore,
    templater: &'a dyn CatalogTemplater,
    linker: &'a AggregationLinker,
    layout: &'a CatalogLayout,
    force: bool,
}

impl<'a> DatasetSynchronizer<'a> {
    pub fn new(
        registry: &'a dyn FileRegistry,
        state: &'a StateStore,
        templater: &'a dyn CatalogTemplater,
        linker: &'a AggregationLinker,
        layout: &'a CatalogLayout,
    ) -> Self {
        Self {
            registry,
            state,
            templater,
            linker,
            layout,
            force: false,
        }
    }

    /// Rebuild even when the state store reports no change.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Run the publish pipeline for one dataset. Failures end up in the report.
    pub async fn publish(&self, candidate: &DatasetCandidate) -> DatasetReport {
        let mut progress = Progress {
            phase: DatasetPhase::Init,
            file_count: None,
            warnings: Vec::new(),
        };

        let (outcome, error) = match self.run_pipeline(candidate, &mut progress).await {
            Ok(outcome) => (outcome, None),
            Err(e) => {
                error!(
                    dataset = %candidate.id,
                    phase = ?progress.phase,
                    error = %e,
                    "[PUBLISH][ERROR] Dataset failed, continuing with the next one"
                );
                (SyncOutcome::Failed, Some(e.to_string()))
            }
        };

        DatasetReport {
            dataset_id: candidate.id.clone(),
            outcome,
            phase: progress.phase,
            file_count: progress.file_count,
            warnings: progress.warnings,
            error,
        }
    }

    async fn run_pipeline(
        &self,
        candidate: &DatasetCandidate,
        progress: &mut Progress,
    ) -> Result<SyncOutcome, PublishError> {
        let id = candidate.id.as_str();

        let count = self.registry.count_files(id, NETCDF_FORMAT).await?;
        progress.phase = DatasetPhase::Counted;
        progress.file_count = Some(count);

        let changed = self
            .state
            .has_changed(id, count, candidate.aggregate, candidate.wms)
            .await?;
        if !changed && !self.force {
            progress.phase = DatasetPhase::Unchanged;
            debug!(dataset = %id, files = count, "[PUBLISH] Unchanged since last run");
            return Ok(SyncOutcome::Unchanged);
        }
        if count == 0 {
            info!(dataset = %id, "[PUBLISH] No NetCDF files, skipping");
            return Ok(SyncOutcome::NoFiles);
        }
        progress.phase = DatasetPhase::ToBuild;
        info!(dataset = %id, files = count, changed, force = self.force, "[PUBLISH] Rebuilding dataset");

        let mut files = self.registry.list_files(id, NETCDF_FORMAT).await?;
        files.sort_by_key(FileRecord::path);

        let catalog_path = self.layout.catalog_path(id);
        let context = CatalogContext {
            services: BTreeSet::from([ServiceKind::Http, ServiceKind::Opendap]),
            dataset_id: id.to_string(),
            aggregation: Some(AggregationSummary::from_files(&files)),
        };
        let catalog = self.templater.dataset_catalog(&context)?;
        write_replacing(&catalog_path, &catalog)?;
        progress.phase = DatasetPhase::CatalogBuilt;
        info!(dataset = %id, path = %catalog_path.display(), "[PUBLISH] Wrote catalog");

        let mut aggregated = false;
        if candidate.aggregate {
            let paths: Vec<String> = files.iter().map(FileRecord::path).collect();
            let outcome = self
                .linker
                .link(
                    &catalog_path,
                    &self.layout.aggregation_root(),
                    &paths,
                    LinkOptions {
                        aggregate: true,
                        wms: candidate.wms,
                    },
                )
                .await?;
            aggregated = outcome.artifact.is_some();
            progress.warnings = outcome.warnings;
            progress.phase = DatasetPhase::AggregationBuilt;
        }

        self.state
            .upsert(id, count, candidate.aggregate, candidate.wms)
            .await?;
        progress.phase = DatasetPhase::StateUpdated;

        Ok(SyncOutcome::Published { aggregated })
    }

    /// Publish every candidate in order.
    pub async fn publish_all(&self, candidates: &[DatasetCandidate]) -> SynchroniseReport {
        info!(total = candidates.len(), "[PUBLISH] Generating catalog records");
        let mut report = SynchroniseReport::default();
        for candidate in candidates {
            let dataset = self.publish(candidate).await;
            report.stats.record(dataset.outcome);
            report.datasets.push(dataset);
        }
        info!(
            published = report.stats.published,
            aggregated = report.stats.aggregated,
            unchanged = report.stats.unchanged,
            no_files = report.stats.no_files,
            failed = report.stats.failed,
            "[PUBLISH] Run complete"
        );
        report
    }

    /// Remove a dataset's catalog, aggregation and state record.
    ///
    /// Files that are already gone are not an error.
    pub async fn unpublish(&self, dataset_id: &str) -> Result<(), PublishError> {
        remove_if_present(&self.layout.catalog_path(dataset_id))?;
        remove_if_present(&self.layout.aggregation_path(dataset_id))?;
        self.state.remove(dataset_id).await?;
        info!(dataset = %dataset_id, "[UNPUBLISH] Removed dataset");
        Ok(())
    }

    /// Unpublish every dataset with a catalog on disk that is not in `keep`.
    pub async fn unpublish_orphans(
        &self,
        keep: &[DatasetCandidate],
    ) -> Result<UnpublishReport, PublishError> {
        let on_disk = self
            .layout
            .catalog_ids_on_disk()
            .map_err(|e| PublishError::filesystem(self.layout.catalog_dir(), e))?;
        let keep: HashSet<&str> = keep.iter().map(|c| c.id.as_str()).collect();
        let to_delete: Vec<String> = on_disk
            .iter()
            .filter(|id| !keep.contains(id.as_str()))
            .cloned()
            .collect();

        info!(on_disk = on_disk.len(), "[UNPUBLISH] Aggregations on disk");
        info!(to_delete = to_delete.len(), "[UNPUBLISH] Aggregations to delete");

        let mut report = UnpublishReport {
            on_disk: on_disk.len(),
            to_delete: to_delete.len(),
            ..UnpublishReport::default()
        };
        for id in to_delete {
            match self.unpublish(&id).await {
                Ok(()) => report.removed.push(id),
                Err(e) => {
                    error!(dataset = %id, error = %e, "[UNPUBLISH][ERROR] Failed to remove dataset");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}

fn remove_if_present(path: &Path) -> Result<(), PublishError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "[UNPUBLISH] Deleted file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PublishError::filesystem(path, e)),
    }
}

/// Hand each candidate to the batch cluster instead of running it here.
pub async fn submit_batch(
    submitter: &dyn BatchSubmitter,
    candidates: &[DatasetCandidate],
    force: bool,
) -> BatchReport {
    let mut report = BatchReport::default();
    for candidate in candidates {
        match submitter.submit(candidate, force).await {
            Ok(()) => {
                info!(dataset = %candidate.id, "[BATCH] Submitted job");
                report.submitted.push(candidate.id.clone());
            }
            Err(e) => {
                warn!(dataset = %candidate.id, error = %e, "[BATCH] Submission failed");
                report.failed.push((candidate.id.clone(), e.to_string()));
            }
        }
    }
    report
}
