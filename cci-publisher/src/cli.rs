///
/// This module implements the CLI interface for cci-publisher: command parsing,
/// wiring of the Elasticsearch clients and external commands into the core
/// pipeline, and user-visible invocations.
///
/// All publishing logic (change detection, catalog editing, aggregation linking,
/// reconciliation) lives in the [`cci-publisher-core`] crate.
/// This module is strictly CLI glue and orchestration.
///
/// ## Commands
/// - `publish`: discover (or take explicit) datasets, publish each one in-process
///   or as a batch job, then unpublish datasets that are no longer candidates.
/// - `aggregate`: run the pipeline for a single dataset (the batch job entry point).
/// - `root-catalog`: rebuild the root catalog from the dataset catalogs on disk.
///
/// ## Exit status
/// Only configuration, startup and discovery failures are returned as errors.
/// A failing dataset is logged and reported; the run carries on.
///
/// [`cci-publisher-core`]: ../../cci-publisher-core/
use crate::batch::SlurmSubmitter;
use crate::creator::CommandAggregationCreator;
use crate::elasticsearch::{CollectionsSearch, ElasticsearchClient, FilesIndex, StateIndex};
use crate::load_config::{load_config, CliConfig};
use anyhow::{Context, Result};
use cci_publisher_core::aggregation::{AggregationLinker, CreatorRegistry};
use cci_publisher_core::contract::DatasetCandidate;
use cci_publisher_core::discovery::{DatasetMappings, DiscoveryQuery};
use cci_publisher_core::layout::CatalogLayout;
use cci_publisher_core::state_store::StateStore;
use cci_publisher_core::synchronise::{submit_batch, DatasetSynchronizer};
use cci_publisher_core::templates::{write_root_catalog, DefaultCatalogTemplater};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Title of the generated root catalog.
const ROOT_CATALOG_NAME: &str = "CCI Open Data Portal";

/// CLI for cci-publisher: publish THREDDS catalogs and NcML aggregations.
#[derive(Parser)]
#[clap(
    name = "cci-publisher",
    version,
    about = "Publish CCI datasets to a THREDDS catalog repository with NcML aggregations"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish every discovered (or named) dataset, then unpublish stale ones
    Publish {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Publish only these dataset ids instead of running discovery
        #[clap(short = 'd', long, num_args = 1..)]
        datasets: Vec<String>,
        /// Enable WMS/WCS for datasets named with --datasets
        #[clap(long)]
        wms: bool,
        /// Rebuild even when the stored state is unchanged
        #[clap(short, long)]
        force: bool,
        /// Submit one batch job per dataset instead of publishing in-process
        #[clap(long)]
        batch: bool,
        #[clap(long)]
        skip_publish: bool,
        #[clap(long)]
        skip_unpublish: bool,
    },
    /// Publish a single dataset
    Aggregate {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        #[clap(short = 'd', long)]
        dataset: String,
        #[clap(long)]
        wms: bool,
        #[clap(short, long)]
        force: bool,
    },
    /// Rebuild the root catalog from the dataset catalogs on disk
    RootCatalog {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Options of the `publish` command.
struct PublishRun {
    config_path: PathBuf,
    datasets: Vec<String>,
    wms: bool,
    force: bool,
    batch: bool,
    skip_publish: bool,
    skip_unpublish: bool,
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Publish {
            config,
            datasets,
            wms,
            force,
            batch,
            skip_publish,
            skip_unpublish,
        } => {
            publish(PublishRun {
                config_path: config,
                datasets,
                wms,
                force,
                batch,
                skip_publish,
                skip_unpublish,
            })
            .await
        }
        Commands::Aggregate {
            config,
            dataset,
            wms,
            force,
        } => aggregate(&config, dataset, wms, force).await,
        Commands::RootCatalog { config } => root_catalog(&config),
    }
}

/// Everything needed to run the per-dataset pipeline.
struct Pipeline {
    layout: CatalogLayout,
    registry: FilesIndex,
    state: StateStore,
    templater: DefaultCatalogTemplater,
    linker: AggregationLinker,
}

impl Pipeline {
    fn from_config(config: &CliConfig, client: &ElasticsearchClient) -> Self {
        let aggregation = &config.aggregation;
        let mut creators = CreatorRegistry::new(CommandAggregationCreator::new(
            aggregation.command.clone(),
            aggregation.args.clone(),
        ));
        for variant in &aggregation.variants {
            creators = creators.with_marker(
                variant.marker.clone(),
                CommandAggregationCreator::new(variant.command.clone(), variant.args.clone()),
            );
        }

        Self {
            layout: config.layout(),
            registry: FilesIndex::new(client.clone(), config.elasticsearch.files_index.clone()),
            state: StateStore::new(StateIndex::new(
                client.clone(),
                config.elasticsearch.state_index.clone(),
            )),
            templater: DefaultCatalogTemplater::new(),
            linker: AggregationLinker::new(config.remote.clone(), creators),
        }
    }

    fn synchronizer(&self, force: bool) -> DatasetSynchronizer<'_> {
        DatasetSynchronizer::new(
            &self.registry,
            &self.state,
            &self.templater,
            &self.linker,
            &self.layout,
        )
        .force(force)
    }
}

fn startup(config_path: &Path) -> Result<(CliConfig, ElasticsearchClient)> {
    let config = load_config(config_path)?;
    config.settings().trace_loaded();
    let client = ElasticsearchClient::new(
        config.elasticsearch.url.clone(),
        config.elasticsearch.api_key.clone(),
    )
    .context("Failed to construct Elasticsearch client")?;
    Ok((config, client))
}

async fn discover(config: &CliConfig, client: &ElasticsearchClient) -> Result<Vec<DatasetCandidate>> {
    let rules = DatasetMappings::load_dir(&config.mappings.dir).with_context(|| {
        format!(
            "Failed to load aggregation rules from {}",
            config.mappings.dir.display()
        )
    })?;
    let index = CollectionsSearch::new(client.clone(), config.elasticsearch.collections_index.clone());
    DiscoveryQuery::new(&index, &rules)
        .run()
        .await
        .context("Dataset discovery failed")
}

async fn publish(run: PublishRun) -> Result<()> {
    let (config, client) = startup(&run.config_path)?;
    let pipeline = Pipeline::from_config(&config, &client);

    let explicit = !run.datasets.is_empty();
    let discovered = if !explicit || !run.skip_unpublish {
        discover(&config, &client).await?
    } else {
        Vec::new()
    };
    let targets: Vec<DatasetCandidate> = if explicit {
        run.datasets
            .iter()
            .map(|id| DatasetCandidate::new(id.clone(), run.wms))
            .collect()
    } else {
        discovered.clone()
    };
    tracing::info!(
        command = "publish",
        targets = targets.len(),
        discovered = discovered.len(),
        explicit,
        "Starting publish run"
    );

    if run.skip_publish {
        tracing::info!(command = "publish", "Skipping publish step");
    } else if run.batch {
        let executable = std::env::current_exe().context("Failed to locate own executable")?;
        let config_path = std::fs::canonicalize(&run.config_path).with_context(|| {
            format!("Failed to resolve config path {}", run.config_path.display())
        })?;
        std::fs::create_dir_all(&config.batch.error_dir).with_context(|| {
            format!(
                "Failed to create batch error directory {}",
                config.batch.error_dir.display()
            )
        })?;
        let submitter = SlurmSubmitter::new(&config.batch, executable, config_path);
        let report = submit_batch(&submitter, &targets, run.force).await;
        tracing::info!(
            command = "publish",
            submitted = report.submitted.len(),
            failed = report.failed.len(),
            "Batch submission complete"
        );
    } else {
        let report = pipeline
            .synchronizer(run.force)
            .publish_all(&targets)
            .await;
        for dataset in report.datasets.iter().filter(|d| d.error.is_some()) {
            tracing::warn!(
                dataset = %dataset.dataset_id,
                error = dataset.error.as_deref().unwrap_or_default(),
                "Dataset failed"
            );
        }
        tracing::info!(command = "publish", stats = ?report.stats, "Publish step complete");
    }

    if run.skip_unpublish {
        tracing::info!(command = "publish", "Skipping unpublish step");
    } else {
        match pipeline
            .synchronizer(run.force)
            .unpublish_orphans(&discovered)
            .await
        {
            Ok(report) => tracing::info!(
                command = "publish",
                on_disk = report.on_disk,
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Unpublish step complete"
            ),
            Err(e) => tracing::error!(command = "publish", error = %e, "Unpublish step failed"),
        }
    }

    Ok(())
}

async fn aggregate(config_path: &Path, dataset: String, wms: bool, force: bool) -> Result<()> {
    let (config, client) = startup(config_path)?;
    let pipeline = Pipeline::from_config(&config, &client);

    let report = pipeline
        .synchronizer(force)
        .publish(&DatasetCandidate::new(dataset, wms))
        .await;
    match &report.error {
        None => tracing::info!(
            command = "aggregate",
            dataset = %report.dataset_id,
            outcome = ?report.outcome,
            warnings = report.warnings.len(),
            "Dataset complete"
        ),
        Some(error) => tracing::error!(
            command = "aggregate",
            dataset = %report.dataset_id,
            phase = ?report.phase,
            error = %error,
            "Dataset failed"
        ),
    }
    Ok(())
}

fn root_catalog(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let layout = config.layout();
    let path = write_root_catalog(&layout, &DefaultCatalogTemplater::new(), ROOT_CATALOG_NAME)
        .context("Failed to write root catalog")?;
    tracing::info!(command = "root-catalog", path = %path.display(), "Root catalog written");
    Ok(())
}
