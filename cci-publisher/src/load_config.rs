/// `load_config` module: Loads a static YAML config and injects secrets from the environment.
///
/// This is the only place where user-supplied YAML is parsed and mapped onto the
/// strongly-typed settings the core pipeline consumes.
///
/// # Responsibilities
/// - Parse the YAML configuration file into [`CliConfig`]
/// - Fill in defaults for optional sections (`batch`, `remote.do_wcs`, index names)
/// - Inject the Elasticsearch API key from `ES_API_KEY` when it is set
/// - Fail with a clear message on any missing file or field, before any dataset is touched
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{Context, Result};
use cci_publisher_core::config::{PublisherSettings, RemoteSettings};
use cci_publisher_core::layout::CatalogLayout;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Environment variable holding the Elasticsearch API key.
pub const API_KEY_ENV: &str = "ES_API_KEY";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub elasticsearch: ElasticsearchSection,
    pub output: OutputSection,
    pub remote: RemoteSettings,
    pub mappings: MappingsSection,
    pub aggregation: AggregationSection,
    #[serde(default)]
    pub batch: BatchSection,
}

#[derive(Debug, Deserialize)]
pub struct ElasticsearchSection {
    pub url: String,
    #[serde(default = "default_files_index")]
    pub files_index: String,
    #[serde(default = "default_collections_index")]
    pub collections_index: String,
    #[serde(default = "default_state_index")]
    pub state_index: String,
    /// Never read from YAML; see [`API_KEY_ENV`].
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_files_index() -> String {
    "opensearch-files".to_string()
}

fn default_collections_index() -> String {
    "opensearch-collections".to_string()
}

fn default_state_index() -> String {
    "opensearch-aggregation-state".to_string()
}

#[derive(Debug, Deserialize)]
pub struct OutputSection {
    pub thredds_catalog_repo_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct MappingsSection {
    /// Directory of JSON aggregation rule files.
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationSection {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub variants: Vec<CreatorVariantSection>,
}

/// A dedicated aggregation command for datasets whose id contains `marker`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatorVariantSection {
    pub marker: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSection {
    #[serde(default = "default_batch_command")]
    pub command: String,
    #[serde(default = "default_time_limit")]
    pub time_limit: String,
    #[serde(default = "default_error_dir")]
    pub error_dir: PathBuf,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            command: default_batch_command(),
            time_limit: default_time_limit(),
            error_dir: default_error_dir(),
        }
    }
}

fn default_batch_command() -> String {
    "sbatch".to_string()
}

fn default_time_limit() -> String {
    "24:00:00".to_string()
}

fn default_error_dir() -> PathBuf {
    PathBuf::from("errors")
}

impl CliConfig {
    pub fn settings(&self) -> PublisherSettings {
        PublisherSettings {
            catalog_repo: self.output.thredds_catalog_repo_path.clone(),
            remote: self.remote.clone(),
        }
    }

    pub fn layout(&self) -> CatalogLayout {
        CatalogLayout::new(self.output.thredds_catalog_repo_path.clone())
    }
}

/// Loads a static YAML config file (no secrets) and injects the API key from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "[CONFIG] Loading configuration from file");

    let config_content = fs::read_to_string(path_ref)
        .map_err(|e| {
            error!(error = ?e, config_path = ?path_ref, "[CONFIG] Failed to read config file");
            e
        })
        .with_context(|| format!("Failed to read config file {}", path_ref.display()))?;

    let mut config: CliConfig = serde_yaml::from_str(&config_content)
        .map_err(|e| {
            error!(error = ?e, config_path = ?path_ref, "[CONFIG] Failed to parse config YAML");
            e
        })
        .with_context(|| format!("Failed to parse config YAML {}", path_ref.display()))?;
    info!(config_path = ?path_ref, "[CONFIG] Parsed config YAML successfully");

    config.elasticsearch.api_key = env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
    info!(
        api_key_set = config.elasticsearch.api_key.is_some(),
        url = %config.elasticsearch.url,
        "[CONFIG] Elasticsearch settings resolved"
    );

    Ok(config)
}
