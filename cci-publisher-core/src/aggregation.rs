//! Linking NcML aggregations into catalog documents.
//!
//! [`AggregationLinker::apply`] performs the publication edits on an already
//! rendered catalog, in a fixed order:
//!
//! 1. strip `restrictAccess` from the top-level dataset
//! 2. insert (or replace) the standard metadata block
//! 3. build the aggregation through the selected [`AggregationCreator`] and
//!    link it as a second-level dataset
//! 4. declare the `wms`/`wcs` services when WMS is requested
//!
//! A failing creator never fails the dataset: the catalog keeps the edits
//! from steps 1 and 2 and a [`LinkWarning`] records what went wrong.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::catalog::{access_element, standard_metadata, write_replacing, CatalogDocument, ServiceKind, NCML_NS, XLINK_NS};
use crate::config::RemoteSettings;
use crate::contract::{AggregationCreator, AggregationRequest};
use crate::error::{AggregationError, CatalogError, PublishError};
use crate::xml::Element;

/// Leading namespace token of every DRS identifier.
pub const DRS_NAMESPACE: &str = "esacci";
/// Dimension the files are joined along.
pub const AGGREGATION_DIMENSION: &str = "time";

/// Path segments of the aggregation subdirectory for an id or catalog file name.
///
/// `esacci.CLOUD.mon.L3C.CLD_PRODUCTS.AVHRR-AM.2-0.r1.xml` gives
/// `CLOUD/mon/L3C/CLD_PRODUCTS/AVHRR-AM/2-0/r1`.
pub fn aggregation_segments(id: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = id.split('.').collect();
    if segments.first() == Some(&DRS_NAMESPACE) {
        segments.remove(0);
    }
    if segments.last() == Some(&"xml") {
        segments.pop();
    }
    segments
}

pub fn aggregation_subdir(id: &str) -> PathBuf {
    aggregation_segments(id).into_iter().collect()
}

/// URL of the dataset's catalog page on the THREDDS server.
///
/// Only catalogs stored under a numbered directory have a page of their own;
/// anything else falls back to the server itself.
pub fn thredds_url(host: &str, catalog_path: &Path) -> String {
    let name = catalog_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(".xml").unwrap_or(&name);
    let numbered = catalog_path
        .parent()
        .and_then(|p| p.file_name())
        .map(|d| d.to_string_lossy().into_owned())
        .filter(|d| d.parse::<u64>().is_ok());

    match numbered {
        Some(subdir) => format!("https://{host}/thredds/esacci/{subdir}/{name}.html"),
        None => host.to_string(),
    }
}

/// Structural signature of a path: every run of digits collapsed to `#`.
fn file_signature(path: &str) -> String {
    let mut signature = String::with_capacity(path.len());
    let mut in_digits = false;
    for c in path.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                signature.push('#');
            }
            in_digits = true;
        } else {
            signature.push(c);
            in_digits = false;
        }
    }
    signature
}

/// Group files that share a directory layout and naming pattern.
///
/// More than one group suggests the dataset mixes different products.
pub fn partition_files(files: &[String]) -> Vec<Vec<String>> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for file in files {
        let signature = file_signature(file);
        match groups.iter_mut().find(|(s, _)| *s == signature) {
            Some((_, members)) => members.push(file.clone()),
            None => groups.push((signature, vec![file.clone()])),
        }
    }
    groups.into_iter().map(|(_, members)| members).collect()
}

type DatasetPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

struct CreatorVariant {
    label: String,
    applies: DatasetPredicate,
    creator: Box<dyn AggregationCreator>,
}

/// Aggregation creators keyed by a predicate over the dataset id.
///
/// Variants are tried in registration order; the default handles the rest.
pub struct CreatorRegistry {
    variants: Vec<CreatorVariant>,
    default: Box<dyn AggregationCreator>,
}

impl CreatorRegistry {
    pub fn new(default: impl AggregationCreator + 'static) -> Self {
        Self {
            variants: Vec::new(),
            default: Box::new(default),
        }
    }

    pub fn with_variant(
        mut self,
        label: impl Into<String>,
        applies: impl Fn(&str) -> bool + Send + Sync + 'static,
        creator: impl AggregationCreator + 'static,
    ) -> Self {
        self.variants.push(CreatorVariant {
            label: label.into(),
            applies: Box::new(applies),
            creator: Box::new(creator),
        });
        self
    }

    /// Register `creator` for every id containing `marker`.
    pub fn with_marker(
        self,
        marker: impl Into<String>,
        creator: impl AggregationCreator + 'static,
    ) -> Self {
        let marker = marker.into();
        let label = marker.clone();
        self.with_variant(label, move |id| id.contains(&marker), creator)
    }

    /// Label and creator to use for `dataset_id`.
    pub fn select(&self, dataset_id: &str) -> (&str, &dyn AggregationCreator) {
        self.variants
            .iter()
            .find(|v| (v.applies)(dataset_id))
            .map(|v| (v.label.as_str(), v.creator.as_ref()))
            .unwrap_or(("default", self.default.as_ref()))
    }
}

/// Which optional edits to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    pub aggregate: bool,
    pub wms: bool,
}

/// Non-fatal problems met while linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkWarning {
    NoFiles,
    HeterogeneousFiles { groups: usize },
    CoordinateCachingSkipped { dimension: String, reason: String },
    AggregationFailed { reason: String },
}

impl fmt::Display for LinkWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkWarning::NoFiles => write!(f, "no files to aggregate"),
            LinkWarning::HeterogeneousFiles { groups } => write!(
                f,
                "file list may contain heterogeneous files (found {groups} potential groups)"
            ),
            LinkWarning::CoordinateCachingSkipped { dimension, reason } => write!(
                f,
                "skipping coordinate value caching: variable '{dimension}' could not be read in first file ({reason})"
            ),
            LinkWarning::AggregationFailed { reason } => {
                write!(f, "failed to create aggregation: {reason}")
            }
        }
    }
}

/// An NcML document ready to be written under the aggregation root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationArtifact {
    pub document: Element,
    pub basename: String,
    pub subdirectory: PathBuf,
}

impl AggregationArtifact {
    pub fn path_under(&self, aggregation_root: &Path) -> PathBuf {
        aggregation_root
            .join(&self.subdirectory)
            .join(&self.basename)
    }

    pub fn write(&self, aggregation_root: &Path) -> Result<PathBuf, PublishError> {
        let path = self.path_under(aggregation_root);
        write_replacing(&path, &self.document.to_xml()?)?;
        Ok(path)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkOutcome {
    pub artifact: Option<AggregationArtifact>,
    pub warnings: Vec<LinkWarning>,
}

pub struct AggregationLinker {
    settings: RemoteSettings,
    creators: CreatorRegistry,
}

impl AggregationLinker {
    pub fn new(settings: RemoteSettings, creators: CreatorRegistry) -> Self {
        Self { settings, creators }
    }

    /// Re-open the catalog at `catalog_path`, apply the publication edits and
    /// write the catalog (and aggregation, if one was built) back out.
    pub async fn link(
        &self,
        catalog_path: &Path,
        aggregation_root: &Path,
        files: &[String],
        options: LinkOptions,
    ) -> Result<LinkOutcome, PublishError> {
        let mut document = CatalogDocument::read(catalog_path)?;
        let outcome = self
            .apply(&mut document, catalog_path, files, options)
            .await?;

        document.write(catalog_path)?;
        if let Some(artifact) = &outcome.artifact {
            let path = artifact.write(aggregation_root)?;
            info!(path = %path.display(), "[AGG] Wrote aggregation");
        }
        Ok(outcome)
    }

    /// Apply the publication edits to `document` in memory.
    pub async fn apply(
        &self,
        document: &mut CatalogDocument,
        catalog_path: &Path,
        files: &[String],
        options: LinkOptions,
    ) -> Result<LinkOutcome, CatalogError> {
        let mut outcome = LinkOutcome::default();

        document.strip_restrict_access();
        document.insert_metadata(standard_metadata());

        if options.aggregate {
            self.add_aggregation(document, catalog_path, files, options.wms, &mut outcome)
                .await?;
        }

        if options.wms {
            document.insert_service(ServiceKind::Wms);
            if self.settings.do_wcs {
                document.insert_service(ServiceKind::Wcs);
            }
        }

        Ok(outcome)
    }

    fn access_services(&self, wms: bool) -> Vec<ServiceKind> {
        let mut services = vec![ServiceKind::Opendap];
        if wms {
            services.push(ServiceKind::Wms);
            if self.settings.do_wcs {
                services.push(ServiceKind::Wcs);
            }
        }
        services
    }

    fn remote_location(&self, segments: &[&str], basename: &str) -> String {
        let mut location = self.settings.aggregations_dir.trim_end_matches('/').to_string();
        for segment in segments {
            location.push('/');
            location.push_str(segment);
        }
        location.push('/');
        location.push_str(basename);
        location
    }

    async fn add_aggregation(
        &self,
        document: &mut CatalogDocument,
        catalog_path: &Path,
        files: &[String],
        wms: bool,
        outcome: &mut LinkOutcome,
    ) -> Result<(), CatalogError> {
        let dataset_id = document.dataset_id()?.to_string();
        info!(dataset = %dataset_id, files = files.len(), "[AGG] Creating aggregation");

        let Some(first_file) = files.first() else {
            warn!(dataset = %dataset_id, "[AGG] No files to aggregate");
            outcome.warnings.push(LinkWarning::NoFiles);
            return Ok(());
        };

        let groups = partition_files(files).len();
        if groups > 1 {
            let warning = LinkWarning::HeterogeneousFiles { groups };
            warn!(dataset = %dataset_id, groups, "[AGG] {warning}");
            outcome.warnings.push(warning);
        }

        let (label, creator) = self.creators.select(&dataset_id);
        info!(dataset = %dataset_id, creator = label, "[AGG] Selected aggregation creator");

        let cache = match creator
            .probe_coordinates(first_file, AGGREGATION_DIMENSION)
            .await
        {
            Ok(()) => true,
            // the probe only decides caching; the aggregation is built either way
            Err(e) => {
                let reason = match e {
                    AggregationError::Coordinates(reason) => reason,
                    other => other.to_string(),
                };
                let warning = LinkWarning::CoordinateCachingSkipped {
                    dimension: AGGREGATION_DIMENSION.to_string(),
                    reason,
                };
                warn!(dataset = %dataset_id, "[AGG] {warning}");
                outcome.warnings.push(warning);
                false
            }
        };

        let request = AggregationRequest {
            dataset_id: dataset_id.clone(),
            thredds_url: thredds_url(&self.settings.thredds_server, catalog_path),
            dimension: AGGREGATION_DIMENSION.to_string(),
            files: files.to_vec(),
            cache,
        };
        let ncml = match creator.create_aggregation(&request).await {
            Ok(ncml) => ncml,
            Err(e) => {
                self.degrade(&dataset_id, e.to_string(), outcome);
                return Ok(());
            }
        };
        let mut ncml_root = match Element::parse(&ncml) {
            Ok(root) => root,
            Err(e) => {
                self.degrade(&dataset_id, format!("unreadable NcML: {e}"), outcome);
                return Ok(());
            }
        };
        if ncml_root.attr("xmlns:xlink").is_none() {
            ncml_root.set_attr("xmlns:xlink", XLINK_NS);
        }

        let mut dataset = Element::new("dataset")
            .with_attr("name", dataset_id.as_str())
            .with_attr("ID", dataset_id.as_str())
            .with_attr("urlPath", dataset_id.as_str());
        for service in self.access_services(wms) {
            // the top-level copy lets consumers that only scan top-level nodes see the endpoint
            dataset.push(access_element(service.name(), &dataset_id));
            document.add_access(service.name(), &dataset_id);
        }

        let segments = aggregation_segments(&dataset_id);
        let basename = format!("{dataset_id}.ncml");
        dataset.push(
            Element::new("netcdf")
                .with_attr("location", self.remote_location(&segments, &basename))
                .with_attr("xmlns", NCML_NS),
        );
        if wms {
            dataset.push(
                Element::new("property")
                    .with_attr("name", "viewer")
                    .with_attr("value", self.settings.wms_viewer_url.as_str()),
            );
        }
        document.attach_dataset(dataset);

        outcome.artifact = Some(AggregationArtifact {
            document: ncml_root,
            basename,
            subdirectory: segments.into_iter().collect(),
        });
        Ok(())
    }

    fn degrade(&self, dataset_id: &str, reason: String, outcome: &mut LinkOutcome) {
        let warning = LinkWarning::AggregationFailed { reason };
        warn!(dataset = %dataset_id, "[AGG] {warning}; publishing catalog only");
        outcome.warnings.push(warning);
    }
}
