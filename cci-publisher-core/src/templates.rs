//! Built-in rendering of brand-new catalog documents.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::catalog::{write_replacing, THREDDS_NS, XLINK_NS};
use crate::contract::{CatalogContext, CatalogRef, CatalogTemplater};
use crate::error::{CatalogError, PublishError};
use crate::layout::CatalogLayout;
use crate::xml::Element;

/// Renders dataset and root catalogs without any external template files.
#[derive(Debug, Clone, Default)]
pub struct DefaultCatalogTemplater {
    /// Value for the top-level `restrictAccess` attribute, if datasets start restricted.
    pub restrict_access: Option<String>,
}

impl DefaultCatalogTemplater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_restrict_access(mut self, value: impl Into<String>) -> Self {
        self.restrict_access = Some(value.into());
        self
    }
}

fn catalog_element(name: &str) -> Element {
    Element::new("catalog")
        .with_attr("xmlns", THREDDS_NS)
        .with_attr("xmlns:xlink", XLINK_NS)
        .with_attr("name", name)
}

impl CatalogTemplater for DefaultCatalogTemplater {
    fn dataset_catalog(&self, context: &CatalogContext) -> Result<String, CatalogError> {
        let id = context.dataset_id.as_str();

        let mut compound = Element::new("service")
            .with_attr("name", "all")
            .with_attr("serviceType", "Compound")
            .with_attr("base", "");
        for service in &context.services {
            compound.push(service.declaration());
        }

        let mut dataset = Element::new("dataset")
            .with_attr("name", id)
            .with_attr("ID", id);
        if let Some(restrict) = &self.restrict_access {
            dataset.set_attr("restrictAccess", restrict.as_str());
        }
        if let Some(summary) = context.aggregation {
            dataset.push(
                Element::new("dataSize")
                    .with_attr("units", "bytes")
                    .with_text(summary.total_size.to_string()),
            );
        }

        catalog_element(id)
            .with_child(compound)
            .with_child(dataset)
            .to_xml()
    }

    fn root_catalog(&self, name: &str, catalogs: &[CatalogRef]) -> Result<String, CatalogError> {
        let mut root = catalog_element(name);
        for catalog in catalogs {
            root.push(
                Element::new("catalogRef")
                    .with_attr("xlink:title", catalog.title.as_str())
                    .with_attr("xlink:href", catalog.href.as_str())
                    .with_attr("name", catalog.name.as_str()),
            );
        }
        root.to_xml()
    }
}

/// Reference from the catalog at `root_dir` to the dataset catalog at `path`.
///
/// Returns `None` for paths outside `root_dir`.
pub fn catalog_ref(path: &Path, root_dir: &Path) -> Option<CatalogRef> {
    let name = path.file_stem()?.to_str()?.to_string();
    let relative = path.strip_prefix(root_dir).ok()?;
    let href = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Some(CatalogRef {
        title: name.clone(),
        name,
        href,
    })
}

/// Render the root catalog over every dataset catalog on disk and write it.
pub fn write_root_catalog(
    layout: &CatalogLayout,
    templater: &dyn CatalogTemplater,
    name: &str,
) -> Result<PathBuf, PublishError> {
    let root_dir = layout.catalog_root();
    let files = layout
        .catalog_files()
        .map_err(|e| PublishError::filesystem(layout.catalog_dir(), e))?;
    let refs: Vec<CatalogRef> = files
        .iter()
        .filter_map(|path| catalog_ref(path, &root_dir))
        .collect();

    let path = layout.root_catalog_path();
    write_replacing(&path, &templater.root_catalog(name, &refs)?)?;
    info!(path = %path.display(), datasets = refs.len(), "[PUBLISH] Wrote root catalog");
    Ok(path)
}
