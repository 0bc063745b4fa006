//! THREDDS catalog documents.
//!
//! A [`CatalogDocument`] wraps the root `catalog` element and remembers where
//! the top-level `dataset` sits among its children, so every mutation goes
//! straight to that node instead of searching for it. All mutations are
//! idempotent: applying one twice leaves the same document as applying it once.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{CatalogError, PublishError};
use crate::xml::{Element, Node};

pub const THREDDS_NS: &str = "http://www.unidata.ucar.edu/namespaces/thredds/InvCatalog/v1.0";
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
pub const NCML_NS: &str = "http://www.unidata.ucar.edu/namespaces/netcdf/ncml-2.2";

const RESTRICT_ACCESS: &str = "restrictAccess";

/// Services a catalog can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceKind {
    Http,
    Opendap,
    Wms,
    Wcs,
}

impl ServiceKind {
    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::Http => "http",
            ServiceKind::Opendap => "opendap",
            ServiceKind::Wms => "wms",
            ServiceKind::Wcs => "wcs",
        }
    }

    pub fn service_type(self) -> &'static str {
        match self {
            ServiceKind::Http => "HTTPServer",
            ServiceKind::Opendap => "OpenDAP",
            ServiceKind::Wms => "WMS",
            ServiceKind::Wcs => "WCS",
        }
    }

    pub fn base(self) -> &'static str {
        match self {
            ServiceKind::Http => "/thredds/fileServer/",
            ServiceKind::Opendap => "/thredds/dodsC/",
            ServiceKind::Wms => "/thredds/wms/",
            ServiceKind::Wcs => "/thredds/wcs/",
        }
    }

    pub fn declaration(self) -> Element {
        Element::new("service")
            .with_attr("name", self.name())
            .with_attr("serviceType", self.service_type())
            .with_attr("base", self.base())
    }
}

/// The metadata block every published dataset carries.
pub fn standard_metadata() -> Element {
    Element::new("metadata")
        .with_attr("inherited", "true")
        .with_child(Element::new("serviceName").with_text("all"))
        .with_child(Element::new("authority").with_text("pml.ac.uk:"))
        .with_child(Element::new("dataType").with_text("Grid"))
}

#[derive(Debug, Clone)]
pub struct CatalogDocument {
    root: Element,
    /// Index into `root.children` of the top-level dataset.
    top_level: usize,
}

impl CatalogDocument {
    pub fn from_root(mut root: Element) -> Result<Self, CatalogError> {
        let top_level = root
            .child_position("dataset")
            .ok_or(CatalogError::MissingDataset)?;
        if root.attr("xmlns:xlink").is_none() {
            root.set_attr("xmlns:xlink", XLINK_NS);
        }
        Ok(Self { root, top_level })
    }

    pub fn parse(xml: &str) -> Result<Self, CatalogError> {
        Self::from_root(Element::parse(xml)?)
    }

    pub fn read(path: &Path) -> Result<Self, PublishError> {
        let xml = fs::read_to_string(path).map_err(|e| PublishError::filesystem(path, e))?;
        Ok(Self::parse(&xml)?)
    }

    /// Replace the file at `path` with this document.
    pub fn write(&self, path: &Path) -> Result<(), PublishError> {
        write_replacing(path, &self.to_xml()?)
    }

    pub fn to_xml(&self) -> Result<String, CatalogError> {
        self.root.to_xml()
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn top_level_dataset(&self) -> &Element {
        match &self.root.children[self.top_level] {
            Node::Element(e) => e,
            // top_level is only ever set to an element position
            _ => unreachable!("top-level index does not point at an element"),
        }
    }

    fn top_level_dataset_mut(&mut self) -> &mut Element {
        match &mut self.root.children[self.top_level] {
            Node::Element(e) => e,
            _ => unreachable!("top-level index does not point at an element"),
        }
    }

    pub fn dataset_id(&self) -> Result<&str, CatalogError> {
        self.top_level_dataset()
            .attr("ID")
            .ok_or(CatalogError::MissingId)
    }

    pub fn second_level_datasets(&self) -> impl Iterator<Item = &Element> {
        self.top_level_dataset().children_named("dataset")
    }

    /// Remove the access restriction from the top-level dataset.
    pub fn strip_restrict_access(&mut self) -> bool {
        let removed = self
            .top_level_dataset_mut()
            .remove_attr(RESTRICT_ACCESS)
            .is_some();
        if removed {
            debug!("[CATALOG] Stripped restrictAccess from top-level dataset");
        }
        removed
    }

    /// Insert `block` as the top-level dataset's only metadata block.
    ///
    /// An existing block is replaced where the first one stood; otherwise the
    /// block is appended.
    pub fn insert_metadata(&mut self, block: Element) {
        let dataset = self.top_level_dataset_mut();
        match dataset.child_position(block.local_name()) {
            Some(index) => {
                let tag = block.local_name().to_string();
                dataset.children.remove(index);
                dataset.remove_elements_where(|e| e.is(&tag));
                dataset.insert(index, block);
            }
            None => dataset.push(block),
        }
    }

    /// Declare `service` at the front of the catalog.
    ///
    /// Declarations are unique by (name, serviceType): an existing one is
    /// moved to the front rather than duplicated.
    pub fn insert_service(&mut self, service: ServiceKind) {
        let existing: Vec<usize> = self
            .root
            .children
            .iter()
            .enumerate()
            .filter_map(|(i, c)| match c {
                Node::Element(e)
                    if e.is("service")
                        && e.attr("name") == Some(service.name())
                        && e.attr("serviceType") == Some(service.service_type()) =>
                {
                    Some(i)
                }
                _ => None,
            })
            .collect();
        for &index in existing.iter().rev() {
            self.root.children.remove(index);
        }
        let shifted = existing.iter().filter(|&&i| i < self.top_level).count();
        self.root.insert(0, service.declaration());
        self.top_level = self.top_level - shifted + 1;
    }

    /// Names and types of the root-level service declarations, in order.
    pub fn services(&self) -> Vec<(String, String)> {
        self.root
            .children_named("service")
            .map(|e| {
                (
                    e.attr("name").unwrap_or_default().to_string(),
                    e.attr("serviceType").unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    /// Add an access declaration to the top-level dataset, once.
    pub fn add_access(&mut self, service_name: &str, url_path: &str) {
        let dataset = self.top_level_dataset_mut();
        let present = dataset.children_named("access").any(|a| {
            a.attr("serviceName") == Some(service_name) && a.attr("urlPath") == Some(url_path)
        });
        if !present {
            dataset.push(access_element(service_name, url_path));
        }
    }

    /// Attach a second-level dataset, replacing any with the same ID.
    pub fn attach_dataset(&mut self, dataset: Element) {
        let top = self.top_level_dataset_mut();
        if let Some(id) = dataset.attr("ID").map(str::to_string) {
            top.remove_elements_where(|e| e.is("dataset") && e.attr("ID") == Some(id.as_str()));
        }
        top.push(dataset);
    }

    /// Every `netcdf` reference under the top-level dataset's children.
    pub fn aggregation_references(&self) -> Vec<&Element> {
        self.second_level_datasets()
            .flat_map(|ds| ds.children_named("netcdf"))
            .collect()
    }
}

pub fn access_element(service_name: &str, url_path: &str) -> Element {
    Element::new("access")
        .with_attr("serviceName", service_name)
        .with_attr("urlPath", url_path)
}

/// Mode of every published catalog and NcML file.
pub const PUBLISHED_FILE_MODE: u32 = 0o644;

/// Write `contents` to `path` through a temporary file in the same directory,
/// creating parent directories first.
pub fn write_replacing(path: &Path, contents: &str) -> Result<(), PublishError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| PublishError::filesystem(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PublishError::filesystem(dir, e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| PublishError::filesystem(tmp.path(), e))?;
    // temp files start out as 0600; the THREDDS server reads as another user
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(PUBLISHED_FILE_MODE))
            .map_err(|e| PublishError::filesystem(tmp.path(), e))?;
    }
    tmp.persist(path)
        .map_err(|e| PublishError::filesystem(path, e.error))?;
    debug!(path = %path.display(), bytes = contents.len(), "[CATALOG] Wrote document");
    Ok(())
}
