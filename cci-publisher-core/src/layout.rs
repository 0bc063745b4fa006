//! Where catalogs and aggregations live inside the catalog repository.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::aggregation::{aggregation_subdir, DRS_NAMESPACE};

#[derive(Debug, Clone)]
pub struct CatalogLayout {
    repo: PathBuf,
}

impl CatalogLayout {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    pub fn catalog_root(&self) -> PathBuf {
        self.repo.join("data").join("catalog")
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.catalog_root().join("datasets")
    }

    pub fn catalog_path(&self, dataset_id: &str) -> PathBuf {
        self.catalog_dir().join(format!("{dataset_id}.xml"))
    }

    pub fn root_catalog_path(&self) -> PathBuf {
        self.catalog_root().join("catalog.xml")
    }

    pub fn aggregation_root(&self) -> PathBuf {
        self.repo.join("data").join("aggregations")
    }

    pub fn aggregation_path(&self, dataset_id: &str) -> PathBuf {
        self.aggregation_root()
            .join(aggregation_subdir(dataset_id))
            .join(format!("{dataset_id}.ncml"))
    }

    /// Paths of every dataset catalog currently on disk, sorted.
    pub fn catalog_files(&self) -> io::Result<Vec<PathBuf>> {
        let dir = self.catalog_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_catalog = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(DRS_NAMESPACE) && n.ends_with(".xml"));
            if is_catalog && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Dataset ids that currently have a catalog on disk.
    pub fn catalog_ids_on_disk(&self) -> io::Result<BTreeSet<String>> {
        Ok(self
            .catalog_files()?
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect())
    }
}
