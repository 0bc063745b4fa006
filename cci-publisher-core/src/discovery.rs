//! Discovery of the datasets that should be published.
//!
//! The collections index is walked page by page (composite aggregation over
//! `(drsId, path)`), feeding each page's `after_key` into the next request
//! until the index stops returning one. Each bucket is kept only if the rules
//! for its path say the identifier should be aggregated.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::contract::{CollectionsIndex, CompositePage, DatasetCandidate};
use crate::error::RegistryError;

/// One "aggregate identifiers like this" rule.
#[derive(Debug, Clone)]
pub struct AggregationRule {
    pattern: Regex,
    pub wms: bool,
}

impl AggregationRule {
    /// Compile `pattern`, anchored at the start of the identifier.
    pub fn new(pattern: &str, wms: bool) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&format!("^(?:{pattern})"))?,
            wms,
        })
    }

    pub fn matches(&self, drs_id: &str) -> bool {
        self.pattern.is_match(drs_id)
    }
}

/// Source of aggregation rules, keyed by dataset path.
pub trait AggregationRules {
    /// Rules for `path`, or `None` when nothing should be aggregated there.
    fn rules_for(&self, path: &str) -> Option<&[AggregationRule]>;
}

#[derive(Debug, Deserialize)]
struct RawRule {
    pattern: String,
    #[serde(default)]
    wms: bool,
}

#[derive(Debug, Deserialize)]
struct RawMapping {
    #[serde(default)]
    datasets: Vec<String>,
    #[serde(default)]
    aggregations: Vec<RawRule>,
}

/// Aggregation rules read from a directory of dataset mapping JSON files.
///
/// Each file lists dataset paths under `datasets` and the rules for all of
/// them under `aggregations`.
#[derive(Debug, Default)]
pub struct DatasetMappings {
    by_path: HashMap<String, Vec<AggregationRule>>,
}

impl DatasetMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, rules: Vec<AggregationRule>) {
        let path = path.into();
        self.by_path
            .insert(path.trim_end_matches('/').to_string(), rules);
    }

    /// Load every `*.json` file below `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let mut mappings = Self::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for entry in fs::read_dir(&current)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "json") {
                    mappings.load_file(&path)?;
                }
            }
        }
        info!(
            dir = %dir.display(),
            paths = mappings.by_path.len(),
            "[DISCOVERY] Loaded aggregation rules"
        );
        Ok(mappings)
    }

    fn load_file(&mut self, file: &Path) -> Result<(), std::io::Error> {
        let content = fs::read_to_string(file)?;
        let raw: RawMapping = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "[DISCOVERY] Skipping unreadable mapping file");
                return Ok(());
            }
        };
        if raw.aggregations.is_empty() {
            return Ok(());
        }

        let rules: Vec<AggregationRule> = raw
            .aggregations
            .iter()
            .filter_map(|r| match AggregationRule::new(&r.pattern, r.wms) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(file = %file.display(), pattern = %r.pattern, error = %e, "[DISCOVERY] Skipping invalid pattern");
                    None
                }
            })
            .collect();
        for path in raw.datasets {
            self.insert(path, rules.clone());
        }
        Ok(())
    }
}

impl AggregationRules for DatasetMappings {
    fn rules_for(&self, path: &str) -> Option<&[AggregationRule]> {
        let path = path.trim_end_matches('/');
        if let Some(rules) = self.by_path.get(path) {
            return Some(rules);
        }
        // fall back to the deepest mapped ancestor directory
        let mut prefix = path;
        while let Some((parent, _)) = prefix.rsplit_once('/') {
            if let Some(rules) = self.by_path.get(parent) {
                return Some(rules);
            }
            prefix = parent;
        }
        None
    }
}

pub struct DiscoveryQuery<'a> {
    index: &'a dyn CollectionsIndex,
    rules: &'a dyn AggregationRules,
}

impl<'a> DiscoveryQuery<'a> {
    pub fn new(index: &'a dyn CollectionsIndex, rules: &'a dyn AggregationRules) -> Self {
        Self { index, rules }
    }

    /// All candidates across every page, in page order.
    pub async fn run(&self) -> Result<Vec<DatasetCandidate>, RegistryError> {
        let mut candidates = Vec::new();
        let mut after = None;
        let mut pages = 0usize;

        loop {
            let page = self.index.published_page(after.take()).await?;
            pages += 1;
            let found = self.extract(&page);
            debug!(
                page = pages,
                buckets = page.buckets.len(),
                candidates = found.len(),
                "[DISCOVERY] Processed page"
            );
            candidates.extend(found);

            // an index may keep echoing its last key once it runs dry
            if page.buckets.is_empty() {
                break;
            }
            match page.after_key {
                Some(key) => after = Some(key),
                None => break,
            }
        }

        info!(pages, candidates = candidates.len(), "[DISCOVERY] Discovery complete");
        Ok(candidates)
    }

    /// Candidates contributed by a single page.
    pub fn extract(&self, page: &CompositePage) -> Vec<DatasetCandidate> {
        page.buckets
            .iter()
            .filter_map(|bucket| {
                let rules = self.rules.rules_for(&bucket.path)?;
                rules
                    .iter()
                    .find(|rule| rule.matches(&bucket.drs_id))
                    .map(|rule| DatasetCandidate::new(bucket.drs_id.clone(), rule.wms))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_anchored_at_start() {
        let rule = AggregationRule::new(r"esacci\.OC\..*", false).expect("regex");
        assert!(rule.matches("esacci.OC.day.L3S"));
        assert!(!rule.matches("x.esacci.OC.day"));
    }

    #[test]
    fn test_rules_fall_back_to_parent_path() {
        let mut mappings = DatasetMappings::new();
        mappings.insert(
            "/neodc/esacci/ocean_colour/",
            vec![AggregationRule::new("esacci", true).expect("regex")],
        );
        assert!(mappings.rules_for("/neodc/esacci/ocean_colour").is_some());
        assert!(mappings.rules_for("/neodc/esacci/ocean_colour/v4/daily").is_some());
        assert!(mappings.rules_for("/neodc/esacci/cloud").is_none());
    }
}
