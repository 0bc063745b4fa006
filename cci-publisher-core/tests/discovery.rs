use std::fs;

use cci_publisher_core::contract::{CompositeBucket, CompositePage, DatasetCandidate, MockCollectionsIndex};
use cci_publisher_core::discovery::{AggregationRule, AggregationRules, DatasetMappings, DiscoveryQuery};
use cci_publisher_core::error::RegistryError;
use serde_json::json;
use tempfile::tempdir;

fn bucket(drs_id: &str, path: &str) -> CompositeBucket {
    CompositeBucket {
        drs_id: drs_id.to_string(),
        path: path.to_string(),
    }
}

fn mappings() -> DatasetMappings {
    let mut mappings = DatasetMappings::new();
    mappings.insert(
        "/neodc/esacci/ocean_colour/data",
        vec![AggregationRule::new(r"esacci\.OC\.day\..*", true).unwrap()],
    );
    mappings.insert(
        "/neodc/esacci/cloud/data",
        vec![
            AggregationRule::new(r"esacci\.CLOUD\.mon\..*", false).unwrap(),
            AggregationRule::new(r"esacci\.CLOUD\..*", true).unwrap(),
        ],
    );
    mappings
}

#[tokio::test]
async fn test_discovery_walks_every_page() {
    let mut index = MockCollectionsIndex::new();
    index
        .expect_published_page()
        .withf(|after| after.is_none())
        .times(1)
        .returning(|_| {
            Ok(CompositePage {
                buckets: vec![
                    bucket("esacci.OC.day.L3S", "/neodc/esacci/ocean_colour/data/v4"),
                    bucket("esacci.OC.mon.L3S", "/neodc/esacci/ocean_colour/data/v4"),
                ],
                after_key: Some(json!({"drs": "esacci.OC.mon.L3S"})),
            })
        });
    index
        .expect_published_page()
        .withf(|after| after.as_ref() == Some(&json!({"drs": "esacci.OC.mon.L3S"})))
        .times(1)
        .returning(|_| {
            Ok(CompositePage {
                buckets: vec![bucket("esacci.CLOUD.mon.L3C", "/neodc/esacci/cloud/data")],
                after_key: Some(json!({"drs": "esacci.CLOUD.mon.L3C"})),
            })
        });
    index
        .expect_published_page()
        .withf(|after| after.as_ref() == Some(&json!({"drs": "esacci.CLOUD.mon.L3C"})))
        .times(1)
        .returning(|_| {
            Ok(CompositePage {
                buckets: vec![
                    bucket("esacci.CLOUD.day.L3U", "/neodc/esacci/cloud/data"),
                    bucket("esacci.SST.day.L4", "/neodc/esacci/sst/data"),
                ],
                after_key: None,
            })
        });

    let rules = mappings();
    let candidates = DiscoveryQuery::new(&index, &rules).run().await.unwrap();
    assert_eq!(
        candidates,
        vec![
            DatasetCandidate::new("esacci.OC.day.L3S", true),
            // first matching rule wins
            DatasetCandidate::new("esacci.CLOUD.mon.L3C", false),
            DatasetCandidate::new("esacci.CLOUD.day.L3U", true),
        ]
    );
}

#[tokio::test]
async fn test_discovery_stops_on_empty_page_even_with_a_key() {
    let mut index = MockCollectionsIndex::new();
    index
        .expect_published_page()
        .withf(|after| after.is_none())
        .times(1)
        .returning(|_| {
            Ok(CompositePage {
                buckets: vec![bucket("esacci.OC.day.L3S", "/neodc/esacci/ocean_colour/data")],
                after_key: Some(json!({"drs": "esacci.OC.day.L3S"})),
            })
        });
    index
        .expect_published_page()
        .withf(|after| after.is_some())
        .times(1)
        .returning(|_| {
            Ok(CompositePage {
                buckets: Vec::new(),
                after_key: Some(json!({"drs": "esacci.OC.day.L3S"})),
            })
        });

    let rules = mappings();
    let candidates = DiscoveryQuery::new(&index, &rules).run().await.unwrap();
    assert_eq!(candidates, vec![DatasetCandidate::new("esacci.OC.day.L3S", true)]);
}

#[tokio::test]
async fn test_discovery_failure_is_reported() {
    let mut index = MockCollectionsIndex::new();
    index
        .expect_published_page()
        .returning(|_| Err(RegistryError::Request("connection refused".to_string())));

    let rules = mappings();
    let err = DiscoveryQuery::new(&index, &rules).run().await.unwrap_err();
    assert!(matches!(err, RegistryError::Request(_)));
}

#[test]
fn test_mapping_directory_is_loaded_recursively() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("ocean_colour");
    fs::create_dir_all(&nested).unwrap();
    fs::write(
        nested.join("oc.json"),
        json!({
            "datasets": ["/neodc/esacci/ocean_colour/data/"],
            "aggregations": [
                {"pattern": "esacci\\.OC\\..*", "wms": true},
                {"pattern": "esacci\\.OC\\.(", "wms": false}
            ]
        })
        .to_string(),
    )
    .unwrap();
    fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
    fs::write(
        dir.path().join("sst.json"),
        json!({"datasets": ["/neodc/esacci/sst/data"]}).to_string(),
    )
    .unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let mappings = DatasetMappings::load_dir(dir.path()).unwrap();
    let rules = mappings
        .rules_for("/neodc/esacci/ocean_colour/data/v5/daily")
        .expect("rules for nested path");
    assert_eq!(rules.len(), 1, "invalid pattern is skipped");
    assert!(rules[0].wms);
    // a mapping without aggregation rules means "do not aggregate"
    assert!(mappings.rules_for("/neodc/esacci/sst/data").is_none());
}
