use std::collections::BTreeSet;

use cci_publisher_core::catalog::{
    standard_metadata, write_replacing, CatalogDocument, ServiceKind, PUBLISHED_FILE_MODE,
};
use cci_publisher_core::contract::{AggregationSummary, CatalogContext, CatalogRef, CatalogTemplater};
use cci_publisher_core::templates::{catalog_ref, DefaultCatalogTemplater};
use cci_publisher_core::xml::Element;
use std::path::Path;

fn rendered(id: &str) -> CatalogDocument {
    let templater = DefaultCatalogTemplater::new().with_restrict_access("esacci");
    let xml = templater
        .dataset_catalog(&CatalogContext {
            services: BTreeSet::from([ServiceKind::Http, ServiceKind::Opendap]),
            dataset_id: id.to_string(),
            aggregation: Some(AggregationSummary {
                file_count: 3,
                total_size: 300,
            }),
        })
        .expect("render");
    CatalogDocument::parse(&xml).expect("rendered catalog parses")
}

#[test]
fn test_rendered_catalog_shape() {
    let doc = rendered("esacci.OC.day.L3S");
    assert_eq!(doc.dataset_id().unwrap(), "esacci.OC.day.L3S");
    assert_eq!(
        doc.top_level_dataset().attr("restrictAccess"),
        Some("esacci")
    );

    let compound = doc.root().children_named("service").next().expect("compound");
    assert_eq!(compound.attr("serviceType"), Some("Compound"));
    let inner: Vec<_> = compound
        .children_named("service")
        .map(|s| s.attr("name").unwrap_or_default().to_string())
        .collect();
    assert_eq!(inner, vec!["http", "opendap"]);

    let size = doc
        .top_level_dataset()
        .children_named("dataSize")
        .next()
        .expect("dataSize");
    assert_eq!(size.text(), "300");
    let children: Vec<_> = doc
        .top_level_dataset()
        .elements()
        .map(|e| e.name.clone())
        .collect();
    assert_eq!(children, vec!["dataSize"]);
}

#[test]
fn test_metadata_is_single_instance() {
    let mut doc = rendered("esacci.OC.day.L3S");
    doc.insert_metadata(standard_metadata());
    doc.insert_metadata(standard_metadata());
    assert_eq!(
        doc.top_level_dataset().children_named("metadata").count(),
        1
    );
}

#[test]
fn test_metadata_replaces_existing_block_in_place() {
    let xml = r#"<catalog xmlns="http://www.unidata.ucar.edu/namespaces/thredds/InvCatalog/v1.0">
  <dataset name="d" ID="d">
    <metadata><dataType>Point</dataType></metadata>
    <property name="a" value="1"/>
    <metadata><dataType>Station</dataType></metadata>
  </dataset>
</catalog>"#;
    let mut doc = CatalogDocument::parse(xml).unwrap();
    doc.insert_metadata(standard_metadata());

    let names: Vec<_> = doc
        .top_level_dataset()
        .elements()
        .map(|e| e.name.clone())
        .collect();
    assert_eq!(names, vec!["metadata", "property"]);
    let metadata = doc
        .top_level_dataset()
        .children_named("metadata")
        .next()
        .unwrap();
    assert_eq!(metadata.attr("inherited"), Some("true"));
    assert_eq!(
        metadata.children_named("dataType").next().map(Element::text),
        Some("Grid".to_string())
    );
}

#[test]
fn test_access_and_datasets_are_not_duplicated() {
    let mut doc = rendered("esacci.OC.day.L3S");
    doc.add_access("opendap", "esacci.OC.day.L3S");
    doc.add_access("opendap", "esacci.OC.day.L3S");
    doc.attach_dataset(Element::new("dataset").with_attr("ID", "esacci.OC.day.L3S"));
    doc.attach_dataset(
        Element::new("dataset")
            .with_attr("ID", "esacci.OC.day.L3S")
            .with_attr("urlPath", "esacci.OC.day.L3S"),
    );

    let top = doc.top_level_dataset();
    assert_eq!(top.children_named("access").count(), 1);
    let nested: Vec<_> = doc.second_level_datasets().collect();
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].attr("urlPath"), Some("esacci.OC.day.L3S"));
}

#[test]
fn test_written_document_reads_back_identically() {
    let mut doc = rendered("esacci.OC.day.L3S");
    doc.strip_restrict_access();
    doc.insert_metadata(standard_metadata());
    doc.insert_service(ServiceKind::Wms);

    let first = doc.to_xml().unwrap();
    let second = CatalogDocument::parse(&first).unwrap().to_xml().unwrap();
    assert_eq!(first, second);
    assert!(first.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
}

#[test]
fn test_root_catalog_references_each_dataset() {
    let root = Path::new("/repo/data/catalog");
    let refs: Vec<CatalogRef> = [
        "/repo/data/catalog/datasets/esacci.A.xml",
        "/repo/data/catalog/datasets/esacci.B.xml",
        "/elsewhere/esacci.C.xml",
    ]
    .iter()
    .filter_map(|p| catalog_ref(Path::new(p), root))
    .collect();
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0].href, "datasets/esacci.A.xml");
    assert_eq!(refs[0].name, "esacci.A");

    let xml = DefaultCatalogTemplater::new()
        .root_catalog("CCI", &refs)
        .unwrap();
    let parsed = Element::parse(&xml).unwrap();
    let hrefs: Vec<_> = parsed
        .children_named("catalogRef")
        .map(|r| r.attr("xlink:href").unwrap_or_default().to_string())
        .collect();
    assert_eq!(hrefs, vec!["datasets/esacci.A.xml", "datasets/esacci.B.xml"]);
}

#[cfg(unix)]
#[test]
fn test_written_catalog_is_readable_by_other_users() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("datasets").join("esacci.A.b.xml");
    write_replacing(&path, "<catalog/>").unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, PUBLISHED_FILE_MODE);

    // replacing an existing file keeps the mode too
    write_replacing(&path, "<catalog name=\"x\"/>").unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o644);
}
