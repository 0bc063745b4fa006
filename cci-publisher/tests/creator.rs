#![cfg(unix)]

use cci_publisher::creator::CommandAggregationCreator;
use cci_publisher_core::contract::{AggregationCreator, AggregationRequest};
use cci_publisher_core::error::AggregationError;

/// A creator running `sh -c <script> creator <subcommand args..>`.
fn scripted(script: &str) -> CommandAggregationCreator {
    CommandAggregationCreator::new("sh", vec!["-c".to_string(), script.to_string(), "creator".to_string()])
}

fn request(cache: bool) -> AggregationRequest {
    AggregationRequest {
        dataset_id: "esacci.OC.day.L3S".to_string(),
        thredds_url: "cci-thredds.example.org".to_string(),
        dimension: "time".to_string(),
        files: vec!["/data/a.nc".to_string(), "/data/b.nc".to_string()],
        cache,
    }
}

#[test]
fn test_create_args() {
    let creator = CommandAggregationCreator::new("cci-aggregate", vec!["--verbose".to_string()]);
    assert_eq!(
        creator.create_args(&request(false)),
        vec![
            "--verbose",
            "create",
            "--id",
            "esacci.OC.day.L3S",
            "--thredds-url",
            "cci-thredds.example.org",
            "--dimension",
            "time",
            "--no-cache",
        ]
    );
    assert_eq!(
        creator.probe_args("/data/a.nc", "time"),
        vec!["--verbose", "probe", "--dimension", "time", "/data/a.nc"]
    );
}

#[tokio::test]
async fn test_files_go_in_and_ncml_comes_out() {
    let creator = scripted(r#"echo "<netcdf args=\"$*\">"; cat; echo "</netcdf>""#);
    let ncml = creator.create_aggregation(&request(true)).await.unwrap();

    assert!(ncml.starts_with("<netcdf args=\"create --id esacci.OC.day.L3S"));
    assert!(!ncml.contains("--no-cache"));
    let a = ncml.find("/data/a.nc").expect("first file");
    let b = ncml.find("/data/b.nc").expect("second file");
    assert!(a < b, "file order is preserved");
}

#[tokio::test]
async fn test_failing_create_is_an_aggregation_error() {
    let creator = scripted("cat >/dev/null; echo 'no time axis' >&2; exit 2");
    let err = creator.create_aggregation(&request(true)).await.unwrap_err();
    match err {
        AggregationError::Build(message) => assert!(message.contains("no time axis")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_failing_probe_is_a_coordinates_error() {
    let creator = scripted("echo 'time is not a coordinate' >&2; exit 1");
    let err = creator.probe_coordinates("/data/a.nc", "time").await.unwrap_err();
    assert!(matches!(err, AggregationError::Coordinates(ref m) if m == "time is not a coordinate"));

    let ok = scripted("exit 0");
    ok.probe_coordinates("/data/a.nc", "time").await.unwrap();
}
