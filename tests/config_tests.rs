use std::io::Write;
use tracksure::Config;

#[test]
fn test_file_and_environment_layers() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("tracksure.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"
[geofence]
radius_meters = 60.0

[storage]
backend = "file"
position_log_dir = "/var/lib/tracksure/positions"

[tracking]
ingest_timeout_ms = 500
"#
    )
    .unwrap();

    std::env::set_var("TRACKSURE__TRACKING__INGEST_TIMEOUT_MS", "750");
    std::env::set_var("TRACKSURE__KAFKA__BROKERS", "kafka-1:9092,kafka-2:9092");

    let base = temp_dir.path().join("tracksure");
    let config = Config::load(base.to_str().unwrap()).unwrap();

    std::env::remove_var("TRACKSURE__TRACKING__INGEST_TIMEOUT_MS");
    std::env::remove_var("TRACKSURE__KAFKA__BROKERS");

    assert_eq!(config.geofence.radius_meters, 60.0);
    assert_eq!(config.storage.backend, "file");
    assert_eq!(config.tracking.ingest_timeout_ms, 750);
    assert_eq!(config.tracking.publish_timeout_ms, 250);
    assert_eq!(config.kafka.brokers, vec!["kafka-1:9092", "kafka-2:9092"]);
}
