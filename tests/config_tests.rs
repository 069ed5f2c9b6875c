//! Config Tests
//!
//! Loading scatter.toml files from disk, typo detection, and range
//! validation, exercised independently from the planner and pipeline.

use scatter_decomp::config::validation::{known_config_keys, suggest_correction, validate_unknown_keys};
use scatter_decomp::config::{ConfigError, ScatterConfig};
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn full_config_file_loads() {
    let file = write_config(
        r#"
[decomposition]
utilization = 0.7
max_partition_bytes = 1048576

[decomposition.partitions]
automatic = false
size = 4

[pipeline]
staging_workers = 2
compute_workers = 6
marshal_workers = 2
buffers = 12

[output]
path = "out/spectra.jsonl"
"#,
    );

    let config = ScatterConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.decomposition.utilization, 0.7);
    assert_eq!(config.decomposition.max_partition_bytes, 1_048_576);
    assert!(!config.decomposition.partitions.automatic);
    assert_eq!(config.decomposition.partitions.size, 4);
    assert_eq!(config.pipeline.staging_workers, 2);
    assert_eq!(config.pipeline.compute_workers, 6);
    assert_eq!(config.pipeline.marshal_workers, 2);
    assert_eq!(config.pipeline.buffers, 12);
    assert_eq!(config.output.path, "out/spectra.jsonl");
}

#[test]
fn empty_file_gives_defaults() {
    let file = write_config("");
    let config = ScatterConfig::load_from_file(file.path()).unwrap();
    assert!(config.decomposition.partitions.automatic);
    assert_eq!(config.pipeline.staging_workers, 1);
    assert_eq!(config.pipeline.marshal_workers, 1);
    assert!(config.pipeline.compute_workers >= 1);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ScatterConfig::load_from_file(&dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn malformed_file_reports_its_path() {
    let file = write_config("[pipeline\ncompute_workers = ");
    match ScatterConfig::load_from_file(file.path()) {
        Err(ConfigError::Parse { path, .. }) => assert_eq!(path, file.path()),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn out_of_range_values_are_collected() {
    let file = write_config(
        r#"
[decomposition]
utilization = -0.1

[pipeline]
marshal_workers = 0
buffers = 0
"#,
    );
    match ScatterConfig::load_from_file(file.path()) {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors.len(), 3, "{errors:?}");
            assert!(errors.iter().any(|e| e.contains("marshal_workers")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn saved_config_loads_back() {
    let mut config = ScatterConfig::default();
    config.pipeline.compute_workers = 5;
    config.output.path = "elsewhere.jsonl".to_string();

    let file = write_config(&config.to_toml().unwrap());
    let loaded = ScatterConfig::load_from_file(file.path()).unwrap();
    assert_eq!(loaded.pipeline.compute_workers, 5);
    assert_eq!(loaded.output.path, "elsewhere.jsonl");
}

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_pipeline_section_suggests_key() {
    let warnings = validate_unknown_keys(
        r#"
[pipeline]
compute_wrokers = 4
"#,
    );
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].field.contains("compute_wrokers"));
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("pipeline.compute_workers")
    );
}

#[test]
fn unknown_keys_do_not_fail_loading() {
    let file = write_config(
        r#"
[output]
pth = "x.jsonl"
"#,
    );
    let config = ScatterConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.output.path, "spectra.jsonl");
}

#[test]
fn every_known_key_is_accepted() {
    let known = known_config_keys();
    assert!(known.contains("decomposition.partitions.size"));
    assert!(known.contains("pipeline.buffers"));
    assert_eq!(
        suggest_correction("decomposition.utilisation", &known).as_deref(),
        Some("decomposition.utilization")
    );
}
