// tests/config_loading.rs

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::NamedTempFile;

use runplane::config::{EngineConfig, load_and_validate, load_from_path, parse_duration};
use runplane::errors::EngineError;
use runplane::types::StoreMode;

type TestResult = Result<(), Box<dyn Error>>;

fn config_file(contents: &str) -> Result<NamedTempFile, std::io::Error> {
    let mut file = NamedTempFile::new()?;
    write!(file, "{contents}")?;
    Ok(file)
}

/// Load `contents` and return the configuration error message.
fn config_error(contents: &str) -> Result<String, Box<dyn Error>> {
    let file = config_file(contents)?;
    match load_and_validate(file.path()) {
        Err(EngineError::Config(message)) => Ok(message),
        other => Err(format!("expected a configuration error, got {other:?}").into()),
    }
}

#[test]
fn empty_file_yields_the_defaults() -> TestResult {
    let file = config_file("")?;
    let config = load_and_validate(file.path())?;
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.store.mode, StoreMode::Memory);
    assert_eq!(config.frameworks.call_timeout, Duration::from_secs(10));
    Ok(())
}

#[test]
fn full_file_is_validated_into_typed_settings() -> TestResult {
    let file = config_file(
        r#"
[engine]
dispatch_workers = 8
dispatch_queue = 16
monitor_interval = "500ms"
cluster_timeout = "2s"

[store]
mode = "file"
path = "/var/lib/runplane"

[cluster]
namespace = "ml-jobs"
name_prefix = "rp"
image_pull_policy = "Always"
labels = { team = "ml" }

[cluster.job]
backoff_limit = 3
active_deadline_seconds = 0
ttl_seconds_after_finished = 0

[runtimes]
registry = "registry.example.com/"

[runtimes.python]
base_image = "python:3.12-slim"
"#,
    )?;

    let config = load_and_validate(file.path())?;

    assert_eq!(config.engine.dispatch_workers, 8);
    assert_eq!(config.engine.dispatch_queue, 16);
    assert_eq!(config.engine.event_buffer, 256);
    assert_eq!(config.engine.monitor_interval, Duration::from_millis(500));
    assert_eq!(config.frameworks.call_timeout, Duration::from_secs(2));

    assert_eq!(config.store.mode, StoreMode::File);
    assert_eq!(config.store.path, PathBuf::from("/var/lib/runplane"));

    assert_eq!(config.frameworks.namespace, "ml-jobs");
    assert_eq!(config.frameworks.name_prefix, "rp");
    assert_eq!(config.frameworks.labels.get("team").map(String::as_str), Some("ml"));
    assert_eq!(config.frameworks.job.backoff_limit, 3);
    assert_eq!(config.frameworks.job.active_deadline_seconds, None);
    assert_eq!(config.frameworks.job.ttl_seconds_after_finished, None);

    assert_eq!(config.runtimes.registry, "registry.example.com");
    assert_eq!(config.runtimes.python.base_image, "python:3.12-slim");
    // Untouched keys of a partial table keep their defaults.
    assert_eq!(config.runtimes.python.source_image, "alpine/git:2.45.2");
    Ok(())
}

#[test]
fn zero_workers_is_rejected() -> TestResult {
    let message = config_error("[engine]\ndispatch_workers = 0\n")?;
    assert!(message.contains("[engine].dispatch_workers"), "message: {message}");
    assert!(message.contains(">= 1"), "message: {message}");
    Ok(())
}

#[test]
fn bad_durations_name_the_field() -> TestResult {
    let message = config_error("[engine]\nmonitor_interval = \"soon\"\n")?;
    assert!(message.contains("[engine].monitor_interval"), "message: {message}");

    let message = config_error("[engine]\ncluster_timeout = \"0s\"\n")?;
    assert!(message.contains("[engine].cluster_timeout"), "message: {message}");
    assert!(message.contains("greater than zero"), "message: {message}");
    Ok(())
}

#[test]
fn names_must_be_dns_labels() -> TestResult {
    let message = config_error("[cluster]\nnamespace = \"ML_Jobs\"\n")?;
    assert!(message.contains("[cluster].namespace"), "message: {message}");

    let message = config_error("[cluster]\nname_prefix = \"\"\n")?;
    assert!(message.contains("[cluster].name_prefix"), "message: {message}");
    Ok(())
}

#[test]
fn unknown_pull_policy_is_rejected() -> TestResult {
    let message = config_error("[cluster]\nimage_pull_policy = \"Sometimes\"\n")?;
    assert!(message.contains("image_pull_policy"), "message: {message}");
    Ok(())
}

#[test]
fn negative_job_values_are_rejected() -> TestResult {
    let message = config_error("[cluster.job]\nbackoff_limit = -1\n")?;
    assert!(message.contains("[cluster.job].backoff_limit"), "message: {message}");
    Ok(())
}

#[test]
fn file_store_needs_a_path() -> TestResult {
    let message = config_error("[store]\nmode = \"file\"\npath = \"\"\n")?;
    assert!(message.contains("[store].path"), "message: {message}");
    Ok(())
}

#[test]
fn empty_runtime_images_are_rejected() -> TestResult {
    let message = config_error("[runtimes.workflow]\nrunner_image = \" \"\n")?;
    assert!(message.contains("[runtimes.workflow].runner_image"), "message: {message}");
    Ok(())
}

#[test]
fn malformed_toml_is_a_parse_error() -> TestResult {
    let file = config_file("[engine\ndispatch_workers = 2")?;
    assert!(matches!(load_from_path(file.path()), Err(EngineError::Toml(_))));

    let file = config_file("[store]\nmode = \"s3\"\n")?;
    assert!(matches!(load_from_path(file.path()), Err(EngineError::Toml(_))));
    Ok(())
}

#[test]
fn missing_file_is_a_config_error() {
    let result = load_and_validate("/definitely/not/here/runplane.toml");
    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[test]
fn durations_accept_the_usual_units() {
    assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration(" 30s "), Ok(Duration::from_secs(30)));
    assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
    assert_eq!(parse_duration("2H"), Ok(Duration::from_secs(7200)));

    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("ms").is_err());
    assert!(parse_duration("3d").is_err());
}
