//! Loading runs from TOML files on disk.

use std::fs;

use tokio_util::sync::CancellationToken;

use convoy::config::Config;
use convoy::orchestration::{RunOptions, Runner};
use convoy::Error;

use crate::fixtures::{memory_logger, ScriptedConnector, FLEET};

#[tokio::test]
async fn test_run_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("convoy.toml");
    fs::write(&path, FLEET).unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.connect_timeout().as_secs(), 5);
    assert_eq!(config.retry_policy().max_attempts, 2);

    let connector = ScriptedConnector::new();
    let (logger, _) = memory_logger();
    let report = Runner::new(config, connector.clone(), logger)
        .run(Some("db"), &RunOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.outcomes.len(), 3);
}

#[test]
fn test_cycle_in_file_is_rejected_before_any_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("convoy.toml");
    fs::write(
        &path,
        r#"
        [[tasks]]
        name = "migrate"
        cmd = "./migrate"
        depends_on = ["backup"]

        [[tasks]]
        name = "backup"
        cmd = "./backup"
        depends_on = ["migrate"]
        "#,
    )
    .unwrap();

    let err = Config::load_from(&path).unwrap_err();
    assert!(err.is_configuration());
    match err {
        Error::DependencyCycle { mut tasks } => {
            tasks.sort();
            assert_eq!(tasks, vec!["backup", "migrate"]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn test_duplicate_task_names_are_rejected() {
    let result = Config::from_toml_str(
        r#"
        [[tasks]]
        name = "build"
        cmd = "make"

        [[tasks]]
        name = "build"
        cmd = "cargo build"
        "#,
    );
    assert!(matches!(result, Err(Error::DuplicateTask(name)) if name == "build"));
}
