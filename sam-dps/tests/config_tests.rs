//! Configuration loading through the environment
//!
//! Tests that set SAM_DPS_* variables are marked #[serial] so they don't race
//! between test threads.

use clap::Parser;
use sam_dps::config::{Cli, DpsConfig, CONFIG_ENV_VAR};
use serial_test::serial;
use std::env;
use std::path::PathBuf;

#[test]
#[serial]
fn config_file_from_environment() {
    // Given: a TOML file named by SAM_DPS_CONFIG
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dps.toml");
    std::fs::write(
        &path,
        r#"
        [server]
        port = 6100

        [poller]
        wait_limit = 9
        "#,
    )
    .unwrap();
    env::set_var(CONFIG_ENV_VAR, &path);

    // When
    let config = DpsConfig::load(&Cli::default()).unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    // Then
    assert_eq!(config.server.port, 6100);
    assert_eq!(config.poller.wait_limit, 9);
    assert_eq!(config.queue.retries, 3);
}

#[test]
#[serial]
fn config_argument_beats_environment() {
    let dir = tempfile::tempdir().unwrap();
    let from_env = dir.path().join("env.toml");
    let from_arg = dir.path().join("arg.toml");
    std::fs::write(&from_env, "[server]\nport = 6100\n").unwrap();
    std::fs::write(&from_arg, "[server]\nport = 6200\n").unwrap();
    env::set_var(CONFIG_ENV_VAR, &from_env);

    let cli = Cli {
        config: Some(from_arg),
        ..Default::default()
    };
    let config = DpsConfig::load(&cli).unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.server.port, 6200);
}

#[test]
#[serial]
fn environment_overrides_file_values() {
    // Given: the file sets a port, the environment another
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dps.toml");
    std::fs::write(&path, "[server]\nport = 6100\n").unwrap();
    env::set_var("SAM_DPS_PORT", "6300");
    env::set_var("SAM_DPS_ARCHIVE_LOCATION", "/srv/archive");

    // When: parsed as the binary would
    let cli = Cli::parse_from(["sam-dps", "--config", path.to_str().unwrap()]);
    let config = DpsConfig::load(&cli);
    env::remove_var("SAM_DPS_PORT");
    env::remove_var("SAM_DPS_ARCHIVE_LOCATION");

    // Then
    let config = config.unwrap();
    assert_eq!(config.server.port, 6300);
    assert_eq!(config.storage.archive_location, PathBuf::from("/srv/archive"));
}

#[test]
#[serial]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dps.toml");
    std::fs::write(&path, "[server\nport = ").unwrap();

    let cli = Cli {
        config: Some(path),
        ..Default::default()
    };

    assert!(matches!(
        DpsConfig::load(&cli),
        Err(sam_common::Error::Config(_))
    ));
}
