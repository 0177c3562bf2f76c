//! Configuration path resolution and TOML loading
//!
//! Tests that touch SAM_TEST_CONFIG are marked #[serial] so environment
//! changes don't race between test threads.

use sam_common::config::{default_config_path, load_toml, resolve_config_path};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

const ENV_VAR: &str = "SAM_TEST_CONFIG";

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
struct SampleConfig {
    port: u16,
    name: String,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            name: "default".to_string(),
        }
    }
}

#[test]
#[serial]
fn cli_argument_has_highest_priority() {
    env::set_var(ENV_VAR, "/tmp/from-env.toml");

    let resolved = resolve_config_path(Some(Path::new("/tmp/from-cli.toml")), ENV_VAR, "x.toml");
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-cli.toml")));

    env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn env_var_beats_default() {
    env::set_var(ENV_VAR, "/tmp/from-env.toml");

    let resolved = resolve_config_path(None, ENV_VAR, "x.toml");
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));

    env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn falls_back_to_platform_default() {
    env::remove_var(ENV_VAR);

    let resolved = resolve_config_path(None, ENV_VAR, "dps.toml");
    assert_eq!(resolved, default_config_path("dps.toml"));
    if let Some(path) = resolved {
        assert!(path.ends_with("sam/dps.toml"));
    }
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg: SampleConfig = load_toml(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(cfg, SampleConfig::default());
}

#[test]
fn partial_file_keeps_defaults_for_other_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.toml");
    std::fs::write(&path, "port = 9000\n").unwrap();

    let cfg: SampleConfig = load_toml(Some(&path)).unwrap();
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.name, "default");
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "port = = 9000").unwrap();

    let result: sam_common::Result<SampleConfig> = load_toml(Some(&path));
    assert!(matches!(result, Err(sam_common::Error::Config(_))));
}
