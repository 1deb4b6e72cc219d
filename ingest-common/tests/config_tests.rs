//! Tests for configuration loading and graceful degradation
//!
//! Uses serial_test to prevent environment variable races: tests that
//! touch INGEST_CONFIG are marked #[serial].

use ingest_common::config::{
    CompiledDefaults, ConfigResolver, ConfigSource, IngestConfig, KeyType, CONFIG_ENV_VAR,
};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.database_path.as_os_str().is_empty());
    assert_eq!(defaults.log_level, "info");
    assert!(defaults
        .database_path
        .to_string_lossy()
        .ends_with("tracking.db"));
}

#[test]
#[serial]
fn test_cli_argument_takes_precedence_over_env() {
    let temp_dir = TempDir::new().unwrap();
    let cli_config = temp_dir.path().join("cli.toml");
    let env_config = temp_dir.path().join("env.toml");
    fs::write(&cli_config, "conform_enabled = false\n").unwrap();
    fs::write(&env_config, "conform_enabled = true\n").unwrap();

    env::set_var(CONFIG_ENV_VAR, &env_config);
    let resolver = ConfigResolver::new(Some(cli_config.clone()));
    let (config, source) = resolver.load().unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(source, ConfigSource::CommandLine(cli_config));
    assert!(!config.conform_enabled);
}

#[test]
#[serial]
fn test_env_var_used_without_cli_argument() {
    let temp_dir = TempDir::new().unwrap();
    let env_config = temp_dir.path().join("env.toml");
    fs::write(&env_config, "auto_create_vendor_task = true\n").unwrap();

    env::set_var(CONFIG_ENV_VAR, &env_config);
    let (config, source) = ConfigResolver::new(None).load().unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(source, ConfigSource::Environment(env_config));
    assert!(config.auto_create_vendor_task);
}

#[test]
#[serial]
fn test_missing_env_file_does_not_error() {
    env::set_var(CONFIG_ENV_VAR, "/nonexistent/vfx-ingest/config.toml");
    let result = ConfigResolver::new(None).load();
    env::remove_var(CONFIG_ENV_VAR);

    let (_, source) = result.expect("Missing env config must degrade gracefully");
    assert!(!matches!(source, ConfigSource::Environment(_)));
}

#[test]
#[serial]
fn test_missing_cli_file_is_an_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let resolver = ConfigResolver::new(Some("/nonexistent/ingest.toml".into()));
    assert!(resolver.load().is_err());
}

#[test]
fn test_relative_paths_resolve_against_config_dir() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
project_root = "project"
database = "db/tracking.db"
"#,
    )
    .unwrap();

    let config = IngestConfig::load_from_file(&path).unwrap();
    assert_eq!(config.project_root, temp_dir.path().join("project"));
    assert_eq!(config.database_path(), temp_dir.path().join("db/tracking.db"));
}

#[test]
fn test_partial_config_keeps_defaults() {
    let toml_str = r#"
[manifest]
file_name = "delivery"

[manifest.key_map]
shot_code = "Shot"

[logging]
level = "debug"
"#;
    let config = IngestConfig::from_toml_str(toml_str).unwrap();

    assert_eq!(config.manifest.file_name, "delivery");
    assert_eq!(config.manifest.key_map.get("shot_code").unwrap(), "Shot");
    assert_eq!(config.logging.level, "debug");
    // Untouched sections fall back to compiled defaults
    assert!(config.templates.paths.contains_key("vendor_image_publish"));
    assert_eq!(config.templates.keys["version"].key_type, KeyType::Int);
    assert!(config.item_type_for_kind("cdl").is_some());
}

#[test]
fn test_custom_templates_and_item_types() {
    let toml_str = r#"
[templates.keys.Shot]
type = "str"

[templates.keys.version]
type = "int"
format_spec = "04"

[templates.keys.frame]
type = "sequence"
format_spec = "05"

[templates.paths]
plate_publish = "shots/{Shot}/v{version}/{Shot}.{frame}.exr"

[[item_types]]
kind = "image"
extensions = [".EXR"]
publish_type = "Plate"
publish_path_template = "plate_publish"
"#;
    let config = IngestConfig::from_toml_str(toml_str).unwrap();

    assert_eq!(config.templates.keys.len(), 3);
    assert_eq!(config.item_types.len(), 1);
    assert_eq!(config.item_types[0].extensions, vec!["exr".to_string()]);
    assert_eq!(config.item_type_for_extension("exr").unwrap().publish_type, "Plate");
}

#[test]
fn test_toml_roundtrip() {
    let config = IngestConfig::default();
    let toml_str = toml::to_string(&config).unwrap();
    let parsed = IngestConfig::from_toml_str(&toml_str).unwrap();

    assert_eq!(parsed.templates.paths, config.templates.paths);
    assert_eq!(parsed.item_types.len(), config.item_types.len());
    assert_eq!(parsed.step_lookup, config.step_lookup);
}

#[test]
fn test_single_files_get_their_own_publish_template() {
    let config = IngestConfig::default();

    let image = config.item_type_for_kind("image").unwrap();
    assert_eq!(image.publish_template_for(true), Some("vendor_image_publish"));
    assert_eq!(image.publish_template_for(false), Some("vendor_file_publish"));

    let movie = config.item_type_for_kind("movie").unwrap();
    assert_eq!(movie.publish_template_for(false), Some("vendor_file_publish"));
}

#[test]
fn test_notes_section_and_unknown_single_template() {
    let toml_str = r#"
[notes]
default_note_type = "Internal"

[notes.entity_identifiers.Version]
code = "%code:is%"

[notes.ignored_identifiers]
code = ["temp_.*"]
"#;
    let config = IngestConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(config.notes.default_note_type, "Internal");
    assert_eq!(config.notes.entity_identifiers.len(), 1);
    assert_eq!(config.notes.ignored_identifiers["code"], vec!["temp_.*".to_string()]);

    let broken = r#"
[[item_types]]
kind = "image"
publish_type = "Plate"
publish_path_template = "vendor_image_publish"
single_publish_path_template = "nowhere"
"#;
    assert!(IngestConfig::from_toml_str(broken).is_err());
}
