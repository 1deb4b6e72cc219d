//! Configuration loading and config file resolution
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `INGEST_CONFIG` environment variable
//! 3. `~/.config/vfx-ingest/config.toml`
//! 4. Compiled defaults (fallback)
//!
//! A missing file at the environment or platform location is not an error:
//! the pipeline logs a warning and runs on compiled defaults. A file named
//! explicitly on the command line must exist.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "INGEST_CONFIG";

/// Directory name under the platform config dir
const CONFIG_DIR_NAME: &str = "vfx-ingest";

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine(PathBuf),
    Environment(PathBuf),
    UserConfig(PathBuf),
    CompiledDefaults,
}

/// Compiled default values used when no config file provides them
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub project_root: PathBuf,
    pub database_path: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|d| d.join(CONFIG_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("./vfx_ingest_data"));
        Self {
            project_root: PathBuf::from("."),
            database_path: data_dir.join("tracking.db"),
            log_level: "info".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: CompiledDefaults::for_current_platform().log_level,
        }
    }
}

/// Manifest handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// A candidate file is a manifest when its name contains this string
    pub file_name: String,
    /// Vendor field name → pipeline field name
    pub key_map: BTreeMap<String, String>,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        let key_map = [
            ("shot", "Shot"),
            ("sequence", "Sequence"),
            ("asset", "Asset"),
            ("step", "Step"),
            ("type", "snapshot_type"),
            ("snapshot_type", "snapshot_type"),
            ("version", "version"),
            ("name", "name"),
            ("vendor", "vendor"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            file_name: "manifest".to_string(),
            key_map,
        }
    }
}

/// Client notes carried by manifests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotesConfig {
    /// Link entity type → (link key → identifier rule)
    ///
    /// Rules: `%field:relation%` filters `field` by the link's value for the
    /// key; `#field:relation:template#` filters by the path the template
    /// renders from the note's fields; `!fields_template:field:relation:template!`
    /// first parses the link's value with `fields_template`.
    pub entity_identifiers: BTreeMap<String, BTreeMap<String, String>>,
    /// Link key → patterns; a link whose value matches one is ignored
    pub ignored_identifiers: BTreeMap<String, Vec<String>>,
    /// `sg_note_type` when the manifest gives none
    pub default_note_type: String,
}

impl Default for NotesConfig {
    fn default() -> Self {
        let by_code = |field: &str| {
            [(field.to_string(), format!("%{}:is%", field))]
                .into_iter()
                .collect::<BTreeMap<_, _>>()
        };
        let entity_identifiers = [
            ("Shot", by_code("code")),
            ("Sequence", by_code("code")),
            ("Asset", by_code("code")),
            ("Version", by_code("code")),
            ("Task", by_code("content")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            entity_identifiers,
            ignored_identifiers: BTreeMap::new(),
            default_note_type: "Client".to_string(),
        }
    }
}

/// Template key type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Str,
    Int,
    Sequence,
}

/// Declaration of one template key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateKeyConfig {
    #[serde(rename = "type")]
    pub key_type: KeyType,
    /// Zero padding for int and sequence keys, e.g. "03"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_spec: Option<String>,
    /// Character filter for str keys; only "alphanumeric" is recognized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl TemplateKeyConfig {
    fn new(key_type: KeyType) -> Self {
        Self {
            key_type,
            format_spec: None,
            filter_by: None,
            default: None,
        }
    }

    fn padded(key_type: KeyType, format_spec: &str) -> Self {
        Self {
            format_spec: Some(format_spec.to_string()),
            ..Self::new(key_type)
        }
    }
}

/// Template keys and named path definitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    pub keys: BTreeMap<String, TemplateKeyConfig>,
    pub paths: BTreeMap<String, String>,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        let mut keys = BTreeMap::new();
        for name in ["Project", "Sequence", "Shot", "Asset", "Step", "name", "extension", "vendor"] {
            keys.insert(name.to_string(), TemplateKeyConfig::new(KeyType::Str));
        }
        keys.insert(
            "snapshot_type".to_string(),
            TemplateKeyConfig {
                default: Some(serde_json::Value::String("plate".to_string())),
                ..TemplateKeyConfig::new(KeyType::Str)
            },
        );
        keys.insert("version".to_string(), TemplateKeyConfig::padded(KeyType::Int, "03"));
        keys.insert("SEQ".to_string(), TemplateKeyConfig::padded(KeyType::Sequence, "04"));
        keys.insert("YYYY".to_string(), TemplateKeyConfig::padded(KeyType::Int, "04"));
        keys.insert("MM".to_string(), TemplateKeyConfig::padded(KeyType::Int, "02"));
        keys.insert("DD".to_string(), TemplateKeyConfig::padded(KeyType::Int, "02"));

        let shot_root = "sequences/{Sequence}/{Shot}/{Step}";
        let versioned = "{name}/v{version}/{Shot}_{name}_v{version}";
        let paths = [
            (
                "vendor_image_work",
                format!("{shot_root}/work/{{snapshot_type}}/{versioned}.{{SEQ}}.{{extension}}"),
            ),
            (
                "vendor_image_publish",
                format!("{shot_root}/publish/{{snapshot_type}}/{versioned}.{{SEQ}}.{{extension}}"),
            ),
            (
                "vendor_file_publish",
                format!("{shot_root}/publish/{{snapshot_type}}/{versioned}.{{extension}}"),
            ),
            (
                "vendor_cdl_publish",
                format!("{shot_root}/publish/cdl/{{Shot}}_{{name}}_v{{version}}.cc"),
            ),
            (
                "incoming_image",
                "incoming/{YYYY}/{MM}/{DD}/{name}/{name}_v{version}.{SEQ}.{extension}".to_string(),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self { keys, paths }
    }
}

/// Per-kind publish settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemTypeConfig {
    /// Item kind name, e.g. "image", "render", "movie", "cdl"
    pub kind: String,
    /// Lowercase extensions without dot
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Published file type recorded on the publish
    pub publish_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_path_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_path_template: Option<String>,
    /// Publish template for single files when `publish_path_template`
    /// expects a frame sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_publish_path_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_snapshot_type: Option<String>,
}

impl ItemTypeConfig {
    /// Publish template for a sequence or a single file of this type
    pub fn publish_template_for(&self, is_sequence: bool) -> Option<&str> {
        match (&self.single_publish_path_template, is_sequence) {
            (Some(single), false) => Some(single),
            _ => self.publish_path_template.as_deref(),
        }
    }
}

fn default_item_types() -> Vec<ItemTypeConfig> {
    fn item(
        kind: &str,
        extensions: &[&str],
        publish_type: &str,
        work: Option<&str>,
        publish: &str,
        snapshot_type: Option<&str>,
    ) -> ItemTypeConfig {
        ItemTypeConfig {
            kind: kind.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            publish_type: publish_type.to_string(),
            work_path_template: work.map(str::to_string),
            publish_path_template: Some(publish.to_string()),
            single_publish_path_template: None,
            default_snapshot_type: snapshot_type.map(str::to_string),
        }
    }

    fn image(mut item_type: ItemTypeConfig) -> ItemTypeConfig {
        item_type.single_publish_path_template = Some("vendor_file_publish".to_string());
        item_type
    }

    vec![
        image(item(
            "image",
            &["exr", "dpx", "jpg", "jpeg", "png", "tif", "tiff"],
            "Image",
            None,
            "vendor_image_publish",
            Some("plate"),
        )),
        image(item("render", &[], "Rendered Image", None, "vendor_image_publish", Some("render"))),
        item("texture", &["tx"], "Texture", None, "vendor_file_publish", Some("texture")),
        item("movie", &["mov", "mp4"], "Movie", None, "vendor_file_publish", Some("movie")),
        item("cdl", &["cdl", "cc", "ccc"], "CDL", None, "vendor_cdl_publish", Some("cdl")),
        item("note", &["txt", "pdf"], "Note", None, "vendor_file_publish", Some("note")),
        item("geometry", &["abc", "obj", "fbx", "usd", "usda", "usdc"], "Geometry", None, "vendor_file_publish", Some("geometry")),
        item("scene", &["nk", "ma", "mb", "hip"], "Scene", None, "vendor_file_publish", Some("scene")),
    ]
}

fn default_step_lookup() -> BTreeMap<String, String> {
    ["Shot", "Sequence", "Asset"]
        .into_iter()
        .map(|t| (t.to_string(), "vendor".to_string()))
        .collect()
}

fn default_event_capacity() -> usize {
    1000
}

/// Top-level ingest configuration (TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Root that relative template definitions are resolved against
    pub project_root: PathBuf,
    /// Local tracking store; `None` means the compiled default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    pub manifest: ManifestConfig,
    pub notes: NotesConfig,
    /// Context entity type → step short name
    pub step_lookup: BTreeMap<String, String>,
    /// Step short name used when `step_lookup` has no entry
    pub default_step: String,
    /// Create the vendor task on the fly when the context has none
    pub auto_create_vendor_task: bool,
    /// Copy sources into the work area before publishing
    pub conform_enabled: bool,
    /// Field key → publish record field, copied when the key is present
    pub additional_publish_fields: BTreeMap<String, String>,
    pub templates: TemplatesConfig,
    pub item_types: Vec<ItemTypeConfig>,
    pub logging: LoggingConfig,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let defaults = CompiledDefaults::for_current_platform();
        Self {
            project_root: defaults.project_root,
            database: None,
            manifest: ManifestConfig::default(),
            notes: NotesConfig::default(),
            step_lookup: default_step_lookup(),
            default_step: "vendor".to_string(),
            auto_create_vendor_task: false,
            conform_enabled: true,
            additional_publish_fields: BTreeMap::new(),
            templates: TemplatesConfig::default(),
            item_types: default_item_types(),
            logging: LoggingConfig::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl IngestConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: IngestConfig = toml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; relative paths inside it resolve against its directory
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;

        if let Some(base) = path.parent() {
            if config.project_root.is_relative() {
                config.project_root = base.join(&config.project_root);
            }
            if let Some(db) = config.database.as_mut() {
                if db.is_relative() {
                    *db = base.join(&*db);
                }
            }
        }

        Ok(config)
    }

    /// Database path, falling back to the compiled default
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| CompiledDefaults::for_current_platform().database_path)
    }

    /// Step short name configured for a context entity type
    pub fn step_for_entity_type(&self, entity_type: &str) -> &str {
        self.step_lookup
            .get(entity_type)
            .map(String::as_str)
            .unwrap_or(&self.default_step)
    }

    /// Item type whose extension list contains `extension` (case-insensitive)
    pub fn item_type_for_extension(&self, extension: &str) -> Option<&ItemTypeConfig> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.item_types
            .iter()
            .find(|t| t.extensions.iter().any(|e| *e == ext))
    }

    pub fn item_type_for_kind(&self, kind: &str) -> Option<&ItemTypeConfig> {
        self.item_types.iter().find(|t| t.kind == kind)
    }

    fn normalize(&mut self) {
        for item_type in &mut self.item_types {
            for ext in &mut item_type.extensions {
                *ext = ext.trim_start_matches('.').to_ascii_lowercase();
            }
        }
    }

    /// Check internal references: every template named by an item type must exist
    pub fn validate(&self) -> Result<()> {
        if self.manifest.file_name.is_empty() {
            return Err(Error::Config("manifest.file_name must not be empty".to_string()));
        }
        for item_type in &self.item_types {
            for name in [
                &item_type.work_path_template,
                &item_type.publish_path_template,
                &item_type.single_publish_path_template,
            ]
            .into_iter()
            .flatten()
            {
                if !self.templates.paths.contains_key(name) {
                    return Err(Error::Config(format!(
                        "Item type '{}' references unknown template '{}'",
                        item_type.kind, name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Resolves and loads the configuration file
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        Self { cli_path }
    }

    /// Platform config file location, `~/.config/vfx-ingest/config.toml` on Linux
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join("config.toml"))
    }

    /// Determine which config file to use without reading it
    pub fn resolve_source(&self) -> ConfigSource {
        if let Some(path) = &self.cli_path {
            return ConfigSource::CommandLine(path.clone());
        }

        if let Ok(value) = std::env::var(CONFIG_ENV_VAR) {
            if !value.is_empty() {
                let path = PathBuf::from(value);
                if path.exists() {
                    return ConfigSource::Environment(path);
                }
                warn!(
                    path = %path.display(),
                    "{} points to a missing file, ignoring",
                    CONFIG_ENV_VAR
                );
            }
        }

        if let Some(path) = Self::user_config_path() {
            if path.exists() {
                return ConfigSource::UserConfig(path);
            }
        }

        ConfigSource::CompiledDefaults
    }

    /// Load the configuration following the resolution priority
    pub fn load(&self) -> Result<(IngestConfig, ConfigSource)> {
        let source = self.resolve_source();
        let config = match &source {
            ConfigSource::CommandLine(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                IngestConfig::load_from_file(path)?
            }
            ConfigSource::Environment(path) | ConfigSource::UserConfig(path) => {
                IngestConfig::load_from_file(path)?
            }
            ConfigSource::CompiledDefaults => {
                warn!("No config file found, using compiled defaults");
                IngestConfig::default()
            }
        };

        info!(source = ?source, "Configuration loaded");
        Ok((config, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IngestConfig::default();
        config.validate().unwrap();
        assert_eq!(config.manifest.file_name, "manifest");
        assert_eq!(config.step_for_entity_type("Shot"), "vendor");
        assert_eq!(config.step_for_entity_type("CustomEntity01"), "vendor");
    }

    #[test]
    fn test_extension_lookup_is_case_insensitive() {
        let config = IngestConfig::default();
        assert_eq!(config.item_type_for_extension("EXR").unwrap().kind, "image");
        assert_eq!(config.item_type_for_extension(".ccc").unwrap().kind, "cdl");
        assert!(config.item_type_for_extension("xyz").is_none());
    }

    #[test]
    fn test_unknown_template_reference_rejected() {
        let toml_str = r#"
[[item_types]]
kind = "image"
extensions = ["exr"]
publish_type = "Image"
publish_path_template = "does_not_exist"
"#;
        let err = IngestConfig::from_toml_str(toml_str).unwrap_err();
        assert!(err.to_string().contains("does_not_exist"));
    }
}
