//! Vendor manifest parsing
//!
//! A manifest is a YAML or JSON document with a top-level `snapshots` list.
//! Each snapshot carries free-form vendor keys plus a `file_types` map:
//!
//! ```yaml
//! snapshots:
//!   - name: shot010_comp
//!     shot: sh010
//!     type: comp
//!     file_types:
//!       main:
//!         files:
//!           - path: delivery/shot010_comp.0001.exr
//!         frame_range: [1, 24]
//!       notes:
//!         files:
//!           - path: delivery/notes.txt
//! ```
//!
//! Vendor keys are renamed through `[manifest.key_map]`. A role with a
//! `frame_range` contributes the directory of its representative file, so
//! the directory can be scanned for the whole sequence.
//!
//! A snapshot may also list `dependencies` (paths every publish of the
//! snapshot depends on) and carry a client note: `note_links` (a list of
//! link mappings such as `{type: Shot, code: sh010}`) with `content`,
//! optional `attachments` and optional `note_type`.

use ingest_common::config::ManifestConfig;
use ingest_common::{FieldMap, FieldValue};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::path_info::sanitize;
use crate::models::{ClientNote, Snapshot};

/// Fields whose values are sanitized after remapping
const SANITIZED_FIELDS: [&str; 2] = ["name", "snapshot_type"];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in manifest {path}: {message}")]
    Yaml { path: PathBuf, message: String },

    #[error("Invalid JSON in manifest {path}: {message}")]
    Json { path: PathBuf, message: String },

    #[error("Manifest {0} has no 'snapshots' list")]
    MissingSnapshots(PathBuf),

    #[error("Invalid manifest {path}: {message}")]
    Invalid { path: PathBuf, message: String },

    #[error("Unsupported manifest format: {0}")]
    UnsupportedFormat(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Yaml,
    Json,
}

impl ManifestFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "yml" | "yaml" => Some(ManifestFormat::Yaml),
            "json" => Some(ManifestFormat::Json),
            _ => None,
        }
    }
}

/// File name contains `manifest_file_name` and has a manifest extension
pub fn is_manifest(path: &Path, manifest_file_name: &str) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    !manifest_file_name.is_empty()
        && name.contains(manifest_file_name)
        && ManifestFormat::from_path(path).is_some()
}

/// Parses manifests into snapshots
pub struct ManifestParser {
    key_map: BTreeMap<String, String>,
}

impl ManifestParser {
    pub fn new(config: &ManifestConfig) -> Self {
        Self {
            key_map: config.key_map.clone(),
        }
    }

    /// Read and parse a manifest file
    ///
    /// Relative file paths resolve against the manifest's directory.
    pub fn parse(&self, path: &Path) -> Result<Vec<Snapshot>, ManifestError> {
        let format = ManifestFormat::from_path(path)
            .ok_or_else(|| ManifestError::UnsupportedFormat(path.to_path_buf()))?;
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));

        let snapshots = self.parse_str(&text, format, base_dir, path)?;
        tracing::debug!(
            manifest = %path.display(),
            snapshots = snapshots.len(),
            "Parsed manifest"
        );
        Ok(snapshots)
    }

    /// Parse manifest text; `origin` only labels errors
    pub fn parse_str(
        &self,
        text: &str,
        format: ManifestFormat,
        base_dir: &Path,
        origin: &Path,
    ) -> Result<Vec<Snapshot>, ManifestError> {
        let document: Value = match format {
            ManifestFormat::Yaml => serde_yaml::from_str(text).map_err(|e| ManifestError::Yaml {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?,
            ManifestFormat::Json => serde_json::from_str(text).map_err(|e| ManifestError::Json {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?,
        };

        let raw_snapshots = document
            .get("snapshots")
            .and_then(Value::as_array)
            .ok_or_else(|| ManifestError::MissingSnapshots(origin.to_path_buf()))?;

        raw_snapshots
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                let object = raw.as_object().ok_or_else(|| ManifestError::Invalid {
                    path: origin.to_path_buf(),
                    message: format!("snapshot {} is not a mapping", index),
                })?;
                self.snapshot(object, base_dir).map_err(|message| ManifestError::Invalid {
                    path: origin.to_path_buf(),
                    message: format!("snapshot {}: {}", index, message),
                })
            })
            .collect()
    }

    fn snapshot(&self, raw: &Map<String, Value>, base_dir: &Path) -> Result<Snapshot, String> {
        let mut snapshot = Snapshot::default();

        for (key, value) in raw {
            if key == "file_types" || key == "files" {
                continue;
            }
            let mapped = self.key_map.get(key).cloned().unwrap_or_else(|| key.clone());
            let Some(mut field) = FieldValue::from_json(value) else {
                tracing::trace!(key = %key, "Skipping non-scalar manifest value");
                continue;
            };
            if SANITIZED_FIELDS.contains(&mapped.as_str()) {
                if let Some(text) = field.as_str() {
                    field = FieldValue::Str(sanitize(text.trim()));
                }
            }
            snapshot.fields.insert(mapped, field);
        }

        if let Some(files) = raw.get("files") {
            collect_plain_files(files, base_dir, &mut snapshot.files)?;
        }

        if let Some(file_types) = raw.get("file_types") {
            let roles = file_types
                .as_object()
                .ok_or_else(|| "'file_types' must be a mapping".to_string())?;
            for (role, entry) in roles {
                collect_role(role, entry, base_dir, &mut snapshot.files)?;
            }
        }

        if let Some(dependencies) = raw.get("dependencies") {
            snapshot.dependencies = path_list(dependencies, base_dir, "dependencies")?;
        }

        if let Some(links) = raw.get("note_links") {
            snapshot.note = Some(note(raw, links, &snapshot.fields, base_dir)?);
        }

        Ok(snapshot)
    }
}

fn resolve(base_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn add_tags(files: &mut BTreeMap<PathBuf, Vec<String>>, path: PathBuf, tags: &[String]) {
    let entry = files.entry(path).or_default();
    for tag in tags {
        if !entry.contains(tag) {
            entry.push(tag.clone());
        }
    }
}

fn tag_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(|t| sanitize(t.trim()))
                .collect()
        })
        .unwrap_or_default()
}

/// `files:` written directly on the snapshot, either `{path: [tags]}` or `[path]`
fn collect_plain_files(
    value: &Value,
    base_dir: &Path,
    files: &mut BTreeMap<PathBuf, Vec<String>>,
) -> Result<(), String> {
    match value {
        Value::Object(map) => {
            for (path, tags) in map {
                add_tags(files, resolve(base_dir, path), &tag_list(Some(tags)));
            }
        }
        Value::Array(list) => {
            for path in list {
                let path = file_entry_path(path).ok_or("entries of 'files' need a path")?;
                add_tags(files, resolve(base_dir, path), &[]);
            }
        }
        _ => return Err("'files' must be a mapping or a list".to_string()),
    }
    Ok(())
}

fn file_entry_path(entry: &Value) -> Option<&str> {
    match entry {
        Value::String(path) => Some(path),
        Value::Object(map) => map.get("path").and_then(Value::as_str),
        _ => None,
    }
}

fn path_list(value: &Value, base_dir: &Path, key: &str) -> Result<Vec<PathBuf>, String> {
    let entries = value
        .as_array()
        .ok_or_else(|| format!("'{}' must be a list", key))?;
    entries
        .iter()
        .map(|entry| {
            file_entry_path(entry)
                .map(|path| resolve(base_dir, path))
                .ok_or_else(|| format!("entries of '{}' need a path", key))
        })
        .collect()
}

fn note(
    raw: &Map<String, Value>,
    links: &Value,
    fields: &FieldMap,
    base_dir: &Path,
) -> Result<ClientNote, String> {
    let links = links
        .as_array()
        .ok_or("'note_links' must be a list")?
        .iter()
        .map(|link| {
            link.as_object()
                .cloned()
                .ok_or_else(|| "entries of 'note_links' must be mappings".to_string())
        })
        .collect::<Result<Vec<_>, _>>()?;
    let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);

    Ok(ClientNote {
        subject: text("name").unwrap_or_else(|| "Client note".to_string()),
        content: text("content").unwrap_or_default(),
        note_type: text("note_type"),
        links,
        attachments: match raw.get("attachments") {
            Some(value) => path_list(value, base_dir, "attachments")?,
            None => Vec::new(),
        },
        fields: fields.clone(),
    })
}

fn collect_role(
    role: &str,
    entry: &Value,
    base_dir: &Path,
    files: &mut BTreeMap<PathBuf, Vec<String>>,
) -> Result<(), String> {
    let entry = entry
        .as_object()
        .ok_or_else(|| format!("file type '{}' must be a mapping", role))?;

    let is_sequence = entry.get("frame_range").is_some_and(|range| !range.is_null());
    let mut tags = vec![role.to_string()];
    tags.extend(tag_list(entry.get("tags")));

    let paths = entry
        .get("files")
        .and_then(Value::as_array)
        .ok_or_else(|| format!("file type '{}' has no 'files' list", role))?;

    for file in paths {
        let path = file_entry_path(file)
            .ok_or_else(|| format!("file type '{}' has an entry without a path", role))?;
        let path = resolve(base_dir, path);
        let key = if is_sequence {
            match path.parent() {
                Some(dir) => dir.to_path_buf(),
                None => path,
            }
        } else {
            path
        };
        add_tags(files, key, &tags);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ManifestParser {
        ManifestParser::new(&ManifestConfig::default())
    }

    const YAML: &str = r#"
snapshots:
  - name: "shot010 comp"
    shot: sh010
    type: plate
    description: first delivery
    file_types:
      main:
        files:
          - path: delivery/shot010_comp.0001.exr
        frame_range: [1, 24]
      notes:
        files:
          - path: delivery/notes.txt
"#;

    #[test]
    fn test_yaml_remaps_and_flattens() {
        let snapshots = parser()
            .parse_str(YAML, ManifestFormat::Yaml, Path::new("/in"), Path::new("/in/manifest.yml"))
            .unwrap();

        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.fields.get_str("name"), Some("shot010_comp"));
        assert_eq!(snapshot.fields.get_str("Shot"), Some("sh010"));
        assert_eq!(snapshot.fields.get_str("snapshot_type"), Some("plate"));
        // Unmapped keys pass through
        assert_eq!(snapshot.fields.get_str("description"), Some("first delivery"));

        assert_eq!(snapshot.files.len(), 2);
        assert_eq!(snapshot.files[Path::new("/in/delivery")], vec!["main".to_string()]);
        assert_eq!(snapshot.files[Path::new("/in/delivery/notes.txt")], vec!["notes".to_string()]);
    }

    #[test]
    fn test_json_and_absolute_paths() {
        let json = r#"{"snapshots": [{"name": "grade", "version": 3,
            "file_types": {"cdl": {"files": [{"path": "/abs/grade.cc"}]}}}]}"#;
        let snapshots = parser()
            .parse_str(json, ManifestFormat::Json, Path::new("/in"), Path::new("/in/manifest.json"))
            .unwrap();

        assert_eq!(snapshots[0].fields.get_int("version"), Some(3));
        assert!(snapshots[0].files.contains_key(Path::new("/abs/grade.cc")));
    }

    #[test]
    fn test_missing_snapshots_is_error() {
        let result = parser().parse_str(
            "deliveries: []",
            ManifestFormat::Yaml,
            Path::new("/in"),
            Path::new("/in/manifest.yml"),
        );
        assert!(matches!(result, Err(ManifestError::MissingSnapshots(_))));

        let result = parser().parse_str(
            "snapshots: [",
            ManifestFormat::Yaml,
            Path::new("/in"),
            Path::new("/in/manifest.yml"),
        );
        assert!(matches!(result, Err(ManifestError::Yaml { .. })));
    }

    #[test]
    fn test_note_and_dependencies() {
        let yaml = r#"
snapshots:
  - name: comp notes
    content: "Grain is too strong in the bg"
    note_links:
      - type: Shot
        code: sh010
      - type: Version
        code: sh010_comp_v003
    attachments:
      - notes/markup.png
    dependencies:
      - /proj/sh010/layout_v002.abc
"#;
        let snapshots = parser()
            .parse_str(yaml, ManifestFormat::Yaml, Path::new("/in"), Path::new("/in/manifest.yml"))
            .unwrap();

        let snapshot = &snapshots[0];
        assert!(snapshot.files.is_empty());
        assert_eq!(snapshot.dependencies, vec![PathBuf::from("/proj/sh010/layout_v002.abc")]);

        let note = snapshot.note.as_ref().unwrap();
        assert_eq!(note.subject, "comp notes");
        assert_eq!(note.content, "Grain is too strong in the bg");
        assert_eq!(note.links.len(), 2);
        assert_eq!(note.links[1]["code"], "sh010_comp_v003");
        assert_eq!(note.attachments, vec![PathBuf::from("/in/notes/markup.png")]);
        assert_eq!(note.fields.get_str("name"), Some("comp_notes"));

        let bad = "snapshots:\n  - name: x\n    note_links: [sh010]\n";
        let result = parser().parse_str(bad, ManifestFormat::Yaml, Path::new("/in"), Path::new("/in/manifest.yml"));
        assert!(matches!(result, Err(ManifestError::Invalid { .. })));
    }

    #[test]
    fn test_is_manifest() {
        assert!(is_manifest(Path::new("/in/vendor_manifest.yml"), "manifest"));
        assert!(is_manifest(Path::new("/in/manifest.JSON"), "manifest"));
        assert!(!is_manifest(Path::new("/in/manifest.txt"), "manifest"));
        assert!(!is_manifest(Path::new("/in/shots.yml"), "manifest"));
    }
}
