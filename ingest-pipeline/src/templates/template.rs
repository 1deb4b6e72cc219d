//! Path template: render a field map into a path and parse a path back
//!
//! A definition such as `shots/{Shot}/v{version}/{Shot}.{SEQ}.exr` compiles
//! into an anchored regex with one capture group per placeholder. Parsing
//! requires a full match, and a key that occurs more than once must parse
//! to the same value at every occurrence.

use ingest_common::{FieldMap, FieldValue};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::key::TemplateKey;
use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Key(String),
}

/// A named, compiled path template
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    definition: String,
    segments: Vec<Segment>,
    keys: BTreeMap<String, TemplateKey>,
    regex: Regex,
    /// Capture group index (1-based) → key name
    group_keys: Vec<String>,
}

impl Template {
    /// Compile `definition`; a relative definition is placed under `root`
    pub fn new(
        name: &str,
        definition: &str,
        root: Option<&Path>,
        known_keys: &BTreeMap<String, TemplateKey>,
    ) -> Result<Self, String> {
        let definition = match root {
            Some(root) if !definition.starts_with('/') => {
                let root = normalize(&root.to_string_lossy());
                format!("{}/{}", root.trim_end_matches('/'), definition)
            }
            _ => definition.to_string(),
        };

        let segments = split_definition(&definition)?;

        let mut keys = BTreeMap::new();
        let mut pattern = String::from("^");
        let mut group_keys = Vec::new();
        for segment in &segments {
            match segment {
                Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
                Segment::Key(key_name) => {
                    let key = known_keys.get(key_name).ok_or_else(|| {
                        format!("Template '{}' uses undefined key '{}'", name, key_name)
                    })?;
                    pattern.push('(');
                    pattern.push_str(key.pattern());
                    pattern.push(')');
                    group_keys.push(key_name.clone());
                    keys.insert(key_name.clone(), key.clone());
                }
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern)
            .map_err(|e| format!("Template '{}' compiles to an invalid pattern: {}", name, e))?;

        Ok(Self {
            name: name.to_string(),
            definition,
            segments,
            keys,
            regex,
            group_keys,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Definition after root expansion
    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn keys(&self) -> &BTreeMap<String, TemplateKey> {
        &self.keys
    }

    pub fn key(&self, name: &str) -> Option<&TemplateKey> {
        self.keys.get(name)
    }

    /// Parse `path` into fields; `None` when it does not fully match
    pub fn get_fields(&self, path: &Path) -> Option<FieldMap> {
        let text = normalize(&path.to_string_lossy());
        let captures = self.regex.captures(&text)?;

        let mut fields = FieldMap::new();
        for (index, key_name) in self.group_keys.iter().enumerate() {
            let token = captures.get(index + 1)?.as_str();
            let key = self.keys.get(key_name)?;
            let value = key.parse(token)?;
            match fields.get(key_name) {
                Some(existing) if *existing != value => {
                    tracing::trace!(
                        template = %self.name,
                        key = %key_name,
                        "Repeated key parsed to different values"
                    );
                    return None;
                }
                _ => fields.insert(key_name.clone(), value),
            }
        }
        Some(fields)
    }

    pub fn validate(&self, path: &Path) -> bool {
        self.get_fields(path).is_some()
    }

    /// Parse `path` and require agreement with every key in `required`
    /// that the template also defines
    pub fn validate_and_get_fields(&self, path: &Path, required: &FieldMap) -> Option<FieldMap> {
        let fields = self.get_fields(path)?;
        for (key, expected) in required {
            if let (Some(actual), Some(template_key)) = (fields.get(key), self.keys.get(key)) {
                let same = match (template_key.render(actual), template_key.render(expected)) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => actual == expected,
                };
                if !same {
                    return None;
                }
            }
        }
        Some(fields)
    }

    /// Keys this template needs that `fields` does not provide
    pub fn missing_keys(&self, fields: &FieldMap, skip_defaults: bool) -> BTreeSet<String> {
        self.keys
            .values()
            .filter(|key| !fields.contains_key(&key.name))
            .filter(|key| !(skip_defaults && key.default.is_some()))
            .map(|key| key.name.clone())
            .collect()
    }

    /// Render `fields` into a path
    pub fn apply_fields(&self, fields: &FieldMap) -> IngestResult<PathBuf> {
        let missing = self.missing_keys(fields, true);
        if !missing.is_empty() {
            return Err(IngestError::Resolution {
                template: self.name.clone(),
                missing,
            });
        }

        let mut rendered = String::with_capacity(self.definition.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Key(key_name) => {
                    let Some(key) = self.keys.get(key_name) else {
                        continue;
                    };
                    let value: &FieldValue = match fields.get(key_name) {
                        Some(value) => value,
                        None => match &key.default {
                            Some(default) => default,
                            None => continue,
                        },
                    };
                    let text = key.render(value).map_err(IngestError::DataQuality)?;
                    rendered.push_str(&text);
                }
            }
        }

        Ok(PathBuf::from(rendered))
    }
}

/// Forward slashes only, so one definition serves every platform
fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

fn split_definition(definition: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut rest = definition;

    while let Some(open) = rest.find('{') {
        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| format!("Unbalanced '{{' in template definition '{}'", definition))?;
        let key_name = &after[..close];
        if key_name.is_empty() {
            return Err(format!("Empty key in template definition '{}'", definition));
        }
        segments.push(Segment::Key(key_name.to_string()));
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_common::config::{KeyType, TemplateKeyConfig};
    use ingest_common::FrameSpec;

    fn keys() -> BTreeMap<String, TemplateKey> {
        let mut keys = BTreeMap::new();
        let mut add = |name: &str, key_type: KeyType, format_spec: Option<&str>| {
            let config = TemplateKeyConfig {
                key_type,
                format_spec: format_spec.map(str::to_string),
                filter_by: None,
                default: None,
            };
            keys.insert(name.to_string(), TemplateKey::from_config(name, &config).unwrap());
        };
        add("Shot", KeyType::Str, None);
        add("name", KeyType::Str, None);
        add("version", KeyType::Int, Some("03"));
        add("SEQ", KeyType::Sequence, Some("04"));
        add("extension", KeyType::Str, None);
        keys
    }

    fn plate_template() -> Template {
        Template::new(
            "plate",
            "shots/{Shot}/v{version}/{Shot}_{name}_v{version}.{SEQ}.{extension}",
            Some(Path::new("/proj")),
            &keys(),
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let template = plate_template();
        let path = Path::new("/proj/shots/sh010/v003/sh010_bg_plate_v003.1001.exr");

        let fields = template.get_fields(path).unwrap();
        assert_eq!(fields.get_str("Shot"), Some("sh010"));
        assert_eq!(fields.get_str("name"), Some("bg_plate"));
        assert_eq!(fields.get_int("version"), Some(3));
        assert_eq!(fields.get_int("SEQ"), Some(1001));
        assert_eq!(fields.get_str("extension"), Some("exr"));

        assert_eq!(template.apply_fields(&fields).unwrap(), path);
    }

    #[test]
    fn test_repeated_key_must_agree() {
        let template = plate_template();
        assert!(template
            .get_fields(Path::new("/proj/shots/sh010/v003/sh020_bg_v003.1001.exr"))
            .is_none());
        assert!(template
            .get_fields(Path::new("/proj/shots/sh010/v003/sh010_bg_v004.1001.exr"))
            .is_none());
    }

    #[test]
    fn test_partial_match_rejected() {
        let template = plate_template();
        assert!(!template.validate(Path::new("/proj/shots/sh010/v003/extra/sh010_bg_v003.1001.exr")));
        assert!(!template.validate(Path::new("/other/shots/sh010/v003/sh010_bg_v003.1001.exr")));
    }

    #[test]
    fn test_missing_keys_reported() {
        let template = plate_template();
        let mut fields = FieldMap::new();
        fields.insert("Shot", "sh010");
        fields.insert("version", 1);

        match template.apply_fields(&fields) {
            Err(IngestError::Resolution { template, missing }) => {
                assert_eq!(template, "plate");
                let expected: BTreeSet<String> =
                    ["SEQ", "extension", "name"].iter().map(|s| s.to_string()).collect();
                assert_eq!(missing, expected);
            }
            other => panic!("Expected resolution error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_spec_rendering_and_parsing() {
        let template = plate_template();
        let mut fields = FieldMap::new();
        fields.insert("Shot", "sh010");
        fields.insert("name", "bg");
        fields.insert("version", 1);
        fields.insert("SEQ", FrameSpec::Printf);
        fields.insert("extension", "exr");

        let path = template.apply_fields(&fields).unwrap();
        assert_eq!(path, PathBuf::from("/proj/shots/sh010/v001/sh010_bg_v001.%04d.exr"));

        let parsed = template.get_fields(&path).unwrap();
        assert_eq!(parsed.get("SEQ"), Some(&FieldValue::Frame(FrameSpec::Printf)));
    }

    #[test]
    fn test_validate_and_get_fields_checks_required() {
        let template = plate_template();
        let path = Path::new("/proj/shots/sh010/v003/sh010_bg_v003.1001.exr");

        let mut required = FieldMap::new();
        required.insert("Shot", "sh010");
        assert!(template.validate_and_get_fields(path, &required).is_some());

        required.insert("Shot", "sh020");
        assert!(template.validate_and_get_fields(path, &required).is_none());
    }

    #[test]
    fn test_undefined_key_rejected() {
        let err = Template::new("bad", "{Nope}/file", None, &keys()).unwrap_err();
        assert!(err.contains("Nope"));
    }
}
