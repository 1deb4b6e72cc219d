//! Typed template keys

use ingest_common::config::{KeyType, TemplateKeyConfig};
use ingest_common::{FieldValue, FrameSpec};

/// One placeholder key of a template
#[derive(Debug, Clone)]
pub struct TemplateKey {
    pub name: String,
    pub key_type: KeyType,
    /// Zero-padding width for int and sequence keys
    pub padding: usize,
    /// Restrict str values to ASCII letters and digits
    pub alphanumeric: bool,
    pub default: Option<FieldValue>,
}

impl TemplateKey {
    pub fn from_config(name: &str, config: &TemplateKeyConfig) -> Result<Self, String> {
        let padding = match &config.format_spec {
            Some(spec) => spec
                .parse::<usize>()
                .map_err(|_| format!("Key '{}': invalid format_spec '{}'", name, spec))?,
            None => 0,
        };

        let alphanumeric = match config.filter_by.as_deref() {
            None => false,
            Some("alphanumeric") => true,
            Some(other) => return Err(format!("Key '{}': unsupported filter_by '{}'", name, other)),
        };

        let default = config.default.as_ref().and_then(FieldValue::from_json);

        Ok(Self {
            name: name.to_string(),
            key_type: config.key_type,
            padding,
            alphanumeric,
            default,
        })
    }

    /// Regex fragment matching one value of this key (no capture group)
    pub fn pattern(&self) -> &'static str {
        match self.key_type {
            KeyType::Str if self.alphanumeric => "[A-Za-z0-9]+",
            KeyType::Str => "[^/]+?",
            KeyType::Int => r"\d+",
            KeyType::Sequence => r"(?:\d+|%0?\d*d|#+|\$F\d*|\*)",
        }
    }

    /// Render a value as it appears in a path
    pub fn render(&self, value: &FieldValue) -> Result<String, String> {
        match self.key_type {
            KeyType::Str => {
                let text = value.to_string();
                if text.is_empty() {
                    return Err(format!("Key '{}': empty value", self.name));
                }
                if text.contains('/') {
                    return Err(format!("Key '{}': value '{}' contains a path separator", self.name, text));
                }
                if self.alphanumeric && !text.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(format!("Key '{}': value '{}' is not alphanumeric", self.name, text));
                }
                Ok(text)
            }
            KeyType::Int => value
                .as_int()
                .map(|i| self.pad(i))
                .ok_or_else(|| format!("Key '{}': '{}' is not an integer", self.name, value)),
            KeyType::Sequence => match value {
                FieldValue::Frame(spec) => Ok(spec.render(self.padding)),
                other => {
                    if let Some(i) = other.as_int() {
                        return Ok(self.pad(i));
                    }
                    other
                        .as_str()
                        .and_then(FrameSpec::parse)
                        .map(|spec| spec.render(self.padding))
                        .ok_or_else(|| format!("Key '{}': '{}' is not a frame", self.name, other))
                }
            },
        }
    }

    /// Parse a matched token back into a value
    pub fn parse(&self, token: &str) -> Option<FieldValue> {
        match self.key_type {
            KeyType::Str => Some(FieldValue::Str(token.to_string())),
            KeyType::Int => token.parse::<i64>().ok().map(FieldValue::Int),
            KeyType::Sequence => match token.parse::<i64>() {
                Ok(frame) => Some(FieldValue::Int(frame)),
                Err(_) => FrameSpec::parse(token).map(FieldValue::Frame),
            },
        }
    }

    fn pad(&self, value: i64) -> String {
        format!("{:0width$}", value, width = self.padding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(key_type: KeyType, format_spec: Option<&str>) -> TemplateKey {
        let config = TemplateKeyConfig {
            key_type,
            format_spec: format_spec.map(str::to_string),
            filter_by: None,
            default: None,
        };
        TemplateKey::from_config("k", &config).unwrap()
    }

    #[test]
    fn test_int_pads_and_parses_any_width() {
        let version = key(KeyType::Int, Some("03"));
        assert_eq!(version.render(&FieldValue::Int(7)).unwrap(), "007");
        assert_eq!(version.render(&FieldValue::Int(1234)).unwrap(), "1234");
        assert_eq!(version.parse("7"), Some(FieldValue::Int(7)));
        assert_eq!(version.parse("0007"), Some(FieldValue::Int(7)));
        assert!(version.render(&FieldValue::from("abc")).is_err());
    }

    #[test]
    fn test_sequence_renders_frames_and_specs() {
        let seq = key(KeyType::Sequence, Some("04"));
        assert_eq!(seq.render(&FieldValue::Int(12)).unwrap(), "0012");
        assert_eq!(seq.render(&FieldValue::Frame(FrameSpec::Printf)).unwrap(), "%04d");
        assert_eq!(seq.render(&FieldValue::from("####")).unwrap(), "####");
        assert_eq!(seq.parse("%04d"), Some(FieldValue::Frame(FrameSpec::Printf)));
        assert_eq!(seq.parse("1001"), Some(FieldValue::Int(1001)));
    }

    #[test]
    fn test_alphanumeric_filter() {
        let config = TemplateKeyConfig {
            key_type: KeyType::Str,
            format_spec: None,
            filter_by: Some("alphanumeric".to_string()),
            default: None,
        };
        let name = TemplateKey::from_config("name", &config).unwrap();
        assert!(name.render(&FieldValue::from("bgplate")).is_ok());
        assert!(name.render(&FieldValue::from("bg_plate")).is_err());
    }
}
