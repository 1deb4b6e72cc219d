//! Client notes from manifests
//!
//! Every link of a note is looked up through the identifier rules
//! configured for its entity type, within the context's project. A Version
//! link also links the Version's entity and puts its task on the note; a
//! Task link links the Task's entity and puts the Task on the note.
//! Attachments are registered as `Attachment` records pointing at the
//! delivered files.

use ingest_common::config::IngestConfig;
use ingest_common::events::{EventBus, LogLevel};
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use super::fs_ops;
use crate::error::{IngestError, IngestResult};
use crate::models::records::{ATTACHMENT_ENTITY, NOTE_ENTITY};
use crate::models::{ClientNote, Context, NoteRecord};
use crate::templates::TemplateSet;
use crate::tracking::{entity_id, entity_link, Entity, Filter, TrackingClient};

/// How one link key finds its entity
#[derive(Debug, Clone, PartialEq)]
enum IdentifierRule {
    /// `%field:relation%`: the link's value itself
    Value { field: String, relation: String },
    /// `#field:relation:template#`: the template rendered from note and context fields
    Template {
        field: String,
        relation: String,
        template: String,
    },
    /// `!fields_template:field:relation:template!`: the link's value parsed
    /// with `fields_template`, then rendered with `template`
    ParsedTemplate {
        fields_template: String,
        field: String,
        relation: String,
        template: String,
    },
}

impl IdentifierRule {
    fn parse(rule: &str) -> Option<Self> {
        let split = |marker: char| -> Option<Vec<String>> {
            let inner = rule.strip_prefix(marker)?.strip_suffix(marker)?;
            Some(inner.split(':').map(str::to_string).collect())
        };

        if let Some(parts) = split('%') {
            let [field, relation] = <[String; 2]>::try_from(parts).ok()?;
            return Some(IdentifierRule::Value { field, relation });
        }
        if let Some(parts) = split('#') {
            let [field, relation, template] = <[String; 3]>::try_from(parts).ok()?;
            return Some(IdentifierRule::Template {
                field,
                relation,
                template,
            });
        }
        let [fields_template, field, relation, template] = <[String; 4]>::try_from(split('!')?).ok()?;
        Some(IdentifierRule::ParsedTemplate {
            fields_template,
            field,
            relation,
            template,
        })
    }
}

fn relation_filter(field: &str, relation: &str, value: Value) -> Result<Filter, String> {
    match relation {
        "is" => Ok(Filter::is(field, value)),
        "is_not" => Ok(Filter::is_not(field, value)),
        other => Err(format!("unsupported relation '{}'", other)),
    }
}

/// Link with a display name, as notes store them
fn named_link(entity: &Entity) -> Value {
    let mut link = entity_link(entity);
    let name = ["code", "content", "name"]
        .iter()
        .find_map(|key| entity.get(*key).and_then(Value::as_str));
    if let (Some(name), Some(map)) = (name, link.as_object_mut()) {
        map.insert("name".to_string(), Value::from(name));
    }
    link
}

fn push_link(links: &mut Vec<Value>, link: Value) {
    let same = |other: &Value| other.get("type") == link.get("type") && other.get("id") == link.get("id");
    if !links.iter().any(same) {
        links.push(link);
    }
}

/// Linked entity of `field`, when it holds a link
fn linked(entity: &Entity, field: &str) -> Option<Value> {
    entity.get(field).filter(|value| value.is_object()).cloned()
}

/// Outcome of resolving the links of one note
#[derive(Debug, Clone, Default)]
pub struct NoteResolution {
    /// Tracking records the note will link, in link order
    pub entities: Vec<Entity>,
    pub warnings: Vec<String>,
    pub failures: Vec<String>,
}

impl NoteResolution {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct NoteRegistrar {
    config: Arc<IngestConfig>,
    templates: Arc<TemplateSet>,
    tracking: Arc<dyn TrackingClient>,
    event_bus: EventBus,
    /// Link key → anchored ignore patterns
    ignored: Vec<(String, Vec<Regex>)>,
}

impl NoteRegistrar {
    pub fn new(
        config: Arc<IngestConfig>,
        templates: Arc<TemplateSet>,
        tracking: Arc<dyn TrackingClient>,
        event_bus: EventBus,
    ) -> IngestResult<Self> {
        let ignored = config
            .notes
            .ignored_identifiers
            .iter()
            .map(|(key, patterns)| {
                let compiled = patterns
                    .iter()
                    .map(|pattern| {
                        Regex::new(&format!("^(?:{})", pattern)).map_err(|e| {
                            IngestError::Common(ingest_common::Error::Config(format!(
                                "Invalid ignore pattern '{}' for '{}': {}",
                                pattern, key, e
                            )))
                        })
                    })
                    .collect::<IngestResult<Vec<_>>>()?;
                Ok((key.clone(), compiled))
            })
            .collect::<IngestResult<Vec<_>>>()?;

        Ok(Self {
            config,
            templates,
            tracking,
            event_bus,
            ignored,
        })
    }

    /// Look up every link of `note`; problems are reported, not raised
    pub async fn resolve(&self, note: &ClientNote, context: &Context) -> IngestResult<NoteResolution> {
        let mut resolution = NoteResolution::default();

        for link in &note.links {
            let Some(entity_type) = link.get("type").and_then(Value::as_str) else {
                resolution.failures.push("Note link has no 'type'".to_string());
                continue;
            };

            if let Some(value) = self.ignored_value(link) {
                resolution
                    .warnings
                    .push(format!("Ignoring '{}' for {} link", value, entity_type));
                continue;
            }

            let Some(identifiers) = self.config.notes.entity_identifiers.get(entity_type) else {
                resolution
                    .failures
                    .push(format!("No identifiers configured for {} links", entity_type));
                continue;
            };

            let mut filters = vec![Filter::is("project", context.project.to_link())];
            let built: Result<Vec<Filter>, String> = identifiers
                .iter()
                .map(|(key, rule)| self.identifier_filter(key, rule, link, note, context))
                .collect();
            match built {
                Ok(built) => filters.extend(built),
                Err(message) => {
                    resolution.failures.push(format!("{} link: {}", entity_type, message));
                    continue;
                }
            }

            match self.tracking.find_one(entity_type, &filters, &[]).await? {
                Some(found) => {
                    tracing::debug!(entity_type, id = ?entity_id(&found), "Resolved note link");
                    resolution.entities.push(found);
                }
                None => resolution.failures.push(format!(
                    "No {} matches {}",
                    entity_type,
                    Value::Object(link.clone())
                )),
            }
        }

        for warning in &resolution.warnings {
            self.event_bus.log(LogLevel::Warning, "Note", format!("{}: {}", note.subject, warning));
        }
        for failure in &resolution.failures {
            self.event_bus.log(LogLevel::Error, "Note", format!("{}: {}", note.subject, failure));
        }
        if resolution.passed() {
            self.event_bus.log(
                LogLevel::Info,
                "Note",
                format!(
                    "A note will be created for '{}' linked to {} entit(ies)",
                    note.subject,
                    resolution.entities.len()
                ),
            );
        }
        Ok(resolution)
    }

    fn ignored_value(&self, link: &serde_json::Map<String, Value>) -> Option<String> {
        self.ignored.iter().find_map(|(key, patterns)| {
            let value = link.get(key).and_then(Value::as_str)?;
            patterns
                .iter()
                .any(|pattern| pattern.is_match(value))
                .then(|| value.to_string())
        })
    }

    fn identifier_filter(
        &self,
        key: &str,
        rule_text: &str,
        link: &serde_json::Map<String, Value>,
        note: &ClientNote,
        context: &Context,
    ) -> Result<Filter, String> {
        let rule = IdentifierRule::parse(rule_text)
            .ok_or_else(|| format!("invalid identifier rule '{}'", rule_text))?;
        let link_value = || {
            link.get(key)
                .filter(|value| !value.is_null())
                .cloned()
                .ok_or_else(|| format!("missing '{}'", key))
        };

        match rule {
            IdentifierRule::Value { field, relation } => relation_filter(&field, &relation, link_value()?),
            IdentifierRule::Template {
                field,
                relation,
                template,
            } => {
                let template = self.templates.get(&template).map_err(|e| e.to_string())?;
                let mut fields = note.fields.clone();
                fields.overlay(&context.as_template_fields(&template));
                let path = template.apply_fields(&fields).map_err(|e| e.to_string())?;
                relation_filter(&field, &relation, Value::from(path.to_string_lossy().into_owned()))
            }
            IdentifierRule::ParsedTemplate {
                fields_template,
                field,
                relation,
                template,
            } => {
                let fields_template = self.templates.get(&fields_template).map_err(|e| e.to_string())?;
                let value = link_value()?;
                let text = value.as_str().ok_or_else(|| format!("'{}' is not a path", key))?;
                let parsed = fields_template
                    .validate_and_get_fields(Path::new(text), &context.as_template_fields(&fields_template))
                    .ok_or_else(|| {
                        format!("'{}' does not match template '{}'", text, fields_template.name())
                    })?;

                let template = self.templates.get(&template).map_err(|e| e.to_string())?;
                let mut fields = note.fields.clone();
                fields.overlay(&context.as_template_fields(&template));
                fields.overlay(&parsed);
                let path = template.apply_fields(&fields).map_err(|e| e.to_string())?;
                relation_filter(&field, &relation, Value::from(path.to_string_lossy().into_owned()))
            }
        }
    }

    /// Create the note and its attachments
    ///
    /// Requires a passed `resolve`. Missing attachments are logged and
    /// skipped.
    pub async fn create(
        &self,
        note: &ClientNote,
        context: &Context,
        resolution: &NoteResolution,
    ) -> IngestResult<NoteRecord> {
        if !resolution.passed() {
            return Err(IngestError::DataQuality(format!(
                "Links of note '{}' are not resolved",
                note.subject
            )));
        }

        let mut links = Vec::new();
        let mut tasks = Vec::new();
        for entity in &resolution.entities {
            match entity.get("type").and_then(Value::as_str) {
                Some("Version") => {
                    push_link(&mut links, named_link(entity));
                    if let Some(parent) = linked(entity, "entity") {
                        push_link(&mut links, parent);
                    }
                    if let Some(task) = linked(entity, "sg_task") {
                        push_link(&mut tasks, task);
                    }
                }
                Some("Task") => {
                    if let Some(parent) = linked(entity, "entity") {
                        push_link(&mut links, parent);
                    }
                    push_link(&mut tasks, entity_link(entity));
                }
                _ => push_link(&mut links, named_link(entity)),
            }
        }

        let mut data = Entity::new();
        data.insert("subject".to_string(), Value::from(note.subject.as_str()));
        data.insert("content".to_string(), Value::from(note.content.as_str()));
        data.insert("project".to_string(), context.project.to_link());
        data.insert("note_links".to_string(), Value::from(links));
        data.insert("tasks".to_string(), Value::from(tasks));
        data.insert(
            "sg_note_type".to_string(),
            Value::from(
                note.note_type
                    .clone()
                    .unwrap_or_else(|| self.config.notes.default_note_type.clone()),
            ),
        );
        data.insert("created_at".to_string(), Value::from(chrono::Utc::now().to_rfc3339()));

        let created = self.tracking.create(NOTE_ENTITY, data).await?;
        let mut record = NoteRecord::from_entity(&created)
            .ok_or_else(|| IngestError::Remote(format!("Invalid note record for '{}'", note.subject)))?;

        for path in &note.attachments {
            if !path.is_file() {
                tracing::warn!(note = record.id, path = %path.display(), "Attachment missing");
                self.event_bus.log(
                    LogLevel::Warning,
                    "Note",
                    format!("File does not exist and will not be attached: {}", path.display()),
                );
                continue;
            }
            let size = tokio::fs::metadata(path).await?.len();
            let sha256 = fs_ops::sha256_file(path).await?;

            let mut attachment = Entity::new();
            attachment.insert(
                "this_file".to_string(),
                serde_json::json!({ "local_path": path.to_string_lossy() }),
            );
            attachment.insert("file_size".to_string(), Value::from(size));
            attachment.insert("sha256".to_string(), Value::from(sha256));
            attachment.insert("project".to_string(), context.project.to_link());
            attachment.insert(
                "attachment_links".to_string(),
                Value::from(vec![entity_link(&created)]),
            );
            let stored = self.tracking.create(ATTACHMENT_ENTITY, attachment).await?;
            if let Some(id) = entity_id(&stored) {
                record.attachment_ids.push(id);
            }
        }

        self.event_bus.log(
            LogLevel::Info,
            "Note",
            format!(
                "Note {} created for '{}' ({} link(s), {} attachment(s))",
                record.id,
                note.subject,
                record.links.len(),
                record.attachment_ids.len()
            ),
        );
        Ok(record)
    }
}
