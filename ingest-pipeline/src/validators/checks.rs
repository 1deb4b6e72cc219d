//! Standard publish checks

use async_trait::async_trait;
use ingest_common::EntityRef;

use super::{CheckEnv, CheckResult, PublishCheck};
use crate::error::IngestResult;
use crate::models::{IngestItem, ItemKind, ItemSource};
use crate::services::cdl::{self, CANONICAL_CDL_NAME};
use crate::services::conform_engine::{destination_conflicts, template_fields};
use crate::services::path_info;
use crate::tracking::{entity_id, queries, Filter};

/// Task name used for vendor deliveries
pub const VENDOR_TASK: &str = "Vendor";

/// The item needs a context entity and a task
///
/// Without a task, the step is looked up and, when enabled, a Vendor task
/// is requested from the publish stage. An existing Vendor task must be
/// picked explicitly.
pub struct ContextCheck;

#[async_trait]
impl PublishCheck for ContextCheck {
    fn name(&self) -> &'static str {
        "context"
    }

    async fn check(&self, env: &CheckEnv<'_>, item: &mut IngestItem) -> IngestResult<CheckResult> {
        let Some(entity) = item.context.entity.clone() else {
            return Ok(CheckResult::fail(self.name(), "No Shot, Sequence or Asset in context"));
        };
        let entity_name = entity.name.clone().unwrap_or_else(|| entity.id.to_string());

        if let Some(task) = &item.context.task {
            return Ok(CheckResult::pass(
                self.name(),
                format!("Task {}", task.name.as_deref().unwrap_or("?")),
            ));
        }

        let step = match item.context.step.clone() {
            Some(step) => step,
            None => {
                let short_name = item
                    .fields
                    .get_str("Step")
                    .map(str::to_string)
                    .unwrap_or_else(|| env.config.step_for_entity_type(&entity.entity_type).to_string());
                let filters = [
                    Filter::is("short_name", short_name.as_str()),
                    Filter::is("entity_type", entity.entity_type.as_str()),
                ];
                match env.tracking.find_one("Step", &filters, &[]).await? {
                    Some(found) => match entity_id(&found) {
                        Some(id) => EntityRef::new("Step", id, short_name),
                        None => {
                            return Ok(CheckResult::fail(self.name(), "Step record has no id"));
                        }
                    },
                    None => {
                        return Ok(CheckResult::fail(
                            self.name(),
                            format!("No '{}' step for {}", short_name, entity.entity_type),
                        ));
                    }
                }
            }
        };
        item.context.step = Some(step.clone());

        let filters = [
            Filter::is("entity", entity.to_link()),
            Filter::is("content", VENDOR_TASK),
        ];
        if let Some(existing) = env.tracking.find_one("Task", &filters, &[]).await? {
            return Ok(CheckResult::fail(
                self.name(),
                format!(
                    "{} already has a '{}' task (id {}); select it as the context",
                    entity_name,
                    VENDOR_TASK,
                    entity_id(&existing).unwrap_or_default()
                ),
            ));
        }

        if !env.config.auto_create_vendor_task {
            return Ok(CheckResult::fail(
                self.name(),
                format!("No task in context for {} and Vendor task creation is disabled", entity_name),
            ));
        }

        item.properties.pending_vendor_task = Some(step);
        Ok(CheckResult::pass(
            self.name(),
            format!("A {} task will be created for {} on publish", VENDOR_TASK, entity_name),
        ))
    }
}

/// Source files are on disk
pub struct SourceExistsCheck;

#[async_trait]
impl PublishCheck for SourceExistsCheck {
    fn name(&self) -> &'static str {
        "source"
    }

    async fn check(&self, _env: &CheckEnv<'_>, item: &mut IngestItem) -> IngestResult<CheckResult> {
        let result = match &item.source {
            ItemSource::File(path) if path.is_file() => CheckResult::pass(self.name(), "File exists"),
            ItemSource::File(path) => {
                CheckResult::fail(self.name(), format!("File does not exist: {}", path.display()))
            }
            ItemSource::Sequence(group) if group.file_list.is_empty() => CheckResult::fail(
                self.name(),
                format!("File sequence does not exist: {}", group.sequence_path.display()),
            ),
            ItemSource::Sequence(group) => {
                let missing = group.file_list.iter().filter(|p| !p.is_file()).count();
                if missing > 0 {
                    CheckResult::fail(
                        self.name(),
                        format!("{} frame(s) of {} are missing", missing, group.sequence_path.display()),
                    )
                } else {
                    CheckResult::pass(self.name(), format!("{} frames", group.file_list.len()))
                }
            }
        };
        Ok(result)
    }
}

/// Resolves publish type, path, name and version
pub struct PublishPathCheck;

#[async_trait]
impl PublishCheck for PublishPathCheck {
    fn name(&self) -> &'static str {
        "publish_path"
    }

    async fn check(&self, env: &CheckEnv<'_>, item: &mut IngestItem) -> IngestResult<CheckResult> {
        let Some(item_type) = env.config.item_type_for_kind(item.kind.as_str()) else {
            return Ok(CheckResult::fail(
                self.name(),
                format!("No publish settings for '{}' items", item.kind),
            ));
        };
        let Some(template_name) = item_type.publish_template_for(item.is_sequence()).map(str::to_string) else {
            return Ok(CheckResult::fail(
                self.name(),
                format!("No publish template for '{}' items", item.kind),
            ));
        };
        let template = match env.templates.get(&template_name) {
            Ok(template) => template,
            Err(e) => return Ok(CheckResult::fail(self.name(), e.to_string())),
        };

        let mut fields = template_fields(item, &template);
        if item.kind == ItemKind::Cdl {
            fields.insert("name", CANONICAL_CDL_NAME);
        }
        let path_version = fields.get_int("version");

        // Render once to learn the publish name, which carries no version
        let candidate = match template.apply_fields(&fields) {
            Ok(path) => path,
            Err(e) => {
                return Ok(CheckResult::fail(self.name(), format!("Cannot resolve publish path: {}", e)));
            }
        };
        let publish_name = path_info::publish_name(&candidate, item.is_sequence());

        let version =
            queries::next_publish_version(env.tracking, &item.context, &publish_name, path_version).await?;
        fields.insert("version", version);
        let publish_path = match template.apply_fields(&fields) {
            Ok(path) => path,
            Err(e) => {
                return Ok(CheckResult::fail(self.name(), format!("Cannot resolve publish path: {}", e)));
            }
        };

        let message = format!("{} v{} -> {}", publish_name, version, publish_path.display());
        item.properties.publish_type = Some(item_type.publish_type.clone());
        item.properties.publish_template = Some(template_name);
        item.properties.publish_name = Some(publish_name);
        item.properties.publish_version = Some(version);
        item.properties.publish_path = Some(publish_path);
        item.properties.thumbnail_path = item.thumbnail_source().map(|p| p.to_path_buf());
        item.fields.overlay(&fields);

        Ok(CheckResult::pass(self.name(), message))
    }
}

/// Active publishes of the same file are reported, not blocked
pub struct ConflictingPublishCheck;

#[async_trait]
impl PublishCheck for ConflictingPublishCheck {
    fn name(&self) -> &'static str {
        "conflicting_publishes"
    }

    async fn check(&self, env: &CheckEnv<'_>, item: &mut IngestItem) -> IngestResult<CheckResult> {
        let (Some(name), Some(path)) = (&item.properties.publish_name, &item.properties.publish_path) else {
            return Ok(CheckResult::fail(self.name(), "Publish path not resolved"));
        };

        let conflicts = queries::conflicting_publishes(env.tracking, &item.context, name, path).await?;
        if conflicts.is_empty() {
            return Ok(CheckResult::pass(self.name(), "No conflicting publishes"));
        }

        let listing = conflicts
            .iter()
            .map(|c| format!("#{} v{} {}", c.id, c.version_number, c.path.display()))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::warn!(item = %item.name, conflicts = %listing, "Found conflicting publishes");

        let message = format!(
            "{} conflicting publish(es) will no longer be available: {}",
            conflicts.len(),
            listing
        );
        item.properties.conflicting_publishes = conflicts;
        Ok(CheckResult::warn(self.name(), message))
    }
}

/// Nothing exists yet at the publish path
pub struct DestinationCheck;

#[async_trait]
impl PublishCheck for DestinationCheck {
    fn name(&self) -> &'static str {
        "destination"
    }

    async fn check(&self, _env: &CheckEnv<'_>, item: &mut IngestItem) -> IngestResult<CheckResult> {
        let Some(path) = &item.properties.publish_path else {
            return Ok(CheckResult::fail(self.name(), "Publish path not resolved"));
        };

        let existing = destination_conflicts(path)?;
        if existing.is_empty() {
            return Ok(CheckResult::pass(self.name(), "Publish path is free"));
        }

        Ok(CheckResult::fail(
            self.name(),
            format!(
                "Version {} already exists on disk ({} file(s) at {})",
                item.properties.publish_version.unwrap_or_default(),
                existing.len(),
                path.display()
            ),
        ))
    }
}

/// Plate media whose plate is still marked in progress
pub struct PlateStatusCheck;

#[async_trait]
impl PublishCheck for PlateStatusCheck {
    fn name(&self) -> &'static str {
        "plate_status"
    }

    async fn check(&self, env: &CheckEnv<'_>, item: &mut IngestItem) -> IngestResult<CheckResult> {
        if !item.kind.is_plate_kind() {
            return Ok(CheckResult::pass(self.name(), "Not plate media"));
        }
        let Some(code) = &item.properties.publish_name else {
            return Ok(CheckResult::fail(self.name(), "Publish name not resolved"));
        };

        match queries::find_plate(env.tracking, &item.context, code).await? {
            Some(plate) if plate.is_active() => Ok(CheckResult::warn(
                self.name(),
                format!(
                    "Plate '{}' has status '{}'",
                    plate.code,
                    plate.status.as_deref().unwrap_or_default()
                ),
            )),
            Some(plate) => Ok(CheckResult::pass(self.name(), format!("Plate {} will be updated", plate.id))),
            None => Ok(CheckResult::pass(self.name(), format!("Plate '{}' will be created", code))),
        }
    }
}

/// CDL documents hold exactly one complete correction
pub struct CdlCheck;

#[async_trait]
impl PublishCheck for CdlCheck {
    fn name(&self) -> &'static str {
        "cdl"
    }

    async fn check(&self, _env: &CheckEnv<'_>, item: &mut IngestItem) -> IngestResult<CheckResult> {
        if item.kind != ItemKind::Cdl {
            return Ok(CheckResult::pass(self.name(), "Not a CDL"));
        }
        let Some(path) = item.path().map(|p| p.to_path_buf()) else {
            return Ok(CheckResult::fail(self.name(), "CDL must be a single file"));
        };

        match cdl::read_cdl(&path) {
            Ok(data) => {
                let message = format!("Correction '{}' is complete", data.id);
                item.properties.cdl = Some(data);
                Ok(CheckResult::pass(self.name(), message))
            }
            Err(e) => Ok(CheckResult::fail(self.name(), e.to_string())),
        }
    }
}
