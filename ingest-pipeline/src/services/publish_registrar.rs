//! Publish registration
//!
//! `validate` resolves where and as what an item will be published,
//! `publish` copies the files and creates the `PublishedFile` record (plus
//! the plate for image media), `finalize` supersedes older versions and
//! announces the result.

use ingest_common::config::IngestConfig;
use ingest_common::events::{EventBus, IngestEvent, LogLevel};
use ingest_common::EntityRef;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use super::cdl::{self, CdlData, CANONICAL_CDL_NAME};
use super::conform_engine::{copy_plan, sequence_padding};
use super::fs_ops;
use crate::error::{IngestError, IngestResult};
use crate::models::records::{PLATE_ENTITY, PUBLISH_ENTITY, STATUS_COMPLETE, STATUS_IN_PROGRESS};
use crate::models::{IngestItem, ItemKind, PlateRecord, PublishRecord};
use crate::templates::TemplateSet;
use crate::tracking::{entity_id, queries, Entity, Filter, TrackingClient};
use crate::validators::checks::VENDOR_TASK;
use crate::validators::{default_checks, run_checks, CheckEnv, PublishCheck, ValidationReport};

/// What finalize changed
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeReport {
    pub record_id: i64,
    /// Publishes whose status was cleared
    pub superseded: Vec<i64>,
}

/// One async mutex per (project id, plate code)
#[derive(Default)]
struct PlateLocks {
    locks: Mutex<HashMap<(i64, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl PlateLocks {
    fn lock_for(&self, project_id: i64, code: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry((project_id, code.to_string()))
            .or_default()
            .clone()
    }
}

pub struct PublishRegistrar {
    config: Arc<IngestConfig>,
    templates: Arc<TemplateSet>,
    tracking: Arc<dyn TrackingClient>,
    event_bus: EventBus,
    checks: Vec<Box<dyn PublishCheck>>,
    plate_locks: PlateLocks,
}

impl PublishRegistrar {
    pub fn new(
        config: Arc<IngestConfig>,
        templates: Arc<TemplateSet>,
        tracking: Arc<dyn TrackingClient>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            config,
            templates,
            tracking,
            event_bus,
            checks: default_checks(),
            plate_locks: PlateLocks::default(),
        }
    }

    pub fn tracking(&self) -> &Arc<dyn TrackingClient> {
        &self.tracking
    }

    /// Run the validation chain; failures are reported, not raised
    pub async fn validate(&self, item: &mut IngestItem) -> IngestResult<ValidationReport> {
        let env = CheckEnv {
            config: &self.config,
            templates: &self.templates,
            tracking: self.tracking.as_ref(),
        };
        let report = run_checks(&self.checks, &env, item).await?;

        for warning in report.warnings() {
            self.event_bus.log(LogLevel::Warning, "Validate", format!("{}: {}", item.name, warning));
        }
        if report.passed() {
            self.event_bus.log(
                LogLevel::Info,
                "Validate",
                format!(
                    "A publish will be created for '{}' at {}",
                    item.name,
                    item.properties
                        .publish_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                ),
            );
        } else {
            for failure in report.failures() {
                self.event_bus.log(LogLevel::Error, "Validate", format!("{}: {}", item.name, failure));
            }
        }
        Ok(report)
    }

    /// Copy the item to its publish path and register it
    ///
    /// Requires a passed `validate`.
    pub async fn publish(&self, item: &mut IngestItem) -> IngestResult<PublishRecord> {
        let (Some(publish_path), Some(publish_name), Some(version)) = (
            item.properties.publish_path.clone(),
            item.properties.publish_name.clone(),
            item.properties.publish_version,
        ) else {
            return Err(IngestError::DataQuality(format!(
                "Item '{}' has not been validated",
                item.name
            )));
        };

        self.create_vendor_task(item).await?;

        if item.kind == ItemKind::Cdl {
            self.write_cdl(item, &publish_path).await?;
        } else {
            self.copy_to_publish(item, &publish_path).await?;
        }

        let data = self.publish_data(item, &publish_path, &publish_name, version);
        let entity = self.tracking.create(PUBLISH_ENTITY, data).await?;
        let record = PublishRecord::from_entity(&entity)
            .ok_or_else(|| IngestError::Remote(format!("Invalid publish record for {}", publish_name)))?;
        item.properties.publish_record = Some(record.clone());

        if item.kind.is_plate_kind() {
            let plate = self.register_plate(item, &record).await?;
            item.properties.plate = Some(plate);
            self.event_bus.log(
                LogLevel::Info,
                "Publish",
                format!("Publish {} registered and linked to plate '{}'", record.id, publish_name),
            );
        } else {
            self.event_bus.log(
                LogLevel::Info,
                "Publish",
                format!("Publish {} registered: {} v{}", record.id, publish_name, version),
            );
        }

        Ok(record)
    }

    /// Create the Vendor task validation asked for and put it in the context
    async fn create_vendor_task(&self, item: &mut IngestItem) -> IngestResult<()> {
        if item.context.task.is_some() {
            return Ok(());
        }
        let (Some(step), Some(entity)) = (item.properties.pending_vendor_task.clone(), item.context.entity.clone())
        else {
            return Ok(());
        };

        let filters = [
            Filter::is("entity", entity.to_link()),
            Filter::is("content", VENDOR_TASK),
        ];
        let mut data = Entity::new();
        data.insert("content".to_string(), Value::from(VENDOR_TASK));
        data.insert("project".to_string(), item.context.project.to_link());
        data.insert("entity".to_string(), entity.to_link());
        data.insert("step".to_string(), step.to_link());
        let (task, created) = queries::find_or_create(self.tracking.as_ref(), "Task", &filters, data).await?;
        let id = entity_id(&task).ok_or_else(|| IngestError::Remote("Task record has no id".to_string()))?;

        let task = EntityRef::new("Task", id, VENDOR_TASK);
        if created {
            self.event_bus.log(
                LogLevel::Info,
                "Publish",
                format!(
                    "Created {} task {} for {}",
                    VENDOR_TASK,
                    id,
                    entity.name.as_deref().unwrap_or_default()
                ),
            );
            item.properties.created_task = Some(task.clone());
        }
        item.context.task = Some(task);
        item.properties.pending_vendor_task = None;
        Ok(())
    }

    async fn write_cdl(&self, item: &IngestItem, publish_path: &std::path::Path) -> IngestResult<()> {
        let data = item.properties.cdl.clone().ok_or_else(|| {
            IngestError::DataQuality(format!("No CDL values read for '{}'", item.name))
        })?;
        let data = CdlData {
            id: if data.id.is_empty() {
                CANONICAL_CDL_NAME.to_string()
            } else {
                data.id
            },
            ..data
        };
        let path = publish_path.to_path_buf();
        tokio::task::spawn_blocking(move || cdl::write_cc(&path, &data))
            .await
            .map_err(|e| IngestError::Common(ingest_common::Error::Internal(format!("CDL task failed: {}", e))))??;
        Ok(())
    }

    async fn copy_to_publish(&self, item: &IngestItem, publish_path: &std::path::Path) -> IngestResult<()> {
        let padding = match &item.properties.publish_template {
            Some(name) => sequence_padding(&*self.templates.get(name)?).unwrap_or(0),
            None => 0,
        };
        let plan = copy_plan(item, publish_path, padding)?;
        let copied = fs_ops::copy_files(plan).await?;
        tracing::debug!(item = %item.name, files = copied.len(), path = %publish_path.display(), "Copied to publish path");
        Ok(())
    }

    fn publish_data(
        &self,
        item: &IngestItem,
        publish_path: &std::path::Path,
        publish_name: &str,
        version: i64,
    ) -> Entity {
        let mut data = Entity::new();

        // Ad hoc values first so the core fields always win
        for (key, value) in &item.properties.extra {
            data.insert(key.clone(), value.clone());
        }
        for (template_key, record_field) in &self.config.additional_publish_fields {
            if let Some(value) = item.fields.get(template_key) {
                data.insert(record_field.clone(), value.to_json());
            }
        }

        data.extend(item.context.record_links());
        let file_name = publish_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        data.insert("code".to_string(), Value::from(file_name));
        data.insert("name".to_string(), Value::from(publish_name));
        data.insert(
            "path".to_string(),
            serde_json::json!({ "local_path": publish_path.to_string_lossy() }),
        );
        data.insert("version_number".to_string(), Value::from(version));
        data.insert(
            "published_file_type".to_string(),
            item.properties
                .publish_type
                .clone()
                .map(Value::from)
                .unwrap_or(Value::Null),
        );
        data.insert(
            "dependency_paths".to_string(),
            Value::from(
                item.properties
                    .publish_dependencies
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect::<Vec<_>>(),
            ),
        );
        data.insert(
            "thumbnail_path".to_string(),
            item.properties
                .thumbnail_path
                .as_ref()
                .map(|p| Value::from(p.to_string_lossy().into_owned()))
                .unwrap_or(Value::Null),
        );
        data.insert(
            "description".to_string(),
            item.description.clone().map(Value::from).unwrap_or(Value::Null),
        );
        data.insert("sg_status_list".to_string(), Value::from(STATUS_COMPLETE));
        data.insert("created_at".to_string(), Value::from(chrono::Utc::now().to_rfc3339()));
        data
    }

    /// Find or create the plate for a published image item and link the record
    ///
    /// Serialized per (project, code) within this process. A plate created
    /// here is deleted again when linking fails.
    async fn register_plate(&self, item: &IngestItem, record: &PublishRecord) -> IngestResult<PlateRecord> {
        let code = record.name.clone();
        let lock = self.plate_locks.lock_for(item.context.project.id, &code);
        let _guard = lock.lock().await;

        let (cut_in, cut_out) = item.frame_range().unwrap_or((0, 0));
        let mut data = Entity::new();
        data.insert("code".to_string(), Value::from(code.as_str()));
        data.insert("sg_client_name".to_string(), Value::from(item.name.as_str()));
        data.insert("sg_status_list".to_string(), Value::from(STATUS_IN_PROGRESS));
        data.insert("cut_in".to_string(), Value::from(cut_in));
        data.insert("cut_out".to_string(), Value::from(cut_out));
        if let (Some(field), Some(entity)) = (queries::plate_entity_field(&item.context), &item.context.entity) {
            data.insert(field.to_string(), entity.to_link());
        }

        let (plate_id, mut linked, created) =
            match queries::find_plate(self.tracking.as_ref(), &item.context, &code).await? {
                Some(existing) => {
                    self.tracking.update(PLATE_ENTITY, existing.id, data).await?;
                    tracing::debug!(plate = existing.id, code = %code, "Updated plate");
                    (existing.id, existing.published_file_ids, false)
                }
                None => {
                    data.insert("project".to_string(), item.context.project.to_link());
                    let created = self.tracking.create(PLATE_ENTITY, data).await?;
                    let id = entity_id(&created)
                        .ok_or_else(|| IngestError::Remote("Created plate has no id".to_string()))?;
                    tracing::debug!(plate = id, code = %code, "Created plate");
                    (id, Vec::new(), true)
                }
            };

        if !linked.contains(&record.id) {
            linked.push(record.id);
        }
        let mut link = Entity::new();
        link.insert(
            "sg_published_files".to_string(),
            Value::from(
                linked
                    .iter()
                    .map(|id| serde_json::json!({ "type": PUBLISH_ENTITY, "id": id }))
                    .collect::<Vec<_>>(),
            ),
        );
        link.insert("sg_status_list".to_string(), Value::Null);

        match self.tracking.update(PLATE_ENTITY, plate_id, link).await {
            Ok(entity) => PlateRecord::from_entity(&entity, created)
                .ok_or_else(|| IngestError::Remote(format!("Invalid plate record {}", plate_id))),
            Err(e) => {
                if created {
                    match self.tracking.delete(PLATE_ENTITY, plate_id).await {
                        Ok(_) => tracing::warn!(plate = plate_id, "Removed plate after failed link"),
                        Err(cleanup) => {
                            tracing::error!(plate = plate_id, error = %cleanup, "Could not remove plate")
                        }
                    }
                }
                Err(e)
            }
        }
    }

    /// Clear the status of lower versions and announce the publish
    pub async fn finalize(&self, item: &mut IngestItem, session_id: Uuid) -> IngestResult<FinalizeReport> {
        let record = item.properties.publish_record.clone().ok_or_else(|| {
            IngestError::DataQuality(format!("Item '{}' has not been published", item.name))
        })?;

        // Re-query so publishes registered since validation are included
        let mut candidates = item.properties.conflicting_publishes.clone();
        for found in
            queries::conflicting_publishes(self.tracking.as_ref(), &item.context, &record.name, &record.path)
                .await?
        {
            if !candidates.iter().any(|c| c.id == found.id) {
                candidates.push(found);
            }
        }

        let mut superseded = Vec::new();
        for conflict in candidates
            .iter()
            .filter(|c| c.id != record.id && c.version_number < record.version_number)
        {
            let mut data = Entity::new();
            data.insert("sg_status_list".to_string(), Value::Null);
            self.tracking.update(PUBLISH_ENTITY, conflict.id, data).await?;
            superseded.push(conflict.id);
        }

        let now = chrono::Utc::now();
        self.event_bus.emit_lossy(IngestEvent::PublishRegistered {
            session_id,
            item_name: item.name.clone(),
            record_id: record.id,
            path: record.path.to_string_lossy().into_owned(),
            version: record.version_number,
            timestamp: now,
        });
        if let Some(plate) = &item.properties.plate {
            self.event_bus.emit_lossy(IngestEvent::PlateRegistered {
                session_id,
                plate_id: plate.id,
                code: plate.code.clone(),
                created: plate.created,
                timestamp: now,
            });
        }
        if !superseded.is_empty() {
            self.event_bus.log(
                LogLevel::Info,
                "Finalize",
                format!("{}: cleared status of {} older publish(es)", item.name, superseded.len()),
            );
            self.event_bus.emit_lossy(IngestEvent::PublishesSuperseded {
                session_id,
                item_name: item.name.clone(),
                record_ids: superseded.clone(),
                timestamp: now,
            });
        }

        Ok(FinalizeReport {
            record_id: record.id,
            superseded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ingest_common::db::init_memory_database;
    use ingest_common::EntityRef;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    use crate::models::{Context, ItemSource, SequenceGroup};
    use crate::tracking::{Filter, SqliteTrackingClient};

    fn context() -> Context {
        Context::new(EntityRef::new("Project", 1, "demo"))
            .with_entity(EntityRef::new("Shot", 2, "sh010"))
            .with_parent_sequence(EntityRef::new("Sequence", 3, "sq01"))
            .with_task(EntityRef::new("Task", 4, "Vendor"))
    }

    fn registrar(root: &Path, tracking: Arc<dyn TrackingClient>) -> PublishRegistrar {
        let config = IngestConfig {
            project_root: root.to_path_buf(),
            ..IngestConfig::default()
        };
        let templates = TemplateSet::from_config(&config.templates, root).unwrap();
        PublishRegistrar::new(Arc::new(config), Arc::new(templates), tracking, EventBus::new(64))
    }

    fn plate_item(dir: &Path, frames: std::ops::RangeInclusive<i64>) -> IngestItem {
        fs::create_dir_all(dir).unwrap();
        let file_list: Vec<PathBuf> = frames
            .clone()
            .map(|f| {
                let path = dir.join(format!("bg.{:04}.exr", f));
                fs::write(&path, format!("frame {}", f)).unwrap();
                path
            })
            .collect();
        let group = SequenceGroup {
            sequence_path: dir.join("bg.%04d.exr"),
            file_list,
            frame_range: (*frames.start(), *frames.end()),
            padding: 4,
        };
        let mut item = IngestItem::new("bg.####.exr", ItemSource::Sequence(group), ItemKind::Image, context());
        item.fields.insert("Step", "vendor");
        item.fields.insert("snapshot_type", "plate");
        item
    }

    #[tokio::test]
    async fn test_plate_publish_round() {
        let temp_dir = TempDir::new().unwrap();
        let tracking: Arc<dyn TrackingClient> =
            Arc::new(SqliteTrackingClient::new(init_memory_database().await.unwrap()));
        let registrar = registrar(temp_dir.path(), tracking.clone());

        let mut item = plate_item(&temp_dir.path().join("in"), 1..=4);
        let report = registrar.validate(&mut item).await.unwrap();
        assert!(report.passed(), "{:?}", report);

        let record = registrar.publish(&mut item).await.unwrap();
        assert_eq!(record.version_number, 1);
        assert_eq!(record.status.as_deref(), Some(STATUS_COMPLETE));
        assert!(record.path.to_string_lossy().ends_with("sh010_bg_v001.%04d.exr"));

        let plate = item.properties.plate.clone().unwrap();
        assert!(plate.created);
        assert_eq!((plate.cut_in, plate.cut_out), (1, 4));
        assert_eq!(plate.published_file_ids, vec![record.id]);
        assert_eq!(plate.status, None);

        let finalized = registrar.finalize(&mut item, Uuid::new_v4()).await.unwrap();
        assert!(finalized.superseded.is_empty());

        // Second delivery of the same plate: new version, same plate, v1 superseded
        let mut again = plate_item(&temp_dir.path().join("in2"), 1..=5);
        assert!(registrar.validate(&mut again).await.unwrap().passed());
        assert_eq!(again.properties.publish_version, Some(2));
        assert_eq!(again.properties.conflicting_publishes.len(), 1);

        let second = registrar.publish(&mut again).await.unwrap();
        let plate = again.properties.plate.clone().unwrap();
        assert!(!plate.created);
        assert_eq!(plate.published_file_ids, vec![record.id, second.id]);
        assert_eq!(plate.cut_out, 5);

        let finalized = registrar.finalize(&mut again, Uuid::new_v4()).await.unwrap();
        assert_eq!(finalized.superseded, vec![record.id]);

        let plates = tracking.find(PLATE_ENTITY, &[], &[]).await.unwrap();
        assert_eq!(plates.len(), 1);
        let first = tracking
            .find_one(PUBLISH_ENTITY, &[Filter::is("id", record.id)], &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.get("sg_status_list"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_existing_destination_fails_validation() {
        let temp_dir = TempDir::new().unwrap();
        let tracking: Arc<dyn TrackingClient> =
            Arc::new(SqliteTrackingClient::new(init_memory_database().await.unwrap()));
        let registrar = registrar(temp_dir.path(), tracking);

        let mut item = plate_item(&temp_dir.path().join("in"), 1..=2);
        assert!(registrar.validate(&mut item).await.unwrap().passed());
        let taken = item.properties.publish_path.clone().unwrap().with_file_name("sh010_bg_v001.0007.exr");
        fs::create_dir_all(taken.parent().unwrap()).unwrap();
        fs::write(&taken, b"existing").unwrap();

        let mut item = plate_item(&temp_dir.path().join("in"), 1..=2);
        let report = registrar.validate(&mut item).await.unwrap();
        assert!(!report.passed());
        assert!(report.failures()[0].starts_with("destination"));
        assert_eq!(fs::read(&taken).unwrap(), b"existing");
    }

    #[tokio::test]
    async fn test_cdl_published_as_canonical_cc() {
        let temp_dir = TempDir::new().unwrap();
        let tracking: Arc<dyn TrackingClient> =
            Arc::new(SqliteTrackingClient::new(init_memory_database().await.unwrap()));
        let registrar = registrar(temp_dir.path(), tracking);

        let source = temp_dir.path().join("vendor_grade.ccc");
        fs::write(
            &source,
            r#"<ColorCorrectionCollection><ColorCorrection id="g1"><SOPNode><Slope>1 1 1</Slope><Offset>0 0 0</Offset><Power>1 1 1</Power></SOPNode><SatNode><Saturation>0.8</Saturation></SatNode></ColorCorrection></ColorCorrectionCollection>"#,
        )
        .unwrap();
        let mut item = IngestItem::new("vendor_grade.ccc", ItemSource::File(source), ItemKind::Cdl, context());
        item.fields.insert("Step", "vendor");

        assert!(registrar.validate(&mut item).await.unwrap().passed());
        let record = registrar.publish(&mut item).await.unwrap();

        assert!(record.path.to_string_lossy().ends_with("publish/cdl/sh010_avid_grade_v001.cc"));
        let written = cdl::read_cdl(&record.path).unwrap();
        assert_eq!(written.id, "g1");
        assert_eq!(written.saturation, "0.8");
        assert!(item.properties.plate.is_none());
    }

    #[tokio::test]
    async fn test_incomplete_cdl_fails_with_missing_element() {
        let temp_dir = TempDir::new().unwrap();
        let tracking: Arc<dyn TrackingClient> =
            Arc::new(SqliteTrackingClient::new(init_memory_database().await.unwrap()));
        let registrar = registrar(temp_dir.path(), tracking);

        let source = temp_dir.path().join("grade.cc");
        fs::write(
            &source,
            r#"<ColorCorrection id="g"><SOPNode><Slope>1 1 1</Slope><Offset>0 0 0</Offset><Power></Power></SOPNode><SatNode><Saturation>1</Saturation></SatNode></ColorCorrection>"#,
        )
        .unwrap();
        let mut item = IngestItem::new("grade.cc", ItemSource::File(source), ItemKind::Cdl, context());
        item.fields.insert("Step", "vendor");

        let report = registrar.validate(&mut item).await.unwrap();
        assert!(!report.passed());
        assert!(report.failures()[0].contains("Power"));
    }

    /// Delegates to SQLite but refuses plate links
    struct FailingLinks {
        inner: SqliteTrackingClient,
    }

    #[async_trait]
    impl TrackingClient for FailingLinks {
        async fn find(&self, entity_type: &str, filters: &[Filter], fields: &[&str]) -> IngestResult<Vec<Entity>> {
            self.inner.find(entity_type, filters, fields).await
        }

        async fn create(&self, entity_type: &str, data: Entity) -> IngestResult<Entity> {
            self.inner.create(entity_type, data).await
        }

        async fn update(&self, entity_type: &str, id: i64, data: Entity) -> IngestResult<Entity> {
            if data.contains_key("sg_published_files") {
                return Err(IngestError::Remote("link rejected".to_string()));
            }
            self.inner.update(entity_type, id, data).await
        }

        async fn delete(&self, entity_type: &str, id: i64) -> IngestResult<bool> {
            self.inner.delete(entity_type, id).await
        }
    }

    #[tokio::test]
    async fn test_created_plate_removed_when_link_fails() {
        let temp_dir = TempDir::new().unwrap();
        let inner = SqliteTrackingClient::new(init_memory_database().await.unwrap());
        let tracking: Arc<dyn TrackingClient> = Arc::new(FailingLinks { inner: inner.clone() });
        let registrar = registrar(temp_dir.path(), tracking);

        let mut item = plate_item(&temp_dir.path().join("in"), 1..=2);
        assert!(registrar.validate(&mut item).await.unwrap().passed());
        let result = registrar.publish(&mut item).await;

        assert!(matches!(result, Err(IngestError::Remote(_))));
        assert!(inner.find(PLATE_ENTITY, &[], &[]).await.unwrap().is_empty());
        assert_eq!(inner.find(PUBLISH_ENTITY, &[], &[]).await.unwrap().len(), 1);
    }
}
