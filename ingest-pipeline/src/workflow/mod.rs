//! Batch orchestration
//!
//! `Pipeline` turns candidate paths into items and walks each item through
//! conform → validate → publish → finalize, one item at a time. Client notes
//! from manifests are resolved and created after the items.
//!
//! # Error Handling
//! - Validation failures and conform conflicts skip the item
//! - Tracking and IO errors fail the item; with `stop_on_error` they also
//!   stop the batch and the remaining items are skipped
//! - Every outcome is reported through `IngestEvent`s and the `BatchReport`

pub mod session;

pub use session::{IngestProgress, IngestSession, IngestState, StateTransition};

use ingest_common::config::IngestConfig;
use ingest_common::events::{EventBus, IngestEvent, LogLevel};
use ingest_common::EntityRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::models::{ClientNote, Context, IngestItem};
use crate::services::{Collected, ConformEngine, ConformOutcome, ItemBuilder, NoteRegistrar, PublishRegistrar};
use crate::templates::TemplateSet;
use crate::tracking::TrackingClient;

/// Batch behavior switches
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Abort the batch at the first publish or tracking error
    pub stop_on_error: bool,
    /// Stop after validation; nothing is copied or registered
    pub validate_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Published,
    /// Passed validation in a validate-only run
    Validated,
    Skipped,
    Failed,
}

/// What happened to one item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_name: String,
    pub kind: String,
    pub status: ItemStatus,
    /// Stage that skipped or failed the item
    pub stage: Option<String>,
    pub message: Option<String>,
    pub warnings: Vec<String>,
    pub publish_path: Option<PathBuf>,
    pub version: Option<i64>,
    pub record_id: Option<i64>,
    pub superseded: Vec<i64>,
}

impl ItemOutcome {
    fn new(item: &IngestItem, status: ItemStatus) -> Self {
        Self {
            item_name: item.name.clone(),
            kind: item.kind.to_string(),
            status,
            stage: None,
            message: None,
            warnings: Vec::new(),
            publish_path: item.properties.publish_path.clone(),
            version: item.properties.publish_version,
            record_id: None,
            superseded: Vec::new(),
        }
    }

    fn stopped(item: &IngestItem, status: ItemStatus, stage: &str, message: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.to_string()),
            message: Some(message.into()),
            ..Self::new(item, status)
        }
    }

    fn for_note(note: &ClientNote, status: ItemStatus) -> Self {
        Self {
            item_name: note.subject.clone(),
            kind: "note".to_string(),
            status,
            stage: None,
            message: None,
            warnings: Vec::new(),
            publish_path: None,
            version: None,
            record_id: None,
            superseded: Vec::new(),
        }
    }

    fn note_stopped(note: &ClientNote, status: ItemStatus, message: impl Into<String>) -> Self {
        Self {
            stage: Some("note".to_string()),
            message: Some(message.into()),
            ..Self::for_note(note, status)
        }
    }
}

/// Result of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub session_id: Uuid,
    pub state: IngestState,
    pub outcomes: Vec<ItemOutcome>,
    pub duration_ms: u64,
}

impl BatchReport {
    fn count(&self, status: ItemStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn published(&self) -> usize {
        self.count(ItemStatus::Published)
    }

    pub fn validated(&self) -> usize {
        self.count(ItemStatus::Validated)
    }

    pub fn skipped(&self) -> usize {
        self.count(ItemStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(ItemStatus::Failed)
    }

    /// Any item skipped or failed
    pub fn has_problems(&self) -> bool {
        self.skipped() > 0 || self.failed() > 0
    }
}

/// Batch orchestrator
pub struct Pipeline {
    config: Arc<IngestConfig>,
    builder: ItemBuilder,
    conform: ConformEngine,
    registrar: PublishRegistrar,
    notes: NoteRegistrar,
    event_bus: EventBus,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        config: Arc<IngestConfig>,
        tracking: Arc<dyn TrackingClient>,
        event_bus: EventBus,
        options: PipelineOptions,
    ) -> IngestResult<Self> {
        let templates = Arc::new(TemplateSet::from_config(&config.templates, &config.project_root)?);
        Ok(Self {
            builder: ItemBuilder::new(config.clone(), templates.clone(), event_bus.clone()),
            conform: ConformEngine::new(templates.clone(), event_bus.clone()),
            notes: NoteRegistrar::new(config.clone(), templates.clone(), tracking.clone(), event_bus.clone())?,
            registrar: PublishRegistrar::new(config.clone(), templates, tracking, event_bus.clone()),
            config,
            event_bus,
            options,
        })
    }

    pub fn registrar(&self) -> &PublishRegistrar {
        &self.registrar
    }

    /// Collect and run in a fresh session
    pub async fn ingest(&self, paths: &[PathBuf], context: &Context) -> BatchReport {
        let mut session = IngestSession::new(paths.iter().map(|p| p.display().to_string()).collect());
        tracing::info!(session_id = %session.session_id, paths = paths.len(), context = %context, "Ingest started");
        let collected = self.collect(&mut session, paths, context);
        self.run(&mut session, collected, context).await
    }

    /// Build items and notes from candidate paths
    ///
    /// A path that cannot be read is recorded on the session and contributes
    /// nothing.
    pub fn collect(&self, session: &mut IngestSession, paths: &[PathBuf], context: &Context) -> Collected {
        session.transition_to(IngestState::Collecting);

        let mut collected = Collected::default();
        for path in paths {
            match self.builder.build(path, context, None) {
                Ok(built) => {
                    for item in &built.items {
                        self.event_bus.emit_lossy(IngestEvent::ItemCollected {
                            session_id: session.session_id,
                            item_name: item.name.clone(),
                            kind: item.kind.to_string(),
                            timestamp: chrono::Utc::now(),
                        });
                    }
                    collected.append(built);
                }
                Err(e) => {
                    let name = path.display().to_string();
                    self.event_bus.log(LogLevel::Error, "Collect", format!("{}: {}", name, e));
                    session.add_error(&name, &e);
                }
            }
        }

        tracing::info!(
            session_id = %session.session_id,
            items = collected.items.len(),
            notes = collected.notes.len(),
            "Collection finished"
        );
        collected
    }

    /// Process items in order, then notes
    ///
    /// Items depending on a parent item get the parent's publish path as a
    /// dependency. A Vendor task created for one item becomes the task of
    /// later items on the same entity.
    pub async fn run(&self, session: &mut IngestSession, collected: Collected, context: &Context) -> BatchReport {
        let Collected { items, notes } = collected;
        let total = items.len() + notes.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut stopped = false;
        let mut published: HashMap<usize, PathBuf> = HashMap::new();
        let mut created_tasks: Vec<(EntityRef, EntityRef)> = Vec::new();

        for (index, mut item) in items.into_iter().enumerate() {
            session.update_progress(index, total, &item.name);

            if let Some(parent_path) = item.parent.and_then(|parent| published.get(&parent)) {
                if !item.properties.publish_dependencies.contains(parent_path) {
                    item.properties.publish_dependencies.push(parent_path.clone());
                }
            }
            if item.context.task.is_none() {
                if let Some(entity) = &item.context.entity {
                    let task = created_tasks
                        .iter()
                        .find(|(owner, _)| owner.same_record(entity))
                        .map(|(_, task)| task.clone());
                    item.context.task = task;
                }
            }

            let outcome = if stopped {
                ItemOutcome::stopped(&item, ItemStatus::Skipped, "batch", "Batch stopped after an earlier error")
            } else {
                self.process_item(session, &mut item).await
            };

            if outcome.status == ItemStatus::Published {
                if let Some(path) = &outcome.publish_path {
                    published.insert(index, path.clone());
                }
            }
            if let (Some(task), Some(entity)) = (item.properties.created_task.take(), &item.context.entity) {
                created_tasks.push((entity.clone(), task));
            }

            if let (Some(stage), Some(message)) = (&outcome.stage, &outcome.message) {
                session.add_error(&item.name, message);
                self.event_bus.emit_lossy(IngestEvent::ItemFailed {
                    session_id: session.session_id,
                    item_name: item.name.clone(),
                    stage: stage.clone(),
                    error: message.clone(),
                    timestamp: chrono::Utc::now(),
                });
            }
            if outcome.status == ItemStatus::Failed && self.options.stop_on_error && !stopped {
                self.event_bus.log(
                    LogLevel::Error,
                    "Batch",
                    format!("Stopping after failure of '{}'", item.name),
                );
                stopped = true;
            }
            outcomes.push(outcome);
        }

        for (offset, note) in notes.iter().enumerate() {
            session.update_progress(total - notes.len() + offset, total, &note.subject);

            let outcome = if stopped {
                ItemOutcome {
                    stage: Some("batch".to_string()),
                    ..ItemOutcome::note_stopped(note, ItemStatus::Skipped, "Batch stopped after an earlier error")
                }
            } else {
                self.process_note(session, note, context).await
            };

            if let (Some(stage), Some(message)) = (&outcome.stage, &outcome.message) {
                session.add_error(&note.subject, message);
                self.event_bus.emit_lossy(IngestEvent::ItemFailed {
                    session_id: session.session_id,
                    item_name: note.subject.clone(),
                    stage: stage.clone(),
                    error: message.clone(),
                    timestamp: chrono::Utc::now(),
                });
            }
            if outcome.status == ItemStatus::Failed && self.options.stop_on_error && !stopped {
                self.event_bus.log(
                    LogLevel::Error,
                    "Batch",
                    format!("Stopping after failure of note '{}'", note.subject),
                );
                stopped = true;
            }
            outcomes.push(outcome);
        }
        session.update_progress(total, total, "");

        session.transition_to(if stopped {
            IngestState::Failed
        } else {
            IngestState::Completed
        });

        let report = BatchReport {
            session_id: session.session_id,
            state: session.state,
            outcomes,
            duration_ms: session.elapsed_ms(),
        };

        self.event_bus.emit_lossy(IngestEvent::BatchCompleted {
            session_id: session.session_id,
            published: report.published(),
            skipped: report.skipped(),
            failed: report.failed(),
            duration_ms: report.duration_ms,
            timestamp: chrono::Utc::now(),
        });
        tracing::info!(
            session_id = %session.session_id,
            published = report.published(),
            validated = report.validated(),
            skipped = report.skipped(),
            failed = report.failed(),
            duration_ms = report.duration_ms,
            "Batch finished"
        );

        report
    }

    async fn process_note(&self, session: &mut IngestSession, note: &ClientNote, context: &Context) -> ItemOutcome {
        session.transition_to(IngestState::Validating);
        let resolution = match self.notes.resolve(note, context).await {
            Ok(resolution) => resolution,
            Err(e) => return ItemOutcome::note_stopped(note, ItemStatus::Failed, e.to_string()),
        };
        let warnings = resolution.warnings.clone();
        if !resolution.passed() {
            return ItemOutcome {
                warnings,
                ..ItemOutcome::note_stopped(note, ItemStatus::Skipped, resolution.failures.join("; "))
            };
        }
        if self.options.validate_only {
            return ItemOutcome {
                warnings,
                ..ItemOutcome::for_note(note, ItemStatus::Validated)
            };
        }

        session.transition_to(IngestState::Publishing);
        match self.notes.create(note, context, &resolution).await {
            Ok(record) => {
                self.event_bus.emit_lossy(IngestEvent::NoteCreated {
                    session_id: session.session_id,
                    note_id: record.id,
                    subject: record.subject.clone(),
                    link_count: record.links.len(),
                    attachment_count: record.attachment_ids.len(),
                    timestamp: chrono::Utc::now(),
                });
                ItemOutcome {
                    warnings,
                    record_id: Some(record.id),
                    ..ItemOutcome::for_note(note, ItemStatus::Published)
                }
            }
            Err(e) => ItemOutcome {
                warnings,
                ..ItemOutcome::note_stopped(note, ItemStatus::Failed, e.to_string())
            },
        }
    }

    fn work_template(&self, item: &IngestItem) -> Option<String> {
        if !self.config.conform_enabled {
            return None;
        }
        self.config
            .item_type_for_kind(item.kind.as_str())
            .and_then(|t| t.work_path_template.clone())
    }

    async fn process_item(&self, session: &mut IngestSession, item: &mut IngestItem) -> ItemOutcome {
        let session_id = session.session_id;

        if let Some(work_template) = self.work_template(item) {
            session.transition_to(IngestState::Conforming);
            match self.conform.conform(item, Some(&work_template)).await {
                Ok(ConformOutcome::Copied { destination, files }) => {
                    self.event_bus.emit_lossy(IngestEvent::WorkFileConformed {
                        session_id,
                        item_name: item.name.clone(),
                        destination: destination.display().to_string(),
                        file_count: files.len(),
                        timestamp: chrono::Utc::now(),
                    });
                }
                Ok(_) => {}
                Err(
                    e @ (IngestError::Conflict { .. }
                    | IngestError::Resolution { .. }
                    | IngestError::UnknownTemplate(_)),
                ) => {
                    return ItemOutcome::stopped(item, ItemStatus::Skipped, "conform", e.to_string());
                }
                Err(e) => return ItemOutcome::stopped(item, ItemStatus::Failed, "conform", e.to_string()),
            }
        }

        session.transition_to(IngestState::Validating);
        let report = match self.registrar.validate(item).await {
            Ok(report) => report,
            Err(e) => return ItemOutcome::stopped(item, ItemStatus::Failed, "validate", e.to_string()),
        };
        let warnings = report.warnings();
        self.event_bus.emit_lossy(IngestEvent::ItemValidated {
            session_id,
            item_name: item.name.clone(),
            passed: report.passed(),
            warnings: warnings.clone(),
            timestamp: chrono::Utc::now(),
        });
        if !report.passed() {
            return ItemOutcome {
                warnings,
                ..ItemOutcome::stopped(item, ItemStatus::Skipped, "validate", report.failures().join("; "))
            };
        }
        if self.options.validate_only {
            return ItemOutcome {
                warnings,
                ..ItemOutcome::new(item, ItemStatus::Validated)
            };
        }

        session.transition_to(IngestState::Publishing);
        let record = match self.registrar.publish(item).await {
            Ok(record) => record,
            Err(e) => {
                return ItemOutcome {
                    warnings,
                    ..ItemOutcome::stopped(item, ItemStatus::Failed, "publish", e.to_string())
                };
            }
        };

        session.transition_to(IngestState::Finalizing);
        match self.registrar.finalize(item, session_id).await {
            Ok(finalized) => ItemOutcome {
                warnings,
                record_id: Some(record.id),
                superseded: finalized.superseded,
                publish_path: Some(record.path),
                version: Some(record.version_number),
                ..ItemOutcome::new(item, ItemStatus::Published)
            },
            Err(e) => ItemOutcome {
                warnings,
                record_id: Some(record.id),
                ..ItemOutcome::stopped(item, ItemStatus::Failed, "finalize", e.to_string())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_common::db::init_memory_database;
    use ingest_common::EntityRef;
    use std::fs;
    use tempfile::TempDir;

    use crate::tracking::SqliteTrackingClient;

    fn context() -> Context {
        Context::new(EntityRef::new("Project", 1, "demo"))
            .with_entity(EntityRef::new("Shot", 2, "sh010"))
            .with_parent_sequence(EntityRef::new("Sequence", 3, "sq01"))
            .with_task(EntityRef::new("Task", 4, "Vendor"))
    }

    async fn pipeline(root: &std::path::Path, options: PipelineOptions) -> Pipeline {
        let config = IngestConfig {
            project_root: root.to_path_buf(),
            ..IngestConfig::default()
        };
        let tracking = Arc::new(SqliteTrackingClient::new(init_memory_database().await.unwrap()));
        Pipeline::new(Arc::new(config), tracking, EventBus::new(256), options).unwrap()
    }

    #[tokio::test]
    async fn test_validate_only_registers_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let incoming = temp_dir.path().join("incoming");
        fs::create_dir_all(&incoming).unwrap();
        fs::write(incoming.join("notes.txt"), b"client notes").unwrap();

        let pipeline = pipeline(
            temp_dir.path(),
            PipelineOptions {
                validate_only: true,
                ..PipelineOptions::default()
            },
        )
        .await;
        let report = pipeline.ingest(&[incoming.join("notes.txt")], &context()).await;

        assert_eq!(report.state, IngestState::Completed);
        assert_eq!(report.validated(), 1);
        let path = report.outcomes[0].publish_path.clone().unwrap();
        assert!(!path.exists());
        let publishes = pipeline
            .registrar()
            .tracking()
            .find(crate::models::records::PUBLISH_ENTITY, &[], &[])
            .await
            .unwrap();
        assert!(publishes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_context_entity_skips_item() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("notes.txt");
        fs::write(&file, b"notes").unwrap();

        let pipeline = pipeline(temp_dir.path(), PipelineOptions::default()).await;
        let bare = Context::new(EntityRef::new("Project", 1, "demo"));
        let report = pipeline.ingest(&[file], &bare).await;

        assert_eq!(report.skipped(), 1);
        assert_eq!(report.outcomes[0].stage.as_deref(), Some("validate"));
        assert!(report.has_problems());
    }

    #[tokio::test]
    async fn test_events_cover_the_batch() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("layout.abc");
        fs::write(&file, b"geometry").unwrap();

        let pipeline = pipeline(temp_dir.path(), PipelineOptions::default()).await;
        let mut rx = pipeline.event_bus.subscribe();
        let report = pipeline.ingest(&[file], &context()).await;
        assert_eq!(report.published(), 1);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.event_type());
        }
        for expected in ["ItemCollected", "ItemValidated", "PublishRegistered", "BatchCompleted"] {
            assert!(seen.contains(&expected), "missing {} in {:?}", expected, seen);
        }
    }
}
