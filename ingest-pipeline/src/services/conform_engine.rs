//! Conform: copy vendor files into their canonical work location
//!
//! The destination comes from the item type's work template. Existing files
//! are never overwritten; a sequence conflicts when any frame of the
//! destination pattern exists.

use chrono::Datelike;
use ingest_common::config::KeyType;
use ingest_common::events::{EventBus, LogLevel};
use ingest_common::{FieldMap, FrameSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::fs_ops;
use super::path_info;
use super::sequence_detector::{existing_frames, frame_number, path_for_frame};
use crate::error::{IngestError, IngestResult};
use crate::models::{IngestItem, ItemSource, SequenceGroup};
use crate::templates::{Template, TemplateSet};

/// Result of conforming one item
#[derive(Debug, Clone, PartialEq)]
pub enum ConformOutcome {
    /// No work template configured for the item
    Skipped,
    /// The item already lives at its work location
    AlreadyConformed,
    Copied {
        destination: PathBuf,
        files: Vec<PathBuf>,
    },
}

/// Fields for rendering `template` for `item`
///
/// Context fields first, then the item's own fields, then values derived
/// from the source path: `name`, `version` (default 1), `extension`, the
/// current date, and a printf frame placeholder for sequences.
pub fn template_fields(item: &IngestItem, template: &Template) -> FieldMap {
    let mut fields = item.context.as_template_fields(template);
    fields.overlay(&item.fields);

    let representative = item
        .sequence()
        .and_then(|s| s.first_file())
        .unwrap_or_else(|| item.representative_path());

    if !fields.contains_key("name") {
        let mut name = path_info::publish_base_name(representative);
        if name.is_empty() {
            if let Some(task) = item.context.task.as_ref().and_then(|t| t.name.as_deref()) {
                name = path_info::sanitize(task);
            }
        }
        if !name.is_empty() {
            fields.insert("name", name);
        }
    }

    fields.insert_missing("version", path_info::version_number(representative).unwrap_or(1));

    if let Some(extension) = representative.extension() {
        fields.insert_missing("extension", extension.to_string_lossy().into_owned());
    }

    let today = chrono::Local::now().date_naive();
    fields.insert_missing("YYYY", i64::from(today.year()));
    fields.insert_missing("MM", i64::from(today.month()));
    fields.insert_missing("DD", i64::from(today.day()));

    if item.is_sequence() {
        for key in template.keys().values() {
            if key.key_type == KeyType::Sequence {
                fields.insert(key.name.clone(), FrameSpec::Printf);
            }
        }
    }

    fields
}

/// Padding of the template's sequence key, if it has one
pub fn sequence_padding(template: &Template) -> Option<usize> {
    template
        .keys()
        .values()
        .find(|key| key.key_type == KeyType::Sequence)
        .map(|key| key.padding)
}

/// Source → destination pairs for copying an item to `destination`
///
/// For sequences `destination` is a frame pattern and each frame maps to
/// the same frame number in it.
pub fn copy_plan(item: &IngestItem, destination: &Path, padding: usize) -> IngestResult<Vec<(PathBuf, PathBuf)>> {
    match &item.source {
        ItemSource::File(path) => Ok(vec![(path.clone(), destination.to_path_buf())]),
        ItemSource::Sequence(group) => group
            .file_list
            .iter()
            .map(|source| {
                let frame = frame_number(source).ok_or_else(|| {
                    IngestError::DataQuality(format!("No frame number in {}", source.display()))
                })?;
                let target = path_for_frame(destination, frame, padding).ok_or_else(|| {
                    IngestError::DataQuality(format!(
                        "Destination {} has no frame placeholder",
                        destination.display()
                    ))
                })?;
                Ok((source.clone(), target))
            })
            .collect(),
    }
}

/// Files already on disk at `destination` (any frame for a pattern)
pub fn destination_conflicts(destination: &Path) -> IngestResult<Vec<PathBuf>> {
    existing_frames(destination)
}

fn same_path(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().replace('\\', "/") == b.to_string_lossy().replace('\\', "/")
}

pub struct ConformEngine {
    templates: Arc<TemplateSet>,
    event_bus: EventBus,
}

impl ConformEngine {
    pub fn new(templates: Arc<TemplateSet>, event_bus: EventBus) -> Self {
        Self { templates, event_bus }
    }

    /// Work path for the item under `work_template`
    pub fn resolve_destination(&self, item: &IngestItem, work_template: &str) -> IngestResult<PathBuf> {
        let template = self.templates.get(work_template)?;
        let fields = template_fields(item, &template);
        template.apply_fields(&fields)
    }

    /// Copy the item's files to its work location and point the item there
    pub async fn conform(
        &self,
        item: &mut IngestItem,
        work_template: Option<&str>,
    ) -> IngestResult<ConformOutcome> {
        let Some(work_template) = work_template else {
            tracing::debug!(item = %item.name, "No work template, conform skipped");
            return Ok(ConformOutcome::Skipped);
        };

        let template = self.templates.get(work_template)?;
        let fields = template_fields(item, &template);
        let destination = match template.apply_fields(&fields) {
            Ok(destination) => destination,
            Err(e) => {
                if let IngestError::Resolution { missing, .. } = &e {
                    tracing::warn!(item = %item.name, template = %work_template, ?missing, "Cannot resolve work path");
                }
                self.event_bus.log(LogLevel::Error, "Conform", format!("{}: {}", item.name, e));
                return Err(e);
            }
        };

        if same_path(&destination, item.representative_path()) {
            self.event_bus.log(
                LogLevel::Info,
                "Conform",
                format!("{} already at {}", item.name, destination.display()),
            );
            return Ok(ConformOutcome::AlreadyConformed);
        }

        let conflicts = destination_conflicts(&destination)?;
        if !conflicts.is_empty() {
            self.event_bus.log(
                LogLevel::Error,
                "Conform",
                format!(
                    "{}: {} file(s) already exist at {}",
                    item.name,
                    conflicts.len(),
                    destination.display()
                ),
            );
            return Err(IngestError::Conflict { paths: conflicts });
        }

        let padding = sequence_padding(&template).unwrap_or(0);
        let plan = copy_plan(item, &destination, padding)?;
        let files = fs_ops::copy_files(plan).await?;

        item.source = match &item.source {
            ItemSource::File(_) => ItemSource::File(destination.clone()),
            ItemSource::Sequence(group) => ItemSource::Sequence(SequenceGroup {
                sequence_path: destination.clone(),
                file_list: files.clone(),
                frame_range: group.frame_range,
                padding: if padding > 0 { padding } else { group.padding },
            }),
        };
        item.properties.work_template = Some(work_template.to_string());
        item.fields.overlay(&fields);

        self.event_bus.log(
            LogLevel::Info,
            "Conform",
            format!("{}: copied {} file(s) to {}", item.name, files.len(), destination.display()),
        );

        Ok(ConformOutcome::Copied { destination, files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_common::config::TemplatesConfig;
    use ingest_common::EntityRef;
    use std::fs;
    use tempfile::TempDir;

    use crate::models::{Context, ItemKind};

    fn engine(root: &Path) -> ConformEngine {
        let mut config = TemplatesConfig::default();
        config.paths.insert(
            "work".to_string(),
            "work/{Shot}/{name}/v{version}/{name}.{SEQ}.{extension}".to_string(),
        );
        config.paths.insert("work_file".to_string(), "work/{Shot}/{name}_v{version}.{extension}".to_string());
        let templates = TemplateSet::from_config(&config, root).unwrap();
        ConformEngine::new(Arc::new(templates), EventBus::new(16))
    }

    fn context() -> Context {
        Context::new(EntityRef::new("Project", 1, "demo")).with_entity(EntityRef::new("Shot", 2, "sh010"))
    }

    fn sequence_item(dir: &Path, frames: std::ops::RangeInclusive<i64>) -> IngestItem {
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
        IngestItem::new("bg.####.exr", ItemSource::Sequence(group), ItemKind::Image, context())
    }

    #[tokio::test]
    async fn test_without_work_template_skips() {
        let temp_dir = TempDir::new().unwrap();
        let mut item = sequence_item(temp_dir.path(), 1..=2);
        let outcome = engine(temp_dir.path()).conform(&mut item, None).await.unwrap();
        assert_eq!(outcome, ConformOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_sequence_copied_and_item_updated() {
        let temp_dir = TempDir::new().unwrap();
        let incoming = temp_dir.path().join("incoming");
        fs::create_dir_all(&incoming).unwrap();
        let mut item = sequence_item(&incoming, 1..=3);

        let outcome = engine(temp_dir.path()).conform(&mut item, Some("work")).await.unwrap();

        let expected = temp_dir.path().join("work/sh010/bg/v001/bg.%04d.exr");
        match outcome {
            ConformOutcome::Copied { destination, files } => {
                assert_eq!(destination, expected);
                assert_eq!(files.len(), 3);
            }
            other => panic!("Expected copy, got {:?}", other),
        }
        assert_eq!(item.representative_path(), expected.as_path());
        assert_eq!(
            fs::read(temp_dir.path().join("work/sh010/bg/v001/bg.0002.exr")).unwrap(),
            b"frame 2"
        );
        assert_eq!(item.frame_range(), Some((1, 3)));

        // Conforming again from the new location is a no-op
        let again = engine(temp_dir.path()).conform(&mut item, Some("work")).await.unwrap();
        assert_eq!(again, ConformOutcome::AlreadyConformed);
    }

    #[tokio::test]
    async fn test_any_existing_frame_is_a_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let incoming = temp_dir.path().join("incoming");
        fs::create_dir_all(&incoming).unwrap();
        let mut item = sequence_item(&incoming, 1..=3);

        let existing = temp_dir.path().join("work/sh010/bg/v001/bg.0009.exr");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"keep me").unwrap();

        let result = engine(temp_dir.path()).conform(&mut item, Some("work")).await;

        assert!(matches!(result, Err(IngestError::Conflict { ref paths }) if paths == &vec![existing.clone()]));
        assert_eq!(fs::read(&existing).unwrap(), b"keep me");
        assert!(!temp_dir.path().join("work/sh010/bg/v001/bg.0001.exr").exists());
    }

    #[tokio::test]
    async fn test_single_file_version_from_path() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("comp_v004.nk");
        fs::write(&source, b"nuke").unwrap();
        let mut item = IngestItem::new("comp.nk", ItemSource::File(source), ItemKind::Scene, context());

        let outcome = engine(temp_dir.path()).conform(&mut item, Some("work_file")).await.unwrap();

        let expected = temp_dir.path().join("work/sh010/comp_v004.nk");
        assert!(matches!(outcome, ConformOutcome::Copied { ref destination, .. } if destination == &expected));
        assert_eq!(item.path(), Some(expected.as_path()));
    }

    #[tokio::test]
    async fn test_missing_keys_reported() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("comp.nk");
        fs::write(&source, b"nuke").unwrap();
        let no_shot = Context::new(EntityRef::new("Project", 1, "demo"));
        let mut item = IngestItem::new("comp.nk", ItemSource::File(source), ItemKind::Scene, no_shot);

        let result = engine(temp_dir.path()).conform(&mut item, Some("work_file")).await;
        match result {
            Err(IngestError::Resolution { missing, .. }) => assert!(missing.contains("Shot")),
            other => panic!("Expected resolution error, got {:?}", other),
        }
    }
}
