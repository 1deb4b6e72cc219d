//! Builds ingest items from candidate paths
//!
//! A candidate is a manifest, a directory or a single file. Manifests expand
//! into their snapshot file entries, each built with the snapshot's fields;
//! directories expand into their frame sequences plus loose files (only the
//! sequences when the directory came from a manifest). Nothing is written to
//! disk here.
//!
//! Within a manifest snapshot the `main` role is built first and becomes
//! the parent of the snapshot's other items. Client notes are returned
//! beside the items.

use ingest_common::config::IngestConfig;
use ingest_common::events::{EventBus, LogLevel};
use ingest_common::FieldMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::manifest_parser::{is_manifest, ManifestParser};
use super::path_info;
use super::sequence_detector::SequenceDetector;
use crate::error::IngestResult;
use crate::models::{ClientNote, Context, IngestItem, ItemKind, ItemSource, SequenceGroup};
use crate::templates::TemplateSet;

/// Role whose item the other files of a snapshot depend on
const MAIN_ROLE: &str = "main";

/// Everything built from candidate paths
#[derive(Debug, Default)]
pub struct Collected {
    pub items: Vec<IngestItem>,
    pub notes: Vec<ClientNote>,
}

impl Collected {
    /// Append `other`, keeping its parent indices pointing at its own items
    pub fn append(&mut self, other: Collected) {
        let offset = self.items.len();
        self.items.extend(other.items.into_iter().map(|mut item| {
            item.parent = item.parent.map(|parent| parent + offset);
            item
        }));
        self.notes.extend(other.notes);
    }
}

/// Fields a manifest snapshot contributes to its items
struct ManifestScope<'a> {
    fields: &'a FieldMap,
    roles: &'a [String],
}

pub struct ItemBuilder {
    config: Arc<IngestConfig>,
    templates: Arc<TemplateSet>,
    detector: SequenceDetector,
    parser: ManifestParser,
    event_bus: EventBus,
}

impl ItemBuilder {
    pub fn new(config: Arc<IngestConfig>, templates: Arc<TemplateSet>, event_bus: EventBus) -> Self {
        let parser = ManifestParser::new(&config.manifest);
        Self {
            config,
            templates,
            detector: SequenceDetector::new(),
            parser,
            event_bus,
        }
    }

    /// Build every item and note a candidate path yields
    ///
    /// An unreadable manifest is logged and yields nothing.
    pub fn build(
        &self,
        candidate: &Path,
        context: &Context,
        manifest_fields: Option<&FieldMap>,
    ) -> IngestResult<Collected> {
        let mut collected = Collected::default();
        let scope = manifest_fields.map(|fields| ManifestScope { fields, roles: &[] });
        self.collect(candidate, context, scope.as_ref(), &mut collected)?;
        Ok(collected)
    }

    fn collect(
        &self,
        candidate: &Path,
        context: &Context,
        scope: Option<&ManifestScope<'_>>,
        collected: &mut Collected,
    ) -> IngestResult<()> {
        if !candidate.exists() {
            self.event_bus.log(
                LogLevel::Warning,
                "Collect",
                format!("Path does not exist: {}", candidate.display()),
            );
            return Ok(());
        }

        if candidate.is_file() && is_manifest(candidate, &self.config.manifest.file_name) {
            // Entries of a manifest never pull in another manifest
            if scope.is_some() {
                tracing::debug!(path = %candidate.display(), "Skipping nested manifest");
                return Ok(());
            }
            return self.collect_manifest(candidate, context, collected);
        }

        if candidate.is_dir() {
            return self.collect_directory(candidate, context, scope, collected);
        }

        let item = self.file_item(candidate, context, scope);
        self.log_collected(&item);
        collected.items.push(item);
        Ok(())
    }

    fn collect_manifest(
        &self,
        manifest: &Path,
        context: &Context,
        collected: &mut Collected,
    ) -> IngestResult<()> {
        let snapshots = match self.parser.parse(manifest) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                self.event_bus.log(LogLevel::Error, "Manifest", e.to_string());
                return Ok(());
            }
        };

        self.event_bus.log(
            LogLevel::Info,
            "Manifest",
            format!("{}: {} snapshot(s)", manifest.display(), snapshots.len()),
        );

        for snapshot in &snapshots {
            let start = collected.items.len();

            let mut files: Vec<_> = snapshot.files.iter().collect();
            files.sort_by_key(|(_, roles)| !roles.iter().any(|r| r == MAIN_ROLE));
            for (path, roles) in files {
                let scope = ManifestScope {
                    fields: &snapshot.fields,
                    roles,
                };
                self.collect(path, context, Some(&scope), collected)?;
            }

            let parent = collected.items[start..]
                .iter()
                .position(|item| item.roles.iter().any(|r| r == MAIN_ROLE))
                .map(|offset| start + offset);
            for (index, item) in collected.items.iter_mut().enumerate().skip(start) {
                item.properties
                    .publish_dependencies
                    .extend(snapshot.dependencies.iter().cloned());
                if parent != Some(index) {
                    item.parent = parent;
                }
            }

            if let Some(note) = &snapshot.note {
                self.event_bus.log(
                    LogLevel::Info,
                    "Collect",
                    format!("Note '{}' with {} link(s)", note.subject, note.links.len()),
                );
                collected.notes.push(note.clone());
            }
        }
        Ok(())
    }

    fn collect_directory(
        &self,
        dir: &Path,
        context: &Context,
        scope: Option<&ManifestScope<'_>>,
        collected: &mut Collected,
    ) -> IngestResult<()> {
        let mut grouped: HashSet<PathBuf> = HashSet::new();

        for sequence in self.detector.find_sequences(dir, &[], None)? {
            let Some(first) = sequence.first_file().map(Path::to_path_buf) else {
                continue;
            };
            // A single numbered file is only a sequence when it is image media
            if sequence.frame_count() == 1 && !self.resolve_kind(&first).is_plate_kind() {
                continue;
            }
            grouped.extend(sequence.file_list.iter().cloned());
            let item = self.sequence_item(sequence, context, scope);
            self.log_collected(&item);
            collected.items.push(item);
        }

        // A manifest lists its single files itself
        if scope.is_some() {
            return Ok(());
        }

        for path in self.detector.list_files(dir)? {
            if grouped.contains(&path) {
                continue;
            }
            self.collect(&path, context, scope, collected)?;
        }
        Ok(())
    }

    fn file_item(&self, path: &Path, context: &Context, scope: Option<&ManifestScope<'_>>) -> IngestItem {
        let kind = self.resolve_kind(path);
        let name = path_info::publish_name(path, false);
        let mut item = IngestItem::new(name, ItemSource::File(path.to_path_buf()), kind, context.clone());
        self.apply_fields(&mut item, scope);
        item
    }

    fn sequence_item(
        &self,
        sequence: SequenceGroup,
        context: &Context,
        scope: Option<&ManifestScope<'_>>,
    ) -> IngestItem {
        let first = sequence
            .first_file()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| sequence.sequence_path.clone());
        let kind = self.resolve_kind(&first);
        let name = path_info::publish_name(&first, true);
        let mut item = IngestItem::new(name, ItemSource::Sequence(sequence), kind, context.clone());
        self.apply_fields(&mut item, scope);
        item
    }

    /// Kind from the configured extension table, then the file's magic bytes
    pub fn resolve_kind(&self, path: &Path) -> ItemKind {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if let Some(kind) = self
            .config
            .item_type_for_extension(&extension)
            .and_then(|t| t.kind.parse::<ItemKind>().ok())
        {
            return kind;
        }

        match infer::get_from_path(path) {
            Ok(Some(kind)) => {
                let mime = kind.mime_type();
                tracing::trace!(path = %path.display(), mime, "Kind from file content");
                if mime.starts_with("image/") {
                    ItemKind::Image
                } else if mime.starts_with("video/") {
                    ItemKind::Movie
                } else if mime.starts_with("text/") || mime == "application/pdf" || mime.contains("document") {
                    ItemKind::Document
                } else {
                    ItemKind::Unknown
                }
            }
            Ok(None) => ItemKind::Unknown,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Could not sniff file type");
                ItemKind::Unknown
            }
        }
    }

    /// Path-derived fields, then manifest fields (overwriting), then backfills
    fn apply_fields(&self, item: &mut IngestItem, scope: Option<&ManifestScope<'_>>) {
        let representative = match item.sequence().and_then(|s| s.first_file()) {
            Some(first) => first.to_path_buf(),
            None => item.representative_path().to_path_buf(),
        };

        if let Some(template) = self.templates.template_from_path(&representative) {
            if let Some(fields) = template.get_fields(&representative) {
                tracing::trace!(template = %template.name(), "Fields from path");
                item.fields.overlay(&fields);
            }
        }
        if let Some(version) = path_info::version_number(&representative) {
            item.fields.insert_missing("version", version);
        }

        if let Some(scope) = scope {
            item.fields.overlay(scope.fields);
            item.roles = scope.roles.to_vec();
        }

        if !item.fields.contains_key("Step") {
            let step = match item.context.step.as_ref().and_then(|s| s.name.clone()) {
                Some(step) => step,
                None => self
                    .config
                    .step_for_entity_type(item.context.entity_type().unwrap_or_default())
                    .to_string(),
            };
            item.fields.insert("Step", step);
        }

        if !item.fields.contains_key("snapshot_type") {
            let snapshot_type = self
                .config
                .item_type_for_kind(item.kind.as_str())
                .and_then(|t| t.default_snapshot_type.clone())
                .or_else(|| item.fields.get_str("Step").map(str::to_string));
            if let Some(snapshot_type) = snapshot_type {
                item.fields.insert("snapshot_type", snapshot_type);
            }
        }

        if let Some(description) = item.fields.get_str("description") {
            item.description = Some(description.to_string());
        }
    }

    fn log_collected(&self, item: &IngestItem) {
        let detail = match item.sequence() {
            Some(sequence) => format!(
                "{} ({}, {} frames {}-{})",
                item.name,
                item.kind,
                sequence.frame_count(),
                sequence.frame_range.0,
                sequence.frame_range.1
            ),
            None => format!("{} ({})", item.name, item.kind),
        };
        self.event_bus.log(LogLevel::Info, "Collect", detail);
    }
}
