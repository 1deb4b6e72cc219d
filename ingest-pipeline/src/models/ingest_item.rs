//! Ingest item: one unit of work flowing through the pipeline

use ingest_common::{EntityRef, FieldMap};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::context::Context;
use super::records::{PlateRecord, PublishRecord};
use super::sequence::SequenceGroup;
use crate::services::cdl::CdlData;

/// Where an item's files are
#[derive(Debug, Clone, PartialEq)]
pub enum ItemSource {
    File(PathBuf),
    Sequence(SequenceGroup),
}

/// Item category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Image,
    Render,
    Texture,
    Movie,
    Cdl,
    Note,
    Geometry,
    Scene,
    Document,
    Unknown,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Image => "image",
            ItemKind::Render => "render",
            ItemKind::Texture => "texture",
            ItemKind::Movie => "movie",
            ItemKind::Cdl => "cdl",
            ItemKind::Note => "note",
            ItemKind::Geometry => "geometry",
            ItemKind::Scene => "scene",
            ItemKind::Document => "document",
            ItemKind::Unknown => "unknown",
        }
    }

    /// Kinds that get a plate record on publish
    pub fn is_plate_kind(&self) -> bool {
        matches!(self, ItemKind::Image | ItemKind::Render)
    }

    /// Kinds whose own pixels serve as the thumbnail
    pub fn is_image_media(&self) -> bool {
        matches!(self, ItemKind::Image | ItemKind::Render | ItemKind::Texture)
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(ItemKind::Image),
            "render" => Ok(ItemKind::Render),
            "texture" => Ok(ItemKind::Texture),
            "movie" => Ok(ItemKind::Movie),
            "cdl" => Ok(ItemKind::Cdl),
            "note" => Ok(ItemKind::Note),
            "geometry" => Ok(ItemKind::Geometry),
            "scene" => Ok(ItemKind::Scene),
            "document" => Ok(ItemKind::Document),
            "unknown" => Ok(ItemKind::Unknown),
            other => Err(format!("Unknown item kind: {}", other)),
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values computed for an item as it moves through the pipeline
#[derive(Debug, Clone, Default)]
pub struct ItemProperties {
    pub work_template: Option<String>,
    pub publish_template: Option<String>,
    pub publish_type: Option<String>,
    pub publish_path: Option<PathBuf>,
    pub publish_name: Option<String>,
    pub publish_version: Option<i64>,
    pub publish_dependencies: Vec<PathBuf>,
    pub thumbnail_path: Option<PathBuf>,
    pub publish_record: Option<PublishRecord>,
    pub plate: Option<PlateRecord>,
    /// Active publishes of the same name found during validation
    pub conflicting_publishes: Vec<PublishRecord>,
    pub cdl: Option<CdlData>,
    /// Step of a Vendor task to create when the item is published
    pub pending_vendor_task: Option<EntityRef>,
    /// Vendor task created while publishing this item
    pub created_task: Option<EntityRef>,
    /// Ad hoc values, copied into record payloads by key
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct IngestItem {
    /// Display name
    pub name: String,
    pub source: ItemSource,
    pub kind: ItemKind,
    pub fields: FieldMap,
    pub context: Context,
    /// Role tags from the manifest
    pub roles: Vec<String>,
    pub description: Option<String>,
    /// Index of the item in the same batch whose publish this one depends on
    pub parent: Option<usize>,
    pub properties: ItemProperties,
}

impl IngestItem {
    pub fn new(name: impl Into<String>, source: ItemSource, kind: ItemKind, context: Context) -> Self {
        Self {
            name: name.into(),
            source,
            kind,
            fields: FieldMap::new(),
            context,
            roles: Vec::new(),
            description: None,
            parent: None,
            properties: ItemProperties::default(),
        }
    }

    /// Single-file path; `None` for sequences
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ItemSource::File(path) => Some(path),
            ItemSource::Sequence(_) => None,
        }
    }

    /// Frame files; empty for single files
    pub fn sequence_paths(&self) -> &[PathBuf] {
        match &self.source {
            ItemSource::File(_) => &[],
            ItemSource::Sequence(group) => &group.file_list,
        }
    }

    pub fn sequence(&self) -> Option<&SequenceGroup> {
        match &self.source {
            ItemSource::Sequence(group) => Some(group),
            ItemSource::File(_) => None,
        }
    }

    /// File path, or the placeholder path for a sequence
    pub fn representative_path(&self) -> &Path {
        match &self.source {
            ItemSource::File(path) => path,
            ItemSource::Sequence(group) => &group.sequence_path,
        }
    }

    /// Every file on disk that belongs to the item
    pub fn source_files(&self) -> Vec<PathBuf> {
        match &self.source {
            ItemSource::File(path) => vec![path.clone()],
            ItemSource::Sequence(group) => group.file_list.clone(),
        }
    }

    pub fn frame_range(&self) -> Option<(i64, i64)> {
        self.sequence().map(|group| group.frame_range)
    }

    /// Lowercase extension of the representative path
    pub fn extension(&self) -> Option<String> {
        self.representative_path()
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.source, ItemSource::Sequence(_))
    }

    /// First frame or the file itself, for image media only
    pub fn thumbnail_source(&self) -> Option<&Path> {
        if !self.kind.is_image_media() {
            return None;
        }
        match &self.source {
            ItemSource::File(path) => Some(path),
            ItemSource::Sequence(group) => group.first_file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_common::EntityRef;

    fn context() -> Context {
        Context::new(EntityRef::new("Project", 1, "demo"))
    }

    #[test]
    fn test_file_and_sequence_paths() {
        let file = IngestItem::new(
            "notes",
            ItemSource::File(PathBuf::from("/in/notes.PDF")),
            ItemKind::Note,
            context(),
        );
        assert_eq!(file.path(), Some(Path::new("/in/notes.PDF")));
        assert!(file.sequence_paths().is_empty());
        assert_eq!(file.extension().as_deref(), Some("pdf"));

        let group = SequenceGroup {
            sequence_path: PathBuf::from("/in/plate.%04d.exr"),
            file_list: vec![PathBuf::from("/in/plate.0001.exr"), PathBuf::from("/in/plate.0002.exr")],
            frame_range: (1, 2),
            padding: 4,
        };
        let seq = IngestItem::new("plate", ItemSource::Sequence(group), ItemKind::Image, context());
        assert!(seq.path().is_none());
        assert_eq!(seq.sequence_paths().len(), 2);
        assert_eq!(seq.frame_range(), Some((1, 2)));
        assert_eq!(seq.extension().as_deref(), Some("exr"));
        assert_eq!(seq.thumbnail_source(), Some(Path::new("/in/plate.0001.exr")));
        assert_eq!(file.thumbnail_source(), None);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("Render".parse::<ItemKind>().unwrap(), ItemKind::Render);
        assert!("sound".parse::<ItemKind>().is_err());
        assert!(ItemKind::Image.is_plate_kind());
        assert!(!ItemKind::Movie.is_plate_kind());
    }
}
