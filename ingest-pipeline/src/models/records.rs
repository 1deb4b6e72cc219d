//! Typed views of tracking database records

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::tracking::{entity_id, Entity};

pub const PUBLISH_ENTITY: &str = "PublishedFile";
pub const PLATE_ENTITY: &str = "Element";
pub const NOTE_ENTITY: &str = "Note";
pub const ATTACHMENT_ENTITY: &str = "Attachment";

/// Status given to a new publish
pub const STATUS_COMPLETE: &str = "cmpt";
/// Transient plate status while it is being linked
pub const STATUS_IN_PROGRESS: &str = "ip";

/// A registered publish (`PublishedFile`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub id: i64,
    pub path: PathBuf,
    pub name: String,
    pub version_number: i64,
    pub published_file_type: Option<String>,
    pub status: Option<String>,
}

impl PublishRecord {
    pub fn from_entity(entity: &Entity) -> Option<Self> {
        Some(Self {
            id: entity_id(entity)?,
            path: entity
                .get("path")
                .and_then(|p| p.get("local_path").or(Some(p)))
                .and_then(Value::as_str)
                .map(PathBuf::from)?,
            name: entity.get("name").and_then(Value::as_str)?.to_string(),
            version_number: entity.get("version_number").and_then(Value::as_i64).unwrap_or(0),
            published_file_type: entity
                .get("published_file_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            status: entity
                .get("sg_status_list")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    pub fn is_active(&self) -> bool {
        self.status.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// A plate (`Element`) record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateRecord {
    pub id: i64,
    pub code: String,
    pub cut_in: i64,
    pub cut_out: i64,
    pub status: Option<String>,
    pub published_file_ids: Vec<i64>,
    /// Created by this run rather than found
    pub created: bool,
}

impl PlateRecord {
    pub fn from_entity(entity: &Entity, created: bool) -> Option<Self> {
        let published_file_ids = entity
            .get("sg_published_files")
            .and_then(Value::as_array)
            .map(|links| links.iter().filter_map(|l| l.get("id").and_then(Value::as_i64)).collect())
            .unwrap_or_default();

        Some(Self {
            id: entity_id(entity)?,
            code: entity.get("code").and_then(Value::as_str)?.to_string(),
            cut_in: entity.get("cut_in").and_then(Value::as_i64).unwrap_or(0),
            cut_out: entity.get("cut_out").and_then(Value::as_i64).unwrap_or(0),
            status: entity
                .get("sg_status_list")
                .and_then(Value::as_str)
                .map(str::to_string),
            published_file_ids,
            created,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// A client note (`Note`) record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: i64,
    pub subject: String,
    /// (type, id) of every linked entity
    pub links: Vec<(String, i64)>,
    pub task_ids: Vec<i64>,
    /// Attachment records created for the note
    pub attachment_ids: Vec<i64>,
}

impl NoteRecord {
    pub fn from_entity(entity: &Entity) -> Option<Self> {
        let links = |field: &str| -> Vec<(String, i64)> {
            entity
                .get(field)
                .and_then(Value::as_array)
                .map(|links| {
                    links
                        .iter()
                        .filter_map(|l| {
                            Some((l.get("type")?.as_str()?.to_string(), l.get("id")?.as_i64()?))
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Some(Self {
            id: entity_id(entity)?,
            subject: entity.get("subject").and_then(Value::as_str).unwrap_or_default().to_string(),
            links: links("note_links"),
            task_ids: links("tasks").into_iter().map(|(_, id)| id).collect(),
            attachment_ids: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_record_from_entity() {
        let entity = json!({
            "type": "PublishedFile",
            "id": 3,
            "path": {"local_path": "/proj/a.exr"},
            "name": "bg",
            "version_number": 2,
            "sg_status_list": "cmpt",
        });
        let record = PublishRecord::from_entity(entity.as_object().unwrap()).unwrap();
        assert_eq!(record.path, PathBuf::from("/proj/a.exr"));
        assert_eq!(record.version_number, 2);
        assert!(record.is_active());
    }

    #[test]
    fn test_plate_record_reads_links() {
        let entity = json!({
            "type": "Element",
            "id": 9,
            "code": "bg",
            "cut_in": 1,
            "cut_out": 24,
            "sg_status_list": null,
            "sg_published_files": [{"type": "PublishedFile", "id": 3}],
        });
        let plate = PlateRecord::from_entity(entity.as_object().unwrap(), false).unwrap();
        assert_eq!(plate.published_file_ids, vec![3]);
        assert!(!plate.is_active());
    }

    #[test]
    fn test_note_record_reads_links_and_tasks() {
        let entity = json!({
            "type": "Note",
            "id": 4,
            "subject": "comp notes",
            "note_links": [{"type": "Shot", "id": 2, "name": "sh010"}, {"type": "Version", "id": 8}],
            "tasks": [{"type": "Task", "id": 5}],
        });
        let note = NoteRecord::from_entity(entity.as_object().unwrap()).unwrap();
        assert_eq!(note.links, vec![("Shot".to_string(), 2), ("Version".to_string(), 8)]);
        assert_eq!(note.task_ids, vec![5]);
    }
}
