//! Client note carried by a manifest snapshot

use ingest_common::FieldMap;
use serde_json::{Map, Value};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientNote {
    pub subject: String,
    pub content: String,
    /// `sg_note_type`; the configured default when `None`
    pub note_type: Option<String>,
    /// Link descriptions as written, e.g. `{type: Shot, code: sh010}`
    pub links: Vec<Map<String, Value>>,
    pub attachments: Vec<PathBuf>,
    /// Snapshot fields, used by identifier templates
    pub fields: FieldMap,
}
