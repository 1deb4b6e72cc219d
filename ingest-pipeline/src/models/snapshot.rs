//! Manifest snapshot

use ingest_common::FieldMap;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::note::ClientNote;

/// One vendor delivery unit described by a manifest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Remapped manifest fields
    pub fields: FieldMap,
    /// Representative path → role tags
    pub files: BTreeMap<PathBuf, Vec<String>>,
    /// Paths every publish of this snapshot depends on
    pub dependencies: Vec<PathBuf>,
    pub note: Option<ClientNote>,
}
