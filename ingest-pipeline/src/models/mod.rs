//! Data models for the ingest pipeline

pub mod context;
pub mod ingest_item;
pub mod note;
pub mod records;
pub mod sequence;
pub mod snapshot;

pub use context::Context;
pub use ingest_item::{IngestItem, ItemKind, ItemProperties, ItemSource};
pub use note::ClientNote;
pub use records::{NoteRecord, PlateRecord, PublishRecord};
pub use sequence::SequenceGroup;
pub use snapshot::Snapshot;
