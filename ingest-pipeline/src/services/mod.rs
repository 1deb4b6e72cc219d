//! Ingest services
//!
//! Collection (`sequence_detector`, `manifest_parser`, `item_builder`),
//! conform (`conform_engine`) and publishing (`publish_registrar`), plus
//! the path, CDL and file helpers they share.

pub mod cdl;
pub mod conform_engine;
pub mod fs_ops;
pub mod item_builder;
pub mod manifest_parser;
pub mod notes;
pub mod path_info;
pub mod publish_registrar;
pub mod sequence_detector;

pub use conform_engine::{ConformEngine, ConformOutcome};
pub use item_builder::{Collected, ItemBuilder};
pub use manifest_parser::{ManifestError, ManifestParser};
pub use notes::{NoteRegistrar, NoteResolution};
pub use publish_registrar::{FinalizeReport, PublishRegistrar};
pub use sequence_detector::SequenceDetector;
