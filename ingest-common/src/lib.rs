//! # Ingest Common Library
//!
//! Shared code for the ingest pipeline crates including:
//! - Error and result types
//! - Configuration loading (TOML) and config file resolution
//! - Field-map value types shared by templates, items and records
//! - Event types (IngestEvent enum) and the EventBus
//! - Local tracking store initialization

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod fields;

pub use error::{Error, Result};
pub use fields::{EntityRef, FieldMap, FieldValue, FrameSpec};
