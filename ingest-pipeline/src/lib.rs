//! # Ingest Pipeline Library
//!
//! Vendor delivery ingest: collect files and manifests into items, conform
//! them into the work area, validate, publish into the project structure
//! and register the publishes in the tracking database.

pub mod error;
pub mod models;
pub mod services;
pub mod templates;
pub mod tracking;
pub mod validators;
pub mod workflow;

pub use error::{IngestError, IngestResult};
pub use workflow::{BatchReport, ItemOutcome, ItemStatus, Pipeline, PipelineOptions};
