//! Error types for ingest-pipeline
//!
//! Validation problems are reported through `ValidationReport`, not raised.
//! The variants here cover failures that abort an operation.

use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

use crate::services::cdl::CdlError;
use crate::services::manifest_parser::ManifestError;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum IngestError {
    /// Required template keys were absent when rendering a path
    #[error("Cannot resolve template '{template}': missing keys {missing:?}")]
    Resolution {
        template: String,
        missing: BTreeSet<String>,
    },

    /// A path does not match any template or pattern that was expected to parse it
    #[error("Path does not match template '{template}': {path}")]
    NoMatch { template: String, path: PathBuf },

    /// Unknown template name
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    /// Manifest could not be read
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Destination already exists on disk
    #[error("Destination already exists: {paths:?}")]
    Conflict { paths: Vec<PathBuf> },

    /// Tracking database rejected or failed a request
    #[error("Tracking database error: {0}")]
    Remote(String),

    /// Input data is malformed (e.g. a CDL with missing values)
    #[error("Data quality error: {0}")]
    DataQuality(String),

    /// CDL document error
    #[error(transparent)]
    Cdl(#[from] CdlError),

    /// Copy was not byte-exact
    #[error("Checksum mismatch copying {source_path} to {destination}")]
    Checksum {
        source_path: PathBuf,
        destination: PathBuf,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ingest-common error
    #[error("Common error: {0}")]
    Common(#[from] ingest_common::Error),
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Remote(err.to_string())
    }
}

/// Result type for pipeline operations
pub type IngestResult<T> = Result<T, IngestError>;
