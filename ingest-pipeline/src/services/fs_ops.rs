//! File copy with no-clobber semantics and SHA-256 verification

use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{IngestError, IngestResult};

const CHUNK_SIZE: usize = 1024 * 1024;

fn hash_file_blocking(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path).map_err(|e| {
        std::io::Error::new(e.kind(), format!("Failed to open {} for hashing: {}", path.display(), e))
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Copy `source` to `destination`, failing if `destination` exists;
/// returns the SHA-256 shared by both files
///
/// A destination created by this call is removed again if the copy fails.
fn copy_verified_blocking(source: &Path, destination: &Path) -> IngestResult<String> {
    let input = File::open(source)?;

    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let output = match OpenOptions::new().write(true).create_new(true).open(destination) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(IngestError::Conflict {
                paths: vec![destination.to_path_buf()],
            });
        }
        Err(e) => return Err(e.into()),
    };

    let result = write_and_verify(input, output, source, destination);
    if result.is_err() {
        if let Err(e) = std::fs::remove_file(destination) {
            tracing::warn!(
                destination = %destination.display(),
                error = %e,
                "Failed to remove partial copy"
            );
        }
    }
    result
}

fn write_and_verify(mut input: File, mut output: File, source: &Path, destination: &Path) -> IngestResult<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = input.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        output.write_all(&buffer[..bytes_read])?;
    }
    output.sync_all()?;
    drop(output);

    let source_hash = format!("{:x}", hasher.finalize());
    let destination_hash = hash_file_blocking(destination)?;
    if source_hash != destination_hash {
        return Err(IngestError::Checksum {
            source_path: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });
    }

    Ok(source_hash)
}

/// SHA-256 of a file, hex encoded
pub async fn sha256_file(path: &Path) -> IngestResult<String> {
    let path_buf = path.to_path_buf();
    let hash = tokio::task::spawn_blocking(move || hash_file_blocking(&path_buf))
        .await
        .map_err(|e| IngestError::Common(ingest_common::Error::Internal(format!("Hash task failed: {}", e))))??;
    Ok(hash)
}

/// Copy every (source, destination) pair in order
///
/// Stops at the first failure; files already copied stay on disk.
pub async fn copy_files(pairs: Vec<(PathBuf, PathBuf)>) -> IngestResult<Vec<PathBuf>> {
    let count = pairs.len();
    let copied = tokio::task::spawn_blocking(move || -> IngestResult<Vec<PathBuf>> {
        let mut copied = Vec::with_capacity(pairs.len());
        for (source, destination) in pairs {
            let hash = copy_verified_blocking(&source, &destination)?;
            tracing::trace!(
                source = %source.display(),
                destination = %destination.display(),
                sha256 = %hash,
                "Copied file"
            );
            copied.push(destination);
        }
        Ok(copied)
    })
    .await
    .map_err(|e| IngestError::Common(ingest_common::Error::Internal(format!("Copy task failed: {}", e))))??;

    tracing::debug!(files = count, "Copy complete");
    Ok(copied)
}
