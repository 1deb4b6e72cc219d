//! Frame sequence detection
//!
//! Groups the files of one directory (not recursive) that differ only by
//! frame number. The listing is sorted by file name so grouping, and the
//! padding taken from the first file of each group, are deterministic.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::path_info::{self, frame_parts};
use crate::error::IngestResult;
use crate::models::SequenceGroup;

/// Frame placeholder tokens: `%04d`, `%d`, `####`, `$F4`, `*`
static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%0?(\d*)d|(#+)|\$F(\d*)|\*").expect("static placeholder pattern"));

/// Finds frame sequences on disk
pub struct SequenceDetector {
    ignore_patterns: Vec<String>,
}

impl Default for SequenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceDetector {
    /// Ignores system files like .DS_Store and Thumbs.db
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![".DS_Store".to_string(), "Thumbs.db".to_string()],
        }
    }

    fn is_ignored(&self, name: &str) -> bool {
        name.starts_with("._") || self.ignore_patterns.iter().any(|p| p == name)
    }

    /// Regular files directly inside `dir`, sorted by name
    pub fn list_files(&self, dir: &Path) -> IngestResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", dir.display(), e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if self.is_ignored(&entry.file_name().to_string_lossy()) {
                continue;
            }
            files.push(entry.into_path());
        }
        Ok(files)
    }

    /// Group the files of `dir` into sequences
    ///
    /// `extensions` (lowercase, no dot) limits which sequences are returned;
    /// empty accepts all. `frame_spec` replaces the frame number in
    /// `sequence_path`; `None` uses `%0Nd` with the group's padding.
    pub fn find_sequences(
        &self,
        dir: &Path,
        extensions: &[String],
        frame_spec: Option<&str>,
    ) -> IngestResult<Vec<SequenceGroup>> {
        tracing::debug!(dir = %dir.display(), "Looking for sequences");

        struct Pending {
            sequence_path: PathBuf,
            padding: usize,
            frames: Vec<(i64, PathBuf)>,
        }

        let mut groups: BTreeMap<String, Pending> = BTreeMap::new();

        for path in self.list_files(dir)? {
            let name = match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            if path_info::is_version_only(&name) {
                continue;
            }
            let Some(parts) = frame_parts(&name) else {
                continue;
            };
            let Some(frame) = parts.frame() else {
                continue;
            };

            if !extensions.is_empty() && !extensions.contains(&parts.extension.to_ascii_lowercase()) {
                continue;
            }

            let key = format!("{}{}.{}", parts.prefix, parts.separator, parts.extension);
            let group = groups.entry(key).or_insert_with(|| {
                let spec = frame_spec
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("%0{}d", parts.padding()));
                Pending {
                    sequence_path: dir.join(format!(
                        "{}{}{}.{}",
                        parts.prefix, parts.separator, spec, parts.extension
                    )),
                    padding: parts.padding(),
                    frames: Vec::new(),
                }
            });
            group.frames.push((frame, path));
        }

        let mut sequences: Vec<SequenceGroup> = groups
            .into_values()
            .map(|mut pending| {
                pending.frames.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
                let first = pending.frames.first().map(|f| f.0).unwrap_or(0);
                let last = pending.frames.last().map(|f| f.0).unwrap_or(0);
                SequenceGroup {
                    sequence_path: pending.sequence_path,
                    file_list: pending.frames.into_iter().map(|(_, p)| p).collect(),
                    frame_range: (first, last),
                    padding: pending.padding,
                }
            })
            .collect();
        sequences.sort_by(|a, b| a.sequence_path.cmp(&b.sequence_path));

        for sequence in &sequences {
            tracing::debug!(
                sequence = %sequence.sequence_path.display(),
                frames = sequence.file_list.len(),
                first = sequence.frame_range.0,
                last = sequence.frame_range.1,
                "Found sequence"
            );
        }

        Ok(sequences)
    }
}

/// Frame number of a frame file
pub fn frame_number(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_string_lossy();
    frame_parts(&name)?.frame()
}

pub use path_info::frame_sequence_path;

/// Concrete frame path for a placeholder path
///
/// The placeholder's own width wins (`%04d`, `####`, `$F4`); `padding`
/// applies to `%d`, `$F` and `*`.
pub fn path_for_frame(sequence_path: &Path, frame: i64, padding: usize) -> Option<PathBuf> {
    let name = sequence_path.file_name()?.to_string_lossy().into_owned();
    let captures = PLACEHOLDER_REGEX.captures(&name)?;
    let whole = captures.get(0)?;

    let width = if let Some(hashes) = captures.get(2) {
        hashes.as_str().len()
    } else {
        captures
            .get(1)
            .or_else(|| captures.get(3))
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .unwrap_or(padding)
    };

    let frame_name = format!(
        "{}{:0width$}{}",
        &name[..whole.start()],
        frame,
        &name[whole.end()..],
        width = width
    );
    Some(sequence_path.with_file_name(frame_name))
}

/// Files on disk matching a placeholder path
///
/// A path without a placeholder yields itself when it exists. A missing
/// directory yields nothing.
pub fn existing_frames(sequence_path: &Path) -> IngestResult<Vec<PathBuf>> {
    let Some(name) = sequence_path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(Vec::new());
    };

    let Some(placeholder) = PLACEHOLDER_REGEX.find(&name) else {
        return Ok(if sequence_path.exists() {
            vec![sequence_path.to_path_buf()]
        } else {
            Vec::new()
        });
    };

    let dir = match sequence_path.parent() {
        Some(dir) if dir.is_dir() => dir,
        _ => return Ok(Vec::new()),
    };

    let pattern = format!(
        "^{}\\d+{}$",
        regex::escape(&name[..placeholder.start()]),
        regex::escape(&name[placeholder.end()..])
    );
    let matcher = Regex::new(&pattern)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    let frames = SequenceDetector::new()
        .list_files(dir)?
        .into_iter()
        .filter(|path| {
            path.file_name()
                .map(|n| matcher.is_match(&n.to_string_lossy()))
                .unwrap_or(false)
        })
        .collect();
    Ok(frames)
}
