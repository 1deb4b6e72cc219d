//! Frame sequence grouping

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Files that differ only by frame number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceGroup {
    /// Path with the frame number replaced by a placeholder, e.g. `plate.%04d.exr`
    pub sequence_path: PathBuf,
    /// Frame files ordered by frame number
    pub file_list: Vec<PathBuf>,
    /// Inclusive (first, last) frame
    pub frame_range: (i64, i64),
    /// Digit count of the frame number
    pub padding: usize,
}

impl SequenceGroup {
    pub fn frame_count(&self) -> usize {
        self.file_list.len()
    }

    pub fn first_file(&self) -> Option<&Path> {
        self.file_list.first().map(PathBuf::as_path)
    }
}
