//! Path heuristics: versions, frame numbers, publish names
//!
//! A version is `v###` after a `.`, `_` or `-` near the end of a file name;
//! a frame number is the digit run right before the extension.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// (prefix)(sep)v(digits)[.part][.part]
static VERSION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(.+)([._-])v(\d+)\.?([^.]+)?\.?([^.]+)?$").expect("static version pattern")
});

/// (prefix)(sep)(digits).(extension)
static FRAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*)([._-])(\d+)\.([^.]+)$").expect("static frame pattern"));

/// A version token anywhere in a path, directories included
static VERSION_TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([._/-])v(\d+)").expect("static version token pattern"));

/// Files carrying only a version before the extension, e.g. `plate.v003.mov`
static VERSION_ONLY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[._-]v\d+\.[^.]+$").expect("static version-only pattern"));

static INVALID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("static sanitize pattern"));

/// Parts of a file name split around its frame number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameParts {
    pub prefix: String,
    pub separator: String,
    pub digits: String,
    pub extension: String,
}

impl FrameParts {
    pub fn frame(&self) -> Option<i64> {
        self.digits.parse().ok()
    }

    pub fn padding(&self) -> usize {
        self.digits.len()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Split a file name around its frame number
pub fn frame_parts(file_name: &str) -> Option<FrameParts> {
    let captures = FRAME_REGEX.captures(file_name)?;
    Some(FrameParts {
        prefix: captures.get(1)?.as_str().to_string(),
        separator: captures.get(2)?.as_str().to_string(),
        digits: captures.get(3)?.as_str().to_string(),
        extension: captures.get(4)?.as_str().to_string(),
    })
}

/// File name is `<name>.v###.<ext>` with no frame number
pub fn is_version_only(file_name: &str) -> bool {
    VERSION_ONLY_REGEX.is_match(file_name)
}

/// Version number in the file name
pub fn version_number(path: &Path) -> Option<i64> {
    VERSION_REGEX
        .captures(&file_name(path))
        .and_then(|c| c.get(3))
        .and_then(|m| m.as_str().parse().ok())
}

/// Display name for publishing: version removed, frame numbers shown as `#`
///
/// ```text
/// /path/scene.v001.ma       -> scene.ma
/// /path/my_file.001.jpg     -> my_file.###.jpg   (sequence)
/// /path/plate_v003.1001.exr -> plate.exr
/// ```
pub fn publish_name(path: &Path, sequence: bool) -> String {
    let name = file_name(path);

    if let Some(captures) = VERSION_REGEX.captures(&name) {
        let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let extension = captures
            .get(5)
            .or_else(|| captures.get(4))
            .map(|m| m.as_str())
            .unwrap_or_default();
        return if extension.is_empty() {
            prefix.to_string()
        } else {
            format!("{}.{}", prefix, extension)
        };
    }

    if sequence {
        if let Some(parts) = frame_parts(&name) {
            return format!(
                "{}{}{}.{}",
                parts.prefix,
                parts.separator,
                "#".repeat(parts.padding()),
                parts.extension
            );
        }
    }

    name
}

/// Bare publish name: no directory, version, frame or extension, sanitized
pub fn publish_base_name(path: &Path) -> String {
    let name = file_name(path);

    let base = if let Some(captures) = VERSION_REGEX.captures(&name) {
        captures.get(1).map(|m| m.as_str().to_string()).unwrap_or_default()
    } else if let Some(parts) = frame_parts(&name) {
        parts.prefix
    } else {
        // A sequence placeholder such as `plate.%04d.exr` has no digits to match
        let mut stem = name.as_str();
        while let Some((head, _)) = stem.rsplit_once('.') {
            stem = head;
        }
        stem.to_string()
    };

    sanitize(&base)
}

/// Path with the frame number replaced by `frame_spec`; `None` without a frame
pub fn frame_sequence_path(path: &Path, frame_spec: &str) -> Option<PathBuf> {
    let parts = frame_parts(&file_name(path))?;
    let spec = if frame_spec.is_empty() {
        format!("%0{}d", parts.padding())
    } else {
        frame_spec.to_string()
    };
    let seq_name = format!("{}{}{}.{}", parts.prefix, parts.separator, spec, parts.extension);
    Some(match path.parent() {
        Some(parent) => parent.join(seq_name),
        None => PathBuf::from(seq_name),
    })
}

/// Path with every version token replaced by `v#`, for matching versions of
/// the same publish
pub fn version_agnostic_path(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    VERSION_TOKEN_REGEX.replace_all(&text, "${1}v#").into_owned()
}

/// Replace runs of characters outside `[A-Za-z0-9]` with `_`
///
/// Strings already made of letters, digits and underscores pass unchanged.
pub fn sanitize(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return value.to_string();
    }
    INVALID_CHARS.replace_all(value, "_").into_owned()
}
