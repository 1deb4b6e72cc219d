//! ASC CDL documents (`.cc`, `.ccc`, `.cdl`)
//!
//! Vendors deliver grades in any of the three containers. The pipeline
//! accepts exactly one `ColorCorrection` per document and republishes it as
//! a canonical single-correction `.cc` file.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Name every republished grade gets, so color configs can find it
pub const CANONICAL_CDL_NAME: &str = "avid_grade";

const CDL_ELEMENTS: [&str; 4] = ["Slope", "Offset", "Power", "Saturation"];

#[derive(Debug, Error)]
pub enum CdlError {
    #[error("Document contains {0} ColorCorrection elements; exactly one is allowed")]
    MultipleCorrections(usize),

    #[error("Document contains no ColorCorrection element")]
    NoCorrection,

    #[error("Missing CDL values: {}", .0.join(", "))]
    MissingValues(Vec<String>),

    #[error("Invalid CDL XML: {0}")]
    Xml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Values of one color correction, kept as the text found in the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdlData {
    pub id: String,
    pub slope: String,
    pub offset: String,
    pub power: String,
    pub saturation: String,
}

/// Read and validate a CDL document from disk
pub fn read_cdl(path: &Path) -> Result<CdlData, CdlError> {
    let text = std::fs::read_to_string(path)?;
    parse_cdl(&text)
}

/// Parse and validate CDL text
pub fn parse_cdl(text: &str) -> Result<CdlData, CdlError> {
    let doc = roxmltree::Document::parse(text).map_err(|e| CdlError::Xml(e.to_string()))?;

    let corrections: Vec<_> = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "ColorCorrection")
        .collect();

    let correction = match corrections.as_slice() {
        [] => return Err(CdlError::NoCorrection),
        [single] => *single,
        many => return Err(CdlError::MultipleCorrections(many.len())),
    };

    let value_of = |element: &str| -> Option<String> {
        correction
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == element)
            .and_then(|n| n.text())
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
    };

    let mut missing = Vec::new();
    let mut values = Vec::with_capacity(4);
    for element in CDL_ELEMENTS {
        match value_of(element) {
            Some(value) => values.push(value),
            None => {
                missing.push(element.to_string());
                values.push(String::new());
            }
        }
    }
    if !missing.is_empty() {
        return Err(CdlError::MissingValues(missing));
    }

    let mut values = values.into_iter();
    Ok(CdlData {
        id: correction.attribute("id").unwrap_or_default().to_string(),
        slope: values.next().unwrap_or_default(),
        offset: values.next().unwrap_or_default(),
        power: values.next().unwrap_or_default(),
        saturation: values.next().unwrap_or_default(),
    })
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Canonical `.cc` document text
pub fn render_cc(data: &CdlData) -> String {
    let mut out = String::new();
    let _ = writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(out, r#"<ColorCorrection id="{}">"#, escape(&data.id));
    let _ = writeln!(out, "  <SOPNode>");
    let _ = writeln!(out, "    <Slope>{}</Slope>", escape(&data.slope));
    let _ = writeln!(out, "    <Offset>{}</Offset>", escape(&data.offset));
    let _ = writeln!(out, "    <Power>{}</Power>", escape(&data.power));
    let _ = writeln!(out, "  </SOPNode>");
    let _ = writeln!(out, "  <SatNode>");
    let _ = writeln!(out, "    <Saturation>{}</Saturation>", escape(&data.saturation));
    let _ = writeln!(out, "  </SatNode>");
    let _ = writeln!(out, "</ColorCorrection>");
    out
}

/// Write the canonical document; never overwrites an existing file
pub fn write_cc(path: &Path, data: &CdlData) -> Result<(), CdlError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(render_cc(data).as_bytes())?;
    file.sync_all()?;
    tracing::debug!(path = %path.display(), id = %data.id, "Wrote CC file");
    Ok(())
}
