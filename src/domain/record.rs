//! Per-function metadata records.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Source metadata of one function definition, as written to the
/// metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRecord {
    /// Compiled symbol name (`main` already remapped to `main_0`).
    pub name: String,
    pub signature: String,
    #[serde(rename = "filename")]
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub start_col: u32,
    pub end_col: u32,
    /// Filled in by call-graph correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_functions: Option<BTreeSet<String>>,
}

/// Identity of a record: `(name, file)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub name: String,
    pub file: String,
}

impl FunctionRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey { name: self.name.clone(), file: self.file.clone() }
    }

    /// File name without directories.
    pub fn file_basename(&self) -> &str {
        basename(&self.file)
    }
}

pub(crate) fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}
