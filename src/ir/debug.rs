//! Debug-information records attached to defined functions.

use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiFile {
    /// Path as handed to the front end.
    pub filename: String,
    pub directory: String,
}

impl DiFile {
    /// Last path component of `filename`, used when correlating records.
    pub fn basename(&self) -> &str {
        Path::new(&self.filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.filename)
    }
}

/// Per-function debug record (name, file and line information).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subprogram {
    pub name: String,
    pub linkage_name: String,
    pub file: DiFile,
    pub line: u32,
    pub scope_line: u32,
}

impl Subprogram {
    /// Patch the name operand only; the linkage name keeps the source
    /// spelling.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}
