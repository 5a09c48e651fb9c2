//! JSON metadata document.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use crate::domain::record::FunctionRecord;
use crate::ports::MetadataSink;

pub struct JsonMetadataWriter;

/// Records as a JSON array indented by four spaces.
pub fn render_records(records: &[FunctionRecord]) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    records.serialize(&mut ser)?;
    Ok(out)
}

impl MetadataSink for JsonMetadataWriter {
    fn write_records(&self, records: &[FunctionRecord], path: &Path) -> std::io::Result<()> {
        let bytes = render_records(records)?;
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&bytes)?;
        writer.flush()
    }
}
