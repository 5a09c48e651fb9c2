// Ports: the external collaborators the pipeline drives.

use std::path::Path;

use serde::Serialize;

use crate::domain::ast::SourceUnit;
use crate::domain::record::FunctionRecord;
use crate::error::{ArchiveError, BackendError, FrontEndError};
use crate::ir::Module;

/// Parses one source unit into a declaration tree.
pub trait FrontEnd {
    fn parse_unit(&self, path: &str, source: &str) -> Result<SourceUnit, FrontEndError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelocModel {
    Static,
    Pic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugInfo {
    None,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptLevel {
    O0,
    O1,
    O2,
    O3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodegenOptions {
    pub reloc: RelocModel,
    pub debug_info: DebugInfo,
    pub opt_level: OptLevel,
}

impl Default for CodegenOptions {
    /// Position independent, full debug info, unoptimized.
    fn default() -> Self {
        Self { reloc: RelocModel::Pic, debug_info: DebugInfo::Full, opt_level: OptLevel::O0 }
    }
}

pub trait TargetMachine {
    fn triple(&self) -> &str;
    fn data_layout(&self) -> &str;
    fn emit_object(&self, module: &Module, options: &CodegenOptions, path: &Path) -> Result<(), BackendError>;
}

pub trait Backend {
    fn host_triple(&self) -> String;
    fn lookup_target(&self, triple: &str) -> Result<Box<dyn TargetMachine>, BackendError>;
}

/// Packs object files into a static library.
pub trait Archiver {
    fn archive(&self, archive: &Path, objects: &[&Path]) -> Result<(), ArchiveError>;
}

pub trait MetadataSink {
    fn write_records(&self, records: &[FunctionRecord], path: &Path) -> std::io::Result<()>;
}
