//! Pipeline configuration.
//!
//! Every field has a default, so an empty (or absent) TOML file yields the
//! behavior of a plain command-line run. Command-line flags are applied on
//! top of the loaded file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::injector::TraceOptions;
use crate::domain::store::DedupPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub output: OutputConfig,
    pub trace: TraceOptions,
    pub archiver: ArchiverConfig,
    pub frontend: FrontendConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub metadata: PathBuf,
    pub object: PathBuf,
    pub archive: PathBuf,
    /// Write the instrumented IR here as well.
    pub emit_ir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            metadata: PathBuf::from("functions.json"),
            object: PathBuf::from("instrumented.o"),
            archive: PathBuf::from("libfoo.a"),
            emit_ir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverConfig {
    pub program: String,
    pub flags: String,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self { program: "ar".to_string(), flags: "rcs".to_string() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// Directories whose files count as system locations.
    pub system_roots: Vec<PathBuf>,
    pub dedup: DedupPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Target triple; the host triple when unset.
    pub target: Option<String>,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.trace.validate()?;
        Ok(config)
    }
}
