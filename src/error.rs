// Error types for each layer of the pipeline.

use std::path::PathBuf;

use thiserror::Error;

pub use crate::ir::LinkError;

#[derive(Error, Debug)]
pub enum FrontEndError {
    #[error("failed to parse {path}:{line}:{column}: {message}")]
    Parse {
        path: String,
        line: usize,
        column: usize,
        message: String,
    },
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("no target for triple '{0}'")]
    UnknownTarget(String),

    #[error("failed to emit object for {module}: {message}")]
    Emit { module: String, message: String },

    #[error("failed to write object file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to run archiver '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archiver '{program}' exited with status {status:?}: {stderr}")]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("trace.path_buffer_len must be between 1 and {}, got {0}", i64::MAX)]
    PathBufferLen(u64),
}

/// Fatal conditions of a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no input units given")]
    NoInputs,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no unit could be compiled into a program image")]
    NoImage,

    #[error("failed to write metadata to {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write IR to {}: {source}", path.display())]
    EmitIr {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("failed to remove {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        1
    }
}
