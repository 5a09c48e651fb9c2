//! Static library packaging through an external `ar`.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::config::ArchiverConfig;
use crate::error::ArchiveError;
use crate::ports::Archiver;

/// The command that would be run, kept separate so it can be tested
/// without spawning anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveCommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

pub fn build_command_spec(config: &ArchiverConfig, archive: &Path, objects: &[&Path]) -> ArchiveCommandSpec {
    let mut args = vec![config.flags.clone(), archive.display().to_string()];
    args.extend(objects.iter().map(|o| o.display().to_string()));
    ArchiveCommandSpec { program: config.program.clone(), args }
}

pub struct ArCommand {
    config: ArchiverConfig,
}

impl ArCommand {
    pub fn new(config: ArchiverConfig) -> Self {
        Self { config }
    }
}

impl Archiver for ArCommand {
    fn archive(&self, archive: &Path, objects: &[&Path]) -> Result<(), ArchiveError> {
        let spec = build_command_spec(&self.config, archive, objects);
        debug!(program = %spec.program, args = ?spec.args, "running archiver");

        let output = Command::new(&spec.program)
            .args(&spec.args)
            .output()
            .map_err(|source| ArchiveError::Spawn { program: spec.program.clone(), source })?;

        if !output.status.success() {
            return Err(ArchiveError::Failed {
                program: spec.program,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command_spec() {
        let spec = build_command_spec(
            &ArchiverConfig::default(),
            Path::new("libfoo.a"),
            &[Path::new("instrumented.o")],
        );
        assert_eq!(spec.program, "ar");
        assert_eq!(spec.args, vec!["rcs", "libfoo.a", "instrumented.o"]);
    }

    #[test]
    fn test_missing_program() {
        let archiver = ArCommand::new(ArchiverConfig {
            program: "tracesmith-no-such-ar".to_string(),
            flags: "rcs".to_string(),
        });
        let err = archiver.archive(Path::new("x.a"), &[Path::new("x.o")]).unwrap_err();
        assert!(matches!(err, ArchiveError::Spawn { .. }));
    }

    #[test]
    #[ignore] // Requires `ar` in PATH
    fn test_archive_with_ar() {
        let dir = tempfile::tempdir().unwrap();
        let object = dir.path().join("a.o");
        std::fs::write(&object, b"not really an object").unwrap();
        let archive = dir.path().join("liba.a");
        ArCommand::new(ArchiverConfig::default()).archive(&archive, &[&object]).unwrap();
        assert!(archive.exists());
    }
}
