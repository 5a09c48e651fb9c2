use cargo_metadata::MetadataCommand;
use std::fs;
use std::path::Path;
use anyhow::{Context, Result};
use tracing::{debug, warn};

/// One source unit on disk: (path, text).
pub type SourceFile = (String, String);

pub struct ProjectLoader;

impl ProjectLoader {
    /// Read the given files in order. Unreadable files are skipped with a
    /// warning.
    pub fn load_files(paths: &[String]) -> Vec<SourceFile> {
        let mut files = Vec::new();
        for path in paths {
            match fs::read_to_string(path) {
                Ok(content) => files.push((path.clone(), content)),
                Err(e) => warn!("Cannot read input file {}: {}", path, e),
            }
        }
        files
    }

    /// All `.rs` files below `dir`, sorted by path.
    pub fn load_folder(dir: &str) -> Result<Vec<SourceFile>> {
        let mut files = Vec::new();
        Self::collect_rs_recursive(Path::new(dir), &mut files)?;
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    /// Load all source files of the members of a Cargo workspace.
    pub fn load_workspace(manifest_path: &str) -> Result<Vec<SourceFile>> {
        let metadata = MetadataCommand::new()
            .manifest_path(manifest_path)
            .no_deps()
            .exec()
            .context("Failed to execute cargo metadata")?;

        let mut files = Vec::new();

        for package_id in &metadata.workspace_members {
            let Some(package) = metadata.packages.iter().find(|p| &p.id == package_id) else {
                continue;
            };
            for target in &package.targets {
                // Tests, benches and build scripts are not part of the program.
                if !target.kind.iter().any(|k| k == "lib" || k == "bin" || k == "proc-macro") {
                    continue;
                }
                let src_path = &target.src_path;
                let src_dir = src_path.parent().unwrap_or(src_path);
                let before = files.len();
                Self::collect_rs_recursive(src_dir.as_std_path(), &mut files)?;
                debug!(package = %package.name, target = %target.name, files = files.len() - before, "collected target sources");
            }
        }

        // lib and bin targets usually share a src/ directory
        files.sort_by(|a, b| a.0.cmp(&b.0));
        files.dedup_by(|a, b| a.0 == b.0);

        Ok(files)
    }

    fn collect_rs_recursive(dir: &Path, out: &mut Vec<SourceFile>) -> Result<()> {
        if dir.ends_with("target") || dir.ends_with(".git") {
            return Ok(());
        }
        if !dir.exists() {
            return Ok(());
        }

        if dir.is_file() {
            if dir.extension().is_some_and(|ext| ext == "rs") {
                let content = fs::read_to_string(dir)
                    .with_context(|| format!("Failed to read file {}", dir.display()))?;
                out.push((dir.display().to_string(), content));
            }
            return Ok(());
        }

        for entry in fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))? {
            let path = entry?.path();
            if path.is_dir() {
                Self::collect_rs_recursive(&path, out)?;
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read file {}", path.display()))?;
                out.push((path.display().to_string(), content));
            }
        }
        Ok(())
    }
}
