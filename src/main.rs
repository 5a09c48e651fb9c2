// Command-line entry point for tracesmith.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tracesmith::application::{InstrumentUsecase, PipelineReport};
use tracesmith::config::PipelineConfig;
use tracesmith::domain::injector::ClosePlacement;
use tracesmith::infrastructure::syn_frontend::system_roots_from_flags;
use tracesmith::infrastructure::{ArCommand, JsonMetadataWriter, ObjectBackend, ProjectLoader, SynFrontEnd};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Source units, in link order
    units: Vec<String>,

    /// Input source file path (can specify multiple)
    #[arg(short, long)]
    input: Vec<String>,

    /// Input source folder(s), searched recursively for .rs files
    #[arg(short = 'd', long)]
    folder: Vec<String>,

    /// Workspace Cargo.toml
    #[arg(long)]
    workspace: Option<String>,

    /// Pipeline configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Metadata document path
    #[arg(long)]
    metadata_out: Option<PathBuf>,

    /// Intermediate object path (removed after archiving)
    #[arg(long)]
    object_out: Option<PathBuf>,

    /// Static library path
    #[arg(long)]
    archive_out: Option<PathBuf>,

    /// Target triple (defaults to the host)
    #[arg(long)]
    target: Option<String>,

    /// Also write the instrumented IR to this path
    #[arg(long)]
    emit_ir: Option<PathBuf>,

    /// Close the trace file only at the last return site
    #[arg(long)]
    legacy_close: bool,

    /// Verbose diagnostics
    #[arg(long)]
    debug: bool,

    /// Compiler flags (`-isystem <dir>` marks system code)
    #[arg(last = true)]
    compiler_flags: Vec<String>,
}

fn init_tracing(debug: bool) {
    let default = if debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(path) = &cli.metadata_out {
        config.output.metadata = path.clone();
    }
    if let Some(path) = &cli.object_out {
        config.output.object = path.clone();
    }
    if let Some(path) = &cli.archive_out {
        config.output.archive = path.clone();
    }
    if let Some(path) = &cli.emit_ir {
        config.output.emit_ir = Some(path.clone());
    }
    if let Some(target) = &cli.target {
        config.backend.target = Some(target.clone());
    }
    if cli.legacy_close {
        config.trace.close_placement = ClosePlacement::LastReturnOnly;
    }
    config.frontend.system_roots.extend(system_roots_from_flags(&cli.compiler_flags));
    Ok(config)
}

fn collect_sources(cli: &Cli) -> Result<Vec<(String, String)>> {
    let mut inputs = cli.units.clone();
    inputs.extend(cli.input.iter().cloned());
    let mut sources = ProjectLoader::load_files(&inputs);

    for folder in &cli.folder {
        sources.extend(ProjectLoader::load_folder(folder)?);
    }

    if let Some(manifest) = &cli.workspace {
        let ws_sources = ProjectLoader::load_workspace(manifest)?;
        info!("workspace collected {} .rs files", ws_sources.len());
        sources.extend(ws_sources);
    }
    Ok(sources)
}

fn run(cli: &Cli) -> Result<PipelineReport> {
    let config = load_config(cli)?;
    let sources = collect_sources(cli)?;

    let frontend = SynFrontEnd::new(config.frontend.system_roots.clone());
    let archiver = ArCommand::new(config.archiver.clone());
    let usecase = InstrumentUsecase {
        frontend: &frontend,
        backend: &ObjectBackend,
        archiver: &archiver,
        metadata_sink: &JsonMetadataWriter,
    };
    Ok(usecase.run(&sources, &config)?)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::from(1) } else { ExitCode::SUCCESS };
        }
    };
    init_tracing(cli.debug);

    match run(&cli) {
        Ok(report) => {
            println!(
                "Instrumentation completed! {} functions in {} units, {} return sites traced, library written to {}",
                report.records.len(),
                report.units,
                report.injection.return_sites,
                report.archive.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<tracesmith::error::PipelineError>()
                .map_or(1, |p| p.exit_code());
            ExitCode::from(code)
        }
    }
}
