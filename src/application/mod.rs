//! Application layer: the instrumentation pipeline.

pub mod codegen;
pub mod consumer;
pub mod image;

use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::domain::correlator::{CallGraphCorrelator, CorrelationReport};
use crate::domain::injector::{InjectionReport, TraceInjector};
use crate::domain::record::FunctionRecord;
use crate::domain::store::RecordStore;
use crate::error::PipelineError;
use crate::ir::{printer, Module};
use crate::ports::{Archiver, Backend, CodegenOptions, FrontEnd, MetadataSink};

use self::codegen::Codegen;
use self::consumer::{CodegenConsumer, MetadataConsumer, UnitConsumer};
use self::image::{rename_entry_point, ImageAccumulator};

/// Outcome of a successful run.
#[derive(Debug)]
pub struct PipelineReport {
    pub records: Vec<FunctionRecord>,
    pub units: usize,
    /// Units that failed to parse.
    pub dropped_units: Vec<String>,
    /// Units whose module could not be linked into the image.
    pub unlinked_units: Vec<String>,
    pub renamed_main: bool,
    pub correlation: CorrelationReport,
    pub injection: InjectionReport,
    pub target: String,
    pub archive: PathBuf,
}

pub struct InstrumentUsecase<'a> {
    pub frontend: &'a dyn FrontEnd,
    pub backend: &'a dyn Backend,
    pub archiver: &'a dyn Archiver,
    pub metadata_sink: &'a dyn MetadataSink,
}

/// Records and image after every unit has been consumed.
struct Compiled {
    store: RecordStore,
    image: Option<Module>,
    units: usize,
    dropped: Vec<String>,
    unlinked: Vec<String>,
}

impl<'a> InstrumentUsecase<'a> {
    /// Run the whole pipeline over `sources` (path, text) in order.
    pub fn run(&self, sources: &[(String, String)], config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
        if sources.is_empty() {
            return Err(PipelineError::NoInputs);
        }
        config.trace.validate()?;
        let options = CodegenOptions::default();

        let Compiled { mut store, image, units, dropped, unlinked } = self.compile_units(sources, config, &options);
        let mut image = image.ok_or(PipelineError::NoImage)?;

        let renamed_main = rename_entry_point(&mut image);

        let correlation = CallGraphCorrelator::correlate(&image, &mut store);

        let metadata = &config.output.metadata;
        self.metadata_sink
            .write_records(store.records(), metadata)
            .map_err(|source| PipelineError::Metadata { path: metadata.clone(), source })?;
        info!("Data written to {}", metadata.display());

        let injection = TraceInjector::new(config.trace.clone()).instrument_module(&mut image);

        if let Some(path) = &config.output.emit_ir {
            std::fs::write(path, printer::print_module(&image, true))
                .map_err(|source| PipelineError::EmitIr { path: path.clone(), source })?;
            info!("Instrumented IR written to {}", path.display());
        }

        let triple = config.backend.target.clone().unwrap_or_else(|| self.backend.host_triple());
        let machine = self.backend.lookup_target(&triple)?;
        image.target_triple = Some(machine.triple().to_string());
        image.data_layout = Some(machine.data_layout().to_string());

        let object = &config.output.object;
        machine.emit_object(&image, &options, object)?;
        drop(image);

        let archive = &config.output.archive;
        self.archiver.archive(archive, &[object.as_path()])?;
        info!("Static library created: {}", archive.display());

        std::fs::remove_file(object).map_err(|source| PipelineError::Cleanup { path: object.clone(), source })?;

        Ok(PipelineReport {
            records: store.into_records(),
            units,
            dropped_units: dropped,
            unlinked_units: unlinked,
            renamed_main,
            correlation,
            injection,
            target: triple,
            archive: archive.clone(),
        })
    }

    fn compile_units(&self, sources: &[(String, String)], config: &PipelineConfig, options: &CodegenOptions) -> Compiled {
        let mut store = RecordStore::new(config.frontend.dedup);
        let mut accumulator = ImageAccumulator::new();
        let mut dropped = Vec::new();
        let mut unlinked = Vec::new();

        let mut consumer = MetadataConsumer::new(
            CodegenConsumer::new(Codegen::new(options.debug_info)),
            &mut store,
        );
        for (path, source) in sources {
            let unit = match self.frontend.parse_unit(path, source) {
                Ok(unit) => unit,
                Err(e) => {
                    warn!("{}", e);
                    dropped.push(path.clone());
                    continue;
                }
            };
            consumer.handle_translation_unit(&unit);
            let Some(module) = consumer.take_module() else {
                continue;
            };
            if let Err(e) = accumulator.accumulate(module) {
                error!("Failed to link {}: {}", path, e);
                unlinked.push(path.clone());
            }
        }
        let units = consumer.units_handled();
        drop(consumer);

        Compiled { store, image: accumulator.finish(), units, dropped, unlinked }
    }
}
