//! Per-unit consumers.
//!
//! The front end hands each parsed unit to a consumer chain. Code
//! generation is the base consumer; metadata extraction decorates it and
//! sees every unit first.

use tracing::debug;

use crate::application::codegen::Codegen;
use crate::domain::ast::SourceUnit;
use crate::domain::extractor::MetadataExtractor;
use crate::domain::store::RecordStore;
use crate::ir::Module;

pub trait UnitConsumer {
    fn handle_translation_unit(&mut self, unit: &SourceUnit);

    /// Module produced for the most recent unit, if not taken yet.
    fn take_module(&mut self) -> Option<Module>;

    fn units_handled(&self) -> usize;
}

pub struct CodegenConsumer {
    codegen: Codegen,
    pending: Option<Module>,
    handled: usize,
}

impl CodegenConsumer {
    pub fn new(codegen: Codegen) -> Self {
        Self { codegen, pending: None, handled: 0 }
    }
}

impl UnitConsumer for CodegenConsumer {
    fn handle_translation_unit(&mut self, unit: &SourceUnit) {
        self.pending = Some(self.codegen.lower_unit(unit));
        self.handled += 1;
    }

    fn take_module(&mut self) -> Option<Module> {
        self.pending.take()
    }

    fn units_handled(&self) -> usize {
        self.handled
    }
}

/// Extracts function records into a shared store, then forwards the unit.
pub struct MetadataConsumer<'s, C> {
    inner: C,
    store: &'s mut RecordStore,
}

impl<'s, C: UnitConsumer> MetadataConsumer<'s, C> {
    pub fn new(inner: C, store: &'s mut RecordStore) -> Self {
        Self { inner, store }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: UnitConsumer> UnitConsumer for MetadataConsumer<'_, C> {
    fn handle_translation_unit(&mut self, unit: &SourceUnit) {
        let added = MetadataExtractor::extract_into(unit, self.store);
        debug!(unit = %unit.path, added, total = self.store.len(), "extracted function records");
        self.inner.handle_translation_unit(unit);
    }

    fn take_module(&mut self) -> Option<Module> {
        self.inner.take_module()
    }

    fn units_handled(&self) -> usize {
        self.inner.units_handled()
    }
}
