//! Module linker.
//!
//! Owns the destination module. Linking a source module either succeeds
//! completely or leaves the destination untouched.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use super::function::Linkage;
use super::module::Module;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LinkError {
    #[error("symbol multiply defined: '{symbol}' (while linking {module})")]
    DuplicateSymbol { symbol: String, module: String },
}

/// What one successful link changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkSummary {
    pub added: usize,
    pub resolved_declarations: usize,
    /// Internal symbols renamed to avoid a collision: (old, new).
    pub renamed: Vec<(String, String)>,
}

pub struct Linker {
    dest: Module,
}

impl Linker {
    pub fn new(base: Module) -> Self {
        Self { dest: base }
    }

    pub fn module(&self) -> &Module {
        &self.dest
    }

    pub fn into_module(self) -> Module {
        self.dest
    }

    pub fn link_in_module(&mut self, mut src: Module) -> Result<LinkSummary, LinkError> {
        self.check(&src)?;

        let mut summary = LinkSummary::default();

        // Internal definitions move out of the way of anything already present.
        let mut taken: HashSet<String> = self
            .dest
            .functions
            .iter()
            .chain(src.functions.iter())
            .map(|f| f.name.clone())
            .collect();
        let mut renames: HashMap<String, String> = HashMap::new();
        for f in &src.functions {
            if f.is_declaration() || f.linkage != Linkage::Internal {
                continue;
            }
            if self.dest.get_function(&f.name).is_some() {
                let fresh = (1..)
                    .map(|n| format!("{}.{}", f.name, n))
                    .find(|c| !taken.contains(c))
                    .unwrap_or_else(|| f.name.clone());
                taken.insert(fresh.clone());
                renames.insert(f.name.clone(), fresh.clone());
                summary.renamed.push((f.name.clone(), fresh));
            }
        }

        // Incoming external definitions win over internal ones already here.
        let mut dest_renames: HashMap<String, String> = HashMap::new();
        for f in src.defined_functions().filter(|f| f.linkage == Linkage::External) {
            let clash = self
                .dest
                .get_function(&f.name)
                .is_some_and(|d| !d.is_declaration() && d.linkage == Linkage::Internal);
            if clash {
                let fresh = (1..)
                    .map(|n| format!("{}.{}", f.name, n))
                    .find(|c| !taken.contains(c))
                    .unwrap_or_else(|| f.name.clone());
                taken.insert(fresh.clone());
                dest_renames.insert(f.name.clone(), fresh.clone());
                summary.renamed.push((f.name.clone(), fresh));
            }
        }
        if !dest_renames.is_empty() {
            for d in &mut self.dest.functions {
                if let Some(fresh) = dest_renames.get(&d.name) {
                    d.name = fresh.clone();
                }
                d.remap_callees(&dest_renames);
            }
        }

        let mut global_map: HashMap<String, String> = HashMap::new();
        for g in src.globals.iter() {
            if let super::instruction::Value::Global(name) = self.dest.globals.intern(&g.value) {
                if name != g.name {
                    global_map.insert(g.name.clone(), name);
                }
            }
        }

        for f in &mut src.functions {
            if let Some(fresh) = renames.get(&f.name) {
                f.name = fresh.clone();
            }
            f.remap_callees(&renames);
            f.remap_globals(&global_map);
        }

        for f in src.functions {
            match self.dest.functions.iter().position(|d| d.name == f.name) {
                Some(idx) if self.dest.functions[idx].is_declaration() && !f.is_declaration() => {
                    self.dest.functions[idx] = f;
                    summary.resolved_declarations += 1;
                }
                Some(_) => {}
                None => {
                    self.dest.functions.push(f);
                    summary.added += 1;
                }
            }
        }

        debug!(
            module = %src.name,
            added = summary.added,
            resolved = summary.resolved_declarations,
            "linked module"
        );
        Ok(summary)
    }

    fn check(&self, src: &Module) -> Result<(), LinkError> {
        for f in src.defined_functions().filter(|f| f.linkage == Linkage::External) {
            let conflict = self
                .dest
                .get_function(&f.name)
                .is_some_and(|d| !d.is_declaration() && d.linkage == Linkage::External);
            if conflict {
                return Err(LinkError::DuplicateSymbol {
                    symbol: f.name.clone(),
                    module: src.name.clone(),
                });
            }
        }
        Ok(())
    }
}
