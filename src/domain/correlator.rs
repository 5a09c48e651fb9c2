//! Attaches static callee sets from the program image to metadata records.

use std::collections::BTreeSet;

use tracing::debug;

use crate::domain::callgraph::CallGraph;
use crate::domain::store::RecordStore;
use crate::ir::Module;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CorrelationReport {
    /// Functions whose callees were attached to a record.
    pub matched: usize,
    /// Functions with debug info but no matching record.
    pub unmatched: Vec<String>,
}

pub struct CallGraphCorrelator;

impl CallGraphCorrelator {
    /// For every defined function carrying a subprogram, set
    /// `calledFunctions` on the first record (store order) with the same
    /// name and the same file basename.
    pub fn correlate(module: &Module, store: &mut RecordStore) -> CorrelationReport {
        let graph = CallGraph::from_module(module);
        let mut report = CorrelationReport::default();

        for f in module.defined_functions() {
            let Some(sp) = &f.subprogram else {
                continue;
            };
            let callees: BTreeSet<String> = graph.callees(&f.name).iter().cloned().collect();

            match store.first_by_name_and_basename(&f.name, sp.file.basename()) {
                Some(slot) => {
                    if let Some(record) = store.get_mut(slot) {
                        record.called_functions = Some(callees);
                        report.matched += 1;
                    }
                }
                None => {
                    debug!(function = %f.name, file = %sp.file.filename, "no metadata record for function");
                    report.unmatched.push(f.name.clone());
                }
            }
        }
        report
    }
}
