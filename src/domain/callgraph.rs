// Call graph structures.
// Derived from a program image: one node per defined function, one edge
// per direct call to another defined function.

use std::collections::HashMap;

use crate::ir::Module;

/// A node in the call graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallGraphNode {
    pub id: String,           // symbol name
    pub callees: Vec<String>, // defined callees, first-seen order, no duplicates
    pub label: Option<String>, // file:line from debug info
}

/// The call graph itself.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    pub nodes: Vec<CallGraphNode>,
    index: HashMap<String, usize>,
}

impl CallGraph {
    pub fn new(nodes: Vec<CallGraphNode>) -> Self {
        let index = nodes.iter().enumerate().map(|(i, n)| (n.id.clone(), i)).collect();
        Self { nodes, index }
    }

    /// Build the static call graph of `module`. Declarations are neither
    /// nodes nor edge targets; indirect calls contribute no edges.
    pub fn from_module(module: &Module) -> Self {
        let nodes = module
            .defined_functions()
            .map(|f| CallGraphNode {
                id: f.name.clone(),
                callees: Vec::new(),
                label: f
                    .subprogram
                    .as_ref()
                    .map(|sp| format!("{}:{}", sp.file.filename, sp.line)),
            })
            .collect();
        let mut graph = Self::new(nodes);

        for f in module.defined_functions() {
            for callee in f.direct_callees() {
                if module.is_defined(callee) {
                    graph.add_edge(&f.name, callee);
                }
            }
        }
        graph
    }

    pub fn add_edge(&mut self, caller_id: &str, callee_id: &str) {
        if let Some(&idx) = self.index.get(caller_id) {
            let node = &mut self.nodes[idx];
            if !node.callees.iter().any(|c| c == callee_id) {
                node.callees.push(callee_id.to_string());
            }
        }
    }

    pub fn node(&self, id: &str) -> Option<&CallGraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn callees(&self, id: &str) -> &[String] {
        self.node(id).map(|n| n.callees.as_slice()).unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.callees.len()).sum()
    }
}
