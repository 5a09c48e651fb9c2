//! IR module: the unit of linking and, once merged, the program image.

use std::collections::HashMap;

use super::function::{Function, Linkage};
use super::instruction::{Callee, Value};
use super::types::FunctionType;

/// A private, NUL-terminated constant string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub name: String,
    pub value: String,
}

/// Interned string constants of a module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalTable {
    globals: Vec<Global>,
    by_value: HashMap<String, usize>,
}

impl GlobalTable {
    /// Address of a constant holding `value`, creating it on first use.
    pub fn intern(&mut self, value: &str) -> Value {
        if let Some(&idx) = self.by_value.get(value) {
            return Value::Global(self.globals[idx].name.clone());
        }
        let name = match self.globals.len() {
            0 => ".str".to_string(),
            n => format!(".str.{}", n),
        };
        self.by_value.insert(value.to_string(), self.globals.len());
        self.globals.push(Global { name: name.clone(), value: value.to_string() });
        Value::Global(name)
    }

    pub fn get(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Global> {
        self.globals.iter()
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub source_file: String,
    pub target_triple: Option<String>,
    pub data_layout: Option<String>,
    pub functions: Vec<Function>,
    pub globals: GlobalTable,
}

impl Module {
    pub fn new(name: impl Into<String>, source_file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_file: source_file.into(),
            target_triple: None,
            data_layout: None,
            functions: Vec::new(),
            globals: GlobalTable::default(),
        }
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn get_function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn add_function(&mut self, function: Function) {
        self.functions.push(function);
    }

    /// Reuse an existing function of that name or declare a new one.
    pub fn get_or_insert_function(&mut self, name: &str, ty: FunctionType) -> Callee {
        if self.get_function(name).is_none() {
            self.functions.push(Function::declaration(name, ty));
        }
        Callee::Direct(name.to_string())
    }

    pub fn defined_functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter().filter(|f| !f.is_declaration())
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.get_function(name).is_some_and(|f| !f.is_declaration())
    }

    /// `base` if free, otherwise the first free `base.N`.
    pub fn unique_name(&self, base: &str) -> String {
        if self.get_function(base).is_none() {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}.{}", base, n))
            .find(|candidate| self.get_function(candidate).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    /// Rename a function symbol, every direct call to it, and the name
    /// operand of its debug subprogram. Returns false if no such function.
    pub fn rename_function(&mut self, from: &str, to: &str) -> bool {
        let Some(target) = self.get_function_mut(from) else {
            return false;
        };
        target.name = to.to_string();
        if let Some(sp) = target.subprogram.as_mut() {
            sp.set_name(to);
        }
        let map = HashMap::from([(from.to_string(), to.to_string())]);
        for function in &mut self.functions {
            function.remap_callees(&map);
        }
        true
    }

    pub fn external_symbols(&self) -> impl Iterator<Item = &Function> {
        self.defined_functions().filter(|f| f.linkage == Linkage::External)
    }
}
