//! Shared helpers for the integration tests: a front-to-back driver over
//! the library and a small interpreter that executes the injected libc
//! calls of an instrumented function.
#![allow(dead_code)]

use std::collections::HashMap;

use tracesmith::application::codegen::Codegen;
use tracesmith::application::image::{rename_entry_point, ImageAccumulator};
use tracesmith::domain::correlator::CallGraphCorrelator;
use tracesmith::domain::injector::{InjectionReport, TraceInjector, TraceOptions};
use tracesmith::domain::extractor::MetadataExtractor;
use tracesmith::domain::store::{DedupPolicy, RecordStore};
use tracesmith::infrastructure::SynFrontEnd;
use tracesmith::ir::{BlockId, Callee, Function, InstKind, Module, Terminator, Type, Value, ValueId};
use tracesmith::ports::{DebugInfo, FrontEnd};

/// Parse, lower and link `units`, rename `main`, correlate and inject.
pub fn instrument(units: &[(&str, &str)], options: TraceOptions) -> (Module, RecordStore, InjectionReport) {
    let frontend = SynFrontEnd::new(Vec::new());
    let codegen = Codegen::new(DebugInfo::Full);
    let mut store = RecordStore::new(DedupPolicy::default());
    let mut image = ImageAccumulator::new();
    for (path, text) in units {
        let unit = frontend.parse_unit(path, text).expect("unit parses");
        MetadataExtractor::extract_into(&unit, &mut store);
        image.accumulate(codegen.lower_unit(&unit)).expect("unit links");
    }
    let mut image = image.finish().expect("image");
    rename_entry_point(&mut image);
    CallGraphCorrelator::correlate(&image, &mut store);
    let report = TraceInjector::new(options).instrument_module(&mut image);
    (image, store, report)
}

#[derive(Debug, Clone, PartialEq)]
pub enum RtValue {
    Int(i64),
    Float(f64),
    Str(String),
    /// Stack buffer, by index into `Runtime::buffers`.
    Buffer(usize),
    /// `FILE*` returned by `fopen`.
    Handle(usize),
    Addr(u64),
    Null,
    Unknown,
}

/// Simulated process state: environment, files and open handles.
#[derive(Debug, Default)]
pub struct Runtime {
    pub env: HashMap<String, String>,
    pub files: HashMap<String, String>,
    open: HashMap<usize, String>,
    next_handle: usize,
    buffers: Vec<String>,
    pub opened: usize,
    pub closed: usize,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Handles opened and never closed.
    pub fn leaked(&self) -> usize {
        self.open.len()
    }

    pub fn lines(&self, path: &str) -> Vec<String> {
        self.files
            .get(path)
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Execute `function` of `module` once. `choose` picks the successor at
    /// every conditional branch or switch.
    pub fn call(
        &mut self,
        module: &Module,
        function: &str,
        args: Vec<RtValue>,
        mut choose: impl FnMut(&[BlockId]) -> BlockId,
    ) -> Option<RtValue> {
        let f = module.get_function(function).expect("function exists");
        let mut frame = Frame { module, f, args, values: HashMap::new() };
        let mut block = 0;
        for _ in 0..10_000 {
            for inst in &f.blocks[block].instructions {
                let result = self.step(&mut frame, &inst.kind, &inst.ty);
                if let Some(id) = inst.result {
                    frame.values.insert(id, result);
                }
            }
            block = match &f.blocks[block].terminator {
                Terminator::Ret(v) => return v.as_ref().map(|v| frame.value(v)),
                Terminator::Br(target) => *target,
                Terminator::Unreachable => panic!("reached unreachable in {}", function),
                t => choose(&t.successors()),
            };
        }
        panic!("{} did not return", function)
    }

    fn step(&mut self, frame: &mut Frame<'_>, kind: &InstKind, ty: &Type) -> RtValue {
        match kind {
            InstKind::Alloca { .. } => {
                self.buffers.push(String::new());
                RtValue::Buffer(self.buffers.len() - 1)
            }
            InstKind::ICmpNe { lhs, rhs } => {
                RtValue::Int((frame.value(lhs) != frame.value(rhs)) as i64)
            }
            InstKind::Select { cond, then_value, else_value } => match frame.value(cond) {
                RtValue::Int(0) => frame.value(else_value),
                _ => frame.value(then_value),
            },
            InstKind::FpExt { value } => match frame.value(value) {
                RtValue::Float(x) => RtValue::Float(x),
                other => panic!("fpext of {:?}", other),
            },
            // Pass a numeric first operand through, converted to the result type.
            InstKind::Eval { operands } => match (operands.first().map(|v| frame.value(v)), ty) {
                (Some(RtValue::Int(v)), Type::Float(_)) => RtValue::Float(v as f64),
                (Some(RtValue::Float(v)), Type::Int(_)) => RtValue::Int(v as i64),
                (Some(v @ (RtValue::Int(_) | RtValue::Float(_))), _) => v,
                (Some(v @ (RtValue::Str(_) | RtValue::Addr(_) | RtValue::Null)), Type::Ptr(_)) => v,
                _ => default_for(ty),
            },
            InstKind::Call { callee: Callee::Direct(name), args } => {
                let args: Vec<RtValue> = args.iter().map(|a| frame.value(a)).collect();
                self.libc(name, args, ty)
            }
            InstKind::Call { .. } => default_for(ty),
        }
    }

    fn libc(&mut self, name: &str, args: Vec<RtValue>, ty: &Type) -> RtValue {
        match name {
            "getenv" => match &args[0] {
                RtValue::Str(key) => self.env.get(key).cloned().map_or(RtValue::Null, RtValue::Str),
                other => panic!("getenv({:?})", other),
            },
            "snprintf" => {
                let RtValue::Buffer(buf) = args[0] else { panic!("snprintf into {:?}", args[0]) };
                let RtValue::Int(limit) = args[1] else { panic!("snprintf size {:?}", args[1]) };
                let mut text = printf(&self.string_of(&args[2]), &args[3..], self);
                text.truncate(limit.max(1) as usize - 1);
                self.buffers[buf] = text;
                RtValue::Int(self.buffers[buf].len() as i64)
            }
            "fopen" => {
                assert_eq!(self.string_of(&args[1]), "a", "trace file is opened for append");
                let path = self.string_of(&args[0]);
                self.files.entry(path.clone()).or_default();
                self.next_handle += 1;
                self.open.insert(self.next_handle, path);
                self.opened += 1;
                RtValue::Handle(self.next_handle)
            }
            "fprintf" => {
                let RtValue::Handle(h) = args[0] else { panic!("fprintf to {:?}", args[0]) };
                let path = self.open.get(&h).cloned().expect("fprintf on a closed handle");
                let text = printf(&self.string_of(&args[1]), &args[2..], self);
                let len = text.len() as i64;
                self.files.entry(path).or_default().push_str(&text);
                RtValue::Int(len)
            }
            "fclose" => {
                let RtValue::Handle(h) = args[0] else { panic!("fclose of {:?}", args[0]) };
                assert!(self.open.remove(&h).is_some(), "handle closed twice");
                self.closed += 1;
                RtValue::Int(0)
            }
            // Program calls are not followed.
            _ => default_for(ty),
        }
    }

    fn string_of(&self, v: &RtValue) -> String {
        match v {
            RtValue::Str(s) => s.clone(),
            RtValue::Buffer(i) => self.buffers[*i].clone(),
            RtValue::Null => "(null)".to_string(),
            other => panic!("not a string: {:?}", other),
        }
    }
}

struct Frame<'m> {
    module: &'m Module,
    f: &'m Function,
    args: Vec<RtValue>,
    values: HashMap<ValueId, RtValue>,
}

impl Frame<'_> {
    fn value(&self, v: &Value) -> RtValue {
        match v {
            Value::Param(i) => self.args[*i].clone(),
            Value::Inst(id) => self.values.get(id).cloned().unwrap_or(RtValue::Unknown),
            Value::ConstInt { value, .. } => RtValue::Int(*value),
            Value::Null(_) => RtValue::Null,
            Value::Global(name) => match self.module.globals.get(name) {
                Some(g) => RtValue::Str(g.value.clone()),
                None => panic!("unknown global {} in {}", name, self.f.name),
            },
            Value::Undef(ty) => default_for(ty),
        }
    }
}

fn default_for(ty: &Type) -> RtValue {
    match ty {
        Type::Int(_) => RtValue::Int(0),
        Type::Float(_) => RtValue::Float(0.0),
        Type::Ptr(_) => RtValue::Null,
        _ => RtValue::Unknown,
    }
}

/// The subset of printf the injected code uses.
fn printf(format: &str, args: &[RtValue], rt: &Runtime) -> String {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision = String::new();
        if chars.peek() == Some(&'.') {
            chars.next();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                precision.push(d);
                chars.next();
            }
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('d') => match args.next() {
                Some(RtValue::Int(v)) => out.push_str(&v.to_string()),
                other => panic!("%d with {:?}", other),
            },
            Some('f') => match args.next() {
                Some(RtValue::Float(v)) => out.push_str(&format!("{:.6}", v)),
                other => panic!("%f with {:?}", other),
            },
            Some('p') => match args.next() {
                Some(RtValue::Addr(a)) => out.push_str(&format!("{:#x}", a)),
                Some(RtValue::Null) => out.push_str("(nil)"),
                other => panic!("%p with {:?}", other),
            },
            Some('s') => {
                let text = rt.string_of(args.next().expect("%s argument"));
                match precision.parse::<usize>() {
                    Ok(limit) => out.extend(text.chars().take(limit)),
                    Err(_) => out.push_str(&text),
                }
            }
            other => panic!("unsupported conversion {:?} in {:?}", other, format),
        }
    }
    assert!(args.next().is_none(), "unconsumed printf arguments for {:?}", format);
    out
}
