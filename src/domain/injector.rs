//! Trace injection.
//!
//! Every defined function gets, at its entry, code that opens the trace
//! file in append mode, and at each return site a single `fprintf` writing
//! one JSON line with the formatted arguments and return value.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::ir::{
    Callee, Function, FunctionType, GlobalTable, IrBuilder, Module, Origin, Terminator, Type, Value,
};

/// Where the trace file handle is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosePlacement {
    /// An `fclose` right after the write at every return site.
    #[default]
    EveryReturn,
    /// A single `fclose` next to the last visited return site. Every other
    /// return path leaks its handle; kept to reproduce older artifacts.
    LastReturnOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceOptions {
    /// Environment variable naming the output directory at runtime.
    pub env_var: String,
    /// File created inside that directory.
    pub file_name: String,
    /// Used when the variable is unset.
    pub default_path: String,
    pub path_buffer_len: u64,
    /// Maximum characters printed for a C string.
    pub string_limit: usize,
    pub close_placement: ClosePlacement,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            env_var: "INSTRUMENTATION_PATH".to_string(),
            file_name: "instrumented.json".to_string(),
            default_path: "./instrumented.json".to_string(),
            path_buffer_len: 512,
            string_limit: 100,
            close_placement: ClosePlacement::EveryReturn,
        }
    }
}

impl TraceOptions {
    /// `path_buffer_len` must fit the `size_t` argument of `snprintf` as a
    /// signed 64-bit constant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match i64::try_from(self.path_buffer_len) {
            Ok(len) if len > 0 => Ok(()),
            _ => Err(ConfigError::PathBufferLen(self.path_buffer_len)),
        }
    }
}

/// How one argument or return value is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSlot {
    Int,
    Float,
    CString,
    Pointer,
    Unsupported,
}

impl FormatSlot {
    pub fn classify(ty: &Type) -> Self {
        match ty {
            Type::Int(_) => FormatSlot::Int,
            Type::Float(_) => FormatSlot::Float,
            Type::Ptr(pointee) if **pointee == Type::Int(8) => FormatSlot::CString,
            Type::Ptr(_) => FormatSlot::Pointer,
            _ => FormatSlot::Unsupported,
        }
    }

    pub fn specifier(&self, string_limit: usize) -> String {
        match self {
            FormatSlot::Int => "%d".to_string(),
            FormatSlot::Float => "%f".to_string(),
            FormatSlot::CString => format!("%.{}s", string_limit),
            FormatSlot::Pointer => "%p".to_string(),
            FormatSlot::Unsupported => "<unsupported>".to_string(),
        }
    }

    /// Whether a value is passed to `fprintf` for this slot.
    pub fn consumes_value(&self) -> bool {
        !matches!(self, FormatSlot::Unsupported)
    }
}

/// libc symbols the injected code calls.
pub const RUNTIME_SYMBOLS: [&str; 5] = ["getenv", "snprintf", "fopen", "fprintf", "fclose"];

struct RuntimeFns {
    getenv: Callee,
    snprintf: Callee,
    fopen: Callee,
    fprintf: Callee,
    fclose: Callee,
}

impl RuntimeFns {
    fn declare(module: &mut Module) -> Self {
        let p = Type::byte_ptr;
        Self {
            getenv: module.get_or_insert_function("getenv", FunctionType::new(p(), vec![p()])),
            snprintf: module.get_or_insert_function(
                "snprintf",
                FunctionType::variadic(Type::i32(), vec![p(), Type::i64(), p()]),
            ),
            fopen: module.get_or_insert_function("fopen", FunctionType::new(p(), vec![p(), p()])),
            fprintf: module
                .get_or_insert_function("fprintf", FunctionType::variadic(Type::i32(), vec![p(), p()])),
            fclose: module.get_or_insert_function("fclose", FunctionType::new(Type::i32(), vec![p()])),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InjectionReport {
    pub functions: usize,
    pub return_sites: usize,
    /// Defined functions left alone (system code, libc helpers).
    pub skipped: Vec<String>,
}

pub struct TraceInjector {
    options: TraceOptions,
}

impl TraceInjector {
    pub fn new(options: TraceOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TraceOptions {
        &self.options
    }

    pub fn instrument_module(&self, module: &mut Module) -> InjectionReport {
        let runtime = RuntimeFns::declare(module);
        let mut report = InjectionReport::default();

        let Module { functions, globals, .. } = module;
        for f in functions.iter_mut() {
            if f.is_declaration() {
                continue;
            }
            if f.origin == Origin::System || RUNTIME_SYMBOLS.contains(&f.name.as_str()) {
                report.skipped.push(f.name.clone());
                continue;
            }
            report.return_sites += self.instrument_function(f, globals, &runtime);
            report.functions += 1;
        }

        debug!(
            functions = report.functions,
            return_sites = report.return_sites,
            skipped = report.skipped.len(),
            "trace injection finished"
        );
        report
    }

    /// Returns the number of return sites instrumented.
    fn instrument_function(&self, f: &mut Function, globals: &mut GlobalTable, rt: &RuntimeFns) -> usize {
        let opts = &self.options;
        let name = f.name.clone();
        let params: Vec<Type> = f.params.iter().map(|p| p.ty.clone()).collect();
        let ret_ty = f.ret.clone();

        let mut b = IrBuilder::new(f);
        b.position_at_entry();

        let env_name = globals.intern(&opts.env_var);
        let dir = b
            .call(rt.getenv.clone(), Type::byte_ptr(), vec![env_name])
            .unwrap_or(Value::Null(Type::byte_ptr()));
        let default_path = globals.intern(&opts.default_path);
        let is_set = b.icmp_ne(dir.clone(), Value::Null(Type::byte_ptr()));
        let buffer = b.alloca(Type::Array(opts.path_buffer_len, Box::new(Type::i8())));
        let path_format = globals.intern(&format!("%s/{}", opts.file_name));
        // Out-of-range lengths are rejected by `TraceOptions::validate`.
        let buffer_len = i64::try_from(opts.path_buffer_len).unwrap_or(i64::MAX);
        b.call(
            rt.snprintf.clone(),
            Type::i32(),
            vec![buffer.clone(), Value::const_i64(buffer_len), path_format, dir],
        );
        let path = b.select(Type::byte_ptr(), is_set, buffer, default_path);
        let mode = globals.intern("a");
        let handle = b
            .call(rt.fopen.clone(), Type::byte_ptr(), vec![path, mode])
            .unwrap_or(Value::Null(Type::byte_ptr()));

        let mut arg_specs = Vec::with_capacity(params.len());
        let mut arg_values = Vec::with_capacity(params.len());
        for (i, ty) in params.iter().enumerate() {
            let slot = FormatSlot::classify(ty);
            arg_specs.push(slot.specifier(opts.string_limit));
            match slot {
                FormatSlot::Float => arg_values.push(b.fpext_to_double(Value::Param(i), ty)),
                FormatSlot::Unsupported => {}
                _ => arg_values.push(Value::Param(i)),
            }
        }

        let sites = b.function().return_sites();
        for &block in &sites {
            b.position_at_end(block);
            let returned = match b.terminator(block) {
                Terminator::Ret(Some(v)) => Some(v.clone()),
                _ => None,
            };

            let mut values = arg_values.clone();
            let ret_spec = returned.map(|v| {
                let slot = FormatSlot::classify(&ret_ty);
                match slot {
                    FormatSlot::Float => values.push(b.fpext_to_double(v, &ret_ty)),
                    FormatSlot::Unsupported => {}
                    _ => values.push(v),
                }
                slot.specifier(opts.string_limit)
            });

            let line = globals.intern(&trace_format(&name, &arg_specs, ret_spec.as_deref()));
            let mut args = vec![handle.clone(), line];
            args.extend(values);
            b.call(rt.fprintf.clone(), Type::i32(), args);

            if opts.close_placement == ClosePlacement::EveryReturn {
                b.call(rt.fclose.clone(), Type::i32(), vec![handle.clone()]);
            }
        }

        if opts.close_placement == ClosePlacement::LastReturnOnly {
            // Wherever the cursor was left: after the last visited write,
            // or right after the open when there is no return at all.
            b.call(rt.fclose.clone(), Type::i32(), vec![handle]);
        }

        sites.len()
    }
}

/// `fprintf` format of one trace line.
pub fn trace_format(name: &str, arg_specs: &[String], ret_spec: Option<&str>) -> String {
    let quoted = |s: &str| format!("\"{}\"", s);
    let args: Vec<String> = arg_specs.iter().map(|s| quoted(s)).collect();
    let ret = ret_spec.map(quoted).unwrap_or_default();
    format!(
        "{{\"name\": \"{}\", \"args\": [{}], \"return\": [{}]}}\n",
        escape_literal(name),
        args.join(", "),
        ret
    )
}

/// Make arbitrary text safe inside both a JSON string and a printf format.
fn escape_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('%', "%%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FloatKind, InstKind, Param};

    fn param(ty: Type) -> Param {
        Param { name: None, ty }
    }

    /// `f(a, b)` with two return blocks reached from a conditional branch.
    fn two_returns(ret: Type, params: Vec<Param>) -> Function {
        let mut f = Function::definition("pick", params, ret.clone());
        let left = f.add_block("ret");
        let right = f.add_block("ret");
        f.blocks[0].terminator = Terminator::CondBr {
            cond: Value::Param(0),
            then_block: left,
            else_block: right,
        };
        let value = |v| (!ret.is_void()).then(|| Value::ConstInt { ty: ret.clone(), value: v });
        f.blocks[left].terminator = Terminator::Ret(value(1));
        f.blocks[right].terminator = Terminator::Ret(value(2));
        f
    }

    fn count_calls(f: &Function, block: usize, symbol: &str) -> usize {
        f.blocks[block].instructions.iter().filter(|i| i.is_call_to(symbol)).count()
    }

    fn format_of(m: &Module, f: &Function, block: usize) -> String {
        let call = f.blocks[block]
            .instructions
            .iter()
            .find(|i| i.is_call_to("fprintf"))
            .unwrap();
        let InstKind::Call { args, .. } = &call.kind else { unreachable!() };
        let Value::Global(name) = &args[1] else { panic!("format is not a global") };
        m.globals.get(name).unwrap().value.clone()
    }

    #[test]
    fn test_classify() {
        assert_eq!(FormatSlot::classify(&Type::i32()), FormatSlot::Int);
        assert_eq!(FormatSlot::classify(&Type::Int(1)), FormatSlot::Int);
        assert_eq!(FormatSlot::classify(&Type::Float(FloatKind::F32)), FormatSlot::Float);
        assert_eq!(FormatSlot::classify(&Type::byte_ptr()), FormatSlot::CString);
        assert_eq!(FormatSlot::classify(&Type::ptr_to(Type::i32())), FormatSlot::Pointer);
        assert_eq!(FormatSlot::classify(&Type::Aggregate("S".into())), FormatSlot::Unsupported);
        assert_eq!(FormatSlot::CString.specifier(100), "%.100s");
    }

    #[test]
    fn test_buffer_len_must_fit_i64() {
        let mut options = TraceOptions::default();
        assert_eq!(options.validate(), Ok(()));
        options.path_buffer_len = u64::MAX;
        assert_eq!(options.validate(), Err(ConfigError::PathBufferLen(u64::MAX)));
        options.path_buffer_len = 0;
        assert!(options.validate().is_err());
        options.path_buffer_len = i64::MAX as u64;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_trace_format() {
        let fmt = trace_format("add", &["%d".into(), "<unsupported>".into()], Some("%d"));
        assert_eq!(fmt, "{\"name\": \"add\", \"args\": [\"%d\", \"<unsupported>\"], \"return\": [\"%d\"]}\n");
        assert_eq!(
            trace_format("v", &[], None),
            "{\"name\": \"v\", \"args\": [], \"return\": []}\n"
        );
    }

    #[test]
    fn test_entry_sequence() {
        let mut m = Module::new("m", "m.rs");
        let mut f = Function::definition("id", vec![param(Type::i32())], Type::i32());
        f.blocks[0].terminator = Terminator::Ret(Some(Value::Param(0)));
        m.add_function(f);

        let report = TraceInjector::new(TraceOptions::default()).instrument_module(&mut m);
        assert_eq!(report.functions, 1);
        assert_eq!(report.return_sites, 1);

        let f = m.get_function("id").unwrap();
        let kinds: Vec<&InstKind> = f.blocks[0].instructions.iter().map(|i| &i.kind).collect();
        assert!(f.blocks[0].instructions[0].is_call_to("getenv"));
        assert!(matches!(kinds[1], InstKind::ICmpNe { .. }));
        assert!(matches!(kinds[2], InstKind::Alloca { allocated: Type::Array(512, _) }));
        assert!(f.blocks[0].instructions[3].is_call_to("snprintf"));
        assert!(matches!(kinds[4], InstKind::Select { .. }));
        assert!(f.blocks[0].instructions[5].is_call_to("fopen"));
        assert!(f.blocks[0].instructions[6].is_call_to("fprintf"));
        assert!(f.blocks[0].instructions[7].is_call_to("fclose"));
        assert_eq!(
            format_of(&m, m.get_function("id").unwrap(), 0),
            "{\"name\": \"id\", \"args\": [\"%d\"], \"return\": [\"%d\"]}\n"
        );
        for symbol in RUNTIME_SYMBOLS {
            assert!(m.get_function(symbol).unwrap().is_declaration());
        }
    }

    #[test]
    fn test_every_return_site_writes_and_closes() {
        let mut m = Module::new("m", "m.rs");
        m.add_function(two_returns(Type::i32(), vec![param(Type::Int(1)), param(Type::i64())]));
        let report = TraceInjector::new(TraceOptions::default()).instrument_module(&mut m);
        assert_eq!(report.return_sites, 2);

        let f = m.get_function("pick").unwrap();
        for block in [1, 2] {
            assert_eq!(count_calls(f, block, "fprintf"), 1);
            assert_eq!(count_calls(f, block, "fclose"), 1);
        }
        assert_eq!(count_calls(f, 0, "fopen"), 1);
        assert_eq!(count_calls(f, 0, "fclose"), 0);
    }

    #[test]
    fn test_last_return_only_closes_once() {
        let mut m = Module::new("m", "m.rs");
        m.add_function(two_returns(Type::i32(), vec![param(Type::Int(1))]));
        let options = TraceOptions { close_placement: ClosePlacement::LastReturnOnly, ..TraceOptions::default() };
        TraceInjector::new(options).instrument_module(&mut m);

        let f = m.get_function("pick").unwrap();
        assert_eq!(count_calls(f, 1, "fprintf"), 1);
        assert_eq!(count_calls(f, 2, "fprintf"), 1);
        assert_eq!(count_calls(f, 1, "fclose"), 0);
        assert_eq!(count_calls(f, 2, "fclose"), 1);
        let last = f.blocks[2].instructions.last().unwrap();
        assert!(last.is_call_to("fclose"));
    }

    #[test]
    fn test_float_and_unsupported_arguments() {
        let mut m = Module::new("m", "m.rs");
        let params = vec![
            param(Type::Float(FloatKind::F32)),
            param(Type::Aggregate("Point".into())),
            param(Type::byte_ptr()),
        ];
        let mut f = Function::definition("mix", params, Type::Float(FloatKind::F32));
        f.blocks[0].terminator = Terminator::Ret(Some(Value::Param(0)));
        m.add_function(f);
        TraceInjector::new(TraceOptions::default()).instrument_module(&mut m);

        let f = m.get_function("mix").unwrap();
        let fpexts = f.blocks[0]
            .instructions
            .iter()
            .filter(|i| matches!(i.kind, InstKind::FpExt { .. }))
            .count();
        assert_eq!(fpexts, 2);
        assert_eq!(
            format_of(&m, f, 0),
            "{\"name\": \"mix\", \"args\": [\"%f\", \"<unsupported>\", \"%.100s\"], \"return\": [\"%f\"]}\n"
        );
        let write = f.blocks[0].instructions.iter().find(|i| i.is_call_to("fprintf")).unwrap();
        let InstKind::Call { args, .. } = &write.kind else { unreachable!() };
        // handle, format, two args, return
        assert_eq!(args.len(), 5);
    }

    #[test]
    fn test_void_function_has_empty_return() {
        let mut m = Module::new("m", "m.rs");
        m.add_function(two_returns(Type::Void, vec![param(Type::Int(1))]));
        TraceInjector::new(TraceOptions::default()).instrument_module(&mut m);
        let f = m.get_function("pick").unwrap();
        assert!(format_of(&m, f, 1).ends_with("\"return\": []}\n"));
    }

    #[test]
    fn test_declarations_and_system_functions_skipped() {
        let mut m = Module::new("m", "m.rs");
        m.add_function(Function::declaration("ext", FunctionType::new(Type::Void, vec![])));
        let mut sys = Function::definition("sys", vec![], Type::Void);
        sys.origin = Origin::System;
        sys.blocks[0].terminator = Terminator::Ret(None);
        m.add_function(sys);

        let report = TraceInjector::new(TraceOptions::default()).instrument_module(&mut m);
        assert_eq!(report.functions, 0);
        assert_eq!(report.skipped, vec!["sys".to_string()]);
        assert!(m.get_function("ext").unwrap().is_declaration());
        assert!(m.get_function("sys").unwrap().blocks[0].instructions.is_empty());
    }
}
