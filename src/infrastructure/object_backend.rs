//! Native object emission with Cranelift.
//!
//! Every IR function is lowered to machine code for the requested target
//! and written as a relocatable object through `cranelift-object`.
//! Declarations become imports, string constants become local data. The
//! printed IR and the codegen options travel along in their own sections
//! so the archive can be inspected later.
//!
//! IR values are not required to dominate their uses (join blocks merge
//! branch results through `Eval`), so every instruction result is a
//! frontend `Variable` and SSA construction is left to Cranelift.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{
    types, AbiParam, Block, InstBuilder, Signature, StackSlotData, StackSlotKind, TrapCode, Type as ClifType,
    Value as ClifValue,
};
use cranelift_codegen::isa::{self, OwnedTargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Switch, Variable};
use cranelift_module::{default_libcall_names, DataDescription, DataId, FuncId, Linkage as ClifLinkage, Module as _};
use cranelift_object::{ObjectBuilder, ObjectModule};
use target_lexicon::{Architecture, BinaryFormat, Triple, Vendor};
use tracing::debug;

use crate::error::BackendError;
use crate::ir::{
    printer, BlockId, Callee, FloatKind, Function, InstKind, Instruction, Linkage, Module, Param, Terminator, Type,
    Value, ValueId,
};
use crate::ports::{Backend, CodegenOptions, OptLevel, RelocModel, TargetMachine};

pub const IR_SECTION: &str = ".tracesmith.ir";
pub const OPTIONS_SECTION: &str = ".tracesmith.opts";

pub struct ObjectBackend;

impl Backend for ObjectBackend {
    fn host_triple(&self) -> String {
        Triple::host().to_string()
    }

    fn lookup_target(&self, triple: &str) -> Result<Box<dyn TargetMachine>, BackendError> {
        let machine = ObjectTarget::parse(triple)?;
        debug!(triple, arch = %machine.triple.architecture, format = %machine.triple.binary_format, "target found");
        Ok(Box::new(machine))
    }
}

#[derive(Debug, Clone)]
pub struct ObjectTarget {
    name: String,
    triple: Triple,
    data_layout: String,
}

impl ObjectTarget {
    /// A target Cranelift can generate code for.
    pub fn parse(triple: &str) -> Result<Self, BackendError> {
        let unknown = || BackendError::UnknownTarget(triple.to_string());
        let parsed = Triple::from_str(triple).map_err(|_| unknown())?;
        isa::lookup(parsed.clone()).map_err(|_| unknown())?;
        Ok(Self {
            name: triple.to_string(),
            data_layout: data_layout(&parsed),
            triple: parsed,
        })
    }

    fn isa(&self, options: &CodegenOptions) -> Result<OwnedTargetIsa, String> {
        let mut flags = settings::builder();
        let pic = match options.reloc {
            RelocModel::Pic => "true",
            RelocModel::Static => "false",
        };
        let opt = match options.opt_level {
            OptLevel::O0 => "none",
            OptLevel::O1 | OptLevel::O2 | OptLevel::O3 => "speed",
        };
        flags.set("is_pic", pic).map_err(|e| e.to_string())?;
        flags.set("opt_level", opt).map_err(|e| e.to_string())?;
        isa::lookup(self.triple.clone())
            .map_err(|e| e.to_string())?
            .finish(settings::Flags::new(flags))
            .map_err(|e| e.to_string())
    }

    /// C variadic calls pass every argument in registers here, which
    /// Apple's arm64 ABI does not accept.
    fn supports_variadic_calls(&self) -> bool {
        !(matches!(self.triple.architecture, Architecture::Aarch64(_)) && self.triple.vendor == Vendor::Apple)
    }

    fn build(&self, module: &Module, options: &CodegenOptions) -> Result<Vec<u8>, BackendError> {
        let fail = |message: String| BackendError::Emit { module: module.name.clone(), message };

        let isa = self.isa(options).map_err(fail)?;
        let pointer = isa.pointer_type();
        let builder = ObjectBuilder::new(isa, module.name.as_str(), default_libcall_names())
            .map_err(|e| fail(e.to_string()))?;
        let mut object = ObjectModule::new(builder);

        let mut symbols = Symbols::default();
        for global in module.globals.iter() {
            let mut bytes = global.value.clone().into_bytes();
            bytes.push(0);
            let mut desc = DataDescription::new();
            desc.define(bytes.into_boxed_slice());
            let id = object
                .declare_data(&global.name, ClifLinkage::Local, false, false)
                .map_err(|e| fail(e.to_string()))?;
            object.define_data(id, &desc).map_err(|e| fail(e.to_string()))?;
            symbols.data.insert(global.name.clone(), id);
        }
        for function in &module.functions {
            let linkage = match (function.is_declaration(), function.linkage) {
                (true, _) => ClifLinkage::Import,
                (false, Linkage::External) => ClifLinkage::Export,
                (false, Linkage::Internal) => ClifLinkage::Local,
            };
            let signature = declared_signature(&object, function, pointer);
            let id = object
                .declare_function(&function.name, linkage, &signature)
                .map_err(|e| fail(e.to_string()))?;
            symbols.functions.insert(function.name.clone(), id);
        }

        let mut scratch = FunctionBuilderContext::new();
        let mut ctx = object.make_context();
        let mut lowered = 0usize;
        for function in module.defined_functions() {
            ctx.func.signature = declared_signature(&object, function, pointer);
            FunctionLowering::new(
                module,
                function,
                &mut object,
                &symbols,
                FunctionBuilder::new(&mut ctx.func, &mut scratch),
                pointer,
                self.supports_variadic_calls(),
            )
            .lower()
            .map_err(|e| fail(format!("{}: {}", function.name, e)))?;

            let id = *symbols
                .functions
                .get(&function.name)
                .ok_or_else(|| fail(format!("{} was not declared", function.name)))?;
            object
                .define_function(id, &mut ctx)
                .map_err(|e| fail(format!("{}: {:?}", function.name, e)))?;
            object.clear_context(&mut ctx);
            lowered += 1;
        }

        let opts = serde_json::to_vec(options).map_err(|e| fail(e.to_string()))?;
        let segment = match self.triple.binary_format {
            BinaryFormat::Macho => "__DATA",
            _ => "",
        };
        let ir = printer::print_module(module, true).into_bytes();
        attach_section(&mut object, "tracesmith.ir", segment, IR_SECTION, ir).map_err(fail)?;
        attach_section(&mut object, "tracesmith.opts", segment, OPTIONS_SECTION, opts).map_err(fail)?;

        debug!(module = %module.name, functions = lowered, globals = module.globals.len(), "module lowered");
        object.finish().emit().map_err(|e| fail(e.to_string()))
    }
}

fn attach_section(
    object: &mut ObjectModule,
    symbol: &str,
    segment: &str,
    section: &str,
    bytes: Vec<u8>,
) -> Result<(), String> {
    let mut desc = DataDescription::new();
    desc.define(bytes.into_boxed_slice());
    desc.set_segment_section(segment, section);
    desc.set_align(1);
    let id = object
        .declare_data(symbol, ClifLinkage::Local, false, false)
        .map_err(|e| e.to_string())?;
    object.define_data(id, &desc).map_err(|e| e.to_string())
}

fn data_layout(triple: &Triple) -> String {
    let mangling = match triple.binary_format {
        BinaryFormat::Macho => "m:o",
        BinaryFormat::Coff => "m:w",
        _ => "m:e",
    };
    let rest = match triple.architecture {
        Architecture::X86_64 => "p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128",
        Architecture::Aarch64(_) => "i8:8:32-i16:16:32-i64:64-i128:128-n32:64-S128",
        _ => "p:64:64-i64:64-i128:128-n32:64-S128",
    };
    format!("e-{}-{}", mangling, rest)
}

impl TargetMachine for ObjectTarget {
    fn triple(&self) -> &str {
        &self.name
    }

    fn data_layout(&self) -> &str {
        &self.data_layout
    }

    fn emit_object(&self, module: &Module, options: &CodegenOptions, path: &Path) -> Result<(), BackendError> {
        let bytes = self.build(module, options)?;
        std::fs::write(path, &bytes).map_err(|source| BackendError::Write { path: path.to_path_buf(), source })?;
        debug!(path = %path.display(), bytes = bytes.len(), "object written");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Symbols {
    functions: HashMap<String, FuncId>,
    data: HashMap<String, DataId>,
}

/// Aggregates, arrays and unlowered types travel as pointer-sized words.
fn clif_type(ty: &Type, pointer: ClifType) -> Option<ClifType> {
    match ty {
        Type::Void => None,
        Type::Int(bits) => Some(match bits {
            0..=8 => types::I8,
            9..=16 => types::I16,
            17..=32 => types::I32,
            33..=64 => types::I64,
            _ => types::I128,
        }),
        Type::Float(FloatKind::F32) => Some(types::F32),
        Type::Float(FloatKind::F64) => Some(types::F64),
        Type::Ptr(_) | Type::Array(..) | Type::Aggregate(_) | Type::Opaque => Some(pointer),
    }
}

fn param_type(param: &Param, pointer: ClifType) -> ClifType {
    clif_type(&param.ty, pointer).unwrap_or(pointer)
}

fn byte_size(ty: &Type, pointer: ClifType) -> u32 {
    match ty {
        Type::Void => 0,
        Type::Int(bits) => bits.div_ceil(8),
        Type::Float(FloatKind::F32) => 4,
        Type::Float(FloatKind::F64) => 8,
        Type::Array(len, elem) => u32::try_from(*len).unwrap_or(u32::MAX).saturating_mul(byte_size(elem, pointer)),
        Type::Ptr(_) | Type::Aggregate(_) | Type::Opaque => pointer.bytes(),
    }
}

fn declared_signature(object: &ObjectModule, function: &Function, pointer: ClifType) -> Signature {
    let mut signature = object.make_signature();
    signature
        .params
        .extend(function.params.iter().map(|p| AbiParam::new(param_type(p, pointer))));
    if let Some(ret) = clif_type(&function.ret, pointer) {
        signature.returns.push(AbiParam::new(ret));
    }
    signature
}

struct FunctionLowering<'a, 'f> {
    ir: &'a Module,
    function: &'a Function,
    object: &'a mut ObjectModule,
    symbols: &'a Symbols,
    builder: FunctionBuilder<'f>,
    blocks: Vec<Block>,
    params: Vec<ClifValue>,
    vars: HashMap<ValueId, (Variable, ClifType)>,
    pointer: ClifType,
    variadic_calls: bool,
}

impl<'a, 'f> FunctionLowering<'a, 'f> {
    fn new(
        ir: &'a Module,
        function: &'a Function,
        object: &'a mut ObjectModule,
        symbols: &'a Symbols,
        builder: FunctionBuilder<'f>,
        pointer: ClifType,
        variadic_calls: bool,
    ) -> Self {
        Self {
            ir,
            function,
            object,
            symbols,
            builder,
            blocks: Vec::new(),
            params: Vec::new(),
            vars: HashMap::new(),
            pointer,
            variadic_calls,
        }
    }

    fn lower(mut self) -> Result<(), String> {
        let function = self.function;
        // IR blocks may branch back to their entry; Cranelift's may not.
        let prologue = self.builder.create_block();
        self.builder.append_block_params_for_function_params(prologue);
        for _ in &function.blocks {
            let block = self.builder.create_block();
            self.blocks.push(block);
        }

        for inst in function.instructions() {
            if let (Some(id), Some(ty)) = (inst.result, clif_type(&inst.ty, self.pointer)) {
                let var = Variable::from_u32(id.0);
                self.builder.declare_var(var, ty);
                self.vars.insert(id, (var, ty));
            }
        }

        self.builder.switch_to_block(prologue);
        self.params = self.builder.block_params(prologue).to_vec();
        let entry = self.block(0)?;
        self.builder.ins().jump(entry, &[]);

        for (id, block) in function.blocks.iter().enumerate() {
            let target = self.block(id)?;
            self.builder.switch_to_block(target);
            for inst in &block.instructions {
                self.instruction(inst)?;
            }
            self.terminator(&block.terminator)?;
        }

        self.builder.seal_all_blocks();
        self.builder.finalize();
        Ok(())
    }

    fn block(&self, id: BlockId) -> Result<Block, String> {
        self.blocks.get(id).copied().ok_or_else(|| format!("branch to missing block {}", id))
    }

    fn instruction(&mut self, inst: &Instruction) -> Result<(), String> {
        let ty = clif_type(&inst.ty, self.pointer);
        let result = match &inst.kind {
            InstKind::Call { callee, args } => self.call(callee, args, &inst.ty)?,
            InstKind::Alloca { allocated } => {
                let size = byte_size(allocated, self.pointer).max(1);
                let slot = self
                    .builder
                    .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, size, 3));
                Some(self.builder.ins().stack_addr(self.pointer, slot, 0))
            }
            InstKind::ICmpNe { lhs, rhs } => {
                let lhs = self.value(lhs)?;
                let rhs = self.value(rhs)?;
                Some(self.not_equal(lhs, rhs))
            }
            InstKind::Select { cond, then_value, else_value } => match ty {
                Some(to) => {
                    let cond = self.value(cond)?;
                    let cond = self.truthy(cond);
                    let then_value = self.value(then_value)?;
                    let then_value = self.coerce(then_value, to);
                    let else_value = self.value(else_value)?;
                    let else_value = self.coerce(else_value, to);
                    Some(self.builder.ins().select(cond, then_value, else_value))
                }
                None => None,
            },
            InstKind::FpExt { value } => {
                let value = self.value(value)?;
                Some(self.coerce(value, types::F64))
            }
            // The first operand converted to the result type, else zero.
            InstKind::Eval { operands } => match operands.first() {
                Some(first) => Some(self.value(first)?),
                None => None,
            },
        };

        let Some(id) = inst.result else {
            return Ok(());
        };
        let Some(&(var, to)) = self.vars.get(&id) else {
            return Ok(());
        };
        let value = match result {
            Some(value) => self.coerce(value, to),
            None => self.zero(to),
        };
        self.builder.def_var(var, value);
        Ok(())
    }

    fn call(&mut self, callee: &Callee, args: &[Value], ret: &Type) -> Result<Option<ClifValue>, String> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.value(arg)?);
        }

        let call = match callee {
            Callee::Direct(name) => {
                let ir = self.ir;
                let target = ir
                    .get_function(name)
                    .ok_or_else(|| format!("call to undeclared function {}", name))?;
                let id = *self
                    .symbols
                    .functions
                    .get(name)
                    .ok_or_else(|| format!("call to undeclared function {}", name))?;
                let func = self.object.declare_func_in_func(id, self.builder.func);

                if !target.variadic && target.params.len() == values.len() {
                    let mut coerced = Vec::with_capacity(values.len());
                    for (value, param) in values.into_iter().zip(&target.params) {
                        let to = param_type(param, self.pointer);
                        coerced.push(self.coerce(value, to));
                    }
                    self.builder.ins().call(func, &coerced)
                } else {
                    if target.variadic && !self.variadic_calls {
                        return Err(format!("variadic call to {} is not supported on this target", name));
                    }
                    // Per-site signature: fixed parameters as declared, the
                    // rest with C default argument promotions.
                    let args = self.site_args(values, &target.params);
                    let sig = self.site_signature(&args, clif_type(&target.ret, self.pointer));
                    let sig = self.builder.import_signature(sig);
                    let addr = self.builder.ins().func_addr(self.pointer, func);
                    self.builder.ins().call_indirect(sig, addr, &args)
                }
            }
            Callee::Indirect(target) => {
                let addr = self.value(target)?;
                let addr = self.coerce(addr, self.pointer);
                let sig = self.site_signature(&values, clif_type(ret, self.pointer));
                let sig = self.builder.import_signature(sig);
                self.builder.ins().call_indirect(sig, addr, &values)
            }
        };
        Ok(self.builder.inst_results(call).first().copied())
    }

    fn site_args(&mut self, values: Vec<ClifValue>, fixed: &[Param]) -> Vec<ClifValue> {
        let mut out = Vec::with_capacity(values.len());
        for (i, value) in values.into_iter().enumerate() {
            let to = match fixed.get(i) {
                Some(param) => param_type(param, self.pointer),
                None => match self.builder.func.dfg.value_type(value) {
                    types::F32 => types::F64,
                    ty if ty.is_int() && ty.bits() < 32 => types::I32,
                    ty => ty,
                },
            };
            out.push(self.coerce(value, to));
        }
        out
    }

    fn site_signature(&self, args: &[ClifValue], ret: Option<ClifType>) -> Signature {
        let mut signature = self.object.make_signature();
        signature
            .params
            .extend(args.iter().map(|a| AbiParam::new(self.builder.func.dfg.value_type(*a))));
        if let Some(ret) = ret {
            signature.returns.push(AbiParam::new(ret));
        }
        signature
    }

    fn terminator(&mut self, terminator: &Terminator) -> Result<(), String> {
        match terminator {
            Terminator::Ret(value) => match clif_type(&self.function.ret, self.pointer) {
                None => {
                    self.builder.ins().return_(&[]);
                }
                Some(to) => {
                    let value = match value {
                        Some(value) => {
                            let value = self.value(value)?;
                            self.coerce(value, to)
                        }
                        None => self.zero(to),
                    };
                    self.builder.ins().return_(&[value]);
                }
            },
            Terminator::Br(target) => {
                let target = self.block(*target)?;
                self.builder.ins().jump(target, &[]);
            }
            Terminator::CondBr { cond, then_block, else_block } => {
                let cond = self.value(cond)?;
                let cond = self.truthy(cond);
                let then_block = self.block(*then_block)?;
                let else_block = self.block(*else_block)?;
                self.builder.ins().brif(cond, then_block, &[], else_block, &[]);
            }
            Terminator::Switch { value, targets, default } => {
                let value = self.value(value)?;
                let value = self.coerce(value, types::I64);
                let mut switch = Switch::new();
                for (case, target) in targets.iter().enumerate() {
                    switch.set_entry(case as u128, self.block(*target)?);
                }
                let default = self.block(*default)?;
                switch.emit(&mut self.builder, value, default);
            }
            Terminator::Unreachable => {
                self.builder.ins().trap(TrapCode::UnreachableCodeReached);
            }
        }
        Ok(())
    }

    fn value(&mut self, value: &Value) -> Result<ClifValue, String> {
        Ok(match value {
            Value::Param(i) => match self.params.get(*i) {
                Some(param) => *param,
                None => self.zero(self.pointer),
            },
            Value::Inst(id) => match self.vars.get(id) {
                Some(&(var, _)) => self.builder.use_var(var),
                None => self.zero(self.pointer),
            },
            Value::ConstInt { ty, value } => self.constant(ty, *value),
            Value::Null(_) => self.builder.ins().iconst(self.pointer, 0),
            Value::Global(name) => {
                let id = *self.symbols.data.get(name).ok_or_else(|| format!("unknown global {}", name))?;
                let global = self.object.declare_data_in_func(id, self.builder.func);
                self.builder.ins().symbol_value(self.pointer, global)
            }
            Value::Undef(ty) => {
                let ty = clif_type(ty, self.pointer).unwrap_or(self.pointer);
                self.zero(ty)
            }
        })
    }

    fn constant(&mut self, ty: &Type, value: i64) -> ClifValue {
        match clif_type(ty, self.pointer).unwrap_or(types::I64) {
            types::F32 => self.builder.ins().f32const(value as f32),
            types::F64 => self.builder.ins().f64const(value as f64),
            types::I128 => {
                let low = self.builder.ins().iconst(types::I64, value);
                self.builder.ins().sextend(types::I128, low)
            }
            ty => {
                let bits = ty.bits();
                let masked = if bits < 64 { value & ((1i64 << bits) - 1) } else { value };
                self.builder.ins().iconst(ty, masked)
            }
        }
    }

    fn zero(&mut self, ty: ClifType) -> ClifValue {
        match ty {
            types::F32 => self.builder.ins().f32const(0.0),
            types::F64 => self.builder.ins().f64const(0.0),
            types::I128 => {
                let low = self.builder.ins().iconst(types::I64, 0);
                self.builder.ins().sextend(types::I128, low)
            }
            ty => self.builder.ins().iconst(ty, 0),
        }
    }

    fn truthy(&mut self, value: ClifValue) -> ClifValue {
        let ty = self.builder.func.dfg.value_type(value);
        if ty.is_float() {
            let zero = self.zero(ty);
            self.builder.ins().fcmp(FloatCC::NotEqual, value, zero)
        } else {
            value
        }
    }

    fn not_equal(&mut self, lhs: ClifValue, rhs: ClifValue) -> ClifValue {
        let a = self.builder.func.dfg.value_type(lhs);
        let b = self.builder.func.dfg.value_type(rhs);
        if a.is_float() || b.is_float() {
            let lhs = self.coerce(lhs, types::F64);
            let rhs = self.coerce(rhs, types::F64);
            return self.builder.ins().fcmp(FloatCC::NotEqual, lhs, rhs);
        }
        let wide = if a.bits() >= b.bits() { a } else { b };
        let lhs = self.coerce(lhs, wide);
        let rhs = self.coerce(rhs, wide);
        self.builder.ins().icmp(IntCC::NotEqual, lhs, rhs)
    }

    /// Integers are sign-extended or truncated, floats converted with
    /// saturation.
    fn coerce(&mut self, value: ClifValue, to: ClifType) -> ClifValue {
        let from = self.builder.func.dfg.value_type(value);
        if from == to {
            return value;
        }
        match (from.is_float(), to.is_float()) {
            (false, false) if from.bits() < to.bits() => self.builder.ins().sextend(to, value),
            (false, false) => self.builder.ins().ireduce(to, value),
            (false, true) => {
                let wide = match from.bits() {
                    0..=32 => types::I32,
                    _ => types::I64,
                };
                let value = self.coerce(value, wide);
                self.builder.ins().fcvt_from_sint(to, value)
            }
            (true, false) => {
                let wide = if to == types::I32 { types::I32 } else { types::I64 };
                let value = self.builder.ins().fcvt_to_sint_sat(wide, value);
                self.coerce(value, to)
            }
            (true, true) if from.bits() < to.bits() => self.builder.ins().fpromote(to, value),
            (true, true) => self.builder.ins().fdemote(to, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionType, IrBuilder};
    use object::{Object, ObjectSection, ObjectSymbol, RelocationTarget};

    /// `main_0` opens a file, formats into a stack buffer and branches on
    /// the handle; `helper` is internal; `fopen`/`snprintf` are imports.
    fn module() -> Module {
        let mut m = Module::new("prog", "prog.rs");
        m.add_function(Function::declaration(
            "fopen",
            FunctionType::new(Type::byte_ptr(), vec![Type::byte_ptr(), Type::byte_ptr()]),
        ));
        m.add_function(Function::declaration(
            "snprintf",
            FunctionType::variadic(Type::i32(), vec![Type::byte_ptr(), Type::i64(), Type::byte_ptr()]),
        ));
        let path = m.globals.intern("/tmp/trace.log");
        let mode = m.globals.intern("a");
        let format = m.globals.intern("%d %f");

        let mut helper = Function::definition("helper", vec![], Type::Void);
        helper.linkage = Linkage::Internal;
        helper.blocks[0].terminator = Terminator::Ret(None);
        m.add_function(helper);

        let params = vec![Param { name: Some("n".into()), ty: Type::i32() }];
        let mut main = Function::definition("main_0", params, Type::i32());
        let open = main.add_block("open");
        let done = main.add_block("done");
        let mut b = IrBuilder::new(&mut main);
        let handle = b
            .call(Callee::Direct("fopen".into()), Type::byte_ptr(), vec![path, mode])
            .unwrap();
        let is_open = b.icmp_ne(handle, Value::Null(Type::byte_ptr()));
        b.terminate(Terminator::CondBr { cond: is_open.clone(), then_block: open, else_block: done });

        b.position_at_end(open);
        let buffer = b.alloca(Type::Array(64, Box::new(Type::i8())));
        let x = b.eval(Type::Float(FloatKind::F32), vec![Value::Param(0)]).unwrap();
        let x = b.fpext_to_double(x, &Type::Float(FloatKind::F32));
        b.call(
            Callee::Direct("snprintf".into()),
            Type::i32(),
            vec![buffer, Value::const_i64(64), format, Value::Param(0), x],
        );
        b.call(Callee::Direct("helper".into()), Type::Void, vec![]);
        b.terminate(Terminator::Switch { value: Value::Param(0), targets: vec![done, done], default: done });

        b.position_at_end(done);
        let picked = b.select(Type::i32(), is_open, Value::Param(0), Value::const_i64(-1));
        b.terminate(Terminator::Ret(Some(picked)));
        m.add_function(main);
        m
    }

    fn emit(triple: &str, module: &Module, options: &CodegenOptions) -> Result<Vec<u8>, BackendError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.o");
        ObjectTarget::parse(triple)?.emit_object(module, options, &path)?;
        Ok(std::fs::read(&path).unwrap())
    }

    #[test]
    fn test_lookup() {
        let backend = ObjectBackend;
        assert!(backend.lookup_target(&backend.host_triple()).is_ok());
        assert!(backend.lookup_target("x86_64-unknown-linux-gnu").is_ok());
        assert!(backend.lookup_target("aarch64-apple-darwin").is_ok());
        assert!(matches!(
            backend.lookup_target("sparc-sun-solaris"),
            Err(BackendError::UnknownTarget(_))
        ));
        assert!(matches!(backend.lookup_target("not a triple"), Err(BackendError::UnknownTarget(_))));
        let machine = backend.lookup_target("x86_64-unknown-linux-gnu").unwrap();
        assert_eq!(machine.triple(), "x86_64-unknown-linux-gnu");
        assert!(machine.data_layout().starts_with("e-m:e-"));
        let machine = backend.lookup_target("aarch64-apple-darwin").unwrap();
        assert!(machine.data_layout().starts_with("e-m:o-"));
    }

    #[test]
    fn test_functions_are_lowered_to_machine_code() {
        let data = emit("x86_64-unknown-linux-gnu", &module(), &CodegenOptions::default()).unwrap();
        let file = object::File::parse(&*data).unwrap();

        let main = file.symbols().find(|s| s.name().ok() == Some("main_0")).unwrap();
        assert!(main.is_definition());
        assert!(main.size() > 16, "main_0 is {} bytes", main.size());
        let helper = file.symbols().find(|s| s.name().ok() == Some("helper")).unwrap();
        assert!(helper.is_local());
        let fopen = file.symbols().find(|s| s.name().ok() == Some("fopen")).unwrap();
        assert!(fopen.is_undefined());

        let text = file.section_by_name(".text").unwrap();
        let called: Vec<String> = text
            .relocations()
            .filter_map(|(_, r)| match r.target() {
                RelocationTarget::Symbol(index) => file.symbol_by_index(index).ok(),
                _ => None,
            })
            .filter_map(|s| s.name().ok().map(str::to_string))
            .collect();
        assert!(called.iter().any(|n| n == "fopen"), "relocations: {:?}", called);
        assert!(called.iter().any(|n| n == "snprintf"), "relocations: {:?}", called);
    }

    #[test]
    fn test_ir_and_options_sections() {
        let options = CodegenOptions { opt_level: OptLevel::O2, ..CodegenOptions::default() };
        let data = emit("x86_64-unknown-linux-gnu", &module(), &options).unwrap();
        let file = object::File::parse(&*data).unwrap();

        let ir = file.section_by_name(IR_SECTION).unwrap();
        let text = String::from_utf8(ir.data().unwrap().to_vec()).unwrap();
        assert!(text.contains("main_0"));
        let opts = file.section_by_name(OPTIONS_SECTION).unwrap();
        let opts = String::from_utf8_lossy(opts.data().unwrap()).to_string();
        assert!(opts.contains("\"reloc\":\"pic\""));
        assert!(opts.contains("\"opt_level\":\"O2\""));
    }

    #[test]
    fn test_other_architectures_and_static_relocation() {
        let options = CodegenOptions { reloc: RelocModel::Static, ..CodegenOptions::default() };
        let data = emit("aarch64-unknown-linux-gnu", &module(), &options).unwrap();
        let file = object::File::parse(&*data).unwrap();
        assert_eq!(file.architecture(), object::Architecture::Aarch64);
        assert!(file.symbols().any(|s| s.name().ok() == Some("main_0") && s.is_definition()));
    }

    #[test]
    fn test_variadic_calls_rejected_on_apple_arm64() {
        let err = emit("aarch64-apple-darwin", &module(), &CodegenOptions::default()).unwrap_err();
        match err {
            BackendError::Emit { module, message } => {
                assert_eq!(module, "prog");
                assert!(message.contains("snprintf"), "{}", message);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_branch_back_to_entry_block() {
        let mut m = Module::new("loop", "loop.rs");
        let mut f = Function::definition("spin", vec![Param { name: None, ty: Type::i64() }], Type::i64());
        let exit = f.add_block("exit");
        f.blocks[0].terminator = Terminator::CondBr { cond: Value::Param(0), then_block: 0, else_block: exit };
        f.blocks[exit].terminator = Terminator::Ret(Some(Value::Param(0)));
        m.add_function(f);
        assert!(emit("x86_64-unknown-linux-gnu", &m, &CodegenOptions::default()).is_ok());
    }
}
