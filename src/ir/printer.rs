//! Textual rendering of IR, loosely following LLVM assembly syntax.

use std::fmt::{self, Write};

use super::function::{Function, Linkage};
use super::instruction::{Callee, InstKind, Instruction, Terminator, Value};
use super::module::Module;

fn value(f: &Function, v: &Value) -> String {
    match v {
        Value::Param(i) => match f.params.get(*i).and_then(|p| p.name.as_deref()) {
            Some(name) => format!("%{}", name),
            None => format!("%arg{}", i),
        },
        Value::Inst(id) => format!("%{}", id.0),
        Value::ConstInt { value, .. } => value.to_string(),
        Value::Null(_) => "null".to_string(),
        Value::Global(name) => format!("@{}", name),
        Value::Undef(_) => "undef".to_string(),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'"' | b'\\' => {
                let _ = write!(out, "\\{:02X}", b);
            }
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{:02X}", b);
            }
        }
    }
    out
}

fn instruction(f: &Function, inst: &Instruction) -> String {
    let lhs = inst.result.map(|id| format!("%{} = ", id.0)).unwrap_or_default();
    let body = match &inst.kind {
        InstKind::Call { callee, args } => {
            let target = match callee {
                Callee::Direct(name) => format!("@\"{}\"", name),
                Callee::Indirect(v) => value(f, v),
            };
            let args: Vec<String> = args.iter().map(|a| value(f, a)).collect();
            format!("call {} {}({})", inst.ty, target, args.join(", "))
        }
        InstKind::Alloca { allocated } => format!("alloca {}", allocated),
        InstKind::ICmpNe { lhs, rhs } => format!("icmp ne {}, {}", value(f, lhs), value(f, rhs)),
        InstKind::Select { cond, then_value, else_value } => format!(
            "select i1 {}, {} {}, {} {}",
            value(f, cond),
            inst.ty,
            value(f, then_value),
            inst.ty,
            value(f, else_value)
        ),
        InstKind::FpExt { value: v } => format!("fpext {} to double", value(f, v)),
        InstKind::Eval { operands } => {
            let ops: Vec<String> = operands.iter().map(|o| value(f, o)).collect();
            format!("eval {} [{}]", inst.ty, ops.join(", "))
        }
    };
    format!("{}{}", lhs, body)
}

fn terminator(f: &Function, t: &Terminator) -> String {
    let label = |id: usize| format!("%{}", f.blocks[id].label);
    match t {
        Terminator::Ret(None) => "ret void".to_string(),
        Terminator::Ret(Some(v)) => format!("ret {} {}", f.ret, value(f, v)),
        Terminator::Br(target) => format!("br label {}", label(*target)),
        Terminator::CondBr { cond, then_block, else_block } => format!(
            "br i1 {}, label {}, label {}",
            value(f, cond),
            label(*then_block),
            label(*else_block)
        ),
        Terminator::Switch { value: v, targets, default } => {
            let arms: Vec<String> = targets
                .iter()
                .enumerate()
                .map(|(i, t)| format!("{}, label {}", i, label(*t)))
                .collect();
            format!("switch {}, label {} [{}]", value(f, v), label(*default), arms.join(" "))
        }
        Terminator::Unreachable => "unreachable".to_string(),
    }
}

/// Render one function; `with_debug` appends its subprogram record.
pub fn print_function(f: &Function, with_debug: bool) -> String {
    let mut out = String::new();
    let params: Vec<String> = f
        .params
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{} {}", p.ty, value(f, &Value::Param(i))))
        .collect();
    let mut params = params.join(", ");
    if f.variadic {
        params.push_str(if f.params.is_empty() { "..." } else { ", ..." });
    }

    if f.is_declaration() {
        let _ = writeln!(out, "declare {} @\"{}\"({})", f.ret, f.name, params);
        return out;
    }

    let linkage = match f.linkage {
        Linkage::External => "",
        Linkage::Internal => "internal ",
    };
    let _ = write!(out, "define {}{} @\"{}\"({})", linkage, f.ret, f.name, params);
    if with_debug {
        if let Some(sp) = &f.subprogram {
            let _ = write!(
                out,
                " !dbg !DISubprogram(name: \"{}\", linkageName: \"{}\", file: \"{}\", directory: \"{}\", line: {}, scopeLine: {})",
                sp.name, sp.linkage_name, sp.file.filename, sp.file.directory, sp.line, sp.scope_line
            );
        }
    }
    out.push_str(" {\n");
    for block in &f.blocks {
        let _ = writeln!(out, "{}:", block.label);
        for inst in &block.instructions {
            let _ = writeln!(out, "  {}", instruction(f, inst));
        }
        let _ = writeln!(out, "  {}", terminator(f, &block.terminator));
    }
    out.push_str("}\n");
    out
}

/// Render a whole module.
pub fn print_module(m: &Module, with_debug: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "; ModuleID = '{}'", m.name);
    let _ = writeln!(out, "source_filename = \"{}\"", m.source_file);
    if let Some(layout) = &m.data_layout {
        let _ = writeln!(out, "target datalayout = \"{}\"", layout);
    }
    if let Some(triple) = &m.target_triple {
        let _ = writeln!(out, "target triple = \"{}\"", triple);
    }
    out.push('\n');
    for g in m.globals.iter() {
        let _ = writeln!(
            out,
            "@{} = private unnamed_addr constant [{} x i8] c\"{}\\00\"",
            g.name,
            g.value.len() + 1,
            escape(&g.value)
        );
    }
    for f in &m.functions {
        out.push('\n');
        out.push_str(&print_function(f, with_debug));
    }
    out
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&print_module(self, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{FunctionType, Type};

    #[test]
    fn test_print_module() {
        let mut m = Module::new("demo", "demo.rs");
        let s = m.globals.intern("a\n\"b\"");
        let mut f = Function::definition("f", vec![], Type::byte_ptr());
        f.blocks[0].terminator = Terminator::Ret(Some(s));
        m.add_function(f);
        m.add_function(Function::declaration(
            "fprintf",
            FunctionType::variadic(Type::i32(), vec![Type::byte_ptr(), Type::byte_ptr()]),
        ));

        let text = m.to_string();
        assert!(text.contains("@.str = private unnamed_addr constant [6 x i8] c\"a\\0A\\22b\\22\\00\""));
        assert!(text.contains("define i8* @\"f\"() {"));
        assert!(text.contains("ret i8* @.str"));
        assert!(text.contains("declare i32 @\"fprintf\"(i8* %arg0, i8* %arg1, ...)"));
    }
}
