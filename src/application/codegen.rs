//! Lowering of a parsed unit into an IR module.
//!
//! Bodies are lowered structurally: calls, every way of leaving the
//! function (`return`, `?`, the tail expression) and the branch shape of
//! `if`, `match` and loops. Everything else collapses into opaque `Eval`
//! instructions that only keep their operands alive.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::debug;

use crate::domain::ast::{
    Block, CalleeRef, Expr, FunctionDecl, LoopKind, SourceUnit, Stmt, TypeKind, TypeRef, Visibility,
};
use crate::domain::ENTRY_SYMBOL;
use crate::ir::{
    BlockId, Callee, DiFile, FloatKind, Function, FunctionType, IrBuilder, Linkage, Module, Origin,
    Param, Subprogram, Terminator, Type, Value,
};
use crate::ports::DebugInfo;

pub struct Codegen {
    debug_info: DebugInfo,
}

impl Default for Codegen {
    fn default() -> Self {
        Self::new(DebugInfo::Full)
    }
}

impl Codegen {
    pub fn new(debug_info: DebugInfo) -> Self {
        Self { debug_info }
    }

    pub fn lower_unit(&self, unit: &SourceUnit) -> Module {
        let name = Path::new(&unit.path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&unit.path)
            .to_string();
        let mut module = Module::new(name, unit.path.clone());

        let decls = unit.functions();
        let signatures: HashMap<&str, FunctionType> = decls
            .iter()
            .map(|d| (d.symbol.as_str(), lower_signature(d)))
            .collect();

        // Implicitly declared callees, with the arity of their first call.
        let mut implicit: BTreeMap<String, usize> = BTreeMap::new();

        for &decl in &decls {
            if let Some(existing) = module.get_function(&decl.symbol) {
                if !existing.is_declaration() || !decl.is_definition() {
                    debug!(symbol = %decl.symbol, unit = %unit.path, "skipping repeated declaration");
                    continue;
                }
                module.functions.retain(|f| f.name != decl.symbol);
            }
            let function = self.lower_function(decl, &signatures, &mut implicit);
            module.add_function(function);
        }

        for (symbol, arity) in implicit {
            if module.get_function(&symbol).is_none() {
                let ty = FunctionType::new(Type::Opaque, vec![Type::Opaque; arity]);
                module.add_function(Function::declaration(symbol, ty));
            }
        }

        debug!(
            unit = %unit.path,
            functions = module.functions.len(),
            defined = module.defined_functions().count(),
            "lowered unit"
        );
        module
    }

    fn lower_function(
        &self,
        decl: &FunctionDecl,
        signatures: &HashMap<&str, FunctionType>,
        implicit: &mut BTreeMap<String, usize>,
    ) -> Function {
        let ty = lower_signature(decl);
        let Some(body) = &decl.body else {
            let mut function = Function::declaration(decl.symbol.clone(), ty);
            function.linkage = Linkage::External;
            return function;
        };

        let params = decl
            .params
            .iter()
            .zip(ty.params)
            .map(|(p, ty)| Param { name: p.name.clone(), ty })
            .collect();
        let mut function = Function::definition(decl.symbol.clone(), params, ty.ret.clone());
        function.variadic = decl.variadic;
        function.linkage = if decl.visibility == Visibility::Public || decl.symbol == ENTRY_SYMBOL {
            Linkage::External
        } else {
            Linkage::Internal
        };
        if decl.is_system() {
            function.origin = Origin::System;
        }
        if self.debug_info == DebugInfo::Full {
            function.subprogram = subprogram_for(decl);
        }

        let mut lowering = BodyLowering {
            b: IrBuilder::new(&mut function),
            ret: ty.ret,
            loops: Vec::new(),
            signatures,
            implicit,
        };
        let tail = lowering.lower_block(body);
        lowering.finish(tail);

        function.remove_unreachable_blocks();
        function
    }
}

pub fn lower_type(ty: &TypeRef) -> Type {
    lower_kind(&ty.kind, &ty.spelling)
}

fn lower_kind(kind: &TypeKind, spelling: &str) -> Type {
    match kind {
        TypeKind::Int { bits } => Type::Int(*bits),
        TypeKind::Float { bits: 32 } => Type::Float(FloatKind::F32),
        TypeKind::Float { .. } => Type::Float(FloatKind::F64),
        TypeKind::Pointer(inner) => match lower_kind(inner, spelling) {
            Type::Void => Type::ptr_to(Type::Aggregate("()".to_string())),
            pointee => Type::ptr_to(pointee),
        },
        TypeKind::Unit => Type::Void,
        TypeKind::Other => Type::Aggregate(spelling.to_string()),
    }
}

fn lower_signature(decl: &FunctionDecl) -> FunctionType {
    let params = decl
        .params
        .iter()
        .map(|p| match lower_type(&p.ty) {
            Type::Void => Type::Aggregate("()".to_string()),
            ty => ty,
        })
        .collect();
    let ret = lower_type(&decl.return_type);
    if decl.variadic {
        FunctionType::variadic(ret, params)
    } else {
        FunctionType::new(ret, params)
    }
}

fn subprogram_for(decl: &FunctionDecl) -> Option<Subprogram> {
    let begin = decl.range.begin.as_ref()?.file_location();
    let directory = Path::new(&begin.file)
        .parent()
        .map(|p| p.display().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".".to_string());
    Some(Subprogram {
        name: decl.symbol.clone(),
        linkage_name: decl.symbol.clone(),
        file: DiFile { filename: begin.file.clone(), directory },
        line: begin.line,
        scope_line: begin.line,
    })
}

struct LoopFrame {
    continue_to: BlockId,
    break_to: BlockId,
}

struct BodyLowering<'f, 's> {
    b: IrBuilder<'f>,
    ret: Type,
    loops: Vec<LoopFrame>,
    signatures: &'s HashMap<&'s str, FunctionType>,
    implicit: &'s mut BTreeMap<String, usize>,
}

impl BodyLowering<'_, '_> {
    /// Terminate the current block and continue in a fresh one. Code lowered
    /// after a jump lands in that block, which stays unreachable unless
    /// something branches to it.
    fn jump(&mut self, terminator: Terminator, label: &str) {
        self.b.terminate(terminator);
        let next = self.b.function_mut().add_block(label);
        self.b.position_at_end(next);
    }

    fn switch_to(&mut self, block: BlockId) {
        self.b.position_at_end(block);
    }

    fn new_block(&mut self, label: &str) -> BlockId {
        self.b.function_mut().add_block(label)
    }

    fn return_value(&mut self, value: Option<Value>) -> Option<Value> {
        if self.ret.is_void() {
            return None;
        }
        let ret = self.ret.clone();
        match value {
            Some(v) => self.b.eval(ret, vec![v]),
            None => self.b.eval(ret, Vec::new()),
        }
    }

    fn finish(&mut self, tail: Option<Value>) {
        let value = self.return_value(tail);
        self.b.terminate(Terminator::Ret(value));
    }

    fn lower_block(&mut self, block: &Block) -> Option<Value> {
        for stmt in &block.stmts {
            self.lower_stmt(stmt);
        }
        block.tail.as_ref().and_then(|e| self.lower_expr(e))
    }

    fn lower_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => {
                self.lower_expr(e);
            }
            Stmt::Let { init, diverge } => {
                let value = init.as_ref().and_then(|e| self.lower_expr(e));
                if let Some(otherwise) = diverge {
                    let matched = self.b.eval(Type::Int(1), value.into_iter().collect());
                    let ok = self.new_block("let_ok");
                    let fallback = self.new_block("let_else");
                    self.b.terminate(Terminator::CondBr {
                        cond: matched.unwrap_or(Value::Undef(Type::Int(1))),
                        then_block: ok,
                        else_block: fallback,
                    });
                    self.switch_to(fallback);
                    self.lower_block(otherwise);
                    self.b.terminate(Terminator::Unreachable);
                    self.switch_to(ok);
                }
            }
            Stmt::Item => {}
        }
    }

    fn lower_args(&mut self, args: &[Expr]) -> Vec<Value> {
        args.iter()
            .map(|a| self.lower_expr(a).unwrap_or(Value::Undef(Type::Opaque)))
            .collect()
    }

    fn lower_expr(&mut self, expr: &Expr) -> Option<Value> {
        match expr {
            Expr::Param(i) => Some(Value::Param(*i)),
            Expr::IntLiteral(v) => Some(Value::const_i64(*v)),
            Expr::Call { callee: CalleeRef::Direct(symbol), args } => {
                let args = self.lower_args(args);
                let ret = match self.signatures.get(symbol.as_str()) {
                    Some(ty) => ty.ret.clone(),
                    None => {
                        self.implicit.entry(symbol.clone()).or_insert(args.len());
                        Type::Opaque
                    }
                };
                self.b.call(Callee::Direct(symbol.clone()), ret, args)
            }
            Expr::Call { callee: CalleeRef::Indirect(target), args } => {
                let target = self.lower_expr(target).unwrap_or(Value::Undef(Type::Opaque));
                let args = self.lower_args(args);
                self.b.call(Callee::Indirect(target), Type::Opaque, args)
            }
            Expr::MethodCall { receiver, args, .. } => {
                let receiver = self.lower_expr(receiver).unwrap_or(Value::Undef(Type::Opaque));
                let mut operands = vec![receiver.clone()];
                operands.extend(self.lower_args(args));
                self.b.call(Callee::Indirect(receiver), Type::Opaque, operands)
            }
            Expr::Return(value) => {
                let value = value.as_ref().and_then(|e| self.lower_expr(e));
                let value = self.return_value(value);
                self.jump(Terminator::Ret(value), "after_return");
                None
            }
            Expr::Try(inner) => {
                let value = self.lower_expr(inner);
                let operands: Vec<Value> = value.iter().cloned().collect();
                let is_ok = self.b.eval(Type::Int(1), operands.clone());
                let ok = self.new_block("try_ok");
                let bail = self.new_block("try_err");
                self.b.terminate(Terminator::CondBr {
                    cond: is_ok.unwrap_or(Value::Undef(Type::Int(1))),
                    then_block: ok,
                    else_block: bail,
                });
                self.switch_to(bail);
                let residual = self.return_value(value);
                self.b.terminate(Terminator::Ret(residual));
                self.switch_to(ok);
                self.b.eval(Type::Opaque, operands)
            }
            Expr::If { cond, then_branch, else_branch } => {
                let cond = self.lower_expr(cond).unwrap_or(Value::Undef(Type::Int(1)));
                let then_block = self.new_block("if_then");
                let join = self.new_block("if_end");
                let else_block = match else_branch {
                    Some(_) => self.new_block("if_else"),
                    None => join,
                };
                self.b.terminate(Terminator::CondBr { cond, then_block, else_block });

                self.switch_to(then_block);
                let then_value = self.lower_block(then_branch);
                self.b.terminate(Terminator::Br(join));

                let mut operands: Vec<Value> = then_value.into_iter().collect();
                if let Some(else_expr) = else_branch {
                    self.switch_to(else_block);
                    operands.extend(self.lower_expr(else_expr));
                    self.b.terminate(Terminator::Br(join));
                }
                self.switch_to(join);
                self.merge(operands)
            }
            Expr::Match { scrutinee, arms } => {
                let value = self.lower_expr(scrutinee).unwrap_or(Value::Undef(Type::Opaque));
                let join = self.new_block("match_end");
                let targets: Vec<BlockId> = arms.iter().map(|_| self.new_block("match_arm")).collect();
                let default = targets.last().copied().unwrap_or(join);
                self.b.terminate(Terminator::Switch { value, targets: targets.clone(), default });

                let mut operands = Vec::new();
                for (arm, block) in arms.iter().zip(targets) {
                    self.switch_to(block);
                    operands.extend(self.lower_expr(arm));
                    self.b.terminate(Terminator::Br(join));
                }
                self.switch_to(join);
                self.merge(operands)
            }
            Expr::Loop { kind, body } => {
                let iter = match kind {
                    LoopKind::For(iter) => self.lower_expr(iter),
                    _ => None,
                };
                let header = self.new_block("loop_header");
                let body_block = self.new_block("loop_body");
                let exit = self.new_block("loop_exit");
                self.b.terminate(Terminator::Br(header));

                self.switch_to(header);
                match kind {
                    LoopKind::Infinite => self.b.terminate(Terminator::Br(body_block)),
                    LoopKind::While(cond) => {
                        let cond = self.lower_expr(cond).unwrap_or(Value::Undef(Type::Int(1)));
                        self.b.terminate(Terminator::CondBr { cond, then_block: body_block, else_block: exit });
                    }
                    LoopKind::For(_) => {
                        let next = self.b.eval(Type::Int(1), iter.into_iter().collect());
                        self.b.terminate(Terminator::CondBr {
                            cond: next.unwrap_or(Value::Undef(Type::Int(1))),
                            then_block: body_block,
                            else_block: exit,
                        });
                    }
                }

                self.loops.push(LoopFrame { continue_to: header, break_to: exit });
                self.switch_to(body_block);
                self.lower_block(body);
                self.b.terminate(Terminator::Br(header));
                self.loops.pop();

                self.switch_to(exit);
                None
            }
            Expr::Break(value) => {
                if let Some(e) = value {
                    self.lower_expr(e);
                }
                let target = match self.loops.last() {
                    Some(frame) => Terminator::Br(frame.break_to),
                    None => Terminator::Unreachable,
                };
                self.jump(target, "after_break");
                None
            }
            Expr::Continue => {
                let target = match self.loops.last() {
                    Some(frame) => Terminator::Br(frame.continue_to),
                    None => Terminator::Unreachable,
                };
                self.jump(target, "after_continue");
                None
            }
            Expr::Block(block) => self.lower_block(block),
            Expr::Closure => None,
            Expr::Other(operands) => {
                let operands: Vec<Value> = operands.iter().filter_map(|e| self.lower_expr(e)).collect();
                self.b.eval(Type::Opaque, operands)
            }
        }
    }

    /// Value of a construct whose branches met in the current block.
    fn merge(&mut self, operands: Vec<Value>) -> Option<Value> {
        if operands.is_empty() {
            None
        } else {
            self.b.eval(Type::Opaque, operands)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ast::*;

    fn int() -> TypeRef {
        TypeRef::new("i32", TypeKind::Int { bits: 32 })
    }

    fn function(symbol: &str, params: usize, body: Option<Block>) -> Decl {
        Decl::Function(FunctionDecl {
            name: symbol.rsplit("::").next().unwrap_or(symbol).into(),
            qualified_name: symbol.into(),
            symbol: symbol.into(),
            params: (0..params).map(|i| ParamDecl { name: Some(format!("p{}", i)), ty: int() }).collect(),
            return_type: int(),
            variadic: false,
            visibility: Visibility::Private,
            range: SourceRange {
                begin: Some(SourceLocation::new("src/lib.rs", 3, 1)),
                end: Some(SourceLocation::new("src/lib.rs", 5, 2)),
            },
            body,
        })
    }

    fn call(symbol: &str, args: Vec<Expr>) -> Expr {
        Expr::Call { callee: CalleeRef::Direct(symbol.into()), args }
    }

    fn lower(decls: Vec<Decl>) -> Module {
        Codegen::default().lower_unit(&SourceUnit { path: "src/lib.rs".into(), decls })
    }

    #[test]
    fn test_tail_expression_returns() {
        let body = Block { stmts: vec![], tail: Some(Box::new(Expr::Param(0))) };
        let m = lower(vec![function("id", 1, Some(body))]);
        let f = m.get_function("id").unwrap();
        assert_eq!(f.return_sites().len(), 1);
        assert_eq!(f.linkage, Linkage::Internal);
        assert_eq!(f.params[0].ty, Type::i32());
        let sp = f.subprogram.as_ref().unwrap();
        assert_eq!(sp.name, "id");
        assert_eq!(sp.file.filename, "src/lib.rs");
        assert_eq!(sp.line, 3);
    }

    #[test]
    fn test_early_return_splits_blocks() {
        let body = Block {
            stmts: vec![Stmt::Expr(Expr::If {
                cond: Box::new(Expr::Param(0)),
                then_branch: Block {
                    stmts: vec![Stmt::Expr(Expr::Return(Some(Box::new(Expr::IntLiteral(0)))))],
                    tail: None,
                },
                else_branch: None,
            })],
            tail: Some(Box::new(Expr::IntLiteral(1))),
        };
        let m = lower(vec![function("f", 1, Some(body))]);
        let f = m.get_function("f").unwrap();
        assert_eq!(f.return_sites().len(), 2);
    }

    #[test]
    fn test_try_adds_error_return() {
        let body = Block {
            stmts: vec![Stmt::Let { init: Some(Expr::Try(Box::new(call("parse", vec![])))), diverge: None }],
            tail: Some(Box::new(Expr::IntLiteral(1))),
        };
        let m = lower(vec![function("f", 0, Some(body))]);
        assert_eq!(m.get_function("f").unwrap().return_sites().len(), 2);
    }

    #[test]
    fn test_infinite_loop_without_break_never_returns() {
        let body = Block {
            stmts: vec![Stmt::Expr(Expr::Loop { kind: LoopKind::Infinite, body: Block::default() })],
            tail: None,
        };
        let m = lower(vec![function("spin", 0, Some(body))]);
        assert!(m.get_function("spin").unwrap().return_sites().is_empty());
    }

    #[test]
    fn test_break_reaches_loop_exit() {
        let body = Block {
            stmts: vec![Stmt::Expr(Expr::Loop {
                kind: LoopKind::Infinite,
                body: Block { stmts: vec![Stmt::Expr(Expr::Break(None))], tail: None },
            })],
            tail: Some(Box::new(Expr::IntLiteral(0))),
        };
        let m = lower(vec![function("f", 0, Some(body))]);
        assert_eq!(m.get_function("f").unwrap().return_sites().len(), 1);
    }

    #[test]
    fn test_match_arms_become_switch_targets() {
        let body = Block {
            stmts: vec![],
            tail: Some(Box::new(Expr::Match {
                scrutinee: Box::new(Expr::Param(0)),
                arms: vec![
                    Expr::Return(Some(Box::new(Expr::IntLiteral(1)))),
                    Expr::IntLiteral(2),
                    Expr::IntLiteral(3),
                ],
            })),
        };
        let m = lower(vec![function("f", 1, Some(body))]);
        let f = m.get_function("f").unwrap();
        assert!(matches!(&f.blocks[0].terminator, Terminator::Switch { targets, .. } if targets.len() == 3));
        assert_eq!(f.return_sites().len(), 2);
    }

    #[test]
    fn test_unknown_callee_is_declared() {
        let body = Block {
            stmts: vec![Stmt::Expr(call("helper", vec![])), Stmt::Expr(call("puts", vec![Expr::Param(0)]))],
            tail: Some(Box::new(Expr::IntLiteral(0))),
        };
        let m = lower(vec![function("main", 1, Some(body)), function("helper", 0, None)]);
        let main = m.get_function("main").unwrap();
        assert_eq!(main.linkage, Linkage::External);
        assert_eq!(main.calls_to("helper"), 1);

        let puts = m.get_function("puts").unwrap();
        assert!(puts.is_declaration());
        assert_eq!(puts.params.len(), 1);
        assert_eq!(puts.params[0].ty, Type::Opaque);
        assert_eq!(m.get_function("helper").unwrap().ret, Type::i32());
    }

    #[test]
    fn test_system_definition_is_marked() {
        let mut decl = function("std_helper", 0, Some(Block::default()));
        if let Decl::Function(f) = &mut decl {
            f.range.begin.as_mut().unwrap().is_system = true;
        }
        let m = lower(vec![decl]);
        assert_eq!(m.get_function("std_helper").unwrap().origin, Origin::System);
    }

    #[test]
    fn test_no_subprogram_without_debug_info() {
        let unit = SourceUnit {
            path: "src/lib.rs".into(),
            decls: vec![function("f", 0, Some(Block::default()))],
        };
        let m = Codegen::new(DebugInfo::None).lower_unit(&unit);
        assert!(m.get_function("f").unwrap().subprogram.is_none());
    }

    #[test]
    fn test_pointer_types() {
        let byte = TypeRef::new("*const c_char", TypeKind::Pointer(Box::new(TypeKind::Int { bits: 8 })));
        assert_eq!(lower_type(&byte), Type::byte_ptr());
        let unit_ptr = TypeRef::new("*const ()", TypeKind::Pointer(Box::new(TypeKind::Unit)));
        assert_eq!(lower_type(&unit_ptr), Type::ptr_to(Type::Aggregate("()".into())));
        let string = TypeRef::new("String", TypeKind::Other);
        assert_eq!(lower_type(&string), Type::Aggregate("String".into()));
    }
}
