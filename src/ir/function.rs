//! IR functions and basic blocks.

use std::collections::HashMap;

use super::debug::Subprogram;
use super::instruction::{BlockId, Callee, InstKind, Instruction, Terminator, Value, ValueId};
use super::types::{FunctionType, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    External,
    Internal,
}

/// Where a function's source lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    /// Defined under a system root; never instrumented.
    System,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Option<String>,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instructions: Vec::new(),
            terminator: Terminator::Unreachable,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    pub variadic: bool,
    pub linkage: Linkage,
    pub origin: Origin,
    /// Empty for declarations.
    pub blocks: Vec<BasicBlock>,
    pub subprogram: Option<Subprogram>,
    next_value: u32,
}

impl Function {
    /// A body-less external declaration.
    pub fn declaration(name: impl Into<String>, ty: FunctionType) -> Self {
        Self {
            name: name.into(),
            params: ty.params.into_iter().map(|ty| Param { name: None, ty }).collect(),
            ret: ty.ret,
            variadic: ty.variadic,
            linkage: Linkage::External,
            origin: Origin::User,
            blocks: Vec::new(),
            subprogram: None,
            next_value: 0,
        }
    }

    /// A definition with a single empty entry block.
    pub fn definition(name: impl Into<String>, params: Vec<Param>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            variadic: false,
            linkage: Linkage::External,
            origin: Origin::User,
            blocks: vec![BasicBlock::new("entry")],
            subprogram: None,
            next_value: 0,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn function_type(&self) -> FunctionType {
        FunctionType {
            ret: self.ret.clone(),
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            variadic: self.variadic,
        }
    }

    pub fn fresh_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    pub fn add_block(&mut self, label: impl Into<String>) -> BlockId {
        let label = format!("{}{}", label.into(), self.blocks.len());
        self.blocks.push(BasicBlock::new(label));
        self.blocks.len() - 1
    }

    /// Blocks ending in `Ret`, in layout order.
    pub fn return_sites(&self) -> Vec<BlockId> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.terminator.is_return())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    /// Directly called symbols in body order, duplicates included.
    pub fn direct_callees(&self) -> impl Iterator<Item = &str> {
        self.instructions().filter_map(|i| i.direct_callee())
    }

    pub fn calls_to(&self, symbol: &str) -> usize {
        self.instructions().filter(|i| i.is_call_to(symbol)).count()
    }

    /// Rewrite direct call targets through `map` in a single pass.
    pub(crate) fn remap_callees(&mut self, map: &HashMap<String, String>) {
        for block in &mut self.blocks {
            for inst in &mut block.instructions {
                if let InstKind::Call { callee: Callee::Direct(name), .. } = &mut inst.kind {
                    if let Some(to) = map.get(name.as_str()) {
                        *name = to.clone();
                    }
                }
            }
        }
    }

    /// Rewrite references to globals through `map` in a single pass.
    pub(crate) fn remap_globals(&mut self, map: &HashMap<String, String>) {
        let patch = |v: &mut Value| {
            if let Value::Global(name) = v {
                if let Some(to) = map.get(name.as_str()) {
                    *name = to.clone();
                }
            }
        };
        for block in &mut self.blocks {
            for inst in &mut block.instructions {
                match &mut inst.kind {
                    InstKind::Call { callee, args } => {
                        if let Callee::Indirect(v) = callee {
                            patch(v);
                        }
                        args.iter_mut().for_each(patch);
                    }
                    InstKind::ICmpNe { lhs, rhs } => {
                        patch(lhs);
                        patch(rhs);
                    }
                    InstKind::Select { cond, then_value, else_value } => {
                        patch(cond);
                        patch(then_value);
                        patch(else_value);
                    }
                    InstKind::FpExt { value } => patch(value),
                    InstKind::Eval { operands } => operands.iter_mut().for_each(patch),
                    InstKind::Alloca { .. } => {}
                }
            }
            if let Terminator::Ret(Some(v)) = &mut block.terminator {
                patch(v);
            }
        }
    }

    /// Drop blocks that cannot be reached from the entry block.
    pub fn remove_unreachable_blocks(&mut self) {
        if self.blocks.is_empty() {
            return;
        }
        let mut reachable = vec![false; self.blocks.len()];
        let mut stack = vec![0usize];
        while let Some(id) = stack.pop() {
            if reachable[id] {
                continue;
            }
            reachable[id] = true;
            stack.extend(self.blocks[id].terminator.successors());
        }
        if reachable.iter().all(|r| *r) {
            return;
        }

        let mut remap = vec![0usize; self.blocks.len()];
        let mut next = 0;
        for (old, keep) in reachable.iter().enumerate() {
            if *keep {
                remap[old] = next;
                next += 1;
            }
        }
        let blocks = std::mem::take(&mut self.blocks);
        self.blocks = blocks
            .into_iter()
            .zip(reachable)
            .filter_map(|(b, keep)| keep.then_some(b))
            .collect();
        for block in &mut self.blocks {
            block.terminator.remap_blocks(|old| remap[old]);
        }
    }
}
