//! Values, instructions and block terminators.

use super::types::Type;

/// Index of a basic block inside its function.
pub type BlockId = usize;

/// SSA name of an instruction result, unique within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The n-th formal parameter of the enclosing function.
    Param(usize),
    /// Result of an instruction.
    Inst(ValueId),
    ConstInt { ty: Type, value: i64 },
    /// Null pointer of the given pointer type.
    Null(Type),
    /// Address of a module-level global.
    Global(String),
    Undef(Type),
}

impl Value {
    pub fn const_i64(value: i64) -> Value {
        Value::ConstInt { ty: Type::i64(), value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// Call through a symbol name.
    Direct(String),
    /// Call through a computed value (function pointers, trait objects).
    Indirect(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Call { callee: Callee, args: Vec<Value> },
    Alloca { allocated: Type },
    ICmpNe { lhs: Value, rhs: Value },
    Select { cond: Value, then_value: Value, else_value: Value },
    FpExt { value: Value },
    /// A computation the front end does not model in detail.
    Eval { operands: Vec<Value> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub result: Option<ValueId>,
    /// Type of the result (`Void` when there is none).
    pub ty: Type,
    pub kind: InstKind,
}

impl Instruction {
    /// Name of the directly called symbol, if this is a direct call.
    pub fn direct_callee(&self) -> Option<&str> {
        match &self.kind {
            InstKind::Call { callee: Callee::Direct(name), .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_call_to(&self, symbol: &str) -> bool {
        self.direct_callee() == Some(symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Ret(Option<Value>),
    Br(BlockId),
    CondBr { cond: Value, then_block: BlockId, else_block: BlockId },
    Switch { value: Value, targets: Vec<BlockId>, default: BlockId },
    Unreachable,
}

impl Terminator {
    pub fn is_return(&self) -> bool {
        matches!(self, Terminator::Ret(_))
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Ret(_) | Terminator::Unreachable => Vec::new(),
            Terminator::Br(target) => vec![*target],
            Terminator::CondBr { then_block, else_block, .. } => vec![*then_block, *else_block],
            Terminator::Switch { targets, default, .. } => {
                let mut out = targets.clone();
                out.push(*default);
                out
            }
        }
    }

    pub(crate) fn remap_blocks(&mut self, map: impl Fn(BlockId) -> BlockId) {
        match self {
            Terminator::Ret(_) | Terminator::Unreachable => {}
            Terminator::Br(target) => *target = map(*target),
            Terminator::CondBr { then_block, else_block, .. } => {
                *then_block = map(*then_block);
                *else_block = map(*else_block);
            }
            Terminator::Switch { targets, default, .. } => {
                for t in targets.iter_mut() {
                    *t = map(*t);
                }
                *default = map(*default);
            }
        }
    }
}
