//! Instruction builder with an explicit insertion point.

use super::function::Function;
use super::instruction::{BlockId, Callee, InstKind, Instruction, Terminator, Value};
use super::types::{FloatKind, Type};

/// New instructions go in `block` before the instruction at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertPoint {
    pub block: BlockId,
    pub index: usize,
}

pub struct IrBuilder<'f> {
    func: &'f mut Function,
    point: InsertPoint,
}

impl<'f> IrBuilder<'f> {
    /// Builder positioned at the first insertion point of the entry block.
    pub fn new(func: &'f mut Function) -> Self {
        Self { func, point: InsertPoint { block: 0, index: 0 } }
    }

    pub fn function(&self) -> &Function {
        self.func
    }

    pub fn function_mut(&mut self) -> &mut Function {
        self.func
    }

    pub fn insertion_point(&self) -> InsertPoint {
        self.point
    }

    pub fn set_insertion_point(&mut self, point: InsertPoint) {
        self.point = point;
    }

    pub fn position_at_entry(&mut self) {
        self.point = InsertPoint { block: 0, index: 0 };
    }

    /// Position right before `block`'s terminator (its end).
    pub fn position_at_end(&mut self, block: BlockId) {
        let index = self.func.blocks[block].instructions.len();
        self.point = InsertPoint { block, index };
    }

    pub fn current_block(&self) -> BlockId {
        self.point.block
    }

    pub fn terminate(&mut self, terminator: Terminator) {
        self.func.blocks[self.point.block].terminator = terminator;
    }

    pub fn terminator(&self, block: BlockId) -> &Terminator {
        &self.func.blocks[block].terminator
    }

    fn insert(&mut self, ty: Type, kind: InstKind) -> Option<Value> {
        let result = (!ty.is_void()).then(|| self.func.fresh_value());
        let inst = Instruction { result, ty, kind };
        let InsertPoint { block, index } = self.point;
        self.func.blocks[block].instructions.insert(index, inst);
        self.point.index += 1;
        result.map(Value::Inst)
    }

    pub fn call(&mut self, callee: Callee, ret: Type, args: Vec<Value>) -> Option<Value> {
        self.insert(ret, InstKind::Call { callee, args })
    }

    /// Stack slot for `allocated`; yields a pointer to it.
    pub fn alloca(&mut self, allocated: Type) -> Value {
        let ty = Type::ptr_to(allocated.clone());
        self.insert(ty, InstKind::Alloca { allocated })
            .unwrap_or(Value::Undef(Type::Void))
    }

    pub fn icmp_ne(&mut self, lhs: Value, rhs: Value) -> Value {
        self.insert(Type::Int(1), InstKind::ICmpNe { lhs, rhs })
            .unwrap_or(Value::Undef(Type::Int(1)))
    }

    pub fn select(&mut self, ty: Type, cond: Value, then_value: Value, else_value: Value) -> Value {
        let fallback = Value::Undef(ty.clone());
        self.insert(ty, InstKind::Select { cond, then_value, else_value })
            .unwrap_or(fallback)
    }

    /// Widen a floating-point value to `double`; doubles pass through.
    pub fn fpext_to_double(&mut self, value: Value, from: &Type) -> Value {
        if *from == Type::Float(FloatKind::F64) {
            return value;
        }
        self.insert(Type::f64(), InstKind::FpExt { value })
            .unwrap_or(Value::Undef(Type::f64()))
    }

    pub fn eval(&mut self, ty: Type, operands: Vec<Value>) -> Option<Value> {
        self.insert(ty, InstKind::Eval { operands })
    }
}
