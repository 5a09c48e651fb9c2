//! Intermediate representation of compiled units and of the merged
//! program image.

pub mod builder;
pub mod debug;
pub mod function;
pub mod instruction;
pub mod linker;
pub mod module;
pub mod printer;
pub mod types;

pub use builder::{InsertPoint, IrBuilder};
pub use debug::{DiFile, Subprogram};
pub use function::{BasicBlock, Function, Linkage, Origin, Param};
pub use instruction::{BlockId, Callee, InstKind, Instruction, Terminator, Value, ValueId};
pub use linker::{LinkError, LinkSummary, Linker};
pub use module::{Global, GlobalTable, Module};
pub use types::{FloatKind, FunctionType, Type};
