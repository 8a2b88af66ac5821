mod arith;
mod builtins;
mod channel;
pub mod debug;
mod error;
mod frame;
pub mod ic;
mod interp;
mod memory;
mod ops;
mod scheduler;
pub mod types;
mod value;
pub mod wide;

pub use arith::normalize as normalize_int;
pub use channel::{ChanId, Channel};
pub use debug::LineTable;
pub use error::{Fault, RuntimeError};
pub use frame::{FrameRole, StackFrame};
pub use memory::{Access, FieldAccess, Memory, ObjectId, Pointer, Scalar, Slice};
pub use ops::{
    ArithKind, BuiltinOp, CallTarget, Conversion, Edge, Indexed, NumKind, NumRepr, Op, Operand,
    Reg, SelectCase,
};
pub use scheduler::{
    Exit, Goroutine, GoroutineId, GoroutineState, PanicState, Runtime, SchedStats, SelectRng,
};
pub use types::{Kind, TypeCache, TypeDescriptor, TypeTable};
pub use value::{Closure, Interface, Value};
pub use wide::WideInt;

use crate::ssa::{FuncId, GlobalId, Pos};

/// How a compiled function executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Resumable state machine stepped by the scheduler
    Suspendable,
    /// Runs eagerly to completion
    Plain,
}

/// One resumption point and its code.
#[derive(Debug, Clone)]
pub struct CodeBlock {
    /// Real blocks are `0..n`, synthetic blocks `-1, -2, ...`
    pub id: i32,
    pub code: Vec<Op>,
    pub lines: LineTable,
}

/// A compiled function.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub kind: FrameKind,
    pub num_params: usize,
    pub num_free_vars: usize,
    pub num_regs: usize,
    /// Real blocks in ascending order, then synthetic blocks `-1, -2, ...`
    pub blocks: Vec<CodeBlock>,
    pub num_real: usize,
    /// Block to resume at after a recovered panic
    pub recover_point: Option<i32>,
    /// Returned when a recovered frame has no recover point
    pub zero_result: Value,
    pub pos: Option<Pos>,
}

impl Function {
    /// Index of block `id` in [`Function::blocks`].
    pub fn block_index(&self, id: i32) -> Option<usize> {
        let idx = if id >= 0 {
            let idx = id as usize;
            (idx < self.num_real).then_some(idx)?
        } else {
            self.num_real + (-(id as i64) - 1) as usize
        };
        (idx < self.blocks.len()).then_some(idx)
    }

    pub fn block(&self, id: i32) -> Option<&CodeBlock> {
        self.block_index(id).map(|i| &self.blocks[i])
    }
}

/// A package-level variable: storage allocated when the runtime starts.
#[derive(Debug, Clone)]
pub struct GlobalSlot {
    pub name: String,
    pub size: u32,
}

/// A compiled program.
#[derive(Debug, Clone)]
pub struct Program {
    pub functions: Vec<Function>,
    pub types: TypeTable,
    pub globals: Vec<GlobalSlot>,
    pub files: Vec<String>,
    pub init: Option<FuncId>,
    pub main: Option<FuncId>,
    /// Number of interface invoke sites
    pub invoke_sites: u32,
}

impl Program {
    pub fn function(&self, id: FuncId) -> Option<&Function> {
        self.functions.get(id.index())
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    pub fn global(&self, id: GlobalId) -> Option<&GlobalSlot> {
        self.globals.get(id.index())
    }

    pub fn format_pos(&self, pos: Pos) -> String {
        let file = self
            .files
            .get(pos.file as usize)
            .map(String::as_str)
            .unwrap_or("<unknown>");
        format!("{}:{}:{}", file, pos.line, pos.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(real: usize, synthetic: usize) -> Function {
        let block = |id: i32| CodeBlock {
            id,
            code: vec![Op::Return { results: vec![] }],
            lines: LineTable::new(),
        };
        let mut blocks: Vec<CodeBlock> = (0..real as i32).map(block).collect();
        blocks.extend((1..=synthetic as i32).map(|k| block(-k)));
        Function {
            name: "f".to_string(),
            kind: FrameKind::Suspendable,
            num_params: 0,
            num_free_vars: 0,
            num_regs: 0,
            blocks,
            num_real: real,
            recover_point: None,
            zero_result: Value::Nil,
            pos: None,
        }
    }

    #[test]
    fn test_block_index_covers_both_spaces() {
        let f = function(3, 2);
        assert_eq!(f.block_index(0), Some(0));
        assert_eq!(f.block_index(2), Some(2));
        assert_eq!(f.block_index(-1), Some(3));
        assert_eq!(f.block_index(-2), Some(4));
        assert_eq!(f.block(-2).map(|b| b.id), Some(-2));
    }

    #[test]
    fn test_block_index_rejects_unknown() {
        let f = function(3, 2);
        assert_eq!(f.block_index(3), None);
        assert_eq!(f.block_index(-3), None);
    }
}
