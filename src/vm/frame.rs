use super::value::Value;
use super::{FrameKind, Function};
use crate::ssa::FuncId;

/// Why a frame was pushed; decides what happens to its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRole {
    /// Ordinary call; results go to the caller
    Normal,
    /// Deferred call; results are discarded and `recover` may apply
    Deferred,
    /// Pushed by the embedding host; results go to the goroutine
    Host,
}

/// The resumable state of one function activation.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub func: FuncId,
    pub kind: FrameKind,
    /// Block to execute on the next step
    pub next: i32,
    /// Predecessor marker: the block that transferred control to `next`
    pub last_block: i32,
    pub regs: Vec<Value>,
    /// Deferred calls, run last-in first-out
    pub defers: Vec<StackFrame>,
    /// Set once the frame has produced its results
    pub completed: bool,
    pub recover_point: Option<i32>,
    pub role: FrameRole,
    /// Results of the callee that last returned into this frame
    pub callee_results: Option<Value>,
    /// Set while the goroutine's panic is unwinding through this frame
    pub unwinding: bool,
}

impl StackFrame {
    /// A frame at block 0 with arguments then captured variables in the
    /// leading registers.
    pub fn new(id: FuncId, func: &Function, args: Vec<Value>, env: &[Value]) -> Self {
        let mut regs = args;
        regs.extend_from_slice(env);
        regs.resize(func.num_regs.max(regs.len()), Value::Nil);
        Self {
            func: id,
            kind: func.kind,
            next: 0,
            last_block: 0,
            regs,
            defers: Vec::new(),
            completed: false,
            recover_point: func.recover_point,
            role: FrameRole::Normal,
            callee_results: None,
            unwinding: false,
        }
    }

    pub fn with_role(mut self, role: FrameRole) -> Self {
        self.role = role;
        self
    }

    pub fn reg(&self, r: u32) -> &Value {
        &self.regs[r as usize]
    }

    pub fn set(&mut self, r: u32, v: Value) {
        self.regs[r as usize] = v;
    }
}
