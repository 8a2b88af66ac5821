//! Operations of the emitted state machines.
//!
//! Ops are register-based: each reads [`Operand`]s and writes frame
//! registers. A code block is a straight sequence of ops ending in exactly
//! one terminator: `Jump`, `Branch`, `Return`, `Call` or `Panic`.
//!
//! Ops that may have to wait (`Send`, `Recv`, `Select`, `RunDefers`) always
//! start their block, so reporting "blocked" never repeats a side effect.
use std::rc::Rc;

use super::memory::Access;
use super::value::Value;
use crate::ssa::{BinOp, FuncId, GlobalId, TypeId, UnOp};

/// Frame register index.
pub type Reg = u32;

#[derive(Debug, Clone)]
pub enum Operand {
    Reg(Reg),
    Imm(Value),
}

/// Width and signedness of a native integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumKind {
    pub bits: u8,
    pub signed: bool,
}

impl NumKind {
    pub const INT: NumKind = NumKind {
        bits: 64,
        signed: true,
    };
}

/// Operand class of an arithmetic or comparison op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithKind {
    Int(NumKind),
    /// Emulated 64-bit integer
    Wide { signed: bool },
    Float { bits: u8 },
    Str,
    Bool,
    /// Reference comparison (pointers, channels, interfaces, nil checks)
    Any,
}

/// Numeric representation used by conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumRepr {
    Int(NumKind),
    Wide { signed: bool },
    Float { bits: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Representation change only
    Identity,
    Numeric { from: NumRepr, to: NumRepr },
    /// `string(rune)`
    RuneToString { from: NumRepr },
    StringToBytes,
    BytesToString,
    StringToRunes,
    RunesToString,
    /// Decimal text of a 64-bit unsigned integer
    UnsignedText,
}

/// What an index or slice expression applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indexed {
    Slice,
    /// Pointer to (or value of) an array of the given length
    Array { len: u64, elem_size: u32 },
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinOp {
    Len,
    Cap,
    Append,
    Copy,
    Close,
    Print,
    Println,
}

#[derive(Debug, Clone)]
pub enum CallTarget {
    Static(FuncId),
    Closure(Operand),
    /// Dynamic dispatch; `site` indexes the runtime's inline caches
    Invoke {
        recv: Operand,
        method: Rc<str>,
        site: u32,
    },
}

/// A control-flow edge and the phi moves it performs.
#[derive(Debug, Clone)]
pub struct Edge {
    pub target: i32,
    /// Parallel moves: all sources are read before any destination is written
    pub moves: Vec<(Reg, Operand)>,
}

impl Edge {
    pub fn to(target: i32) -> Self {
        Self {
            target,
            moves: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectCase {
    pub chan: Operand,
    /// Value to send; `None` for a receive case
    pub send: Option<Operand>,
}

#[derive(Debug, Clone)]
pub enum Op {
    // ========================================
    // Data
    // ========================================
    Move {
        dst: Reg,
        src: Operand,
    },
    Binary {
        dst: Reg,
        op: BinOp,
        kind: ArithKind,
        x: Operand,
        y: Operand,
        /// Whether a shift count may be negative
        count_signed: bool,
    },
    Unary {
        dst: Reg,
        op: UnOp,
        kind: ArithKind,
        x: Operand,
    },
    Convert {
        dst: Reg,
        conv: Conversion,
        x: Operand,
    },
    GlobalAddr {
        dst: Reg,
        global: GlobalId,
    },

    // ========================================
    // Memory
    // ========================================
    Alloc {
        dst: Reg,
        size: u32,
    },
    FieldAddr {
        dst: Reg,
        x: Operand,
        offset: u32,
    },
    IndexAddr {
        dst: Reg,
        x: Operand,
        index: Operand,
        of: Indexed,
    },
    Load {
        dst: Reg,
        addr: Operand,
        access: Access,
    },
    Store {
        addr: Operand,
        value: Operand,
        access: Access,
    },

    // ========================================
    // Aggregates, slices, strings
    // ========================================
    /// Component of a struct or tuple value
    Extract {
        dst: Reg,
        tuple: Operand,
        index: usize,
    },
    /// Element of an array value or byte of a string
    Index {
        dst: Reg,
        x: Operand,
        index: Operand,
        of: Indexed,
    },
    MakeSlice {
        dst: Reg,
        elem_size: u32,
        len: Operand,
        cap: Operand,
    },
    SliceOf {
        dst: Reg,
        x: Operand,
        of: Indexed,
        low: Option<Operand>,
        high: Option<Operand>,
        max: Option<Operand>,
    },

    // ========================================
    // Interfaces and closures
    // ========================================
    MakeInterface {
        dst: Reg,
        ty: TypeId,
        x: Operand,
    },
    TypeAssert {
        dst: Reg,
        x: Operand,
        ty: TypeId,
        comma_ok: bool,
    },
    MakeClosure {
        dst: Reg,
        func: FuncId,
        bindings: Vec<Operand>,
    },

    // ========================================
    // Calls
    // ========================================
    /// Synchronous call of a plain function
    CallPlain {
        dst: Option<Reg>,
        func: FuncId,
        args: Vec<Operand>,
    },
    Builtin {
        dst: Option<Reg>,
        builtin: BuiltinOp,
        args: Vec<Operand>,
    },
    Recover {
        dst: Reg,
    },
    /// Push a callee frame and continue at `resume` once it returns
    Call {
        target: CallTarget,
        args: Vec<Operand>,
        resume: i32,
    },
    /// Consume the result of the call that resumed this block
    TakeResult {
        dst: Option<Reg>,
    },
    Go {
        target: CallTarget,
        args: Vec<Operand>,
    },
    Defer {
        target: CallTarget,
        args: Vec<Operand>,
    },
    /// Run the next pending deferred call, or fall through when none remain
    RunDefers,
    Panic {
        value: Operand,
        resume: Option<i32>,
    },

    // ========================================
    // Channels
    // ========================================
    MakeChan {
        dst: Reg,
        zero: Value,
        size: Operand,
    },
    Send {
        chan: Operand,
        value: Operand,
    },
    Recv {
        dst: Option<Reg>,
        chan: Operand,
        comma_ok: bool,
    },
    Select {
        dst: Option<Reg>,
        cases: Vec<SelectCase>,
        blocking: bool,
        /// Values reported for receive cases that were not chosen, one per receive case
        zeros: Vec<Value>,
    },

    // ========================================
    // Control
    // ========================================
    Jump(Edge),
    Branch {
        cond: Operand,
        then_edge: Edge,
        else_edge: Edge,
    },
    Return {
        results: Vec<Operand>,
    },
}

impl Op {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Jump(_) | Op::Branch { .. } | Op::Return { .. } | Op::Call { .. } | Op::Panic { .. }
        )
    }

    /// Ops that may report `Blocked` and must therefore start a block.
    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            Op::Send { .. } | Op::Recv { .. } | Op::Select { .. } | Op::RunDefers
        )
    }

    /// Continuation targets this op may transfer control to.
    pub fn targets(&self) -> Vec<i32> {
        match self {
            Op::Jump(edge) => vec![edge.target],
            Op::Branch {
                then_edge,
                else_edge,
                ..
            } => vec![then_edge.target, else_edge.target],
            Op::Call { resume, .. } => vec![*resume],
            Op::Panic {
                resume: Some(resume),
                ..
            } => vec![*resume],
            _ => Vec::new(),
        }
    }
}
