//! SSA input program.
//!
//! This is the boundary with the front end: a typed instruction stream per
//! function and a type table whose ids are assigned once by the producer.
//! Programs are either built in memory with [`builder::ProgramBuilder`] or
//! loaded from JSON with [`Program::from_json`].

pub mod builder;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

pub use builder::{FunctionBuilder, ProgramBuilder};

/// Type ID (index into [`Program::types`]). Id 0 is always the nil type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const NIL: TypeId = TypeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Function ID (index into [`Program::functions`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FuncId(pub u32);

impl FuncId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Global ID (index into [`Program::globals`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(pub u32);

impl GlobalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// SSA value number, unique within one function.
pub type ValueId = u32;

/// Source position attached to an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    /// Index into [`Program::files`]
    #[serde(default)]
    pub file: u16,
    /// Line number (1-based)
    pub line: u32,
    /// Column number (1-based)
    #[serde(default)]
    pub column: u32,
}

// =============================================================================
// Types
// =============================================================================

/// A type declaration as assigned by the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    pub ty: TypeKind,
    /// Concrete method set (empty for interfaces and unnamed types)
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeKind {
    Nil,
    Bool,
    Int { bits: u8, signed: bool },
    Float { bits: u8 },
    String,
    Pointer { elem: TypeId },
    Slice { elem: TypeId },
    Array { elem: TypeId, len: u64 },
    Struct { fields: Vec<FieldDecl> },
    Chan { elem: TypeId },
    Interface { methods: Vec<MethodSig> },
    Func { params: Vec<TypeId>, results: Vec<TypeId> },
    Tuple { elems: Vec<TypeId> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeId,
}

/// An interface method requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSig {
    pub name: String,
    /// Func type of the method, receiver excluded
    pub sig: TypeId,
}

/// A concrete method implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    pub sig: TypeId,
    /// Implementing function; its first parameter is the receiver
    pub func: FuncId,
}

// =============================================================================
// Operands and instructions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Const {
    Bool(bool),
    Int { value: i64, ty: TypeId },
    Float { value: f64, ty: TypeId },
    Str(String),
    Nil(TypeId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(ValueId),
    Const(Const),
    /// Address of a package-level variable
    Global(GlobalId),
    /// A function used as a value
    Func(FuncId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    AndNot,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnOp {
    Neg,
    Not,
    Complement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    Len,
    Cap,
    Append,
    Copy,
    Close,
    Print,
    Println,
    Recover,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Cap => "cap",
            Builtin::Append => "append",
            Builtin::Copy => "copy",
            Builtin::Close => "close",
            Builtin::Print => "print",
            Builtin::Println => "println",
            Builtin::Recover => "recover",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Callee {
    Static(FuncId),
    Closure(Operand),
    /// Dynamic dispatch on an interface value
    Invoke { recv: Operand, method: String },
    Builtin(Builtin),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallCommon {
    pub callee: Callee,
    #[serde(default)]
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChanDir {
    Send,
    Recv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectState {
    pub dir: ChanDir,
    pub chan: Operand,
    #[serde(default)]
    pub send: Option<Operand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstrKind {
    /// `ty` is the operand type; `count_ty` is the type of a shift count
    /// when it differs from `ty`
    BinOp {
        op: BinOp,
        x: Operand,
        y: Operand,
        ty: TypeId,
        #[serde(default)]
        count_ty: Option<TypeId>,
    },
    UnOp { op: UnOp, x: Operand, ty: TypeId },
    Convert { x: Operand, from: TypeId, to: TypeId },
    /// Allocates a zeroed `ty` and yields a pointer to it
    Alloc { ty: TypeId },
    /// `ty` is the struct type pointed to by `x`
    FieldAddr { x: Operand, field: usize, ty: TypeId },
    /// `ty` is the array type pointed to by `x`, or the slice type of `x`
    IndexAddr { x: Operand, index: Operand, ty: TypeId },
    Load { addr: Operand, ty: TypeId },
    Store { addr: Operand, value: Operand, ty: TypeId },
    /// `ty` is the struct type of `x`
    Field { x: Operand, field: usize, ty: TypeId },
    /// `ty` is the array or string type of `x`
    Index { x: Operand, index: Operand, ty: TypeId },
    Extract { tuple: Operand, index: usize },
    MakeSlice { elem: TypeId, len: Operand, cap: Operand },
    /// `ty` is the type of `x`: slice, string, or pointer to array
    Slice {
        x: Operand,
        #[serde(default)]
        low: Option<Operand>,
        #[serde(default)]
        high: Option<Operand>,
        #[serde(default)]
        max: Option<Operand>,
        ty: TypeId,
    },
    MakeChan { elem: TypeId, size: Operand },
    /// `ty` is the concrete (or interface) type of `x`
    MakeInterface { x: Operand, ty: TypeId },
    TypeAssert { x: Operand, ty: TypeId, comma_ok: bool },
    MakeClosure { func: FuncId, bindings: Vec<Operand> },
    Call { call: CallCommon },
    Go { call: CallCommon },
    Defer { call: CallCommon },
    RunDefers,
    Send { chan: Operand, x: Operand },
    Recv { chan: Operand, comma_ok: bool },
    Select { states: Vec<SelectState>, blocking: bool },
    /// One edge per predecessor, in predecessor order
    Phi { edges: Vec<Operand> },
    Jump,
    If { cond: Operand },
    Return { results: Vec<Operand> },
    Panic { x: Operand },
}

impl InstrKind {
    /// Whether this instruction ends a block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstrKind::Jump | InstrKind::If { .. } | InstrKind::Return { .. } | InstrKind::Panic { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    #[serde(default)]
    pub dest: Option<ValueId>,
    /// Static type of `dest`, when known
    #[serde(default)]
    pub ty: Option<TypeId>,
    pub op: InstrKind,
    #[serde(default)]
    pub pos: Option<Pos>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub preds: Vec<usize>,
    #[serde(default)]
    pub succs: Vec<usize>,
    pub instrs: Vec<Instr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub value: ValueId,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub free_vars: Vec<Param>,
    #[serde(default)]
    pub results: Vec<TypeId>,
    pub blocks: Vec<Block>,
    /// Block that resumes after a recovered panic
    #[serde(default)]
    pub recover: Option<usize>,
    /// Forces suspendable compilation regardless of analysis
    #[serde(default)]
    pub uses_concurrency: bool,
    #[serde(default)]
    pub pos: Option<Pos>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    /// Type of the stored value (the global operand is a pointer to it)
    pub ty: TypeId,
}

/// A whole SSA program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub files: Vec<String>,
    pub types: Vec<TypeDecl>,
    #[serde(default)]
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
    #[serde(default)]
    pub init: Option<FuncId>,
    #[serde(default)]
    pub main: Option<FuncId>,
}

/// Error loading a serialized program.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid SSA program: {0}")]
    Json(#[from] serde_json::Error),
}

impl Program {
    /// Parse a program from its JSON form.
    pub fn from_json(text: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, LoadError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read and parse a program file.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    /// Render a position as `file:line:column`.
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

    #[test]
    fn test_parse_minimal_program() {
        let text = r#"{
            "files": ["main.go"],
            "types": [
                {"name": "nil", "ty": {"kind": "nil"}},
                {"name": "int", "ty": {"kind": "int", "bits": 64, "signed": true}}
            ],
            "functions": [{
                "name": "main",
                "blocks": [{
                    "instrs": [
                        {"dest": 0, "op": {"kind": "bin_op", "op": "add",
                            "x": {"const": {"int": {"value": 1, "ty": 1}}},
                            "y": {"const": {"int": {"value": 2, "ty": 1}}},
                            "ty": 1},
                         "pos": {"line": 3, "column": 5}},
                        {"op": {"kind": "return", "results": []}}
                    ]
                }]
            }],
            "main": 0
        }"#;
        let program = Program::from_json(text).unwrap();
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.main, Some(FuncId(0)));
        let instr = &program.functions[0].blocks[0].instrs[0];
        assert_eq!(instr.dest, Some(0));
        assert!(matches!(instr.op, InstrKind::BinOp { op: BinOp::Add, .. }));
        assert_eq!(program.format_pos(instr.pos.unwrap()), "main.go:3:5");
    }

    #[test]
    fn test_invalid_json_reports_error() {
        let err = Program::from_json("{\"types\": 3}").unwrap_err();
        assert!(err.to_string().starts_with("invalid SSA program"));
    }

    #[test]
    fn test_terminators() {
        assert!(InstrKind::Jump.is_terminator());
        assert!(InstrKind::Return { results: vec![] }.is_terminator());
        assert!(!InstrKind::RunDefers.is_terminator());
    }
}
