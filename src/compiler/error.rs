use crate::ssa::{FuncId, TypeId, ValueId};

fn at(pos: &Option<String>) -> String {
    match pos {
        Some(p) => format!(" at {}", p),
        None => String::new(),
    }
}

/// Errors found while lowering an SSA program.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("{func}: bad continuation: {detail}")]
    BadContinuation { func: String, detail: String },
    #[error("{func}: unknown function {id}{}", at(.pos))]
    UnknownFunction {
        func: String,
        id: FuncId,
        pos: Option<String>,
    },
    #[error("{func}: unknown type {id}")]
    UnknownType { func: String, id: TypeId },
    #[error("{func}: value v{value} used before definition{}", at(.pos))]
    UnknownValue {
        func: String,
        value: ValueId,
        pos: Option<String>,
    },
    #[error("type {ty} has no memory layout: {detail}")]
    Unassignable { ty: String, detail: String },
    #[error("{func}: {what} cannot suspend in a plain function{}", at(.pos))]
    SuspendInPlain {
        func: String,
        what: &'static str,
        pos: Option<String>,
    },
    #[error("{func}: malformed phi in block {block}: {detail}")]
    MalformedPhi {
        func: String,
        block: usize,
        detail: String,
    },
    #[error("{func}: {what}{}", at(.pos))]
    Invalid {
        func: String,
        what: String,
        pos: Option<String>,
    },
    #[error("{func}: {what} is not supported{}", at(.pos))]
    Unsupported {
        func: String,
        what: String,
        pos: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_includes_position() {
        let err = CompileError::SuspendInPlain {
            func: "helper".to_string(),
            what: "send",
            pos: Some("main.go:4:2".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "helper: send cannot suspend in a plain function at main.go:4:2"
        );
    }
}
