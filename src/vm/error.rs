//! Runtime faults and scheduler-level errors.

use std::io;

use super::value::Value;

/// A fault raised while executing generated code or runtime-library code.
///
/// Faults never escape the scheduler: they are injected into the running
/// goroutine's panic state and become a [`RuntimeError::Panic`] only when the
/// goroutine's stack empties without a recovery.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Fault {
    #[error("invalid memory address or nil pointer dereference")]
    NilDereference,
    #[error("index out of range [{index}] with length {len}")]
    IndexOutOfRange { index: i64, len: i64 },
    #[error("slice bounds out of range [{low}:{high}] with capacity {cap}")]
    SliceBounds { low: i64, high: i64, cap: i64 },
    #[error("integer divide by zero")]
    DivideByZero,
    #[error("negative shift amount")]
    NegativeShift,
    #[error("makeslice: len out of range")]
    MakeSliceLen,
    #[error("makechan: size out of range")]
    MakeChanSize,
    #[error("interface conversion: {0}")]
    TypeAssertion(String),
    #[error("send on closed channel")]
    SendOnClosed,
    #[error("close of closed channel")]
    CloseOfClosed,
    #[error("close of nil channel")]
    CloseOfNil,
    #[error("no method found: {method} on {ty}")]
    NoMethod { ty: String, method: String },
    #[error("bad continuation {next} in {func}")]
    BadContinuation { func: String, next: i32 },
    #[error("invalid access at offset {offset} of a {size}-byte object")]
    BadAddress { offset: u32, size: usize },
    #[error("unexpected operand: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },
    #[error("write error: {0}")]
    Output(String),
    /// `panic(v)` from user code
    #[error("{}", .0.panic_text())]
    User(Value),
}

impl Fault {
    /// Whether this fault originates in the runtime rather than `panic`.
    pub fn is_runtime_error(&self) -> bool {
        !matches!(self, Fault::User(_))
    }

    pub fn mismatch(expected: &'static str, found: &Value) -> Self {
        Fault::TypeMismatch {
            expected,
            found: format!("{:?}", found),
        }
    }

    /// Text after `panic: ` in a crash report.
    pub fn panic_message(&self) -> String {
        match self {
            Fault::User(v) => v.panic_text(),
            other => format!("runtime error: {}", other),
        }
    }
}

impl From<io::Error> for Fault {
    fn from(e: io::Error) -> Self {
        Fault::Output(e.to_string())
    }
}

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("panic: {message}\n\n{dump}")]
    Panic {
        goroutine: u32,
        message: String,
        dump: String,
    },
    #[error("fatal error: all goroutines are asleep - deadlock!\n\n{dump}")]
    Deadlock { dump: String },
    #[error("scheduler exceeded the limit of {0} passes")]
    PassLimit(u64),
    #[error("program has no main function")]
    NoMain,
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("goroutine {0} does not exist")]
    NoGoroutine(u32),
    #[error("{func} expects {expected} arguments, got {got}")]
    Arity {
        func: String,
        expected: usize,
        got: usize,
    },
    #[error("output error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_fault_message() {
        let fault = Fault::IndexOutOfRange { index: 5, len: 3 };
        assert_eq!(
            fault.panic_message(),
            "runtime error: index out of range [5] with length 3"
        );
        assert!(fault.is_runtime_error());
    }

    #[test]
    fn test_user_panic_message() {
        let fault = Fault::User(Value::str("boom"));
        assert_eq!(fault.panic_message(), "boom");
        assert!(!fault.is_runtime_error());
    }
}
