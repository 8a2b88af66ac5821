//! gostep - run Go SSA programs as resumable state machines
//!
//! The compiler lowers each SSA function either to a plain function or to
//! a state machine whose blocks can be suspended and resumed; the runtime
//! steps those machines as goroutines on a cooperative scheduler.

pub mod compiler;
pub mod config;
pub mod ssa;
pub mod vm;

// Re-export commonly used types
pub use compiler::{CompileError, Error, compile_program};
pub use config::{DeadlockPolicy, RuntimeConfig, Settings, StatsFormat, TargetConfig};
pub use vm::{Exit, Runtime, RuntimeError, SchedStats, Value};
