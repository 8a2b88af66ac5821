//! SSA to state-machine compiler and the file-level pipeline used by the
//! CLI.

mod call;
mod concurrency;
mod continuation;
pub mod dump;
mod error;
mod function;
mod regalloc;
mod select;
pub mod types;

pub use concurrency::analyze as analyze_concurrency;
pub use continuation::validate;
pub use dump::{Disassembler, format_program};
pub use error::CompileError;
pub use types::build_type_table;

use std::path::Path;
use std::rc::Rc;

use crate::config::{ConfigError, RuntimeConfig, TargetConfig};
use crate::ssa::{self, FuncId, LoadError};
use crate::vm::{self, Exit, FrameKind, GlobalSlot, Runtime, RuntimeError, SchedStats};
use function::{Context, FunctionCompiler};

/// Any failure of the load, compile, run pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn check_entry(program: &ssa::Program, which: &str, id: Option<FuncId>) -> Result<(), CompileError> {
    match id {
        Some(f) if f.index() >= program.functions.len() => Err(CompileError::UnknownFunction {
            func: which.to_string(),
            id: f,
            pos: None,
        }),
        _ => Ok(()),
    }
}

/// Compile every function of `program` and assemble the runtime program.
pub fn compile_program(
    program: &ssa::Program,
    target: &TargetConfig,
) -> Result<vm::Program, CompileError> {
    check_entry(program, "<init>", program.init)?;
    check_entry(program, "<main>", program.main)?;

    let types = build_type_table(&program.types, target)?;
    let kinds: Vec<FrameKind> = analyze_concurrency(program)
        .into_iter()
        .map(|s| {
            if s {
                FrameKind::Suspendable
            } else {
                FrameKind::Plain
            }
        })
        .collect();

    let mut ctx = Context {
        program,
        types: &types,
        kinds: &kinds,
        target,
        invoke_sites: 0,
    };
    let mut functions = Vec::with_capacity(program.functions.len());
    for (i, func) in program.functions.iter().enumerate() {
        functions.push(FunctionCompiler::compile(&mut ctx, FuncId(i as u32), func)?);
    }
    let invoke_sites = ctx.invoke_sites;

    let globals = program
        .globals
        .iter()
        .map(|g| {
            let desc = types.get(g.ty).ok_or_else(|| CompileError::UnknownType {
                func: g.name.clone(),
                id: g.ty,
            })?;
            Ok(GlobalSlot {
                name: g.name.clone(),
                size: desc.size,
            })
        })
        .collect::<Result<Vec<_>, CompileError>>()?;

    if target.trace_compile {
        let suspendable = kinds.iter().filter(|k| **k == FrameKind::Suspendable).count();
        eprintln!(
            "[compile] {} functions ({} suspendable), {} types, {} invoke sites",
            functions.len(),
            suspendable,
            types.len(),
            invoke_sites
        );
    }

    Ok(vm::Program {
        functions,
        types,
        globals,
        files: program.files.clone(),
        init: program.init,
        main: program.main,
        invoke_sites,
    })
}

/// Load a JSON SSA program and compile it.
pub fn compile_file(path: &Path, target: &TargetConfig) -> Result<vm::Program, Error> {
    let program = ssa::Program::load(path)?;
    Ok(compile_program(&program, target)?)
}

/// Run a compiled program's `init` and `main` on a fresh runtime.
pub fn run_program(
    program: vm::Program,
    config: RuntimeConfig,
) -> Result<(Exit, SchedStats), Error> {
    let mut runtime = Runtime::new(Rc::new(program), config);
    let exit = runtime.run_main()?;
    Ok((exit, runtime.stats()))
}

/// Compile and run a file.
pub fn run_file(
    path: &Path,
    config: RuntimeConfig,
    target: &TargetConfig,
) -> Result<(Exit, SchedStats), Error> {
    let program = compile_file(path, target)?;
    run_program(program, config)
}

/// Compile a file without running it.
pub fn check_file(path: &Path, target: &TargetConfig) -> Result<vm::Program, Error> {
    compile_file(path, target)
}

/// Compile a file and render its emitted blocks.
pub fn dump_file(path: &Path, target: &TargetConfig) -> Result<String, Error> {
    let program = compile_file(path, target)?;
    Ok(format_program(&program))
}
