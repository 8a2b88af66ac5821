//! Decides which functions must compile to suspendable state machines.
//!
//! A function is suspendable when it may wait on a channel, start or defer
//! calls, dispatch dynamically, or call a suspendable function. Everything
//! else runs eagerly as a plain function.

use crate::ssa::{Builtin, Callee, Function, InstrKind, Program};

/// Whether `func` suspends on its own, ignoring its callees.
fn suspends_locally(func: &Function) -> bool {
    if func.uses_concurrency {
        return true;
    }
    func.blocks.iter().flat_map(|b| &b.instrs).any(|i| match &i.op {
        InstrKind::Send { .. }
        | InstrKind::Recv { .. }
        | InstrKind::Select { .. }
        | InstrKind::Go { .. }
        | InstrKind::Defer { .. }
        | InstrKind::RunDefers
        | InstrKind::MakeChan { .. }
        | InstrKind::MakeInterface { .. }
        | InstrKind::TypeAssert { .. } => true,
        InstrKind::Call { call } => matches!(
            call.callee,
            Callee::Closure(_) | Callee::Invoke { .. } | Callee::Builtin(Builtin::Close)
        ),
        _ => false,
    })
}

fn static_callees(func: &Function) -> impl Iterator<Item = usize> + '_ {
    func.blocks
        .iter()
        .flat_map(|b| &b.instrs)
        .filter_map(|i| match &i.op {
            InstrKind::Call { call } => match call.callee {
                Callee::Static(f) => Some(f.index()),
                _ => None,
            },
            _ => None,
        })
}

/// Per-function suspendability, indexed like `program.functions`.
pub fn analyze(program: &Program) -> Vec<bool> {
    let mut flagged: Vec<bool> = program.functions.iter().map(suspends_locally).collect();
    loop {
        let mut changed = false;
        for (i, func) in program.functions.iter().enumerate() {
            if flagged[i] {
                continue;
            }
            if static_callees(func).any(|c| flagged.get(c).copied().unwrap_or(false)) {
                flagged[i] = true;
                changed = true;
            }
        }
        if !changed {
            return flagged;
        }
    }
}
