//! Maps sparse SSA value ids to dense frame registers.

use rustc_hash::FxHashMap;

use crate::ssa::{Function, ValueId};
use crate::vm::Reg;

/// Register assignment for one function: parameters first, then free
/// variables, then instruction results in block order, then temporaries.
#[derive(Debug, Default)]
pub struct RegAlloc {
    map: FxHashMap<ValueId, Reg>,
    next: Reg,
}

impl RegAlloc {
    pub fn new(func: &Function) -> Self {
        let mut regs = Self::default();
        for p in func.params.iter().chain(&func.free_vars) {
            regs.assign(p.value);
        }
        for instr in func.blocks.iter().flat_map(|b| &b.instrs) {
            if let Some(dest) = instr.dest {
                regs.assign(dest);
            }
        }
        regs
    }

    fn assign(&mut self, value: ValueId) -> Reg {
        if let Some(&r) = self.map.get(&value) {
            return r;
        }
        let r = self.next;
        self.map.insert(value, r);
        self.next += 1;
        r
    }

    pub fn get(&self, value: ValueId) -> Option<Reg> {
        self.map.get(&value).copied()
    }

    /// A fresh compiler temporary.
    pub fn temp(&mut self) -> Reg {
        let r = self.next;
        self.next += 1;
        r
    }

    pub fn count(&self) -> usize {
        self.next as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssa::ProgramBuilder;

    #[test]
    fn test_params_then_values_then_temps() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let f = b.declare("f", &[int, int], &[int]);
        {
            let mut fb = b.function(f);
            let x = fb.param(0);
            let y = fb.param(1);
            let sum = fb.binop(crate::ssa::BinOp::Add, x, y, int);
            fb.ret(vec![sum]);
        }
        let program = b.finish();
        let mut regs = RegAlloc::new(&program.functions[0]);
        assert_eq!(regs.get(0), Some(0));
        assert_eq!(regs.get(1), Some(1));
        assert_eq!(regs.get(2), Some(2));
        assert_eq!(regs.get(9), None);
        assert_eq!(regs.temp(), 3);
        assert_eq!(regs.count(), 4);
    }
}
