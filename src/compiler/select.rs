//! Channel operations. Each one starts its own block so that a blocked
//! step retries it from the top.

use super::error::CompileError;
use super::function::FunctionCompiler;
use crate::ssa::{self, ChanDir, SelectState};
use crate::vm::{Op, SelectCase, Value};

impl FunctionCompiler<'_, '_> {
    pub(super) fn lower_send(
        &mut self,
        chan: &ssa::Operand,
        x: &ssa::Operand,
    ) -> Result<(), CompileError> {
        self.suspend_in_plain("send")?;
        let (chan, value) = (self.operand(chan)?, self.operand(x)?);
        self.out.retry_point(self.pos);
        self.emit(Op::Send { chan, value });
        Ok(())
    }

    pub(super) fn lower_recv(
        &mut self,
        instr: &ssa::Instr,
        chan: &ssa::Operand,
        comma_ok: bool,
    ) -> Result<(), CompileError> {
        self.suspend_in_plain("receive")?;
        let chan = self.operand(chan)?;
        self.out.retry_point(self.pos);
        let dst = self.opt_dst(instr);
        self.emit(Op::Recv {
            dst,
            chan,
            comma_ok,
        });
        Ok(())
    }

    pub(super) fn lower_select(
        &mut self,
        instr: &ssa::Instr,
        states: &[SelectState],
        blocking: bool,
    ) -> Result<(), CompileError> {
        self.suspend_in_plain("select")?;
        let mut cases = Vec::with_capacity(states.len());
        let mut zeros = Vec::new();
        for state in states {
            let chan = self.operand(&state.chan)?;
            let send = match (state.dir, &state.send) {
                (ChanDir::Send, Some(v)) => Some(self.operand(v)?),
                (ChanDir::Send, None) => return Err(self.invalid("select send case without a value")),
                (ChanDir::Recv, _) => {
                    zeros.push(self.element_zero(&state.chan)?);
                    None
                }
            };
            cases.push(SelectCase { chan, send });
        }
        self.out.retry_point(self.pos);
        let dst = self.opt_dst(instr);
        self.emit(Op::Select {
            dst,
            cases,
            blocking,
            zeros,
        });
        Ok(())
    }

    /// Zero value of a channel operand's element type; `Nil` when the
    /// operand carries no static type.
    fn element_zero(&self, chan: &ssa::Operand) -> Result<Value, CompileError> {
        let Some(ty) = self.static_type(chan) else {
            return Ok(Value::Nil);
        };
        match self.desc(ty)?.elem {
            Some(elem) => Ok(self.desc(elem)?.zero.clone()),
            None => Ok(Value::Nil),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::{CompileError, compile_program};
    use crate::config::TargetConfig;
    use crate::ssa::{ChanDir, ProgramBuilder};
    use crate::vm::{Op, Value};

    #[test]
    fn test_select_starts_a_block_with_one_zero_per_receive() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let main = b.declare("main", &[], &[]);
        {
            let mut fb = b.function(main);
            let one = fb.int(1);
            let a = fb.make_chan(int, one.clone());
            let c = fb.make_chan(int, one.clone());
            fb.select(
                vec![
                    (ChanDir::Recv, a.clone(), None),
                    (ChanDir::Send, c, Some(one)),
                    (ChanDir::Recv, a, None),
                ],
                true,
            );
            fb.ret(vec![]);
        }
        let p = compile_program(&b.finish(), &TargetConfig::default()).unwrap();
        let main = &p.functions[0];
        assert_eq!(main.blocks.len(), 2);
        match &main.blocks[1].code[0] {
            Op::Select {
                cases,
                zeros,
                blocking,
                ..
            } => {
                assert_eq!(cases.len(), 3);
                assert_eq!(zeros, &vec![Value::Int(0), Value::Int(0)]);
                assert!(*blocking);
            }
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn test_select_receive_zeros_follow_element_type() {
        let mut b = ProgramBuilder::new();
        let string = b.string_type();
        let float = b.float_type();
        let strings = b.chan(string);
        let floats = b.chan(float);
        let main = b.declare("main", &[strings, floats], &[]);
        {
            let mut fb = b.function(main);
            let (s, f) = (fb.param(0), fb.param(1));
            fb.select(vec![(ChanDir::Recv, s, None), (ChanDir::Recv, f, None)], false);
            fb.ret(vec![]);
        }
        let p = compile_program(&b.finish(), &TargetConfig::default()).unwrap();
        let select = p.functions[0]
            .blocks
            .iter()
            .flat_map(|b| b.code.iter())
            .find(|op| matches!(op, Op::Select { .. }));
        match select {
            Some(Op::Select { zeros, .. }) => {
                assert_eq!(zeros, &vec![Value::str(""), Value::Float(0.0)]);
            }
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn test_receive_at_block_start_is_not_split() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let chan = b.chan(int);
        let main = b.declare("main", &[chan], &[int]);
        {
            let mut fb = b.function(main);
            let ch = fb.param(0);
            let v = fb.recv(ch);
            fb.ret(vec![v]);
        }
        let p = compile_program(&b.finish(), &TargetConfig::default()).unwrap();
        let main = &p.functions[0];
        assert_eq!(main.blocks.len(), 1);
        assert!(matches!(main.blocks[0].code[0], Op::Recv { .. }));
    }

    #[test]
    fn test_send_case_requires_value() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let main = b.declare("main", &[], &[]);
        {
            let mut fb = b.function(main);
            let zero = fb.int(0);
            let ch = fb.make_chan(int, zero);
            fb.select(vec![(ChanDir::Send, ch, None)], false);
            fb.ret(vec![]);
        }
        let err = compile_program(&b.finish(), &TargetConfig::default()).unwrap_err();
        assert!(matches!(err, CompileError::Invalid { .. }));
    }
}
