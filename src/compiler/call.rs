//! Calls, `go` and `defer`.

use std::rc::Rc;

use super::error::CompileError;
use super::function::FunctionCompiler;
use crate::ssa::{self, Builtin, CallCommon, Callee};
use crate::vm::{BuiltinOp, CallTarget, Conversion, FrameKind, Kind, Op, Operand};

fn builtin_op(b: Builtin) -> Option<BuiltinOp> {
    Some(match b {
        Builtin::Len => BuiltinOp::Len,
        Builtin::Cap => BuiltinOp::Cap,
        Builtin::Append => BuiltinOp::Append,
        Builtin::Copy => BuiltinOp::Copy,
        Builtin::Close => BuiltinOp::Close,
        Builtin::Print => BuiltinOp::Print,
        Builtin::Println => BuiltinOp::Println,
        Builtin::Recover => return None,
    })
}

impl FunctionCompiler<'_, '_> {
    /// A `print` argument. 64-bit unsigned values are formatted as text
    /// first, since registers hold them as signed.
    fn printed(&mut self, arg: &ssa::Operand) -> Result<Operand, CompileError> {
        let x = self.operand(arg)?;
        let unsigned64 = match self.static_type(arg) {
            Some(ty) => {
                let d = self.desc(ty)?;
                d.kind == Kind::Int && d.bits == 64 && !d.signed
            }
            None => false,
        };
        if !unsigned64 {
            return Ok(x);
        }
        let dst = self.regs.temp();
        self.emit(Op::Convert {
            dst,
            conv: Conversion::UnsignedText,
            x,
        });
        Ok(Operand::Reg(dst))
    }

    fn call_target(&mut self, callee: &Callee, how: &str) -> Result<CallTarget, CompileError> {
        match callee {
            Callee::Static(f) => Ok(CallTarget::Static(self.check_func(*f)?)),
            Callee::Closure(c) => Ok(CallTarget::Closure(self.operand(c)?)),
            Callee::Invoke { recv, method } => {
                let recv = self.operand(recv)?;
                let site = self.ctx.invoke_sites;
                self.ctx.invoke_sites += 1;
                Ok(CallTarget::Invoke {
                    recv,
                    method: Rc::from(method.as_str()),
                    site,
                })
            }
            Callee::Builtin(b) => Err(CompileError::Unsupported {
                func: self.func.name.clone(),
                what: format!("{} of builtin {}", how, b.name()),
                pos: self.pos_text(),
            }),
        }
    }

    pub(super) fn lower_call(
        &mut self,
        instr: &ssa::Instr,
        call: &CallCommon,
    ) -> Result<(), CompileError> {
        if let Callee::Builtin(b) = call.callee {
            let args = match b {
                Builtin::Print | Builtin::Println => call
                    .args
                    .iter()
                    .map(|a| self.printed(a))
                    .collect::<Result<Vec<_>, _>>()?,
                _ => self.operands(&call.args)?,
            };
            let op = match builtin_op(b) {
                Some(builtin) => Op::Builtin {
                    dst: self.opt_dst(instr),
                    builtin,
                    args,
                },
                None => Op::Recover {
                    dst: self.dst(instr),
                },
            };
            self.emit(op);
            return Ok(());
        }

        if let Callee::Static(f) = call.callee {
            let func = self.check_func(f)?;
            if self.ctx.kinds.get(func.index()) == Some(&FrameKind::Plain) {
                let args = self.operands(&call.args)?;
                let dst = self.opt_dst(instr);
                self.emit(Op::CallPlain { dst, func, args });
                return Ok(());
            }
        }

        self.suspend_in_plain("call of a suspendable function")?;
        let target = self.call_target(&call.callee, "call")?;
        let args = self.operands(&call.args)?;
        let resume = self.out.fresh();
        self.emit(Op::Call {
            target,
            args,
            resume,
        });
        self.out.resume_at(resume);
        let dst = self.opt_dst(instr);
        self.emit(Op::TakeResult { dst });
        Ok(())
    }

    pub(super) fn lower_go(&mut self, call: &CallCommon) -> Result<(), CompileError> {
        let target = self.call_target(&call.callee, "go")?;
        let args = self.operands(&call.args)?;
        self.emit(Op::Go { target, args });
        Ok(())
    }

    pub(super) fn lower_defer(&mut self, call: &CallCommon) -> Result<(), CompileError> {
        let target = self.call_target(&call.callee, "defer")?;
        let args = self.operands(&call.args)?;
        self.emit(Op::Defer { target, args });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::{CompileError, compile_program};
    use crate::config::TargetConfig;
    use crate::ssa::{Builtin, ProgramBuilder};
    use crate::vm::{CallTarget, Op};

    #[test]
    fn test_plain_callee_is_called_directly() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let double = b.declare("double", &[int], &[int]);
        let main = b.declare("main", &[], &[]);
        {
            let mut fb = b.function(double);
            let x = fb.param(0);
            let y = fb.binop(crate::ssa::BinOp::Add, x.clone(), x, int);
            fb.ret(vec![y]);
        }
        {
            let mut fb = b.function(main);
            let two = fb.int(2);
            let v = fb.call(double, vec![two]);
            fb.println(vec![v]);
            fb.ret(vec![]);
        }
        let p = compile_program(&b.finish(), &TargetConfig::default()).unwrap();
        let code = &p.functions[1].blocks[0].code;
        assert!(matches!(code[0], Op::CallPlain { dst: Some(_), .. }));
        assert_eq!(p.functions[1].blocks.len(), 1);
    }

    #[test]
    fn test_invoke_sites_are_numbered() {
        let mut b = ProgramBuilder::new();
        let any = b.any_type();
        let main = b.declare("main", &[any], &[]);
        {
            let mut fb = b.function(main);
            let x = fb.param(0);
            fb.invoke(x.clone(), "String", vec![]);
            fb.invoke(x, "String", vec![]);
            fb.ret(vec![]);
        }
        let p = compile_program(&b.finish(), &TargetConfig::default()).unwrap();
        assert_eq!(p.invoke_sites, 2);
        let sites: Vec<u32> = p.functions[0]
            .blocks
            .iter()
            .flat_map(|blk| &blk.code)
            .filter_map(|op| match op {
                Op::Call {
                    target: CallTarget::Invoke { site, .. },
                    ..
                } => Some(*site),
                _ => None,
            })
            .collect();
        assert_eq!(sites, vec![0, 1]);
    }

    #[test]
    fn test_go_of_builtin_is_unsupported() {
        let mut b = ProgramBuilder::new();
        let main = b.declare("main", &[], &[]);
        {
            let mut fb = b.function(main);
            let hi = fb.string("hi");
            fb.effect(crate::ssa::InstrKind::Go {
                call: crate::ssa::CallCommon {
                    callee: crate::ssa::Callee::Builtin(Builtin::Println),
                    args: vec![hi],
                },
            });
            fb.ret(vec![]);
        }
        let err = compile_program(&b.finish(), &TargetConfig::default()).unwrap_err();
        assert!(matches!(err, CompileError::Unsupported { .. }));
        assert!(err.to_string().contains("go of builtin println"));
    }

    #[test]
    fn test_recover_lowers_to_recover_op() {
        let mut b = ProgramBuilder::new();
        let handler = b.declare("handler", &[], &[]);
        {
            let mut fb = b.function(handler);
            let r = fb.builtin(Builtin::Recover, vec![]);
            fb.println(vec![r]);
            fb.ret(vec![]);
        }
        let p = compile_program(&b.finish(), &TargetConfig::default()).unwrap();
        assert!(matches!(p.functions[0].blocks[0].code[0], Op::Recover { .. }));
    }
}
