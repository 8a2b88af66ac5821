//! Step executor.
//!
//! A suspendable frame is stepped one block at a time: the ops of the block
//! at `frame.next` run until the terminator, which either moves `next` and
//! yields, or hands a new frame / a result to the scheduler. Plain frames run
//! eagerly to completion, with direct plain calls as Rust recursion.

use std::rc::Rc;

use super::error::Fault;
use super::frame::{FrameRole, StackFrame};
use super::ops::{CallTarget, Edge, Indexed, Op, Operand, SelectCase};
use super::scheduler::{GoroutineState, Runtime};
use super::value::{Closure, Value};
use super::{FrameKind, Function, Program};
use crate::ssa::{BinOp, FuncId, TypeId};

/// Outcome of one scheduler step of a frame.
#[derive(Debug)]
pub enum Step {
    /// Progress was made; `next` moved
    Yield,
    /// Waiting on a channel; nothing changed
    Blocked,
    /// Push this callee above the current frame
    Call(StackFrame),
    /// The frame finished with this result
    Return(Value),
}

/// Effect of a single op on control flow.
enum Flow {
    Next,
    Jump(i32),
    Blocked,
    Call(StackFrame),
    Return(Value),
}

fn bad_continuation(func: &Function, next: i32) -> Fault {
    Fault::BadContinuation {
        func: func.name.clone(),
        next,
    }
}

fn val(frame: &StackFrame, operand: &Operand) -> Value {
    match operand {
        Operand::Reg(r) => frame.reg(*r).clone(),
        Operand::Imm(v) => v.clone(),
    }
}

fn vals(frame: &StackFrame, operands: &[Operand]) -> Vec<Value> {
    operands.iter().map(|o| val(frame, o)).collect()
}

fn pack_results(mut values: Vec<Value>) -> Value {
    match values.len() {
        0 => Value::Nil,
        1 => values.pop().unwrap_or_default(),
        _ => Value::tuple(values),
    }
}

/// Perform an edge's phi moves in parallel.
fn take_edge(frame: &mut StackFrame, edge: &Edge) -> i32 {
    let sources: Vec<Value> = edge.moves.iter().map(|(_, src)| val(frame, src)).collect();
    for ((dst, _), v) in edge.moves.iter().zip(sources) {
        frame.set(*dst, v);
    }
    edge.target
}

fn set_opt(frame: &mut StackFrame, dst: Option<u32>, v: Value) {
    if let Some(r) = dst {
        frame.set(r, v);
    }
}

impl Runtime {
    /// Advance `frame` by one step.
    pub(super) fn step_frame(&mut self, frame: &mut StackFrame) -> Result<Step, Fault> {
        let program = Rc::clone(&self.program);
        let func = program
            .function(frame.func)
            .ok_or_else(|| Fault::BadContinuation {
                func: frame.func.to_string(),
                next: frame.next,
            })?;
        if frame.kind == FrameKind::Plain {
            let v = self.run_plain(&program, func, frame)?;
            return Ok(Step::Return(v));
        }
        let block = func
            .block(frame.next)
            .ok_or_else(|| bad_continuation(func, frame.next))?;
        for op in &block.code {
            match self.exec(&program, frame, op)? {
                Flow::Next => {}
                Flow::Jump(target) => {
                    frame.last_block = frame.next;
                    frame.next = target;
                    return Ok(Step::Yield);
                }
                Flow::Blocked => return Ok(Step::Blocked),
                Flow::Call(callee) => return Ok(Step::Call(callee)),
                Flow::Return(v) => {
                    frame.completed = true;
                    return Ok(Step::Return(v));
                }
            }
        }
        Err(bad_continuation(func, frame.next))
    }

    /// Run a plain frame to completion.
    pub(super) fn run_plain(
        &mut self,
        program: &Program,
        func: &Function,
        frame: &mut StackFrame,
    ) -> Result<Value, Fault> {
        loop {
            let block = func
                .block(frame.next)
                .ok_or_else(|| bad_continuation(func, frame.next))?;
            let mut jumped = false;
            for op in &block.code {
                match self.exec(program, frame, op)? {
                    Flow::Next => {}
                    Flow::Jump(target) => {
                        frame.last_block = frame.next;
                        frame.next = target;
                        jumped = true;
                        break;
                    }
                    Flow::Return(v) => {
                        frame.completed = true;
                        return Ok(v);
                    }
                    Flow::Blocked | Flow::Call(_) => {
                        return Err(bad_continuation(func, frame.next));
                    }
                }
            }
            if !jumped {
                return Err(bad_continuation(func, frame.next));
            }
        }
    }

    /// Build the callee frame for a call target.
    pub(super) fn make_call(
        &mut self,
        program: &Program,
        frame: &StackFrame,
        target: &CallTarget,
        args: &[Operand],
    ) -> Result<StackFrame, Fault> {
        let mut args = vals(frame, args);
        let (id, env): (FuncId, Option<Rc<Closure>>) = match target {
            CallTarget::Static(id) => (*id, None),
            CallTarget::Closure(c) => {
                let closure = Rc::clone(val(frame, c).as_closure()?);
                (closure.func, Some(closure))
            }
            CallTarget::Invoke { recv, method, site } => {
                let recv = val(frame, recv);
                let iface = recv.as_interface()?;
                if iface.ty == TypeId::NIL {
                    return Err(Fault::NilDereference);
                }
                let id = self.resolve_method(program, iface.ty, method, *site)?;
                args.insert(0, iface.payload.clone());
                (id, None)
            }
        };
        let func = program.function(id).ok_or_else(|| Fault::NoMethod {
            ty: "<closure>".to_string(),
            method: id.to_string(),
        })?;
        let env = env.as_ref().map(|c| c.env.as_slice()).unwrap_or(&[]);
        Ok(StackFrame::new(id, func, args, env))
    }

    fn resolve_method(
        &mut self,
        program: &Program,
        ty: TypeId,
        method: &Rc<str>,
        site: u32,
    ) -> Result<FuncId, Fault> {
        let use_ic = self.config.dispatch_cache;
        if use_ic {
            if let Some(hit) = self.inline_caches.get(site).and_then(|ic| ic.check(ty)) {
                return Ok(hit);
            }
        }
        let found = self
            .type_cache
            .dispatch(&program.types, ty, method)
            .ok_or_else(|| Fault::NoMethod {
                ty: program.types.name(ty).to_string(),
                method: method.to_string(),
            })?;
        if use_ic {
            if let Some(ic) = self.inline_caches.get_mut(site) {
                ic.update(ty, found);
            }
        }
        Ok(found)
    }

    fn exec(&mut self, program: &Program, frame: &mut StackFrame, op: &Op) -> Result<Flow, Fault> {
        match op {
            Op::Move { dst, src } => {
                let v = val(frame, src);
                frame.set(*dst, v);
            }
            Op::Binary {
                dst,
                op,
                kind,
                x,
                y,
                count_signed,
            } => {
                let (x, y) = (val(frame, x), val(frame, y));
                let v = match op {
                    BinOp::Shl | BinOp::Shr => super::arith::shift(*op, *kind, &x, &y, *count_signed)?,
                    _ => super::arith::binary(*op, *kind, &x, &y)?,
                };
                frame.set(*dst, v);
            }
            Op::Unary { dst, op, kind, x } => {
                let v = super::arith::unary(*op, *kind, &val(frame, x))?;
                frame.set(*dst, v);
            }
            Op::Convert { dst, conv, x } => {
                let v = self.convert(*conv, &val(frame, x))?;
                frame.set(*dst, v);
            }
            Op::GlobalAddr { dst, global } => {
                let p = self
                    .globals
                    .get(global.index())
                    .copied()
                    .ok_or(Fault::NilDereference)?;
                frame.set(*dst, Value::Ptr(p));
            }
            Op::Alloc { dst, size } => {
                let p = self.memory.alloc(*size);
                frame.set(*dst, Value::Ptr(p));
            }
            Op::FieldAddr { dst, x, offset } => {
                let p = val(frame, x).as_ptr()?;
                frame.set(*dst, Value::Ptr(p.addr(*offset)));
            }
            Op::IndexAddr { dst, x, index, of } => {
                let i = val(frame, index).as_int()?;
                let p = match of {
                    Indexed::Slice => val(frame, x).as_slice()?.element(i)?,
                    Indexed::Array { len, elem_size } => {
                        let base = val(frame, x).as_ptr()?;
                        if i < 0 || i as u64 >= *len {
                            return Err(Fault::IndexOutOfRange {
                                index: i,
                                len: *len as i64,
                            });
                        }
                        base.addr(i as u32 * elem_size)
                    }
                    Indexed::String => return Err(Fault::mismatch("addressable container", &val(frame, x))),
                };
                frame.set(*dst, Value::Ptr(p));
            }
            Op::Load { dst, addr, access } => {
                let p = val(frame, addr).as_ptr()?;
                let v = self.memory.load(p, access)?;
                frame.set(*dst, v);
            }
            Op::Store {
                addr,
                value,
                access,
            } => {
                let p = val(frame, addr).as_ptr()?;
                self.memory.store(p, access, &val(frame, value))?;
            }
            Op::Extract { dst, tuple, index } => {
                let t = val(frame, tuple);
                let v = t
                    .as_tuple()?
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| Fault::mismatch("tuple component", &t))?;
                frame.set(*dst, v);
            }
            Op::Index { dst, x, index, of } => {
                let i = val(frame, index).as_int()?;
                let container = val(frame, x);
                let v = match of {
                    Indexed::String => {
                        let s = container.as_bytes()?;
                        let byte = usize::try_from(i)
                            .ok()
                            .and_then(|i| s.get(i))
                            .ok_or(Fault::IndexOutOfRange {
                                index: i,
                                len: s.len() as i64,
                            })?;
                        Value::Int(*byte as i64)
                    }
                    _ => {
                        let elems = container.as_tuple()?;
                        usize::try_from(i)
                            .ok()
                            .and_then(|i| elems.get(i))
                            .cloned()
                            .ok_or(Fault::IndexOutOfRange {
                                index: i,
                                len: elems.len() as i64,
                            })?
                    }
                };
                frame.set(*dst, v);
            }
            Op::MakeSlice {
                dst,
                elem_size,
                len,
                cap,
            } => {
                let len = val(frame, len).as_int()?;
                let cap = val(frame, cap).as_int()?;
                let v = self.make_slice(*elem_size, len, cap)?;
                frame.set(*dst, v);
            }
            Op::SliceOf {
                dst,
                x,
                of,
                low,
                high,
                max,
            } => {
                let bound = |o: &Option<Operand>| -> Result<Option<i64>, Fault> {
                    o.as_ref().map(|o| val(frame, o).as_int()).transpose()
                };
                let (low, high, max) = (bound(low)?, bound(high)?, bound(max)?);
                let v = self.slice_of(&val(frame, x), *of, low, high, max)?;
                frame.set(*dst, v);
            }
            Op::MakeInterface { dst, ty, x } => {
                let x = val(frame, x);
                let is_iface = program.types.get(*ty).is_some_and(|t| t.is_interface());
                let v = if is_iface { x } else { Value::interface(*ty, x) };
                frame.set(*dst, v);
            }
            Op::TypeAssert {
                dst,
                x,
                ty,
                comma_ok,
            } => {
                let x = val(frame, x);
                let v = if *comma_ok {
                    self.type_cache.assert_ok(&program.types, &x, *ty)?
                } else {
                    self.type_cache.assert(&program.types, &x, *ty)?
                };
                frame.set(*dst, v);
            }
            Op::MakeClosure {
                dst,
                func,
                bindings,
            } => {
                let env = vals(frame, bindings);
                frame.set(*dst, Value::Func(Rc::new(Closure { func: *func, env })));
            }
            Op::CallPlain { dst, func, args } => {
                let callee = program
                    .function(*func)
                    .ok_or_else(|| bad_continuation_for(*func))?;
                let mut callee_frame = StackFrame::new(*func, callee, vals(frame, args), &[]);
                let v = self.run_plain(program, callee, &mut callee_frame)?;
                set_opt(frame, *dst, v);
            }
            Op::Builtin { dst, builtin, args } => {
                let v = self.builtin(*builtin, &vals(frame, args))?;
                set_opt(frame, *dst, v);
            }
            Op::Recover { dst } => {
                let v = self.recover(program, frame);
                frame.set(*dst, v);
            }
            Op::Call {
                target,
                args,
                resume,
            } => {
                let callee = self.make_call(program, frame, target, args)?;
                frame.next = *resume;
                return Ok(Flow::Call(callee));
            }
            Op::TakeResult { dst } => {
                let v = frame.callee_results.take().unwrap_or_default();
                set_opt(frame, *dst, v);
            }
            Op::Go { target, args } => {
                let callee = self.make_call(program, frame, target, args)?;
                self.spawn(callee);
            }
            Op::Defer { target, args } => {
                let callee = self.make_call(program, frame, target, args)?;
                frame.defers.push(callee.with_role(FrameRole::Deferred));
            }
            Op::RunDefers => {
                if let Some(deferred) = frame.defers.pop() {
                    return Ok(Flow::Call(deferred));
                }
            }
            Op::Panic { value, resume } => {
                if let Some(resume) = resume {
                    frame.next = *resume;
                }
                return Err(Fault::User(val(frame, value)));
            }
            Op::MakeChan { dst, zero, size } => {
                let size = val(frame, size).as_int()?;
                let v = self.make_chan(size, zero.clone())?;
                frame.set(*dst, v);
            }
            Op::Send { chan, value } => {
                let Some(id) = val(frame, chan).as_chan()? else {
                    return Ok(Flow::Blocked);
                };
                let ch = &mut self.channels[id.0 as usize];
                if !ch.can_send() {
                    return Ok(Flow::Blocked);
                }
                ch.send(val(frame, value))?;
                self.note_activity();
            }
            Op::Recv {
                dst,
                chan,
                comma_ok,
            } => {
                let Some(id) = val(frame, chan).as_chan()? else {
                    return Ok(Flow::Blocked);
                };
                let Some((v, ok)) = self.channels[id.0 as usize].recv() else {
                    return Ok(Flow::Blocked);
                };
                self.note_activity();
                let v = if *comma_ok {
                    Value::tuple(vec![v, Value::Bool(ok)])
                } else {
                    v
                };
                set_opt(frame, *dst, v);
            }
            Op::Select {
                dst,
                cases,
                blocking,
                zeros,
            } => match self.select(frame, cases, *blocking, zeros)? {
                Some(v) => set_opt(frame, *dst, v),
                None => return Ok(Flow::Blocked),
            },
            Op::Jump(edge) => return Ok(Flow::Jump(take_edge(frame, edge))),
            Op::Branch {
                cond,
                then_edge,
                else_edge,
            } => {
                let edge = if val(frame, cond).as_bool()? {
                    then_edge
                } else {
                    else_edge
                };
                return Ok(Flow::Jump(take_edge(frame, edge)));
            }
            Op::Return { results } => return Ok(Flow::Return(pack_results(vals(frame, results)))),
        }
        Ok(Flow::Next)
    }

    /// `recover()`: only a deferred call made directly by a frame that is
    /// unwinding a live panic stops it.
    fn recover(&mut self, program: &Program, frame: &StackFrame) -> Value {
        if frame.role != FrameRole::Deferred {
            return Value::nil_interface();
        }
        let gid = self.current;
        let Some(g) = self.goroutine_mut(gid) else {
            return Value::nil_interface();
        };
        if g.state != GoroutineState::Panicking || !g.stack.last().is_some_and(|f| f.unwinding) {
            return Value::nil_interface();
        }
        let Some(panic) = g.panic.as_mut().filter(|p| !p.recovered) else {
            return Value::nil_interface();
        };
        panic.recovered = true;
        let value = match &panic.fault {
            Fault::User(v) => v.clone(),
            other => Value::interface(
                program.types.runtime_error_ty,
                Value::str(&other.panic_message()),
            ),
        };
        if self.config.trace_scheduler {
            eprintln!("[sched] goroutine {} recovered: {}", gid, value.panic_text());
        }
        value
    }

    /// Choose and perform a ready select case. `None` means block.
    fn select(
        &mut self,
        frame: &StackFrame,
        cases: &[SelectCase],
        blocking: bool,
        zeros: &[Value],
    ) -> Result<Option<Value>, Fault> {
        let mut ready = Vec::with_capacity(cases.len());
        for case in cases {
            let id = val(frame, &case.chan).as_chan()?;
            let is_ready = id.is_some_and(|id| {
                let ch = &self.channels[id.0 as usize];
                if case.send.is_some() {
                    ch.can_send()
                } else {
                    ch.can_recv()
                }
            });
            ready.push(is_ready);
        }
        let mut received = zeros.to_vec();
        let n = cases.len();
        let chosen = if n == 0 {
            None
        } else {
            let start = (self.rng.next() % n as u64) as usize;
            (0..n).map(|k| (start + k) % n).find(|&i| ready[i])
        };
        let Some(index) = chosen else {
            if blocking {
                return Ok(None);
            }
            let mut out = vec![Value::Int(-1), Value::Bool(false)];
            out.extend(received);
            return Ok(Some(Value::tuple(out)));
        };

        let case = &cases[index];
        let Some(id) = val(frame, &case.chan).as_chan()? else {
            return Ok(None);
        };
        let mut recv_ok = false;
        match &case.send {
            Some(v) => {
                let v = val(frame, v);
                self.channels[id.0 as usize].send(v)?;
            }
            None => {
                if let Some((v, ok)) = self.channels[id.0 as usize].recv() {
                    // Receive slots are numbered among receive cases only.
                    let slot = cases[..index].iter().filter(|c| c.send.is_none()).count();
                    if let Some(r) = received.get_mut(slot) {
                        *r = v;
                    }
                    recv_ok = ok;
                }
            }
        }
        self.note_activity();
        let mut out = vec![Value::Int(index as i64), Value::Bool(recv_ok)];
        out.extend(received);
        Ok(Some(Value::tuple(out)))
    }

    fn make_chan(&mut self, size: i64, zero: Value) -> Result<Value, Fault> {
        if size < 0 {
            return Err(Fault::MakeChanSize);
        }
        let id = super::channel::ChanId(self.channels.len() as u32);
        self.channels
            .push(super::channel::Channel::new(size as usize, zero));
        self.stats.channels_created += 1;
        Ok(Value::Chan(id))
    }
}

fn bad_continuation_for(func: FuncId) -> Fault {
    Fault::BadContinuation {
        func: func.to_string(),
        next: 0,
    }
}
