//! Lowers one SSA function to a resumable state machine (or a plain
//! function) over the runtime's op set.

use super::continuation::{self, Splitter};
use super::error::CompileError;
use super::regalloc::RegAlloc;
use super::types::stride;
use crate::config::TargetConfig;
use rustc_hash::FxHashMap;
use crate::ssa::{self, BinOp, Const, FuncId, InstrKind, Pos, TypeId};
use crate::vm::{
    ArithKind, Conversion, Edge, FrameKind, Function, Indexed, Kind, NumKind, NumRepr, Op,
    Operand, Reg, TypeDescriptor, TypeTable, Value, WideInt, normalize_int,
};

/// Program-wide state shared by every function compilation.
pub struct Context<'a> {
    pub program: &'a ssa::Program,
    pub types: &'a TypeTable,
    pub kinds: &'a [FrameKind],
    pub target: &'a TargetConfig,
    /// Next free interface invoke site
    pub invoke_sites: u32,
}

pub struct FunctionCompiler<'a, 'c> {
    pub(super) ctx: &'c mut Context<'a>,
    pub(super) func: &'a ssa::Function,
    pub(super) kind: FrameKind,
    pub(super) regs: RegAlloc,
    pub(super) out: Splitter,
    pub(super) pos: Option<Pos>,
    /// Static types of values that carry one
    types: FxHashMap<ssa::ValueId, TypeId>,
    block: usize,
}

fn value_types(func: &ssa::Function) -> FxHashMap<ssa::ValueId, TypeId> {
    let params = func.params.iter().chain(func.free_vars.iter()).map(|p| (p.value, p.ty));
    let instrs = func
        .blocks
        .iter()
        .flat_map(|b| b.instrs.iter())
        .filter_map(|i| Some((i.dest?, i.ty?)));
    params.chain(instrs).collect()
}

fn pack(mut values: Vec<Value>) -> Value {
    match values.len() {
        0 => Value::Nil,
        1 => values.pop().unwrap_or_default(),
        _ => Value::tuple(values),
    }
}

impl<'a, 'c> FunctionCompiler<'a, 'c> {
    pub fn compile(
        ctx: &'c mut Context<'a>,
        id: FuncId,
        func: &'a ssa::Function,
    ) -> Result<Function, CompileError> {
        let kind = ctx.kinds.get(id.index()).copied().unwrap_or(FrameKind::Suspendable);
        let mut c = FunctionCompiler {
            ctx,
            func,
            kind,
            regs: RegAlloc::new(func),
            out: Splitter::new(func.blocks.len()),
            pos: func.pos,
            types: value_types(func),
            block: 0,
        };
        for index in 0..func.blocks.len() {
            c.lower_block(index)?;
        }
        let zeros = func
            .results
            .iter()
            .map(|t| c.desc(*t).map(|d| d.zero.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let num_regs = c.regs.count();
        let synthetic = c.out.num_synthetic();
        let trace = c.ctx.target.trace_compile;
        let (blocks, num_real) = c.out.finish();
        let compiled = Function {
            name: func.name.clone(),
            kind,
            num_params: func.params.len(),
            num_free_vars: func.free_vars.len(),
            num_regs,
            blocks,
            num_real,
            recover_point: func.recover.map(|b| b as i32),
            zero_result: pack(zeros),
            pos: func.pos,
        };
        if trace {
            eprintln!(
                "[compile] {} ({:?}): {} blocks + {} synthetic, {} registers",
                compiled.name, kind, num_real, synthetic, num_regs
            );
        }
        continuation::validate(&compiled)?;
        Ok(compiled)
    }

    // ============================================================
    // Helpers
    // ============================================================

    pub(super) fn pos_text(&self) -> Option<String> {
        self.pos.map(|p| self.ctx.program.format_pos(p))
    }

    pub(super) fn invalid(&self, what: impl Into<String>) -> CompileError {
        CompileError::Invalid {
            func: self.func.name.clone(),
            what: what.into(),
            pos: self.pos_text(),
        }
    }

    pub(super) fn desc(&self, ty: TypeId) -> Result<&'a TypeDescriptor, CompileError> {
        let types: &'a TypeTable = self.ctx.types;
        types.get(ty).ok_or_else(|| CompileError::UnknownType {
            func: self.func.name.clone(),
            id: ty,
        })
    }

    pub(super) fn check_func(&self, id: FuncId) -> Result<FuncId, CompileError> {
        if id.index() < self.ctx.program.functions.len() {
            Ok(id)
        } else {
            Err(CompileError::UnknownFunction {
                func: self.func.name.clone(),
                id,
                pos: self.pos_text(),
            })
        }
    }

    pub(super) fn emit(&mut self, op: Op) {
        self.out.push(op, self.pos);
    }

    pub(super) fn suspend_in_plain(&self, what: &'static str) -> Result<(), CompileError> {
        if self.kind == FrameKind::Plain {
            return Err(CompileError::SuspendInPlain {
                func: self.func.name.clone(),
                what,
                pos: self.pos_text(),
            });
        }
        Ok(())
    }

    /// Register for the instruction's result, or a scratch register when
    /// the result is unused.
    pub(super) fn dst(&mut self, instr: &ssa::Instr) -> Reg {
        match instr.dest.and_then(|d| self.regs.get(d)) {
            Some(r) => r,
            None => self.regs.temp(),
        }
    }

    pub(super) fn opt_dst(&self, instr: &ssa::Instr) -> Option<Reg> {
        instr.dest.and_then(|d| self.regs.get(d))
    }

    fn is_wide(&self, d: &TypeDescriptor) -> bool {
        d.kind == Kind::Int && d.bits == 64 && !self.ctx.target.native_i64
    }

    pub(super) fn operand(&mut self, op: &ssa::Operand) -> Result<Operand, CompileError> {
        Ok(match op {
            ssa::Operand::Value(v) => match self.regs.get(*v) {
                Some(r) => Operand::Reg(r),
                None => {
                    return Err(CompileError::UnknownValue {
                        func: self.func.name.clone(),
                        value: *v,
                        pos: self.pos_text(),
                    })
                }
            },
            ssa::Operand::Const(c) => Operand::Imm(self.constant(c)?),
            ssa::Operand::Global(g) => {
                if g.index() >= self.ctx.program.globals.len() {
                    return Err(self.invalid(format!("unknown global g{}", g.0)));
                }
                let dst = self.regs.temp();
                self.emit(Op::GlobalAddr { dst, global: *g });
                Operand::Reg(dst)
            }
            ssa::Operand::Func(f) => Operand::Imm(Value::func(self.check_func(*f)?)),
        })
    }

    pub(super) fn static_type(&self, op: &ssa::Operand) -> Option<TypeId> {
        match op {
            ssa::Operand::Value(v) => self.types.get(v).copied(),
            ssa::Operand::Const(Const::Int { ty, .. }) | ssa::Operand::Const(Const::Float { ty, .. }) => {
                Some(*ty)
            }
            ssa::Operand::Const(Const::Nil(ty)) if *ty != TypeId::NIL => Some(*ty),
            _ => None,
        }
    }

    pub(super) fn operands(&mut self, ops: &[ssa::Operand]) -> Result<Vec<Operand>, CompileError> {
        ops.iter().map(|o| self.operand(o)).collect()
    }

    fn constant(&self, c: &Const) -> Result<Value, CompileError> {
        Ok(match c {
            Const::Bool(b) => Value::Bool(*b),
            Const::Int { value, ty } => {
                let d = self.desc(*ty)?;
                match d.kind {
                    Kind::Float => Value::Float(*value as f64),
                    Kind::Int if self.is_wide(d) => Value::Wide(WideInt::from_i64(*value)),
                    Kind::Int => Value::Int(normalize_int(
                        *value,
                        NumKind {
                            bits: d.bits,
                            signed: d.signed,
                        },
                    )),
                    _ => Value::Int(*value),
                }
            }
            Const::Float { value, ty } => {
                let d = self.desc(*ty)?;
                if d.bits == 32 {
                    Value::Float(*value as f32 as f64)
                } else {
                    Value::Float(*value)
                }
            }
            Const::Str(s) => Value::str(s),
            Const::Nil(ty) if *ty == TypeId::NIL => Value::Nil,
            Const::Nil(ty) => self.desc(*ty)?.zero.clone(),
        })
    }

    fn arith_kind(&self, ty: TypeId) -> Result<ArithKind, CompileError> {
        let d = self.desc(ty)?;
        Ok(match d.kind {
            Kind::Int if self.is_wide(d) => ArithKind::Wide { signed: d.signed },
            Kind::Int => ArithKind::Int(NumKind {
                bits: d.bits,
                signed: d.signed,
            }),
            Kind::Float => ArithKind::Float { bits: d.bits },
            Kind::String => ArithKind::Str,
            Kind::Bool => ArithKind::Bool,
            _ => ArithKind::Any,
        })
    }

    fn num_repr(&self, d: &TypeDescriptor) -> Option<NumRepr> {
        match d.kind {
            Kind::Int if self.is_wide(d) => Some(NumRepr::Wide { signed: d.signed }),
            Kind::Int => Some(NumRepr::Int(NumKind {
                bits: d.bits,
                signed: d.signed,
            })),
            Kind::Float => Some(NumRepr::Float { bits: d.bits }),
            _ => None,
        }
    }

    fn elem_bits(&self, d: &TypeDescriptor) -> Result<u8, CompileError> {
        match d.elem {
            Some(e) => Ok(self.desc(e)?.bits),
            None => Ok(0),
        }
    }

    fn conversion(&self, from: TypeId, to: TypeId) -> Result<Conversion, CompileError> {
        if from == to {
            return Ok(Conversion::Identity);
        }
        let (f, t) = (self.desc(from)?, self.desc(to)?);
        if let (Some(a), Some(b)) = (self.num_repr(f), self.num_repr(t)) {
            return Ok(if a == b {
                Conversion::Identity
            } else {
                Conversion::Numeric { from: a, to: b }
            });
        }
        Ok(match (f.kind, t.kind) {
            (Kind::Int, Kind::String) => match self.num_repr(f) {
                Some(from) => Conversion::RuneToString { from },
                None => Conversion::Identity,
            },
            (Kind::String, Kind::Slice) => match self.elem_bits(t)? {
                32 => Conversion::StringToRunes,
                _ => Conversion::StringToBytes,
            },
            (Kind::Slice, Kind::String) => match self.elem_bits(f)? {
                32 => Conversion::RunesToString,
                _ => Conversion::BytesToString,
            },
            _ => Conversion::Identity,
        })
    }

    /// What an index or slice expression over a value of type `ty` reads.
    pub(super) fn indexed(&self, ty: TypeId) -> Result<Indexed, CompileError> {
        let d = self.desc(ty)?;
        match d.kind {
            Kind::Slice => Ok(Indexed::Slice),
            Kind::String => Ok(Indexed::String),
            Kind::Array => {
                let elem = d.elem.ok_or_else(|| self.invalid("array without element type"))?;
                Ok(Indexed::Array {
                    len: d.len,
                    elem_size: stride(self.desc(elem)?),
                })
            }
            Kind::Pointer => match d.elem {
                Some(elem) if self.desc(elem)?.kind == Kind::Array => self.indexed(elem),
                _ => Err(self.invalid(format!("cannot index {}", d.name))),
            },
            _ => Err(self.invalid(format!("cannot index {}", d.name))),
        }
    }

    fn field_offset(&self, ty: TypeId, field: usize) -> Result<u32, CompileError> {
        let mut d = self.desc(ty)?;
        if d.kind == Kind::Pointer {
            if let Some(elem) = d.elem {
                d = self.desc(elem)?;
            }
        }
        d.fields
            .get(field)
            .map(|f| f.offset)
            .ok_or_else(|| self.invalid(format!("{} has no field {}", d.name, field)))
    }

    /// The edge `from -> to` with the phi moves of `to` for that edge.
    fn edge(&mut self, from: usize, to: usize) -> Result<Edge, CompileError> {
        let func = self.func;
        let target = func
            .blocks
            .get(to)
            .ok_or_else(|| CompileError::BadContinuation {
                func: func.name.clone(),
                detail: format!("block {} jumps to missing block {}", from, to),
            })?;
        let pred = target.preds.iter().position(|&p| p == from);
        let mut moves = Vec::new();
        for instr in &target.instrs {
            let InstrKind::Phi { edges } = &instr.op else {
                continue;
            };
            let malformed = |detail: String| CompileError::MalformedPhi {
                func: func.name.clone(),
                block: to,
                detail,
            };
            let index = pred.ok_or_else(|| malformed(format!("block {} is not a predecessor", from)))?;
            let dst = self
                .opt_dst(instr)
                .ok_or_else(|| malformed("phi without a destination".to_string()))?;
            let source = edges
                .get(index)
                .ok_or_else(|| malformed(format!("no edge for predecessor {}", from)))?;
            moves.push((dst, self.operand(source)?));
        }
        Ok(Edge {
            target: to as i32,
            moves,
        })
    }

    fn successor(&self, n: usize) -> Result<usize, CompileError> {
        self.func.blocks[self.block]
            .succs
            .get(n)
            .copied()
            .ok_or_else(|| CompileError::BadContinuation {
                func: self.func.name.clone(),
                detail: format!("block {} lacks successor {}", self.block, n),
            })
    }

    // ============================================================
    // Lowering
    // ============================================================

    fn lower_block(&mut self, index: usize) -> Result<(), CompileError> {
        self.block = index;
        self.out.begin(index);
        let func = self.func;
        let block = &func.blocks[index];
        for instr in &block.instrs {
            self.pos = instr.pos.or(self.pos);
            self.lower_instr(instr)?;
        }
        Ok(())
    }

    fn lower_instr(&mut self, instr: &'a ssa::Instr) -> Result<(), CompileError> {
        match &instr.op {
            InstrKind::BinOp {
                op,
                x,
                y,
                ty,
                count_ty,
            } => {
                let kind = self.arith_kind(*ty)?;
                let count_signed = match op {
                    BinOp::Shl | BinOp::Shr => self.desc(count_ty.unwrap_or(*ty))?.signed,
                    _ => false,
                };
                let (x, y) = (self.operand(x)?, self.operand(y)?);
                let dst = self.dst(instr);
                self.emit(Op::Binary {
                    dst,
                    op: *op,
                    kind,
                    x,
                    y,
                    count_signed,
                });
            }
            InstrKind::UnOp { op, x, ty } => {
                let kind = self.arith_kind(*ty)?;
                let x = self.operand(x)?;
                let dst = self.dst(instr);
                self.emit(Op::Unary {
                    dst,
                    op: *op,
                    kind,
                    x,
                });
            }
            InstrKind::Convert { x, from, to } => {
                let conv = self.conversion(*from, *to)?;
                let x = self.operand(x)?;
                let dst = self.dst(instr);
                self.emit(Op::Convert { dst, conv, x });
            }
            InstrKind::Alloc { ty } => {
                let size = self.desc(*ty)?.size.max(1);
                let dst = self.dst(instr);
                self.emit(Op::Alloc { dst, size });
            }
            InstrKind::FieldAddr { x, field, ty } => {
                let offset = self.field_offset(*ty, *field)?;
                let x = self.operand(x)?;
                let dst = self.dst(instr);
                self.emit(Op::FieldAddr { dst, x, offset });
            }
            InstrKind::IndexAddr { x, index, ty } => {
                let of = self.indexed(*ty)?;
                if of == Indexed::String {
                    return Err(self.invalid("cannot take the address of a string byte"));
                }
                let (x, index) = (self.operand(x)?, self.operand(index)?);
                let dst = self.dst(instr);
                self.emit(Op::IndexAddr { dst, x, index, of });
            }
            InstrKind::Load { addr, ty } => {
                let access = self.desc(*ty)?.access.clone();
                let addr = self.operand(addr)?;
                let dst = self.dst(instr);
                self.emit(Op::Load { dst, addr, access });
            }
            InstrKind::Store { addr, value, ty } => {
                let access = self.desc(*ty)?.access.clone();
                let (addr, value) = (self.operand(addr)?, self.operand(value)?);
                self.emit(Op::Store {
                    addr,
                    value,
                    access,
                });
            }
            InstrKind::Field { x, field, .. } => {
                let tuple = self.operand(x)?;
                let dst = self.dst(instr);
                self.emit(Op::Extract {
                    dst,
                    tuple,
                    index: *field,
                });
            }
            InstrKind::Index { x, index, ty } => {
                let of = self.indexed(*ty)?;
                let (x, index) = (self.operand(x)?, self.operand(index)?);
                let dst = self.dst(instr);
                self.emit(Op::Index { dst, x, index, of });
            }
            InstrKind::Extract { tuple, index } => {
                let tuple = self.operand(tuple)?;
                let dst = self.dst(instr);
                self.emit(Op::Extract {
                    dst,
                    tuple,
                    index: *index,
                });
            }
            InstrKind::MakeSlice { elem, len, cap } => {
                let elem_size = stride(self.desc(*elem)?);
                let (len, cap) = (self.operand(len)?, self.operand(cap)?);
                let dst = self.dst(instr);
                self.emit(Op::MakeSlice {
                    dst,
                    elem_size,
                    len,
                    cap,
                });
            }
            InstrKind::Slice {
                x,
                low,
                high,
                max,
                ty,
            } => {
                let of = self.indexed(*ty)?;
                let x = self.operand(x)?;
                let mut bound = |b: &Option<ssa::Operand>| b.as_ref().map(|o| self.operand(o)).transpose();
                let (low, high, max) = (bound(low)?, bound(high)?, bound(max)?);
                let dst = self.dst(instr);
                self.emit(Op::SliceOf {
                    dst,
                    x,
                    of,
                    low,
                    high,
                    max,
                });
            }
            InstrKind::MakeChan { elem, size } => {
                let zero = self.desc(*elem)?.zero.clone();
                let size = self.operand(size)?;
                let dst = self.dst(instr);
                self.emit(Op::MakeChan { dst, zero, size });
            }
            InstrKind::MakeInterface { x, ty } => {
                self.desc(*ty)?;
                let x = self.operand(x)?;
                let dst = self.dst(instr);
                self.emit(Op::MakeInterface { dst, ty: *ty, x });
            }
            InstrKind::TypeAssert { x, ty, comma_ok } => {
                self.desc(*ty)?;
                let x = self.operand(x)?;
                let dst = self.dst(instr);
                self.emit(Op::TypeAssert {
                    dst,
                    x,
                    ty: *ty,
                    comma_ok: *comma_ok,
                });
            }
            InstrKind::MakeClosure { func, bindings } => {
                let func = self.check_func(*func)?;
                let bindings = self.operands(bindings)?;
                let dst = self.dst(instr);
                self.emit(Op::MakeClosure {
                    dst,
                    func,
                    bindings,
                });
            }
            InstrKind::Call { call } => self.lower_call(instr, call)?,
            InstrKind::Go { call } => self.lower_go(call)?,
            InstrKind::Defer { call } => self.lower_defer(call)?,
            InstrKind::RunDefers => {
                self.suspend_in_plain("running deferred calls")?;
                self.out.retry_point(self.pos);
                self.emit(Op::RunDefers);
            }
            InstrKind::Send { chan, x } => self.lower_send(chan, x)?,
            InstrKind::Recv { chan, comma_ok } => self.lower_recv(instr, chan, *comma_ok)?,
            InstrKind::Select { states, blocking } => self.lower_select(instr, states, *blocking)?,
            InstrKind::Phi { edges } => {
                let preds = self.func.blocks[self.block].preds.len();
                if edges.len() != preds {
                    return Err(CompileError::MalformedPhi {
                        func: self.func.name.clone(),
                        block: self.block,
                        detail: format!("{} edges for {} predecessors", edges.len(), preds),
                    });
                }
            }
            InstrKind::Jump => {
                let to = self.successor(0)?;
                let edge = self.edge(self.block, to)?;
                self.emit(Op::Jump(edge));
            }
            InstrKind::If { cond } => {
                let cond = self.operand(cond)?;
                let (then_to, else_to) = (self.successor(0)?, self.successor(1)?);
                let then_edge = self.edge(self.block, then_to)?;
                let else_edge = self.edge(self.block, else_to)?;
                self.emit(Op::Branch {
                    cond,
                    then_edge,
                    else_edge,
                });
            }
            InstrKind::Return { results } => {
                let results = self.operands(results)?;
                self.emit(Op::Return { results });
            }
            InstrKind::Panic { x } => {
                let value = self.operand(x)?;
                if self.kind == FrameKind::Plain {
                    self.emit(Op::Panic {
                        value,
                        resume: None,
                    });
                    return Ok(());
                }
                let k = self.out.fresh();
                self.emit(Op::Panic {
                    value,
                    resume: Some(k),
                });
                self.out.resume_at(k);
                let results = self
                    .func
                    .results
                    .iter()
                    .map(|t| self.desc(*t).map(|d| Operand::Imm(d.zero.clone())))
                    .collect::<Result<Vec<_>, _>>()?;
                self.emit(Op::Return { results });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_program;
    use crate::ssa::{BinOp, ProgramBuilder};

    fn block_ids(func: &Function) -> Vec<i32> {
        func.blocks.iter().map(|b| b.id).collect()
    }

    fn compile(b: ProgramBuilder) -> crate::vm::Program {
        compile_program(&b.finish(), &TargetConfig::default()).unwrap()
    }

    #[test]
    fn test_plain_function_has_no_synthetic_blocks() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let f = b.declare("add", &[int, int], &[int]);
        {
            let mut fb = b.function(f);
            let (x, y) = (fb.param(0), fb.param(1));
            let s = fb.binop(BinOp::Add, x, y, int);
            fb.ret(vec![s]);
        }
        let p = compile(b);
        let add = &p.functions[0];
        assert_eq!(add.kind, FrameKind::Plain);
        assert_eq!(block_ids(add), vec![0]);
        assert_eq!(add.num_regs, 3);
    }

    #[test]
    fn test_shift_count_signedness_comes_from_its_type() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let uint = b.int_of(64, false);
        let f = b.declare("shifts", &[int, uint], &[int]);
        {
            let mut fb = b.function(f);
            let (x, n) = (fb.param(0), fb.param(1));
            let a = fb.shift(BinOp::Shl, x.clone(), n, int, uint);
            let b2 = fb.binop(BinOp::Shr, a, x, int);
            fb.ret(vec![b2]);
        }
        let p = compile(b);
        let signedness: Vec<bool> = p.functions[0].blocks[0]
            .code
            .iter()
            .filter_map(|op| match op {
                Op::Binary { count_signed, .. } => Some(*count_signed),
                _ => None,
            })
            .collect();
        assert_eq!(signedness, vec![false, true]);
    }

    #[test]
    fn test_call_splits_into_resume_block() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let worker = b.declare("worker", &[], &[int]);
        let main = b.declare("main", &[], &[]);
        {
            let mut fb = b.function(worker);
            let zero = fb.int(0);
            let ch = fb.make_chan(int, zero);
            fb.close(ch);
            let one = fb.int(1);
            fb.ret(vec![one]);
        }
        {
            let mut fb = b.function(main);
            let v = fb.call(worker, vec![]);
            fb.println(vec![v]);
            fb.ret(vec![]);
        }
        let p = compile(b);
        let m = &p.functions[1];
        assert_eq!(m.kind, FrameKind::Suspendable);
        assert_eq!(block_ids(m), vec![0, -1]);
        assert!(matches!(m.blocks[0].code.last(), Some(Op::Call { resume: -1, .. })));
        assert!(matches!(m.blocks[1].code.first(), Some(Op::TakeResult { dst: Some(_) })));
    }

    #[test]
    fn test_phi_becomes_edge_moves() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let boolean = b.bool_type();
        let f = b.declare("pick", &[boolean], &[int]);
        {
            let mut fb = b.function(f);
            let left = fb.new_block();
            let join = fb.new_block();
            let cond = fb.param(0);
            fb.branch(cond, left, join);
            fb.switch_to(left);
            fb.jump(join);
            fb.switch_to(join);
            let one = fb.int(1);
            let two = fb.int(2);
            let v = fb.phi(vec![(0, one), (left, two)]);
            fb.ret(vec![v]);
        }
        let p = compile(b);
        let pick = &p.functions[0];
        match &pick.blocks[0].code[0] {
            Op::Branch {
                then_edge,
                else_edge,
                ..
            } => {
                assert_eq!(then_edge.target, 1);
                assert!(then_edge.moves.is_empty());
                assert_eq!(else_edge.target, 2);
                assert_eq!(else_edge.moves.len(), 1);
            }
            other => panic!("expected branch, got {:?}", other),
        }
        assert!(matches!(&pick.blocks[1].code[0], Op::Jump(e) if e.moves.len() == 1));
    }

    #[test]
    fn test_send_mid_block_starts_retry_block() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let main = b.declare("main", &[], &[]);
        {
            let mut fb = b.function(main);
            let one = fb.int(1);
            let ch = fb.make_chan(int, one.clone());
            fb.send(ch, one);
            fb.ret(vec![]);
        }
        let p = compile(b);
        let m = &p.functions[0];
        assert_eq!(block_ids(m), vec![0, -1]);
        assert!(matches!(m.blocks[1].code[0], Op::Send { .. }));
    }

    #[test]
    fn test_panic_resume_block_returns_zero() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let f = b.declare("boom", &[], &[int]);
        {
            let mut fb = b.function(f);
            fb.force_concurrency();
            let msg = fb.string("boom");
            fb.panic(msg);
        }
        let p = compile(b);
        let boom = &p.functions[0];
        assert!(matches!(boom.blocks[0].code[0], Op::Panic { resume: Some(-1), .. }));
        match &boom.blocks[1].code[0] {
            Op::Return { results } => {
                assert!(matches!(results.as_slice(), [Operand::Imm(Value::Int(0))]))
            }
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_phi_is_rejected() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let f = b.declare("f", &[], &[int]);
        {
            let mut fb = b.function(f);
            let one = fb.int(1);
            fb.ret(vec![one]);
        }
        let mut program = b.finish();
        // The entry block has no predecessors, so a two-edge phi cannot fit.
        program.functions[0].blocks[0].instrs.insert(
            0,
            ssa::Instr {
                dest: Some(50),
                ty: None,
                op: InstrKind::Phi {
                    edges: vec![
                        ssa::Operand::Const(Const::Bool(true)),
                        ssa::Operand::Const(Const::Bool(false)),
                    ],
                },
                pos: None,
            },
        );
        let err = compile_program(&program, &TargetConfig::default()).unwrap_err();
        assert!(matches!(err, CompileError::MalformedPhi { block: 0, .. }));
    }

    #[test]
    fn test_unknown_value_is_rejected() {
        let mut b = ProgramBuilder::new();
        let f = b.declare("f", &[], &[]);
        {
            let mut fb = b.function(f);
            fb.println(vec![ssa::Operand::Value(99)]);
            fb.ret(vec![]);
        }
        let err = compile_program(&b.finish(), &TargetConfig::default()).unwrap_err();
        assert!(matches!(err, CompileError::UnknownValue { value: 99, .. }));
    }

    #[test]
    fn test_wide_constants_when_not_native() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let f = b.declare("f", &[], &[int]);
        {
            let mut fb = b.function(f);
            let big = fb.int(1 << 40);
            fb.ret(vec![big]);
        }
        let target = TargetConfig {
            native_i64: false,
            ..TargetConfig::default()
        };
        let p = compile_program(&b.finish(), &target).unwrap();
        match &p.functions[0].blocks[0].code[0] {
            Op::Return { results } => {
                assert!(matches!(results.as_slice(), [Operand::Imm(Value::Wide(w))] if w.to_i64() == 1 << 40))
            }
            other => panic!("expected return, got {:?}", other),
        }
    }
}
