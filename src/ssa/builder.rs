//! Programmatic construction of SSA programs.
//!
//! Tests, the bench harness and embedding hosts use this instead of writing
//! JSON by hand. Predecessor lists are derived from successor lists when the
//! program is finished, and phi edges given as `(pred, operand)` pairs are
//! reordered to match.

use std::collections::HashMap;

use super::{
    BinOp, Block, Builtin, CallCommon, Callee, ChanDir, Const, FieldDecl, FuncId, Function,
    Global, GlobalId, Instr, InstrKind, MethodDecl, MethodSig, Operand, Param, Pos, Program,
    SelectState, TypeDecl, TypeId, TypeKind, UnOp, ValueId,
};

/// Phi edges recorded by block, resolved against preds in [`ProgramBuilder::finish`].
struct PendingPhi {
    func: usize,
    block: usize,
    instr: usize,
    edges: Vec<(usize, Operand)>,
}

/// Builds a [`Program`] incrementally.
pub struct ProgramBuilder {
    program: Program,
    /// Deduplication of structurally identical unnamed types
    interned: HashMap<String, TypeId>,
    /// Next free value id per function
    next_value: Vec<ValueId>,
    pending_phis: Vec<PendingPhi>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        let mut program = Program::default();
        program.types.push(TypeDecl {
            name: "nil".to_string(),
            ty: TypeKind::Nil,
            methods: Vec::new(),
        });
        Self {
            program,
            interned: HashMap::new(),
            next_value: Vec::new(),
            pending_phis: Vec::new(),
        }
    }

    pub fn file(&mut self, name: &str) -> u16 {
        self.program.files.push(name.to_string());
        (self.program.files.len() - 1) as u16
    }

    /// Add a named type. Named types are never deduplicated.
    pub fn named(&mut self, name: &str, ty: TypeKind) -> TypeId {
        self.program.types.push(TypeDecl {
            name: name.to_string(),
            ty,
            methods: Vec::new(),
        });
        TypeId((self.program.types.len() - 1) as u32)
    }

    fn intern(&mut self, name: String, ty: TypeKind) -> TypeId {
        let key = format!("{}|{:?}", name, ty);
        if let Some(&id) = self.interned.get(&key) {
            return id;
        }
        let id = self.named(&name, ty);
        self.interned.insert(key, id);
        id
    }

    pub fn bool_type(&mut self) -> TypeId {
        self.intern("bool".to_string(), TypeKind::Bool)
    }

    /// Go's `int`: 64-bit signed.
    pub fn int_type(&mut self) -> TypeId {
        self.int_of(64, true)
    }

    pub fn int_of(&mut self, bits: u8, signed: bool) -> TypeId {
        let name = format!("{}int{}", if signed { "" } else { "u" }, bits);
        self.intern(name, TypeKind::Int { bits, signed })
    }

    pub fn float_type(&mut self) -> TypeId {
        self.intern("float64".to_string(), TypeKind::Float { bits: 64 })
    }

    pub fn string_type(&mut self) -> TypeId {
        self.intern("string".to_string(), TypeKind::String)
    }

    pub fn pointer(&mut self, elem: TypeId) -> TypeId {
        let name = format!("*{}", self.program.types[elem.index()].name);
        self.intern(name, TypeKind::Pointer { elem })
    }

    pub fn slice(&mut self, elem: TypeId) -> TypeId {
        let name = format!("[]{}", self.program.types[elem.index()].name);
        self.intern(name, TypeKind::Slice { elem })
    }

    pub fn array(&mut self, elem: TypeId, len: u64) -> TypeId {
        let name = format!("[{}]{}", len, self.program.types[elem.index()].name);
        self.intern(name, TypeKind::Array { elem, len })
    }

    pub fn chan(&mut self, elem: TypeId) -> TypeId {
        let name = format!("chan {}", self.program.types[elem.index()].name);
        self.intern(name, TypeKind::Chan { elem })
    }

    pub fn func_type(&mut self, params: &[TypeId], results: &[TypeId]) -> TypeId {
        let names = |ids: &[TypeId], types: &[TypeDecl]| {
            ids.iter()
                .map(|t| types[t.index()].name.clone())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let name = format!(
            "func({}) ({})",
            names(params, &self.program.types),
            names(results, &self.program.types)
        );
        self.intern(
            name,
            TypeKind::Func {
                params: params.to_vec(),
                results: results.to_vec(),
            },
        )
    }

    pub fn tuple(&mut self, elems: &[TypeId]) -> TypeId {
        self.intern(
            "tuple".to_string(),
            TypeKind::Tuple {
                elems: elems.to_vec(),
            },
        )
    }

    pub fn structure(&mut self, name: &str, fields: &[(&str, TypeId)]) -> TypeId {
        let fields = fields
            .iter()
            .map(|(n, ty)| FieldDecl {
                name: n.to_string(),
                ty: *ty,
            })
            .collect();
        self.named(name, TypeKind::Struct { fields })
    }

    pub fn interface(&mut self, name: &str, methods: &[(&str, TypeId)]) -> TypeId {
        let methods = methods
            .iter()
            .map(|(n, sig)| MethodSig {
                name: n.to_string(),
                sig: *sig,
            })
            .collect();
        self.named(name, TypeKind::Interface { methods })
    }

    /// The empty interface.
    pub fn any_type(&mut self) -> TypeId {
        self.intern("any".to_string(), TypeKind::Interface { methods: Vec::new() })
    }

    pub fn add_method(&mut self, ty: TypeId, name: &str, sig: TypeId, func: FuncId) {
        self.program.types[ty.index()].methods.push(MethodDecl {
            name: name.to_string(),
            sig,
            func,
        });
    }

    pub fn global(&mut self, name: &str, ty: TypeId) -> GlobalId {
        self.program.globals.push(Global {
            name: name.to_string(),
            ty,
        });
        GlobalId((self.program.globals.len() - 1) as u32)
    }

    /// Declare a function. Parameters receive value ids `0..params.len()`.
    pub fn declare(&mut self, name: &str, params: &[TypeId], results: &[TypeId]) -> FuncId {
        let params = params
            .iter()
            .enumerate()
            .map(|(i, ty)| Param {
                value: i as ValueId,
                ty: *ty,
            })
            .collect::<Vec<_>>();
        self.next_value.push(params.len() as ValueId);
        self.program.functions.push(Function {
            name: name.to_string(),
            params,
            free_vars: Vec::new(),
            results: results.to_vec(),
            blocks: Vec::new(),
            recover: None,
            uses_concurrency: false,
            pos: None,
        });
        FuncId((self.program.functions.len() - 1) as u32)
    }

    /// Start (or continue) building the body of a declared function.
    pub fn function(&mut self, id: FuncId) -> FunctionBuilder<'_> {
        let func = id.index();
        if self.program.functions[func].blocks.is_empty() {
            self.program.functions[func].blocks.push(Block::default());
        }
        FunctionBuilder {
            builder: self,
            func,
            current: 0,
            pos: None,
        }
    }

    pub fn set_init(&mut self, id: FuncId) {
        self.program.init = Some(id);
    }

    pub fn set_main(&mut self, id: FuncId) {
        self.program.main = Some(id);
    }

    /// Link blocks and return the program.
    pub fn finish(mut self) -> Program {
        for func in &mut self.program.functions {
            for block in &mut func.blocks {
                block.preds.clear();
            }
            let edges: Vec<(usize, usize)> = func
                .blocks
                .iter()
                .enumerate()
                .flat_map(|(b, block)| block.succs.iter().map(move |&s| (b, s)))
                .collect();
            for (from, to) in edges {
                if let Some(block) = func.blocks.get_mut(to) {
                    block.preds.push(from);
                }
            }
        }
        for phi in self.pending_phis.drain(..) {
            let block = &mut self.program.functions[phi.func].blocks[phi.block];
            let ordered = block
                .preds
                .iter()
                .map(|pred| {
                    phi.edges
                        .iter()
                        .find(|(p, _)| p == pred)
                        .map(|(_, op)| op.clone())
                        .unwrap_or(Operand::Const(Const::Nil(TypeId::NIL)))
                })
                .collect();
            block.instrs[phi.instr].op = InstrKind::Phi { edges: ordered };
        }
        self.program
    }
}

/// Builds one function body. Instructions append to the current block.
pub struct FunctionBuilder<'a> {
    builder: &'a mut ProgramBuilder,
    func: usize,
    current: usize,
    pos: Option<Pos>,
}

impl FunctionBuilder<'_> {
    pub fn id(&self) -> FuncId {
        FuncId(self.func as u32)
    }

    fn function_mut(&mut self) -> &mut Function {
        &mut self.builder.program.functions[self.func]
    }

    pub fn param(&self, index: usize) -> Operand {
        Operand::Value(self.builder.program.functions[self.func].params[index].value)
    }

    pub fn free_var(&mut self, ty: TypeId) -> Operand {
        let value = self.fresh_value();
        self.function_mut().free_vars.push(Param { value, ty });
        Operand::Value(value)
    }

    pub fn force_concurrency(&mut self) {
        self.function_mut().uses_concurrency = true;
    }

    /// Set the position attached to subsequently emitted instructions.
    pub fn at(&mut self, line: u32, column: u32) -> &mut Self {
        self.pos = Some(Pos {
            file: 0,
            line,
            column,
        });
        self
    }

    pub fn new_block(&mut self) -> usize {
        let func = self.function_mut();
        func.blocks.push(Block::default());
        func.blocks.len() - 1
    }

    pub fn switch_to(&mut self, block: usize) {
        self.current = block;
    }

    pub fn current_block(&self) -> usize {
        self.current
    }

    pub fn set_recover(&mut self, block: usize) {
        self.function_mut().recover = Some(block);
    }

    fn fresh_value(&mut self) -> ValueId {
        let next = &mut self.builder.next_value[self.func];
        let id = *next;
        *next += 1;
        id
    }

    fn push(&mut self, dest: Option<ValueId>, ty: Option<TypeId>, op: InstrKind) -> usize {
        let pos = self.pos;
        let current = self.current;
        let block = &mut self.function_mut().blocks[current];
        block.instrs.push(Instr { dest, ty, op, pos });
        block.instrs.len() - 1
    }

    /// Emit an instruction that produces a value.
    pub fn value(&mut self, op: InstrKind) -> Operand {
        let dest = self.fresh_value();
        let ty = self.result_type(&op);
        self.push(Some(dest), ty, op);
        Operand::Value(dest)
    }

    /// Emit an instruction without a result.
    pub fn effect(&mut self, op: InstrKind) {
        self.push(None, None, op);
    }

    /// Static type of an operand, as far as this function records it.
    pub fn type_of(&self, operand: &Operand) -> Option<TypeId> {
        match operand {
            Operand::Const(Const::Int { ty, .. }) | Operand::Const(Const::Float { ty, .. }) => Some(*ty),
            Operand::Const(Const::Nil(ty)) if *ty != TypeId::NIL => Some(*ty),
            Operand::Value(v) => {
                let f = &self.builder.program.functions[self.func];
                f.params
                    .iter()
                    .chain(f.free_vars.iter())
                    .find(|p| p.value == *v)
                    .map(|p| p.ty)
                    .or_else(|| {
                        f.blocks
                            .iter()
                            .flat_map(|b| b.instrs.iter())
                            .find(|i| i.dest == Some(*v))
                            .and_then(|i| i.ty)
                    })
            }
            _ => None,
        }
    }

    fn result_type(&mut self, op: &InstrKind) -> Option<TypeId> {
        match op {
            InstrKind::BinOp { op, .. } if op.is_comparison() => Some(self.builder.bool_type()),
            InstrKind::BinOp { ty, .. } | InstrKind::UnOp { ty, .. } | InstrKind::Load { ty, .. } => {
                Some(*ty)
            }
            InstrKind::Convert { to, .. } => Some(*to),
            InstrKind::TypeAssert {
                ty, comma_ok: false, ..
            } => Some(*ty),
            InstrKind::Alloc { ty } => Some(self.builder.pointer(*ty)),
            InstrKind::MakeSlice { elem, .. } => Some(self.builder.slice(*elem)),
            InstrKind::MakeChan { elem, .. } => Some(self.builder.chan(*elem)),
            InstrKind::Recv {
                chan,
                comma_ok: false,
            } => {
                let chan = self.type_of(chan)?;
                match self.builder.program.types[chan.index()].ty {
                    TypeKind::Chan { elem } => Some(elem),
                    _ => None,
                }
            }
            InstrKind::Call {
                call:
                    CallCommon {
                        callee: Callee::Static(f),
                        ..
                    },
            } => match self.builder.program.functions[f.index()].results.as_slice() {
                [one] => Some(*one),
                _ => None,
            },
            _ => None,
        }
    }

    // ---------------------------------------------------------------------
    // Constants
    // ---------------------------------------------------------------------

    pub fn int(&mut self, value: i64) -> Operand {
        let ty = self.builder.int_type();
        Operand::Const(Const::Int { value, ty })
    }

    pub fn int_typed(&self, value: i64, ty: TypeId) -> Operand {
        Operand::Const(Const::Int { value, ty })
    }

    pub fn float(&mut self, value: f64) -> Operand {
        let ty = self.builder.float_type();
        Operand::Const(Const::Float { value, ty })
    }

    pub fn string(&self, value: &str) -> Operand {
        Operand::Const(Const::Str(value.to_string()))
    }

    pub fn boolean(&self, value: bool) -> Operand {
        Operand::Const(Const::Bool(value))
    }

    pub fn nil(&self, ty: TypeId) -> Operand {
        Operand::Const(Const::Nil(ty))
    }

    // ---------------------------------------------------------------------
    // Arithmetic and data
    // ---------------------------------------------------------------------

    pub fn binop(&mut self, op: BinOp, x: Operand, y: Operand, ty: TypeId) -> Operand {
        self.value(InstrKind::BinOp {
            op,
            x,
            y,
            ty,
            count_ty: None,
        })
    }

    /// `x << y` or `x >> y` where the count `y` has type `count_ty`.
    pub fn shift(&mut self, op: BinOp, x: Operand, y: Operand, ty: TypeId, count_ty: TypeId) -> Operand {
        self.value(InstrKind::BinOp {
            op,
            x,
            y,
            ty,
            count_ty: Some(count_ty),
        })
    }

    pub fn unop(&mut self, op: UnOp, x: Operand, ty: TypeId) -> Operand {
        self.value(InstrKind::UnOp { op, x, ty })
    }

    pub fn convert(&mut self, x: Operand, from: TypeId, to: TypeId) -> Operand {
        self.value(InstrKind::Convert { x, from, to })
    }

    pub fn alloc(&mut self, ty: TypeId) -> Operand {
        self.value(InstrKind::Alloc { ty })
    }

    pub fn field_addr(&mut self, x: Operand, struct_ty: TypeId, field: usize) -> Operand {
        self.value(InstrKind::FieldAddr {
            x,
            field,
            ty: struct_ty,
        })
    }

    pub fn index_addr(&mut self, x: Operand, container_ty: TypeId, index: Operand) -> Operand {
        self.value(InstrKind::IndexAddr {
            x,
            index,
            ty: container_ty,
        })
    }

    pub fn load(&mut self, addr: Operand, ty: TypeId) -> Operand {
        self.value(InstrKind::Load { addr, ty })
    }

    pub fn store(&mut self, addr: Operand, value: Operand, ty: TypeId) {
        self.effect(InstrKind::Store { addr, value, ty });
    }

    pub fn field(&mut self, x: Operand, struct_ty: TypeId, field: usize) -> Operand {
        self.value(InstrKind::Field {
            x,
            field,
            ty: struct_ty,
        })
    }

    pub fn index(&mut self, x: Operand, ty: TypeId, index: Operand) -> Operand {
        self.value(InstrKind::Index { x, index, ty })
    }

    pub fn extract(&mut self, tuple: Operand, index: usize) -> Operand {
        self.value(InstrKind::Extract { tuple, index })
    }

    pub fn make_slice(&mut self, elem: TypeId, len: Operand, cap: Operand) -> Operand {
        self.value(InstrKind::MakeSlice { elem, len, cap })
    }

    pub fn slice(
        &mut self,
        x: Operand,
        ty: TypeId,
        low: Option<Operand>,
        high: Option<Operand>,
    ) -> Operand {
        self.value(InstrKind::Slice {
            x,
            low,
            high,
            max: None,
            ty,
        })
    }

    pub fn make_interface(&mut self, x: Operand, ty: TypeId) -> Operand {
        self.value(InstrKind::MakeInterface { x, ty })
    }

    pub fn type_assert(&mut self, x: Operand, ty: TypeId, comma_ok: bool) -> Operand {
        self.value(InstrKind::TypeAssert { x, ty, comma_ok })
    }

    pub fn make_closure(&mut self, func: FuncId, bindings: Vec<Operand>) -> Operand {
        self.value(InstrKind::MakeClosure { func, bindings })
    }

    // ---------------------------------------------------------------------
    // Calls
    // ---------------------------------------------------------------------

    pub fn call(&mut self, func: FuncId, args: Vec<Operand>) -> Operand {
        self.value(InstrKind::Call {
            call: CallCommon {
                callee: Callee::Static(func),
                args,
            },
        })
    }

    pub fn call_closure(&mut self, closure: Operand, args: Vec<Operand>) -> Operand {
        self.value(InstrKind::Call {
            call: CallCommon {
                callee: Callee::Closure(closure),
                args,
            },
        })
    }

    pub fn invoke(&mut self, recv: Operand, method: &str, args: Vec<Operand>) -> Operand {
        self.value(InstrKind::Call {
            call: CallCommon {
                callee: Callee::Invoke {
                    recv,
                    method: method.to_string(),
                },
                args,
            },
        })
    }

    pub fn builtin(&mut self, builtin: Builtin, args: Vec<Operand>) -> Operand {
        self.value(InstrKind::Call {
            call: CallCommon {
                callee: Callee::Builtin(builtin),
                args,
            },
        })
    }

    pub fn println(&mut self, args: Vec<Operand>) {
        self.effect(InstrKind::Call {
            call: CallCommon {
                callee: Callee::Builtin(Builtin::Println),
                args,
            },
        });
    }

    pub fn go(&mut self, func: FuncId, args: Vec<Operand>) {
        self.effect(InstrKind::Go {
            call: CallCommon {
                callee: Callee::Static(func),
                args,
            },
        });
    }

    pub fn go_closure(&mut self, closure: Operand, args: Vec<Operand>) {
        self.effect(InstrKind::Go {
            call: CallCommon {
                callee: Callee::Closure(closure),
                args,
            },
        });
    }

    pub fn defer(&mut self, func: FuncId, args: Vec<Operand>) {
        self.effect(InstrKind::Defer {
            call: CallCommon {
                callee: Callee::Static(func),
                args,
            },
        });
    }

    pub fn defer_closure(&mut self, closure: Operand, args: Vec<Operand>) {
        self.effect(InstrKind::Defer {
            call: CallCommon {
                callee: Callee::Closure(closure),
                args,
            },
        });
    }

    pub fn run_defers(&mut self) {
        self.effect(InstrKind::RunDefers);
    }

    // ---------------------------------------------------------------------
    // Channels
    // ---------------------------------------------------------------------

    pub fn make_chan(&mut self, elem: TypeId, size: Operand) -> Operand {
        self.value(InstrKind::MakeChan { elem, size })
    }

    pub fn send(&mut self, chan: Operand, x: Operand) {
        self.effect(InstrKind::Send { chan, x });
    }

    pub fn recv(&mut self, chan: Operand) -> Operand {
        self.value(InstrKind::Recv {
            chan,
            comma_ok: false,
        })
    }

    /// Receive yielding the `(value, ok)` tuple.
    pub fn recv_ok(&mut self, chan: Operand) -> Operand {
        self.value(InstrKind::Recv {
            chan,
            comma_ok: true,
        })
    }

    pub fn close(&mut self, chan: Operand) {
        self.effect(InstrKind::Call {
            call: CallCommon {
                callee: Callee::Builtin(Builtin::Close),
                args: vec![chan],
            },
        });
    }

    /// Select over `(dir, chan, value)` cases. Yields `(index, recvOk, r_0, ...)`.
    pub fn select(&mut self, cases: Vec<(ChanDir, Operand, Option<Operand>)>, blocking: bool) -> Operand {
        let states = cases
            .into_iter()
            .map(|(dir, chan, send)| SelectState { dir, chan, send })
            .collect();
        self.value(InstrKind::Select { states, blocking })
    }

    // ---------------------------------------------------------------------
    // Control flow
    // ---------------------------------------------------------------------

    /// Phi with edges keyed by predecessor block.
    pub fn phi(&mut self, edges: Vec<(usize, Operand)>) -> Operand {
        let dest = self.fresh_value();
        let ty = edges.iter().find_map(|(_, e)| self.type_of(e));
        let instr = self.push(Some(dest), ty, InstrKind::Phi { edges: Vec::new() });
        self.builder.pending_phis.push(PendingPhi {
            func: self.func,
            block: self.current,
            instr,
            edges,
        });
        Operand::Value(dest)
    }

    fn set_succs(&mut self, succs: Vec<usize>) {
        let current = self.current;
        self.function_mut().blocks[current].succs = succs;
    }

    pub fn jump(&mut self, target: usize) {
        self.effect(InstrKind::Jump);
        self.set_succs(vec![target]);
    }

    pub fn branch(&mut self, cond: Operand, then_block: usize, else_block: usize) {
        self.effect(InstrKind::If { cond });
        self.set_succs(vec![then_block, else_block]);
    }

    pub fn ret(&mut self, results: Vec<Operand>) {
        self.effect(InstrKind::Return { results });
    }

    pub fn panic(&mut self, x: Operand) {
        self.effect(InstrKind::Panic { x });
    }
}
