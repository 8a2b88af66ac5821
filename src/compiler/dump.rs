//! Human-readable listing of a compiled program, for `gostep dump` and
//! `run --dump-code`.

use crate::ssa::Pos;
use crate::vm::{
    ArithKind, CallTarget, Edge, FrameKind, Function, Indexed, Op, Operand, Program, SelectCase, Value,
};

// ============================================================================
// State Machine Disassembler
// ============================================================================

/// Disassembler for compiled functions.
pub struct Disassembler<'a> {
    program: &'a Program,
    output: String,
}

fn operand(o: &Operand) -> String {
    match o {
        Operand::Reg(r) => format!("r{}", r),
        Operand::Imm(Value::Str(s)) => format!("{:?}", String::from_utf8_lossy(s)),
        Operand::Imm(v) => format!("{}", v),
    }
}

fn operands(ops: &[Operand]) -> String {
    ops.iter().map(operand).collect::<Vec<_>>().join(", ")
}

fn dest(dst: Option<u32>) -> String {
    match dst {
        Some(r) => format!("r{} = ", r),
        None => String::new(),
    }
}

fn edge(e: &Edge) -> String {
    if e.moves.is_empty() {
        return format!("b{}", e.target);
    }
    let moves = e
        .moves
        .iter()
        .map(|(dst, src)| format!("r{} <- {}", dst, operand(src)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("b{} [{}]", e.target, moves)
}

fn indexed(of: &Indexed) -> String {
    match of {
        Indexed::Slice => "slice".to_string(),
        Indexed::String => "string".to_string(),
        Indexed::Array { len, elem_size } => format!("array[{}]x{}", len, elem_size),
    }
}

fn kind(k: &ArithKind) -> String {
    match k {
        ArithKind::Int(n) => format!("{}{}", if n.signed { "i" } else { "u" }, n.bits),
        ArithKind::Wide { signed: true } => "wide".to_string(),
        ArithKind::Wide { signed: false } => "uwide".to_string(),
        ArithKind::Float { bits } => format!("f{}", bits),
        ArithKind::Str => "str".to_string(),
        ArithKind::Bool => "bool".to_string(),
        ArithKind::Any => "any".to_string(),
    }
}

fn bound(b: &Option<Operand>) -> String {
    b.as_ref().map(operand).unwrap_or_default()
}

impl<'a> Disassembler<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            output: String::new(),
        }
    }

    pub fn disassemble(&mut self) -> &str {
        if !self.program.globals.is_empty() {
            self.output.push_str("== Globals ==\n");
            for (i, g) in self.program.globals.iter().enumerate() {
                self.output
                    .push_str(&format!("  [{:04}] {} (size: {})\n", i, g.name, g.size));
            }
            self.output.push('\n');
        }

        for (i, func) in self.program.functions.iter().enumerate() {
            self.disassemble_function(func, i);
            self.output.push('\n');
        }

        let entry = |id: Option<crate::ssa::FuncId>| {
            id.and_then(|f| self.program.function(f))
                .map(|f| f.name.clone())
                .unwrap_or_else(|| "-".to_string())
        };
        let (init, main) = (entry(self.program.init), entry(self.program.main));
        self.output
            .push_str(&format!("== Entry: init {}, main {} ==\n", init, main));
        &self.output
    }

    fn disassemble_function(&mut self, func: &Function, index: usize) {
        let kind = match func.kind {
            FrameKind::Suspendable => "suspendable",
            FrameKind::Plain => "plain",
        };
        let recover = func
            .recover_point
            .map(|b| format!(", recover: b{}", b))
            .unwrap_or_default();
        self.output.push_str(&format!(
            "== Function[{}]: {} ({}, params: {}, regs: {}{}) ==\n",
            index, func.name, kind, func.num_params, func.num_regs, recover
        ));
        for block in &func.blocks {
            self.output.push_str(&format!("b{}:\n", block.id));
            let mut last: Option<Pos> = None;
            for (pc, op) in block.code.iter().enumerate() {
                self.output.push_str(&format!("  {:04}: ", pc));
                self.disassemble_op(op);
                let pos = block.lines.find_location(pc);
                if let Some(p) = pos.filter(|p| Some(*p) != last) {
                    self.output
                        .push_str(&format!("  ; {}", self.program.format_pos(p)));
                }
                last = pos;
                self.output.push('\n');
            }
        }
    }

    fn target(&self, t: &CallTarget) -> String {
        match t {
            CallTarget::Static(id) => match self.program.function(*id) {
                Some(f) => format!("{} ; {}", id, f.name),
                None => id.to_string(),
            },
            CallTarget::Closure(c) => format!("closure {}", operand(c)),
            CallTarget::Invoke { recv, method, site } => {
                format!("{}.{} @site{}", operand(recv), method, site)
            }
        }
    }

    fn disassemble_op(&mut self, op: &Op) {
        let text = match op {
            Op::Move { dst, src } => format!("r{} = Move {}", dst, operand(src)),
            Op::Binary {
                dst,
                op,
                kind: k,
                x,
                y,
                ..
            } => format!(
                "r{} = {:?}.{} {}, {}",
                dst,
                op,
                kind(k),
                operand(x),
                operand(y)
            ),
            Op::Unary { dst, op, kind: k, x } => {
                format!("r{} = {:?}.{} {}", dst, op, kind(k), operand(x))
            }
            Op::Convert { dst, conv, x } => format!("r{} = Convert {:?} {}", dst, conv, operand(x)),
            Op::GlobalAddr { dst, global } => format!("r{} = GlobalAddr g{}", dst, global.0),
            Op::Alloc { dst, size } => format!("r{} = Alloc {}", dst, size),
            Op::FieldAddr { dst, x, offset } => {
                format!("r{} = FieldAddr {} +{}", dst, operand(x), offset)
            }
            Op::IndexAddr { dst, x, index, of } => format!(
                "r{} = IndexAddr {}[{}] {}",
                dst,
                operand(x),
                operand(index),
                indexed(of)
            ),
            Op::Load { dst, addr, .. } => format!("r{} = Load {}", dst, operand(addr)),
            Op::Store { addr, value, .. } => {
                format!("Store {} <- {}", operand(addr), operand(value))
            }
            Op::Extract { dst, tuple, index } => {
                format!("r{} = Extract {}.{}", dst, operand(tuple), index)
            }
            Op::Index { dst, x, index, of } => format!(
                "r{} = Index {}[{}] {}",
                dst,
                operand(x),
                operand(index),
                indexed(of)
            ),
            Op::MakeSlice {
                dst,
                elem_size,
                len,
                cap,
            } => format!(
                "r{} = MakeSlice x{} len {} cap {}",
                dst,
                elem_size,
                operand(len),
                operand(cap)
            ),
            Op::SliceOf {
                dst,
                x,
                of,
                low,
                high,
                max,
            } => format!(
                "r{} = Slice {}[{}:{}:{}] {}",
                dst,
                operand(x),
                bound(low),
                bound(high),
                bound(max),
                indexed(of)
            ),
            Op::MakeInterface { dst, ty, x } => format!(
                "r{} = MakeInterface {} {}",
                dst,
                self.program.types.name(*ty),
                operand(x)
            ),
            Op::TypeAssert {
                dst,
                x,
                ty,
                comma_ok,
            } => format!(
                "r{} = TypeAssert{} {} {}",
                dst,
                if *comma_ok { "Ok" } else { "" },
                operand(x),
                self.program.types.name(*ty)
            ),
            Op::MakeClosure {
                dst,
                func,
                bindings,
            } => format!("r{} = MakeClosure {} [{}]", dst, func, operands(bindings)),
            Op::CallPlain { dst, func, args } => format!(
                "{}CallPlain {}({})",
                dest(*dst),
                self.target(&CallTarget::Static(*func)),
                operands(args)
            ),
            Op::Builtin { dst, builtin, args } => {
                format!("{}{:?}({})", dest(*dst), builtin, operands(args))
            }
            Op::Recover { dst } => format!("r{} = Recover", dst),
            Op::Call {
                target,
                args,
                resume,
            } => format!(
                "Call {}({}) -> b{}",
                self.target(target),
                operands(args),
                resume
            ),
            Op::TakeResult { dst } => format!("{}TakeResult", dest(*dst)),
            Op::Go { target, args } => format!("Go {}({})", self.target(target), operands(args)),
            Op::Defer { target, args } => {
                format!("Defer {}({})", self.target(target), operands(args))
            }
            Op::RunDefers => "RunDefers".to_string(),
            Op::Panic { value, resume } => match resume {
                Some(k) => format!("Panic {} -> b{}", operand(value), k),
                None => format!("Panic {}", operand(value)),
            },
            Op::MakeChan { dst, size, .. } => format!("r{} = MakeChan {}", dst, operand(size)),
            Op::Send { chan, value } => format!("Send {} <- {}", operand(chan), operand(value)),
            Op::Recv {
                dst,
                chan,
                comma_ok,
            } => format!(
                "{}Recv{} {}",
                dest(*dst),
                if *comma_ok { "Ok" } else { "" },
                operand(chan)
            ),
            Op::Select {
                dst,
                cases,
                blocking,
                ..
            } => {
                let cases = cases
                    .iter()
                    .map(|SelectCase { chan, send }| match send {
                        Some(v) => format!("{} <- {}", operand(chan), operand(v)),
                        None => format!("<-{}", operand(chan)),
                    })
                    .collect::<Vec<_>>()
                    .join(" | ");
                let mode = if *blocking { "" } else { " default" };
                format!("{}Select [{}]{}", dest(*dst), cases, mode)
            }
            Op::Jump(e) => format!("Jump {}", edge(e)),
            Op::Branch {
                cond,
                then_edge,
                else_edge,
            } => format!(
                "Branch {} ? {} : {}",
                operand(cond),
                edge(then_edge),
                edge(else_edge)
            ),
            Op::Return { results } => format!("Return {}", operands(results)),
        };
        self.output.push_str(text.trim_end());
    }
}

/// Format a compiled program as a disassembly listing.
pub fn format_program(program: &Program) -> String {
    let mut disassembler = Disassembler::new(program);
    disassembler.disassemble().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_program;
    use crate::config::TargetConfig;
    use crate::ssa::{BinOp, ProgramBuilder};

    fn compile(b: ProgramBuilder) -> Program {
        compile_program(&b.finish(), &TargetConfig::default()).unwrap()
    }

    #[test]
    fn test_dump_plain_function() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let add = b.declare("add", &[int, int], &[int]);
        {
            let mut fb = b.function(add);
            let (x, y) = (fb.param(0), fb.param(1));
            let s = fb.binop(BinOp::Add, x, y, int);
            fb.ret(vec![s]);
        }
        let output = format_program(&compile(b));
        assert!(output.contains("== Function[0]: add (plain, params: 2, regs: 3) =="));
        assert!(output.contains("0000: r2 = Add.i64 r0, r1"));
        assert!(output.contains("0001: Return r2"));
        assert!(output.contains("== Entry: init -, main - =="));
    }

    #[test]
    fn test_dump_shows_resume_blocks() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let main = b.declare("main", &[], &[]);
        b.set_main(main);
        {
            let mut fb = b.function(main);
            let one = fb.int(1);
            let ch = fb.make_chan(int, one.clone());
            fb.at(4, 2);
            fb.send(ch.clone(), one);
            let v = fb.recv(ch);
            fb.println(vec![v]);
            fb.ret(vec![]);
        }
        let mut program = b.finish();
        program.files.push("main.go".to_string());
        let output = format_program(&compile_program(&program, &TargetConfig::default()).unwrap());
        assert!(output.contains("(suspendable, params: 0"));
        assert!(output.contains("Jump b-1"));
        assert!(output.contains("b-1:\n  0000: Send r0 <- 1"));
        assert!(output.contains("; main.go:4:2"));
        assert!(output.contains("b-2:\n  0000: r1 = Recv r0"));
        assert!(output.contains("Println(r1)"));
        assert!(output.contains("main main"));
    }
}
