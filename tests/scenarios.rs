//! In-process scenarios: SSA programs built with the builder, compiled,
//! and run on a runtime that captures their output.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use gostep::compiler::{compile_program, validate};
use gostep::ssa::{BinOp, Builtin, ChanDir, Program, ProgramBuilder};
use gostep::vm::{self, Exit, FrameKind, Runtime, RuntimeError};
use gostep::{DeadlockPolicy, RuntimeConfig, TargetConfig};

#[derive(Clone, Default)]
struct Captured(Rc<RefCell<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).to_string()
    }
}

fn compile(program: &Program, target: &TargetConfig) -> vm::Program {
    let compiled = compile_program(program, target).unwrap();
    for func in &compiled.functions {
        validate(func).unwrap();
    }
    compiled
}

fn run_with(
    program: &Program,
    config: RuntimeConfig,
    target: &TargetConfig,
) -> (Result<Exit, RuntimeError>, String) {
    let out = Captured::default();
    let mut rt = Runtime::with_output(Rc::new(compile(program, target)), config, Box::new(out.clone()));
    let result = rt.run_main();
    (result, out.text())
}

fn run(program: &Program) -> (Result<Exit, RuntimeError>, String) {
    run_with(program, RuntimeConfig::default(), &TargetConfig::default())
}

fn expect_output(program: &Program) -> String {
    let (result, out) = run(program);
    if let Err(e) = result {
        panic!("program failed: {}\noutput so far:\n{}", e, out);
    }
    out
}

#[test]
fn test_deferred_calls_run_last_in_first_out() {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let say = b.declare("say", &[int], &[]);
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(say);
        let d = f.string("d");
        let n = f.param(0);
        f.println(vec![d, n]);
        f.ret(vec![]);
    }
    {
        let mut f = b.function(main);
        for n in 1..=3 {
            let n = f.int(n);
            f.defer(say, vec![n]);
        }
        let body = f.string("body");
        f.println(vec![body]);
        f.run_defers();
        f.ret(vec![]);
    }
    assert_eq!(expect_output(&b.finish()), "body\nd 3\nd 2\nd 1\n");
}

#[test]
fn test_recover_resumes_at_recover_block() {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let protect = b.declare("protect", &[], &[]);
    let risky = b.declare("risky", &[], &[int]);
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(protect);
        let r = f.builtin(Builtin::Recover, vec![]);
        let label = f.string("recovered:");
        f.println(vec![label, r]);
        f.ret(vec![]);
    }
    {
        let mut f = b.function(risky);
        f.defer(protect, vec![]);
        let boom = f.string("boom");
        f.panic(boom);
        let rb = f.new_block();
        f.switch_to(rb);
        let seven = f.int(7);
        f.ret(vec![seven]);
        f.set_recover(rb);
    }
    {
        let mut f = b.function(main);
        let v = f.call(risky, vec![]);
        let after = f.string("after");
        f.println(vec![after, v]);
        f.ret(vec![]);
    }
    assert_eq!(expect_output(&b.finish()), "recovered: boom\nafter 7\n");
}

#[test]
fn test_unrecovered_panic_runs_defers_then_fails() {
    let mut b = ProgramBuilder::new();
    let cleanup = b.declare("cleanup", &[], &[]);
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(cleanup);
        let msg = f.string("cleanup");
        f.println(vec![msg]);
        f.ret(vec![]);
    }
    {
        let mut f = b.function(main);
        f.defer(cleanup, vec![]);
        f.at(12, 3);
        let msg = f.string("fatal");
        f.panic(msg);
    }
    let mut program = b.finish();
    program.files.push("main.go".to_string());
    let (result, out) = run(&program);
    assert_eq!(out, "cleanup\n");
    match result {
        Err(RuntimeError::Panic {
            goroutine,
            message,
            dump,
        }) => {
            assert_eq!(goroutine, 1);
            assert_eq!(message, "fatal");
            assert!(dump.contains("goroutine 1"), "dump: {}", dump);
        }
        other => panic!("expected panic, got {:?}", other),
    }
}

#[test]
fn test_unrecovered_panic_unwinds_every_defer_in_reverse() {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let say = b.declare("say", &[int], &[]);
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(say);
        let d = f.string("d");
        let n = f.param(0);
        f.println(vec![d, n]);
        f.ret(vec![]);
    }
    {
        let mut f = b.function(main);
        for n in 1..=3 {
            let n = f.int(n);
            f.defer(say, vec![n]);
        }
        let msg = f.string("boom");
        f.panic(msg);
    }
    let (result, out) = run(&b.finish());
    assert_eq!(out, "d 3\nd 2\nd 1\n");
    assert!(matches!(result, Err(RuntimeError::Panic { ref message, .. }) if message == "boom"));
}

#[test]
fn test_two_producers_one_select_consumer() {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let boolean = b.bool_type();
    let chan = b.chan(int);
    let producer = b.declare("producer", &[chan, int], &[]);
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(producer);
        let (ch, base) = (f.param(0), f.param(1));
        for i in 0..3 {
            let i = f.int(i);
            let v = f.binop(BinOp::Add, base.clone(), i, int);
            f.send(ch.clone(), v);
        }
        f.close(ch);
        f.ret(vec![]);
    }
    {
        let mut f = b.function(main);
        let looping = f.new_block();
        let check_c = f.new_block();
        let body = f.new_block();
        let exit = f.new_block();
        let next = f.new_block();

        let count = f.alloc(int);
        let sum = f.alloc(int);
        let zero = f.int(0);
        let a = f.make_chan(int, zero.clone());
        let c = f.make_chan(int, zero);
        let ten = f.int(10);
        let twenty = f.int(20);
        f.go(producer, vec![a.clone(), ten]);
        f.go(producer, vec![c.clone(), twenty]);

        // Each channel lives in a cell so a closed one can be set to nil,
        // which a select never chooses.
        let mut slots = Vec::new();
        for ch in [a, c] {
            let cell = f.alloc(chan);
            f.store(cell.clone(), ch, chan);
            let done = f.alloc(boolean);
            slots.push((cell, done));
        }
        f.jump(looping);

        f.switch_to(looping);
        let a_done = f.load(slots[0].1.clone(), boolean);
        f.branch(a_done, check_c, body);

        f.switch_to(check_c);
        let c_done = f.load(slots[1].1.clone(), boolean);
        f.branch(c_done, exit, body);

        f.switch_to(body);
        let a = f.load(slots[0].0.clone(), chan);
        let c = f.load(slots[1].0.clone(), chan);
        let chosen = f.select(vec![(ChanDir::Recv, a, None), (ChanDir::Recv, c, None)], true);
        let index = f.extract(chosen.clone(), 0);
        let ok = f.extract(chosen.clone(), 1);
        let case_a = f.new_block();
        let case_c = f.new_block();
        let first = f.int(0);
        let is_a = f.binop(BinOp::Eq, index, first, int);
        f.branch(is_a, case_a, case_c);

        for (block, slot, (cell, done)) in [(case_a, 2, slots[0].clone()), (case_c, 3, slots[1].clone())] {
            let received = f.new_block();
            let closed = f.new_block();
            f.switch_to(block);
            f.branch(ok.clone(), received, closed);

            f.switch_to(received);
            let v = f.extract(chosen.clone(), slot);
            let s = f.load(sum.clone(), int);
            let s = f.binop(BinOp::Add, s, v, int);
            f.store(sum.clone(), s, int);
            let n = f.load(count.clone(), int);
            let one = f.int(1);
            let n = f.binop(BinOp::Add, n, one, int);
            f.store(count.clone(), n, int);
            f.jump(next);

            f.switch_to(closed);
            let nil = f.nil(chan);
            f.store(cell, nil, chan);
            let yes = f.boolean(true);
            f.store(done, yes, boolean);
            f.jump(next);
        }

        f.switch_to(next);
        f.jump(looping);

        f.switch_to(exit);
        let n = f.load(count, int);
        let s = f.load(sum, int);
        f.println(vec![n, s]);
        f.ret(vec![]);
    }
    assert_eq!(expect_output(&b.finish()), "6 96\n");
}

#[test]
fn test_unchosen_select_slots_hold_element_zero() {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(main);
        let one = f.int(1);
        let ch = f.make_chan(int, one);
        let chosen = f.select(vec![(ChanDir::Recv, ch, None)], false);
        let index = f.extract(chosen.clone(), 0);
        let ok = f.extract(chosen.clone(), 1);
        let v = f.extract(chosen, 2);
        f.println(vec![index, ok, v]);
        f.ret(vec![]);
    }
    assert_eq!(expect_output(&b.finish()), "-1 false 0\n");
}

#[test]
fn test_full_buffered_send_completes_after_receive() {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let chan = b.chan(int);
    let receiver = b.declare("receiver", &[chan], &[]);
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(receiver);
        let ch = f.param(0);
        let v = f.recv(ch);
        let got = f.string("got");
        f.println(vec![got, v]);
        f.ret(vec![]);
    }
    {
        let mut f = b.function(main);
        let one = f.int(1);
        let ch = f.make_chan(int, one.clone());
        f.send(ch.clone(), one);
        f.go(receiver, vec![ch.clone()]);
        let two = f.int(2);
        f.send(ch.clone(), two);
        let v = f.recv(ch);
        f.println(vec![v]);
        f.ret(vec![]);
    }
    assert_eq!(expect_output(&b.finish()), "got 1\n2\n");
}

#[test]
fn test_receive_with_no_sender_deadlocks() {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(main);
        let zero = f.int(0);
        let ch = f.make_chan(int, zero);
        let v = f.recv(ch);
        f.println(vec![v]);
        f.ret(vec![]);
    }
    let program = b.finish();
    let (result, _) = run(&program);
    let err = result.unwrap_err();
    assert!(matches!(err, RuntimeError::Deadlock { .. }));
    let text = err.to_string();
    assert!(text.starts_with("fatal error: all goroutines are asleep - deadlock!"));
    assert!(text.contains("goroutine 1 [running]:"), "{}", text);

    let config = RuntimeConfig {
        deadlock: DeadlockPolicy::Return,
        ..RuntimeConfig::default()
    };
    let (result, _) = run_with(&program, config, &TargetConfig::default());
    assert_eq!(result.unwrap(), Exit::Quiescent);
}

#[test]
fn test_closed_channel_drains_then_reports_not_ok() {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(main);
        let two = f.int(2);
        let ch = f.make_chan(int, two);
        let five = f.int(5);
        f.send(ch.clone(), five);
        f.close(ch.clone());
        for _ in 0..2 {
            let pair = f.recv_ok(ch.clone());
            let v = f.extract(pair.clone(), 0);
            let ok = f.extract(pair, 1);
            f.println(vec![v, ok]);
        }
        f.ret(vec![]);
    }
    assert_eq!(expect_output(&b.finish()), "5 true\n0 false\n");
}

#[test]
fn test_type_assertions() {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let string = b.string_type();
    let any = b.any_type();
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(main);
        let five = f.int(5);
        let x = f.make_interface(five, int);
        let as_string = f.type_assert(x.clone(), string, true);
        let ok = f.extract(as_string, 1);
        let as_int = f.type_assert(x.clone(), int, false);
        f.println(vec![ok, as_int]);
        let back = f.type_assert(x.clone(), any, false);
        let again = f.type_assert(back, int, false);
        f.println(vec![again]);
        f.type_assert(x, string, false);
        f.ret(vec![]);
    }
    let (result, out) = run(&b.finish());
    assert_eq!(out, "false 5\n5\n");
    match result {
        Err(RuntimeError::Panic { message, .. }) => {
            assert!(message.contains("interface conversion"), "{}", message);
        }
        other => panic!("expected panic, got {:?}", other),
    }
}

#[test]
fn test_interface_dispatch() {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let doubler = b.named("Doubler", gostep::ssa::TypeKind::Int { bits: 64, signed: true });
    let sig = b.func_type(&[], &[int]);
    let valuer = b.interface("Valuer", &[("Value", sig)]);
    let value = b.declare("Doubler.Value", &[doubler], &[int]);
    b.add_method(doubler, "Value", sig, value);
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(value);
        let d = f.param(0);
        let two = f.int_typed(2, doubler);
        let v = f.binop(BinOp::Mul, d, two, doubler);
        let v = f.convert(v, doubler, int);
        f.ret(vec![v]);
    }
    {
        let mut f = b.function(main);
        for n in [21, 50] {
            let n = f.int_typed(n, doubler);
            let x = f.make_interface(n, doubler);
            let x = f.type_assert(x, valuer, false);
            let v = f.invoke(x, "Value", vec![]);
            f.println(vec![v]);
        }
        f.ret(vec![]);
    }
    assert_eq!(expect_output(&b.finish()), "42\n100\n");
}

fn wide_program() -> Program {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(main);
        let big = f.int(1 << 40);
        let three = f.int(3);
        let product = f.binop(BinOp::Mul, big, three, int);

        let min = f.int(i64::MIN);
        let minus_one = f.int(-1);
        let quotient = f.binop(BinOp::Div, min.clone(), minus_one.clone(), int);
        let remainder = f.binop(BinOp::Rem, min, minus_one, int);

        let max = f.int(i64::MAX);
        let one = f.int(1);
        let wrapped = f.binop(BinOp::Add, max, one, int);

        let neg = f.int(-7);
        let two = f.int(2);
        let truncated = f.binop(BinOp::Div, neg, two, int);

        f.println(vec![product, quotient, remainder, wrapped, truncated]);
        f.ret(vec![]);
    }
    b.finish()
}

#[test]
fn test_wide_integers_match_native() {
    let program = wide_program();
    let expected = "3298534883328 -9223372036854775808 0 -9223372036854775808 -3\n";
    let (native, out) = run(&program);
    native.unwrap();
    assert_eq!(out, expected);

    let wide = TargetConfig {
        native_i64: false,
        ..TargetConfig::default()
    };
    let (result, out) = run_with(&program, RuntimeConfig::default(), &wide);
    result.unwrap();
    assert_eq!(out, expected);
}

#[test]
fn test_unsigned_64_bit_values_print_unsigned() {
    let mut b = ProgramBuilder::new();
    let uint = b.int_of(64, false);
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(main);
        let max = f.int_typed(-1, uint);
        let two = f.int_typed(2, uint);
        let half = f.binop(BinOp::Div, max.clone(), two, uint);
        let signed = f.int(-1);
        f.println(vec![max, half, signed]);
        f.ret(vec![]);
    }
    let program = b.finish();
    let expected = "18446744073709551615 9223372036854775807 -1\n";
    assert_eq!(expect_output(&program), expected);

    let wide = TargetConfig {
        native_i64: false,
        ..TargetConfig::default()
    };
    let (result, out) = run_with(&program, RuntimeConfig::default(), &wide);
    result.unwrap();
    assert_eq!(out, expected);
}

#[test]
fn test_init_runs_before_main() {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let counter = b.global("counter", int);
    let init = b.declare("init", &[], &[]);
    let main = b.declare("main", &[], &[]);
    b.set_init(init);
    b.set_main(main);
    {
        let mut f = b.function(init);
        let v = f.int(41);
        f.store(gostep::ssa::Operand::Global(counter), v, int);
        f.ret(vec![]);
    }
    {
        let mut f = b.function(main);
        let addr = gostep::ssa::Operand::Global(counter);
        let v = f.load(addr.clone(), int);
        let one = f.int(1);
        let v = f.binop(BinOp::Add, v, one, int);
        f.store(addr, v.clone(), int);
        f.println(vec![v]);
        f.ret(vec![]);
    }
    assert_eq!(expect_output(&b.finish()), "42\n");
}

#[test]
fn test_every_compiled_block_is_well_formed() {
    let program = wide_program();
    for target in [
        TargetConfig::default(),
        TargetConfig {
            native_i64: false,
            ..TargetConfig::default()
        },
    ] {
        let compiled = compile(&program, &target);
        for func in &compiled.functions {
            assert_eq!(func.kind, FrameKind::Plain);
            for block in &func.blocks {
                let last = block.code.last().expect("empty block");
                assert!(last.is_terminator());
                for target in last.targets() {
                    assert!(func.block(target).is_some());
                }
            }
        }
    }
}
