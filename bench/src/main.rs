use gostep::ssa::{BinOp, Program, ProgramBuilder};
use gostep::{Runtime, RuntimeConfig, TargetConfig, compile_program};
use serde::Serialize;
use std::rc::Rc;
use std::time::Instant;

const SUM_LIMIT: i64 = 1_000_000;
const FIB_N: i64 = 25;
const PING_PONG_ROUNDS: i64 = 20_000;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    native_i64_secs: f64,
    wide_i64_secs: f64,
    rust_time_secs: f64,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
}

// Rust reference implementations

fn rust_sum_loop() {
    let mut sum: i64 = 0;
    for i in 0..SUM_LIMIT {
        sum += i;
    }
    eprintln!("{}", sum);
}

fn rust_fibonacci(n: i64) -> i64 {
    if n < 2 {
        n
    } else {
        rust_fibonacci(n - 1) + rust_fibonacci(n - 2)
    }
}

fn rust_ping_pong() {
    let (ping_tx, ping_rx) = std::sync::mpsc::sync_channel::<i64>(0);
    let (pong_tx, pong_rx) = std::sync::mpsc::sync_channel::<i64>(0);
    let echo = std::thread::spawn(move || {
        while let Ok(v) = ping_rx.recv() {
            if pong_tx.send(v).is_err() {
                break;
            }
        }
    });
    let mut sum = 0;
    for i in 0..PING_PONG_ROUNDS {
        if ping_tx.send(i).is_err() {
            break;
        }
        sum += pong_rx.recv().unwrap_or(0);
    }
    drop(ping_tx);
    let _ = echo.join();
    eprintln!("{}", sum);
}

// SSA programs

fn sum_loop_program() -> Program {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(main);
        let head = f.new_block();
        let body = f.new_block();
        let exit = f.new_block();
        let i = f.alloc(int);
        let sum = f.alloc(int);
        f.jump(head);

        f.switch_to(head);
        let n = f.load(i.clone(), int);
        let limit = f.int(SUM_LIMIT);
        let more = f.binop(BinOp::Lt, n, limit, int);
        f.branch(more, body, exit);

        f.switch_to(body);
        let n = f.load(i.clone(), int);
        let s = f.load(sum.clone(), int);
        let s = f.binop(BinOp::Add, s, n.clone(), int);
        f.store(sum.clone(), s, int);
        let one = f.int(1);
        let n = f.binop(BinOp::Add, n, one, int);
        f.store(i, n, int);
        f.jump(head);

        f.switch_to(exit);
        let s = f.load(sum, int);
        f.println(vec![s]);
        f.ret(vec![]);
    }
    b.finish()
}

fn fibonacci_program() -> Program {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let fib = b.declare("fib", &[int], &[int]);
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(fib);
        let base = f.new_block();
        let rec = f.new_block();
        let n = f.param(0);
        let two = f.int(2);
        let small = f.binop(BinOp::Lt, n.clone(), two.clone(), int);
        f.branch(small, base, rec);

        f.switch_to(base);
        f.ret(vec![n.clone()]);

        f.switch_to(rec);
        let one = f.int(1);
        let n1 = f.binop(BinOp::Sub, n.clone(), one, int);
        let a = f.call(fib, vec![n1]);
        let n2 = f.binop(BinOp::Sub, n, two, int);
        let c = f.call(fib, vec![n2]);
        let r = f.binop(BinOp::Add, a, c, int);
        f.ret(vec![r]);
    }
    {
        let mut f = b.function(main);
        let n = f.int(FIB_N);
        let r = f.call(fib, vec![n]);
        f.println(vec![r]);
        f.ret(vec![]);
    }
    b.finish()
}

fn ping_pong_program() -> Program {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let chan = b.chan(int);
    let echo = b.declare("echo", &[chan, chan], &[]);
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(echo);
        let forever = f.new_block();
        let (ping, pong) = (f.param(0), f.param(1));
        f.jump(forever);
        f.switch_to(forever);
        let v = f.recv(ping);
        f.send(pong, v);
        f.jump(forever);
    }
    {
        let mut f = b.function(main);
        let head = f.new_block();
        let body = f.new_block();
        let exit = f.new_block();
        let i = f.alloc(int);
        let sum = f.alloc(int);
        let zero = f.int(0);
        let ping = f.make_chan(int, zero.clone());
        let pong = f.make_chan(int, zero);
        f.go(echo, vec![ping.clone(), pong.clone()]);
        f.jump(head);

        f.switch_to(head);
        let n = f.load(i.clone(), int);
        let rounds = f.int(PING_PONG_ROUNDS);
        let more = f.binop(BinOp::Lt, n, rounds, int);
        f.branch(more, body, exit);

        f.switch_to(body);
        let n = f.load(i.clone(), int);
        f.send(ping, n.clone());
        let v = f.recv(pong);
        let s = f.load(sum.clone(), int);
        let s = f.binop(BinOp::Add, s, v, int);
        f.store(sum.clone(), s, int);
        let one = f.int(1);
        let n = f.binop(BinOp::Add, n, one, int);
        f.store(i, n, int);
        f.jump(head);

        f.switch_to(exit);
        let s = f.load(sum, int);
        f.println(vec![s]);
        f.ret(vec![]);
    }
    b.finish()
}

fn time_rust<F>(f: F) -> f64
where
    F: FnOnce(),
{
    let start = Instant::now();
    f();
    start.elapsed().as_secs_f64()
}

fn run_gostep_benchmark(name: &str, program: &Program, native_i64: bool) -> f64 {
    let target = TargetConfig {
        native_i64,
        ..Default::default()
    };
    let start = Instant::now();
    let result = compile_program(program, &target)
        .map_err(|e| e.to_string())
        .and_then(|compiled| {
            let mut runtime = Runtime::with_output(
                Rc::new(compiled),
                RuntimeConfig::default(),
                Box::new(std::io::sink()),
            );
            runtime.run_main().map_err(|e| e.to_string())
        });
    let elapsed = start.elapsed().as_secs_f64();

    if let Err(e) = result {
        eprintln!(
            "gostep benchmark {} (native_i64={}) failed: {}",
            name, native_i64, e
        );
    }

    elapsed
}

fn bench(name: &str, program: Program, rust_time: f64) -> BenchmarkResult {
    BenchmarkResult {
        name: name.to_string(),
        native_i64_secs: run_gostep_benchmark(name, &program, true),
        wide_i64_secs: run_gostep_benchmark(name, &program, false),
        rust_time_secs: rust_time,
    }
}

fn main() {
    let results = vec![
        bench("sum_loop", sum_loop_program(), time_rust(rust_sum_loop)),
        bench(
            "fibonacci",
            fibonacci_program(),
            time_rust(|| eprintln!("{}", rust_fibonacci(FIB_N))),
        ),
        bench("ping_pong", ping_pong_program(), time_rust(rust_ping_pong)),
    ];

    let output = BenchmarkOutput { results };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("error: {}", e),
    }
}
