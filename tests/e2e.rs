use std::path::{Path, PathBuf};
use std::process::Command;

use gostep::ssa::{BinOp, Program, ProgramBuilder};

struct Output {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

fn write_program(dir: &Path, program: &Program) -> PathBuf {
    let path = dir.join("program.json");
    std::fs::write(&path, program.to_json().unwrap()).unwrap();
    path
}

fn gostep(args: &[&str]) -> Output {
    let output = Command::new(env!("CARGO_BIN_EXE_gostep"))
        .args(args)
        .output()
        .expect("failed to execute gostep");
    Output {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        code: output.status.code(),
    }
}

fn hello() -> Program {
    let mut b = ProgramBuilder::new();
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(main);
        let s = f.string("hello, world");
        f.println(vec![s]);
        f.ret(vec![]);
    }
    b.finish()
}

fn deadlock() -> Program {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(main);
        let zero = f.int(0);
        let ch = f.make_chan(int, zero);
        f.recv(ch);
        f.ret(vec![]);
    }
    b.finish()
}

#[test]
fn test_run_prints_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(dir.path(), &hello());
    let out = gostep(&["run", path.to_str().unwrap()]);
    assert_eq!(out.code, Some(0), "stderr:\n{}", out.stderr);
    assert_eq!(out.stdout, "hello, world\n");
}

#[test]
fn test_unrecovered_panic_exits_with_status_2() {
    let mut b = ProgramBuilder::new();
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(main);
        let s = f.string("boom");
        f.panic(s);
    }
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(dir.path(), &b.finish());
    let out = gostep(&["run", path.to_str().unwrap()]);
    assert_eq!(out.code, Some(2));
    assert!(out.stderr.starts_with("panic: boom"), "stderr:\n{}", out.stderr);
    assert!(out.stderr.contains("goroutine 1"));
}

#[test]
fn test_deadlock_policy_flag_and_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(dir.path(), &deadlock());
    let file = path.to_str().unwrap();

    let out = gostep(&["run", file]);
    assert_eq!(out.code, Some(2));
    assert!(out
        .stderr
        .contains("fatal error: all goroutines are asleep - deadlock!"));

    let out = gostep(&["run", "--deadlock", "return", file]);
    assert_eq!(out.code, Some(0), "stderr:\n{}", out.stderr);

    std::fs::write(dir.path().join("gostep.toml"), "[runtime]\ndeadlock = \"return\"\n").unwrap();
    let out = gostep(&["run", file]);
    assert_eq!(out.code, Some(0), "stderr:\n{}", out.stderr);

    let out = gostep(&["run", "--deadlock", "fail", file]);
    assert_eq!(out.code, Some(2));
}

#[test]
fn test_bad_settings_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(dir.path(), &hello());
    std::fs::write(dir.path().join("gostep.toml"), "[runtime]\nturbo = true\n").unwrap();
    let out = gostep(&["run", path.to_str().unwrap()]);
    assert_eq!(out.code, Some(1));
    assert!(out.stderr.contains("failed to parse"), "stderr:\n{}", out.stderr);
}

#[test]
fn test_stats_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(dir.path(), &hello());
    let out = gostep(&["run", "--stats=json", path.to_str().unwrap()]);
    assert_eq!(out.code, Some(0));
    let stats: serde_json::Value = serde_json::from_str(&out.stderr).unwrap();
    assert_eq!(stats["goroutines_spawned"], 1);
    assert!(stats["passes"].as_u64().unwrap() >= 1);
}

#[test]
fn test_stats_human() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(dir.path(), &hello());
    let out = gostep(&["run", "--stats", path.to_str().unwrap()]);
    assert_eq!(out.code, Some(0));
    assert!(out.stderr.contains("=== Scheduler Statistics ==="));
}

#[test]
fn test_dump_and_check() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(dir.path(), &deadlock());
    let file = path.to_str().unwrap();

    let out = gostep(&["dump", file]);
    assert_eq!(out.code, Some(0));
    assert!(out.stdout.contains("== Function[0]: main (suspendable"));
    assert!(out.stdout.contains("b-1:"));
    assert!(out.stdout.contains("Recv r0"));

    let out = gostep(&["check", file]);
    assert_eq!(out.code, Some(0));
    assert_eq!(out.stdout, "Compile check passed: 1 functions (1 suspendable).\n");
}

#[test]
fn test_invalid_program_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{\"functions\": 1}").unwrap();
    let out = gostep(&["check", path.to_str().unwrap()]);
    assert_eq!(out.code, Some(1));
    assert!(out.stderr.starts_with("invalid SSA program"));
}

#[test]
fn test_wide_ints_flag() {
    let mut b = ProgramBuilder::new();
    let int = b.int_type();
    let main = b.declare("main", &[], &[]);
    b.set_main(main);
    {
        let mut f = b.function(main);
        let x = f.int(0x1_0000_0001);
        let y = f.int(0xffff_ffff);
        let p = f.binop(BinOp::Mul, x, y, int);
        f.println(vec![p]);
        f.ret(vec![]);
    }
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(dir.path(), &b.finish());
    let file = path.to_str().unwrap();
    let native = gostep(&["run", file]);
    let wide = gostep(&["run", "--wide-ints", file]);
    assert_eq!(native.stdout, "-1\n");
    assert_eq!(native.stdout, wide.stdout);
}
