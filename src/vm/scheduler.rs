//! Cooperative goroutine scheduler.
//!
//! A pass steps the top frame of every live goroutine once, in ascending id
//! order. Goroutine 0 hosts initialization and host calls. Panics unwind one
//! frame per step so deferred calls can themselves suspend.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::rc::Rc;

use serde::Serialize;

use super::channel::Channel;
use super::debug::{format_goroutine, FrameInfo};
use super::error::{Fault, RuntimeError};
use super::frame::{FrameRole, StackFrame};
use super::ic::InlineCacheTable;
use super::interp::Step;
use super::memory::{Memory, Pointer};
use super::types::TypeCache;
use super::value::Value;
use super::Program;
use crate::config::{DeadlockPolicy, RuntimeConfig};
use crate::ssa::FuncId;

pub type GoroutineId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoroutineState {
    Runnable,
    /// Unwinding a panic
    Panicking,
    /// No frames; only goroutine 0 and a finished main goroutine stay idle
    Idle,
}

impl GoroutineState {
    fn label(self) -> &'static str {
        match self {
            GoroutineState::Runnable => "running",
            GoroutineState::Panicking => "panicking",
            GoroutineState::Idle => "idle",
        }
    }
}

/// The panic a goroutine is unwinding.
#[derive(Debug, Clone)]
pub struct PanicState {
    pub fault: Fault,
    /// Set by `recover`; the frame that deferred the recovering call resumes
    /// once its remaining defers have run.
    pub recovered: bool,
    /// Goroutine dump taken when the panic was raised
    pub dump: String,
}

#[derive(Debug)]
pub struct Goroutine {
    pub id: GoroutineId,
    pub state: GoroutineState,
    pub stack: Vec<StackFrame>,
    pub panic: Option<PanicState>,
    /// Result of the bottom frame or of the last host frame
    pub result: Option<Value>,
}

impl Goroutine {
    fn new(id: GoroutineId) -> Self {
        Self {
            id,
            state: GoroutineState::Idle,
            stack: Vec::new(),
            panic: None,
            result: None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Exit {
    /// The entry frame returned this result
    Completed(Value),
    /// Nothing could make progress and the deadlock policy is `Return`
    Quiescent,
}

/// Counters collected while running.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedStats {
    pub passes: u64,
    pub steps: u64,
    pub blocked_steps: u64,
    pub goroutines_spawned: u64,
    pub frames_pushed: u64,
    pub max_live_goroutines: usize,
    pub panics_recovered: u64,
    pub channels_created: u64,
    pub dispatch_hits: u64,
    pub dispatch_misses: u64,
    pub objects_allocated: usize,
    pub bytes_allocated: usize,
    /// Invoke sites per cache state: uninitialized, mono, poly, mega
    pub inline_caches: [usize; 4],
}

impl fmt::Display for SchedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Scheduler Statistics ===")?;
        writeln!(f, "passes:              {}", self.passes)?;
        writeln!(
            f,
            "steps:               {} ({} blocked)",
            self.steps, self.blocked_steps
        )?;
        writeln!(f, "goroutines spawned:  {}", self.goroutines_spawned)?;
        writeln!(f, "max live goroutines: {}", self.max_live_goroutines)?;
        writeln!(f, "frames pushed:       {}", self.frames_pushed)?;
        writeln!(f, "panics recovered:    {}", self.panics_recovered)?;
        writeln!(f, "channels created:    {}", self.channels_created)?;
        writeln!(
            f,
            "dispatch memo:       {} hits, {} misses",
            self.dispatch_hits, self.dispatch_misses
        )?;
        let [uninit, mono, poly, mega] = self.inline_caches;
        writeln!(
            f,
            "inline caches:       {} mono, {} poly, {} mega, {} unused",
            mono, poly, mega, uninit
        )?;
        write!(
            f,
            "memory:              {} objects, {} bytes",
            self.objects_allocated, self.bytes_allocated
        )
    }
}

/// Linear congruential generator for the select start offset.
#[derive(Debug, Clone)]
pub struct SelectRng {
    state: u64,
}

impl SelectRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state >> 33
    }
}

/// One independent execution context: goroutines, channels, memory and
/// caches for a compiled program.
pub struct Runtime {
    pub(super) program: Rc<Program>,
    goroutines: Vec<Option<Goroutine>>,
    pub(super) memory: Memory,
    pub(super) channels: Vec<Channel>,
    pub(super) globals: Vec<Pointer>,
    pub(super) type_cache: TypeCache,
    pub(super) inline_caches: InlineCacheTable,
    pub(super) rng: SelectRng,
    pub(super) config: RuntimeConfig,
    pub(super) output: Box<dyn Write>,
    pub(super) stats: SchedStats,
    /// Goroutine being stepped
    pub(super) current: GoroutineId,
    activity: u64,
    main: Option<GoroutineId>,
}

impl Runtime {
    pub fn new(program: Rc<Program>, config: RuntimeConfig) -> Self {
        Self::with_output(program, config, Box::new(io::stdout()))
    }

    /// Create a runtime that writes `print`/`println` output to `output`.
    pub fn with_output(program: Rc<Program>, config: RuntimeConfig, output: Box<dyn Write>) -> Self {
        let mut memory = Memory::new();
        let globals = program
            .globals
            .iter()
            .map(|g| memory.alloc(g.size.max(1)))
            .collect();
        let inline_caches = InlineCacheTable::new(program.invoke_sites as usize);
        Self {
            type_cache: TypeCache::new(config.dispatch_cache),
            rng: SelectRng::new(config.select_seed),
            program,
            goroutines: vec![Some(Goroutine::new(0))],
            memory,
            channels: Vec::new(),
            globals,
            inline_caches,
            config,
            output,
            stats: SchedStats::default(),
            current: 0,
            activity: 0,
            main: None,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn goroutine(&self, gid: GoroutineId) -> Option<&Goroutine> {
        self.goroutines.get(gid as usize).and_then(Option::as_ref)
    }

    pub(super) fn goroutine_mut(&mut self, gid: GoroutineId) -> Option<&mut Goroutine> {
        self.goroutines.get_mut(gid as usize).and_then(Option::as_mut)
    }

    /// Number of goroutines with frames.
    pub fn live_goroutines(&self) -> usize {
        self.goroutines
            .iter()
            .flatten()
            .filter(|g| !g.stack.is_empty())
            .count()
    }

    pub(super) fn note_activity(&mut self) {
        self.activity += 1;
    }

    fn trace(&self, msg: fmt::Arguments<'_>) {
        if self.config.trace_scheduler {
            eprintln!("[sched] {}", msg);
        }
    }

    // ============================================================
    // Entry points
    // ============================================================

    /// Create a frame for `func` without running it.
    pub fn new_frame(&self, func: FuncId, args: Vec<Value>) -> Result<StackFrame, RuntimeError> {
        let f = self
            .program
            .function(func)
            .ok_or_else(|| RuntimeError::UnknownFunction(func.to_string()))?;
        if args.len() != f.num_params {
            return Err(RuntimeError::Arity {
                func: f.name.clone(),
                expected: f.num_params,
                got: args.len(),
            });
        }
        Ok(StackFrame::new(func, f, args, &[]))
    }

    /// Run `init` to quiescence on goroutine 0, then `main` on a fresh
    /// goroutine until its stack empties.
    pub fn run_main(&mut self) -> Result<Exit, RuntimeError> {
        let result = self.run_main_inner();
        self.output.flush()?;
        result
    }

    fn run_main_inner(&mut self) -> Result<Exit, RuntimeError> {
        let main = self.program.main.ok_or(RuntimeError::NoMain)?;
        if let Some(init) = self.program.init {
            let frame = self.new_frame(init, Vec::new())?;
            self.push_frame(0, frame)?;
            if !self.run_until(Some(0), |rt| rt.stack_empty(0))? {
                return Ok(Exit::Quiescent);
            }
        }
        let frame = self.new_frame(main, Vec::new())?;
        let gid = self.spawn(frame);
        self.main = Some(gid);
        if !self.run_until(None, |rt| rt.stack_empty(gid))? {
            return Ok(Exit::Quiescent);
        }
        Ok(Exit::Completed(self.take_result(gid)))
    }

    /// Call `func` on goroutine 0 and pump every goroutine until it returns.
    pub fn call_host(&mut self, func: FuncId, args: Vec<Value>) -> Result<Exit, RuntimeError> {
        let result = self.call_with(0, None, func, args);
        self.output.flush()?;
        result
    }

    /// Call `func` on top of goroutine `gid`, stepping only that goroutine.
    pub fn call_on(
        &mut self,
        gid: GoroutineId,
        func: FuncId,
        args: Vec<Value>,
    ) -> Result<Exit, RuntimeError> {
        let result = self.call_with(gid, Some(gid), func, args);
        self.output.flush()?;
        result
    }

    fn call_with(
        &mut self,
        gid: GoroutineId,
        only: Option<GoroutineId>,
        func: FuncId,
        args: Vec<Value>,
    ) -> Result<Exit, RuntimeError> {
        let frame = self.new_frame(func, args)?.with_role(FrameRole::Host);
        self.push_frame(gid, frame)?;
        if let Some(g) = self.goroutine_mut(gid) {
            g.result = None;
        }
        let done = |rt: &Runtime| rt.goroutine(gid).map_or(true, |g| g.result.is_some());
        if !self.run_until(only, done)? {
            return Ok(Exit::Quiescent);
        }
        Ok(Exit::Completed(self.take_result(gid)))
    }

    fn push_frame(&mut self, gid: GoroutineId, frame: StackFrame) -> Result<(), RuntimeError> {
        let g = self
            .goroutine_mut(gid)
            .ok_or(RuntimeError::NoGoroutine(gid))?;
        if g.state == GoroutineState::Idle {
            g.state = GoroutineState::Runnable;
        }
        g.stack.push(frame);
        self.stats.frames_pushed += 1;
        self.note_activity();
        Ok(())
    }

    fn take_result(&mut self, gid: GoroutineId) -> Value {
        self.goroutine_mut(gid)
            .and_then(|g| g.result.take())
            .unwrap_or_default()
    }

    fn stack_empty(&self, gid: GoroutineId) -> bool {
        self.goroutine(gid).map_or(true, |g| g.stack.is_empty())
    }

    /// Start a goroutine with `frame` at the lowest free id above 0.
    pub(super) fn spawn(&mut self, frame: StackFrame) -> GoroutineId {
        let slot = self
            .goroutines
            .iter()
            .skip(1)
            .position(Option::is_none)
            .map(|i| i + 1)
            .unwrap_or(self.goroutines.len());
        let gid = slot as GoroutineId;
        let name = self
            .program
            .function(frame.func)
            .map(|f| f.name.clone())
            .unwrap_or_default();
        let mut g = Goroutine::new(gid);
        g.state = GoroutineState::Runnable;
        g.stack.push(frame);
        if slot == self.goroutines.len() {
            self.goroutines.push(Some(g));
        } else {
            self.goroutines[slot] = Some(g);
        }
        self.stats.goroutines_spawned += 1;
        self.stats.frames_pushed += 1;
        self.stats.max_live_goroutines = self.stats.max_live_goroutines.max(self.live_goroutines());
        self.note_activity();
        self.trace(format_args!("spawn goroutine {} ({})", gid, name));
        gid
    }

    fn retire(&mut self, gid: GoroutineId) {
        self.trace(format_args!("goroutine {} exited", gid));
        if gid == 0 || Some(gid) == self.main {
            if let Some(g) = self.goroutine_mut(gid) {
                g.state = GoroutineState::Idle;
            }
        } else if let Some(slot) = self.goroutines.get_mut(gid as usize) {
            *slot = None;
        }
    }

    // ============================================================
    // Passes
    // ============================================================

    /// Run one pass over every goroutine. Returns whether anything
    /// progressed.
    pub fn run_pass(&mut self) -> Result<bool, RuntimeError> {
        self.pass(None)
    }

    fn pass(&mut self, only: Option<GoroutineId>) -> Result<bool, RuntimeError> {
        self.stats.passes += 1;
        let ids: Vec<GoroutineId> = self
            .goroutines
            .iter()
            .flatten()
            .filter(|g| g.state != GoroutineState::Idle && !g.stack.is_empty())
            .filter(|g| only.map_or(true, |id| id == g.id))
            .map(|g| g.id)
            .collect();
        let mut progress = false;
        for gid in ids {
            if self.step_goroutine(gid)? {
                progress = true;
            }
        }
        Ok(progress)
    }

    /// Run passes until `done` holds. Returns `false` when the run went
    /// quiescent under [`DeadlockPolicy::Return`].
    fn run_until(
        &mut self,
        only: Option<GoroutineId>,
        done: impl Fn(&Runtime) -> bool,
    ) -> Result<bool, RuntimeError> {
        let mut last_hash = None;
        loop {
            if done(self) {
                return Ok(true);
            }
            if let Some(limit) = self.config.max_passes {
                if self.stats.passes >= limit {
                    return Err(RuntimeError::PassLimit(limit));
                }
            }
            if self.pass(only)? {
                last_hash = None;
                continue;
            }
            let hash = self.state_hash();
            if last_hash == Some(hash) {
                self.trace(format_args!(
                    "no progress after pass {}; quiescent",
                    self.stats.passes
                ));
                return match self.config.deadlock {
                    DeadlockPolicy::Fail => Err(RuntimeError::Deadlock { dump: self.dump() }),
                    DeadlockPolicy::Return => Ok(false),
                };
            }
            last_hash = Some(hash);
        }
    }

    fn state_hash(&self) -> u64 {
        let mut h = DefaultHasher::new();
        for g in self.goroutines.iter().flatten() {
            g.id.hash(&mut h);
            g.state.hash(&mut h);
            for f in &g.stack {
                f.func.0.hash(&mut h);
                f.next.hash(&mut h);
                f.defers.len().hash(&mut h);
            }
        }
        for ch in &self.channels {
            ch.len().hash(&mut h);
            ch.is_closed().hash(&mut h);
        }
        self.activity.hash(&mut h);
        h.finish()
    }

    /// Step goroutine `gid` once. Returns whether it progressed.
    fn step_goroutine(&mut self, gid: GoroutineId) -> Result<bool, RuntimeError> {
        self.current = gid;
        let Some(g) = self.goroutine_mut(gid) else {
            return Ok(false);
        };
        if g.state == GoroutineState::Panicking && g.stack.last().is_some_and(|f| f.unwinding) {
            self.unwind_step(gid)?;
            return Ok(true);
        }
        let Some(mut frame) = g.stack.pop() else {
            return Ok(false);
        };
        self.stats.steps += 1;
        match self.step_frame(&mut frame) {
            Ok(Step::Yield) => {
                self.restore(gid, frame);
                Ok(true)
            }
            Ok(Step::Blocked) => {
                self.restore(gid, frame);
                self.stats.blocked_steps += 1;
                Ok(false)
            }
            Ok(Step::Call(callee)) => {
                self.restore(gid, frame);
                self.restore(gid, callee);
                self.stats.frames_pushed += 1;
                Ok(true)
            }
            Ok(Step::Return(v)) => {
                self.finish_frame(gid, frame, v);
                Ok(true)
            }
            Err(fault) => {
                self.raise(gid, frame, fault);
                Ok(true)
            }
        }
    }

    fn restore(&mut self, gid: GoroutineId, frame: StackFrame) {
        if let Some(g) = self.goroutine_mut(gid) {
            g.stack.push(frame);
        }
    }

    /// Deliver a finished frame's results.
    fn finish_frame(&mut self, gid: GoroutineId, frame: StackFrame, result: Value) {
        let Some(g) = self.goroutine_mut(gid) else {
            return;
        };
        match frame.role {
            FrameRole::Normal if !g.stack.is_empty() => {
                if let Some(caller) = g.stack.last_mut() {
                    caller.callee_results = Some(result);
                }
                return;
            }
            FrameRole::Deferred if !g.stack.is_empty() => return,
            _ => {}
        }
        g.result = Some(result);
        if g.stack.is_empty() {
            self.retire(gid);
        }
    }

    // ============================================================
    // Panics
    // ============================================================

    /// Start unwinding `frame` with `fault`. A newer panic replaces the
    /// current one.
    fn raise(&mut self, gid: GoroutineId, mut frame: StackFrame, fault: Fault) {
        frame.unwinding = true;
        self.restore(gid, frame);
        self.trace(format_args!(
            "goroutine {} panicking: {}",
            gid,
            fault.panic_message()
        ));
        let dump = self.dump();
        if let Some(g) = self.goroutine_mut(gid) {
            g.state = GoroutineState::Panicking;
            g.panic = Some(PanicState {
                fault,
                recovered: false,
                dump,
            });
        }
    }

    /// Run the next deferred call of the unwinding frame, or pop it.
    fn unwind_step(&mut self, gid: GoroutineId) -> Result<(), RuntimeError> {
        let program = Rc::clone(&self.program);
        let Some(g) = self.goroutine_mut(gid) else {
            return Ok(());
        };
        let Some(top) = g.stack.last_mut() else {
            return Ok(());
        };
        if let Some(deferred) = top.defers.pop() {
            g.stack.push(deferred.with_role(FrameRole::Deferred));
            self.stats.frames_pushed += 1;
            return Ok(());
        }
        let Some(mut frame) = g.stack.pop() else {
            return Ok(());
        };
        let recovered = g.panic.as_ref().is_some_and(|p| p.recovered);
        if recovered {
            g.state = GoroutineState::Runnable;
            g.panic = None;
            for f in &mut g.stack {
                f.unwinding = false;
            }
            frame.unwinding = false;
            self.stats.panics_recovered += 1;
            match frame.recover_point {
                Some(point) => {
                    frame.last_block = frame.next;
                    frame.next = point;
                    self.restore(gid, frame);
                }
                None => {
                    let zero = program
                        .function(frame.func)
                        .map(|f| f.zero_result.clone())
                        .unwrap_or_default();
                    self.finish_frame(gid, frame, zero);
                }
            }
            return Ok(());
        }
        if frame.role != FrameRole::Host {
            if let Some(caller) = g.stack.last_mut() {
                caller.unwinding = true;
                return Ok(());
            }
        }
        let panic = g.panic.take();
        // The goroutine stays usable for later host calls.
        g.state = if g.stack.is_empty() {
            GoroutineState::Idle
        } else {
            GoroutineState::Runnable
        };
        for f in &mut g.stack {
            f.unwinding = false;
        }
        let (message, dump) = match panic {
            Some(p) => (p.fault.panic_message(), p.dump),
            None => (String::from("unknown panic"), String::new()),
        };
        Err(RuntimeError::Panic {
            goroutine: gid,
            message,
            dump,
        })
    }

    // ============================================================
    // Introspection
    // ============================================================

    /// Render every live goroutine's frames.
    pub fn dump(&self) -> String {
        let mut out = Vec::new();
        for g in self.goroutines.iter().flatten() {
            if g.stack.is_empty() {
                continue;
            }
            let frames: Vec<FrameInfo> = g.stack.iter().map(|f| self.frame_info(f)).collect();
            out.push(format_goroutine(g.id, g.state.label(), &frames));
        }
        out.join("\n")
    }

    fn frame_info(&self, frame: &StackFrame) -> FrameInfo {
        let func = self.program.function(frame.func);
        let pos = func.and_then(|f| {
            f.block(frame.next)
                .and_then(|b| b.lines.first())
                .or(f.pos)
        });
        FrameInfo {
            function: func.map_or_else(|| frame.func.to_string(), |f| f.name.clone()),
            next: frame.next,
            position: pos.map(|p| self.program.format_pos(p)),
            deferred: frame.role == FrameRole::Deferred,
        }
    }

    pub fn stats(&self) -> SchedStats {
        SchedStats {
            dispatch_hits: self.type_cache.hits,
            dispatch_misses: self.type_cache.misses,
            objects_allocated: self.memory.object_count(),
            bytes_allocated: self.memory.bytes_allocated(),
            inline_caches: self.inline_caches.census(),
            ..self.stats.clone()
        }
    }
}
