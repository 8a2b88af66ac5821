use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use gostep::compiler::{self, Error};
use gostep::{DeadlockPolicy, RuntimeConfig, RuntimeError, SchedStats, Settings, StatsFormat, TargetConfig};

// Wrapper types for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum DeadlockArg {
    #[default]
    Fail,
    Return,
}

impl From<DeadlockArg> for DeadlockPolicy {
    fn from(arg: DeadlockArg) -> Self {
        match arg {
            DeadlockArg::Fail => DeadlockPolicy::Fail,
            DeadlockArg::Return => DeadlockPolicy::Return,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum StatsFormatArg {
    #[default]
    Human,
    Json,
}

impl From<StatsFormatArg> for StatsFormat {
    fn from(arg: StatsFormatArg) -> Self {
        match arg {
            StatsFormatArg::Human => StatsFormat::Human,
            StatsFormatArg::Json => StatsFormat::Json,
        }
    }
}

#[derive(Parser)]
#[command(name = "gostep")]
#[command(about = "Run Go SSA programs as resumable state machines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand that compiles.
#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// Settings file (defaults to gostep.toml next to the program)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Emulate 64-bit integers as pairs of 32-bit words
    #[arg(long)]
    wide_ints: bool,

    /// Trace compilation of each function
    #[arg(long)]
    trace_compile: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a JSON SSA program
    Run {
        /// The program to run
        file: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Trace scheduler passes and goroutine events
        #[arg(long)]
        trace_sched: bool,

        /// Seed for select case choice
        #[arg(long)]
        seed: Option<u64>,

        /// Stop after this many scheduler passes
        #[arg(long)]
        max_passes: Option<u64>,

        /// What to do when all goroutines are blocked (fail, return)
        #[arg(long, value_enum)]
        deadlock: Option<DeadlockArg>,

        /// Disable the interface dispatch caches
        #[arg(long)]
        no_dispatch_cache: bool,

        /// Print scheduler statistics (human or json format)
        #[arg(long, value_enum, require_equals = true, num_args = 0..=1, default_missing_value = "human")]
        stats: Option<StatsFormatArg>,

        /// Print the emitted code to stderr before running
        #[arg(long)]
        dump_code: bool,
    },
    /// Print the emitted (block id, code) pairs of every function
    Dump {
        /// The program to compile
        file: PathBuf,

        #[command(flatten)]
        target: TargetArgs,
    },
    /// Compile a program without running it
    Check {
        /// The program to compile
        file: PathBuf,

        #[command(flatten)]
        target: TargetArgs,
    },
}

/// Resolve configuration: defaults, then gostep.toml, then flags.
fn load_config(file: &Path, args: &TargetArgs) -> Result<(RuntimeConfig, TargetConfig), Error> {
    let mut runtime = RuntimeConfig::default();
    let mut target = TargetConfig::default();
    let settings = match &args.config {
        Some(path) => Some(Settings::load(path)?),
        None => {
            let dir = file.parent().unwrap_or(Path::new("."));
            let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
            Settings::discover(dir)?
        }
    };
    if let Some(settings) = settings {
        settings.apply(&mut runtime, &mut target);
    }
    if args.wide_ints {
        target.native_i64 = false;
    }
    if args.trace_compile {
        target.trace_compile = true;
    }
    Ok((runtime, target))
}

fn print_stats(stats: &SchedStats, format: StatsFormat) {
    match format {
        StatsFormat::Human => eprintln!("{}", stats),
        StatsFormat::Json => match serde_json::to_string_pretty(stats) {
            Ok(json) => eprintln!("{}", json),
            Err(e) => eprintln!("error: {}", e),
        },
    }
}

fn report(e: &Error) -> ExitCode {
    eprintln!("{}", e);
    match e {
        // Exit status Go uses for these.
        Error::Runtime(RuntimeError::Panic { .. } | RuntimeError::Deadlock { .. }) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            target,
            trace_sched,
            seed,
            max_passes,
            deadlock,
            no_dispatch_cache,
            stats,
            dump_code,
        } => {
            let (mut config, target) = match load_config(&file, &target) {
                Ok(c) => c,
                Err(e) => return report(&e),
            };
            if trace_sched {
                config.trace_scheduler = true;
            }
            if let Some(seed) = seed {
                config.select_seed = seed;
            }
            if max_passes.is_some() {
                config.max_passes = max_passes;
            }
            if let Some(d) = deadlock {
                config.deadlock = d.into();
            }
            if no_dispatch_cache {
                config.dispatch_cache = false;
            }
            if let Some(s) = stats {
                config.stats = Some(s.into());
            }

            let program = match compiler::compile_file(&file, &target) {
                Ok(p) => p,
                Err(e) => return report(&e),
            };
            if dump_code {
                eprint!("{}", compiler::format_program(&program));
            }
            let stats_format = config.stats;
            match compiler::run_program(program, config) {
                Ok((_, stats)) => {
                    if let Some(format) = stats_format {
                        print_stats(&stats, format);
                    }
                }
                Err(e) => return report(&e),
            }
        }
        Commands::Dump { file, target } => {
            let result =
                load_config(&file, &target).and_then(|(_, target)| compiler::dump_file(&file, &target));
            match result {
                Ok(listing) => print!("{}", listing),
                Err(e) => return report(&e),
            }
        }
        Commands::Check { file, target } => {
            let result =
                load_config(&file, &target).and_then(|(_, target)| compiler::check_file(&file, &target));
            match result {
                Ok(program) => {
                    let suspendable = program
                        .functions
                        .iter()
                        .filter(|f| f.kind == gostep::vm::FrameKind::Suspendable)
                        .count();
                    println!(
                        "Compile check passed: {} functions ({} suspendable).",
                        program.functions.len(),
                        suspendable
                    );
                }
                Err(e) => return report(&e),
            }
        }
    }

    ExitCode::SUCCESS
}
