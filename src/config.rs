//! Runtime and target configuration.

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// What to do when every goroutine is blocked and nothing can change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadlockPolicy {
    /// Report a deadlock error
    #[default]
    Fail,
    /// Stop quietly, as when the host drives the runtime
    Return,
}

/// Output format for scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsFormat {
    #[default]
    Human,
    Json,
}

/// Runtime configuration for the scheduler
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Trace scheduler passes and goroutine lifecycle events
    pub trace_scheduler: bool,
    pub deadlock: DeadlockPolicy,
    /// Hard limit on scheduler passes (None = unlimited)
    pub max_passes: Option<u64>,
    /// Seed for the select case shuffle
    pub select_seed: u64,
    /// Whether to memoize interface dispatch and use per-site inline caches
    pub dispatch_cache: bool,
    /// Print scheduler statistics after the run
    pub stats: Option<StatsFormat>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trace_scheduler: false,
            deadlock: DeadlockPolicy::Fail,
            max_passes: None,
            select_seed: 0x5eed,
            dispatch_cache: true,
            stats: None,
        }
    }
}

/// Capabilities of the code-generation target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetConfig {
    /// Whether 64-bit integers are native; otherwise they are emulated
    pub native_i64: bool,
    /// Trace compilation of each function
    pub trace_compile: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            native_i64: true,
            trace_compile: false,
        }
    }
}

/// `[runtime]` table of `gostep.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSettings {
    pub trace_scheduler: Option<bool>,
    pub deadlock: Option<DeadlockPolicy>,
    pub max_passes: Option<u64>,
    pub select_seed: Option<u64>,
    pub dispatch_cache: Option<bool>,
    pub stats: Option<StatsFormat>,
}

/// `[target]` table of `gostep.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSettings {
    pub native_i64: Option<bool>,
    pub trace_compile: Option<bool>,
}

/// Contents of a `gostep.toml` settings file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub target: TargetSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl Settings {
    /// Name of the settings file looked up next to a program.
    pub const FILE_NAME: &'static str = "gostep.toml";

    pub fn parse(text: &str, path: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Load `gostep.toml` from `dir` if present.
    pub fn discover(dir: &Path) -> Result<Option<Self>, ConfigError> {
        let path = dir.join(Self::FILE_NAME);
        if path.is_file() {
            Self::load(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Overlay the file's values onto `runtime` and `target`.
    pub fn apply(&self, runtime: &mut RuntimeConfig, target: &mut TargetConfig) {
        let r = &self.runtime;
        if let Some(v) = r.trace_scheduler {
            runtime.trace_scheduler = v;
        }
        if let Some(v) = r.deadlock {
            runtime.deadlock = v;
        }
        if r.max_passes.is_some() {
            runtime.max_passes = r.max_passes;
        }
        if let Some(v) = r.select_seed {
            runtime.select_seed = v;
        }
        if let Some(v) = r.dispatch_cache {
            runtime.dispatch_cache = v;
        }
        if r.stats.is_some() {
            runtime.stats = r.stats;
        }
        if let Some(v) = self.target.native_i64 {
            target.native_i64 = v;
        }
        if let Some(v) = self.target.trace_compile {
            target.trace_compile = v;
        }
    }
}
