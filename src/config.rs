//! Process-wide configuration read from the environment.
//!
//! Every knob is read once, at first access. Drivers that need different
//! settings per kernel should pass them explicitly (e.g. the `use`
//! argument of `apply_tensor_cores`) rather than mutate the environment.

use std::sync::OnceLock;

/// Optimizer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Debug verbosity (0 = silent).
    pub debug: u8,
    /// Which tensor core to try: -1 tries all in order.
    pub tc_select: i64,
    /// Tensor-core eligibility level (0..=2), see `apply_tensor_cores`.
    pub tc_opt: u8,
    /// Tensor-core mode used by a bare `TC` opt (1 = real WMMA,
    /// 2 = shape-only, 3 = emulated).
    pub use_tc: u8,
    /// Skip the hand-coded tensor-core follow-up opts.
    pub amx: bool,
    /// Record a replay entry for every rendered program.
    pub capture_process_replay: bool,
    /// Enable the matvec heuristic branch.
    pub mv: bool,
    pub mv_blocksize: usize,
    pub mv_threads_per_row: usize,
    pub mv_rows_per_thread: usize,
    /// Force NOLOCALS in the hand-coded heuristic.
    pub nolocals: bool,
    /// Emit the base AST for visualization before lowering.
    pub viz: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: 0,
            tc_select: -1,
            tc_opt: 0,
            use_tc: 1,
            amx: false,
            capture_process_replay: false,
            mv: true,
            mv_blocksize: 4,
            mv_threads_per_row: 8,
            mv_rows_per_thread: 4,
            nolocals: false,
            viz: false,
        }
    }
}

impl Config {
    /// Reads the configuration from the environment, falling back to the
    /// defaults above for unset or unparseable variables.
    pub fn from_env() -> Self {
        let d = Config::default();
        Self {
            debug: env_parse("DEBUG", d.debug),
            tc_select: env_parse("TC_SELECT", d.tc_select),
            tc_opt: env_parse("TC_OPT", d.tc_opt),
            use_tc: env_parse("USE_TC", d.use_tc),
            amx: env_flag("AMX", d.amx),
            capture_process_replay: env_flag("CAPTURE_PROCESS_REPLAY", d.capture_process_replay),
            mv: env_flag("MV", d.mv),
            mv_blocksize: env_parse("MV_BLOCKSIZE", d.mv_blocksize),
            mv_threads_per_row: env_parse("MV_THREADS_PER_ROW", d.mv_threads_per_row),
            mv_rows_per_thread: env_parse("MV_ROWS_PER_THREAD", d.mv_rows_per_thread),
            nolocals: env_flag("NOLOCALS", d.nolocals),
            viz: env_flag("VIZ", d.viz),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v != "0" && !v.is_empty(),
        Err(_) => default,
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Returns the process-wide configuration, reading the environment on
/// first use.
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}
