//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "feeder", version, about = "Feed dispenser CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/feeder.toml")]
    pub config: PathBuf,

    /// Optional calibration CSV (strict 'raw,kg' header)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Control loop tick interval in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 5)]
    pub tick_ms: u64,

    /// Simulated hopper start mass (simulation builds only)
    #[arg(long, value_name = "KG", default_value_t = 1.0)]
    pub sim_initial_kg: f32,

    /// Simulated dispense rate while the motor runs (simulation builds only)
    #[arg(long, value_name = "KG_PER_S", default_value_t = 0.25)]
    pub sim_flow_kg_s: f32,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispense the fixed manual ration now
    Manual {
        /// Override the feeding timeout in ms (takes precedence over config)
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
        /// Enable real-time mode (SCHED_FIFO + mlockall, Linux only)
        #[arg(long, action = ArgAction::SetTrue)]
        rt: bool,
        /// SCHED_FIFO priority when --rt is enabled
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,
    },
    /// Dispense a scheduled ration of the given mass
    Schedule {
        /// Target kilograms to dispense
        #[arg(long)]
        kg: f32,
        /// Override the feeding timeout in ms (takes precedence over config)
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
        /// Enable real-time mode (SCHED_FIFO + mlockall, Linux only)
        #[arg(long, action = ArgAction::SetTrue)]
        rt: bool,
        /// SCHED_FIFO priority when --rt is enabled
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,
    },
    /// Quick health check (hardware presence / sim ok)
    SelfCheck,
}
