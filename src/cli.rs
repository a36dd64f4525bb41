// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `conrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "conrun",
    version,
    about = "Run shell commands concurrently under one supervisor.",
    long_about = None
)]
pub struct CliArgs {
    /// Commands to run, each as one argument (quote them).
    #[arg(value_name = "COMMAND", required = true)]
    pub commands: Vec<String>,

    /// Maximum number of processes to run at once (0 = unlimited).
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub max_processes: usize,

    /// Kill the other tasks when one finishes with these outcomes
    /// (comma-separated: success,failure).
    #[arg(long, value_name = "CONDITIONS", value_delimiter = ',')]
    pub kill_others_on: Vec<String>,

    /// How per-task outcomes reduce to the run result.
    #[arg(long, value_enum, value_name = "CONDITION", default_value_t = SuccessConditionArg::All)]
    pub success_condition: SuccessConditionArg,

    /// Skip tasks whose command or script cannot be found instead of
    /// failing the run.
    #[arg(long)]
    pub ignore_missing: bool,

    /// Print task output verbatim, with no prefix or color.
    #[arg(long)]
    pub raw: bool,

    /// Prefix style (index, pid, time, name, command, none) or a template
    /// with {index}/{pid}/{time}/{command}/{name} placeholders.
    #[arg(long, value_name = "TYPE|TEMPLATE")]
    pub prefix: Option<String>,

    /// Per-task prefix colors, comma-separated (named, #RRGGBB or
    /// rgb(r,g,b)); "auto" keeps the cycled color for that slot.
    #[arg(long, value_name = "COLORS", value_delimiter = ',')]
    pub prefix_colors: Vec<String>,

    /// Display names for the tasks, comma-separated, in command order.
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub names: Vec<String>,

    /// Working directory for every task.
    #[arg(long, value_name = "PATH")]
    pub cwd: Option<String>,

    /// Relaunch budget for each failing task.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub restart_tries: u32,

    /// Delay in milliseconds before a relaunch.
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub restart_delay: u64,

    /// Per-task timeout in milliseconds; past it the process is killed and
    /// reported with exit code 124.
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Resident-memory ceiling per task, in megabytes. Breaches are
    /// reported; combine with --enforce-limits to kill on breach.
    #[arg(long, value_name = "MB")]
    pub memory_limit: Option<u64>,

    /// CPU ceiling per task, in percent of one core.
    #[arg(long, value_name = "PERCENT")]
    pub cpu_limit: Option<f64>,

    /// Kill tasks that breach their resource ceilings instead of only
    /// reporting the breach.
    #[arg(long)]
    pub enforce_limits: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CONRUN_LOG` or a default level is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Success condition as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum, Default)]
pub enum SuccessConditionArg {
    #[default]
    All,
    First,
    Last,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
