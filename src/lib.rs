// src/lib.rs

//! Run shell commands as concurrent supervised child processes and reduce
//! their outcomes to one aggregate result.
//!
//! The crate is split into:
//! - [`supervise`]: one supervisor per child process (spawn, output
//!   capture, timeout, termination).
//! - [`orchestrate`]: the pure core state machine plus its async IO shell
//!   (admission, kill policy, retries, success evaluation).
//! - [`output`]: stable per-task colors and prefix rendering.
//! - [`errors`] and [`shutdown`]: the typed error taxonomy, fault log, and
//!   graceful-shutdown sequence.
//!
//! Embedders call [`run_commands`]; the CLI binary goes through [`run`].

pub mod cli;
pub mod errors;
pub mod logging;
pub mod orchestrate;
pub mod output;
pub mod resolve;
pub mod shutdown;
pub mod supervise;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::cli::{CliArgs, SuccessConditionArg};
use crate::errors::{ConrunError, FaultLog, Result, Severity};
use crate::orchestrate::{CoreOrchestrator, OrchestratorEvent, RealSpawner, Runtime};
use crate::orchestrate::runtime::event_channel;
use crate::output::colors::validate_color;
use crate::resolve::{CommandResolver, ShellResolver};
use crate::shutdown::ShutdownCoordinator;
use crate::types::{RunPolicy, RunSummary, SuccessCondition, TaskDescriptor, TaskSpec};

/// High-level entry point used by `main.rs`. Returns the process exit
/// code: 0 iff the run succeeded.
pub async fn run(args: CliArgs) -> Result<i32> {
    let (descriptors, policy) = plan_from_args(&args)?;

    let fault = Arc::new(FaultLog::new());
    let summary = run_with(descriptors, policy, Arc::new(ShellResolver), fault, true).await?;

    for task in &summary.tasks {
        match task.exit_code {
            Some(0) => {}
            Some(code) => warn!(task = %task.id, exit_code = code, "task failed"),
            None => {}
        }
    }
    Ok(if summary.success { 0 } else { 1 })
}

/// Programmatic API: run `descriptors` under `policy` and return the
/// aggregate summary.
pub async fn run_commands(
    descriptors: Vec<TaskDescriptor>,
    policy: RunPolicy,
) -> Result<RunSummary> {
    let fault = Arc::new(FaultLog::new());
    run_with(descriptors, policy, Arc::new(ShellResolver), fault, false).await
}

/// Shared wiring behind [`run`] and [`run_commands`].
///
/// `with_signals` additionally routes SIGINT/SIGTERM/SIGHUP into the event
/// loop as a shutdown request (CLI runs only; embedders own their signal
/// handling).
pub async fn run_with(
    descriptors: Vec<TaskDescriptor>,
    policy: RunPolicy,
    resolver: Arc<dyn CommandResolver>,
    fault: Arc<FaultLog>,
    with_signals: bool,
) -> Result<RunSummary> {
    // Strict CLI-level color validation happens before anything spawns.
    for color in &policy.prefix_colors {
        if color != "auto" {
            validate_color(color)?;
        }
    }

    let specs: Vec<TaskSpec> = descriptors
        .into_iter()
        .enumerate()
        .map(|(index, d)| d.into_spec(index))
        .collect();

    let grace = policy.grace;
    let core = CoreOrchestrator::new(specs, policy)?;

    let (events_tx, events_rx) = event_channel();
    let backend = RealSpawner::new(events_tx.clone(), resolver, Arc::clone(&fault), grace);

    let coordinator = Arc::new(ShutdownCoordinator::default());
    {
        let tx = events_tx.clone();
        coordinator.register("terminate-live-tasks", move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(OrchestratorEvent::ShutdownRequested).await;
            }
        });
    }

    if with_signals {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            if let Err(e) = shutdown::wait_for_shutdown_signal().await {
                error!(error = %e, "failed to listen for termination signals");
                return;
            }
            info!("termination signal received");
            coordinator.shutdown().await;
        });
    }

    let runtime = Runtime::new(core, events_rx, events_tx, backend)?;
    let summary = runtime.run().await?;

    if fault.has_critical() {
        // Critical faults (security violations, resource exhaustion) end
        // the run through the same bounded sequence a signal would.
        coordinator.shutdown().await;
    }
    Ok(summary)
}

/// Build descriptors and a [`RunPolicy`] from parsed CLI arguments.
fn plan_from_args(args: &CliArgs) -> Result<(Vec<TaskDescriptor>, RunPolicy)> {
    let mut kill_others_on = Vec::new();
    for raw in &args.kill_others_on {
        kill_others_on.push(raw.parse().map_err(ConrunError::Cli)?);
    }

    let success_condition = match args.success_condition {
        SuccessConditionArg::All => SuccessCondition::All,
        SuccessConditionArg::First => SuccessCondition::First,
        SuccessConditionArg::Last => SuccessCondition::Last,
    };

    let policy = RunPolicy {
        max_processes: args.max_processes,
        kill_others_on,
        success_condition,
        ignore_missing: args.ignore_missing,
        raw: args.raw,
        prefix: args.prefix.clone(),
        prefix_colors: args.prefix_colors.clone(),
        enforce_limits: args.enforce_limits,
        ..RunPolicy::default()
    };

    if !args.names.is_empty() && args.names.len() != args.commands.len() {
        return Err(ConrunError::Cli(format!(
            "--names lists {} names for {} commands",
            args.names.len(),
            args.commands.len()
        )));
    }

    let descriptors = args
        .commands
        .iter()
        .enumerate()
        .map(|(index, command)| {
            let mut spec = TaskSpec::shell(command);
            if let Some(name) = args.names.get(index) {
                spec.id = name.clone();
            }
            spec.cwd = args.cwd.as_ref().map(PathBuf::from);
            spec.restart_tries = args.restart_tries;
            spec.restart_delay = Duration::from_millis(args.restart_delay);
            spec.timeout = args.timeout.map(Duration::from_millis);
            spec.memory_limit = args.memory_limit.map(|mb| mb * 1024 * 1024);
            spec.cpu_limit = args.cpu_limit;
            TaskDescriptor::Detailed(spec)
        })
        .collect();

    Ok((descriptors, policy))
}

/// Record a classified error against the fault log and, when critical, run
/// the shutdown sequence. Exposed for embedders wiring their own loops.
pub async fn record_and_escalate(
    fault: &FaultLog,
    coordinator: &ShutdownCoordinator,
    err: &ConrunError,
    context: &str,
) {
    if fault.record(err, context) == Severity::Critical {
        coordinator.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(argv: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(argv).expect("argv parses")
    }

    #[test]
    fn plan_maps_flags_onto_policy() {
        let args = parse(&[
            "conrun",
            "--max-processes",
            "2",
            "--kill-others-on",
            "failure",
            "--success-condition",
            "first",
            "--ignore-missing",
            "echo a",
            "echo b",
        ]);
        let (descriptors, policy) = plan_from_args(&args).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(policy.max_processes, 2);
        assert_eq!(policy.kill_others_on, vec![types::KillCondition::Failure]);
        assert_eq!(policy.success_condition, SuccessCondition::First);
        assert!(policy.ignore_missing);
    }

    #[test]
    fn multi_value_flags_do_not_swallow_commands() {
        // A flag followed directly by a positional: the flag takes exactly
        // one (comma-separable) value and the command survives.
        let args = parse(&["conrun", "--kill-others-on", "failure", "echo a"]);
        assert_eq!(args.commands, vec!["echo a"]);
        assert_eq!(args.kill_others_on, vec!["failure"]);

        let args = parse(&[
            "conrun",
            "--names",
            "web,db",
            "--prefix-colors",
            "red,blue",
            "npm start",
            "postgres",
        ]);
        assert_eq!(args.commands, vec!["npm start", "postgres"]);
        assert_eq!(args.names, vec!["web", "db"]);
        assert_eq!(args.prefix_colors, vec!["red", "blue"]);
    }

    #[test]
    fn plan_rejects_bad_kill_condition() {
        let args = parse(&["conrun", "--kill-others-on", "sometimes", "echo a"]);
        assert!(matches!(
            plan_from_args(&args),
            Err(ConrunError::Cli(_))
        ));
    }

    #[test]
    fn names_must_match_command_count() {
        let args = parse(&["conrun", "--names", "a,b,c", "echo 1", "echo 2"]);
        assert!(plan_from_args(&args).is_err());
    }

    #[test]
    fn names_and_timeouts_land_on_specs() {
        let args = parse(&[
            "conrun",
            "--names",
            "web,db",
            "--timeout",
            "5000",
            "--restart-tries",
            "2",
            "--memory-limit",
            "256",
            "--cpu-limit",
            "150",
            "npm start",
            "postgres",
        ]);
        let (descriptors, _) = plan_from_args(&args).unwrap();
        let spec = match &descriptors[0] {
            TaskDescriptor::Detailed(s) => s.clone(),
            _ => unreachable!(),
        };
        assert_eq!(spec.id, "web");
        assert_eq!(spec.timeout, Some(Duration::from_millis(5000)));
        assert_eq!(spec.restart_tries, 2);
        assert_eq!(spec.memory_limit, Some(256 * 1024 * 1024));
        assert_eq!(spec.cpu_limit, Some(150.0));
    }
}
