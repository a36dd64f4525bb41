// tests/process_integration.rs

//! End-to-end runs through the public `run_commands` entry point, with real
//! shell children.

#![cfg(unix)]

mod common;
use crate::common::init_tracing;

use std::error::Error;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use conrun::run_commands;
use conrun::types::{RunPolicy, RunState, SuccessCondition, TaskDescriptor};
use conrun_test_utils::{RunPolicyBuilder, TaskSpecBuilder};

type TestResult = Result<(), Box<dyn Error>>;

const RUN_BOUND: Duration = Duration::from_secs(10);

fn shell(cmd: &str) -> TaskDescriptor {
    TaskDescriptor::Simple(cmd.to_string())
}

#[tokio::test]
async fn concurrent_tasks_report_their_own_exit_codes() -> TestResult {
    init_tracing();

    let summary = timeout(
        RUN_BOUND,
        run_commands(vec![shell("exit 0"), shell("exit 1")], RunPolicy::default()),
    )
    .await??;

    assert!(!summary.success);
    assert_eq!(summary.state, RunState::Failed);
    assert_eq!(summary.tasks[0].exit_code, Some(0));
    assert_eq!(summary.tasks[1].exit_code, Some(1));
    Ok(())
}

#[tokio::test]
async fn first_condition_is_decided_by_the_fast_failure() -> TestResult {
    init_tracing();

    let policy = RunPolicyBuilder::new()
        .success_condition(SuccessCondition::First)
        .build();
    let summary = timeout(
        RUN_BOUND,
        run_commands(vec![shell("sleep 0.4 && exit 0"), shell("exit 1")], policy),
    )
    .await??;

    // `exit 1` finishes long before the sleeper, so it is the first
    // terminal task.
    assert!(!summary.success);
    Ok(())
}

#[tokio::test]
async fn last_condition_is_decided_by_the_slow_success() -> TestResult {
    init_tracing();

    let policy = RunPolicyBuilder::new()
        .success_condition(SuccessCondition::Last)
        .build();
    let summary = timeout(
        RUN_BOUND,
        run_commands(vec![shell("exit 1"), shell("sleep 0.3")], policy),
    )
    .await??;

    assert!(summary.success);
    Ok(())
}

#[tokio::test]
async fn per_task_timeout_caps_the_run() -> TestResult {
    init_tracing();

    let slow = TaskSpecBuilder::new("slow", "sleep 10")
        .timeout(Duration::from_millis(100))
        .build();

    let started = Instant::now();
    let summary = timeout(
        RUN_BOUND,
        run_commands(vec![TaskDescriptor::Detailed(slow)], RunPolicy::default()),
    )
    .await??;

    assert!(!summary.success);
    assert_eq!(summary.tasks[0].exit_code, Some(124));
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[tokio::test]
async fn spawn_failures_do_not_burn_retry_budget() -> TestResult {
    init_tracing();

    // Direct mode with a nonexistent program: resolution fails, so the
    // retry budget is never consulted and the run ends immediately.
    let spec = TaskSpecBuilder::new("ghost", "conrun-definitely-not-a-program")
        .restart_tries(3)
        .direct()
        .build();

    let started = Instant::now();
    let summary = timeout(
        RUN_BOUND,
        run_commands(vec![TaskDescriptor::Detailed(spec)], RunPolicy::default()),
    )
    .await??;

    assert!(!summary.success);
    assert_eq!(summary.tasks[0].exit_code, Some(127));
    assert!(started.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[tokio::test]
async fn ignore_missing_skips_unresolvable_tasks() -> TestResult {
    init_tracing();

    let ghost = TaskSpecBuilder::new("ghost", "conrun-definitely-not-a-program")
        .direct()
        .build();

    let policy = RunPolicyBuilder::new().ignore_missing().build();
    let summary = timeout(
        RUN_BOUND,
        run_commands(
            vec![TaskDescriptor::Detailed(ghost), shell("exit 0")],
            policy,
        ),
    )
    .await??;

    assert!(summary.success);
    assert_eq!(summary.tasks[0].exit_code, None);
    assert_eq!(summary.tasks[1].exit_code, Some(0));
    Ok(())
}

#[tokio::test]
async fn huge_batch_of_unresolvable_commands_still_completes() -> TestResult {
    init_tracing();

    // Every resolution fails, so each admitted task reports back
    // immediately; with unlimited admission the whole batch is dispatched
    // in one spawn command. Far more tasks than the event channel holds
    // must not wedge the run.
    let descriptors: Vec<TaskDescriptor> = (0..300)
        .map(|i| {
            TaskDescriptor::Detailed(
                TaskSpecBuilder::new(&format!("ghost-{i}"), "conrun-definitely-not-a-program")
                    .direct()
                    .build(),
            )
        })
        .collect();

    let policy = RunPolicyBuilder::new().ignore_missing().build();
    let summary = timeout(RUN_BOUND, run_commands(descriptors, policy)).await??;

    assert!(summary.success);
    assert_eq!(summary.tasks.len(), 300);
    assert!(summary.tasks.iter().all(|t| t.exit_code.is_none()));
    Ok(())
}

#[tokio::test]
async fn invalid_prefix_color_fails_before_anything_spawns() -> TestResult {
    init_tracing();

    let mut policy = RunPolicy::default();
    policy.prefix_colors = vec!["notacolor".to_string()];

    let err = run_commands(vec![shell("exit 0")], policy).await.unwrap_err();
    assert!(matches!(err, conrun::errors::ConrunError::Cli(_)));
    Ok(())
}
