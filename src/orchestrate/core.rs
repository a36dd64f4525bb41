// src/orchestrate/core.rs

//! Pure orchestrator state machine.
//!
//! Consumes [`OrchestratorEvent`]s and produces [`CoreStep`]s describing
//! what the IO shell should do next: spawn attempts, terminate siblings,
//! schedule retry timers. It holds no channels and no tokio types and is
//! unit tested without any processes.
//!
//! Semantics owned here:
//! - admission control under `max_processes` (FIFO, 0 = unlimited)
//! - kill-policy propagation and the Aborted state
//! - retry budgets and delays
//! - `ignore_missing` skips
//! - success-condition evaluation over final per-task outcomes

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{ConrunError, Result};
use crate::types::{
    KillCondition, ProcessOutcome, ProcessStatus, RunPolicy, RunState, RunSummary,
    SuccessCondition, TaskResult, TaskSpec,
};

use super::{AttemptSpec, CoreCommand, CoreStep, OrchestratorEvent};

/// Final record of one task, reflecting its last attempt.
#[derive(Debug, Clone)]
struct TaskFinal {
    exit_code: Option<i32>,
    duration: Duration,
    skipped: bool,
}

#[derive(Debug)]
pub struct CoreOrchestrator {
    specs: Vec<Arc<TaskSpec>>,
    policy: RunPolicy,
    /// Task indexes not yet admitted, in original order.
    pending: VecDeque<usize>,
    /// Indexes with a live supervisor.
    live: HashSet<usize>,
    /// Indexes waiting out a retry delay.
    waiting_retry: HashSet<usize>,
    /// Last failed outcome of a task currently waiting to retry; promoted
    /// to its final record if the run aborts before the relaunch.
    deferred: HashMap<usize, TaskFinal>,
    retries_left: Vec<u32>,
    attempts: Vec<u32>,
    finals: Vec<Option<TaskFinal>>,
    /// Indexes in the order their *final* terminal state was reached.
    completion_order: Vec<usize>,
    started: bool,
    aborted: bool,
}

impl CoreOrchestrator {
    /// Validates and normalizes the task list. Zero tasks is a validation
    /// error: nothing would ever spawn.
    pub fn new(specs: Vec<TaskSpec>, policy: RunPolicy) -> Result<Self> {
        if specs.is_empty() {
            return Err(ConrunError::Validation(
                "no tasks supplied; nothing to run".into(),
            ));
        }
        let count = specs.len();
        Ok(Self {
            retries_left: specs.iter().map(|s| s.restart_tries).collect(),
            specs: specs.into_iter().map(Arc::new).collect(),
            policy,
            pending: (0..count).collect(),
            live: HashSet::new(),
            waiting_retry: HashSet::new(),
            deferred: HashMap::new(),
            attempts: vec![0; count],
            finals: vec![None; count],
            completion_order: Vec::new(),
            started: false,
            aborted: false,
        })
    }

    pub fn specs(&self) -> &[Arc<TaskSpec>] {
        &self.specs
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    /// Begin the run: admit the first wave of tasks.
    pub fn start(&mut self) -> CoreStep {
        self.started = true;
        let mut commands = Vec::new();
        self.admit(&mut commands);
        self.step_from(commands)
    }

    /// Handle a single event, updating state and returning the commands the
    /// IO shell should execute.
    pub fn step(&mut self, event: OrchestratorEvent) -> CoreStep {
        match event {
            OrchestratorEvent::Finished { index, outcome, .. } => {
                self.handle_finished(index, outcome)
            }
            OrchestratorEvent::SpawnFailed {
                index, missing, ..
            } => self.handle_spawn_failed(index, missing),
            OrchestratorEvent::RetryDue { index } => self.handle_retry_due(index),
            OrchestratorEvent::ShutdownRequested => self.handle_shutdown(),
            OrchestratorEvent::ResourceBreach { index, .. } => {
                let mut commands = Vec::new();
                if self.policy.enforce_limits && self.live.contains(&index) {
                    commands.push(CoreCommand::Terminate { index });
                }
                self.step_from(commands)
            }
            // Output rendering and pid bookkeeping happen in the shell.
            OrchestratorEvent::Started { .. } | OrchestratorEvent::Output(_) => {
                self.step_from(Vec::new())
            }
        }
    }

    /// True once every task is terminal (or the abort drained the rest).
    pub fn is_done(&self) -> bool {
        self.started
            && self.live.is_empty()
            && self.pending.is_empty()
            && self.waiting_retry.is_empty()
    }

    pub fn state(&self) -> RunState {
        if !self.started {
            RunState::Pending
        } else if !self.is_done() {
            RunState::Running
        } else if self.aborted {
            RunState::Aborted
        } else if self.evaluate_success() {
            RunState::Succeeded
        } else {
            RunState::Failed
        }
    }

    /// Aggregate result; call once the run is done.
    pub fn summary(&self) -> RunSummary {
        let tasks = self
            .specs
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let last = self.finals[index].as_ref();
                TaskResult {
                    id: spec.id.clone(),
                    index,
                    exit_code: last.and_then(|f| f.exit_code),
                    duration: last.map(|f| f.duration).unwrap_or(Duration::ZERO),
                }
            })
            .collect();

        RunSummary {
            success: self.evaluate_success(),
            tasks,
            state: self.state(),
        }
    }

    fn handle_finished(&mut self, index: usize, outcome: ProcessOutcome) -> CoreStep {
        self.live.remove(&index);
        let mut commands = Vec::new();

        let success = outcome.is_success();
        let kill_triggered = !self.aborted
            && ((success && self.policy.kills_on(KillCondition::Success))
                || (!success && self.policy.kills_on(KillCondition::Failure)));

        if kill_triggered {
            self.record_final(index, Some(outcome.exit_code), outcome.duration);
            self.abort_outstanding(&mut commands);
            return self.step_from(commands);
        }

        let retryable = !self.aborted
            && outcome.status == ProcessStatus::Failed
            && !outcome.timed_out
            && !outcome.terminated
            && self.retries_left[index] > 0;

        if retryable {
            self.retries_left[index] -= 1;
            self.waiting_retry.insert(index);
            self.deferred.insert(
                index,
                TaskFinal {
                    exit_code: Some(outcome.exit_code),
                    duration: outcome.duration,
                    skipped: false,
                },
            );
            commands.push(CoreCommand::ScheduleRetry {
                index,
                delay: self.specs[index].restart_delay,
            });
            // The slot this attempt held is free while the delay runs.
            self.admit(&mut commands);
            return self.step_from(commands);
        }

        self.record_final(index, Some(outcome.exit_code), outcome.duration);
        self.admit(&mut commands);
        self.step_from(commands)
    }

    fn handle_spawn_failed(&mut self, index: usize, missing: bool) -> CoreStep {
        self.live.remove(&index);
        let mut commands = Vec::new();

        if missing && self.policy.ignore_missing {
            // Skip: keeps its summary slot, does not count as a failure and
            // does not enter the completion order.
            self.finals[index] = Some(TaskFinal {
                exit_code: None,
                duration: Duration::ZERO,
                skipped: true,
            });
            self.admit(&mut commands);
            return self.step_from(commands);
        }

        // 127 is the shell convention for command-not-found, 126 for
        // found-but-not-runnable.
        let code = if missing { 127 } else { 126 };
        self.record_final(index, Some(code), Duration::ZERO);

        if !self.aborted && self.policy.kills_on(KillCondition::Failure) {
            self.abort_outstanding(&mut commands);
        } else {
            self.admit(&mut commands);
        }
        self.step_from(commands)
    }

    fn handle_retry_due(&mut self, index: usize) -> CoreStep {
        let mut commands = Vec::new();
        if !self.aborted && self.waiting_retry.remove(&index) {
            self.deferred.remove(&index);
            if self.live.len() < self.capacity() {
                let attempt = self.launch(index);
                commands.push(CoreCommand::Spawn(vec![attempt]));
            } else {
                // All slots busy again; relaunch ahead of never-started
                // tasks.
                self.pending.push_front(index);
            }
        }
        self.step_from(commands)
    }

    fn handle_shutdown(&mut self) -> CoreStep {
        let mut commands = Vec::new();
        if !self.is_done() {
            self.abort_outstanding(&mut commands);
        }
        self.step_from(commands)
    }

    fn step_from(&self, commands: Vec<CoreCommand>) -> CoreStep {
        if self.is_done() {
            CoreStep::finished(commands)
        } else {
            CoreStep::running(commands)
        }
    }

    fn capacity(&self) -> usize {
        if self.policy.max_processes == 0 {
            usize::MAX
        } else {
            self.policy.max_processes
        }
    }

    fn launch(&mut self, index: usize) -> AttemptSpec {
        self.attempts[index] += 1;
        self.live.insert(index);
        AttemptSpec {
            spec: Arc::clone(&self.specs[index]),
            index,
            attempt: self.attempts[index],
        }
    }

    /// Admit queued tasks up to the concurrency bound, in original order.
    fn admit(&mut self, commands: &mut Vec<CoreCommand>) {
        let mut batch = Vec::new();
        while self.live.len() < self.capacity() {
            let Some(index) = self.pending.pop_front() else {
                break;
            };
            batch.push(self.launch(index));
        }
        if !batch.is_empty() {
            commands.push(CoreCommand::Spawn(batch));
        }
    }

    fn record_final(&mut self, index: usize, exit_code: Option<i32>, duration: Duration) {
        self.finals[index] = Some(TaskFinal {
            exit_code,
            duration,
            skipped: false,
        });
        self.completion_order.push(index);
    }

    /// Kill-policy or shutdown trigger: stop admitting, cancel pending
    /// retries (promoting their deferred outcomes to finals), terminate
    /// everything still live.
    fn abort_outstanding(&mut self, commands: &mut Vec<CoreCommand>) {
        self.aborted = true;
        self.pending.clear();
        let waiting: Vec<usize> = self.waiting_retry.drain().collect();
        for index in waiting {
            if let Some(last) = self.deferred.remove(&index) {
                self.finals[index] = Some(last);
                self.completion_order.push(index);
            }
        }
        if !self.live.is_empty() {
            commands.push(CoreCommand::TerminateAll);
        }
    }

    fn evaluate_success(&self) -> bool {
        match self.policy.success_condition {
            SuccessCondition::All => self.finals.iter().all(|f| match f {
                Some(f) if f.skipped => true,
                Some(f) => f.exit_code == Some(0),
                // Never admitted (aborted run): not a success.
                None => false,
            }),
            SuccessCondition::First => self.order_success(self.completion_order.first()),
            SuccessCondition::Last => self.order_success(self.completion_order.last()),
        }
    }

    fn order_success(&self, slot: Option<&usize>) -> bool {
        match slot {
            Some(&index) => {
                self.finals[index]
                    .as_ref()
                    .map(|f| f.exit_code == Some(0))
                    .unwrap_or(false)
            }
            // Nothing ever completed: vacuously successful only when every
            // task was skipped.
            None => self
                .finals
                .iter()
                .all(|f| matches!(f, Some(f) if f.skipped)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> TaskSpec {
        let mut s = TaskSpec::shell(&format!("echo {id}"));
        s.id = id.to_string();
        s
    }

    fn outcome(exit_code: i32) -> ProcessOutcome {
        ProcessOutcome {
            status: if exit_code == 0 {
                ProcessStatus::Completed
            } else {
                ProcessStatus::Failed
            },
            exit_code,
            timed_out: false,
            terminated: false,
            duration: Duration::from_millis(5),
        }
    }

    fn killed_outcome(exit_code: i32) -> ProcessOutcome {
        ProcessOutcome {
            status: ProcessStatus::Killed,
            exit_code,
            timed_out: false,
            terminated: true,
            duration: Duration::from_millis(5),
        }
    }

    fn finished(index: usize, out: ProcessOutcome) -> OrchestratorEvent {
        OrchestratorEvent::Finished {
            index,
            attempt: 1,
            outcome: out,
        }
    }

    fn spawned_indexes(step: &CoreStep) -> Vec<usize> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Spawn(batch) => {
                    Some(batch.iter().map(|a| a.index).collect::<Vec<_>>())
                }
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn zero_tasks_is_a_validation_error() {
        let err = CoreOrchestrator::new(Vec::new(), RunPolicy::default()).unwrap_err();
        assert!(matches!(err, ConrunError::Validation(_)));
    }

    #[test]
    fn unlimited_admission_spawns_everything() {
        let mut core = CoreOrchestrator::new(
            vec![spec("a"), spec("b"), spec("c")],
            RunPolicy::default(),
        )
        .unwrap();
        let step = core.start();
        assert_eq!(spawned_indexes(&step), vec![0, 1, 2]);
        assert!(step.keep_running);
    }

    #[test]
    fn admission_respects_bound_and_fifo_order() {
        let policy = RunPolicy {
            max_processes: 2,
            ..RunPolicy::default()
        };
        let mut core =
            CoreOrchestrator::new(vec![spec("a"), spec("b"), spec("c")], policy).unwrap();
        let step = core.start();
        assert_eq!(spawned_indexes(&step), vec![0, 1]);

        // A slot frees; the next queued task is admitted in original order.
        let step = core.step(finished(0, outcome(0)));
        assert_eq!(spawned_indexes(&step), vec![2]);
    }

    #[test]
    fn all_condition_requires_every_zero_exit() {
        let mut core =
            CoreOrchestrator::new(vec![spec("a"), spec("b")], RunPolicy::default()).unwrap();
        core.start();
        core.step(finished(0, outcome(0)));
        let step = core.step(finished(1, outcome(1)));
        assert!(!step.keep_running);

        let summary = core.summary();
        assert!(!summary.success);
        assert_eq!(summary.state, RunState::Failed);
        assert_eq!(summary.tasks.len(), 2);
        assert_eq!(summary.tasks[0].exit_code, Some(0));
        assert_eq!(summary.tasks[1].exit_code, Some(1));
    }

    #[test]
    fn first_condition_keys_off_chronological_first() {
        let policy = RunPolicy {
            success_condition: SuccessCondition::First,
            ..RunPolicy::default()
        };
        let mut core = CoreOrchestrator::new(vec![spec("slow"), spec("fast")], policy).unwrap();
        core.start();
        // The failing task finishes first.
        core.step(finished(1, outcome(1)));
        core.step(finished(0, outcome(0)));
        assert!(!core.summary().success);
    }

    #[test]
    fn last_condition_keys_off_chronological_last() {
        let policy = RunPolicy {
            success_condition: SuccessCondition::Last,
            ..RunPolicy::default()
        };
        let mut core = CoreOrchestrator::new(vec![spec("a"), spec("b")], policy).unwrap();
        core.start();
        core.step(finished(1, outcome(1)));
        core.step(finished(0, outcome(0)));
        assert!(core.summary().success);
    }

    #[test]
    fn kill_on_failure_terminates_and_stops_admission() {
        let policy = RunPolicy {
            max_processes: 2,
            kill_others_on: vec![KillCondition::Failure],
            ..RunPolicy::default()
        };
        let mut core =
            CoreOrchestrator::new(vec![spec("a"), spec("b"), spec("c")], policy).unwrap();
        core.start();

        let step = core.step(finished(1, outcome(3)));
        assert!(
            step.commands
                .iter()
                .any(|c| matches!(c, CoreCommand::TerminateAll))
        );
        // The queued third task must never spawn.
        assert!(spawned_indexes(&step).is_empty());
        assert!(step.keep_running);

        // The killed sibling reports in; the run is over and Aborted.
        let step = core.step(finished(0, killed_outcome(130)));
        assert!(!step.keep_running);
        let summary = core.summary();
        assert_eq!(summary.state, RunState::Aborted);
        assert!(!summary.success);
        // Never-admitted task keeps its slot with no exit code.
        assert_eq!(summary.tasks[2].exit_code, None);
    }

    #[test]
    fn kill_on_success_also_propagates() {
        let policy = RunPolicy {
            kill_others_on: vec![KillCondition::Success],
            ..RunPolicy::default()
        };
        let mut core = CoreOrchestrator::new(vec![spec("a"), spec("b")], policy).unwrap();
        core.start();
        let step = core.step(finished(0, outcome(0)));
        assert!(
            step.commands
                .iter()
                .any(|c| matches!(c, CoreCommand::TerminateAll))
        );
    }

    #[test]
    fn failed_task_retries_until_budget_exhausted() {
        let mut failing = spec("flaky");
        failing.restart_tries = 2;
        failing.restart_delay = Duration::from_millis(10);
        let mut core = CoreOrchestrator::new(vec![failing], RunPolicy::default()).unwrap();
        core.start();

        // Attempt 1 fails: a retry is scheduled, not a final record.
        let step = core.step(finished(0, outcome(1)));
        assert!(step.keep_running);
        assert!(matches!(
            step.commands[0],
            CoreCommand::ScheduleRetry { index: 0, .. }
        ));

        // Delay elapses: attempt 2 spawns.
        let step = core.step(OrchestratorEvent::RetryDue { index: 0 });
        assert_eq!(spawned_indexes(&step), vec![0]);

        let step = core.step(finished(0, outcome(1)));
        assert!(matches!(
            step.commands[0],
            CoreCommand::ScheduleRetry { index: 0, .. }
        ));
        let step = core.step(OrchestratorEvent::RetryDue { index: 0 });
        assert_eq!(spawned_indexes(&step), vec![0]);

        // Attempt 3 (1 initial + 2 retries) fails: budget exhausted, final.
        let step = core.step(finished(0, outcome(1)));
        assert!(!step.keep_running);
        let summary = core.summary();
        assert_eq!(summary.tasks[0].exit_code, Some(1));
        assert!(!summary.success);
    }

    #[test]
    fn killed_and_timed_out_tasks_do_not_retry() {
        let mut s = spec("t");
        s.restart_tries = 5;
        let mut core = CoreOrchestrator::new(vec![s], RunPolicy::default()).unwrap();
        core.start();

        let timed_out = ProcessOutcome {
            status: ProcessStatus::Killed,
            exit_code: 124,
            timed_out: true,
            terminated: false,
            duration: Duration::ZERO,
        };
        let step = core.step(finished(0, timed_out));
        assert!(!step.keep_running);
        assert_eq!(core.summary().tasks[0].exit_code, Some(124));
    }

    #[test]
    fn abort_cancels_pending_retries() {
        let policy = RunPolicy {
            kill_others_on: vec![KillCondition::Failure],
            ..RunPolicy::default()
        };
        let mut flaky = spec("flaky");
        flaky.restart_tries = 3;
        let mut core = CoreOrchestrator::new(vec![flaky, spec("b")], policy).unwrap();
        core.start();

        // flaky fails while it still has budget -> kill-on-failure wins and
        // aborts immediately instead of retrying.
        let step = core.step(finished(0, outcome(1)));
        assert!(
            step.commands
                .iter()
                .any(|c| matches!(c, CoreCommand::TerminateAll))
        );
        assert!(
            !step
                .commands
                .iter()
                .any(|c| matches!(c, CoreCommand::ScheduleRetry { .. }))
        );
    }

    #[test]
    fn missing_command_skips_under_ignore_missing() {
        let policy = RunPolicy {
            ignore_missing: true,
            ..RunPolicy::default()
        };
        let mut core = CoreOrchestrator::new(vec![spec("ghost"), spec("b")], policy).unwrap();
        core.start();

        core.step(OrchestratorEvent::SpawnFailed {
            index: 0,
            attempt: 1,
            missing: true,
            message: "command not found".into(),
        });
        let step = core.step(finished(1, outcome(0)));
        assert!(!step.keep_running);

        let summary = core.summary();
        assert!(summary.success);
        assert_eq!(summary.tasks[0].exit_code, None);
        assert_eq!(summary.tasks[1].exit_code, Some(0));
    }

    #[test]
    fn missing_command_fails_hard_without_the_flag() {
        let mut core =
            CoreOrchestrator::new(vec![spec("ghost")], RunPolicy::default()).unwrap();
        core.start();
        let step = core.step(OrchestratorEvent::SpawnFailed {
            index: 0,
            attempt: 1,
            missing: true,
            message: "command not found".into(),
        });
        assert!(!step.keep_running);
        let summary = core.summary();
        assert!(!summary.success);
        assert_eq!(summary.tasks[0].exit_code, Some(127));
    }

    #[test]
    fn shutdown_terminates_live_and_aborts() {
        let mut core =
            CoreOrchestrator::new(vec![spec("a"), spec("b")], RunPolicy::default()).unwrap();
        core.start();
        let step = core.step(OrchestratorEvent::ShutdownRequested);
        assert!(
            step.commands
                .iter()
                .any(|c| matches!(c, CoreCommand::TerminateAll))
        );
        assert!(step.keep_running);

        core.step(finished(0, killed_outcome(130)));
        let step = core.step(finished(1, killed_outcome(130)));
        assert!(!step.keep_running);
        assert_eq!(core.state(), RunState::Aborted);
    }

    #[test]
    fn enforce_limits_turns_breach_into_terminate() {
        let policy = RunPolicy {
            enforce_limits: true,
            ..RunPolicy::default()
        };
        let mut core = CoreOrchestrator::new(vec![spec("hog")], policy).unwrap();
        core.start();
        let step = core.step(OrchestratorEvent::ResourceBreach {
            index: 0,
            kind: super::super::BreachKind::Memory,
            value: 2048,
            limit: 1024,
        });
        assert!(matches!(step.commands[0], CoreCommand::Terminate { index: 0 }));
    }

    #[test]
    fn advisory_breach_is_ignored_by_default() {
        let mut core = CoreOrchestrator::new(vec![spec("hog")], RunPolicy::default()).unwrap();
        core.start();
        let step = core.step(OrchestratorEvent::ResourceBreach {
            index: 0,
            kind: super::super::BreachKind::Cpu,
            value: 250,
            limit: 100,
        });
        assert!(step.commands.is_empty());
    }

    #[test]
    fn retry_budget_never_exceeds_restart_tries() {
        let mut s = spec("flaky");
        s.restart_tries = 1;
        let mut core = CoreOrchestrator::new(vec![s], RunPolicy::default()).unwrap();
        core.start();

        core.step(finished(0, outcome(1)));
        core.step(OrchestratorEvent::RetryDue { index: 0 });
        let step = core.step(finished(0, outcome(1)));
        // 1 initial + 1 retry: done, no further ScheduleRetry.
        assert!(!step.keep_running);
        assert!(
            !step
                .commands
                .iter()
                .any(|c| matches!(c, CoreCommand::ScheduleRetry { .. }))
        );
    }
}
