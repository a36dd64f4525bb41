// src/orchestrate/mod.rs

//! Orchestration engine.
//!
//! The pure core state machine lives in [`core`]; the async IO shell is
//! implemented in [`runtime`]; [`backend`] abstracts how attempts are
//! actually executed so tests can substitute a fake spawner.
//!
//! Every lifecycle notification is a typed [`OrchestratorEvent`] flowing
//! over one mpsc channel into the runtime; the core answers each event with
//! [`CoreCommand`]s for the shell to execute. No state outside the core is
//! consulted for orchestration decisions.

use std::sync::Arc;
use std::time::Duration;

use crate::types::{OutputLine, ProcessOutcome, TaskSpec};

pub mod backend;
pub mod core;
pub mod runtime;

pub use backend::{RealSpawner, SpawnerBackend};
pub use core::CoreOrchestrator;
pub use runtime::Runtime;

/// One attempt of one task, as handed to the spawner backend.
#[derive(Debug, Clone)]
pub struct AttemptSpec {
    pub spec: Arc<TaskSpec>,
    /// Position of the task in the caller's list; routing key for events.
    pub index: usize,
    /// 1-based attempt counter; retries bump it.
    pub attempt: u32,
}

/// Which resource ceiling a process breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachKind {
    Memory,
    Cpu,
}

/// Events flowing from supervisors (and timers, and the signal listener)
/// into the orchestrator runtime.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// An attempt's child process is up and running.
    Started { index: usize, attempt: u32, pid: u32 },
    /// One framed line of child output.
    Output(OutputLine),
    /// An attempt reached its terminal state.
    Finished {
        index: usize,
        attempt: u32,
        outcome: ProcessOutcome,
    },
    /// The attempt never produced a process: resolution failed, the
    /// security table matched, or the OS spawn call errored.
    SpawnFailed {
        index: usize,
        attempt: u32,
        /// Command/script-not-found classification; drives `ignore_missing`.
        missing: bool,
        message: String,
    },
    /// A retry delay elapsed; the task may be relaunched.
    RetryDue { index: usize },
    /// Advisory: a process sampled over one of its resource ceilings.
    ResourceBreach {
        index: usize,
        kind: BreachKind,
        value: u64,
        limit: u64,
    },
    /// Graceful shutdown requested (signal or embedding caller).
    ShutdownRequested,
}

/// Commands produced by the pure core for the IO shell to execute.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Hand these attempts to the spawner backend, in order.
    Spawn(Vec<AttemptSpec>),
    /// Politely terminate one live supervisor (escalating after the grace
    /// window).
    Terminate { index: usize },
    /// Politely terminate every live supervisor.
    TerminateAll,
    /// Start a timer; feed back `RetryDue { index }` when it fires.
    ScheduleRetry { index: usize, delay: Duration },
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the runtime loop should keep consuming events.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn running(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    pub fn finished(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: false,
        }
    }
}
