// src/types.rs

//! Core data model: task descriptions, run policy, and per-process records.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Stable identifier of one task within a run.
pub type TaskId = String;

/// How a caller describes one task: either a bare command string or a full
/// [`TaskSpec`]. Normalized to `TaskSpec` at the orchestrator boundary.
#[derive(Debug, Clone)]
pub enum TaskDescriptor {
    Simple(String),
    Detailed(TaskSpec),
}

impl TaskDescriptor {
    /// Normalize into a [`TaskSpec`], deriving a display id from the command
    /// text when none was given. `index` keeps ids meaningful for blank
    /// commands.
    pub fn into_spec(self, index: usize) -> TaskSpec {
        match self {
            TaskDescriptor::Simple(command) => {
                let mut spec = TaskSpec::shell(&command);
                spec.id = default_id(&command, index);
                spec
            }
            TaskDescriptor::Detailed(mut spec) => {
                if spec.id.is_empty() {
                    spec.id = default_id(&spec.command, index);
                }
                spec
            }
        }
    }
}

impl From<&str> for TaskDescriptor {
    fn from(s: &str) -> Self {
        TaskDescriptor::Simple(s.to_string())
    }
}

fn default_id(command: &str, index: usize) -> String {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        format!("task-{index}")
    } else {
        trimmed.to_string()
    }
}

/// Immutable description of one command to run.
///
/// Owned by the caller; supervisors hold it behind an `Arc` and never
/// mutate it once a run has started.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: TaskId,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Extra environment entries layered on top of the filtered inherited
    /// environment. BTreeMap keeps spawn behaviour deterministic.
    pub env: BTreeMap<String, String>,
    /// Run through the platform shell (`sh -c` / `cmd /C`).
    pub shell_mode: bool,
    /// Explicit prefix color; `None` means take the next auto-cycle color.
    pub color: Option<String>,
    /// How many times a failed task may be relaunched.
    pub restart_tries: u32,
    /// Delay between a failure and its relaunch.
    pub restart_delay: Duration,
    /// Kill the process and synthesize exit code 124 after this long.
    pub timeout: Option<Duration>,
    /// Advisory resident-memory ceiling, in bytes.
    pub memory_limit: Option<u64>,
    /// Advisory CPU ceiling, in percent of one core.
    pub cpu_limit: Option<f64>,
}

impl TaskSpec {
    /// A shell-mode spec with defaults; `id` is filled in by the caller or
    /// by [`TaskDescriptor::into_spec`].
    pub fn shell(command: &str) -> Self {
        Self {
            id: String::new(),
            command: command.to_string(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            shell_mode: true,
            color: None,
            restart_tries: 0,
            restart_delay: Duration::ZERO,
            timeout: None,
            memory_limit: None,
            cpu_limit: None,
        }
    }
}

/// Which terminal classifications of a sibling trigger kill propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KillCondition {
    Success,
    Failure,
}

impl FromStr for KillCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "success" => Ok(KillCondition::Success),
            "failure" => Ok(KillCondition::Failure),
            other => Err(format!(
                "invalid kill condition: {other} (expected \"success\" or \"failure\")"
            )),
        }
    }
}

/// Rule reducing per-task outcomes to one run-level boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessCondition {
    /// Every task's final exit code is 0.
    #[default]
    All,
    /// The chronologically first task to reach a terminal state exited 0.
    First,
    /// The chronologically last task to reach a terminal state exited 0.
    Last,
}

impl FromStr for SuccessCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(SuccessCondition::All),
            "first" => Ok(SuccessCondition::First),
            "last" => Ok(SuccessCondition::Last),
            other => Err(format!(
                "invalid success condition: {other} (expected \"all\", \"first\" or \"last\")"
            )),
        }
    }
}

/// Caller configuration governing a whole run. Immutable for the run's
/// duration.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// Concurrency bound; 0 means unlimited.
    pub max_processes: usize,
    pub kill_others_on: Vec<KillCondition>,
    pub success_condition: SuccessCondition,
    /// Skip (instead of fail) tasks whose command cannot be resolved.
    pub ignore_missing: bool,
    /// Bypass all output formatting.
    pub raw: bool,
    /// Prefix template; `None` selects the default.
    pub prefix: Option<String>,
    /// Per-index explicit prefix colors; empty means auto-cycle.
    pub prefix_colors: Vec<String>,
    /// Kill a process that breaches its resource ceilings instead of only
    /// reporting the breach.
    pub enforce_limits: bool,
    /// Grace window between the polite terminate signal and the forced kill.
    pub grace: Duration,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            max_processes: 0,
            kill_others_on: Vec::new(),
            success_condition: SuccessCondition::All,
            ignore_missing: false,
            raw: false,
            prefix: None,
            prefix_colors: Vec::new(),
            enforce_limits: false,
            grace: Duration::from_secs(3),
        }
    }
}

impl RunPolicy {
    pub fn kills_on(&self, cond: KillCondition) -> bool {
        self.kill_others_on.contains(&cond)
    }
}

/// Lifecycle status of one spawned attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Killed,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Killed
        )
    }
}

/// Mutable lifecycle record of one spawned attempt of a [`TaskSpec`].
///
/// Transitions are strictly forward; once terminal, `advance` refuses any
/// further change. A retry creates a fresh record with a bumped attempt
/// number rather than mutating a terminal one.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub id: TaskId,
    pub attempt: u32,
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
}

impl ProcessRecord {
    pub fn new(id: TaskId, attempt: u32) -> Self {
        Self {
            id,
            attempt,
            pid: None,
            status: ProcessStatus::Starting,
            exit_code: None,
        }
    }

    /// Move to `next` if that is a forward transition. Returns false (and
    /// leaves the record untouched) when the record is already terminal.
    /// This is the complete-once guard for racing completion paths.
    pub fn advance(&mut self, next: ProcessStatus) -> bool {
        if self.status.is_terminal() || next == ProcessStatus::Starting {
            return false;
        }
        self.status = next;
        true
    }
}

/// Which stream of a child process a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One logical line of child output. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub task: TaskId,
    pub index: usize,
    pub content: String,
    pub stream: StreamKind,
    pub timestamp: chrono::DateTime<chrono::Local>,
}

/// Terminal outcome of one attempt, as reported by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub status: ProcessStatus,
    pub exit_code: i32,
    pub timed_out: bool,
    /// True when the exit was synthesized from a terminate request.
    pub terminated: bool,
    pub duration: Duration,
}

impl ProcessOutcome {
    /// Classification used by kill-policy propagation: success means a clean
    /// zero exit that was neither killed nor timed out.
    pub fn is_success(&self) -> bool {
        self.status == ProcessStatus::Completed
            && self.exit_code == 0
            && !self.timed_out
            && !self.terminated
    }
}

/// Final per-task entry in a [`RunSummary`].
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub id: TaskId,
    pub index: usize,
    /// `None` when the task was skipped (`ignore_missing`) or never admitted
    /// because the run was aborted first.
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

/// Aggregate result of a run. Produced exactly once, after every task has
/// reached a terminal state or the run was aborted by policy.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub success: bool,
    pub tasks: Vec<TaskResult>,
    pub state: RunState,
}

/// Orchestrator-level state machine. The three right-hand states are
/// terminal; `Aborted` is reached only via a kill-policy trigger or an
/// external shutdown before natural completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}
