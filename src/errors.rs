// src/errors.rs

//! Typed error taxonomy, severity mapping, and the append-only fault log.
//!
//! The fault log is an explicit service passed by reference to the pieces
//! that need it (no global singleton); it records every classified error
//! together with its severity and context.

use std::fmt;
use std::sync::Mutex;

use thiserror::Error;

/// Broad classification of a failure, used for logging and policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    PackageManager,
    Process,
    TaskExecution,
    Configuration,
    System,
    Security,
    Cli,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::PackageManager => "package-manager",
            ErrorKind::Process => "process",
            ErrorKind::TaskExecution => "task-execution",
            ErrorKind::Configuration => "configuration",
            ErrorKind::System => "system",
            ErrorKind::Security => "security",
            ErrorKind::Cli => "cli",
        };
        f.write_str(label)
    }
}

/// How bad it is. Critical errors trigger the graceful-shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug)]
pub enum ConrunError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("command not found: {0}")]
    NotFound(String),

    #[error("security violation: command `{command}` matches deny rule `{rule}`")]
    SecurityViolation { command: String, rule: String },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("task `{task}` failed: {reason}")]
    TaskExecution { task: String, reason: String },

    #[error("task `{task}` timed out after {millis}ms")]
    Timeout { task: String, millis: u64 },

    #[error("task `{task}` exceeded its resource ceiling: {detail}")]
    ResourceExhausted { task: String, detail: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid argument: {0}")]
    Cli(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConrunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConrunError::Validation(_) => ErrorKind::Validation,
            ConrunError::NotFound(_) => ErrorKind::PackageManager,
            ConrunError::SecurityViolation { .. } => ErrorKind::Security,
            ConrunError::Spawn { .. } => ErrorKind::Process,
            ConrunError::TaskExecution { .. } | ConrunError::Timeout { .. } => {
                ErrorKind::TaskExecution
            }
            ConrunError::ResourceExhausted { .. } => ErrorKind::System,
            ConrunError::Configuration(_) => ErrorKind::Configuration,
            ConrunError::Cli(_) => ErrorKind::Cli,
            ConrunError::Io(_) | ConrunError::Other(_) => ErrorKind::System,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ConrunError::SecurityViolation { .. } | ConrunError::ResourceExhausted { .. } => {
                Severity::Critical
            }
            ConrunError::Spawn { .. }
            | ConrunError::TaskExecution { .. }
            | ConrunError::Configuration(_) => Severity::High,
            ConrunError::NotFound(_)
            | ConrunError::Timeout { .. }
            | ConrunError::Validation(_)
            | ConrunError::Cli(_) => Severity::Medium,
            ConrunError::Io(_) | ConrunError::Other(_) => Severity::Low,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConrunError>;

/// One classified failure, as retained by the fault log.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub context: String,
    pub timestamp: chrono::DateTime<chrono::Local>,
}

/// Append-only log of classified errors.
///
/// Shared by `Arc` between the supervisors and the orchestrator; records are
/// never mutated or removed once appended.
#[derive(Debug, Default)]
pub struct FaultLog {
    records: Mutex<Vec<ErrorRecord>>,
}

impl FaultLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify and append `err`, logging it at a level matching its
    /// severity. Returns the severity so callers can escalate on Critical.
    pub fn record(&self, err: &ConrunError, context: &str) -> Severity {
        let severity = err.severity();
        let record = ErrorRecord {
            kind: err.kind(),
            severity,
            message: err.to_string(),
            context: context.to_string(),
            timestamp: chrono::Local::now(),
        };

        match severity {
            Severity::Critical | Severity::High => {
                tracing::error!(kind = %record.kind, severity = %severity, context, "{}", record.message);
            }
            Severity::Medium => {
                tracing::warn!(kind = %record.kind, context, "{}", record.message);
            }
            Severity::Low => {
                tracing::debug!(kind = %record.kind, context, "{}", record.message);
            }
        }

        self.records
            .lock()
            .expect("fault log mutex poisoned")
            .push(record);
        severity
    }

    /// Snapshot of everything recorded so far, in append order.
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.records
            .lock()
            .expect("fault log mutex poisoned")
            .clone()
    }

    pub fn has_critical(&self) -> bool {
        self.records
            .lock()
            .expect("fault log mutex poisoned")
            .iter()
            .any(|r| r.severity == Severity::Critical)
    }
}
