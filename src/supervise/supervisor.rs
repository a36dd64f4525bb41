// src/supervise/supervisor.rs

//! Per-process supervisor: owns exactly one child process from spawn to
//! terminal result.
//!
//! All completion paths (natural exit, timeout, terminate request) run
//! inside one `tokio::select!`, so exactly one terminal outcome is built
//! per attempt; there is no separate exit callback that could race a
//! forced kill.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::errors::{ConrunError, FaultLog};
use crate::orchestrate::{AttemptSpec, OrchestratorEvent};
use crate::resolve::ResolvedCommand;
use crate::supervise::framing::LineFramer;
use crate::supervise::monitor::monitor_process;
use crate::supervise::security;
use crate::types::{OutputLine, ProcessOutcome, ProcessRecord, ProcessStatus, StreamKind};

/// Signal carried by a terminate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    /// Polite terminate; escalates to a forced kill after the grace window.
    Term,
    /// Forced kill, no grace.
    Kill,
}

/// Exit code synthesized for a timed-out process.
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code synthesized for a forced kill.
pub const EXIT_KILLED: i32 = 137;
/// Exit code synthesized for a polite terminate.
pub const EXIT_TERMINATED: i32 = 130;

/// Run one attempt to its terminal state.
///
/// Emits `Started`, a stream of `Output` lines, and exactly one of
/// `Finished` / `SpawnFailed` on the events channel.
pub async fn run_attempt(
    attempt: AttemptSpec,
    resolved: ResolvedCommand,
    events: mpsc::Sender<OrchestratorEvent>,
    terminate_rx: oneshot::Receiver<TermSignal>,
    fault: Arc<FaultLog>,
    grace: Duration,
) {
    let spec = Arc::clone(&attempt.spec);
    let mut record = ProcessRecord::new(spec.id.clone(), attempt.attempt);

    if let Err(err) = security::check_command(&resolved.display) {
        fault.record(&err, &format!("task `{}`", spec.id));
        let _ = events
            .send(OrchestratorEvent::SpawnFailed {
                index: attempt.index,
                attempt: attempt.attempt,
                missing: false,
                message: err.to_string(),
            })
            .await;
        return;
    }

    let mut cmd = Command::new(&resolved.program);
    cmd.args(&resolved.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &resolved.cwd {
        cmd.current_dir(cwd);
    }
    // Inherited environment minus known injection vectors, plus the spec's
    // own entries.
    for var in security::DENIED_ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.envs(&spec.env);

    let started_at = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) => {
            let missing = source.kind() == std::io::ErrorKind::NotFound;
            let err = ConrunError::Spawn {
                command: resolved.display.clone(),
                source,
            };
            fault.record(&err, &format!("task `{}`", spec.id));
            let _ = events
                .send(OrchestratorEvent::SpawnFailed {
                    index: attempt.index,
                    attempt: attempt.attempt,
                    missing,
                    message: err.to_string(),
                })
                .await;
            return;
        }
    };

    let pid = child.id().unwrap_or(0);
    record.pid = Some(pid);
    record.advance(ProcessStatus::Running);
    info!(task = %spec.id, attempt = attempt.attempt, pid, cmd = %resolved.display, "process started");

    let _ = events
        .send(OrchestratorEvent::Started {
            index: attempt.index,
            attempt: attempt.attempt,
            pid,
        })
        .await;

    let stdout_task = child.stdout.take().map(|out| {
        spawn_stream_reader(out, &attempt, StreamKind::Stdout, events.clone())
    });
    let stderr_task = child.stderr.take().map(|err| {
        spawn_stream_reader(err, &attempt, StreamKind::Stderr, events.clone())
    });

    let monitor = tokio::spawn(monitor_process(
        attempt.index,
        pid,
        Arc::clone(&spec),
        events.clone(),
    ));

    let timeout_fut = async {
        match spec.timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(timeout_fut);

    let terminate_fut = wait_for_terminate(terminate_rx);
    tokio::pin!(terminate_fut);

    let outcome = tokio::select! {
        res = child.wait() => {
            natural_outcome(res, &mut record, started_at, &spec.id, &fault)
        }
        // Fires only while the process is still running; a natural exit
        // wins the select and the timer is dropped with this future.
        _ = &mut timeout_fut => {
            record.advance(ProcessStatus::Killed);
            let err = ConrunError::Timeout {
                task: spec.id.clone(),
                millis: spec.timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
            };
            fault.record(&err, "supervisor timeout");
            force_kill(&mut child).await;
            ProcessOutcome {
                status: ProcessStatus::Killed,
                exit_code: EXIT_TIMEOUT,
                timed_out: true,
                terminated: false,
                duration: started_at.elapsed(),
            }
        }
        sig = &mut terminate_fut => {
            record.advance(ProcessStatus::Killed);
            terminate_child(&mut child, pid, sig, grace, started_at, &spec.id).await
        }
    };

    record.exit_code = Some(outcome.exit_code);
    monitor.abort();
    drain_readers(stdout_task, stderr_task).await;

    debug!(
        task = %spec.id,
        attempt = attempt.attempt,
        exit_code = outcome.exit_code,
        status = ?outcome.status,
        "attempt finished"
    );
    let _ = events
        .send(OrchestratorEvent::Finished {
            index: attempt.index,
            attempt: attempt.attempt,
            outcome,
        })
        .await;
}

/// Resolve a terminate request; a dropped sender means no request will ever
/// arrive, so park forever instead of misreading the drop as a kill.
async fn wait_for_terminate(rx: oneshot::Receiver<TermSignal>) -> TermSignal {
    match rx.await {
        Ok(sig) => sig,
        Err(_) => std::future::pending().await,
    }
}

fn natural_outcome(
    res: std::io::Result<std::process::ExitStatus>,
    record: &mut ProcessRecord,
    started_at: Instant,
    task: &str,
    fault: &FaultLog,
) -> ProcessOutcome {
    let duration = started_at.elapsed();
    match res {
        Ok(status) => {
            let (exit_code, final_status) = decode_exit(status);
            record.advance(final_status);
            ProcessOutcome {
                status: final_status,
                exit_code,
                timed_out: false,
                terminated: false,
                duration,
            }
        }
        Err(source) => {
            let err = ConrunError::Spawn {
                command: task.to_string(),
                source,
            };
            fault.record(&err, "waiting for child");
            record.advance(ProcessStatus::Failed);
            ProcessOutcome {
                status: ProcessStatus::Failed,
                exit_code: -1,
                timed_out: false,
                terminated: false,
                duration,
            }
        }
    }
}

/// Exit code and terminal status from an OS exit status. A signal-killed
/// process maps to `Killed` with the conventional `128 + signal` code.
fn decode_exit(status: std::process::ExitStatus) -> (i32, ProcessStatus) {
    if let Some(code) = status.code() {
        let final_status = if code == 0 {
            ProcessStatus::Completed
        } else {
            ProcessStatus::Failed
        };
        return (code, final_status);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return (128 + sig, ProcessStatus::Killed);
        }
    }
    (-1, ProcessStatus::Failed)
}

/// Two-step termination: polite signal first, forced kill once the grace
/// window elapses with the process still alive. The terminal result is
/// synthesized from the request, not from the OS exit callback.
async fn terminate_child(
    child: &mut Child,
    pid: u32,
    sig: TermSignal,
    grace: Duration,
    started_at: Instant,
    task: &str,
) -> ProcessOutcome {
    let exit_code = match sig {
        TermSignal::Kill => {
            info!(task, pid, "forced kill requested");
            force_kill(child).await;
            EXIT_KILLED
        }
        TermSignal::Term => {
            info!(task, pid, grace_ms = grace.as_millis() as u64, "terminate requested");
            send_polite_signal(child, pid);
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(_) => EXIT_TERMINATED,
                Err(_) => {
                    warn!(task, pid, "grace window elapsed; escalating to forced kill");
                    force_kill(child).await;
                    EXIT_KILLED
                }
            }
        }
    };

    ProcessOutcome {
        status: ProcessStatus::Killed,
        exit_code,
        timed_out: false,
        terminated: true,
        duration: started_at.elapsed(),
    }
}

#[cfg(unix)]
fn send_polite_signal(_child: &Child, pid: u32) {
    // SAFETY: plain kill(2); an ESRCH result just means the process beat us
    // to the exit.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        debug!(pid, "SIGTERM delivery failed (process likely already gone)");
    }
}

#[cfg(not(unix))]
fn send_polite_signal(child: &Child, _pid: u32) {
    // No polite signal on this platform; the escalation path will kill.
    let _ = child;
}

async fn force_kill(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "kill failed (process likely already gone)");
    }
    let _ = child.wait().await;
}

fn spawn_stream_reader<R>(
    reader: R,
    attempt: &AttemptSpec,
    stream: StreamKind,
    events: mpsc::Sender<OrchestratorEvent>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    let task = attempt.spec.id.clone();
    let index = attempt.index;
    let mut reader = reader;

    tokio::spawn(async move {
        let mut framer = LineFramer::new();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    for content in framer.push(&buf[..n]) {
                        send_line(&events, &task, index, content, stream).await;
                    }
                }
            }
        }
        if let Some(rest) = framer.finish() {
            send_line(&events, &task, index, rest, stream).await;
        }
    })
}

async fn send_line(
    events: &mpsc::Sender<OrchestratorEvent>,
    task: &str,
    index: usize,
    content: String,
    stream: StreamKind,
) {
    let _ = events
        .send(OrchestratorEvent::Output(OutputLine {
            task: task.to_string(),
            index,
            content,
            stream,
            timestamp: chrono::Local::now(),
        }))
        .await;
}

/// Wait briefly for the readers to flush their trailing partial lines. A
/// grandchild holding the pipe open must not wedge the supervisor, so the
/// wait is bounded and stragglers are aborted.
async fn drain_readers(
    stdout_task: Option<tokio::task::JoinHandle<()>>,
    stderr_task: Option<tokio::task::JoinHandle<()>>,
) {
    for mut handle in [stdout_task, stderr_task].into_iter().flatten() {
        if tokio::time::timeout(Duration::from_secs(2), &mut handle)
            .await
            .is_err()
        {
            debug!("output reader still open after process exit; aborting");
            handle.abort();
        }
    }
}
