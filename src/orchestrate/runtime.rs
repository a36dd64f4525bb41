// src/orchestrate/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::output::OutputFormatter;
use crate::types::{RunSummary, StreamKind};

use super::backend::SpawnerBackend;
use super::core::CoreOrchestrator;
use super::{CoreCommand, CoreStep, OrchestratorEvent};

/// Async IO shell around [`CoreOrchestrator`].
///
/// All orchestration semantics live in the core; this struct only reads
/// events from the channel, executes the core's commands through the
/// backend, renders output lines, and runs retry timers.
pub struct Runtime<B: SpawnerBackend> {
    core: CoreOrchestrator,
    events_rx: mpsc::Receiver<OrchestratorEvent>,
    /// Cloned into retry timers so their expiry re-enters the event loop.
    events_tx: mpsc::Sender<OrchestratorEvent>,
    backend: B,
    formatter: OutputFormatter,
}

impl<B: SpawnerBackend> fmt::Debug for Runtime<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<B: SpawnerBackend> Runtime<B> {
    pub fn new(
        core: CoreOrchestrator,
        events_rx: mpsc::Receiver<OrchestratorEvent>,
        events_tx: mpsc::Sender<OrchestratorEvent>,
        backend: B,
    ) -> Result<Self> {
        let policy = core.policy().clone();
        let mut formatter = OutputFormatter::from_policy(&policy);
        for (index, spec) in core.specs().iter().enumerate() {
            formatter.register(spec, index, &policy)?;
        }
        Ok(Self {
            core,
            events_rx,
            events_tx,
            backend,
            formatter,
        })
    }

    /// Main event loop: drive the core to a final state and return the
    /// aggregate summary.
    pub async fn run(mut self) -> Result<RunSummary> {
        info!(tasks = self.core.specs().len(), "run started");

        let step = self.core.start();
        let mut keep_running = step.keep_running;
        self.execute(step).await?;

        while keep_running {
            let event = match self.events_rx.recv().await {
                Some(event) => event,
                None => {
                    debug!("event channel closed; finishing run");
                    break;
                }
            };

            match event {
                OrchestratorEvent::Output(line) => {
                    let rendered = self.formatter.render(&line);
                    match line.stream {
                        StreamKind::Stdout => println!("{rendered}"),
                        StreamKind::Stderr => eprintln!("{rendered}"),
                    }
                }
                OrchestratorEvent::Started { index, pid, .. } => {
                    self.formatter.set_pid(index, pid);
                }
                other => {
                    self.log_event(&other);
                    let step = self.core.step(other);
                    keep_running = step.keep_running;
                    self.execute(step).await?;
                }
            }
        }

        let summary = self.core.summary();
        info!(
            success = summary.success,
            state = ?summary.state,
            "run finished"
        );
        Ok(summary)
    }

    async fn execute(&mut self, step: CoreStep) -> Result<()> {
        for command in step.commands {
            match command {
                CoreCommand::Spawn(attempts) => {
                    debug!(count = attempts.len(), "dispatching attempts");
                    self.backend.spawn_attempts(attempts).await?;
                }
                CoreCommand::Terminate { index } => {
                    self.backend.terminate(index).await?;
                }
                CoreCommand::TerminateAll => {
                    self.backend.terminate_all().await?;
                }
                CoreCommand::ScheduleRetry { index, delay } => {
                    let tx = self.events_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(OrchestratorEvent::RetryDue { index }).await;
                    });
                }
            }
        }
        Ok(())
    }

    fn log_event(&self, event: &OrchestratorEvent) {
        match event {
            OrchestratorEvent::Finished { index, attempt, outcome } => {
                debug!(index, attempt, exit_code = outcome.exit_code, "task finished");
            }
            OrchestratorEvent::SpawnFailed { index, missing, message, .. } => {
                let id = self
                    .core
                    .specs()
                    .get(*index)
                    .map(|s| s.id.as_str())
                    .unwrap_or("?");
                if *missing && self.core.policy().ignore_missing {
                    warn!(task = %id, "{message}; skipping (--ignore-missing)");
                } else {
                    warn!(task = %id, "{message}");
                }
            }
            OrchestratorEvent::ResourceBreach { index, kind, value, limit } => {
                let id = self
                    .core
                    .specs()
                    .get(*index)
                    .map(|s| s.id.as_str())
                    .unwrap_or("?");
                warn!(task = %id, ?kind, value, limit, "resource ceiling breached");
            }
            OrchestratorEvent::ShutdownRequested => {
                info!("shutdown requested; terminating live tasks");
            }
            _ => {}
        }
    }
}

/// Convenience channel constructor used by both production wiring and
/// tests; capacity mirrors what one busy process can produce between loop
/// iterations.
pub fn event_channel() -> (
    mpsc::Sender<OrchestratorEvent>,
    mpsc::Receiver<OrchestratorEvent>,
) {
    mpsc::channel(256)
}
