// src/orchestrate/backend.rs

//! Pluggable spawner backend abstraction.
//!
//! The runtime talks to a [`SpawnerBackend`] instead of spawning processes
//! itself, so tests can substitute a fake that scripts outcomes without any
//! real child processes. [`RealSpawner`] is the production implementation:
//! it resolves commands, launches one supervisor future per attempt, and
//! keeps the live registry used for terminate fan-out.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::errors::{FaultLog, Result};
use crate::resolve::CommandResolver;
use crate::supervise::{TermSignal, run_attempt};

use super::{AttemptSpec, OrchestratorEvent};

/// Trait abstracting how attempts are executed.
pub trait SpawnerBackend: Send {
    /// Launch the given attempts. Spawn failures are reported as
    /// `SpawnFailed` events, not as `Err` from this call.
    fn spawn_attempts(
        &mut self,
        attempts: Vec<AttemptSpec>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Politely terminate one live supervisor.
    fn terminate(
        &mut self,
        index: usize,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Politely terminate every live supervisor.
    fn terminate_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Live-process registry entry: the handle used to request termination.
struct LiveHandle {
    terminate_tx: oneshot::Sender<TermSignal>,
}

/// Production spawner: one supervisor future per attempt.
pub struct RealSpawner {
    events_tx: mpsc::Sender<OrchestratorEvent>,
    resolver: Arc<dyn CommandResolver>,
    fault: Arc<FaultLog>,
    grace: Duration,
    /// index -> terminate handle for the attempt currently running.
    ///
    /// Mutated from supervisor wrapper tasks as well as the runtime, hence
    /// the mutex; the cooperative-control-loop variant of this registry
    /// needs none, but tokio's multithreaded runtime does.
    live: Arc<Mutex<HashMap<usize, LiveHandle>>>,
}

impl RealSpawner {
    pub fn new(
        events_tx: mpsc::Sender<OrchestratorEvent>,
        resolver: Arc<dyn CommandResolver>,
        fault: Arc<FaultLog>,
        grace: Duration,
    ) -> Self {
        Self {
            events_tx,
            resolver,
            fault,
            grace,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn launch(&self, attempt: AttemptSpec) {
        let resolved = match self.resolver.resolve(&attempt.spec) {
            Ok(resolved) => resolved,
            Err(err) => {
                // Reported from a spawned task, like every supervisor
                // event: the runtime is inside execute() here and nothing
                // drains the channel until this call returns, so an inline
                // send could fill the channel and wedge the run.
                let events = self.events_tx.clone();
                let failed = OrchestratorEvent::SpawnFailed {
                    index: attempt.index,
                    attempt: attempt.attempt,
                    missing: err.is_missing(),
                    message: err.to_string(),
                };
                tokio::spawn(async move {
                    let _ = events.send(failed).await;
                });
                return;
            }
        };

        let (terminate_tx, terminate_rx) = oneshot::channel();
        self.live
            .lock()
            .expect("live registry mutex poisoned")
            .insert(attempt.index, LiveHandle { terminate_tx });

        let events = self.events_tx.clone();
        let fault = Arc::clone(&self.fault);
        let grace = self.grace;
        let live = Arc::clone(&self.live);
        let index = attempt.index;

        tokio::spawn(async move {
            run_attempt(attempt, resolved, events, terminate_rx, fault, grace).await;
            live.lock().expect("live registry mutex poisoned").remove(&index);
        });
    }

    fn request_terminate(&self, index: usize) {
        let handle = self
            .live
            .lock()
            .expect("live registry mutex poisoned")
            .remove(&index);
        match handle {
            Some(handle) => {
                if handle.terminate_tx.send(TermSignal::Term).is_err() {
                    debug!(index, "supervisor finished before terminate request arrived");
                }
            }
            None => debug!(index, "terminate requested for task with no live supervisor"),
        }
    }
}

impl SpawnerBackend for RealSpawner {
    fn spawn_attempts(
        &mut self,
        attempts: Vec<AttemptSpec>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for attempt in attempts {
                self.launch(attempt);
            }
            Ok(())
        })
    }

    fn terminate(
        &mut self,
        index: usize,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            warn!(index, "terminating task over resource policy");
            self.request_terminate(index);
            Ok(())
        })
    }

    fn terminate_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let indexes: Vec<usize> = self
                .live
                .lock()
                .expect("live registry mutex poisoned")
                .keys()
                .copied()
                .collect();
            debug!(count = indexes.len(), "kill policy: terminating live siblings");
            for index in indexes {
                self.request_terminate(index);
            }
            Ok(())
        })
    }
}
