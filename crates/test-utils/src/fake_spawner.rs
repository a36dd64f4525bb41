use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use conrun::errors::Result;
use conrun::orchestrate::{AttemptSpec, OrchestratorEvent, SpawnerBackend};
use conrun::types::{ProcessOutcome, ProcessStatus};

/// Scripted behaviour of one fake task.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Finish immediately with this exit code.
    Exit(i32),
    /// Per-attempt exit codes; the last entry repeats when attempts
    /// outnumber it.
    ExitSequence(Vec<i32>),
    /// Stay live until terminated; then report a polite-kill outcome.
    Hold,
    /// Report a command-not-found spawn failure.
    Missing,
}

/// A fake spawner backend that records which attempts were dispatched and
/// emits scripted outcomes without any real processes.
pub struct FakeSpawner {
    events_tx: mpsc::Sender<OrchestratorEvent>,
    scripts: HashMap<usize, Scripted>,
    /// (index, attempt) pairs in dispatch order.
    pub spawned: Arc<Mutex<Vec<(usize, u32)>>>,
    held: Arc<Mutex<HashSet<usize>>>,
}

impl FakeSpawner {
    pub fn new(events_tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        Self {
            events_tx,
            scripts: HashMap::new(),
            spawned: Arc::new(Mutex::new(Vec::new())),
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn script(mut self, index: usize, behaviour: Scripted) -> Self {
        self.scripts.insert(index, behaviour);
        self
    }

    pub fn spawned_attempts(&self) -> Vec<(usize, u32)> {
        self.spawned.lock().unwrap().clone()
    }

    fn outcome_for(code: i32) -> ProcessOutcome {
        ProcessOutcome {
            status: if code == 0 {
                ProcessStatus::Completed
            } else {
                ProcessStatus::Failed
            },
            exit_code: code,
            timed_out: false,
            terminated: false,
            duration: Duration::from_millis(1),
        }
    }

    fn killed_outcome() -> ProcessOutcome {
        ProcessOutcome {
            status: ProcessStatus::Killed,
            exit_code: 130,
            timed_out: false,
            terminated: true,
            duration: Duration::from_millis(1),
        }
    }

    async fn kill_held(&self, index: usize) {
        if self.held.lock().unwrap().remove(&index) {
            let _ = self
                .events_tx
                .send(OrchestratorEvent::Finished {
                    index,
                    attempt: 1,
                    outcome: Self::killed_outcome(),
                })
                .await;
        }
    }
}

impl SpawnerBackend for FakeSpawner {
    fn spawn_attempts(
        &mut self,
        attempts: Vec<AttemptSpec>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for attempt in attempts {
                self.spawned
                    .lock()
                    .unwrap()
                    .push((attempt.index, attempt.attempt));

                let script = self
                    .scripts
                    .get(&attempt.index)
                    .cloned()
                    .unwrap_or(Scripted::Exit(0));

                match script {
                    Scripted::Exit(code) => {
                        self.events_tx
                            .send(OrchestratorEvent::Finished {
                                index: attempt.index,
                                attempt: attempt.attempt,
                                outcome: Self::outcome_for(code),
                            })
                            .await
                            .expect("runtime event channel open");
                    }
                    Scripted::ExitSequence(codes) => {
                        let slot = (attempt.attempt as usize - 1).min(codes.len() - 1);
                        self.events_tx
                            .send(OrchestratorEvent::Finished {
                                index: attempt.index,
                                attempt: attempt.attempt,
                                outcome: Self::outcome_for(codes[slot]),
                            })
                            .await
                            .expect("runtime event channel open");
                    }
                    Scripted::Hold => {
                        self.held.lock().unwrap().insert(attempt.index);
                    }
                    Scripted::Missing => {
                        self.events_tx
                            .send(OrchestratorEvent::SpawnFailed {
                                index: attempt.index,
                                attempt: attempt.attempt,
                                missing: true,
                                message: format!(
                                    "command not found: {}",
                                    attempt.spec.command
                                ),
                            })
                            .await
                            .expect("runtime event channel open");
                    }
                }
            }
            Ok(())
        })
    }

    fn terminate(
        &mut self,
        index: usize,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.kill_held(index).await;
            Ok(())
        })
    }

    fn terminate_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let held: Vec<usize> = self.held.lock().unwrap().iter().copied().collect();
            for index in held {
                self.kill_held(index).await;
            }
            Ok(())
        })
    }
}
