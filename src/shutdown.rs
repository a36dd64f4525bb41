// src/shutdown.rs

//! Graceful shutdown: OS signal listening and the bounded shutdown
//! sequence.
//!
//! Registered callbacks (e.g. "terminate all live supervisors") run
//! concurrently under one timeout; if they overrun, shutdown proceeds
//! anyway and the condition is logged. Only one sequence may run per
//! process lifetime, enforced with an atomic re-entry guard.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

type Callback = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Explicit shutdown service, passed by reference to whoever needs to hook
/// the sequence. Not a global.
pub struct ShutdownCoordinator {
    callbacks: Mutex<Vec<(String, Callback)>>,
    running: AtomicBool,
    timeout: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            timeout,
        }
    }

    /// Register a named callback to run during shutdown.
    pub fn register<F, Fut>(&self, name: &str, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks
            .lock()
            .expect("shutdown callbacks mutex poisoned")
            .push((name.to_string(), Box::new(move || Box::pin(callback()))));
    }

    /// Run the shutdown sequence once. Re-entrant calls return immediately.
    ///
    /// Returns true when every callback completed within the bound.
    pub async fn shutdown(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return true;
        }

        let futures: Vec<_> = {
            let callbacks = self
                .callbacks
                .lock()
                .expect("shutdown callbacks mutex poisoned");
            callbacks
                .iter()
                .map(|(name, cb)| {
                    info!(callback = %name, "running shutdown callback");
                    cb()
                })
                .collect()
        };

        if futures.is_empty() {
            return true;
        }

        let joined = futures::future::join_all(futures);
        match tokio::time::timeout(self.timeout, joined).await {
            Ok(_) => {
                info!("shutdown sequence complete");
                true
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "shutdown callbacks overran their bound; proceeding anyway"
                );
                false
            }
        }
    }
}

/// Completes when the process receives a termination signal.
///
/// Unix: SIGINT, SIGTERM or SIGHUP. Elsewhere: Ctrl-C only.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sighup.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Log panics through tracing with full context before the default hook
/// aborts the thread. Installed once at startup by the binary.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("uncaught panic: {info}");
        default_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn callbacks_run_concurrently_within_bound() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            coordinator.register("bump", move || {
                let count = Arc::clone(&count);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    count.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        let started = std::time::Instant::now();
        assert!(coordinator.shutdown().await);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        // Three 100ms callbacks in parallel finish well under the 300ms a
        // serial run would need.
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn overrunning_callbacks_do_not_block_shutdown() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        coordinator.register("stuck", || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        assert!(!coordinator.shutdown().await);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        coordinator.register("once", move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        coordinator.shutdown().await;
        coordinator.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
