// src/supervise/monitor.rs

//! Advisory resource monitoring for one child process.
//!
//! Samples resident memory and CPU time roughly once a second and emits a
//! [`OrchestratorEvent::ResourceBreach`] when a configured ceiling is
//! exceeded. The monitor never kills anything itself; enforcement is a
//! policy decision made by the orchestrator core (`enforce_limits`).
//!
//! Sampling reads `/proc` and is a no-op on non-Linux platforms.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::orchestrate::{BreachKind, OrchestratorEvent};
use crate::types::TaskSpec;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Monitor loop: runs until the process disappears or the supervisor aborts
/// the task. Does nothing when the spec configures no ceilings.
pub async fn monitor_process(
    index: usize,
    pid: u32,
    spec: std::sync::Arc<TaskSpec>,
    events: mpsc::Sender<OrchestratorEvent>,
) {
    if spec.memory_limit.is_none() && spec.cpu_limit.is_none() {
        return;
    }

    let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
    // First tick fires immediately; skip it so the process gets a second
    // to start before its first sample.
    interval.tick().await;

    let mut previous: Option<CpuSample> = None;
    loop {
        interval.tick().await;
        let Some(sample) = sample_process(pid) else {
            debug!(task = %spec.id, pid, "resource monitor: process gone, stopping");
            return;
        };

        if let Some(limit) = spec.memory_limit {
            if sample.rss_bytes > limit {
                let _ = events
                    .send(OrchestratorEvent::ResourceBreach {
                        index,
                        kind: BreachKind::Memory,
                        value: sample.rss_bytes,
                        limit,
                    })
                    .await;
            }
        }

        if let Some(limit) = spec.cpu_limit {
            if let Some(prev) = previous {
                let percent = sample.cpu.percent_since(&prev);
                if percent > limit {
                    let _ = events
                        .send(OrchestratorEvent::ResourceBreach {
                            index,
                            kind: BreachKind::Cpu,
                            value: percent as u64,
                            limit: limit as u64,
                        })
                        .await;
                }
            }
        }
        previous = Some(sample.cpu);
    }
}

struct ProcessSample {
    rss_bytes: u64,
    cpu: CpuSample,
}

#[derive(Clone, Copy)]
struct CpuSample {
    /// utime + stime, in clock ticks.
    ticks: u64,
    taken_at: std::time::Instant,
}

impl CpuSample {
    fn percent_since(&self, prev: &CpuSample) -> f64 {
        let elapsed = self.taken_at.duration_since(prev.taken_at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        let tick_hz = clock_ticks_per_second();
        let used = self.ticks.saturating_sub(prev.ticks) as f64 / tick_hz;
        used / elapsed * 100.0
    }
}

#[cfg(target_os = "linux")]
fn sample_process(pid: u32) -> Option<ProcessSample> {
    let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = page_size_bytes();

    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Fields after the parenthesized comm; utime and stime are fields 14
    // and 15 of the full line.
    let after_comm = stat.rsplit_once(')').map(|(_, rest)| rest)?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;

    Some(ProcessSample {
        rss_bytes: rss_pages * page_size,
        cpu: CpuSample {
            ticks: utime + stime,
            taken_at: std::time::Instant::now(),
        },
    })
}

#[cfg(not(target_os = "linux"))]
fn sample_process(_pid: u32) -> Option<ProcessSample> {
    // Unsupported platform: advisory monitoring is a no-op.
    None
}

#[cfg(target_os = "linux")]
fn page_size_bytes() -> u64 {
    // SAFETY: sysconf with a valid name has no side effects.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
}

#[cfg(target_os = "linux")]
fn clock_ticks_per_second() -> f64 {
    // SAFETY: sysconf with a valid name has no side effects.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz > 0 { hz as f64 } else { 100.0 }
}

#[cfg(not(target_os = "linux"))]
fn clock_ticks_per_second() -> f64 {
    100.0
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn sampling_own_process_reports_memory() {
        let sample = sample_process(std::process::id()).expect("own /proc entry");
        assert!(sample.rss_bytes > 0);
    }

    #[test]
    fn sampling_dead_pid_is_none() {
        // PID 1 always exists but 4194304 is above the default pid_max.
        assert!(sample_process(4_194_304).is_none());
    }
}
