// src/supervise/mod.rs

//! Process supervision layer.
//!
//! One [`supervisor::run_attempt`] future owns one child process end-to-end:
//! security validation, spawn with a filtered environment, line-framed
//! output capture, timeout, terminate escalation, and the terminal outcome.
//!
//! - [`framing`] is the line-framing state machine over byte buffers.
//! - [`security`] holds the pre-spawn deny-pattern table and the
//!   environment filter list.
//! - [`monitor`] samples resource usage and emits advisory breach events.

pub mod framing;
pub mod monitor;
pub mod security;
pub mod supervisor;

pub use framing::LineFramer;
pub use supervisor::{EXIT_KILLED, EXIT_TERMINATED, EXIT_TIMEOUT, TermSignal, run_attempt};
