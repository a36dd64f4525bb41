// src/resolve.rs

//! Command resolution seam.
//!
//! Turning a user-supplied task description into a concrete program and
//! argument vector is an external concern (package-manager shortcuts,
//! script-name expansion and so on live behind this trait). `conrun` itself
//! ships only [`ShellResolver`], which wraps shell-mode commands in the
//! platform shell and otherwise passes the program through with a PATH
//! existence check.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::TaskSpec;

/// A fully resolved command, ready to hand to the supervisor.
#[derive(Debug, Clone)]
pub struct ResolvedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Human-readable command text, used for diagnostics and the security
    /// rule table.
    pub display: String,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    /// Drives `ignore_missing`: callers may turn this into a skip.
    #[error("command not found: {0}")]
    NotFound(String),

    #[error("empty command")]
    Empty,
}

impl ResolveError {
    pub fn is_missing(&self) -> bool {
        matches!(self, ResolveError::NotFound(_))
    }
}

/// Resolves a [`TaskSpec`] into something executable.
pub trait CommandResolver: Send + Sync {
    fn resolve(&self, spec: &TaskSpec) -> Result<ResolvedCommand, ResolveError>;
}

/// Default resolver.
///
/// - `shell_mode`: the whole command line is handed to `sh -c` (or `cmd /C`
///   on Windows); the shell will report missing programs itself.
/// - direct mode: `spec.command` is the program, `spec.args` the argv tail;
///   the program must exist on disk or on `PATH`.
#[derive(Debug, Default, Clone)]
pub struct ShellResolver;

impl CommandResolver for ShellResolver {
    fn resolve(&self, spec: &TaskSpec) -> Result<ResolvedCommand, ResolveError> {
        let command = spec.command.trim();
        if command.is_empty() {
            return Err(ResolveError::Empty);
        }

        let display = if spec.args.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, spec.args.join(" "))
        };

        if spec.shell_mode {
            let (shell, flag) = platform_shell();
            // Extra args are joined into the command line the shell parses.
            return Ok(ResolvedCommand {
                program: shell.to_string(),
                args: vec![flag.to_string(), display.clone()],
                cwd: spec.cwd.clone(),
                display,
            });
        }

        if !program_exists(command) {
            return Err(ResolveError::NotFound(command.to_string()));
        }

        Ok(ResolvedCommand {
            program: command.to_string(),
            args: spec.args.clone(),
            cwd: spec.cwd.clone(),
            display,
        })
    }
}

fn platform_shell() -> (&'static str, &'static str) {
    if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") }
}

/// True when `program` names an existing file, or is findable on `PATH`.
fn program_exists(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file();
    }

    let Some(search) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&search).any(|dir| dir.join(program).is_file())
}
