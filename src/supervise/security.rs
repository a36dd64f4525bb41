// src/supervise/security.rs

//! Security rule table checked before any process spawns.
//!
//! A command matching any deny pattern fails fast with a
//! [`ConrunError::SecurityViolation`]; nothing is spawned. The table targets
//! the classic injection shapes: command substitution, piping into a shell
//! interpreter, recursive deletion of root paths, privilege escalation, and
//! redirection onto device files.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{ConrunError, Result};

struct DenyRule {
    name: &'static str,
    pattern: Regex,
}

static DENY_RULES: LazyLock<Vec<DenyRule>> = LazyLock::new(|| {
    let rules: [(&str, &str); 6] = [
        (
            "command substitution",
            r"\$\(|`[^`]*`",
        ),
        (
            "pipe to shell interpreter",
            r"\|\s*(sh|bash|zsh|dash|ksh)\b",
        ),
        (
            "recursive root delete",
            r"rm\s+(-[a-zA-Z]*r[a-zA-Z]*f|-[a-zA-Z]*f[a-zA-Z]*r)[a-zA-Z]*\s+(/|/\*)(\s|$)",
        ),
        (
            "privilege escalation",
            r"^\s*(sudo|doas|su)\b|[;&|]\s*(sudo|doas|su)\b",
        ),
        (
            "redirect to device file",
            r">\s*/dev/(sd[a-z]\d*|nvme\d+\w*|mem|kmem|port)",
        ),
        (
            "fork bomb",
            r":\s*\(\)\s*\{\s*:\s*\|\s*:",
        ),
    ];

    rules
        .into_iter()
        .map(|(name, pattern)| DenyRule {
            name,
            pattern: Regex::new(pattern).expect("invalid deny pattern"),
        })
        .collect()
});

/// Validate `command` (the human-readable command line) against the deny
/// table. Returns the offending rule name inside the error on a match.
pub fn check_command(command: &str) -> Result<()> {
    for rule in DENY_RULES.iter() {
        if rule.pattern.is_match(command) {
            return Err(ConrunError::SecurityViolation {
                command: command.to_string(),
                rule: rule.name.to_string(),
            });
        }
    }
    Ok(())
}

/// Environment variables stripped from the inherited environment before
/// spawn: common code-injection and loader-override vectors.
pub const DENIED_ENV_VARS: [&str; 10] = [
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "NODE_OPTIONS",
    "PYTHONSTARTUP",
    "BASH_ENV",
    "ENV",
    "IFS",
];
