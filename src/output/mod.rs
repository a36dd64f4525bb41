// src/output/mod.rs

//! Output formatting layer.
//!
//! - [`colors`] owns stable color-per-task assignment and ANSI conversion.
//! - [`prefix`] renders prefix templates.
//! - [`OutputFormatter`] ties both together per run: it registers task
//!   metadata as supervisors start and renders each [`OutputLine`] for the
//!   caller's sink.

pub mod colors;
pub mod prefix;

use std::collections::HashMap;

use crate::errors::Result;
use crate::types::{OutputLine, RunPolicy, TaskSpec};

pub use colors::{ColorAssignment, ColorSpec, Palette};
pub use prefix::{PrefixContext, render as render_prefix, template_for};

#[derive(Debug, Clone)]
struct TaskMeta {
    command: String,
    pid: Option<u32>,
    color: ColorSpec,
}

/// Renders prefixed, colored output lines for a run.
///
/// Per-task metadata is keyed by task index, so two tasks with identical
/// ids (e.g. the same bare command given twice) keep distinct pids and
/// indexes; only the color is shared through the id-keyed palette.
#[derive(Debug)]
pub struct OutputFormatter {
    palette: Palette,
    template: String,
    raw: bool,
    meta: HashMap<usize, TaskMeta>,
}

impl OutputFormatter {
    pub fn from_policy(policy: &RunPolicy) -> Self {
        let template = match &policy.prefix {
            Some(selector) => template_for(selector),
            None => prefix::DEFAULT_TEMPLATE.to_string(),
        };
        Self {
            palette: Palette::new(),
            template,
            raw: policy.raw,
            meta: HashMap::new(),
        }
    }

    /// Register one task before its first attempt spawns. The color comes
    /// from, in order: the spec's explicit color, the policy's per-index
    /// color list, the auto-cycle.
    pub fn register(&mut self, spec: &TaskSpec, index: usize, policy: &RunPolicy) -> Result<()> {
        let explicit = spec
            .color
            .as_deref()
            .or_else(|| match policy.prefix_colors.get(index) {
                Some(c) if c != "auto" => Some(c.as_str()),
                _ => None,
            });
        let assignment = self.palette.assign(&spec.id, explicit)?;
        self.meta.insert(
            index,
            TaskMeta {
                command: spec.command.clone(),
                pid: None,
                color: assignment.spec,
            },
        );
        Ok(())
    }

    pub fn set_pid(&mut self, index: usize, pid: u32) {
        if let Some(meta) = self.meta.get_mut(&index) {
            meta.pid = Some(pid);
        }
    }

    /// Render one line for display. In raw mode the content passes through
    /// unchanged; otherwise the colored prefix is prepended.
    pub fn render(&mut self, line: &OutputLine) -> String {
        if self.raw {
            return line.content.clone();
        }

        let Some(meta) = self.meta.get(&line.index) else {
            return line.content.clone();
        };

        let ctx = PrefixContext {
            index: line.index,
            pid: meta.pid,
            name: &line.task,
            command: &meta.command,
            time: line.timestamp.format("%H:%M:%S%.3f").to_string(),
        };
        let prefix = render_prefix(&self.template, &ctx);
        if prefix.is_empty() {
            return line.content.clone();
        }
        format!("{} {}", meta.color.paint(&prefix), line.content)
    }
}
