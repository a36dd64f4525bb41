// src/output/colors.rs

//! Stable color-per-task assignment and ANSI conversion.
//!
//! Assignment is a pure function of first-seen task ordering plus explicit
//! overrides: each distinct id advances the auto-cycle counter exactly once,
//! so re-running with the same ids yields the same colors.

use std::collections::HashMap;

use crate::errors::{ConrunError, Result};
use crate::types::TaskId;

/// Fixed auto-cycle palette (SGR foreground codes), wrapped modulo length.
const AUTO_CYCLE: [u8; 12] = [36, 35, 33, 32, 34, 31, 96, 95, 93, 92, 94, 91];

/// A validated color, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorSpec {
    /// Standard SGR foreground code (30-37, 90-97).
    Ansi(u8),
    /// 24-bit truecolor.
    True { r: u8, g: u8, b: u8 },
    /// No coloring.
    Plain,
}

impl ColorSpec {
    /// Opening escape sequence, or `None` for plain output.
    pub fn escape(&self) -> Option<String> {
        match self {
            ColorSpec::Ansi(code) => Some(format!("\x1b[{code}m")),
            ColorSpec::True { r, g, b } => Some(format!("\x1b[38;2;{r};{g};{b}m")),
            ColorSpec::Plain => None,
        }
    }

    /// Wrap `text` in this color, if any.
    pub fn paint(&self, text: &str) -> String {
        match self.escape() {
            Some(open) => format!("{open}{text}\x1b[0m"),
            None => text.to_string(),
        }
    }
}

/// Cached color assignment for one task id. Never reassigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorAssignment {
    pub spec: ColorSpec,
}

/// Assigns and caches one color per task id for the lifetime of the
/// orchestrator instance.
#[derive(Debug, Default)]
pub struct Palette {
    assigned: HashMap<TaskId, ColorAssignment>,
    cursor: usize,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the assignment for `id`, creating it on first reference.
    ///
    /// Idempotent: a second call with the same id returns the cached
    /// assignment unchanged, explicit color or not. An explicit color is
    /// strictly validated; unknown names and malformed hex/rgb are errors
    /// here (the lenient fallback lives in [`truecolor`], used at render
    /// time for colors that arrive as raw strings).
    pub fn assign(&mut self, id: &str, explicit: Option<&str>) -> Result<ColorAssignment> {
        if let Some(existing) = self.assigned.get(id) {
            return Ok(existing.clone());
        }

        let spec = match explicit {
            Some(color) => validate_color(color)?,
            None => {
                let code = AUTO_CYCLE[self.cursor % AUTO_CYCLE.len()];
                // The counter advances per distinct id, not per request.
                self.cursor += 1;
                ColorSpec::Ansi(code)
            }
        };

        let assignment = ColorAssignment { spec };
        self.assigned.insert(id.to_string(), assignment.clone());
        Ok(assignment)
    }
}

/// Strict validation of a user-supplied color: a named ANSI color,
/// `#RRGGBB`, or `rgb(r,g,b)`. Used for CLI-level flag validation.
pub fn validate_color(color: &str) -> Result<ColorSpec> {
    let trimmed = color.trim();
    if let Some(code) = named_ansi(trimmed) {
        return Ok(ColorSpec::Ansi(code));
    }
    if trimmed.starts_with('#') || trimmed.to_lowercase().starts_with("rgb(") {
        return truecolor(trimmed)
            .map(|(r, g, b)| ColorSpec::True { r, g, b })
            .ok_or_else(|| ConrunError::Cli(format!("malformed color: {trimmed}")));
    }
    Err(ConrunError::Cli(format!("unknown color: {trimmed}")))
}

/// Lenient truecolor parsing: `#RRGGBB` or `rgb(r,g,b)` to an RGB triple,
/// `None` for anything malformed. Render paths fall back to uncolored
/// output on `None` instead of erroring.
pub fn truecolor(color: &str) -> Option<(u8, u8, u8)> {
    let trimmed = color.trim();

    if let Some(hex) = trimmed.strip_prefix('#') {
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        return Some((r, g, b));
    }

    let lower = trimmed.to_lowercase();
    let body = lower.strip_prefix("rgb(")?.strip_suffix(')')?;
    let mut parts = body.split(',');
    let r = parts.next()?.trim().parse().ok()?;
    let g = parts.next()?.trim().parse().ok()?;
    let b = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((r, g, b))
}

fn named_ansi(name: &str) -> Option<u8> {
    let code = match name.to_lowercase().as_str() {
        "black" => 30,
        "red" => 31,
        "green" => 32,
        "yellow" => 33,
        "blue" => 34,
        "magenta" => 35,
        "cyan" => 36,
        "white" => 37,
        "gray" | "grey" | "brightblack" => 90,
        "brightred" => 91,
        "brightgreen" => 92,
        "brightyellow" => 93,
        "brightblue" => 94,
        "brightmagenta" => 95,
        "brightcyan" => 96,
        "brightwhite" => 97,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_is_idempotent() {
        let mut palette = Palette::new();
        let first = palette.assign("web", None).unwrap();
        let second = palette.assign("web", None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn auto_cycle_advances_per_distinct_id() {
        let mut palette = Palette::new();
        let a = palette.assign("a", None).unwrap();
        // Re-requesting "a" must not advance the cursor for "b".
        palette.assign("a", None).unwrap();
        let b = palette.assign("b", None).unwrap();
        assert_ne!(a, b);

        // Same first-seen ordering in a fresh palette reproduces the colors.
        let mut fresh = Palette::new();
        assert_eq!(fresh.assign("a", None).unwrap(), a);
        assert_eq!(fresh.assign("b", None).unwrap(), b);
    }

    #[test]
    fn auto_cycle_wraps() {
        let mut palette = Palette::new();
        for i in 0..AUTO_CYCLE.len() {
            palette.assign(&format!("t{i}"), None).unwrap();
        }
        let wrapped = palette.assign("extra", None).unwrap();
        assert_eq!(wrapped.spec, ColorSpec::Ansi(AUTO_CYCLE[0]));
    }

    #[test]
    fn explicit_color_wins_over_cycle() {
        let mut palette = Palette::new();
        let assigned = palette.assign("db", Some("red")).unwrap();
        assert_eq!(assigned.spec, ColorSpec::Ansi(31));
    }

    #[test]
    fn unknown_explicit_color_fails_validation() {
        let mut palette = Palette::new();
        assert!(palette.assign("x", Some("ultraviolet")).is_err());
    }

    #[test]
    fn hex_and_rgb_parse_to_truecolor() {
        assert_eq!(truecolor("#ff8000"), Some((255, 128, 0)));
        assert_eq!(truecolor("rgb(1, 2, 3)"), Some((1, 2, 3)));
        assert_eq!(
            validate_color("#00ff00").unwrap(),
            ColorSpec::True { r: 0, g: 255, b: 0 }
        );
    }

    #[test]
    fn malformed_truecolor_is_lenient_none() {
        assert_eq!(truecolor("#ff80"), None);
        assert_eq!(truecolor("#zzzzzz"), None);
        assert_eq!(truecolor("rgb(1,2)"), None);
        assert_eq!(truecolor("rgb(1,2,3,4)"), None);
        assert_eq!(truecolor("rgb(300,0,0)"), None);
    }

    #[test]
    fn paint_wraps_and_resets() {
        let spec = ColorSpec::Ansi(36);
        assert_eq!(spec.paint("[web]"), "\x1b[36m[web]\x1b[0m");
        assert_eq!(ColorSpec::Plain.paint("[web]"), "[web]");
    }
}
