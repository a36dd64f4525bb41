// src/output/prefix.rs

//! Prefix template rendering.
//!
//! Templates support the placeholders `{index}`, `{pid}`, `{time}`,
//! `{command}` and `{name}`; anything else inside braces is left verbatim.
//! A handful of shorthand names (`index`, `pid`, `time`, `name`, `command`,
//! `none`) select a canned template.

/// Values available to one prefix rendering.
#[derive(Debug, Clone)]
pub struct PrefixContext<'a> {
    pub index: usize,
    pub pid: Option<u32>,
    pub name: &'a str,
    pub command: &'a str,
    pub time: String,
}

pub const DEFAULT_TEMPLATE: &str = "[{name}]";

/// Expand a shorthand prefix selector into a template. Strings containing
/// `{` are already templates and pass through untouched.
pub fn template_for(selector: &str) -> String {
    if selector.contains('{') {
        return selector.to_string();
    }
    match selector {
        "index" => "[{index}]".to_string(),
        "pid" => "[{pid}]".to_string(),
        "time" => "[{time}]".to_string(),
        "name" => "[{name}]".to_string(),
        "command" => "[{command}]".to_string(),
        "none" => String::new(),
        other => format!("[{other}]"),
    }
}

/// Render `template` against `ctx`. Unknown placeholders stay verbatim.
pub fn render(template: &str, ctx: &PrefixContext<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        match after.find('}') {
            Some(close) => {
                let key = &after[1..close];
                match expand(key, ctx) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&after[..=close]),
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(after);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn expand(key: &str, ctx: &PrefixContext<'_>) -> Option<String> {
    match key {
        "index" => Some(ctx.index.to_string()),
        "pid" => Some(match ctx.pid {
            Some(pid) => pid.to_string(),
            None => "-".to_string(),
        }),
        "time" => Some(ctx.time.clone()),
        "name" => Some(ctx.name.to_string()),
        "command" => Some(ctx.command.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PrefixContext<'static> {
        PrefixContext {
            index: 2,
            pid: Some(4242),
            name: "web",
            command: "npm start",
            time: "12:00:00.000".to_string(),
        }
    }

    #[test]
    fn renders_all_placeholders() {
        let rendered = render("{index}/{pid}/{name}/{command}/{time}", &ctx());
        assert_eq!(rendered, "2/4242/web/npm start/12:00:00.000");
    }

    #[test]
    fn unknown_placeholders_stay_verbatim() {
        assert_eq!(render("[{name}-{nope}]", &ctx()), "[web-{nope}]");
    }

    #[test]
    fn unclosed_brace_is_copied_through() {
        assert_eq!(render("[{name", &ctx()), "[{name");
    }

    #[test]
    fn missing_pid_renders_dash() {
        let mut c = ctx();
        c.pid = None;
        assert_eq!(render("{pid}", &c), "-");
    }

    #[test]
    fn shorthand_selectors_expand() {
        assert_eq!(template_for("index"), "[{index}]");
        assert_eq!(template_for("none"), "");
        // Already a template: untouched.
        assert_eq!(template_for("{name} |"), "{name} |");
    }
}
