#![allow(dead_code)]

use std::time::Duration;

use conrun::types::{KillCondition, RunPolicy, SuccessCondition, TaskSpec};

/// Builder for `TaskSpec` to simplify test setup.
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new(id: &str, command: &str) -> Self {
        let mut spec = TaskSpec::shell(command);
        spec.id = id.to_string();
        Self { spec }
    }

    pub fn restart_tries(mut self, tries: u32) -> Self {
        self.spec.restart_tries = tries;
        self
    }

    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.spec.restart_delay = delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.spec.timeout = Some(timeout);
        self
    }

    pub fn color(mut self, color: &str) -> Self {
        self.spec.color = Some(color.to_string());
        self
    }

    pub fn cwd(mut self, cwd: &str) -> Self {
        self.spec.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.spec.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn direct(mut self) -> Self {
        self.spec.shell_mode = false;
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}

/// Builder for `RunPolicy`.
#[derive(Default)]
pub struct RunPolicyBuilder {
    policy: RunPolicy,
}

impl RunPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_processes(mut self, max: usize) -> Self {
        self.policy.max_processes = max;
        self
    }

    pub fn kill_others_on(mut self, cond: KillCondition) -> Self {
        self.policy.kill_others_on.push(cond);
        self
    }

    pub fn success_condition(mut self, cond: SuccessCondition) -> Self {
        self.policy.success_condition = cond;
        self
    }

    pub fn ignore_missing(mut self) -> Self {
        self.policy.ignore_missing = true;
        self
    }

    pub fn raw(mut self) -> Self {
        self.policy.raw = true;
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.policy.grace = grace;
        self
    }

    pub fn build(self) -> RunPolicy {
        self.policy
    }
}
