//! Shell quoting and composition. Every token that reaches a shell goes through
//! [`shell_quote`] or [`RemotePath::render`].

use crate::path::RemotePath;

/// POSIX single-quote `value` so the shell treats it as one literal word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

/// An argv, optionally piped into further argv stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    stages: Vec<Vec<String>>,
}

impl ShellCommand {
    pub fn new(program: &str) -> Self {
        Self {
            stages: vec![vec![shell_quote(program)]],
        }
    }

    pub fn arg(mut self, value: impl AsRef<str>) -> Self {
        self.current().push(shell_quote(value.as_ref()));
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for value in values {
            self = self.arg(value);
        }
        self
    }

    /// Append a path argument; home-relative paths keep `$HOME` expansion.
    pub fn path(mut self, path: &RemotePath) -> Self {
        self.current().push(path.render());
        self
    }

    /// Start a new pipeline stage fed by the previous one.
    pub fn pipe(mut self, program: &str) -> Self {
        self.stages.push(vec![shell_quote(program)]);
        self
    }

    pub fn render(&self) -> String {
        self.stages
            .iter()
            .map(|stage| stage.join(" "))
            .collect::<Vec<_>>()
            .join(" | ")
    }

    fn current(&mut self) -> &mut Vec<String> {
        let last = self.stages.len() - 1;
        &mut self.stages[last]
    }
}

impl std::fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Exists(RemotePath),
    IsDir(RemotePath),
    Succeeds(ShellCommand),
    /// Like `Succeeds`, with the command's output discarded.
    SucceedsQuietly(ShellCommand),
    Not(Box<Condition>),
}

impl Condition {
    pub fn not(self) -> Self {
        Condition::Not(Box::new(self))
    }

    pub fn render(&self) -> String {
        match self {
            Condition::Exists(path) => format!("[ -e {} ]", path.render()),
            Condition::IsDir(path) => format!("[ -d {} ]", path.render()),
            Condition::Succeeds(command) => command.render(),
            Condition::SucceedsQuietly(command) => format!("{} >/dev/null 2>&1", command.render()),
            Condition::Not(inner) => format!("! {}", inner.render()),
        }
    }
}

/// A `set -e` script assembled from fixed control templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    steps: Vec<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self::new()
    }
}

impl Script {
    pub fn new() -> Self {
        Self {
            steps: vec!["set -e".to_string()],
        }
    }

    pub fn run(mut self, command: ShellCommand) -> Self {
        self.steps.push(command.render());
        self
    }

    /// Run `command`; on failure run `fallback` instead of aborting.
    pub fn run_or(mut self, command: ShellCommand, fallback: ShellCommand) -> Self {
        self.steps
            .push(format!("{} || {}", command.render(), fallback.render()));
        self
    }

    pub fn run_if(mut self, condition: Condition, body: Script) -> Self {
        self.steps.push(format!(
            "if {}; then {}; fi",
            condition.render(),
            body.body()
        ));
        self
    }

    pub fn run_if_else(mut self, condition: Condition, then: Script, otherwise: Script) -> Self {
        self.steps.push(format!(
            "if {}; then {}; else {}; fi",
            condition.render(),
            then.body(),
            otherwise.body()
        ));
        self
    }

    /// Stop the script successfully unless `condition` holds.
    pub fn exit_unless(mut self, condition: Condition) -> Self {
        self.steps
            .push(format!("{} || exit 0", condition.render()));
        self
    }

    /// Steps without the leading `set -e`, for nesting inside control blocks.
    fn body(&self) -> String {
        let steps: Vec<&str> = self
            .steps
            .iter()
            .skip(1)
            .map(String::as_str)
            .collect();
        if steps.is_empty() {
            ":".to_string()
        } else {
            steps.join("; ")
        }
    }

    pub fn render(&self) -> String {
        self.steps.join("; ")
    }

    pub fn into_command(self) -> ShellCommand {
        ShellCommand::new("sh").arg("-c").arg(self.render())
    }
}

impl std::fmt::Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}
