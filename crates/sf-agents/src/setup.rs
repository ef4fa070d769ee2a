//! Host bootstrap probe: are the tools a session needs installed on a host?

use serde::{Deserialize, Serialize};
use sf_remote::{CommandRequest, CommandRunner, ShellCommand};

use crate::adapter::LlmAdapter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCheck {
    pub label: String,
    pub ok: bool,
    /// First non-empty output line, or the failure detail.
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProbeReport {
    pub host: String,
    pub checks: Vec<HostCheck>,
}

impl HostProbeReport {
    pub fn healthy(&self) -> bool {
        self.checks.iter().all(|check| check.ok)
    }

    pub fn missing(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|check| !check.ok)
            .map(|check| check.label.as_str())
            .collect()
    }
}

fn base_checks() -> Vec<(String, ShellCommand)> {
    vec![
        ("git".to_string(), ShellCommand::new("git").arg("--version")),
        ("tmux".to_string(), ShellCommand::new("tmux").arg("-V")),
        ("flock".to_string(), ShellCommand::new("flock").arg("--version")),
    ]
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

pub fn probe_host(
    runner: &dyn CommandRunner,
    host: &str,
    llms: &[Box<dyn LlmAdapter>],
) -> HostProbeReport {
    let mut checks = base_checks();
    for llm in llms {
        checks.push((
            format!("{} cli", llm.kind()),
            ShellCommand::new("command").arg("-v").arg(llm.executable()),
        ));
    }

    let checks = checks
        .into_iter()
        .map(|(label, command)| {
            match runner.execute(CommandRequest::from(command).unchecked()) {
                Ok(result) if result.success() => HostCheck {
                    label,
                    ok: true,
                    output: first_line(&result.stdout).unwrap_or_else(|| "ok".to_string()),
                },
                Ok(result) => HostCheck {
                    label,
                    ok: false,
                    output: first_line(&result.stderr)
                        .or_else(|| first_line(&result.stdout))
                        .unwrap_or_default(),
                },
                Err(err) => HostCheck {
                    label,
                    ok: false,
                    output: err.detail(),
                },
            }
        })
        .collect();

    HostProbeReport {
        host: host.to_string(),
        checks,
    }
}
