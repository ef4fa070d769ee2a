//! tmux session lifecycle on a host.
//!
//! Sessions are addressed with `=name` so tmux matches exactly instead of by
//! prefix; pane targets use `=name:` so the name is never split on `:`.

use sf_core::SessionDescriptor;
use sf_remote::{CommandRequest, CommandRunner, Condition, RemotePath, Script, ShellCommand};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AgentError;

pub struct SessionManager<'a> {
    runner: &'a dyn CommandRunner,
}

fn session_target(name: &str) -> String {
    format!("={name}")
}

fn pane_target(name: &str) -> String {
    format!("={name}:")
}

fn tmux() -> ShellCommand {
    ShellCommand::new("tmux")
}

impl<'a> SessionManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    fn has_session(name: &str) -> Condition {
        Condition::SucceedsQuietly(
            tmux()
                .arg("has-session")
                .arg("-t")
                .arg(session_target(name)),
        )
    }

    /// Create a detached session running `command` in `cwd` unless it already exists.
    pub fn start_session(
        &self,
        descriptor: &SessionDescriptor,
        cwd: &RemotePath,
        command: &str,
    ) -> Result<(), AgentError> {
        let name = descriptor.tmux_name();
        let script = Script::new().run_if(
            Self::has_session(&name).not(),
            Script::new().run(
                tmux()
                    .args(["new-session", "-d", "-s"])
                    .arg(&name)
                    .arg("-c")
                    .path(cwd)
                    .arg(command),
            ),
        );
        self.runner.execute(CommandRequest::from(script))?;
        info!(session = %descriptor, cwd = %cwd, "session ready");
        Ok(())
    }

    /// Kill the session if present; absence is not an error.
    pub fn kill_session(&self, descriptor: &SessionDescriptor) -> Result<(), AgentError> {
        let name = descriptor.tmux_name();
        let script = Script::new().run_if(
            Self::has_session(&name),
            Script::new().run(
                tmux()
                    .arg("kill-session")
                    .arg("-t")
                    .arg(session_target(&name)),
            ),
        );
        self.runner.execute(CommandRequest::from(script))?;
        info!(session = %descriptor, "session stopped");
        Ok(())
    }

    /// Session names as tmux reports them. No server or an unreachable host
    /// yields an empty list.
    pub fn list_sessions(&self) -> Vec<String> {
        let request =
            CommandRequest::from(tmux().args(["list-sessions", "-F", "#S"])).unchecked();
        match self.runner.execute(request) {
            Ok(result) if result.success() => result
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Ok(result) => {
                debug!(exit_code = result.exit_code, "tmux list-sessions returned no sessions");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err.detail(), "failed to list tmux sessions");
                Vec::new()
            }
        }
    }

    /// Best-effort kill of every session belonging to `feature`. Returns the
    /// names it tried to kill. Sessions sf did not name are left alone.
    pub fn kill_feature_sessions(&self, feature: &str) -> Vec<String> {
        let mut attempted = Vec::new();
        for name in self.list_sessions() {
            let owned = SessionDescriptor::from_tmux_name(&name)
                .is_some_and(|descriptor| descriptor.feature == feature);
            if !owned {
                continue;
            }
            let request = CommandRequest::from(
                tmux()
                    .arg("kill-session")
                    .arg("-t")
                    .arg(session_target(&name)),
            );
            if let Err(err) = self.runner.execute(request) {
                warn!(session = %name, error = %err.detail(), "failed to kill session");
            }
            attempted.push(name);
        }
        attempted
    }

    /// Paste the contents of `remote_file` into the session and press Enter.
    pub fn deliver_buffer(
        &self,
        descriptor: &SessionDescriptor,
        remote_file: &RemotePath,
    ) -> Result<(), AgentError> {
        let name = descriptor.tmux_name();
        let buffer = format!("sf-{}", Uuid::new_v4().simple());

        self.runner.execute(CommandRequest::from(
            tmux()
                .args(["load-buffer", "-b"])
                .arg(&buffer)
                .path(remote_file),
        ))?;
        self.runner.execute(CommandRequest::from(
            tmux()
                .args(["paste-buffer", "-d", "-b"])
                .arg(&buffer)
                .arg("-t")
                .arg(pane_target(&name)),
        ))?;
        self.runner.execute(CommandRequest::from(
            tmux()
                .arg("send-keys")
                .arg("-t")
                .arg(pane_target(&name))
                .arg("Enter"),
        ))?;
        debug!(session = %descriptor, buffer = %buffer, "prompt delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_remote::{CommandResult, ScriptedRunner};

    fn descriptor() -> SessionDescriptor {
        SessionDescriptor::new("payments", "core", "claude")
    }

    #[test]
    fn start_session_checks_before_creating() {
        let runner = ScriptedRunner::new();
        let sessions = SessionManager::new(&runner);
        sessions
            .start_session(
                &descriptor(),
                &RemotePath::home(".sf/worktrees/payments/core"),
                "'claude' '--chat'",
            )
            .expect("start");

        let commands = runner.commands();
        assert_eq!(commands.len(), 1);
        let command = &commands[0];
        assert!(command.starts_with("'sh' '-c' "));
        assert!(command.contains("has-session"));
        assert!(command.contains("=feat__payments__core__claude"));
        assert!(command.contains("new-session"));
        assert!(command.contains("$HOME"));
    }

    #[test]
    fn repeated_start_issues_the_same_guarded_command() {
        let runner = ScriptedRunner::new();
        let sessions = SessionManager::new(&runner);
        let cwd = RemotePath::absolute("/srv/wt");
        sessions.start_session(&descriptor(), &cwd, "bash").expect("first");
        sessions.start_session(&descriptor(), &cwd, "bash").expect("second");
        let commands = runner.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], commands[1]);
    }

    #[test]
    fn list_sessions_swallows_failures() {
        let runner = ScriptedRunner::new();
        runner.fail_on("list-sessions", 1, "no server running on /tmp/tmux-0/default");
        assert!(SessionManager::new(&runner).list_sessions().is_empty());

        let runner = ScriptedRunner::new();
        runner.respond_to("list-sessions", CommandResult::ok("a\n\n b \n"));
        assert_eq!(SessionManager::new(&runner).list_sessions(), vec!["a", "b"]);
    }

    #[test]
    fn kill_feature_sessions_targets_only_that_feature() {
        let runner = ScriptedRunner::new();
        runner.respond_to(
            "list-sessions",
            CommandResult::ok(
                "feat__payments__core__claude\nfeat__payments__web__codex\nfeat__billing__core__claude\nscratch\n",
            ),
        );
        runner.fail_on("=feat__payments__web__codex", 1, "session vanished");

        let attempted = SessionManager::new(&runner).kill_feature_sessions("payments");
        assert_eq!(
            attempted,
            vec!["feat__payments__core__claude", "feat__payments__web__codex"]
        );
        let kills: Vec<_> = runner
            .commands()
            .into_iter()
            .filter(|command| command.contains("kill-session"))
            .collect();
        assert_eq!(kills.len(), 2);
        assert!(kills.iter().all(|command| !command.contains("billing")));
    }

    #[test]
    fn kill_feature_sessions_ignores_features_sharing_a_prefix() {
        let pay = SessionDescriptor::new("pay", "core", "claude").tmux_name();
        let pay_v2 = SessionDescriptor::new("pay_v2", "core", "claude").tmux_name();
        let pay_dot = SessionDescriptor::new("pay.v3", "core", "codex").tmux_name();
        let runner = ScriptedRunner::new();
        runner.respond_to(
            "list-sessions",
            CommandResult::ok(format!("{pay_v2}\n{pay}\n{pay_dot}\n")),
        );

        let attempted = SessionManager::new(&runner).kill_feature_sessions("pay");
        assert_eq!(attempted, vec![pay]);

        let attempted = SessionManager::new(&runner).kill_feature_sessions("pay_v2");
        assert_eq!(attempted, vec![pay_v2]);
    }

    #[test]
    fn deliver_buffer_runs_three_checked_steps() {
        let runner = ScriptedRunner::new();
        let file = RemotePath::absolute("/tmp/.sf_prompt.payments.core.x.txt");
        SessionManager::new(&runner)
            .deliver_buffer(&descriptor(), &file)
            .expect("deliver");

        let requests = runner.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|request| request.check));
        assert!(requests[0].command.contains("load-buffer"));
        assert!(requests[0].command.contains("/tmp/.sf_prompt.payments.core.x.txt"));
        assert!(requests[1].command.contains("paste-buffer"));
        assert!(requests[1].command.contains("'=feat__payments__core__claude:'"));
        assert!(requests[2].command.ends_with("'Enter'"));
    }

    #[test]
    fn deliver_buffer_aborts_on_first_failure() {
        let runner = ScriptedRunner::new();
        runner.fail_on("paste-buffer", 1, "can't find pane");
        let err = SessionManager::new(&runner)
            .deliver_buffer(&descriptor(), &RemotePath::absolute("/tmp/p.txt"))
            .expect_err("paste failure");
        assert_eq!(err.to_string(), "can't find pane");
        assert_eq!(runner.commands().len(), 2);
    }
}
