//! Command execution against a configured host: ssh for remote targets, a
//! local `sh -c` for loopback targets, and a no-op preview under dry-run.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use sf_core::HostConfig;
use tracing::{debug, info};

use crate::error::ExecError;
use crate::path::RemotePath;
use crate::quote::{shell_quote, Script, ShellCommand};

pub const ACCEPT_NEW_HOSTKEYS_ENV: &str = "SF_ACCEPT_NEW_HOSTKEYS";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    pub dry_run: bool,
    pub accept_new_hostkeys: bool,
}

impl ExecOptions {
    /// Resolve options at the process boundary; `SF_ACCEPT_NEW_HOSTKEYS=1` or
    /// the explicit flag enables accept-new host key checking.
    pub fn from_env(dry_run: bool, accept_new_hostkeys: bool) -> Self {
        let from_env = std::env::var(ACCEPT_NEW_HOSTKEYS_ENV)
            .map(|value| value.trim() == "1")
            .unwrap_or(false);
        Self {
            dry_run,
            accept_new_hostkeys: accept_new_hostkeys || from_env,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub cwd: Option<RemotePath>,
    pub env: BTreeMap<String, String>,
    pub check: bool,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: BTreeMap::new(),
            check: true,
        }
    }

    pub fn cwd(mut self, cwd: RemotePath) -> Self {
        self.cwd = Some(cwd);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.env.insert(key.into(), value.into());
        }
        self
    }

    /// Do not treat a non-zero exit as an error.
    pub fn unchecked(mut self) -> Self {
        self.check = false;
        self
    }
}

impl From<ShellCommand> for CommandRequest {
    fn from(command: ShellCommand) -> Self {
        CommandRequest::new(command.render())
    }
}

/// Scripts run in their own `sh -c` so `set -e` and control flow stay scoped.
impl From<Script> for CommandRequest {
    fn from(script: Script) -> Self {
        CommandRequest::from(script.into_command())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`ExecError::CommandFailed`].
    pub fn check(self, command: &str) -> Result<Self, ExecError> {
        if self.success() {
            return Ok(self);
        }
        Err(ExecError::CommandFailed {
            command: command.to_string(),
            status: Some(self.exit_code),
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

pub trait CommandRunner {
    fn execute(&self, request: CommandRequest) -> Result<CommandResult, ExecError>;

    /// Copy a local file to `remote` on the target.
    fn push_file(&self, local: &Path, remote: &RemotePath) -> Result<(), ExecError>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn execute(&self, request: CommandRequest) -> Result<CommandResult, ExecError> {
        (**self).execute(request)
    }

    fn push_file(&self, local: &Path, remote: &RemotePath) -> Result<(), ExecError> {
        (**self).push_file(local, remote)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for Box<T> {
    fn execute(&self, request: CommandRequest) -> Result<CommandResult, ExecError> {
        (**self).execute(request)
    }

    fn push_file(&self, local: &Path, remote: &RemotePath) -> Result<(), ExecError> {
        (**self).push_file(local, remote)
    }
}

/// Production runner for one configured host.
#[derive(Debug, Clone)]
pub struct HostExecutor {
    host: HostConfig,
    options: ExecOptions,
    home: Option<PathBuf>,
}

impl HostExecutor {
    pub fn new(host: HostConfig, options: ExecOptions) -> Self {
        Self {
            host,
            options,
            home: dirs::home_dir(),
        }
    }

    /// Override the home directory loopback commands and pushes resolve
    /// `~/` paths against.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    pub fn options(&self) -> ExecOptions {
        self.options
    }

    /// `cd <cwd> && export K='v' && ... && <command>`; host env first, request env wins.
    pub fn compose(&self, request: &CommandRequest) -> Result<String, ExecError> {
        let mut env = self.host.env.clone();
        env.extend(request.env.clone());

        let mut parts = Vec::with_capacity(env.len() + 2);
        if let Some(cwd) = &request.cwd {
            parts.push(format!("cd {}", cwd.render()));
        }
        for (key, value) in &env {
            if !is_env_key(key) {
                return Err(ExecError::InvalidEnvKey { key: key.clone() });
            }
            parts.push(format!("export {key}={}", shell_quote(value)));
        }
        parts.push(request.command.clone());
        Ok(parts.join(" && "))
    }

    fn ssh_command(&self) -> Command {
        let mut command = Command::new("ssh");
        command.args(["-o", "BatchMode=yes"]);
        if self.options.accept_new_hostkeys {
            command.args(["-o", "StrictHostKeyChecking=accept-new"]);
        }
        command.arg(&self.host.target);
        command
    }

    fn shell_command(&self, composed: &str) -> Command {
        if self.host.is_loopback() {
            let mut command = Command::new("sh");
            command.arg("-c").arg(composed);
            if let Some(home) = &self.home {
                command.current_dir(home).env("HOME", home);
            }
            command
        } else {
            let mut command = self.ssh_command();
            command.arg(composed);
            command
        }
    }

    fn run(&self, mut command: Command, rendered: &str) -> Result<Output, ExecError> {
        command.output().map_err(|source| ExecError::Io {
            command: rendered.to_string(),
            source,
        })
    }
}

impl CommandRunner for HostExecutor {
    fn execute(&self, request: CommandRequest) -> Result<CommandResult, ExecError> {
        let composed = self.compose(&request)?;
        if self.options.dry_run {
            info!(host = %self.host.name, command = %composed, "dry-run");
            return Ok(CommandResult::default());
        }
        debug!(host = %self.host.name, command = %composed, "executing");

        let output = self.run(self.shell_command(&composed), &request.command)?;
        let result = CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if request.check {
            result.check(&request.command)
        } else {
            Ok(result)
        }
    }

    fn push_file(&self, local: &Path, remote: &RemotePath) -> Result<(), ExecError> {
        if self.options.dry_run {
            info!(
                host = %self.host.name,
                local = %local.display(),
                remote = %remote,
                "dry-run push"
            );
            return Ok(());
        }
        debug!(host = %self.host.name, local = %local.display(), remote = %remote, "pushing file");

        if self.host.is_loopback() {
            let home = self.home.clone().unwrap_or_default();
            let target = remote.to_local(&home);
            std::fs::copy(local, &target).map_err(|source| ExecError::Io {
                command: format!("copy {} {}", local.display(), target.display()),
                source,
            })?;
            return Ok(());
        }

        let stdin = File::open(local).map_err(|source| ExecError::ReadLocal {
            path: local.to_path_buf(),
            source,
        })?;
        let rendered = format!("cat > {}", remote.render());
        let mut command = self.ssh_command();
        command
            .arg(&rendered)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = self.run(command, &rendered)?;
        if !output.status.success() {
            return Err(ExecError::CommandFailed {
                command: rendered,
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_executor(home: &Path) -> HostExecutor {
        HostExecutor::new(HostConfig::new("local", "localhost"), ExecOptions::default())
            .with_home(home)
    }

    #[test]
    fn compose_orders_cwd_then_env_then_command() {
        let mut host = HostConfig::new("gpu", "ubuntu@gpu-01");
        host.env.insert("A".to_string(), "host".to_string());
        host.env.insert("B".to_string(), "host b".to_string());
        let executor = HostExecutor::new(host, ExecOptions::default());
        let request = CommandRequest::new("make up")
            .cwd(RemotePath::home(".sf/worktrees/f/r"))
            .env("A", "request");

        let composed = executor.compose(&request).expect("compose");
        assert_eq!(
            composed,
            "cd \"$HOME\"/'.sf/worktrees/f/r' && export A='request' && export B='host b' && make up"
        );
    }

    #[test]
    fn compose_rejects_non_identifier_env_keys() {
        let executor = HostExecutor::new(HostConfig::new("h", "h"), ExecOptions::default());
        for key in ["1ABC", "A-B", "A B", "", "X;rm"] {
            let err = executor
                .compose(&CommandRequest::new("true").env(key, "v"))
                .expect_err("invalid key");
            assert!(matches!(err, ExecError::InvalidEnvKey { .. }), "{key:?}");
        }
        assert!(executor
            .compose(&CommandRequest::new("true").env("_OK_1", "v"))
            .is_ok());
    }

    #[test]
    fn loopback_runs_in_home_with_env() {
        let home = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(home.path().join("sub")).expect("mkdir");
        let executor = local_executor(home.path());

        let result = executor
            .execute(
                CommandRequest::new("printf '%s:%s' \"$(basename \"$PWD\")\" \"$GREETING\"")
                    .cwd(RemotePath::home("sub"))
                    .env("GREETING", "hi there"),
            )
            .expect("execute");
        assert_eq!(result.stdout, "sub:hi there");
        assert!(result.success());
    }

    #[test]
    fn loopback_commands_and_pushes_share_the_home_override() {
        let home = tempfile::tempdir().expect("tempdir");
        let executor = local_executor(home.path());
        let local = home.path().join("payload.txt");
        std::fs::write(&local, "staged").expect("write");

        executor
            .execute(CommandRequest::new("mkdir -p \"$HOME\"/inbox"))
            .expect("mkdir");
        executor
            .push_file(&local, &RemotePath::home("inbox/prompt.txt"))
            .expect("push");
        let result = executor
            .execute(
                CommandRequest::new("cat prompt.txt; printf ':%s' \"$HOME\"")
                    .cwd(RemotePath::home("inbox")),
            )
            .expect("read back");
        assert_eq!(
            result.stdout,
            format!("staged:{}", home.path().display())
        );
    }

    #[test]
    fn checked_failure_carries_streams() {
        let home = tempfile::tempdir().expect("tempdir");
        let executor = local_executor(home.path());

        let err = executor
            .execute(CommandRequest::new("echo oops >&2; exit 3"))
            .expect_err("should fail");
        assert_eq!(err.status(), Some(3));
        assert_eq!(err.detail(), "oops");

        let result = executor
            .execute(CommandRequest::new("exit 4").unchecked())
            .expect("unchecked");
        assert_eq!(result.exit_code, 4);
    }

    #[test]
    fn dry_run_performs_no_io() {
        let home = tempfile::tempdir().expect("tempdir");
        let executor = HostExecutor::new(
            HostConfig::new("local", "localhost"),
            ExecOptions {
                dry_run: true,
                accept_new_hostkeys: false,
            },
        )
        .with_home(home.path());

        let result = executor
            .execute(CommandRequest::new("touch created; exit 9"))
            .expect("dry run");
        assert_eq!(result, CommandResult::default());
        assert!(!home.path().join("created").exists());

        let local = home.path().join("payload.txt");
        std::fs::write(&local, "x").expect("write");
        executor
            .push_file(&local, &RemotePath::home("copied.txt"))
            .expect("dry push");
        assert!(!home.path().join("copied.txt").exists());
    }

    #[test]
    fn loopback_push_copies_file() {
        let home = tempfile::tempdir().expect("tempdir");
        let executor = local_executor(home.path());
        let local = home.path().join("payload.txt");
        std::fs::write(&local, "prompt body").expect("write");

        executor
            .push_file(&local, &RemotePath::home("copied.txt"))
            .expect("push");
        let copied = std::fs::read_to_string(home.path().join("copied.txt")).expect("read");
        assert_eq!(copied, "prompt body");
    }

    #[test]
    fn accept_new_hostkeys_flag_wins_without_env() {
        let options = ExecOptions::from_env(false, true);
        assert!(options.accept_new_hostkeys);
        assert!(!options.dry_run);
    }
}
