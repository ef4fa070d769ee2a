//! Service runtimes (docker compose, podman compose, custom scripts) run in a
//! feature worktree with a per-feature port offset.

use std::collections::BTreeMap;

use sf_core::{
    compute_port_offset, FeatureConfig, FeatureRepoAttachment, RepoConfig, RuntimeKind,
    ServiceConfig,
};
use sf_remote::{CommandRequest, CommandResult, CommandRunner, ExecError, RemotePath, ShellCommand};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Missing script command for action '{action}'")]
    MissingScriptCommand { action: String },
    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Up { detach: bool },
    Down { volumes: bool },
    Ps,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Up { .. } => "up",
            ServiceAction::Down { .. } => "down",
            ServiceAction::Ps => "ps",
        }
    }

    fn extra(self) -> Option<&'static str> {
        match self {
            ServiceAction::Up { detach: true } => Some("-d"),
            ServiceAction::Down { volumes: true } => Some("-v"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn service_env(feature: &str, repo: &str) -> BTreeMap<String, String> {
    let offset = compute_port_offset(feature, Some(repo));
    BTreeMap::from([
        (
            "COMPOSE_PROJECT_NAME".to_string(),
            format!("sf-{feature}-{repo}"),
        ),
        ("SF_PORT_OFFSET".to_string(), offset.to_string()),
        ("SF_FEATURE".to_string(), feature.to_string()),
        ("SF_REPO".to_string(), repo.to_string()),
    ])
}

/// The shell command for `action` under `config`.
pub fn build_command(config: &ServiceConfig, action: ServiceAction) -> Result<String, RuntimeError> {
    let compose = |program: &str| {
        let mut command = ShellCommand::new(program).arg("compose");
        if let Some(file) = &config.file {
            command = command.arg("-f").arg(file);
        }
        command = command.arg(action.as_str());
        if let Some(extra) = action.extra() {
            command = command.arg(extra);
        }
        command.render()
    };

    match config.runtime {
        RuntimeKind::DockerCompose => Ok(compose("docker")),
        RuntimeKind::PodmanCompose => Ok(compose("podman")),
        RuntimeKind::Script => config
            .commands
            .as_ref()
            .and_then(|commands| commands.get(action.as_str()))
            .cloned()
            .ok_or_else(|| RuntimeError::MissingScriptCommand {
                action: action.as_str().to_string(),
            }),
    }
}

pub struct ServiceRuntime<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> ServiceRuntime<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Run `action` in `worktree`. `ps` never fails on exit status.
    pub fn run(
        &self,
        repo: &RepoConfig,
        feature: &FeatureConfig,
        attachment: &FeatureRepoAttachment,
        worktree: &RemotePath,
        action: ServiceAction,
    ) -> Result<CommandResult, RuntimeError> {
        let config = attachment.service.clone().unwrap_or_default();
        let command = build_command(&config, action)?;
        let mut request = CommandRequest::new(command)
            .cwd(worktree.clone())
            .envs(service_env(&feature.name, &repo.name));
        if action == ServiceAction::Ps {
            request = request.unchecked();
        }
        let result = self.runner.execute(request)?;
        info!(
            feature = %feature.name,
            repo = %repo.name,
            runtime = %config.runtime,
            action = %action,
            "service command finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_remote::ScriptedRunner;

    fn script_config(commands: &[(&str, &str)]) -> ServiceConfig {
        ServiceConfig {
            runtime: RuntimeKind::Script,
            file: None,
            commands: Some(
                commands
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }

    #[test]
    fn compose_runtimes_build_expected_commands() {
        let default = ServiceConfig::default();
        assert_eq!(
            build_command(&default, ServiceAction::Up { detach: true }).expect("up"),
            "'docker' 'compose' 'up' '-d'"
        );
        let podman = ServiceConfig {
            runtime: RuntimeKind::PodmanCompose,
            file: Some("dev compose.yml".to_string()),
            commands: None,
        };
        assert_eq!(
            build_command(&podman, ServiceAction::Down { volumes: true }).expect("down"),
            "'podman' 'compose' '-f' 'dev compose.yml' 'down' '-v'"
        );
        assert_eq!(
            build_command(&podman, ServiceAction::Ps).expect("ps"),
            "'podman' 'compose' '-f' 'dev compose.yml' 'ps'"
        );
    }

    #[test]
    fn script_runtime_uses_configured_commands() {
        let config = script_config(&[("up", "./scripts/up.sh --fast")]);
        assert_eq!(
            build_command(&config, ServiceAction::Up { detach: true }).expect("up"),
            "./scripts/up.sh --fast"
        );
        let err = build_command(&config, ServiceAction::Ps).expect_err("missing ps");
        assert_eq!(err.to_string(), "Missing script command for action 'ps'");
    }

    #[test]
    fn service_env_carries_project_and_offset() {
        let env = service_env("payments", "core");
        assert_eq!(env["COMPOSE_PROJECT_NAME"], "sf-payments-core");
        assert_eq!(
            env["SF_PORT_OFFSET"],
            compute_port_offset("payments", Some("core")).to_string()
        );
        assert_eq!(env["SF_FEATURE"], "payments");
        assert_eq!(env["SF_REPO"], "core");
    }

    #[test]
    fn ps_is_unchecked_and_runs_in_worktree() {
        let runner = ScriptedRunner::new();
        runner.fail_on("'ps'", 1, "no containers");
        let repo = RepoConfig::new("core", "git@example.com:core.git");
        let feature = FeatureConfig::new("payments", None);
        let attachment =
            FeatureRepoAttachment::new("core", vec!["gpu-01".to_string()]).expect("attachment");
        let worktree = RemotePath::home(".sf/worktrees/payments/core");

        let result = ServiceRuntime::new(&runner)
            .run(&repo, &feature, &attachment, &worktree, ServiceAction::Ps)
            .expect("ps");
        assert_eq!(result.exit_code, 1);
        let request = &runner.requests()[0];
        assert!(!request.check);
        assert_eq!(request.cwd.as_ref(), Some(&worktree));
        assert_eq!(request.env["SF_REPO"], "core");

        let err = ServiceRuntime::new(&runner)
            .run(
                &repo,
                &feature,
                &attachment,
                &worktree,
                ServiceAction::Down { volumes: false },
            )
            .expect("down succeeds");
        assert!(err.success());
    }
}
