//! Feature workflows across hosts: sync, sessions, prompts, services, destroy.

use std::io::Write;
use std::path::PathBuf;

use sf_agents::{
    adapter_for_name, probe_host, AgentError, HostProbeReport, LlmAdapter, SessionManager,
};
use sf_core::{
    check_name, has_errors, validate_feature, AttachmentError, FeatureConfig,
    FeatureRepoAttachment, HostConfig, InvalidName, PromptPlan, RepoConfig, ResolveError,
    ServiceConfig, SessionDescriptor, SfConfig, StateError, StateStore, ValidationLevel,
};
use sf_git::{WorkspaceError, WorkspaceLayout, WorkspaceManager, WorktreeInfo};
use sf_remote::{
    CommandRequest, CommandResult, CommandRunner, ExecError, ExecOptions, HostExecutor,
    RemotePath, ShellCommand,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::prompt::{PromptAssembler, PromptError, DEFAULT_INCLUDE};
use crate::runtime::{RuntimeError, ServiceAction, ServiceRuntime};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    InvalidName(#[from] InvalidName),
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("No repo attachments found to sync")]
    NoAttachments,
    #[error("Repo '{repo}' is not attached to feature '{feature}'")]
    RepoNotAttached { feature: String, repo: String },
    #[error("Attachment has no hosts configured")]
    NoHosts,
    #[error("Feature '{name}' already exists")]
    FeatureExists { name: String },
    #[error("Prompt payload is empty")]
    EmptyPrompt,
    #[error("Feature '{feature}' has configuration errors: {issues}")]
    Invalid { feature: String, issues: String },
    #[error("failed to stage prompt file: {source}")]
    StagePrompt {
        #[source]
        source: std::io::Error,
    },
}

/// Hands out a command runner for a configured host.
pub trait Connector {
    fn connect<'a>(&'a self, host: &HostConfig) -> Box<dyn CommandRunner + 'a>;
}

/// ssh (or local shell for loopback targets) via [`HostExecutor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector {
    pub options: ExecOptions,
}

impl Connector for SshConnector {
    fn connect<'a>(&'a self, host: &HostConfig) -> Box<dyn CommandRunner + 'a> {
        Box::new(HostExecutor::new(host.clone(), self.options))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    pub host: String,
    pub repo: String,
    pub worktree: RemotePath,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    pub feature: String,
    pub repo: String,
    pub llm: String,
    pub host: Option<String>,
    pub subdir: Option<String>,
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session: SessionDescriptor,
    pub host: String,
    pub cwd: RemotePath,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSummary {
    pub session: SessionDescriptor,
    pub host: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptRequest {
    pub feature: String,
    pub repo: String,
    pub llm: String,
    pub prompt_file: Option<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_bytes: Option<usize>,
    pub host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSummary {
    pub session: SessionDescriptor,
    pub host: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyEntry {
    pub host: String,
    pub repo: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOutcome {
    pub host: String,
    pub repo: String,
    pub result: CommandResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSessions {
    pub host: String,
    pub sessions: Vec<String>,
}

/// One-shot setup: register host and repo, attach, sync, start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpRequest {
    pub host: String,
    pub target: String,
    pub repo: String,
    pub url: String,
    pub feature: String,
    pub llm: String,
    pub base: Option<String>,
    pub repo_base: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpSummary {
    pub synced: Vec<SyncEntry>,
    pub session: SessionSummary,
    pub prompt: Option<PromptSummary>,
}

pub struct Orchestrator<C> {
    store: StateStore,
    connector: C,
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(store: StateStore, connector: C) -> Self {
        Self { store, connector }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn add_host(&self, host: HostConfig) -> Result<(), OrchestratorError> {
        check_name("host", &host.name)?;
        let mut config = self.store.load_config()?;
        info!(host = %host.name, target = %host.target, "saving host");
        config.ensure_host(host);
        self.store.save_config(&config)?;
        Ok(())
    }

    pub fn add_repo(&self, repo: RepoConfig) -> Result<(), OrchestratorError> {
        check_name("repo", &repo.name)?;
        let mut config = self.store.load_config()?;
        info!(repo = %repo.name, url = %repo.url, "saving repo");
        config.ensure_repo(repo);
        self.store.save_config(&config)?;
        Ok(())
    }

    pub fn create_feature(
        &self,
        name: &str,
        base: Option<String>,
    ) -> Result<FeatureConfig, OrchestratorError> {
        if self.store.try_load_feature(name)?.is_some() {
            return Err(OrchestratorError::FeatureExists {
                name: name.to_string(),
            });
        }
        let feature = FeatureConfig::new(name, base);
        self.store.save_feature(&feature)?;
        Ok(feature)
    }

    /// Attach `repo` to `feature` on `hosts`, replacing any previous attachment.
    pub fn attach_repo(
        &self,
        feature: &str,
        repo: &str,
        hosts: Vec<String>,
        subdir: Option<String>,
        service: Option<ServiceConfig>,
    ) -> Result<FeatureRepoAttachment, OrchestratorError> {
        let config = self.store.load_config()?;
        let mut feature_config = self.store.load_feature(feature)?;
        config.repo(repo)?;
        for host in &hosts {
            config.host(host)?;
        }
        let attachment = FeatureRepoAttachment::new(repo, hosts)?
            .with_subdir(subdir)
            .with_service(service);
        feature_config.attach(attachment.clone());
        self.store.save_feature(&feature_config)?;
        Ok(attachment)
    }

    /// Feature plus the configuration it references, refusing invalid state.
    fn load(&self, feature: &str) -> Result<(SfConfig, FeatureConfig), OrchestratorError> {
        let config = self.store.load_config()?;
        let feature_config = self.store.load_feature(feature)?;
        let issues = validate_feature(&config, &feature_config);
        if has_errors(&issues) {
            let issues = issues
                .iter()
                .filter(|issue| issue.level == ValidationLevel::Error)
                .map(|issue| issue.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(OrchestratorError::Invalid {
                feature: feature.to_string(),
                issues,
            });
        }
        Ok((config, feature_config))
    }

    fn prepare_worktree(
        &self,
        runner: &dyn CommandRunner,
        host: &HostConfig,
        repo: &RepoConfig,
        feature: &FeatureConfig,
    ) -> Result<WorktreeInfo, OrchestratorError> {
        let workspace = WorkspaceManager::for_host(runner, host);
        workspace.ensure_anchor(repo)?;
        workspace.refresh_branch(repo, feature)?;
        Ok(workspace.ensure_worktree(repo, feature)?)
    }

    pub fn sync_feature(
        &self,
        feature: &str,
        repo_filter: Option<&str>,
    ) -> Result<Vec<SyncEntry>, OrchestratorError> {
        let (config, feature_config) = self.load(feature)?;
        let attachments: Vec<&FeatureRepoAttachment> = feature_config
            .repos
            .iter()
            .filter(|attachment| repo_filter.map_or(true, |repo| attachment.repo == repo))
            .collect();
        if attachments.is_empty() {
            return Err(OrchestratorError::NoAttachments);
        }

        let mut entries = Vec::new();
        for attachment in attachments {
            let repo = config.repo(&attachment.repo)?;
            for host_name in &attachment.hosts {
                let host = config.host(host_name)?;
                let runner = self.connector.connect(host);
                let worktree = self.prepare_worktree(&*runner, host, repo, &feature_config)?;
                info!(feature, repo = %repo.name, host = %host.name, "feature synced");
                entries.push(SyncEntry {
                    host: host.name.clone(),
                    repo: repo.name.clone(),
                    worktree: worktree.path,
                });
            }
        }
        Ok(entries)
    }

    pub fn start_session(&self, request: StartRequest) -> Result<SessionSummary, OrchestratorError> {
        let (config, feature) = self.load(&request.feature)?;
        let attachment = attachment(&feature, &request.repo)?;
        let host = config.host(select_host(attachment, request.host.as_deref())?)?;
        let repo = config.repo(&attachment.repo)?;
        let command = match request.command {
            Some(command) => command,
            None => adapter_for_name(&request.llm)?.launch_command().render(),
        };

        let runner = self.connector.connect(host);
        let worktree = self.prepare_worktree(&*runner, host, repo, &feature)?;
        let cwd = worktree
            .session_root
            .join_opt(attachment.subdir.as_deref())
            .join_opt(request.subdir.as_deref());
        let session = SessionDescriptor::new(&feature.name, &repo.name, &request.llm);
        SessionManager::new(&*runner).start_session(&session, &cwd, &command)?;

        Ok(SessionSummary {
            session,
            host: host.name.clone(),
            cwd,
            command,
        })
    }

    pub fn stop_session(
        &self,
        feature: &str,
        repo: &str,
        llm: &str,
        host: Option<&str>,
    ) -> Result<StopSummary, OrchestratorError> {
        let (config, feature_config) = self.load(feature)?;
        let attachment = attachment(&feature_config, repo)?;
        let host = config.host(select_host(attachment, host)?)?;
        let runner = self.connector.connect(host);
        let session = SessionDescriptor::new(feature, repo, llm);
        SessionManager::new(&*runner).kill_session(&session)?;
        Ok(StopSummary {
            session,
            host: host.name.clone(),
        })
    }

    pub fn send_prompt(&self, request: PromptRequest) -> Result<PromptSummary, OrchestratorError> {
        let (config, feature) = self.load(&request.feature)?;
        let attachment = attachment(&feature, &request.repo)?;
        let host = config.host(select_host(attachment, request.host.as_deref())?)?;
        let repo = config.repo(&attachment.repo)?;

        let runner = self.connector.connect(host);
        let worktree = self.prepare_worktree(&*runner, host, repo, &feature)?;
        let root = worktree.session_root.join_opt(attachment.subdir.as_deref());

        let include = if request.include.is_empty() {
            vec![DEFAULT_INCLUDE.to_string()]
        } else {
            request.include
        };
        let plan = PromptPlan {
            feature: feature.name.clone(),
            repo: repo.name.clone(),
            prompt_file: request.prompt_file,
            include,
            exclude: request.exclude,
            max_bytes: request.max_bytes,
        };
        let payload = PromptAssembler::new(&*runner).build(&root, &plan)?;
        if payload.is_empty() {
            return Err(OrchestratorError::EmptyPrompt);
        }

        let session = SessionDescriptor::new(&feature.name, &repo.name, &request.llm);
        let mut staged = tempfile::Builder::new()
            .prefix("sf-prompt-")
            .suffix(".txt")
            .tempfile()
            .map_err(|source| OrchestratorError::StagePrompt { source })?;
        staged
            .write_all(payload.as_bytes())
            .and_then(|_| staged.flush())
            .map_err(|source| OrchestratorError::StagePrompt { source })?;

        let remote = RemotePath::absolute(format!(
            "/tmp/.sf_prompt.{}.{}.txt",
            prompt_slug(&session),
            Uuid::new_v4().simple()
        ));
        runner.push_file(staged.path(), &remote)?;
        let delivered = SessionManager::new(&*runner).deliver_buffer(&session, &remote);

        let cleanup = CommandRequest::from(ShellCommand::new("rm").arg("-f").path(&remote));
        if let Err(err) = runner.execute(cleanup.unchecked()) {
            warn!(remote = %remote, error = %err.detail(), "failed to remove staged prompt");
        }
        if let Err(err) = staged.close() {
            warn!(error = %err, "failed to remove local prompt file");
        }
        delivered?;

        info!(session = %session, host = %host.name, bytes = payload.len(), "prompt sent");
        Ok(PromptSummary {
            session,
            host: host.name.clone(),
            bytes: payload.len(),
        })
    }

    /// Kill sessions, remove worktrees and branches on every attached host,
    /// then forget the feature.
    pub fn destroy_feature(&self, feature: &str) -> Result<Vec<DestroyEntry>, OrchestratorError> {
        let (config, feature_config) = self.load(feature)?;
        let mut entries = Vec::new();
        for attachment in &feature_config.repos {
            let repo = config.repo(&attachment.repo)?;
            for host_name in &attachment.hosts {
                let host = config.host(host_name)?;
                let runner = self.connector.connect(host);
                let killed = SessionManager::new(&*runner).kill_feature_sessions(feature);
                debug!(host = %host.name, sessions = ?killed, "feature sessions killed");

                let workspace = WorkspaceManager::for_host(&*runner, host);
                workspace.destroy_worktree(repo, feature)?;
                workspace.delete_branch(repo, feature)?;
                entries.push(DestroyEntry {
                    host: host.name.clone(),
                    repo: repo.name.clone(),
                });
            }
        }
        self.store.delete_feature(feature)?;
        info!(feature, "feature destroyed");
        Ok(entries)
    }

    /// Run a service action in the feature worktree. Without a host override
    /// every attached host is visited in order.
    pub fn services(
        &self,
        feature: &str,
        repo: &str,
        action: ServiceAction,
        host: Option<&str>,
    ) -> Result<Vec<ServiceOutcome>, OrchestratorError> {
        let (config, feature_config) = self.load(feature)?;
        let attachment = attachment(&feature_config, repo)?;
        let repo_config = config.repo(&attachment.repo)?;
        let hosts: Vec<&str> = match host {
            Some(_) => vec![select_host(attachment, host)?],
            None => attachment.hosts.iter().map(String::as_str).collect(),
        };

        let mut outcomes = Vec::new();
        for host_name in hosts {
            let host = config.host(host_name)?;
            let runner = self.connector.connect(host);
            let worktree = WorkspaceLayout::for_host(host).worktree_path(feature, repo);
            let result = ServiceRuntime::new(&*runner).run(
                repo_config,
                &feature_config,
                attachment,
                &worktree,
                action,
            )?;
            outcomes.push(ServiceOutcome {
                host: host.name.clone(),
                repo: repo.to_string(),
                result,
            });
        }
        Ok(outcomes)
    }

    /// Sessions on every configured host; unreachable hosts list nothing.
    pub fn session_status(&self) -> Result<Vec<HostSessions>, OrchestratorError> {
        let config = self.store.load_config()?;
        Ok(config
            .hosts
            .values()
            .map(|host| {
                let runner = self.connector.connect(host);
                HostSessions {
                    host: host.name.clone(),
                    sessions: SessionManager::new(&*runner).list_sessions(),
                }
            })
            .collect())
    }

    pub fn bootstrap(
        &self,
        hosts: &[String],
        llms: &[String],
    ) -> Result<Vec<HostProbeReport>, OrchestratorError> {
        let config = self.store.load_config()?;
        let adapters = llms
            .iter()
            .map(|name| adapter_for_name(name))
            .collect::<Result<Vec<Box<dyn LlmAdapter>>, _>>()?;
        let mut reports = Vec::new();
        for name in hosts {
            let host = config.host(name)?;
            let runner = self.connector.connect(host);
            reports.push(probe_host(&*runner, &host.name, &adapters));
        }
        Ok(reports)
    }

    /// Register host/repo, create or update the feature, attach, sync and
    /// start the session. `prompt` is sent last when given.
    pub fn up(
        &self,
        request: UpRequest,
        prompt: Option<PromptRequest>,
    ) -> Result<UpSummary, OrchestratorError> {
        check_name("host", &request.host)?;
        check_name("repo", &request.repo)?;
        let mut config = self.store.load_config()?;

        let mut host = config
            .hosts
            .get(&request.host)
            .cloned()
            .unwrap_or_else(|| HostConfig::new(&request.host, &request.target));
        host.target = request.target.clone();
        config.ensure_host(host);

        let mut repo = config
            .repos
            .get(&request.repo)
            .cloned()
            .unwrap_or_else(|| RepoConfig::new(&request.repo, &request.url));
        repo.url = request.url.clone();
        if let Some(base) = request.repo_base.as_ref().or(request.base.as_ref()) {
            repo.base = base.clone();
        }
        config.ensure_repo(repo);
        self.store.save_config(&config)?;

        let mut feature = self
            .store
            .try_load_feature(&request.feature)?
            .unwrap_or_else(|| FeatureConfig::new(&request.feature, None));
        if request.base.is_some() {
            feature.base = request.base.clone();
        }
        let attachment = match feature.get_attachment(&request.repo) {
            Some(existing) if existing.hosts.contains(&request.host) => existing.clone(),
            Some(existing) => {
                let mut updated = existing.clone();
                updated.hosts.push(request.host.clone());
                updated
            }
            None => FeatureRepoAttachment::new(&request.repo, vec![request.host.clone()])?,
        };
        feature.attach(attachment);
        self.store.save_feature(&feature)?;

        let synced = self.sync_feature(&request.feature, Some(&request.repo))?;
        let session = self.start_session(StartRequest {
            feature: request.feature.clone(),
            repo: request.repo.clone(),
            llm: request.llm.clone(),
            host: Some(request.host.clone()),
            ..StartRequest::default()
        })?;
        let prompt = prompt.map(|prompt| self.send_prompt(prompt)).transpose()?;
        Ok(UpSummary {
            synced,
            session,
            prompt,
        })
    }
}

fn attachment<'f>(
    feature: &'f FeatureConfig,
    repo: &str,
) -> Result<&'f FeatureRepoAttachment, OrchestratorError> {
    feature
        .get_attachment(repo)
        .ok_or_else(|| OrchestratorError::RepoNotAttached {
            feature: feature.name.clone(),
            repo: repo.to_string(),
        })
}

/// The override when it is one of the attachment's hosts, else the first host.
fn select_host<'a>(
    attachment: &'a FeatureRepoAttachment,
    requested: Option<&str>,
) -> Result<&'a str, OrchestratorError> {
    if let Some(requested) = requested {
        if let Some(host) = attachment.hosts.iter().find(|host| *host == requested) {
            return Ok(host);
        }
        warn!(
            host = requested,
            repo = %attachment.repo,
            "host is not attached; falling back to the first attached host"
        );
    }
    attachment
        .hosts
        .first()
        .map(String::as_str)
        .ok_or(OrchestratorError::NoHosts)
}

fn prompt_slug(session: &SessionDescriptor) -> String {
    [&session.feature, &session.repo, &session.llm]
        .iter()
        .map(|part| part.replace(['/', ':'], "_"))
        .collect::<Vec<_>>()
        .join(".")
}
