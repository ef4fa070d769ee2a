//! Core data model shared by every Session Forge crate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_BASE_BRANCH: &str = "main";

pub const PORT_BASE: u32 = 10_000;
pub const PORT_BLOCK_SIZE: u32 = 100;
pub const PORT_BUCKETS: u32 = 500;

const LOOPBACK_TARGETS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

fn default_base_branch() -> String {
    DEFAULT_BASE_BRANCH.to_string()
}

/// A machine Session Forge can reach over ssh (or the local machine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    /// ssh destination (`user@host` or an ssh config alias), or `localhost`.
    pub target: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Absolute directory holding anchors and worktrees. Defaults to `~/.sf`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<String>,
}

impl HostConfig {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            env: BTreeMap::new(),
            tags: Vec::new(),
            workspace_root: None,
        }
    }

    /// True when commands for this host should run through a local shell.
    pub fn is_loopback(&self) -> bool {
        let target = self.target.trim();
        let host = target
            .rsplit_once('@')
            .map(|(_, host)| host)
            .unwrap_or(target);
        let host = host.trim_start_matches('[').trim_end_matches(']');
        LOOPBACK_TARGETS
            .iter()
            .any(|candidate| host.eq_ignore_ascii_case(candidate))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_base_branch")]
    pub base: String,
    /// Subdirectory of the checkout that sessions work in (monorepo subsets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_subdir: Option<String>,
}

impl RepoConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            base: default_base_branch(),
            anchor_subdir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    #[default]
    DockerCompose,
    PodmanCompose,
    Script,
}

impl RuntimeKind {
    pub const ALL: [RuntimeKind; 3] = [
        RuntimeKind::DockerCompose,
        RuntimeKind::PodmanCompose,
        RuntimeKind::Script,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeKind::DockerCompose => "docker_compose",
            RuntimeKind::PodmanCompose => "podman_compose",
            RuntimeKind::Script => "script",
        }
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        RuntimeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("Unknown service runtime '{value}'"))
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachmentError {
    #[error("Attachment for repo '{repo}' must include at least one host")]
    EmptyHosts { repo: String },
    #[error("Cannot specify both 'compose_file' and 'service' for repo '{repo}'")]
    ConflictingService { repo: String },
    #[error("'script' runtime requires a 'commands' mapping")]
    ScriptWithoutCommands,
}

/// Unvalidated service runtime descriptor as written in feature files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceSpec {
    #[serde(default)]
    pub runtime: RuntimeKind,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub commands: Option<BTreeMap<String, String>>,
}

/// How the services attached to a repo are started and stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ServiceSpec")]
pub struct ServiceConfig {
    pub runtime: RuntimeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<BTreeMap<String, String>>,
}

impl ServiceConfig {
    pub fn compose_file(file: impl Into<String>) -> Self {
        Self {
            runtime: RuntimeKind::DockerCompose,
            file: Some(file.into()),
            commands: None,
        }
    }
}

impl TryFrom<ServiceSpec> for ServiceConfig {
    type Error = AttachmentError;

    fn try_from(spec: ServiceSpec) -> Result<Self, Self::Error> {
        if spec.runtime == RuntimeKind::Script && spec.commands.is_none() {
            return Err(AttachmentError::ScriptWithoutCommands);
        }
        Ok(Self {
            runtime: spec.runtime,
            file: spec.file,
            commands: spec.commands,
        })
    }
}

/// Unvalidated attachment as written in feature files, including the legacy
/// `compose_file` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AttachmentSpec {
    pub repo: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub subdir: Option<String>,
    #[serde(default)]
    pub compose_file: Option<String>,
    #[serde(default)]
    pub service: Option<ServiceConfig>,
}

/// Binding of one feature to one repository across a non-empty set of hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AttachmentSpec")]
pub struct FeatureRepoAttachment {
    pub repo: String,
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceConfig>,
}

impl FeatureRepoAttachment {
    pub fn new(
        repo: impl Into<String>,
        hosts: Vec<String>,
    ) -> Result<Self, AttachmentError> {
        Self::try_from(AttachmentSpec {
            repo: repo.into(),
            hosts,
            ..AttachmentSpec::default()
        })
    }

    pub fn with_subdir(mut self, subdir: Option<String>) -> Self {
        self.subdir = subdir;
        self
    }

    pub fn with_service(mut self, service: Option<ServiceConfig>) -> Self {
        self.service = service;
        self
    }
}

impl TryFrom<AttachmentSpec> for FeatureRepoAttachment {
    type Error = AttachmentError;

    fn try_from(spec: AttachmentSpec) -> Result<Self, Self::Error> {
        if spec.hosts.is_empty() {
            return Err(AttachmentError::EmptyHosts { repo: spec.repo });
        }
        let service = match (spec.compose_file, spec.service) {
            (Some(_), Some(_)) => {
                return Err(AttachmentError::ConflictingService { repo: spec.repo })
            }
            (Some(file), None) => Some(ServiceConfig::compose_file(file)),
            (None, service) => service,
        };
        Ok(Self {
            repo: spec.repo,
            hosts: spec.hosts,
            subdir: spec.subdir,
            service,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub name: String,
    /// Base branch for the feature; falls back to each repo's base when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default)]
    pub repos: Vec<FeatureRepoAttachment>,
}

impl FeatureConfig {
    pub fn new(name: impl Into<String>, base: Option<String>) -> Self {
        Self {
            name: name.into(),
            base,
            repos: Vec::new(),
        }
    }

    pub fn get_attachment(&self, repo: &str) -> Option<&FeatureRepoAttachment> {
        self.repos.iter().find(|attachment| attachment.repo == repo)
    }

    /// Insert or replace the attachment for `attachment.repo`.
    pub fn attach(&mut self, attachment: FeatureRepoAttachment) {
        match self
            .repos
            .iter_mut()
            .find(|existing| existing.repo == attachment.repo)
        {
            Some(existing) => *existing = attachment,
            None => self.repos.push(attachment),
        }
    }

    pub fn effective_base<'a>(&'a self, repo: &'a RepoConfig) -> &'a str {
        match self.base.as_deref() {
            Some(base) if !base.trim().is_empty() => base,
            _ => repo.base.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmKind {
    Claude,
    Codex,
}

impl LlmKind {
    pub const ALL: [LlmKind; 2] = [LlmKind::Claude, LlmKind::Codex];

    pub fn as_str(self) -> &'static str {
        match self {
            LlmKind::Claude => "claude",
            LlmKind::Codex => "codex",
        }
    }

    pub fn known_names() -> String {
        LlmKind::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::str::FromStr for LlmKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        LlmKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| {
                format!(
                    "Unknown llm '{value}'. Known: {}",
                    LlmKind::known_names()
                )
            })
    }
}

impl std::fmt::Display for LlmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the multiplexer session for a (feature, repo, llm) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionDescriptor {
    pub feature: String,
    pub repo: String,
    pub llm: String,
}

impl SessionDescriptor {
    pub fn new(
        feature: impl Into<String>,
        repo: impl Into<String>,
        llm: impl Into<String>,
    ) -> Self {
        Self {
            feature: feature.into(),
            repo: repo.into(),
            llm: llm.into(),
        }
    }

    pub fn name(&self) -> String {
        format!("feat:{}:{}:{}", self.feature, self.repo, self.llm)
    }

    /// Name handed to tmux. tmux rewrites `:` and `.` in session names, so
    /// fields are escaped (`_` as `_u`, `.` as `_d`, `:` as `_c`) and joined
    /// with `__`. Distinct triples always get distinct names.
    pub fn tmux_name(&self) -> String {
        [TMUX_TAG, &self.feature, &self.repo, &self.llm]
            .iter()
            .map(|field| tmux_escape(field))
            .collect::<Vec<_>>()
            .join(TMUX_SEPARATOR)
    }

    /// Inverse of [`tmux_name`](Self::tmux_name). Names not produced by it
    /// yield `None`.
    pub fn from_tmux_name(name: &str) -> Option<Self> {
        let mut fields = tmux_fields(name)?;
        if fields.len() != 4 || fields[0] != TMUX_TAG {
            return None;
        }
        let llm = fields.pop()?;
        let repo = fields.pop()?;
        let feature = fields.pop()?;
        Some(Self::new(feature, repo, llm))
    }
}

impl std::fmt::Display for SessionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

const TMUX_TAG: &str = "feat";
const TMUX_SEPARATOR: &str = "__";

fn tmux_escape(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len());
    for ch in field.chars() {
        match ch {
            '_' => escaped.push_str("_u"),
            '.' => escaped.push_str("_d"),
            ':' => escaped.push_str("_c"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn tmux_fields(name: &str) -> Option<Vec<String>> {
    let mut fields = vec![String::new()];
    let mut chars = name.chars();
    while let Some(ch) = chars.next() {
        let decoded = if ch == '_' {
            match chars.next()? {
                '_' => {
                    fields.push(String::new());
                    continue;
                }
                'u' => '_',
                'd' => '.',
                'c' => ':',
                _ => return None,
            }
        } else {
            ch
        };
        fields.last_mut()?.push(decoded);
    }
    Some(fields)
}

/// Per-invocation description of the prompt to assemble.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PromptPlan {
    pub feature: String,
    pub repo: String,
    pub prompt_file: Option<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_bytes: Option<usize>,
}

/// Deterministic port offset for a feature, optionally scoped to one repo.
///
/// Buckets may repeat across unrelated keys; the offset is stable, not unique.
pub fn compute_port_offset(feature: &str, repo: Option<&str>) -> u32 {
    let key = match repo {
        Some(repo) => format!("{feature}/{repo}"),
        None => feature.to_string(),
    };
    let digest = Sha256::digest(key.as_bytes());
    let leading = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    PORT_BASE + (leading % PORT_BUCKETS) * PORT_BLOCK_SIZE
}
