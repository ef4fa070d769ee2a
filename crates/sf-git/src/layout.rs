//! Where anchors, locks and worktrees live on a host.

use sf_core::HostConfig;
use sf_remote::RemotePath;

/// Home-relative default for hosts without `workspace_root`.
pub const DEFAULT_WORKSPACE_ROOT: &str = ".sf";

pub fn feature_branch(feature: &str) -> String {
    format!("feat/{feature}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: RemotePath,
}

impl WorkspaceLayout {
    pub fn new(root: RemotePath) -> Self {
        Self { root }
    }

    pub fn for_host(host: &HostConfig) -> Self {
        match host.workspace_root.as_deref() {
            Some(root) if !root.trim().is_empty() => Self::new(RemotePath::parse(root)),
            _ => Self::new(RemotePath::home(DEFAULT_WORKSPACE_ROOT)),
        }
    }

    pub fn root(&self) -> &RemotePath {
        &self.root
    }

    pub fn anchors_dir(&self) -> RemotePath {
        self.root.join("anchors")
    }

    pub fn anchor_path(&self, repo: &str) -> RemotePath {
        self.anchors_dir().join(repo)
    }

    pub fn lock_path(&self, repo: &str) -> RemotePath {
        self.anchors_dir().join(&format!("{repo}.lock"))
    }

    pub fn worktree_path(&self, feature: &str, repo: &str) -> RemotePath {
        self.root.join("worktrees").join(feature).join(repo)
    }
}
