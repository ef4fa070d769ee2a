use sf_core::{FeatureConfig, HostConfig, RepoConfig};
use sf_remote::{
    CommandRequest, CommandResult, CommandRunner, Condition, RemotePath, Script, ShellCommand,
};
use tracing::{debug, info, warn};

use crate::error::WorkspaceError;
use crate::layout::{feature_branch, WorkspaceLayout};
use crate::lock::AnchorLock;

const MARK_CLONED: &str = "sf:anchor-cloned";
const MARK_WORKTREE_ADDED: &str = "sf:worktree-added";
const MARK_BRANCH_IN_USE: &str = "sf:branch-in-use";
const MARK_WORKTREE_RESET: &str = "sf:worktree-reset";
const MARK_LOCAL_COMMITS: &str = "sf:local-commits";
const MARK_DIRTY: &str = "sf:dirty";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub repo: String,
    pub feature: String,
    pub branch: String,
    pub path: RemotePath,
    /// `path` plus the repo's `anchor_subdir`, where sessions start.
    pub session_root: RemotePath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedWorktree {
    pub path: String,
    pub branch: Option<String>,
    pub head: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchRefresh {
    /// Branch created or moved to the tip of the base.
    Reset,
    /// The feature worktree was hard-reset to the tip of the base.
    WorktreeReset,
    /// Branch is checked out in some other worktree and was left where it was.
    InUse,
}

/// Anchor/branch/worktree lifecycle for one host. Every mutating call is a
/// single round trip holding the anchor lock.
pub struct WorkspaceManager<'a> {
    runner: &'a dyn CommandRunner,
    layout: WorkspaceLayout,
}

impl<'a> WorkspaceManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner, layout: WorkspaceLayout) -> Self {
        Self { runner, layout }
    }

    pub fn for_host(runner: &'a dyn CommandRunner, host: &HostConfig) -> Self {
        Self::new(runner, WorkspaceLayout::for_host(host))
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    fn git(anchor: &RemotePath) -> ShellCommand {
        ShellCommand::new("git").arg("-C").path(anchor)
    }

    fn run_locked(&self, repo: &str, script: Script) -> Result<CommandResult, WorkspaceError> {
        let command = AnchorLock::new(&self.layout, repo).scope(&script);
        debug!(repo, %command, "running locked workspace script");
        Ok(self.runner.execute(CommandRequest::new(command))?)
    }

    /// Clone the repository into its anchor unless `<anchor>/.git` exists.
    pub fn ensure_anchor(&self, repo: &RepoConfig) -> Result<RemotePath, WorkspaceError> {
        let anchor = self.layout.anchor_path(&repo.name);
        let script = Script::new().run_if(
            Condition::Exists(anchor.join(".git")).not(),
            Script::new()
                .run(
                    ShellCommand::new("git")
                        .arg("clone")
                        .arg(&repo.url)
                        .path(&anchor),
                )
                .run(ShellCommand::new("echo").arg(MARK_CLONED)),
        );
        let result = self.run_locked(&repo.name, script)?;
        if has_marker(&result, MARK_CLONED) {
            info!(repo = %repo.name, anchor = %anchor, "anchor cloned");
        }
        Ok(anchor)
    }

    /// Fetch and point `feat/<feature>` at `origin/<effective base>`.
    ///
    /// When the feature worktree exists it is hard-reset in place. Local
    /// commits and uncommitted changes are discarded with a warning.
    pub fn refresh_branch(
        &self,
        repo: &RepoConfig,
        feature: &FeatureConfig,
    ) -> Result<BranchRefresh, WorkspaceError> {
        let anchor = self.layout.anchor_path(&repo.name);
        let worktree = self.layout.worktree_path(&feature.name, &repo.name);
        let branch = feature_branch(&feature.name);
        let base = feature.effective_base(repo);
        let upstream = format!("origin/{base}");

        let checked_out = Self::git(&anchor)
            .args(["worktree", "list", "--porcelain"])
            .pipe("grep")
            .arg("-qxF")
            .arg(format!("branch refs/heads/{branch}"));
        let local_commits = Self::git(&worktree)
            .args(["rev-list", "--max-count=1"])
            .arg(format!("{upstream}..HEAD"))
            .pipe("grep")
            .arg("-q")
            .arg(".");
        let dirty = Self::git(&worktree)
            .args(["status", "--porcelain"])
            .pipe("grep")
            .arg("-q")
            .arg(".");

        let reset_worktree = Script::new()
            .run_if(
                Condition::Succeeds(local_commits),
                Script::new().run(ShellCommand::new("echo").arg(MARK_LOCAL_COMMITS)),
            )
            .run_if(
                Condition::Succeeds(dirty),
                Script::new().run(ShellCommand::new("echo").arg(MARK_DIRTY)),
            )
            .run(
                Self::git(&worktree)
                    .args(["reset", "--hard", "--quiet"])
                    .arg(&upstream),
            )
            .run(ShellCommand::new("echo").arg(MARK_WORKTREE_RESET));
        let move_branch = Script::new().run_if_else(
            Condition::Succeeds(checked_out),
            Script::new().run(ShellCommand::new("echo").arg(MARK_BRANCH_IN_USE)),
            Script::new().run(
                Self::git(&anchor)
                    .args(["branch", "-f"])
                    .arg(&branch)
                    .arg(&upstream),
            ),
        );

        let script = Script::new()
            .run(Self::git(&anchor).args(["fetch", "--prune", "origin"]))
            .run_if_else(
                Condition::Exists(worktree.join(".git")),
                reset_worktree,
                move_branch,
            );
        let result = self.run_locked(&repo.name, script)?;

        if has_marker(&result, MARK_LOCAL_COMMITS) {
            warn!(
                repo = %repo.name,
                branch = %branch,
                "discarded commits not on {upstream}"
            );
        }
        if has_marker(&result, MARK_DIRTY) {
            warn!(
                repo = %repo.name,
                worktree = %worktree,
                "discarded uncommitted changes"
            );
        }
        if has_marker(&result, MARK_WORKTREE_RESET) {
            debug!(repo = %repo.name, worktree = %worktree, base, "worktree reset");
            return Ok(BranchRefresh::WorktreeReset);
        }
        if has_marker(&result, MARK_BRANCH_IN_USE) {
            warn!(
                repo = %repo.name,
                branch = %branch,
                "branch is checked out in another worktree; skipped reset to {upstream}"
            );
            return Ok(BranchRefresh::InUse);
        }
        debug!(repo = %repo.name, branch = %branch, base, "branch refreshed");
        Ok(BranchRefresh::Reset)
    }

    /// Prune stale registrations and add the feature worktree if missing.
    pub fn ensure_worktree(
        &self,
        repo: &RepoConfig,
        feature: &FeatureConfig,
    ) -> Result<WorktreeInfo, WorkspaceError> {
        let anchor = self.layout.anchor_path(&repo.name);
        let path = self.layout.worktree_path(&feature.name, &repo.name);
        let branch = feature_branch(&feature.name);

        let mut create = Script::new();
        if let Some(parent) = path.parent() {
            create = create.run(ShellCommand::new("mkdir").arg("-p").path(&parent));
        }
        let create = create
            .run(
                Self::git(&anchor)
                    .args(["worktree", "add"])
                    .path(&path)
                    .arg(&branch),
            )
            .run(ShellCommand::new("echo").arg(MARK_WORKTREE_ADDED));

        let script = Script::new()
            .run(Self::git(&anchor).args(["worktree", "prune"]))
            .run_if(Condition::Exists(path.join(".git")).not(), create);
        let result = self.run_locked(&repo.name, script)?;
        if has_marker(&result, MARK_WORKTREE_ADDED) {
            info!(repo = %repo.name, feature = %feature.name, path = %path, "worktree created");
        }

        Ok(WorktreeInfo {
            repo: repo.name.clone(),
            feature: feature.name.clone(),
            branch,
            session_root: path.join_opt(repo.anchor_subdir.as_deref()),
            path,
        })
    }

    /// Remove the feature worktree. Missing anchor or worktree is fine.
    pub fn destroy_worktree(&self, repo: &RepoConfig, feature: &str) -> Result<(), WorkspaceError> {
        let anchor = self.layout.anchor_path(&repo.name);
        let path = self.layout.worktree_path(feature, &repo.name);
        let script = Script::new()
            .run_if(
                Condition::Exists(path.clone()),
                Script::new().run_or(
                    Self::git(&anchor)
                        .args(["worktree", "remove", "--force"])
                        .path(&path),
                    ShellCommand::new("rm").arg("-rf").path(&path),
                ),
            )
            .run_if(
                Condition::IsDir(anchor.clone()),
                Script::new().run(Self::git(&anchor).args(["worktree", "prune"])),
            );
        self.run_locked(&repo.name, script)?;
        info!(repo = %repo.name, feature, path = %path, "worktree destroyed");
        Ok(())
    }

    /// `git branch -D feat/<feature>` when the ref exists.
    pub fn delete_branch(&self, repo: &RepoConfig, feature: &str) -> Result<(), WorkspaceError> {
        let anchor = self.layout.anchor_path(&repo.name);
        let branch = feature_branch(feature);
        let exists = Self::git(&anchor)
            .args(["show-ref", "--verify", "--quiet"])
            .arg(format!("refs/heads/{branch}"));
        let script = Script::new()
            .exit_unless(Condition::IsDir(anchor.clone()))
            .run_if(
                Condition::Succeeds(exists),
                Script::new().run(Self::git(&anchor).args(["branch", "-D"]).arg(&branch)),
            );
        self.run_locked(&repo.name, script)?;
        debug!(repo = %repo.name, branch = %branch, "branch deleted");
        Ok(())
    }

    pub fn list_worktrees(&self, repo: &RepoConfig) -> Result<Vec<ListedWorktree>, WorkspaceError> {
        let anchor = self.layout.anchor_path(&repo.name);
        let script = Script::new()
            .exit_unless(Condition::IsDir(anchor.clone()))
            .run(Self::git(&anchor).args(["worktree", "list", "--porcelain"]));
        let result = self.runner.execute(CommandRequest::from(script))?;
        parse_worktree_list(&result.stdout)
    }
}

fn has_marker(result: &CommandResult, marker: &str) -> bool {
    result.stdout.lines().any(|line| line.trim() == marker)
}

pub fn parse_worktree_list(raw: &str) -> Result<Vec<ListedWorktree>, WorkspaceError> {
    let mut listed = Vec::new();

    let mut current_path: Option<String> = None;
    let mut current_branch: Option<String> = None;
    let mut current_head: Option<String> = None;

    for line in raw.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if let Some(path) = current_path.take() {
                listed.push(ListedWorktree {
                    path,
                    branch: current_branch.take(),
                    head: current_head.take(),
                });
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(rest.trim().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("branch ") {
            let branch = rest.trim().trim_start_matches("refs/heads/").to_string();
            current_branch = Some(branch);
            continue;
        }
        if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.trim().to_string());
            continue;
        }
    }

    if listed.is_empty() && !raw.trim().is_empty() {
        return Err(WorkspaceError::Parse {
            context: "unable to parse git worktree list output".to_string(),
        });
    }

    Ok(listed)
}
