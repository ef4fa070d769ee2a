//! Prompt payload assembly from a local prompt file and worktree files.

use std::fs;
use std::path::PathBuf;

use sf_core::PromptPlan;
use sf_remote::{CommandRequest, CommandRunner, ExecError, RemotePath, ShellCommand};
use tracing::debug;

use crate::glob::PathFilter;

pub const DEFAULT_INCLUDE: &str = "README.md";
pub const TRUNCATION_MARKER: &str = "\n# [truncated due to max-bytes]\n";

/// Prints each argument as `\n# File: <path>\n\n<content>\n`, skipping
/// anything that is no longer a regular file.
const FETCH_LOOP: &str = r#"for path in "$@"; do [ -f "$path" ] || continue; printf '\n# File: %s\n\n' "$path"; cat -- "$path"; printf '\n'; done"#;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("failed to read prompt file {path}: {source}")]
    ReadPromptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Exec(#[from] ExecError),
}

pub struct PromptAssembler<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> PromptAssembler<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    pub fn build(&self, worktree_root: &RemotePath, plan: &PromptPlan) -> Result<String, PromptError> {
        let mut parts = Vec::new();
        if let Some(path) = &plan.prompt_file {
            let body = fs::read_to_string(path).map_err(|source| PromptError::ReadPromptFile {
                path: path.clone(),
                source,
            })?;
            parts.push(body);
        }
        parts.push(self.collect_files(worktree_root, plan)?);

        Ok(parts
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    fn collect_files(&self, root: &RemotePath, plan: &PromptPlan) -> Result<String, PromptError> {
        let filter = PathFilter::new(plan.include.clone(), plan.exclude.clone());
        if filter.is_empty() {
            return Ok(String::new());
        }

        let listing = self.runner.execute(
            CommandRequest::from(ShellCommand::new("find").args([".", "-type", "f"]))
                .cwd(root.clone()),
        )?;
        let selected = filter.select(listing.stdout.lines());
        debug!(root = %root, files = selected.len(), "selected prompt files");
        if selected.is_empty() {
            return Ok(String::new());
        }

        let fetch = ShellCommand::new("sh")
            .arg("-c")
            .arg(FETCH_LOOP)
            .arg("sf-prompt")
            .args(&selected);
        let result = self
            .runner
            .execute(CommandRequest::from(fetch).cwd(root.clone()))?;

        Ok(match plan.max_bytes {
            Some(max_bytes) => truncate_payload(result.stdout, max_bytes),
            None => result.stdout,
        })
    }
}

/// Cut `content` to at most `max_bytes` bytes without splitting a character,
/// then append the truncation marker.
pub fn truncate_payload(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }
    let mut end = max_bytes;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = content[..end].to_string();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
