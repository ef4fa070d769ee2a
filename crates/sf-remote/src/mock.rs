//! Recording runner with preset responses, for exercising command shapes
//! without a host.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::error::ExecError;
use crate::executor::{CommandRequest, CommandResult, CommandRunner};
use crate::path::RemotePath;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedFile {
    pub local: PathBuf,
    pub remote: RemotePath,
    pub contents: String,
}

/// Rules match when the command contains `pattern`; the first matching rule
/// wins, then queued responses, then an empty success.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: RefCell<Vec<(String, CommandResult)>>,
    queue: RefCell<VecDeque<CommandResult>>,
    requests: RefCell<Vec<CommandRequest>>,
    pushes: RefCell<Vec<PushedFile>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_to(&self, pattern: impl Into<String>, result: CommandResult) -> &Self {
        self.rules.borrow_mut().push((pattern.into(), result));
        self
    }

    pub fn fail_on(&self, pattern: impl Into<String>, exit_code: i32, stderr: &str) -> &Self {
        self.respond_to(pattern, CommandResult::failed(exit_code, stderr))
    }

    pub fn push_response(&self, result: CommandResult) -> &Self {
        self.queue.borrow_mut().push_back(result);
        self
    }

    pub fn requests(&self) -> Vec<CommandRequest> {
        self.requests.borrow().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.command.clone())
            .collect()
    }

    pub fn pushed_files(&self) -> Vec<PushedFile> {
        self.pushes.borrow().clone()
    }

    fn respond(&self, command: &str) -> CommandResult {
        let matched = self
            .rules
            .borrow()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, result)| result.clone());
        matched
            .or_else(|| self.queue.borrow_mut().pop_front())
            .unwrap_or_default()
    }
}

impl CommandRunner for ScriptedRunner {
    fn execute(&self, request: CommandRequest) -> Result<CommandResult, ExecError> {
        let result = self.respond(&request.command);
        let check = request.check;
        let command = request.command.clone();
        self.requests.borrow_mut().push(request);
        if check {
            result.check(&command)
        } else {
            Ok(result)
        }
    }

    fn push_file(&self, local: &Path, remote: &RemotePath) -> Result<(), ExecError> {
        let contents = std::fs::read_to_string(local).map_err(|source| ExecError::ReadLocal {
            path: local.to_path_buf(),
            source,
        })?;
        self.pushes.borrow_mut().push(PushedFile {
            local: local.to_path_buf(),
            remote: remote.clone(),
            contents,
        });
        Ok(())
    }
}
