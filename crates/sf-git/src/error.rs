use sf_remote::ExecError;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("invalid git output: {context}")]
    Parse { context: String },
}

impl WorkspaceError {
    pub fn detail(&self) -> String {
        match self {
            WorkspaceError::Exec(err) => err.detail(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WorkspaceError;
    use sf_remote::ExecError;

    #[test]
    fn exec_failures_surface_remote_stderr() {
        let err = WorkspaceError::from(ExecError::CommandFailed {
            command: "git fetch --prune origin".to_string(),
            status: Some(128),
            stdout: String::new(),
            stderr: "fatal: could not read from remote repository\n".to_string(),
        });
        assert_eq!(err.to_string(), "fatal: could not read from remote repository");
        assert_eq!(err.detail(), "fatal: could not read from remote repository");
    }

    #[test]
    fn parse_error_formats_context() {
        let err = WorkspaceError::Parse {
            context: "unexpected porcelain".to_string(),
        };
        assert_eq!(err.to_string(), "invalid git output: unexpected porcelain");
    }
}
