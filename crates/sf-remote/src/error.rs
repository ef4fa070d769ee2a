use std::path::PathBuf;

pub const FALLBACK_FAILURE_MESSAGE: &str = "Remote command failed";

/// Human-readable failure detail: stderr, else stdout, else a fixed fallback.
pub fn failure_detail(stdout: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    FALLBACK_FAILURE_MESSAGE.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{}", failure_detail(.stdout, .stderr))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("invalid environment variable name '{key}'")]
    InvalidEnvKey { key: String },
    #[error("failed to read local file {path}: {source}")]
    ReadLocal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    /// What an operator should see for this failure.
    pub fn detail(&self) -> String {
        match self {
            ExecError::CommandFailed { stdout, stderr, .. } => failure_detail(stdout, stderr),
            other => other.to_string(),
        }
    }

    pub fn status(&self) -> Option<i32> {
        match self {
            ExecError::CommandFailed { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn failed(stdout: &str, stderr: &str) -> ExecError {
        ExecError::CommandFailed {
            command: "git fetch".to_string(),
            status: Some(128),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn detail_prefers_stderr_then_stdout_then_fallback() {
        assert_eq!(failed("out", " fatal: no remote \n").detail(), "fatal: no remote");
        assert_eq!(failed("only stdout\n", "  ").detail(), "only stdout");
        assert_eq!(failed("", "").detail(), FALLBACK_FAILURE_MESSAGE);
        assert_eq!(failed("", "boom").to_string(), "boom");
        assert_eq!(failed("", "boom").status(), Some(128));
    }

    #[test]
    fn io_error_keeps_source() {
        let err = ExecError::Io {
            command: "ssh host".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no ssh"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("ssh host"));
    }
}
