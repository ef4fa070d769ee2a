use sf_core::LlmKind;
use sf_remote::ExecError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Unknown llm '{name}'. Known: {}", LlmKind::known_names())]
    UnknownLlm { name: String },
    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[cfg(test)]
mod tests {
    use super::AgentError;
    use sf_remote::ExecError;

    #[test]
    fn unknown_llm_lists_known_adapters() {
        let err = AgentError::UnknownLlm {
            name: "gpt".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown llm 'gpt'. Known: claude, codex");
    }

    #[test]
    fn exec_error_passes_detail_through() {
        let err = AgentError::from(ExecError::CommandFailed {
            command: "tmux load-buffer".to_string(),
            status: Some(1),
            stdout: String::new(),
            stderr: "no server running".to_string(),
        });
        assert_eq!(err.to_string(), "no server running");
    }
}
