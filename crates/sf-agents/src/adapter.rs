use sf_core::LlmKind;
use sf_remote::ShellCommand;

use crate::error::AgentError;

pub trait LlmAdapter: Send + Sync {
    fn kind(&self) -> LlmKind;
    fn executable(&self) -> &str;
    /// Command run inside the session to start an interactive chat.
    fn launch_command(&self) -> ShellCommand;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeAdapter {
    pub executable: String,
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
        }
    }
}

impl LlmAdapter for ClaudeAdapter {
    fn kind(&self) -> LlmKind {
        LlmKind::Claude
    }

    fn executable(&self) -> &str {
        &self.executable
    }

    fn launch_command(&self) -> ShellCommand {
        ShellCommand::new(&self.executable).arg("--chat")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexAdapter {
    pub executable: String,
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self {
            executable: "codex".to_string(),
        }
    }
}

impl LlmAdapter for CodexAdapter {
    fn kind(&self) -> LlmKind {
        LlmKind::Codex
    }

    fn executable(&self) -> &str {
        &self.executable
    }

    fn launch_command(&self) -> ShellCommand {
        ShellCommand::new(&self.executable).arg("--chat")
    }
}

pub fn default_adapter_for(kind: LlmKind) -> Box<dyn LlmAdapter> {
    match kind {
        LlmKind::Claude => Box::new(ClaudeAdapter::default()),
        LlmKind::Codex => Box::new(CodexAdapter::default()),
    }
}

pub fn adapter_for_name(name: &str) -> Result<Box<dyn LlmAdapter>, AgentError> {
    let kind: LlmKind = name.parse().map_err(|_| AgentError::UnknownLlm {
        name: name.trim().to_string(),
    })?;
    Ok(default_adapter_for(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_adapters_launch_chat_mode() {
        let claude = default_adapter_for(LlmKind::Claude);
        assert_eq!(claude.kind(), LlmKind::Claude);
        assert_eq!(claude.launch_command().render(), "'claude' '--chat'");

        let codex = adapter_for_name("codex").expect("codex adapter");
        assert_eq!(codex.executable(), "codex");
        assert_eq!(codex.launch_command().render(), "'codex' '--chat'");
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = adapter_for_name("gemini").err().expect("unknown llm");
        assert!(matches!(err, AgentError::UnknownLlm { ref name } if name == "gemini"));
    }

    #[test]
    fn custom_executable_is_quoted() {
        let adapter = ClaudeAdapter {
            executable: "/opt/claude cli/claude".to_string(),
        };
        assert_eq!(
            adapter.launch_command().render(),
            "'/opt/claude cli/claude' '--chat'"
        );
    }
}
