use thiserror::Error;

/// Failure modes of a chat turn.
///
/// `UnknownTool`, `InvalidToolArguments` and `ToolExecutionFault` are turned
/// into diagnostic tool messages by the chat loop. `MalformedModelOutput` is
/// swallowed by place extraction. Everything else reaches the HTTP layer.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("tool '{0}' is not available")]
    UnknownTool(String),

    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidToolArguments { tool: String, reason: String },

    #[error("tool '{tool}' failed: {reason}")]
    ToolExecutionFault { tool: String, reason: String },

    /// Network error, timeout, non-2xx status or an undecodable response body.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("malformed model output: {0}")]
    MalformedModelOutput(String),

    #[error("model kept requesting tools after {0} rounds")]
    ToolLoopExhausted(usize),

    #[error("no API key configured for provider {0}")]
    MissingCredentials(String),
}

impl ChatError {
    /// Errors the chat loop answers with a tool message instead of aborting.
    pub fn is_recoverable_tool_error(&self) -> bool {
        matches!(
            self,
            ChatError::UnknownTool(_)
                | ChatError::InvalidToolArguments { .. }
                | ChatError::ToolExecutionFault { .. }
        )
    }

    /// Short label used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::UnknownTool(_) => "unknown_tool",
            ChatError::InvalidToolArguments { .. } => "invalid_arguments",
            ChatError::ToolExecutionFault { .. } => "tool_fault",
            ChatError::ModelUnavailable(_) => "model_unavailable",
            ChatError::MalformedModelOutput(_) => "malformed_output",
            ChatError::ToolLoopExhausted(_) => "tool_loop_exhausted",
            ChatError::MissingCredentials(_) => "missing_credentials",
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::ModelUnavailable(err.to_string())
    }
}
