//! Error taxonomy shared across the workspace.
//!
//! Every module boundary returns typed values built from these kinds; no
//! component panics or leaks low-level faults to its callers.

use thiserror::Error;

/// Classification of every failure the system can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    CommandNotFound,
    Transport,
    HandshakeTimeout,
    ToolNotFound,
    ParameterInvalid,
    LlmAuthentication,
    LlmRateLimit,
    LlmTimeout,
    LlmCommunication,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Transient failures are worth retrying; permanent ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Transport
                | ErrorKind::HandshakeTimeout
                | ErrorKind::LlmRateLimit
                | ErrorKind::LlmTimeout
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum CorralError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("handshake timed out for server '{0}'")]
    HandshakeTimeout(String),

    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    #[error("invalid parameter: {0}")]
    ParameterInvalid(String),

    #[error("LLM authentication failed: {0}")]
    LlmAuthentication(String),

    #[error("LLM rate limited: {0}")]
    LlmRateLimit(String),

    #[error("LLM request timed out: {0}")]
    LlmTimeout(String),

    #[error("LLM communication failed: {0}")]
    LlmCommunication(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CorralError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CorralError::Configuration(_) => ErrorKind::Configuration,
            CorralError::CommandNotFound(_) => ErrorKind::CommandNotFound,
            CorralError::Transport(_) => ErrorKind::Transport,
            CorralError::HandshakeTimeout(_) => ErrorKind::HandshakeTimeout,
            CorralError::ToolNotFound(_) => ErrorKind::ToolNotFound,
            CorralError::ParameterInvalid(_) => ErrorKind::ParameterInvalid,
            CorralError::LlmAuthentication(_) => ErrorKind::LlmAuthentication,
            CorralError::LlmRateLimit(_) => ErrorKind::LlmRateLimit,
            CorralError::LlmTimeout(_) => ErrorKind::LlmTimeout,
            CorralError::LlmCommunication(_) => ErrorKind::LlmCommunication,
            CorralError::Cancelled => ErrorKind::Cancelled,
            CorralError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Short remediation text shown to the user instead of raw internals.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::LlmAuthentication => "Authentication failed. Check API key.".to_string(),
            ErrorKind::LlmRateLimit => "Rate limited by the provider. Wait and retry.".to_string(),
            ErrorKind::LlmTimeout => "Request timed out.".to_string(),
            ErrorKind::Cancelled => "Cancelled.".to_string(),
            ErrorKind::Internal => "Something went wrong. See the log for details.".to_string(),
            _ => self.to_string(),
        }
    }
}
