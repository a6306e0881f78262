use thiserror::Error;

pub type Result<T> = std::result::Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    /// The connection or server process was lost. Retryable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server returned a structured failure. Never retried.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Manifest loading or environment substitution failed.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl McpError {
    /// Only transport failures are worth a retry; tool errors are
    /// deterministic server answers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, McpError::Transport(_))
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        McpError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Parse(err.to_string())
    }
}
