use mcp_client::McpError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A workflow was declared incorrectly (duplicate id, unknown
    /// dependency). Raised at build time, never during execution.
    #[error("Builder error: {0}")]
    Builder(String),

    /// A step read a missing upstream result or published twice.
    #[error("Context error: {0}")]
    Context(String),

    /// A step attempt exceeded its deadline. Retryable.
    #[error("Step '{step_id}' timed out after {seconds}s")]
    Timeout { step_id: String, seconds: u64 },

    /// External cancellation observed. Never retried.
    #[error("Step '{0}' cancelled")]
    Cancelled(String),

    #[error("Step '{step_id}' failed: {message}")]
    StepFailed { step_id: String, message: String },

    #[error(transparent)]
    Mcp(#[from] McpError),
}

impl EngineError {
    /// Timeouts and transport losses are retried within the step's budget;
    /// everything else surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Timeout { .. } => true,
            EngineError::Mcp(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Classify an error escaping a custom step function. Transport
    /// failures keep their identity so the retry loop can see them.
    pub fn from_step_error(step_id: &str, err: anyhow::Error) -> Self {
        match err.downcast::<McpError>() {
            Ok(mcp) => EngineError::Mcp(mcp),
            Err(other) => EngineError::StepFailed {
                step_id: step_id.to_string(),
                message: format!("{other:#}"),
            },
        }
    }
}
