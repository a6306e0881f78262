use anyhow::Result;
use async_trait::async_trait;

/// A stateless chat capability: one system + user prompt in, one response
/// out. The batch processor holds a single shared model; batch size is the
/// sole cost-control knob.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Plain chat completion.
    async fn chat_completion(&self, system: &str, user: &str) -> Result<String>;

    /// Chat completion constrained to emit a single JSON object.
    async fn chat_json(&self, system: &str, user: &str) -> Result<String>;
}
