//! Best-effort chat notifications. A failed post is a warning in the
//! workflow log, never a workflow failure.

use dbsunset_common::LogRegistry;
use mcp_client::ChatClient;
use tracing::warn;

pub async fn post_best_effort(
    chat: Option<&ChatClient>,
    channel: Option<&str>,
    text: &str,
    registry: &LogRegistry,
    workflow_id: &str,
) {
    let (Some(chat), Some(channel)) = (chat, channel) else {
        return;
    };

    if let Err(e) = chat.post_message(channel, text).await {
        warn!(channel, error = %e, "Slack notification failed");
        registry.warning(
            workflow_id,
            format!("Slack notification to {channel} failed: {e}"),
        );
    }
}
