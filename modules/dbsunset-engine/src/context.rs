use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::watch;

use mcp_client::{McpSession, ToolBackend};

use crate::error::EngineError;

/// Per-run shared state. The engine owns it: step results are published
/// exactly once by the engine when a step completes; steps read upstream
/// results and exchange ad-hoc values through the shared map.
pub struct WorkflowContext {
    pub workflow_id: String,
    session: Arc<McpSession>,
    step_results: RwLock<HashMap<String, Value>>,
    shared: RwLock<HashMap<String, Value>>,
    cancel_rx: watch::Receiver<bool>,
}

impl WorkflowContext {
    pub(crate) fn new(
        workflow_id: String,
        session: Arc<McpSession>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            workflow_id,
            session,
            step_results: RwLock::new(HashMap::new()),
            shared: RwLock::new(HashMap::new()),
            cancel_rx,
        }
    }

    /// Backend for a named MCP server, created lazily within this run.
    pub async fn backend(&self, server_name: &str) -> mcp_client::Result<Arc<dyn ToolBackend>> {
        self.session.backend(server_name).await
    }

    pub fn session(&self) -> &Arc<McpSession> {
        &self.session
    }

    /// Publish a step result. A second write for the same id is a defect.
    pub(crate) fn publish_step_result(
        &self,
        step_id: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        let mut results = self.step_results.write().expect("context poisoned");
        if results.contains_key(step_id) {
            return Err(EngineError::Context(format!(
                "step result '{step_id}' published twice"
            )));
        }
        results.insert(step_id.to_string(), value);
        Ok(())
    }

    pub fn step_result(&self, step_id: &str) -> Option<Value> {
        self.step_results
            .read()
            .expect("context poisoned")
            .get(step_id)
            .cloned()
    }

    /// Read an upstream result that the DAG guarantees to exist; its
    /// absence means a declared dependency was violated.
    pub fn require_step_result(&self, step_id: &str) -> Result<Value, EngineError> {
        self.step_result(step_id).ok_or_else(|| {
            EngineError::Context(format!("missing upstream step result '{step_id}'"))
        })
    }

    pub fn set_shared(&self, key: &str, value: Value) {
        self.shared
            .write()
            .expect("context poisoned")
            .insert(key.to_string(), value);
    }

    pub fn get_shared(&self, key: &str) -> Option<Value> {
        self.shared
            .read()
            .expect("context poisoned")
            .get(key)
            .cloned()
    }

    pub fn require_shared(&self, key: &str) -> Result<Value, EngineError> {
        self.get_shared(key)
            .ok_or_else(|| EngineError::Context(format!("missing shared value '{key}'")))
    }

    /// True once external cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// A receiver steps can `select!` on for cooperative abort.
    pub fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_context() -> WorkflowContext {
        let (_tx, rx) = watch::channel(false);
        let session = Arc::new(McpSession::from_backends(HashMap::new()));
        WorkflowContext::new("wf-test".into(), session, rx)
    }

    #[test]
    fn second_publish_is_a_defect() {
        let ctx = test_context();
        ctx.publish_step_result("discovery", json!({"files": 1}))
            .unwrap();
        let err = ctx
            .publish_step_result("discovery", json!({"files": 2}))
            .unwrap_err();
        assert!(matches!(err, EngineError::Context(_)));
        // The first value stays.
        assert_eq!(ctx.step_result("discovery").unwrap()["files"], 1);
    }

    #[test]
    fn missing_upstream_result_is_context_error() {
        let ctx = test_context();
        assert!(matches!(
            ctx.require_step_result("nope").unwrap_err(),
            EngineError::Context(_)
        ));
    }

    #[test]
    fn shared_values_round_trip() {
        let ctx = test_context();
        ctx.set_shared("discovery", json!({"matched": 3}));
        assert_eq!(ctx.get_shared("discovery").unwrap()["matched"], 3);
        assert!(ctx.get_shared("other").is_none());
    }
}
