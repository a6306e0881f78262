//! Session-scoped registry of server backends.
//!
//! Backends are created lazily on first use within a run and closed exactly
//! once at pipeline teardown; a session is never reused across runs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::manifest::ServerManifest;
use crate::transport::{StdioTransport, ToolBackend};

pub struct McpSession {
    manifest: Option<ServerManifest>,
    backends: Mutex<HashMap<String, Arc<dyn ToolBackend>>>,
}

impl McpSession {
    pub fn new(manifest: ServerManifest) -> Self {
        Self {
            manifest: Some(manifest),
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// Build a session over pre-constructed backends. Used by end-to-end
    /// runs and tests that script server behavior in-process.
    pub fn from_backends(backends: HashMap<String, Arc<dyn ToolBackend>>) -> Self {
        Self {
            manifest: None,
            backends: Mutex::new(backends),
        }
    }

    /// Backend for a named server, spawning its transport on first use.
    pub async fn backend(&self, server_name: &str) -> Result<Arc<dyn ToolBackend>> {
        let mut backends = self.backends.lock().await;
        if let Some(backend) = backends.get(server_name) {
            return Ok(backend.clone());
        }

        let manifest = self.manifest.as_ref().ok_or_else(|| {
            crate::error::McpError::Config(format!(
                "no backend registered for server '{server_name}'"
            ))
        })?;
        let spec = manifest.resolved_spec(server_name)?;
        let backend: Arc<dyn ToolBackend> = Arc::new(StdioTransport::new(server_name, spec));
        backends.insert(server_name.to_string(), backend.clone());
        Ok(backend)
    }

    /// Close every backend created during this session. Safe to call more
    /// than once; each backend's own close is idempotent.
    pub async fn close_all(&self) {
        let backends = {
            let mut guard = self.backends.lock().await;
            std::mem::take(&mut *guard)
        };
        for (name, backend) in backends {
            if let Err(e) = backend.close().await {
                warn!(server = %name, error = %e, "Error closing MCP backend");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::types::ToolInfo;

    #[derive(Default)]
    struct CountingBackend {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl ToolBackend for CountingBackend {
        async fn invoke(&self, _tool: &str, _params: Value) -> Result<Value> {
            Ok(json!({}))
        }

        async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
            Ok(Vec::new())
        }

        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn close_all_closes_each_backend_once() {
        let counting = Arc::new(CountingBackend::default());
        let mut backends: HashMap<String, Arc<dyn ToolBackend>> = HashMap::new();
        backends.insert("github".into(), counting.clone());

        let session = McpSession::from_backends(backends);
        session.backend("github").await.unwrap();
        session.close_all().await;
        session.close_all().await;

        assert_eq!(counting.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_server_without_manifest_is_config_error() {
        let session = McpSession::from_backends(HashMap::new());
        assert!(session.backend("github").await.is_err());
    }
}
