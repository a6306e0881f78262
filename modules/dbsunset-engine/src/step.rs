use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::WorkflowContext;

/// UI/logging tag describing what a step talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Custom,
    SourceControl,
    Pack,
    Chat,
    Llm,
    Filesystem,
}

/// A user-defined step body. Errors are classified by the engine: a
/// transport failure bubbling up from an MCP call is retried, anything else
/// fails the step.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: Arc<WorkflowContext>,
        step: WorkflowStep,
    ) -> anyhow::Result<Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(Arc<WorkflowContext>, WorkflowStep) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn execute(
        &self,
        ctx: Arc<WorkflowContext>,
        step: WorkflowStep,
    ) -> anyhow::Result<Value> {
        (self.0)(ctx, step).await
    }
}

/// Wrap an async closure as a [`StepHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn StepHandler>
where
    F: Fn(Arc<WorkflowContext>, WorkflowStep) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// What a step executes: a custom function, or a direct tool binding.
#[derive(Clone)]
pub enum StepExec {
    Handler(Arc<dyn StepHandler>),
    Tool { server: String, tool: String },
}

impl std::fmt::Debug for StepExec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepExec::Handler(_) => write!(f, "Handler(..)"),
            StepExec::Tool { server, tool } => f
                .debug_struct("Tool")
                .field("server", server)
                .field("tool", tool)
                .finish(),
        }
    }
}

/// One node of the workflow DAG.
#[derive(Clone, Debug)]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    pub kind: StepKind,
    pub parameters: Map<String, Value>,
    pub depends_on: Vec<String>,
    /// `None` falls back to the workflow default.
    pub timeout: Option<Duration>,
    pub retry_count: Option<u32>,
    pub(crate) exec: StepExec,
}

impl WorkflowStep {
    pub fn custom(
        id: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: StepKind::Custom,
            parameters: Map::new(),
            depends_on: Vec::new(),
            timeout: None,
            retry_count: None,
            exec: StepExec::Handler(handler),
        }
    }

    pub fn tool(
        id: impl Into<String>,
        name: impl Into<String>,
        server: impl Into<String>,
        tool: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: StepKind::Custom,
            parameters: Map::new(),
            depends_on: Vec::new(),
            timeout: None,
            retry_count: None,
            exec: StepExec::Tool {
                server: server.into(),
                tool: tool.into(),
            },
        }
    }

    pub fn with_kind(mut self, kind: StepKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_params(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Convenience accessor for a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}
