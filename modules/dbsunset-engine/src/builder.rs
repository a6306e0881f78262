use std::collections::HashSet;
use std::time::Duration;

use crate::error::EngineError;
use crate::executor::Workflow;
use crate::step::WorkflowStep;

/// Workflow-wide execution parameters.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub name: String,
    pub max_parallel_steps: usize,
    pub default_timeout: Duration,
    pub default_retry_count: u32,
    pub stop_on_error: bool,
}

impl WorkflowConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_parallel_steps: 4,
            default_timeout: Duration::from_secs(120),
            default_retry_count: 2,
            stop_on_error: false,
        }
    }
}

/// Fluent builder. Dependency references are validated as steps are
/// declared, so a built workflow is a DAG by construction.
pub struct WorkflowBuilder {
    config: WorkflowConfig,
    steps: Vec<WorkflowStep>,
    ids: HashSet<String>,
    error: Option<EngineError>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: WorkflowConfig::new(name),
            steps: Vec::new(),
            ids: HashSet::new(),
            error: None,
        }
    }

    pub fn max_parallel_steps(mut self, n: usize) -> Self {
        self.config.max_parallel_steps = n.max(1);
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    pub fn default_retry_count(mut self, retries: u32) -> Self {
        self.config.default_retry_count = retries;
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.config.stop_on_error = stop;
        self
    }

    /// Declare a step. `depends_on` may only reference previously declared
    /// ids; violations surface from `build()`.
    pub fn step(mut self, step: WorkflowStep) -> Self {
        if self.error.is_some() {
            return self;
        }
        if !self.ids.insert(step.id.clone()) {
            self.error = Some(EngineError::Builder(format!(
                "duplicate step id '{}'",
                step.id
            )));
            return self;
        }
        for dep in &step.depends_on {
            if !self.ids.contains(dep) || dep == &step.id {
                self.error = Some(EngineError::Builder(format!(
                    "step '{}' depends on undeclared step '{dep}'",
                    step.id
                )));
                return self;
            }
        }
        self.steps.push(step);
        self
    }

    pub fn build(self) -> Result<Workflow, EngineError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.steps.is_empty() {
            return Err(EngineError::Builder("workflow has no steps".into()));
        }
        tracing::info!(
            workflow = %self.config.name,
            steps = self.steps.len(),
            "Workflow built"
        );
        Ok(Workflow::new(self.config, self.steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::handler_fn;
    use serde_json::json;

    fn noop() -> std::sync::Arc<dyn crate::step::StepHandler> {
        handler_fn(|_ctx, _step| async { Ok(json!({})) })
    }

    #[test]
    fn forward_dependency_is_rejected() {
        let err = WorkflowBuilder::new("bad")
            .step(WorkflowStep::custom("b", "B", noop()).depends_on(&["a"]))
            .step(WorkflowStep::custom("a", "A", noop()))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Builder(_)));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let err = WorkflowBuilder::new("bad")
            .step(WorkflowStep::custom("a", "A", noop()))
            .step(WorkflowStep::custom("a", "A again", noop()))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Builder(_)));
    }

    #[test]
    fn self_dependency_is_rejected() {
        let err = WorkflowBuilder::new("bad")
            .step(WorkflowStep::custom("a", "A", noop()).depends_on(&["a"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Builder(_)));
    }

    #[test]
    fn empty_workflow_is_rejected() {
        assert!(WorkflowBuilder::new("empty").build().is_err());
    }

    #[test]
    fn valid_chain_builds() {
        let workflow = WorkflowBuilder::new("ok")
            .step(WorkflowStep::custom("a", "A", noop()))
            .step(WorkflowStep::custom("b", "B", noop()).depends_on(&["a"]))
            .build()
            .unwrap();
        assert_eq!(workflow.step_ids(), vec!["a", "b"]);
    }
}
