//! The concrete decommissioning step graph and its run entrypoint.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use ai_client::ChatModel;
use dbsunset_common::{Config, LogRegistry};
use dbsunset_engine::{
    handler_fn, CancelHandle, EngineError, StepKind, Workflow, WorkflowBuilder, WorkflowResult,
    WorkflowStep,
};
use mcp_client::McpSession;

use crate::classifier::SourceTypeClassifier;
use crate::deps::WorkflowDeps;
use crate::rules::ContextualRulesEngine;
use crate::steps;

macro_rules! deps_step {
    ($deps:expr, $f:path) => {{
        let deps = $deps.clone();
        handler_fn(move |ctx, _step| {
            let deps = deps.clone();
            async move { $f(deps, ctx).await }
        })
    }};
}

/// Wire the six-step decommissioning graph. The chain is linear today; the
/// engine itself permits parallel sub-graphs.
pub fn build_decommission_workflow(
    deps: Arc<WorkflowDeps>,
    max_parallel_steps: usize,
) -> Result<Workflow, EngineError> {
    WorkflowBuilder::new(format!("db-decommission-{}", deps.database_name))
        .max_parallel_steps(max_parallel_steps)
        .stop_on_error(false)
        .default_retry_count(2)
        .step(
            WorkflowStep::custom(
                "validate_environment",
                "Validate environment",
                deps_step!(deps, steps::validate_environment),
            )
            .with_timeout(Duration::from_secs(60)),
        )
        .step(
            WorkflowStep::custom(
                "process_repositories",
                "Process repositories",
                deps_step!(deps, steps::process_repositories),
            )
            .with_kind(StepKind::Pack)
            .depends_on(&["validate_environment"])
            .with_timeout(Duration::from_secs(600)),
        )
        .step(
            WorkflowStep::custom(
                "apply_refactoring",
                "Apply refactoring",
                deps_step!(deps, steps::apply_refactoring),
            )
            .with_kind(StepKind::Llm)
            .depends_on(&["process_repositories"])
            .with_timeout(Duration::from_secs(600)),
        )
        .step(
            WorkflowStep::custom(
                "create_github_pr",
                "Create GitHub pull request",
                deps_step!(deps, steps::create_github_pr),
            )
            .with_kind(StepKind::SourceControl)
            .depends_on(&["apply_refactoring"])
            .with_timeout(Duration::from_secs(300)),
        )
        .step(
            WorkflowStep::custom(
                "quality_assurance",
                "Quality assurance",
                deps_step!(deps, steps::quality_assurance),
            )
            .depends_on(&["create_github_pr"])
            .with_timeout(Duration::from_secs(60)),
        )
        .step(
            WorkflowStep::custom(
                "workflow_summary",
                "Workflow summary",
                deps_step!(deps, steps::workflow_summary),
            )
            .with_kind(StepKind::Chat)
            .depends_on(&["quality_assurance"])
            .with_timeout(Duration::from_secs(60)),
        )
        .build()
}

/// Run one decommissioning workflow end to end. Returns the engine result
/// and the workflow id under which the log was written.
#[allow(clippy::too_many_arguments)]
pub async fn run_decommission(
    config: &Config,
    database_name: &str,
    target_repos: Vec<String>,
    slack_channel: Option<String>,
    session: Arc<McpSession>,
    model: Arc<dyn ChatModel>,
    registry: Arc<LogRegistry>,
    cancel: &CancelHandle,
) -> anyhow::Result<(WorkflowResult, String)> {
    let workflow_id = format!("decommission-{database_name}-{}", Uuid::new_v4());

    let deps = Arc::new(
        WorkflowDeps::builder()
            .workflow_id(workflow_id.clone())
            .database_name(database_name.to_string())
            .target_repos(target_repos)
            .registry(registry)
            .classifier(SourceTypeClassifier::shared())
            .rules(Arc::new(ContextualRulesEngine::new(database_name)))
            .model(model)
            .slack_channel(slack_channel)
            .agent_batch_size(config.agent_batch_size)
            .max_parallel_repos(config.max_parallel_repos)
            .build(),
    );

    let workflow = build_decommission_workflow(deps, config.max_parallel_steps)?;
    let result = workflow.execute_with_cancel(session, cancel).await;

    Ok((result, workflow_id))
}
