//! Shared dependency container for the decommissioning workflow.
//!
//! Holds long-lived, cloneable resources; per-step resources (clients,
//! processors) are constructed from these at step execution time.

use std::sync::Arc;

use typed_builder::TypedBuilder;

use ai_client::ChatModel;
use dbsunset_common::LogRegistry;

use crate::classifier::SourceTypeClassifier;
use crate::rules::ContextualRulesEngine;

/// MCP server names as they appear in the manifest.
pub const GITHUB_SERVER: &str = "github";
pub const REPOMIX_SERVER: &str = "repomix";
pub const SLACK_SERVER: &str = "slack";

#[derive(Clone, TypedBuilder)]
pub struct WorkflowDeps {
    pub workflow_id: String,
    pub database_name: String,
    pub target_repos: Vec<String>,
    pub registry: Arc<LogRegistry>,
    pub classifier: Arc<SourceTypeClassifier>,
    pub rules: Arc<ContextualRulesEngine>,
    pub model: Arc<dyn ChatModel>,
    #[builder(default)]
    pub slack_channel: Option<String>,
    #[builder(default = 3)]
    pub agent_batch_size: usize,
    #[builder(default = 3)]
    pub max_parallel_repos: usize,
}
