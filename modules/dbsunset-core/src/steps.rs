//! Concrete step bodies for the decommissioning workflow.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::{info, warn};

use dbsunset_common::{DecommError, DiscoveryResult, FileProcessingResult, RepoRef};
use dbsunset_engine::WorkflowContext;
use mcp_client::{ChatClient, PackClient, SourceControlClient};

use crate::agentic::{AgenticFileProcessor, DiscoveredFile};
use crate::deps::{WorkflowDeps, GITHUB_SERVER, REPOMIX_SERVER, SLACK_SERVER};
use crate::notify::post_best_effort;
use crate::patterns::PatternDiscoveryEngine;
use crate::quality::{
    recommendations, reference_removal_check, rule_compliance_check, service_integrity_check,
};

/// Pause after forking so the fork is addressable before the branch call.
const FORK_SETTLE: Duration = Duration::from_secs(3);

async fn chat_client(deps: &WorkflowDeps, ctx: &WorkflowContext) -> Option<ChatClient> {
    if deps.slack_channel.is_none() {
        return None;
    }
    match ctx.backend(SLACK_SERVER).await {
        Ok(backend) => Some(ChatClient::new(backend)),
        Err(e) => {
            warn!(error = %e, "Slack backend unavailable");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Step 1: validate environment
// ---------------------------------------------------------------------------

pub async fn validate_environment(
    deps: Arc<WorkflowDeps>,
    ctx: Arc<WorkflowContext>,
) -> anyhow::Result<Value> {
    let registry = &deps.registry;
    registry.info(
        &deps.workflow_id,
        format!(
            "Decommissioning workflow started for database '{}' across {} repositories",
            deps.database_name,
            deps.target_repos.len()
        ),
    );

    let mut rows = Vec::new();
    let mut ready = Vec::new();

    for (server, required) in [
        (GITHUB_SERVER, true),
        (REPOMIX_SERVER, true),
        (SLACK_SERVER, false),
    ] {
        match ctx.backend(server).await {
            Ok(backend) => match backend.list_tools().await {
                Ok(tools) => {
                    rows.push(vec![
                        server.to_string(),
                        tools.len().to_string(),
                        "ready".to_string(),
                    ]);
                    ready.push(server);
                }
                Err(e) if required => {
                    return Err(DecommError::Validation(format!(
                        "required MCP server '{server}' failed tool listing: {e}"
                    ))
                    .into())
                }
                Err(e) => {
                    warn!(server, error = %e, "Optional MCP server not ready");
                    rows.push(vec![server.to_string(), "0".to_string(), format!("unavailable: {e}")]);
                }
            },
            Err(e) if required => {
                return Err(DecommError::Validation(format!(
                    "required MCP server '{server}' is not configured: {e}"
                ))
                .into())
            }
            Err(e) => {
                registry.warning(
                    &deps.workflow_id,
                    format!("Optional MCP server '{server}' unavailable: {e}"),
                );
                rows.push(vec![server.to_string(), "0".to_string(), "unavailable".to_string()]);
            }
        }
    }

    registry.append_table(
        &deps.workflow_id,
        vec!["Server".into(), "Tools".into(), "Status".into()],
        rows,
        Some("Environment readiness".into()),
        None,
    );

    Ok(json!({
        "database_name": deps.database_name,
        "clients_ready": ready,
        "target_repositories": deps.target_repos.len(),
    }))
}

// ---------------------------------------------------------------------------
// Step 2: process repositories (discovery fan-out)
// ---------------------------------------------------------------------------

pub async fn process_repositories(
    deps: Arc<WorkflowDeps>,
    ctx: Arc<WorkflowContext>,
) -> anyhow::Result<Value> {
    let registry = &deps.registry;
    let chat = chat_client(&deps, &ctx).await;
    let pack = PackClient::new(ctx.backend(REPOMIX_SERVER).await?);
    let discovery_engine = PatternDiscoveryEngine::new(deps.classifier.clone());

    // Strict URL check up front; malformed entries are warnings, not errors.
    let mut repos = Vec::new();
    let mut skipped = Vec::new();
    for url in &deps.target_repos {
        match RepoRef::parse(url) {
            Ok(repo) => repos.push(repo),
            Err(e) => {
                warn!(url = %url, error = %e, "Skipping malformed repository URL");
                registry.warning(&deps.workflow_id, format!("Skipping repository: {e}"));
                skipped.push(url.clone());
            }
        }
    }

    let outcomes: Vec<(usize, RepoRef, anyhow::Result<crate::patterns::DiscoveryOutcome>)> =
        stream::iter(repos.iter().cloned().enumerate().map(|(index, repo)| {
            let deps = deps.clone();
            let pack = pack.clone();
            let chat = chat.clone();
            let engine = &discovery_engine;
            async move {
                post_best_effort(
                    chat.as_ref(),
                    deps.slack_channel.as_deref(),
                    &format!(
                        "Starting decommissioning discovery for database '{}' in {}",
                        deps.database_name,
                        repo.full_name()
                    ),
                    &deps.registry,
                    &deps.workflow_id,
                )
                .await;

                let outcome = engine
                    .discover(&pack, &deps.database_name, &repo)
                    .await;
                (index, repo, outcome)
            }
        }))
        .buffer_unordered(deps.max_parallel_repos)
        .collect()
        .await;

    let mut ordered = outcomes;
    ordered.sort_by_key(|(index, _, _)| *index);

    let mut processed = 0usize;
    let mut failed = 0usize;
    let mut total_discovered = 0usize;
    let mut repo_summaries = Vec::new();
    let mut primary_stored = false;

    for (_, repo, outcome) in ordered {
        match outcome {
            Ok(outcome) => {
                processed += 1;
                total_discovered += outcome.result.files.len();
                log_repo_summary(&deps, &outcome.result);
                repo_summaries.push(json!({
                    "repository": repo.full_name(),
                    "matched_files": outcome.result.files.len(),
                    "total_files": outcome.result.total_files_scanned,
                }));

                // The first successful repository drives refactoring and
                // the PR; later ones are reported for operator follow-up.
                if !primary_stored {
                    ctx.set_shared("discovery", serde_json::to_value(&outcome.result)?);
                    ctx.set_shared(
                        "file_contents",
                        serde_json::to_value(&outcome.contents)?,
                    );
                    primary_stored = true;
                }
            }
            Err(e) => {
                failed += 1;
                warn!(repo = %repo.full_name(), error = %e, "Repository discovery failed");
                registry.error(
                    &deps.workflow_id,
                    format!("Discovery failed for {}: {e}", repo.full_name()),
                );
            }
        }
    }

    if !primary_stored {
        if repos.is_empty() {
            bail!("no valid repository URLs to process");
        }
        bail!("discovery failed for every target repository");
    }

    info!(
        processed,
        failed,
        discovered = total_discovered,
        "Repository processing complete"
    );

    Ok(json!({
        "repositories_processed": processed,
        "repositories_failed": failed,
        "repositories_skipped": skipped,
        "total_files_discovered": total_discovered,
        "repositories": repo_summaries,
    }))
}

/// Per-repo reporting: a hit table and a files-by-type sunburst.
fn log_repo_summary(deps: &WorkflowDeps, result: &DiscoveryResult) {
    let registry = &deps.registry;

    let rows: Vec<Vec<String>> = result
        .files
        .iter()
        .map(|f| {
            vec![
                f.path.clone(),
                f.source_type.to_string(),
                format!("{:.2}", f.confidence),
                f.match_count.to_string(),
            ]
        })
        .collect();
    registry.append_table(
        &deps.workflow_id,
        vec![
            "File".into(),
            "Source Type".into(),
            "Confidence".into(),
            "Matches".into(),
        ],
        rows,
        Some(format!(
            "Files referencing '{}' in {}",
            result.database_name,
            result.repo.full_name()
        )),
        None,
    );

    // Root is the database, inner ring the source types, leaves the files.
    let mut labels = vec![result.database_name.clone()];
    let mut parents = vec![String::new()];
    let mut values = vec![result.files.len() as f64];
    for (source_type, files) in &result.files_by_type {
        labels.push(source_type.to_string());
        parents.push(result.database_name.clone());
        values.push(files.len() as f64);
        for file in files {
            labels.push(file.path.clone());
            parents.push(source_type.to_string());
            values.push(1.0);
        }
    }
    registry.append_sunburst(
        &deps.workflow_id,
        labels,
        parents,
        values,
        Some(format!("Files by type in {}", result.repo.full_name())),
        None,
        None,
    );
}

// ---------------------------------------------------------------------------
// Step 3: apply refactoring
// ---------------------------------------------------------------------------

pub async fn apply_refactoring(
    deps: Arc<WorkflowDeps>,
    ctx: Arc<WorkflowContext>,
) -> anyhow::Result<Value> {
    let discovery: DiscoveryResult = serde_json::from_value(ctx.require_shared("discovery")?)
        .context("discovery record is malformed")?;
    let contents: BTreeMap<String, String> =
        serde_json::from_value(ctx.require_shared("file_contents")?)
            .context("file contents record is malformed")?;

    let mut files = Vec::new();
    for file_match in &discovery.files {
        match contents.get(&file_match.path) {
            Some(content) => files.push(DiscoveredFile {
                path: file_match.path.clone(),
                content: content.clone(),
                match_count: file_match.match_count,
            }),
            None => {
                warn!(path = %file_match.path, "No content for matched file, skipping");
                deps.registry.warning(
                    &deps.workflow_id,
                    format!("No content available for {}, skipped", file_match.path),
                );
            }
        }
    }

    let processor = AgenticFileProcessor::new(
        deps.classifier.clone(),
        deps.rules.clone(),
        deps.model.clone(),
        deps.agent_batch_size,
    );
    let results = processor
        .process_files(&files, &deps.registry, &deps.workflow_id)
        .await;

    let files_modified = results.iter().filter(|r| r.total_changes > 0).count();
    let files_failed = results.iter().filter(|r| !r.success).count();

    let refactoring = json!({
        "files_processed": results.len(),
        "files_modified": files_modified,
        "files_failed": files_failed,
        "results": results,
    });
    ctx.set_shared("refactoring", refactoring.clone());

    if files_failed > 0 && files_failed == results.len() && !results.is_empty() {
        bail!("refactoring failed for all {files_failed} files");
    }

    Ok(refactoring)
}

// ---------------------------------------------------------------------------
// Step 4: create the pull request
// ---------------------------------------------------------------------------

pub async fn create_github_pr(
    deps: Arc<WorkflowDeps>,
    ctx: Arc<WorkflowContext>,
) -> anyhow::Result<Value> {
    let registry = &deps.registry;
    let refactoring = ctx.require_shared("refactoring")?;
    let results: Vec<FileProcessingResult> =
        serde_json::from_value(refactoring["results"].clone())
            .context("refactoring results are malformed")?;

    let modified: Vec<&FileProcessingResult> = results
        .iter()
        .filter(|r| r.total_changes > 0 && r.modified_content.is_some())
        .collect();

    if modified.is_empty() {
        registry.info(&deps.workflow_id, "No changes to commit, skipping PR");
        return Ok(json!({
            "success": true,
            "pr_created": false,
            "message": "No changes to commit - database not found or already removed",
        }));
    }

    let discovery: DiscoveryResult = serde_json::from_value(ctx.require_shared("discovery")?)
        .context("discovery record is malformed")?;
    let repo = &discovery.repo;
    let github = SourceControlClient::new(ctx.backend(GITHUB_SERVER).await?);

    let upstream = github.get_repository(&repo.owner, &repo.name).await?;
    let fork = github.fork_repository(&repo.owner, &repo.name).await?;
    let fork_owner = fork.owner.login.clone();
    registry.info(
        &deps.workflow_id,
        format!("Forked {} to {fork_owner}/{}", repo.full_name(), repo.name),
    );

    let branch_name = format!(
        "decommission-{}-{}",
        deps.database_name,
        chrono::Utc::now().timestamp()
    );
    tokio::time::sleep(FORK_SETTLE).await;
    github
        .create_branch(&fork_owner, &repo.name, &branch_name, &fork.default_branch)
        .await?;

    // Recorded before committing so a failed PR still leaves the operator
    // the fork and branch names for manual recovery.
    ctx.set_shared(
        "github_pr_recovery",
        json!({ "fork_owner": fork_owner, "branch_name": branch_name }),
    );
    registry.info(&deps.workflow_id, format!("Created branch {branch_name}"));

    let mut files_committed = 0usize;
    for result in &modified {
        let content = result
            .modified_content
            .as_ref()
            .expect("filtered on modified_content");
        let message = format!(
            "refactor({}): remove {} references from {} ({} changes)",
            result.source_type, deps.database_name, result.file_path, result.total_changes
        );
        match github
            .create_or_update_file(
                &fork_owner,
                &repo.name,
                &result.file_path,
                content,
                &message,
                &branch_name,
            )
            .await
        {
            Ok(()) => files_committed += 1,
            Err(e) => {
                warn!(path = %result.file_path, error = %e, "Failed to commit file");
                registry.warning(
                    &deps.workflow_id,
                    format!("Failed to commit {}: {e}", result.file_path),
                );
            }
        }
    }

    if files_committed == 0 {
        bail!("no files were successfully committed to {branch_name}");
    }

    let title = format!(
        "Decommission database: remove {} references",
        deps.database_name
    );
    let body = pr_body(&deps.database_name, &modified);
    let pr = github
        .create_pull_request(
            &repo.owner,
            &repo.name,
            &title,
            &format!("{fork_owner}:{branch_name}"),
            &upstream.default_branch,
            &body,
        )
        .await?;

    registry.info(
        &deps.workflow_id,
        format!("Created PR #{}: {}", pr.number, pr.html_url),
    );

    let result = json!({
        "success": true,
        "pr_created": true,
        "pr_number": pr.number,
        "pr_url": pr.html_url,
        "branch_name": branch_name,
        "fork_owner": fork_owner,
        "files_committed": files_committed,
    });
    ctx.set_shared("github_pr", result.clone());
    Ok(result)
}

fn pr_body(database_name: &str, modified: &[&FileProcessingResult]) -> String {
    let total_changes: usize = modified.iter().map(|r| r.total_changes).sum();

    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    for result in modified {
        *by_type.entry(result.source_type.to_string()).or_default() += 1;
    }

    let mut body = format!(
        "# Database decommissioning: {database_name}\n\n\
         ## Summary\n\
         - **Database**: `{database_name}`\n\
         - **Files modified**: {}\n\
         - **Total changes**: {total_changes}\n\n\
         ## Changes by File Type\n",
        modified.len()
    );
    for (source_type, count) in &by_type {
        body.push_str(&format!(
            "- **{}**: {count} file(s) modified\n",
            source_type.to_uppercase()
        ));
    }
    body.push_str("\n## Modified Files\n");
    for result in modified {
        body.push_str(&format!(
            "- `{}` ({} changes)\n",
            result.file_path, result.total_changes
        ));
    }
    body.push_str("\n---\n*Generated automatically by the dbsunset decommissioning workflow*\n");
    body
}

// ---------------------------------------------------------------------------
// Step 5: quality assurance
// ---------------------------------------------------------------------------

pub async fn quality_assurance(
    deps: Arc<WorkflowDeps>,
    ctx: Arc<WorkflowContext>,
) -> anyhow::Result<Value> {
    let discovery: DiscoveryResult = serde_json::from_value(ctx.require_shared("discovery")?)
        .context("discovery record is malformed")?;

    let checks = vec![
        reference_removal_check(&discovery),
        rule_compliance_check(&discovery),
        service_integrity_check(&discovery),
    ];
    let recs = recommendations(&checks, &discovery);

    deps.registry.append_table(
        &deps.workflow_id,
        vec![
            "Check".into(),
            "Status".into(),
            "Confidence".into(),
            "Description".into(),
        ],
        checks
            .iter()
            .map(|c| {
                vec![
                    c.name.clone(),
                    c.status.to_string(),
                    c.confidence.to_string(),
                    c.description.clone(),
                ]
            })
            .collect(),
        Some("Quality assurance".into()),
        None,
    );
    for rec in &recs {
        deps.registry
            .info(&deps.workflow_id, format!("Recommendation: {rec}"));
    }

    let passed = checks
        .iter()
        .filter(|c| c.status == crate::quality::QaStatus::Pass)
        .count();
    Ok(json!({
        "checks": checks,
        "recommendations": recs,
        "checks_passed": passed,
        "checks_total": checks.len(),
    }))
}

// ---------------------------------------------------------------------------
// Step 6: workflow summary
// ---------------------------------------------------------------------------

pub async fn workflow_summary(
    deps: Arc<WorkflowDeps>,
    ctx: Arc<WorkflowContext>,
) -> anyhow::Result<Value> {
    let registry = &deps.registry;

    let repositories = ctx
        .step_result("process_repositories")
        .and_then(|v| v["repositories_processed"].as_u64())
        .unwrap_or(0);
    let discovered = ctx
        .step_result("process_repositories")
        .and_then(|v| v["total_files_discovered"].as_u64())
        .unwrap_or(0);
    let refactoring = ctx.get_shared("refactoring").unwrap_or_else(|| json!({}));
    let processed = refactoring["files_processed"].as_u64().unwrap_or(0);
    let modified = refactoring["files_modified"].as_u64().unwrap_or(0);
    let pr = ctx.get_shared("github_pr");
    let pr_url = pr
        .as_ref()
        .and_then(|p| p["pr_url"].as_str())
        .unwrap_or("none")
        .to_string();
    let qa_passed = ctx
        .step_result("quality_assurance")
        .and_then(|v| v["checks_passed"].as_u64())
        .unwrap_or(0);

    registry.append_table(
        &deps.workflow_id,
        vec!["Metric".into(), "Value".into()],
        vec![
            vec!["Database".into(), deps.database_name.clone()],
            vec!["Repositories processed".into(), repositories.to_string()],
            vec!["Files discovered".into(), discovered.to_string()],
            vec!["Files processed".into(), processed.to_string()],
            vec!["Files modified".into(), modified.to_string()],
            vec!["QA checks passed".into(), format!("{qa_passed}/3")],
            vec!["Pull request".into(), pr_url.clone()],
        ],
        Some("Workflow summary".into()),
        None,
    );

    let chat = chat_client(&deps, &ctx).await;
    post_best_effort(
        chat.as_ref(),
        deps.slack_channel.as_deref(),
        &format!(
            "Decommissioning workflow for '{}' finished: {modified} of {processed} files modified, PR: {pr_url}",
            deps.database_name
        ),
        registry,
        &deps.workflow_id,
    )
    .await;

    registry.info(&deps.workflow_id, "Workflow summary complete");

    Ok(json!({
        "database_name": deps.database_name,
        "repositories_processed": repositories,
        "files_discovered": discovered,
        "files_processed": processed,
        "files_modified": modified,
        "qa_checks_passed": qa_passed,
        "pull_request": pr_url,
    }))
}
