//! Agentic file processor: files whose refactoring needs semantic judgment
//! are batched to the LLM; everything else goes through the deterministic
//! rules engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use ai_client::{
    util::{strip_code_blocks, truncate_to_char_boundary},
    ChatModel,
};
use dbsunset_common::{FileProcessingResult, LogRegistry, SourceType};

use crate::classifier::SourceTypeClassifier;
use crate::rules::ContextualRulesEngine;

/// Batches of LLM calls running at once.
const MAX_PARALLEL_BATCHES: usize = 3;

/// Per-file content cap inside an agent prompt.
const MAX_PROMPT_FILE_BYTES: usize = 30_000;

/// A discovered file with the content needed to refactor it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredFile {
    pub path: String,
    pub content: String,
    pub match_count: usize,
}

/// What the agent returns for one file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentRewrite {
    pub modified_content: String,
}

pub struct AgenticFileProcessor {
    classifier: Arc<SourceTypeClassifier>,
    rules: Arc<ContextualRulesEngine>,
    model: Arc<dyn ChatModel>,
    batch_size: usize,
}

impl AgenticFileProcessor {
    pub fn new(
        classifier: Arc<SourceTypeClassifier>,
        rules: Arc<ContextualRulesEngine>,
        model: Arc<dyn ChatModel>,
        batch_size: usize,
    ) -> Self {
        Self {
            classifier,
            rules,
            model,
            batch_size: batch_size.max(1),
        }
    }

    /// Process discovered files. Observable result order always matches
    /// input order, whatever the batch scheduling does.
    pub async fn process_files(
        &self,
        files: &[DiscoveredFile],
        registry: &LogRegistry,
        workflow_id: &str,
    ) -> Vec<FileProcessingResult> {
        info!(
            files = files.len(),
            batch_size = self.batch_size,
            "Starting agentic processing"
        );

        // Classify every file once; partition into agent candidates and
        // deterministic work, remembering input positions.
        let mut deterministic: Vec<(usize, FileProcessingResult)> = Vec::new();
        let mut candidates: BTreeMap<SourceType, Vec<(usize, &DiscoveredFile)>> = BTreeMap::new();

        for (index, file) in files.iter().enumerate() {
            let classification = self.classifier.classify(&file.path, Some(&file.content));

            let complex_type = matches!(
                classification.source_type,
                SourceType::Python | SourceType::Shell
            ) && file.match_count >= 2;
            let uncovered_framework = !classification.detected_frameworks.is_empty()
                && self
                    .rules
                    .rules_for(
                        classification.source_type,
                        &classification.detected_frameworks,
                    )
                    .is_empty();

            if complex_type || uncovered_framework {
                candidates
                    .entry(classification.source_type)
                    .or_default()
                    .push((index, file));
            } else {
                deterministic.push((
                    index,
                    self.rules
                        .process_file(&file.path, &file.content, &classification),
                ));
            }
        }

        // One future per batch, bounded; each carries its input positions.
        let mut batch_jobs = Vec::new();
        for (source_type, group) in &candidates {
            let total_batches = group.len().div_ceil(self.batch_size);
            registry.info(
                workflow_id,
                format!(
                    "Agentic refactoring: {} {} files in {} batch(es)",
                    group.len(),
                    source_type,
                    total_batches
                ),
            );
            for (batch_no, batch) in group.chunks(self.batch_size).enumerate() {
                batch_jobs.push((*source_type, batch_no + 1, total_batches, batch.to_vec()));
            }
        }

        let mut batch_futures: Vec<
            std::pin::Pin<
                Box<
                    dyn std::future::Future<Output = Vec<(usize, FileProcessingResult)>>
                        + Send
                        + '_,
                >,
            >,
        > = Vec::new();
        for (source_type, batch_no, total_batches, batch) in batch_jobs {
            batch_futures.push(Box::pin(async move {
                self.run_batch(
                    source_type,
                    batch_no,
                    total_batches,
                    &batch,
                    registry,
                    workflow_id,
                )
                .await
            }));
        }
        let mut agent_results: Vec<(usize, FileProcessingResult)> =
            stream::iter(batch_futures)
                .buffer_unordered(MAX_PARALLEL_BATCHES)
                .collect::<Vec<Vec<_>>>()
                .await
                .into_iter()
                .flatten()
                .collect();

        let mut results = deterministic;
        results.append(&mut agent_results);
        results.sort_by_key(|(index, _)| *index);

        let modified = results
            .iter()
            .filter(|(_, r)| r.total_changes > 0)
            .count();
        let failed = results.iter().filter(|(_, r)| !r.success).count();
        registry.info(
            workflow_id,
            format!(
                "Agentic processing complete: {} files processed, {modified} modified, {failed} failed",
                results.len()
            ),
        );

        results.into_iter().map(|(_, r)| r).collect()
    }

    async fn run_batch(
        &self,
        source_type: SourceType,
        batch_no: usize,
        total_batches: usize,
        batch: &[(usize, &DiscoveredFile)],
        registry: &LogRegistry,
        workflow_id: &str,
    ) -> Vec<(usize, FileProcessingResult)> {
        registry.append_table(
            workflow_id,
            vec!["File Path".into(), "Size".into(), "Source Type".into()],
            batch
                .iter()
                .map(|(_, f)| {
                    vec![
                        f.path.clone(),
                        f.content.len().to_string(),
                        source_type.to_string(),
                    ]
                })
                .collect(),
            Some(format!(
                "Batch {batch_no}/{total_batches} files for agent processing ({source_type})"
            )),
            None,
        );

        let prompt = self.build_prompt(source_type, batch);
        let outcome = self.invoke_agent(&prompt).await;

        let results: Vec<(usize, FileProcessingResult)> = match outcome {
            Ok(rewrites) => batch
                .iter()
                .map(|(index, file)| {
                    let result = match rewrites.get(&file.path) {
                        Some(rewrite) if rewrite.modified_content != file.content => {
                            FileProcessingResult {
                                file_path: file.path.clone(),
                                source_type,
                                rules_applied: Vec::new(),
                                total_changes: 1,
                                success: true,
                                error: None,
                                modified_content: Some(rewrite.modified_content.clone()),
                            }
                        }
                        // Absent or identical content means nothing to do.
                        _ => FileProcessingResult::unchanged(&file.path, source_type),
                    };
                    (*index, result)
                })
                .collect(),
            Err(e) => {
                // A malformed or failed batch poisons every file in it; no
                // partial edits are committed.
                warn!(error = %e, batch = batch_no, "Agent batch failed");
                registry.warning(
                    workflow_id,
                    format!("Agent batch {batch_no}/{total_batches} failed: {e}"),
                );
                batch
                    .iter()
                    .map(|(index, file)| {
                        (
                            *index,
                            FileProcessingResult::failed(
                                &file.path,
                                source_type,
                                &format!("agent batch failed: {e}"),
                            ),
                        )
                    })
                    .collect()
            }
        };

        let succeeded = results.iter().filter(|(_, r)| r.success).count();
        registry.info(
            workflow_id,
            format!(
                "Batch {batch_no}/{total_batches} completed ({source_type}): {succeeded}/{} files processed",
                batch.len()
            ),
        );

        results
    }

    fn build_prompt(&self, source_type: SourceType, batch: &[(usize, &DiscoveredFile)]) -> String {
        let rules = self
            .rules
            .rule_definitions_for(source_type, &[])
            .into_iter()
            .map(|r| json!({ "id": r.id, "description": r.description, "action": r.action }))
            .collect::<Vec<_>>();

        let mut prompt = format!(
            "The database '{db}' is being decommissioned. For each {ty} file below, \
             remove or neutralize every reference to it: comment out statements that \
             create or select the database, drop configuration entries pointing at it, \
             and mark documentation references as deprecated. Do not touch anything \
             unrelated.\n\n\
             Reference rules normally applied to this file type:\n{rules}\n\n\
             Files to process:\n",
            db = self.rules.database_name(),
            ty = source_type,
            rules = serde_json::to_string_pretty(&rules).unwrap_or_else(|_| "[]".into()),
        );

        for (_, file) in batch {
            let content = truncate_to_char_boundary(&file.content, MAX_PROMPT_FILE_BYTES);
            prompt.push_str(&format!(
                "---\nFile path: {}\nFile content:\n```\n{content}\n```\n",
                file.path
            ));
        }

        prompt.push_str(
            "---\nRespond with a single JSON object keyed by file path. Each value must \
             be an object with a 'modified_content' string holding the full new file \
             content. Include a key for every file, even if unchanged.\n",
        );

        prompt
    }

    async fn invoke_agent(&self, prompt: &str) -> anyhow::Result<HashMap<String, AgentRewrite>> {
        let response = self
            .model
            .chat_json(
                "You are a refactoring assistant that outputs strict JSON.",
                prompt,
            )
            .await?;
        let parsed: HashMap<String, AgentRewrite> =
            serde_json::from_str(strip_code_blocks(&response))?;
        Ok(parsed)
    }
}
