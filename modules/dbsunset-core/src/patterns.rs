//! Pattern discovery: locate every file in a packed repository that
//! references a database, classify the hits, and score them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info, warn};

use dbsunset_common::{
    DiscoveryResult, FileMatch, PatternMatch, RepoRef, RepoStats, SourceType,
};
use mcp_client::{GrepMatch, McpError, PackClient};

use crate::classifier::{name_variants, search_patterns, SourceTypeClassifier};

/// Line prefixes treated as comments during spurious-match rejection,
/// covering the hash, C, and SQL comment families.
const COMMENT_PREFIXES: &[&str] = &["#", "//", "/*", "*", "--"];

/// Discovery output plus the file contents downstream refactoring needs.
#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    pub result: DiscoveryResult,
    pub contents: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchPass {
    Literal,
    TypeFiltered,
    Semantic,
}

pub struct PatternDiscoveryEngine {
    classifier: Arc<SourceTypeClassifier>,
}

impl PatternDiscoveryEngine {
    pub fn new(classifier: Arc<SourceTypeClassifier>) -> Self {
        Self { classifier }
    }

    /// Run the full discovery pipeline over one repository.
    pub async fn discover(
        &self,
        pack: &PackClient,
        database_name: &str,
        repo: &RepoRef,
    ) -> anyhow::Result<DiscoveryOutcome> {
        info!(repo = %repo.full_name(), database = database_name, "Starting pattern discovery");

        let packed = pack
            .pack_remote_repository(
                &repo.url,
                None,
                Some(&["node_modules/**", "*.log", "*.tmp"]),
            )
            .await?;

        let raw = pack.read_packed(&packed.output_id).await?;
        let contents = parse_packed_files(&raw);
        let stats = repo_stats(&contents);

        if contents.is_empty() {
            info!(repo = %repo.full_name(), "Packed repository is empty");
            return Ok(DiscoveryOutcome {
                result: DiscoveryResult::empty(database_name, repo.clone()),
                contents,
            });
        }

        // Three complementary passes over the packed archive.
        let mut hits: Vec<(SearchPass, String, GrepMatch)> = Vec::new();

        for variant in name_variants(database_name) {
            let escaped = regex::escape(&variant);
            for pattern in [
                format!(r"\b{escaped}\b"),
                format!("\"{escaped}\""),
                format!("'{escaped}'"),
                format!(":{escaped}"),
                format!("={escaped}"),
            ] {
                for m in self.grep(pack, &packed.output_id, &pattern).await? {
                    hits.push((SearchPass::Literal, pattern.clone(), m));
                }
            }
        }

        let variant_pattern = name_variants(database_name)
            .iter()
            .map(|v| regex::escape(v))
            .collect::<Vec<_>>()
            .join("|");
        for m in self.grep(pack, &packed.output_id, &variant_pattern).await? {
            if path_type_filter(&m.file).is_some() {
                hits.push((
                    SearchPass::TypeFiltered,
                    variant_pattern.clone(),
                    m,
                ));
            }
        }

        for source_type in SourceType::candidates() {
            for pattern in search_patterns(*source_type, database_name) {
                for m in self.grep(pack, &packed.output_id, &pattern).await? {
                    hits.push((SearchPass::Semantic, pattern.clone(), m));
                }
            }
        }

        let files = self.merge_hits(database_name, hits, &contents);
        let result = DiscoveryResult::from_matches(
            database_name,
            repo.clone(),
            stats.total_files,
            files,
            stats,
        );

        info!(
            repo = %repo.full_name(),
            matched = result.files.len(),
            scanned = result.total_files_scanned,
            average_confidence = result.confidence_distribution.average,
            "Pattern discovery complete"
        );

        Ok(DiscoveryOutcome { result, contents })
    }

    /// Grep once; a structured server rejection (bad pattern) skips that
    /// pattern, a transport loss propagates for the step policy to handle.
    async fn grep(
        &self,
        pack: &PackClient,
        output_id: &str,
        pattern: &str,
    ) -> anyhow::Result<Vec<GrepMatch>> {
        match pack.grep_packed(output_id, pattern, 1, true).await {
            Ok(result) => Ok(result.matches),
            Err(McpError::Tool(message)) => {
                warn!(pattern, message, "Grep rejected pattern, skipping");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn merge_hits(
        &self,
        database_name: &str,
        hits: Vec<(SearchPass, String, GrepMatch)>,
        contents: &BTreeMap<String, String>,
    ) -> Vec<FileMatch> {
        struct Merged {
            seen: HashSet<(String, u32)>,
            pattern_matches: Vec<PatternMatch>,
            confidence: f64,
        }

        let mut classifications = HashMap::new();
        let mut merged: BTreeMap<String, Merged> = BTreeMap::new();

        for (pass, pattern, hit) in hits {
            let classification = classifications
                .entry(hit.file.clone())
                .or_insert_with(|| {
                    self.classifier
                        .classify(&hit.file, contents.get(&hit.file).map(String::as_str))
                });

            let hit_confidence = match pass {
                SearchPass::Literal => classification.confidence.max(0.8),
                SearchPass::TypeFiltered => 0.8,
                SearchPass::Semantic => 0.7,
            };

            let entry = merged.entry(hit.file.clone()).or_insert_with(|| Merged {
                seen: HashSet::new(),
                pattern_matches: Vec::new(),
                confidence: 0.0,
            });

            if entry.seen.insert((pattern.clone(), hit.line_number)) {
                let line_content = contents
                    .get(&hit.file)
                    .and_then(|c| c.lines().nth(hit.line_number.saturating_sub(1) as usize))
                    .map(str::to_string)
                    .unwrap_or_else(|| hit.context.trim().to_string());
                entry.pattern_matches.push(PatternMatch {
                    pattern,
                    line_number: hit.line_number,
                    line_content,
                });
            }
            entry.confidence = entry.confidence.max(hit_confidence);
        }

        let variants = name_variants(database_name);
        let mut files = Vec::new();

        for (path, mut entry) in merged {
            let confidence = match contents.get(&path) {
                Some(content) => {
                    if !has_non_comment_reference(content, &variants) {
                        debug!(path, "Rejecting comment-only match");
                        continue;
                    }
                    entry.confidence
                }
                // Content missing from the pack: keep the hit, but it can
                // only be trusted weakly.
                None => 0.3,
            };

            entry
                .pattern_matches
                .sort_by_key(|m| (m.line_number, m.pattern.clone()));

            let classification = &classifications[&path];
            files.push(FileMatch {
                path,
                source_type: classification.source_type,
                confidence,
                match_count: entry.pattern_matches.len(),
                pattern_matches: entry.pattern_matches,
            });
        }

        files
    }
}

/// Parse the packed archive's `<file path="...">` framing into a map of
/// path to content.
pub fn parse_packed_files(raw: &str) -> BTreeMap<String, String> {
    let file_re = Regex::new(r#"(?s)<file path="([^"]+)">\n(.*?)\n?</file>"#)
        .expect("packed file pattern is valid");
    file_re
        .captures_iter(raw)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
        .collect()
}

fn repo_stats(contents: &BTreeMap<String, String>) -> RepoStats {
    let mut files_by_extension: BTreeMap<String, usize> = BTreeMap::new();
    for path in contents.keys() {
        let ext = std::path::Path::new(path)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_else(|| "(none)".to_string());
        *files_by_extension.entry(ext).or_default() += 1;
    }
    RepoStats {
        total_files: contents.len(),
        files_by_extension,
    }
}

/// A file qualifies only if the database token appears on at least one
/// line that is not a comment.
fn has_non_comment_reference(content: &str, variants: &[String]) -> bool {
    let lowered: Vec<String> = variants.iter().map(|v| v.to_lowercase()).collect();
    content.lines().any(|line| {
        let stripped = line.trim_start();
        if COMMENT_PREFIXES.iter().any(|p| stripped.starts_with(p)) {
            return false;
        }
        let line_lower = line.to_lowercase();
        lowered.iter().any(|v| line_lower.contains(v))
    })
}

/// Candidate source type keyed off the file path alone, used by the
/// type-filtered search pass.
fn path_type_filter(path: &str) -> Option<SourceType> {
    let lower = path.to_lowercase();
    let ends = |suffixes: &[&str]| suffixes.iter().any(|s| lower.ends_with(s));

    if ends(&[".tf", ".tfvars", ".hcl"])
        || lower.ends_with("dockerfile")
        || lower.contains("docker-compose")
        || ends(&["values.yml", "values.yaml", "chart.yml", "chart.yaml"])
    {
        Some(SourceType::Infrastructure)
    } else if ends(&[".sql", ".ddl", ".dml"]) || lower.contains("migration") {
        Some(SourceType::Sql)
    } else if ends(&[".py", ".pyw"]) {
        Some(SourceType::Python)
    } else if ends(&[".sh", ".bash", ".zsh"]) {
        Some(SourceType::Shell)
    } else if ends(&[".yml", ".yaml", ".json", ".toml", ".ini", ".conf", ".env"]) {
        Some(SourceType::Config)
    } else if ends(&[".md", ".rst", ".txt"]) {
        Some(SourceType::Documentation)
    } else {
        None
    }
}
