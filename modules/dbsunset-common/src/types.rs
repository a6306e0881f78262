//! Core domain types for the decommissioning workflow.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DecommError;

// ---------------------------------------------------------------------------
// Source types
// ---------------------------------------------------------------------------

/// Coarse category of a file, determined by extension, name, location and
/// content signals. Variant order is decommissioning risk priority and is
/// used to break classification ties.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Infrastructure,
    Config,
    Sql,
    Python,
    Shell,
    Documentation,
    Unknown,
}

impl SourceType {
    /// All classifiable types, in risk-priority order. `Unknown` is excluded:
    /// it is a floor, never a candidate.
    pub fn candidates() -> &'static [SourceType] {
        &[
            SourceType::Infrastructure,
            SourceType::Config,
            SourceType::Sql,
            SourceType::Python,
            SourceType::Shell,
            SourceType::Documentation,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Infrastructure => "infrastructure",
            SourceType::Config => "config",
            SourceType::Sql => "sql",
            SourceType::Python => "python",
            SourceType::Shell => "shell",
            SourceType::Documentation => "documentation",
            SourceType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Repository reference
// ---------------------------------------------------------------------------

/// `(owner, name, url)` triple derived from a canonical GitHub URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    pub url: String,
}

impl RepoRef {
    /// Parse a canonical `https://github.com/<owner>/<name>[/]` URL.
    /// Any other form is rejected.
    pub fn parse(repo_url: &str) -> Result<Self, DecommError> {
        let parsed = url::Url::parse(repo_url)
            .map_err(|e| DecommError::RepoUrl(format!("{repo_url}: {e}")))?;

        if parsed.scheme() != "https" || parsed.host_str() != Some("github.com") {
            return Err(DecommError::RepoUrl(format!(
                "{repo_url}: expected https://github.com/<owner>/<name>"
            )));
        }

        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();

        match segments.as_slice() {
            [owner, name] => Ok(Self {
                owner: (*owner).to_string(),
                name: (*name).to_string(),
                url: repo_url.trim_end_matches('/').to_string(),
            }),
            _ => Err(DecommError::RepoUrl(format!(
                "{repo_url}: expected https://github.com/<owner>/<name>"
            ))),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Result of classifying a single file. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub source_type: SourceType,
    /// Clamped to `[0.0, 1.0]`.
    pub confidence: f64,
    pub matched_patterns: Vec<String>,
    pub detected_frameworks: Vec<String>,
    /// Names of the rule groups applicable to this file.
    pub rule_files: Vec<String>,
}

impl ClassificationResult {
    pub fn unknown() -> Self {
        Self {
            source_type: SourceType::Unknown,
            confidence: 0.0,
            matched_patterns: Vec::new(),
            detected_frameworks: Vec::new(),
            rule_files: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// A single pattern hit within a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: String,
    pub line_number: u32,
    pub line_content: String,
}

/// All hits for one file, merged across search passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMatch {
    pub path: String,
    pub source_type: SourceType,
    pub confidence: f64,
    pub match_count: usize,
    pub pattern_matches: Vec<PatternMatch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfidenceDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub average: f64,
}

impl ConfidenceDistribution {
    /// high ≥ 0.8, medium ∈ [0.5, 0.8), low < 0.5.
    pub fn from_scores(scores: &[f64]) -> Self {
        let high = scores.iter().filter(|s| **s >= 0.8).count();
        let medium = scores.iter().filter(|s| **s >= 0.5 && **s < 0.8).count();
        let low = scores.iter().filter(|s| **s < 0.5).count();
        let average = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        Self {
            high,
            medium,
            low,
            average,
        }
    }
}

/// Repository shape statistics gathered while parsing the packed archive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoStats {
    pub total_files: usize,
    pub files_by_extension: BTreeMap<String, usize>,
}

/// Outcome of pattern discovery over one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub database_name: String,
    pub repo: RepoRef,
    pub total_files_scanned: usize,
    pub files: Vec<FileMatch>,
    pub files_by_type: BTreeMap<SourceType, Vec<FileMatch>>,
    pub confidence_distribution: ConfidenceDistribution,
    pub stats: RepoStats,
}

impl DiscoveryResult {
    pub fn empty(database_name: &str, repo: RepoRef) -> Self {
        Self {
            database_name: database_name.to_string(),
            repo,
            total_files_scanned: 0,
            files: Vec::new(),
            files_by_type: BTreeMap::new(),
            confidence_distribution: ConfidenceDistribution::default(),
            stats: RepoStats::default(),
        }
    }

    /// Assemble a result from merged per-file matches. Grouping and the
    /// confidence distribution are derived here so they can never disagree
    /// with `files`.
    pub fn from_matches(
        database_name: &str,
        repo: RepoRef,
        total_files_scanned: usize,
        files: Vec<FileMatch>,
        stats: RepoStats,
    ) -> Self {
        let mut files_by_type: BTreeMap<SourceType, Vec<FileMatch>> = BTreeMap::new();
        for file in &files {
            files_by_type
                .entry(file.source_type)
                .or_default()
                .push(file.clone());
        }
        let scores: Vec<f64> = files.iter().map(|f| f.confidence).collect();
        Self {
            database_name: database_name.to_string(),
            repo,
            total_files_scanned,
            files,
            files_by_type,
            confidence_distribution: ConfidenceDistribution::from_scores(&scores),
            stats,
        }
    }

    pub fn matched_file_count(&self) -> usize {
        self.files.len()
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// What a rule does to matching lines. Closed set; unknown actions are a
/// compile-time impossibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    CommentOut,
    AddDeprecationNotice,
    RemoveMatchingLines,
}

/// Comment syntax family for a rule's target language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentStyle {
    Hash,
    DoubleDash,
    DoubleSlash,
}

impl CommentStyle {
    pub fn prefix(&self) -> &'static str {
        match self {
            CommentStyle::Hash => "#",
            CommentStyle::DoubleDash => "--",
            CommentStyle::DoubleSlash => "//",
        }
    }
}

/// A named pattern-plus-action unit. Patterns carry the `{{TARGET_DB}}`
/// template token, substituted with the regex-escaped database name before
/// compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub description: String,
    pub patterns: Vec<String>,
    pub action: RuleAction,
    /// Empty means the rule applies to every file of its source type.
    pub required_frameworks: Vec<String>,
    /// Comment syntax to use; `None` falls back to a per-line heuristic.
    pub comment_style: Option<CommentStyle>,
}

/// Outcome of applying one rule to one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_id: String,
    pub applied: bool,
    pub changes_made: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Outcome of processing one file, deterministic or agentic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProcessingResult {
    pub file_path: String,
    pub source_type: SourceType,
    pub rules_applied: Vec<RuleResult>,
    pub total_changes: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present only when `total_changes > 0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_content: Option<String>,
}

impl FileProcessingResult {
    pub fn unchanged(file_path: &str, source_type: SourceType) -> Self {
        Self {
            file_path: file_path.to_string(),
            source_type,
            rules_applied: Vec::new(),
            total_changes: 0,
            success: true,
            error: None,
            modified_content: None,
        }
    }

    pub fn failed(file_path: &str, source_type: SourceType, error: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            source_type,
            rules_applied: Vec::new(),
            total_changes: 0,
            success: false,
            error: Some(error.to_string()),
            modified_content: None,
        }
    }
}
