//! Wire shapes returned by the MCP servers this workspace drives.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Result of packing a remote repository into a single addressable artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackResult {
    pub output_id: String,
    #[serde(default)]
    pub total_size: u64,
}

/// One grep hit inside a packed archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrepMatch {
    pub file: String,
    pub line_number: u32,
    /// The matching line with its surrounding context lines.
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrepResult {
    #[serde(default)]
    pub matches: Vec<GrepMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub login: String,
}

/// Subset of the repository object the workflow needs.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryInfo {
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForkInfo {
    pub owner: Owner,
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub html_url: String,
}
