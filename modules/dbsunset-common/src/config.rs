use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Source control (GitHub MCP server)
    pub github_token: String,

    // Chat (Slack MCP server)
    pub slack_token: String,

    // LLM (agentic batch processor)
    pub openai_api_key: String,

    /// Path to the MCP server manifest (JSON `{"mcpServers": {...}}`).
    pub mcp_config_path: PathBuf,

    /// Root directory for workflow log snapshots.
    pub data_dir: PathBuf,

    /// Upper bound on concurrently running workflow steps.
    pub max_parallel_steps: usize,

    /// Number of files per LLM batch.
    pub agent_batch_size: usize,

    /// Bounded concurrency for per-repository fan-out.
    pub max_parallel_repos: usize,
}

impl Config {
    /// Load configuration for a live workflow run.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            github_token: required_env("GITHUB_PERSONAL_ACCESS_TOKEN"),
            slack_token: required_env("SLACK_BOT_TOKEN"),
            openai_api_key: required_env("OPENAI_API_KEY"),
            mcp_config_path: env_path("MCP_CONFIG_PATH", "mcp_config.json"),
            data_dir: env_path("DATA_DIR", "data"),
            max_parallel_steps: env_usize("MAX_PARALLEL_STEPS", 4),
            agent_batch_size: env_usize("AGENT_BATCH_SIZE", 3),
            max_parallel_repos: env_usize("MAX_PARALLEL_REPOS", 3),
        }
    }

    /// Load config for end-to-end runs against the in-process mock backend.
    /// No external secrets are needed.
    pub fn e2e_from_env() -> Self {
        Self {
            github_token: env::var("GITHUB_PERSONAL_ACCESS_TOKEN").unwrap_or_default(),
            slack_token: env::var("SLACK_BOT_TOKEN").unwrap_or_default(),
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            mcp_config_path: env_path("MCP_CONFIG_PATH", "mcp_config.json"),
            data_dir: env_path("DATA_DIR", "data"),
            max_parallel_steps: env_usize("MAX_PARALLEL_STEPS", 4),
            agent_batch_size: env_usize("AGENT_BATCH_SIZE", 3),
            max_parallel_repos: env_usize("MAX_PARALLEL_REPOS", 3),
        }
    }

    /// Log the presence of each sensitive env var without leaking its value.
    pub fn log_redacted(&self) {
        let vars = [
            ("GITHUB_PERSONAL_ACCESS_TOKEN", &self.github_token),
            ("SLACK_BOT_TOKEN", &self.slack_token),
            ("OPENAI_API_KEY", &self.openai_api_key),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
        tracing::info!("MCP_CONFIG_PATH = {}", self.mcp_config_path.display());
        tracing::info!("DATA_DIR = {}", self.data_dir.display());
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
