//! In-process mock backends: a scripted repository served through the same
//! tool surfaces the live MCP servers expose, plus a scripted chat model.
//! End-to-end tests and `--mode e2e` runs drive the full workflow against
//! these without touching the network.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use ai_client::ChatModel;
use mcp_client::{McpError, McpSession, ToolBackend, ToolInfo};

// ---------------------------------------------------------------------------
// Chat model
// ---------------------------------------------------------------------------

type ChatFn = dyn Fn(&str, &str) -> anyhow::Result<String> + Send + Sync;

pub struct MockChatModel {
    respond: Box<ChatFn>,
}

impl MockChatModel {
    pub fn from_fn<F>(respond: F) -> Self
    where
        F: Fn(&str, &str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
        }
    }

    /// A model that answers every prompt with a fixed string.
    pub fn fixed(response: impl Into<String>) -> Self {
        let response = response.into();
        Self::from_fn(move |_, _| Ok(response.clone()))
    }

    /// A model that rewrites every file in the prompt with the given
    /// content, mirroring the strict JSON contract.
    pub fn rewriting_all(modified_content: impl Into<String>) -> Self {
        let modified_content = modified_content.into();
        Self::from_fn(move |_, user| {
            let mut out = serde_json::Map::new();
            for line in user.lines() {
                if let Some(path) = line.strip_prefix("File path: ") {
                    out.insert(
                        path.to_string(),
                        json!({ "modified_content": modified_content.clone() }),
                    );
                }
            }
            Ok(Value::Object(out).to_string())
        })
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn chat_completion(&self, system: &str, user: &str) -> anyhow::Result<String> {
        (self.respond)(system, user)
    }

    async fn chat_json(&self, system: &str, user: &str) -> anyhow::Result<String> {
        (self.respond)(system, user)
    }
}

// ---------------------------------------------------------------------------
// Scripted repository shared by the github and repomix mocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MockRepo {
    pub files: BTreeMap<String, String>,
    pub default_branch: String,
}

impl MockRepo {
    pub fn new(files: BTreeMap<String, String>) -> Self {
        Self {
            files,
            default_branch: "main".to_string(),
        }
    }

    pub fn empty() -> Self {
        Self::new(BTreeMap::new())
    }
}

#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub path: String,
    pub content: String,
    pub message: String,
    pub branch: String,
}

#[derive(Debug, Clone)]
pub struct PrRecord {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

// ---------------------------------------------------------------------------
// GitHub backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockGithubBackend {
    pub default_branch: String,
    pub fork_owner: String,
    pub branches: Mutex<Vec<String>>,
    pub commits: Mutex<Vec<CommitRecord>>,
    pub prs: Mutex<Vec<PrRecord>>,
}

impl MockGithubBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            default_branch: "main".to_string(),
            fork_owner: "decomm-bot".to_string(),
            branches: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
            prs: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ToolBackend for MockGithubBackend {
    async fn invoke(&self, tool_name: &str, params: Value) -> mcp_client::Result<Value> {
        match tool_name {
            "get_repository" => Ok(json!({ "default_branch": self.default_branch })),
            "fork_repository" => Ok(json!({
                "owner": { "login": self.fork_owner },
                "default_branch": self.default_branch,
            })),
            "create_branch" => {
                let branch = params["branch"].as_str().unwrap_or_default().to_string();
                self.branches.lock().unwrap().push(branch);
                Ok(json!({}))
            }
            "create_or_update_file" => {
                self.commits.lock().unwrap().push(CommitRecord {
                    path: params["path"].as_str().unwrap_or_default().to_string(),
                    content: params["content"].as_str().unwrap_or_default().to_string(),
                    message: params["message"].as_str().unwrap_or_default().to_string(),
                    branch: params["branch"].as_str().unwrap_or_default().to_string(),
                });
                Ok(json!({}))
            }
            "create_pull_request" => {
                let mut prs = self.prs.lock().unwrap();
                prs.push(PrRecord {
                    title: params["title"].as_str().unwrap_or_default().to_string(),
                    head: params["head"].as_str().unwrap_or_default().to_string(),
                    base: params["base"].as_str().unwrap_or_default().to_string(),
                    body: params["body"].as_str().unwrap_or_default().to_string(),
                });
                let number = prs.len();
                Ok(json!({
                    "number": number,
                    "html_url": format!("https://github.com/example/pull/{number}"),
                }))
            }
            "search_code" => Ok(json!({ "items": [] })),
            other => Err(McpError::Tool(format!("unknown tool {other}"))),
        }
    }

    async fn list_tools(&self) -> mcp_client::Result<Vec<ToolInfo>> {
        Ok(tool_list(&[
            "get_repository",
            "fork_repository",
            "create_branch",
            "create_or_update_file",
            "create_pull_request",
            "search_code",
        ]))
    }

    async fn close(&self) -> mcp_client::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Repomix (pack/grep) backend
// ---------------------------------------------------------------------------

pub struct MockRepomixBackend {
    repo: MockRepo,
}

impl MockRepomixBackend {
    pub fn new(repo: MockRepo) -> Arc<Self> {
        Arc::new(Self { repo })
    }

    fn packed_content(&self) -> String {
        let mut out = String::new();
        for (path, content) in &self.repo.files {
            out.push_str(&format!("<file path=\"{path}\">\n{content}\n</file>\n"));
        }
        out
    }
}

#[async_trait]
impl ToolBackend for MockRepomixBackend {
    async fn invoke(&self, tool_name: &str, params: Value) -> mcp_client::Result<Value> {
        match tool_name {
            "pack_remote_repository" => Ok(json!({
                "output_id": "pack-1",
                "total_size": self.packed_content().len(),
            })),
            "read_repomix_output" => Ok(json!({ "content": self.packed_content() })),
            "grep_repomix_output" => {
                let pattern = params["pattern"].as_str().unwrap_or_default();
                let ignore_case = params["ignoreCase"].as_bool().unwrap_or(false);
                let full = if ignore_case {
                    format!("(?i){pattern}")
                } else {
                    pattern.to_string()
                };
                let regex = Regex::new(&full)
                    .map_err(|e| McpError::Tool(format!("invalid pattern: {e}")))?;

                let mut matches = Vec::new();
                for (path, content) in &self.repo.files {
                    for (line_no, line) in content.lines().enumerate() {
                        if regex.is_match(line) {
                            matches.push(json!({
                                "file": path,
                                "line_number": line_no + 1,
                                "context": line,
                            }));
                        }
                    }
                }
                Ok(json!({ "matches": matches }))
            }
            other => Err(McpError::Tool(format!("unknown tool {other}"))),
        }
    }

    async fn list_tools(&self) -> mcp_client::Result<Vec<ToolInfo>> {
        Ok(tool_list(&[
            "pack_remote_repository",
            "read_repomix_output",
            "grep_repomix_output",
        ]))
    }

    async fn close(&self) -> mcp_client::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Slack backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockSlackBackend {
    pub posts: Mutex<Vec<(String, String)>>,
    pub fail_posts: bool,
}

impl MockSlackBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            posts: Mutex::new(Vec::new()),
            fail_posts: true,
        })
    }
}

#[async_trait]
impl ToolBackend for MockSlackBackend {
    async fn invoke(&self, tool_name: &str, params: Value) -> mcp_client::Result<Value> {
        match tool_name {
            "slack_post_message" => {
                if self.fail_posts {
                    return Err(McpError::Tool("channel_not_found".into()));
                }
                self.posts.lock().unwrap().push((
                    params["channel_id"].as_str().unwrap_or_default().to_string(),
                    params["text"].as_str().unwrap_or_default().to_string(),
                ));
                Ok(json!({ "ok": true }))
            }
            other => Err(McpError::Tool(format!("unknown tool {other}"))),
        }
    }

    async fn list_tools(&self) -> mcp_client::Result<Vec<ToolInfo>> {
        Ok(tool_list(&["slack_post_message"]))
    }

    async fn close(&self) -> mcp_client::Result<()> {
        Ok(())
    }
}

fn tool_list(names: &[&str]) -> Vec<ToolInfo> {
    names
        .iter()
        .map(|name| ToolInfo {
            name: (*name).to_string(),
            description: String::new(),
        })
        .collect()
}

/// Assemble a session over the three mock backends, keyed by the same
/// server names the live manifest uses.
pub fn mock_session(
    github: Arc<MockGithubBackend>,
    repomix: Arc<MockRepomixBackend>,
    slack: Arc<MockSlackBackend>,
) -> Arc<McpSession> {
    let mut backends: HashMap<String, Arc<dyn ToolBackend>> = HashMap::new();
    backends.insert(crate::deps::GITHUB_SERVER.to_string(), github);
    backends.insert(crate::deps::REPOMIX_SERVER.to_string(), repomix);
    backends.insert(crate::deps::SLACK_SERVER.to_string(), slack);
    Arc::new(McpSession::from_backends(backends))
}
