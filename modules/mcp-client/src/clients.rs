//! Typed capability surfaces over a shared [`ToolBackend`].
//!
//! Each client is a thin translation layer: build the tool parameters,
//! invoke with the caller's retry budget, deserialize the result.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{McpError, Result};
use crate::transport::ToolBackend;
use crate::types::{ForkInfo, GrepResult, PackResult, PullRequestInfo, RepositoryInfo, ToolInfo};

/// Default retry budget for capability calls that tolerate transient
/// transport noise.
const DEFAULT_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// Source control
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SourceControlClient {
    backend: Arc<dyn ToolBackend>,
}

impl SourceControlClient {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self { backend }
    }

    pub async fn get_repository(&self, owner: &str, name: &str) -> Result<RepositoryInfo> {
        let value = self
            .backend
            .invoke_with_retry(
                "get_repository",
                json!({ "owner": owner, "repo": name }),
                DEFAULT_RETRIES,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get_file_contents(&self, owner: &str, name: &str, path: &str) -> Result<String> {
        let value = self
            .backend
            .invoke_with_retry(
                "get_file_contents",
                json!({ "owner": owner, "repo": name, "path": path }),
                DEFAULT_RETRIES,
            )
            .await?;
        match value {
            Value::String(content) => Ok(content),
            other => other
                .get("content")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| McpError::Parse(format!("no file content for {path}"))),
        }
    }

    pub async fn fork_repository(&self, owner: &str, name: &str) -> Result<ForkInfo> {
        let value = self
            .backend
            .invoke_with_retry(
                "fork_repository",
                json!({ "owner": owner, "repo": name }),
                DEFAULT_RETRIES,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn create_branch(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
        from_branch: &str,
    ) -> Result<()> {
        self.backend
            .invoke_with_retry(
                "create_branch",
                json!({
                    "owner": owner,
                    "repo": name,
                    "branch": branch,
                    "from_branch": from_branch,
                }),
                DEFAULT_RETRIES,
            )
            .await?;
        Ok(())
    }

    pub async fn create_or_update_file(
        &self,
        owner: &str,
        name: &str,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
    ) -> Result<()> {
        self.backend
            .invoke_with_retry(
                "create_or_update_file",
                json!({
                    "owner": owner,
                    "repo": name,
                    "path": path,
                    "content": content,
                    "message": message,
                    "branch": branch,
                }),
                DEFAULT_RETRIES,
            )
            .await?;
        Ok(())
    }

    pub async fn create_pull_request(
        &self,
        owner: &str,
        name: &str,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<PullRequestInfo> {
        let value = self
            .backend
            .invoke_with_retry(
                "create_pull_request",
                json!({
                    "owner": owner,
                    "repo": name,
                    "title": title,
                    "head": head,
                    "base": base,
                    "body": body,
                }),
                DEFAULT_RETRIES,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn search_code(&self, query: &str) -> Result<Value> {
        self.backend
            .invoke_with_retry("search_code", json!({ "q": query }), DEFAULT_RETRIES)
            .await
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        self.backend.list_tools().await
    }
}

// ---------------------------------------------------------------------------
// Pack / grep
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PackClient {
    backend: Arc<dyn ToolBackend>,
}

impl PackClient {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self { backend }
    }

    pub async fn pack_remote_repository(
        &self,
        repo_url: &str,
        include_patterns: Option<&[&str]>,
        exclude_patterns: Option<&[&str]>,
    ) -> Result<PackResult> {
        let mut params = json!({ "remote": repo_url });
        if let Some(include) = include_patterns {
            params["includePatterns"] = json!(include.join(","));
        }
        if let Some(exclude) = exclude_patterns {
            params["ignorePatterns"] = json!(exclude.join(","));
        }
        let value = self
            .backend
            .invoke_with_retry("pack_remote_repository", params, DEFAULT_RETRIES)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn read_packed(&self, output_id: &str) -> Result<String> {
        let value = self
            .backend
            .invoke_with_retry(
                "read_repomix_output",
                json!({ "outputId": output_id }),
                DEFAULT_RETRIES,
            )
            .await?;
        match value {
            Value::String(content) => Ok(content),
            other => other
                .get("content")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| McpError::Parse(format!("no packed content for {output_id}"))),
        }
    }

    pub async fn grep_packed(
        &self,
        output_id: &str,
        pattern: &str,
        context_lines: u32,
        ignore_case: bool,
    ) -> Result<GrepResult> {
        let value = self
            .backend
            .invoke_with_retry(
                "grep_repomix_output",
                json!({
                    "outputId": output_id,
                    "pattern": pattern,
                    "contextLines": context_lines,
                    "ignoreCase": ignore_case,
                }),
                DEFAULT_RETRIES,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        self.backend.list_tools().await
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ChatClient {
    backend: Arc<dyn ToolBackend>,
}

impl ChatClient {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self { backend }
    }

    /// Post a message; retried once since chat posts are best-effort anyway.
    pub async fn post_message(&self, channel: &str, text: &str) -> Result<()> {
        self.backend
            .invoke_with_retry(
                "slack_post_message",
                json!({ "channel_id": channel, "text": text }),
                1,
            )
            .await?;
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        self.backend.list_tools().await
    }
}

// ---------------------------------------------------------------------------
// Filesystem (used by validation)
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FilesystemClient {
    backend: Arc<dyn ToolBackend>,
}

impl FilesystemClient {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self { backend }
    }

    pub async fn read_file(&self, path: &str) -> Result<String> {
        let value = self
            .backend
            .invoke_with_retry("read_file", json!({ "path": path }), DEFAULT_RETRIES)
            .await?;
        match value {
            Value::String(content) => Ok(content),
            other => other
                .get("content")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| McpError::Parse(format!("no content for {path}"))),
        }
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.backend
            .invoke_with_retry(
                "write_file",
                json!({ "path": path, "content": content }),
                DEFAULT_RETRIES,
            )
            .await?;
        Ok(())
    }

    pub async fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        let value = self
            .backend
            .invoke_with_retry("list_directory", json!({ "path": path }), DEFAULT_RETRIES)
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted backend that records calls and answers from a fixed table.
    struct ScriptedBackend {
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ToolBackend for ScriptedBackend {
        async fn invoke(&self, tool_name: &str, params: Value) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((tool_name.to_string(), params));
            match tool_name {
                "get_repository" => Ok(json!({ "default_branch": "develop" })),
                "fork_repository" => Ok(json!({ "owner": { "login": "bot" } })),
                "create_pull_request" => {
                    Ok(json!({ "number": 7, "html_url": "https://github.com/x/pull/7" }))
                }
                "pack_remote_repository" => Ok(json!({ "output_id": "out-9" })),
                "read_repomix_output" => Ok(json!({ "content": "<file path=\"a\">\nx\n</file>" })),
                "grep_repomix_output" => Ok(json!({
                    "matches": [{ "file": "a.sql", "line_number": 3, "context": "USE orders;" }]
                })),
                "read_file" => Ok(Value::String("hello".into())),
                "list_directory" => Ok(json!(["a.txt", "b.txt"])),
                other => Err(McpError::Tool(format!("unknown tool {other}"))),
            }
        }

        async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
            Ok(Vec::new())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn source_control_client_parses_wire_shapes() {
        let backend = ScriptedBackend::new();
        let client = SourceControlClient::new(backend.clone());

        let repo = client.get_repository("acme", "svc").await.unwrap();
        assert_eq!(repo.default_branch, "develop");

        let fork = client.fork_repository("acme", "svc").await.unwrap();
        assert_eq!(fork.owner.login, "bot");
        // Absent default_branch falls back to main.
        assert_eq!(fork.default_branch, "main");

        let pr = client
            .create_pull_request("acme", "svc", "title", "bot:branch", "main", "body")
            .await
            .unwrap();
        assert_eq!(pr.number, 7);

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0].0, "get_repository");
        assert_eq!(calls[0].1["owner"], "acme");
        assert_eq!(calls[2].1["head"], "bot:branch");
    }

    #[tokio::test]
    async fn pack_client_round_trips_pack_read_grep() {
        let backend = ScriptedBackend::new();
        let client = PackClient::new(backend);

        let packed = client
            .pack_remote_repository("https://github.com/acme/svc", None, Some(&["*.log"]))
            .await
            .unwrap();
        assert_eq!(packed.output_id, "out-9");

        let content = client.read_packed("out-9").await.unwrap();
        assert!(content.contains("<file path=\"a\">"));

        let grep = client.grep_packed("out-9", "orders", 1, true).await.unwrap();
        assert_eq!(grep.matches.len(), 1);
        assert_eq!(grep.matches[0].file, "a.sql");
        assert_eq!(grep.matches[0].line_number, 3);
    }

    #[tokio::test]
    async fn filesystem_client_reads_and_lists() {
        let backend = ScriptedBackend::new();
        let client = FilesystemClient::new(backend);

        assert_eq!(client.read_file("/tmp/x").await.unwrap(), "hello");
        assert_eq!(
            client.list_directory("/tmp").await.unwrap(),
            vec!["a.txt", "b.txt"]
        );
    }
}
