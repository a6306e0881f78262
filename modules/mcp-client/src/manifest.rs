//! MCP server manifest: which servers exist and how to spawn them.
//!
//! The manifest is the standard `{"mcpServers": {...}}` JSON document.
//! Values of the form `$NAME` are substituted from the process environment
//! before any transport is spawned.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{McpError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerManifest {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: HashMap<String, ServerSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ServerManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            McpError::Config(format!("cannot read manifest {}: {e}", path.display()))
        })?;
        let manifest: ServerManifest = serde_json::from_str(&raw)
            .map_err(|e| McpError::Config(format!("invalid manifest {}: {e}", path.display())))?;
        Ok(manifest)
    }

    /// Spec for a named server with all `$NAME` values resolved.
    pub fn resolved_spec(&self, server_name: &str) -> Result<ServerSpec> {
        let spec = self.mcp_servers.get(server_name).ok_or_else(|| {
            McpError::Config(format!("server '{server_name}' not found in manifest"))
        })?;

        Ok(ServerSpec {
            command: substitute_env(&spec.command)?,
            args: spec
                .args
                .iter()
                .map(|a| substitute_env(a))
                .collect::<Result<Vec<_>>>()?,
            env: spec
                .env
                .iter()
                .map(|(k, v)| Ok((k.clone(), substitute_env(v)?)))
                .collect::<Result<HashMap<_, _>>>()?,
        })
    }

    pub fn server_names(&self) -> Vec<String> {
        self.mcp_servers.keys().cloned().collect()
    }
}

/// Replace every `$NAME` token with the named environment variable.
/// A referenced variable that is not set is a configuration error.
fn substitute_env(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        while let Some(&(_, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                name.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            out.push('$');
            continue;
        }
        let resolved = std::env::var(&name)
            .map_err(|_| McpError::Config(format!("environment variable ${name} is not set")))?;
        out.push_str(&resolved);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_and_resolves_env_values() {
        std::env::set_var("MCP_TEST_TOKEN", "tok-123");
        let file = write_manifest(
            r#"{
                "mcpServers": {
                    "github": {
                        "command": "npx",
                        "args": ["-y", "@modelcontextprotocol/server-github"],
                        "env": { "GITHUB_PERSONAL_ACCESS_TOKEN": "$MCP_TEST_TOKEN" }
                    }
                }
            }"#,
        );
        let manifest = ServerManifest::load(file.path()).unwrap();
        let spec = manifest.resolved_spec("github").unwrap();
        assert_eq!(spec.command, "npx");
        assert_eq!(
            spec.env.get("GITHUB_PERSONAL_ACCESS_TOKEN").unwrap(),
            "tok-123"
        );
    }

    #[test]
    fn missing_env_var_is_config_error() {
        let file = write_manifest(
            r#"{
                "mcpServers": {
                    "slack": { "command": "slack-mcp", "env": { "TOKEN": "$MCP_TEST_DEFINITELY_UNSET" } }
                }
            }"#,
        );
        let manifest = ServerManifest::load(file.path()).unwrap();
        let err = manifest.resolved_spec("slack").unwrap_err();
        assert!(matches!(err, McpError::Config(_)));
    }

    #[test]
    fn unknown_server_is_config_error() {
        let file = write_manifest(r#"{ "mcpServers": {} }"#);
        let manifest = ServerManifest::load(file.path()).unwrap();
        assert!(matches!(
            manifest.resolved_spec("nope").unwrap_err(),
            McpError::Config(_)
        ));
    }

    #[test]
    fn literal_dollar_without_name_is_preserved() {
        assert_eq!(substitute_env("a$ b").unwrap(), "a$ b");
        assert_eq!(substitute_env("plain").unwrap(), "plain");
    }
}
