//! Structured workflow log — append-only per-workflow stream of text,
//! table, and sunburst entries, consumed by live dashboards.
//!
//! The registry is an explicit value threaded through the pipeline; appends
//! for a workflow serialize under the registry lock so `entry_id` order is
//! exactly append order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

// ---------------------------------------------------------------------------
// Entry kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEntryKind {
    Text,
    Table,
    Sunburst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Debug,
}

/// Headers plus equal-length rows; cells are already stringified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    /// Render as a GitHub-flavored Markdown table.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        if let Some(ref title) = self.title {
            out.push_str(&format!("**{title}**\n\n"));
        }
        out.push_str(&format!("| {} |\n", self.headers.join(" | ")));
        out.push_str(&format!(
            "|{}\n",
            " --- |".repeat(self.headers.len())
        ));
        for row in &self.rows {
            out.push_str(&format!("| {} |\n", row.join(" | ")));
        }
        out
    }
}

/// Hierarchical chart data as parallel arrays; an empty parent string marks
/// a root node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunburstData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub labels: Vec<String>,
    pub parents: Vec<String>,
    pub values: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<String>>,
}

impl SunburstData {
    /// Produce the full Plotly-compatible figure object.
    pub fn to_plotly_figure(&self) -> Value {
        let mut trace = json!({
            "type": "sunburst",
            "labels": self.labels,
            "parents": self.parents,
            "values": self.values,
            "branchvalues": "total",
        });
        if let Some(ref colors) = self.colors {
            trace["marker"] = json!({ "colors": colors });
        }
        let mut layout = json!({
            "margin": { "t": 40, "l": 0, "r": 0, "b": 0 },
        });
        if let Some(ref title) = self.title {
            layout["title"] = json!({ "text": title });
        }
        json!({ "data": [trace], "layout": layout })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogContent {
    Text { text: String, level: LogLevel },
    Table(TableData),
    Sunburst(SunburstData),
}

impl LogContent {
    pub fn kind(&self) -> LogEntryKind {
        match self {
            LogContent::Text { .. } => LogEntryKind::Text,
            LogContent::Table(_) => LogEntryKind::Table,
            LogContent::Sunburst(_) => LogEntryKind::Sunburst,
        }
    }
}

/// One immutable log record. `entry_id` is strictly increasing within a
/// workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub entry_id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub content: LogContent,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl LogEntry {
    pub fn kind(&self) -> LogEntryKind {
        self.content.kind()
    }

    /// Snapshot form: `content` for a sunburst is the full Plotly figure,
    /// for a table the `{headers, rows, title}` object.
    fn to_snapshot(&self) -> Value {
        let content = match &self.content {
            LogContent::Text { text, level } => json!({ "text": text, "level": level }),
            LogContent::Table(table) => serde_json::to_value(table).unwrap_or(Value::Null),
            LogContent::Sunburst(sunburst) => sunburst.to_plotly_figure(),
        };
        json!({
            "entry_id": self.entry_id,
            "timestamp": self.timestamp.to_rfc3339(),
            "kind": self.kind(),
            "content": content,
            "metadata": self.metadata,
        })
    }
}

// ---------------------------------------------------------------------------
// Per-workflow log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LogSummary {
    pub total: usize,
    pub text_entries: usize,
    pub table_entries: usize,
    pub sunburst_entries: usize,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug)]
struct WorkflowLog {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    entries: Vec<LogEntry>,
    next_id: u64,
}

impl WorkflowLog {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            entries: Vec::new(),
            next_id: 1,
        }
    }

    fn append(&mut self, content: LogContent, metadata: Map<String, Value>) -> u64 {
        let entry_id = self.next_id;
        self.next_id += 1;
        self.updated_at = Utc::now();
        self.entries.push(LogEntry {
            entry_id,
            timestamp: self.updated_at,
            content,
            metadata,
        });
        entry_id
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide registry of workflow logs, passed by reference — never a
/// global. Creates a log on first append for a workflow id.
#[derive(Debug, Default)]
pub struct LogRegistry {
    logs: Mutex<HashMap<String, WorkflowLog>>,
}

impl LogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, workflow_id: &str, content: LogContent, metadata: Map<String, Value>) -> u64 {
        let mut logs = self.logs.lock().expect("log registry poisoned");
        logs.entry(workflow_id.to_string())
            .or_insert_with(WorkflowLog::new)
            .append(content, metadata)
    }

    pub fn append_text(
        &self,
        workflow_id: &str,
        text: impl Into<String>,
        level: LogLevel,
        metadata: Option<Map<String, Value>>,
    ) -> u64 {
        self.append(
            workflow_id,
            LogContent::Text {
                text: text.into(),
                level,
            },
            metadata.unwrap_or_default(),
        )
    }

    pub fn append_table(
        &self,
        workflow_id: &str,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        title: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> u64 {
        self.append(
            workflow_id,
            LogContent::Table(TableData {
                title,
                headers,
                rows,
            }),
            metadata.unwrap_or_default(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn append_sunburst(
        &self,
        workflow_id: &str,
        labels: Vec<String>,
        parents: Vec<String>,
        values: Vec<f64>,
        title: Option<String>,
        colors: Option<Vec<String>>,
        metadata: Option<Map<String, Value>>,
    ) -> u64 {
        self.append(
            workflow_id,
            LogContent::Sunburst(SunburstData {
                title,
                labels,
                parents,
                values,
                colors,
            }),
            metadata.unwrap_or_default(),
        )
    }

    /// Shorthand for an info-level text entry.
    pub fn info(&self, workflow_id: &str, text: impl Into<String>) -> u64 {
        self.append_text(workflow_id, text, LogLevel::Info, None)
    }

    /// Shorthand for a warning-level text entry.
    pub fn warning(&self, workflow_id: &str, text: impl Into<String>) -> u64 {
        self.append_text(workflow_id, text, LogLevel::Warning, None)
    }

    /// Shorthand for an error-level text entry.
    pub fn error(&self, workflow_id: &str, text: impl Into<String>) -> u64 {
        self.append_text(workflow_id, text, LogLevel::Error, None)
    }

    /// Consistent snapshot of entries in append order, optionally filtered
    /// by kind.
    pub fn entries(&self, workflow_id: &str, kind: Option<LogEntryKind>) -> Vec<LogEntry> {
        let logs = self.logs.lock().expect("log registry poisoned");
        match logs.get(workflow_id) {
            Some(log) => log
                .entries
                .iter()
                .filter(|e| kind.map_or(true, |k| e.kind() == k))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn summary(&self, workflow_id: &str) -> Option<LogSummary> {
        let logs = self.logs.lock().expect("log registry poisoned");
        logs.get(workflow_id).map(|log| LogSummary {
            total: log.entries.len(),
            text_entries: log
                .entries
                .iter()
                .filter(|e| e.kind() == LogEntryKind::Text)
                .count(),
            table_entries: log
                .entries
                .iter()
                .filter(|e| e.kind() == LogEntryKind::Table)
                .count(),
            sunburst_entries: log
                .entries
                .iter()
                .filter(|e| e.kind() == LogEntryKind::Sunburst)
                .count(),
            created_at: log.created_at,
            last_updated: log.updated_at,
        })
    }

    pub fn workflow_ids(&self) -> Vec<String> {
        let logs = self.logs.lock().expect("log registry poisoned");
        logs.keys().cloned().collect()
    }

    /// Serialize the workflow's entries as the dashboard snapshot array.
    pub fn snapshot(&self, workflow_id: &str) -> Value {
        let entries = self.entries(workflow_id, None);
        Value::Array(entries.iter().map(LogEntry::to_snapshot).collect())
    }

    /// Write the snapshot to `{data_dir}/decommission-runs/{workflow_id}.json`.
    /// Returns the file path on success.
    pub fn save_snapshot(&self, workflow_id: &str, data_dir: &std::path::Path) -> Result<PathBuf> {
        let dir = data_dir.join("decommission-runs");
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{workflow_id}.json"));
        let snapshot = self.snapshot(workflow_id);
        std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
        info!(path = %path.display(), "Workflow log snapshot saved");

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ids_are_strictly_increasing() {
        let registry = LogRegistry::new();
        let a = registry.info("wf-1", "first");
        let b = registry.warning("wf-1", "second");
        let c = registry.append_table(
            "wf-1",
            vec!["col".into()],
            vec![vec!["cell".into()]],
            None,
            None,
        );
        assert!(a < b && b < c);

        let entries = registry.entries("wf-1", None);
        let ids: Vec<u64> = entries.iter().map(|e| e.entry_id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn workflows_are_isolated() {
        let registry = LogRegistry::new();
        registry.info("wf-a", "a");
        registry.info("wf-b", "b");
        assert_eq!(registry.entries("wf-a", None).len(), 1);
        assert_eq!(registry.entries("wf-b", None).len(), 1);
        // Each workflow's ids start from 1 independently.
        assert_eq!(registry.entries("wf-b", None)[0].entry_id, 1);
    }

    #[test]
    fn table_renders_as_markdown() {
        let table = TableData {
            title: Some("Readiness".into()),
            headers: vec!["Client".into(), "Status".into()],
            rows: vec![
                vec!["github".into(), "ok".into()],
                vec!["slack".into(), "ok".into()],
            ],
        };
        let md = table.to_markdown();
        assert!(md.contains("**Readiness**"));
        assert!(md.contains("| Client | Status |"));
        assert!(md.contains("| --- | --- |"));
        assert!(md.contains("| github | ok |"));
    }

    #[test]
    fn sunburst_produces_plotly_figure() {
        let sunburst = SunburstData {
            title: Some("Files by type".into()),
            labels: vec!["orders".into(), "sql".into(), "schema.sql".into()],
            parents: vec!["".into(), "orders".into(), "sql".into()],
            values: vec![3.0, 2.0, 1.0],
            colors: None,
        };
        let figure = sunburst.to_plotly_figure();
        assert_eq!(figure["data"][0]["type"], "sunburst");
        assert_eq!(figure["data"][0]["labels"][0], "orders");
        assert_eq!(figure["data"][0]["parents"][0], "");
        assert_eq!(figure["layout"]["title"]["text"], "Files by type");
    }

    #[test]
    fn log_entry_round_trips_through_json() {
        let registry = LogRegistry::new();
        registry.append_sunburst(
            "wf-1",
            vec!["root".into()],
            vec!["".into()],
            vec![1.0],
            Some("chart".into()),
            None,
            None,
        );
        let entry = registry.entries("wf-1", None).pop().unwrap();
        let json = serde_json::to_string(&entry).unwrap();
        let back: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }

    #[test]
    fn entries_filter_by_kind() {
        let registry = LogRegistry::new();
        registry.info("wf-1", "text");
        registry.append_table("wf-1", vec!["h".into()], vec![], None, None);
        assert_eq!(
            registry.entries("wf-1", Some(LogEntryKind::Table)).len(),
            1
        );
        assert_eq!(registry.entries("wf-1", Some(LogEntryKind::Text)).len(), 1);
    }

    #[test]
    fn summary_counts_by_kind() {
        let registry = LogRegistry::new();
        registry.info("wf-1", "one");
        registry.info("wf-1", "two");
        registry.append_table("wf-1", vec!["h".into()], vec![], None, None);
        let summary = registry.summary("wf-1").unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.text_entries, 2);
        assert_eq!(summary.table_entries, 1);
        assert_eq!(summary.sunburst_entries, 0);
        assert!(registry.summary("missing").is_none());
    }

    #[test]
    fn snapshot_inlines_plotly_figure() {
        let registry = LogRegistry::new();
        registry.append_sunburst(
            "wf-1",
            vec!["root".into()],
            vec!["".into()],
            vec![1.0],
            None,
            None,
            None,
        );
        let snapshot = registry.snapshot("wf-1");
        assert_eq!(snapshot[0]["kind"], "sunburst");
        assert_eq!(snapshot[0]["content"]["data"][0]["type"], "sunburst");
    }

    #[test]
    fn save_snapshot_writes_json_file() {
        let registry = LogRegistry::new();
        registry.info("wf-save", "hello");
        let dir = tempfile::tempdir().unwrap();
        let path = registry.save_snapshot("wf-save", dir.path()).unwrap();
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written[0]["entry_id"], 1);
        assert_eq!(written[0]["content"]["text"], "hello");
    }
}
