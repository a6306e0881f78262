//! End-to-end workflow scenarios over the in-process mock backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use dbsunset_common::{Config, LogRegistry, LogEntryKind};
use dbsunset_core::testing::{
    mock_session, MockChatModel, MockGithubBackend, MockRepo, MockRepomixBackend,
    MockSlackBackend,
};
use dbsunset_core::workflow::run_decommission;
use dbsunset_engine::{CancelHandle, WorkflowStatus};

const REPO_URL: &str = "https://github.com/acme/legacy-service";

fn test_config() -> Config {
    Config {
        github_token: String::new(),
        slack_token: String::new(),
        openai_api_key: String::new(),
        mcp_config_path: "mcp_config.json".into(),
        data_dir: "data".into(),
        max_parallel_steps: 4,
        agent_batch_size: 3,
        max_parallel_repos: 3,
    }
}

fn sql_and_config_repo(database: &str) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    files.insert(
        "db/schema.sql".to_string(),
        format!("CREATE DATABASE {database};\nCREATE TABLE elements (id int);\n"),
    );
    files.insert(
        "config/database.yml".to_string(),
        format!("production:\n  database: {database}\n"),
    );
    files
}

#[tokio::test(start_paused = true)]
async fn full_workflow_opens_a_pull_request() {
    let github = MockGithubBackend::new();
    let slack = MockSlackBackend::new();
    let session = mock_session(
        github.clone(),
        MockRepomixBackend::new(MockRepo::new(sql_and_config_repo("periodic_table"))),
        slack.clone(),
    );
    let registry = Arc::new(LogRegistry::new());

    let (result, workflow_id) = run_decommission(
        &test_config(),
        "periodic_table",
        vec![REPO_URL.to_string()],
        Some("C012345".to_string()),
        session,
        Arc::new(MockChatModel::rewriting_all("# decommissioned\n")),
        registry.clone(),
        &CancelHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.steps_completed, 6);

    // The SQL statement was commented out and committed.
    let commits = github.commits.lock().unwrap();
    let schema_commit = commits
        .iter()
        .find(|c| c.path == "db/schema.sql")
        .expect("schema.sql committed");
    assert!(schema_commit
        .content
        .contains("-- CREATE DATABASE periodic_table;"));
    assert!(schema_commit.message.starts_with("refactor(sql):"));
    assert!(schema_commit
        .message
        .contains("remove periodic_table references from db/schema.sql"));
    assert!(schema_commit.branch.starts_with("decommission-periodic_table-"));

    let config_commit = commits
        .iter()
        .find(|c| c.path == "config/database.yml")
        .expect("database.yml committed");
    assert!(config_commit.content.contains("#   database: periodic_table"));

    // One PR against the upstream default branch, from the fork.
    let prs = github.prs.lock().unwrap();
    assert_eq!(prs.len(), 1);
    let pr = &prs[0];
    assert!(pr.title.contains("periodic_table"));
    assert_eq!(pr.base, "main");
    assert!(pr.head.starts_with("decomm-bot:decommission-periodic_table-"));
    assert!(pr.body.contains("## Changes by File Type"));
    assert!(pr.body.contains("SQL"));
    assert!(pr.body.contains("CONFIG"));
    assert!(pr.body.contains("`db/schema.sql`"));
    assert!(pr.body.contains("## Modified Files"));

    // Slack got a start and a completion message.
    let posts = slack.posts.lock().unwrap();
    assert!(posts.len() >= 2);
    assert!(posts.iter().all(|(channel, _)| channel == "C012345"));
    assert!(posts.iter().any(|(_, text)| text.contains("finished")));

    // The log carries tables and a sunburst for the dashboard.
    assert!(!registry.entries(&workflow_id, Some(LogEntryKind::Table)).is_empty());
    assert!(!registry
        .entries(&workflow_id, Some(LogEntryKind::Sunburst))
        .is_empty());
    let snapshot = registry.snapshot(&workflow_id);
    assert!(snapshot.as_array().unwrap().len() > 3);
}

#[tokio::test(start_paused = true)]
async fn repository_without_references_skips_the_pr() {
    let github = MockGithubBackend::new();
    let mut files = BTreeMap::new();
    files.insert("src/main.py".to_string(), "print('hello')\n".to_string());

    let session = mock_session(
        github.clone(),
        MockRepomixBackend::new(MockRepo::new(files)),
        MockSlackBackend::new(),
    );
    let registry = Arc::new(LogRegistry::new());

    let (result, _) = run_decommission(
        &test_config(),
        "orders",
        vec![REPO_URL.to_string()],
        None,
        session,
        Arc::new(MockChatModel::rewriting_all("# decommissioned\n")),
        registry,
        &CancelHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    let pr_step = result.step_result("create_github_pr").unwrap();
    assert_eq!(pr_step["pr_created"], false);
    assert!(pr_step["message"]
        .as_str()
        .unwrap()
        .contains("No changes to commit"));
    assert!(github.prs.lock().unwrap().is_empty());
    assert!(github.commits.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_slack_never_fails_the_workflow() {
    let github = MockGithubBackend::new();
    let slack = MockSlackBackend::failing();
    let session = mock_session(
        github.clone(),
        MockRepomixBackend::new(MockRepo::new(sql_and_config_repo("postgres_air"))),
        slack,
    );
    let registry = Arc::new(LogRegistry::new());

    let (result, workflow_id) = run_decommission(
        &test_config(),
        "postgres_air",
        vec![REPO_URL.to_string()],
        Some("C012345".to_string()),
        session,
        Arc::new(MockChatModel::rewriting_all("# decommissioned\n")),
        registry.clone(),
        &CancelHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(github.prs.lock().unwrap().len(), 1);

    // Each failed post is a warning entry in the workflow log.
    let warnings: Vec<String> = registry
        .entries(&workflow_id, Some(LogEntryKind::Text))
        .into_iter()
        .filter_map(|e| match e.content {
            dbsunset_common::log::LogContent::Text { text, level } => {
                (level == dbsunset_common::LogLevel::Warning).then_some(text)
            }
            _ => None,
        })
        .collect();
    assert!(warnings.iter().any(|w| w.contains("Slack notification")));
}

#[tokio::test(start_paused = true)]
async fn malformed_agent_batch_fails_only_its_files() {
    let github = MockGithubBackend::new();
    let mut files = BTreeMap::new();
    files.insert(
        "app/orders_client.py".to_string(),
        "import orders\nconn = connect('orders')\n".to_string(),
    );
    files.insert(
        "app/billing_sync.py".to_string(),
        "import orders\nsession = open_session('orders')\n".to_string(),
    );

    let session = mock_session(
        github.clone(),
        MockRepomixBackend::new(MockRepo::new(files)),
        MockSlackBackend::new(),
    );
    let registry = Arc::new(LogRegistry::new());

    // One batch per file; the batch holding orders_client.py is malformed.
    let mut config = test_config();
    config.agent_batch_size = 1;
    let model = MockChatModel::from_fn(|_, user| {
        if user.contains("orders_client.py") {
            return Ok("this is not json".to_string());
        }
        let mut out = serde_json::Map::new();
        for line in user.lines() {
            if let Some(path) = line.strip_prefix("File path: ") {
                out.insert(
                    path.to_string(),
                    json!({ "modified_content": "# neutralized\n" }),
                );
            }
        }
        Ok(serde_json::Value::Object(out).to_string())
    });

    let (result, _) = run_decommission(
        &config,
        "orders",
        vec![REPO_URL.to_string()],
        None,
        session,
        Arc::new(model),
        registry,
        &CancelHandle::new(),
    )
    .await
    .unwrap();

    // The healthy batch still flowed through to a commit and PR.
    assert_eq!(result.status, WorkflowStatus::Completed);
    let refactoring = result.step_result("apply_refactoring").unwrap();
    assert_eq!(refactoring["files_processed"], 2);
    assert_eq!(refactoring["files_failed"], 1);
    assert_eq!(refactoring["files_modified"], 1);

    let commits = github.commits.lock().unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].path, "app/billing_sync.py");
    assert_eq!(github.prs.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_repository_urls_are_skipped_with_a_warning() {
    let github = MockGithubBackend::new();
    let session = mock_session(
        github.clone(),
        MockRepomixBackend::new(MockRepo::new(sql_and_config_repo("orders"))),
        MockSlackBackend::new(),
    );
    let registry = Arc::new(LogRegistry::new());

    let (result, workflow_id) = run_decommission(
        &test_config(),
        "orders",
        vec![
            "https://gitlab.com/acme/not-github".to_string(),
            REPO_URL.to_string(),
        ],
        None,
        session,
        Arc::new(MockChatModel::rewriting_all("# decommissioned\n")),
        registry.clone(),
        &CancelHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.status, WorkflowStatus::Completed);
    let repos = result.step_result("process_repositories").unwrap();
    assert_eq!(repos["repositories_processed"], 1);
    assert_eq!(repos["repositories_skipped"].as_array().unwrap().len(), 1);

    let entries = registry.entries(&workflow_id, Some(LogEntryKind::Text));
    assert!(entries.iter().any(|e| matches!(
        &e.content,
        dbsunset_common::log::LogContent::Text { text, .. } if text.contains("Skipping repository")
    )));
}
