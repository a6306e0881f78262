use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ai_client::{ChatModel, OpenAi};
use dbsunset_common::{Config, LogRegistry};
use dbsunset_core::testing::{
    mock_session, MockChatModel, MockGithubBackend, MockRepo, MockRepomixBackend,
    MockSlackBackend,
};
use dbsunset_core::workflow::run_decommission;
use dbsunset_engine::{CancelHandle, WorkflowStatus};
use mcp_client::{McpSession, ServerManifest};

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Run the live workflow against configured MCP servers.
    Workflow,
    /// Run the live workflow and persist the log snapshot for dashboards.
    Streamlit,
    /// Run against the in-process mock backends, no network.
    E2e,
}

#[derive(Parser)]
#[command(name = "decommission", about = "Database decommissioning workflow")]
struct Cli {
    /// Database identifier to decommission.
    #[arg(long)]
    database: String,

    /// Target repository URLs (comma separated).
    #[arg(long, value_delimiter = ',', required = true)]
    repos: Vec<String>,

    /// Slack channel id for progress notifications.
    #[arg(long)]
    slack_channel: Option<String>,

    /// Path to the MCP server manifest (overrides MCP_CONFIG_PATH).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Mode::Workflow)]
    mode: Mode,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("dbsunset=info".parse().expect("directive")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match cli.mode {
        Mode::E2e => Config::e2e_from_env(),
        _ => Config::from_env(),
    };
    if let Some(path) = cli.config {
        config.mcp_config_path = path;
    }
    config.log_redacted();

    let (session, model): (Arc<McpSession>, Arc<dyn ChatModel>) = match cli.mode {
        Mode::E2e => {
            // A small scripted repository so the full pipeline can be
            // exercised without credentials.
            let mut files = BTreeMap::new();
            files.insert(
                "db/schema.sql".to_string(),
                format!("CREATE DATABASE {};\nCREATE TABLE t (id int);\n", cli.database),
            );
            files.insert(
                "config/database.yml".to_string(),
                format!("production:\n  database: {}\n", cli.database),
            );
            let session = mock_session(
                MockGithubBackend::new(),
                MockRepomixBackend::new(MockRepo::new(files)),
                MockSlackBackend::new(),
            );
            let model: Arc<dyn ChatModel> =
                Arc::new(MockChatModel::rewriting_all("# decommissioned\n"));
            (session, model)
        }
        _ => {
            let manifest = match ServerManifest::load(&config.mcp_config_path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    error!(error = %e, "Cannot load MCP server manifest");
                    return ExitCode::FAILURE;
                }
            };
            let model = match OpenAi::from_env("gpt-4o-mini") {
                Ok(model) => Arc::new(model) as Arc<dyn ChatModel>,
                Err(e) => {
                    error!(error = %e, "Cannot construct LLM client");
                    return ExitCode::FAILURE;
                }
            };
            (Arc::new(McpSession::new(manifest)), model)
        }
    };

    let registry = Arc::new(LogRegistry::new());
    let cancel = CancelHandle::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling workflow");
            cancel_on_signal.cancel();
        }
    });

    let outcome = run_decommission(
        &config,
        &cli.database,
        cli.repos,
        cli.slack_channel,
        session,
        model,
        registry.clone(),
        &cancel,
    )
    .await;

    match outcome {
        Ok((result, workflow_id)) => {
            if cli.mode == Mode::Streamlit {
                if let Err(e) = registry.save_snapshot(&workflow_id, &config.data_dir) {
                    error!(error = %e, "Failed to save log snapshot");
                }
            }
            info!(
                status = %result.status,
                completed = result.steps_completed,
                failed = result.steps_failed,
                success_rate = result.success_rate,
                "Decommissioning workflow finished"
            );
            match result.status {
                WorkflowStatus::Completed | WorkflowStatus::PartialSuccess => ExitCode::SUCCESS,
                WorkflowStatus::Cancelled => ExitCode::from(EXIT_INTERRUPTED),
                WorkflowStatus::Failed => ExitCode::FAILURE,
            }
        }
        Err(e) => {
            error!(error = %e, "Workflow failed to run");
            ExitCode::FAILURE
        }
    }
}
