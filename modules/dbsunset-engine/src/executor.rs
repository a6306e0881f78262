//! Dependency-ordered executor with bounded parallelism, per-step timeout
//! and retry, and exactly-once client shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use mcp_client::McpSession;

use crate::builder::WorkflowConfig;
use crate::context::WorkflowContext;
use crate::error::EngineError;
use crate::step::{StepExec, WorkflowStep};

const MAX_BACKOFF_SECS: u64 = 30;

/// How long running steps get to finish after cancellation before they are
/// aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Completed,
    PartialSuccess,
    Failed,
    Cancelled,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::PartialSuccess => "partial_success",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub status: WorkflowStatus,
    pub duration_seconds: f64,
    /// Completed steps as a percentage of declared steps.
    pub success_rate: f64,
    pub step_results: HashMap<String, Value>,
    pub steps_completed: usize,
    pub steps_failed: usize,
}

impl WorkflowResult {
    pub fn step_result(&self, step_id: &str) -> Option<&Value> {
        self.step_results.get(step_id)
    }
}

/// External cancellation signal. Cloneable; `cancel()` is observed by the
/// executor and by any step selecting on `WorkflowContext::cancelled()`.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// A compiled, executable workflow.
#[derive(Debug)]
pub struct Workflow {
    config: WorkflowConfig,
    steps: Vec<WorkflowStep>,
}

impl Workflow {
    pub(crate) fn new(config: WorkflowConfig, steps: Vec<WorkflowStep>) -> Self {
        Self { config, steps }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }

    pub async fn execute(&self, session: Arc<McpSession>) -> WorkflowResult {
        self.execute_with_cancel(session, &CancelHandle::new())
            .await
    }

    pub async fn execute_with_cancel(
        &self,
        session: Arc<McpSession>,
        cancel: &CancelHandle,
    ) -> WorkflowResult {
        let started = Instant::now();
        info!(workflow = %self.config.name, "Executing workflow");

        let ctx = Arc::new(WorkflowContext::new(
            self.config.name.clone(),
            session.clone(),
            cancel.subscribe(),
        ));

        let index_of: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        let mut states = vec![StepState::Pending; self.steps.len()];
        let mut step_results: HashMap<String, Value> = HashMap::new();

        let mut join_set: JoinSet<Result<Value, EngineError>> = JoinSet::new();
        let mut task_index: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut cancel_rx = cancel.subscribe();
        let mut cancelled = *cancel_rx.borrow();
        let mut halt = false;

        loop {
            if !cancelled && *cancel_rx.borrow_and_update() {
                cancelled = true;
                info!(workflow = %self.config.name, "Cancellation requested");
            }
            if cancelled {
                self.drain_with_grace(
                    &mut join_set,
                    &task_index,
                    &mut states,
                    &mut step_results,
                    &ctx,
                )
                .await;
                break;
            }

            // Cascade: a pending step whose dependency failed or was skipped
            // can never run; a halt or cancellation skips everything pending.
            let mut changed = true;
            while changed {
                changed = false;
                for i in 0..self.steps.len() {
                    if states[i] != StepState::Pending {
                        continue;
                    }
                    let blocked = halt
                        || cancelled
                        || self.steps[i].depends_on.iter().any(|dep| {
                            matches!(
                                states[index_of[dep.as_str()]],
                                StepState::Failed | StepState::Skipped
                            )
                        });
                    if blocked {
                        warn!(step = %self.steps[i].id, "Step skipped");
                        states[i] = StepState::Skipped;
                        changed = true;
                    }
                }
            }

            // Fill the free slots with ready steps.
            if !halt && !cancelled {
                let running = states.iter().filter(|s| **s == StepState::Running).count();
                let mut slots = self.config.max_parallel_steps.saturating_sub(running);
                for i in 0..self.steps.len() {
                    if slots == 0 {
                        break;
                    }
                    if states[i] != StepState::Pending {
                        continue;
                    }
                    let ready = self.steps[i]
                        .depends_on
                        .iter()
                        .all(|dep| states[index_of[dep.as_str()]] == StepState::Completed);
                    if !ready {
                        continue;
                    }

                    states[i] = StepState::Running;
                    slots -= 1;
                    let step = self.steps[i].clone();
                    let ctx = ctx.clone();
                    let default_timeout = self.config.default_timeout;
                    let default_retries = self.config.default_retry_count;
                    info!(step = %step.id, name = %step.name, "Step started");
                    let handle = join_set.spawn(async move {
                        run_step(ctx, &step, default_timeout, default_retries).await
                    });
                    task_index.insert(handle.id(), i);
                }
            }

            if join_set.is_empty() {
                break;
            }

            tokio::select! {
                joined = join_set.join_next_with_id() => {
                    let Some(joined) = joined else { continue };
                    self.record_outcome(joined, &task_index, &mut states, &mut step_results, &ctx, &mut halt);
                }
                changed = cancel_rx.changed(), if !cancelled => {
                    if changed.is_ok() && *cancel_rx.borrow() {
                        // Handled at the top of the next iteration.
                        continue;
                    }
                }
            }
        }

        // Anything still pending at exit (cancellation path) is skipped.
        for state in states.iter_mut() {
            if *state == StepState::Pending || *state == StepState::Running {
                *state = StepState::Skipped;
            }
        }

        // The engine owns client lifetime: shut down everything it opened,
        // on every exit path, exactly once.
        session.close_all().await;

        let steps_completed = states.iter().filter(|s| **s == StepState::Completed).count();
        let steps_failed = states.iter().filter(|s| **s == StepState::Failed).count();
        let status = if cancelled {
            WorkflowStatus::Cancelled
        } else if steps_failed == 0 && steps_completed == self.steps.len() {
            WorkflowStatus::Completed
        } else if steps_completed > 0 {
            WorkflowStatus::PartialSuccess
        } else {
            WorkflowStatus::Failed
        };
        let success_rate = if self.steps.is_empty() {
            100.0
        } else {
            steps_completed as f64 / self.steps.len() as f64 * 100.0
        };

        let result = WorkflowResult {
            status,
            duration_seconds: started.elapsed().as_secs_f64(),
            success_rate,
            step_results,
            steps_completed,
            steps_failed,
        };
        info!(
            workflow = %self.config.name,
            status = %result.status,
            completed = result.steps_completed,
            failed = result.steps_failed,
            duration_secs = result.duration_seconds,
            "Workflow finished"
        );
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn record_outcome(
        &self,
        joined: Result<(tokio::task::Id, Result<Value, EngineError>), tokio::task::JoinError>,
        task_index: &HashMap<tokio::task::Id, usize>,
        states: &mut [StepState],
        step_results: &mut HashMap<String, Value>,
        ctx: &Arc<WorkflowContext>,
        halt: &mut bool,
    ) {
        let (index, outcome) = match joined {
            Ok((task_id, outcome)) => (task_index[&task_id], outcome),
            Err(join_err) => {
                let index = task_index.get(&join_err.id()).copied();
                let Some(index) = index else { return };
                let outcome = if join_err.is_cancelled() {
                    Err(EngineError::Cancelled(self.steps[index].id.clone()))
                } else {
                    Err(EngineError::StepFailed {
                        step_id: self.steps[index].id.clone(),
                        message: format!("step panicked: {join_err}"),
                    })
                };
                (index, outcome)
            }
        };

        let step = &self.steps[index];
        match outcome {
            Ok(value) => {
                // Publish before marking completed so dependents always
                // observe the result.
                match ctx.publish_step_result(&step.id, value.clone()) {
                    Ok(()) => {
                        step_results.insert(step.id.clone(), value);
                        states[index] = StepState::Completed;
                        info!(step = %step.id, "Step completed");
                    }
                    Err(e) => {
                        step_results.insert(step.id.clone(), json!({ "error": e.to_string() }));
                        states[index] = StepState::Failed;
                        warn!(step = %step.id, error = %e, "Step result publish failed");
                        if self.config.stop_on_error {
                            *halt = true;
                        }
                    }
                }
            }
            Err(e) => {
                step_results.insert(step.id.clone(), json!({ "error": e.to_string() }));
                states[index] = StepState::Failed;
                warn!(step = %step.id, error = %e, "Step failed");
                if self.config.stop_on_error {
                    *halt = true;
                }
            }
        }
    }

    /// Give running steps a bounded window to finish, then abort the rest.
    async fn drain_with_grace(
        &self,
        join_set: &mut JoinSet<Result<Value, EngineError>>,
        task_index: &HashMap<tokio::task::Id, usize>,
        states: &mut [StepState],
        step_results: &mut HashMap<String, Value>,
        ctx: &Arc<WorkflowContext>,
    ) {
        let grace = tokio::time::sleep(CANCEL_GRACE);
        tokio::pin!(grace);
        let mut halt = false;

        loop {
            tokio::select! {
                _ = &mut grace => {
                    join_set.abort_all();
                    break;
                }
                joined = join_set.join_next_with_id() => {
                    match joined {
                        Some(joined) => self.record_outcome(
                            joined, task_index, states, step_results, ctx, &mut halt,
                        ),
                        None => return,
                    }
                }
            }
        }

        // Aborted tasks surface as cancelled JoinErrors; record them so the
        // final accounting sees a terminal state for every step.
        while let Some(joined) = join_set.join_next_with_id().await {
            self.record_outcome(joined, task_index, states, step_results, ctx, &mut halt);
        }
    }
}

async fn run_step(
    ctx: Arc<WorkflowContext>,
    step: &WorkflowStep,
    default_timeout: Duration,
    default_retries: u32,
) -> Result<Value, EngineError> {
    let timeout = step.timeout.unwrap_or(default_timeout);
    let retries = step.retry_count.unwrap_or(default_retries);
    let mut attempt = 0u32;

    loop {
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled(step.id.clone()));
        }

        let outcome = match tokio::time::timeout(timeout, run_step_once(&ctx, step)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::Timeout {
                step_id: step.id.clone(),
                seconds: timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < retries => {
                let wait = 2u64.pow(attempt).min(MAX_BACKOFF_SECS);
                warn!(
                    step = %step.id,
                    attempt = attempt + 1,
                    wait_secs = wait,
                    error = %e,
                    "Step attempt failed, retrying"
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn run_step_once(
    ctx: &Arc<WorkflowContext>,
    step: &WorkflowStep,
) -> Result<Value, EngineError> {
    match &step.exec {
        StepExec::Handler(handler) => handler
            .execute(ctx.clone(), step.clone())
            .await
            .map_err(|e| EngineError::from_step_error(&step.id, e)),
        StepExec::Tool { server, tool } => {
            let backend = ctx.backend(server).await?;
            Ok(backend
                .invoke(tool, Value::Object(step.parameters.clone()))
                .await?)
        }
    }
}
