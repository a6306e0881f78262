//! Pipeline engine: a typed DAG of steps with dependency-ordered, bounded
//! parallel execution, per-step timeout and retry, and a shared per-run
//! context.

pub mod builder;
pub mod context;
pub mod error;
pub mod executor;
pub mod step;

pub use builder::{WorkflowBuilder, WorkflowConfig};
pub use context::WorkflowContext;
pub use error::EngineError;
pub use executor::{CancelHandle, Workflow, WorkflowResult, WorkflowStatus};
pub use step::{handler_fn, StepExec, StepHandler, StepKind, WorkflowStep};
