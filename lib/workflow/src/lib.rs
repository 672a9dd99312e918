//! Workflow execution engine for nodeflow.
//!
//! This crate turns a node/connection graph into a run:
//!
//! - **Model**: [`Workflow`], [`Node`], [`Connection`] and the closed [`NodeType`] catalogue
//! - **Graph**: topological ordering with cycle detection and the hub skip-set
//! - **Context**: the immutable-update variable map threaded through a run, plus templating
//! - **Executors**: the [`NodeExecutor`] contract and the injectable [`ExecutorRegistry`]
//! - **Steps**: checkpointed, retried units of side-effecting work
//! - **Orchestration**: quota, sequential fail-fast dispatch and the Execution record lifecycle
//! - **Triggers**: fire-and-forget run dispatch and single-node test runs

pub mod config;
pub mod connection;
pub mod context;
pub mod definition;
pub mod error;
pub mod execution;
pub mod executor;
pub mod graph;
pub mod node;
pub mod orchestrator;
pub mod quota;
pub mod status;
pub mod step;
pub mod store;
pub mod template;
pub mod test_run;
pub mod trigger;

pub use config::EngineConfig;
pub use connection::{Connection, MAIN_SLOT};
pub use context::ExecutionContext;
pub use definition::Workflow;
pub use error::{
    EntitlementError, GraphError, NodeError, RegistryError, RunError, StoreError, TestRunError,
};
pub use execution::{CreateOutcome, Execution, ExecutionOutcome, ExecutionStatus, ExecutionStore};
pub use executor::{ExecutorInput, ExecutorRegistry, NodeExecutor, validated, with_status};
pub use graph::{ExecutionPlan, compute_skip_set, topological_sort};
pub use node::{Node, NodeClass, NodeId, NodeType};
pub use orchestrator::WorkflowOrchestrator;
pub use quota::{Entitlements, QuotaPolicy, StaticEntitlements};
pub use status::{
    BroadcastStatusPublisher, NodeStatus, NodeStatusHandle, NoopStatusPublisher,
    RecordingStatusPublisher, StatusEvent, StatusPublisher,
};
pub use step::{
    GenerationTelemetry, ImmediateSteps, RetryPolicy, StepFn, StepJournal, StepRunner,
    StepRunnerFactory, step_fn,
};
pub use store::{InMemoryExecutionStore, InMemoryWorkflowRepository, WorkflowRepository};
pub use template::{CompiledTemplate, JinjaTemplates, TemplateEngine};
pub use trigger::{TriggeredRun, WorkflowTrigger};
