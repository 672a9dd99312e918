//! Top-level workflow orchestration.
//!
//! One call to [`WorkflowOrchestrator::run`] drives one run to a terminal
//! state:
//! 1. Load the workflow and create the Execution record (idempotent by
//!    correlation id)
//! 2. Enforce the owner's monthly quota
//! 3. Compile the graph and resolve every executor
//! 4. Dispatch nodes sequentially, skipping hub-owned adapters
//! 5. Finalize the record to `Success` or `Failed`
//!
//! Dispatch is fail-fast: the first node error stops the run. The
//! orchestrator performs no retries; steps inside executors do.
//!
//! A correlation id is dispatched by at most one task of this process at a
//! time. A duplicate delivery that arrives mid-run gets the `Running` record
//! back and dispatches nothing.

use crate::context::ExecutionContext;
use crate::definition::Workflow;
use crate::error::RunError;
use crate::execution::{CreateOutcome, Execution, ExecutionOutcome, ExecutionStore};
use crate::executor::{ExecutorInput, ExecutorRegistry, NodeExecutor};
use crate::graph::ExecutionPlan;
use crate::node::Node;
use crate::quota::{Entitlements, QuotaPolicy, StaticEntitlements, month_start};
use crate::status::{NoopStatusPublisher, StatusPublisher};
use crate::step::{StepJournal, StepRunnerFactory};
use crate::store::WorkflowRepository;
use chrono::Utc;
use nodeflow_core::{UserId, WorkflowId};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

/// Runs workflows against injected collaborators.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    pub(crate) workflows: Arc<dyn WorkflowRepository>,
    executions: Arc<dyn ExecutionStore>,
    entitlements: Arc<dyn Entitlements>,
    pub(crate) registry: Arc<ExecutorRegistry>,
    steps: Arc<dyn StepRunnerFactory>,
    pub(crate) status: Arc<dyn StatusPublisher>,
    quota: QuotaPolicy,
    in_flight: InFlightRuns,
}

/// Correlation ids currently being dispatched.
#[derive(Clone, Default)]
struct InFlightRuns {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlightRuns {
    /// Claims `correlation_id`, or returns `None` if another task holds it.
    fn claim(&self, correlation_id: &str) -> Option<RunClaim> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.insert(correlation_id.to_string()).then(|| RunClaim {
            ids: self.ids.clone(),
            correlation_id: correlation_id.to_string(),
        })
    }
}

/// Releases its correlation id when dropped.
struct RunClaim {
    ids: Arc<Mutex<HashSet<String>>>,
    correlation_id: String,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.correlation_id);
    }
}

impl WorkflowOrchestrator {
    /// Creates an orchestrator with an in-process step journal, no status
    /// subscribers, no subscribed owners and the default quota.
    #[must_use]
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        executions: Arc<dyn ExecutionStore>,
        registry: Arc<ExecutorRegistry>,
    ) -> Self {
        Self {
            workflows,
            executions,
            entitlements: Arc::new(StaticEntitlements::new()),
            registry,
            steps: Arc::new(StepJournal::default()),
            status: Arc::new(NoopStatusPublisher),
            quota: QuotaPolicy::default(),
            in_flight: InFlightRuns::default(),
        }
    }

    #[must_use]
    pub fn with_entitlements(mut self, entitlements: Arc<dyn Entitlements>) -> Self {
        self.entitlements = entitlements;
        self
    }

    #[must_use]
    pub fn with_steps(mut self, steps: Arc<dyn StepRunnerFactory>) -> Self {
        self.steps = steps;
        self
    }

    #[must_use]
    pub fn with_status_publisher(mut self, status: Arc<dyn StatusPublisher>) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_quota(mut self, quota: QuotaPolicy) -> Self {
        self.quota = quota;
        self
    }

    /// The execution store, for status lookups.
    #[must_use]
    pub fn executions(&self) -> &Arc<dyn ExecutionStore> {
        &self.executions
    }

    /// Runs a workflow to completion and returns the finalized record.
    ///
    /// A correlation id whose record is already terminal returns that record
    /// without running anything. One whose record is still `Running` resumes,
    /// replaying checkpointed steps, unless another task is dispatching it
    /// right now; then the `Running` record is returned as is.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::CorrelationConflict`] if the correlation id already
    /// names a run of a different workflow. Otherwise returns the error that
    /// ended the run; unless the workflow could not be loaded, the record has
    /// been finalized to `Failed` first.
    #[instrument(skip(self, initial_data), fields(workflow_id = %workflow_id))]
    pub async fn run(
        &self,
        correlation_id: &str,
        workflow_id: WorkflowId,
        initial_data: Option<JsonValue>,
    ) -> Result<Execution, RunError> {
        let workflow = self
            .workflows
            .load(workflow_id)
            .await?
            .ok_or(RunError::WorkflowNotFound { workflow_id })?;

        let mut execution = match self
            .executions
            .create_running(Execution::start(correlation_id, workflow.id, workflow.owner_id))
            .await?
        {
            CreateOutcome::Created(execution) => {
                info!(execution_id = %execution.id, "run started");
                execution
            }
            CreateOutcome::Existing(execution) if execution.workflow_id != workflow.id => {
                warn!(
                    existing_workflow_id = %execution.workflow_id,
                    "correlation id belongs to another workflow"
                );
                return Err(RunError::CorrelationConflict {
                    correlation_id: correlation_id.to_string(),
                    existing_workflow_id: execution.workflow_id,
                });
            }
            CreateOutcome::Existing(execution) if execution.status.is_terminal() => {
                info!(status = %execution.status, "run already finished; ignoring duplicate");
                return Ok(execution);
            }
            CreateOutcome::Existing(execution) => {
                info!(execution_id = %execution.id, "resuming run");
                execution
            }
        };

        let Some(_claim) = self.in_flight.claim(correlation_id) else {
            info!(execution_id = %execution.id, "run already in progress; ignoring duplicate");
            return Ok(execution);
        };

        let result = self.execute(&workflow, correlation_id, initial_data).await;
        let completed_at = Utc::now();

        match result {
            Ok(context) => {
                let outcome = ExecutionOutcome::Success {
                    output: context.into_json(),
                };
                self.executions
                    .finalize(correlation_id, &outcome, completed_at)
                    .await?;
                self.steps.finish_run(correlation_id).await;
                execution.finish(&outcome, completed_at);
                info!(duration_ms = ?execution.duration_ms(), "run succeeded");
                Ok(execution)
            }
            Err(e) => {
                if e.is_fatal() {
                    error!(error = %e, "run aborted by a deployment defect");
                } else {
                    warn!(error = %e, retryable = e.is_retryable(), "run failed");
                }
                let outcome = ExecutionOutcome::failed(&e);
                match self
                    .executions
                    .finalize(correlation_id, &outcome, completed_at)
                    .await
                {
                    Ok(_) => self.steps.finish_run(correlation_id).await,
                    // Checkpoints stay so a redelivery can resume
                    Err(store_error) => {
                        error!(error = %store_error, "failed to finalize failed run");
                    }
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        workflow: &Workflow,
        correlation_id: &str,
        initial_data: Option<JsonValue>,
    ) -> Result<ExecutionContext, RunError> {
        self.check_quota(workflow.owner_id).await?;

        let plan = ExecutionPlan::compile(workflow)?;
        let dispatch = self.resolve_executors(&plan)?;

        let steps = self.steps.for_run(correlation_id);
        let mut context = ExecutionContext::from_initial_data(initial_data);

        for (node, executor) in dispatch {
            let span = info_span!("node", node_id = %node.id, node_type = %node.node_type);
            let input = ExecutorInput {
                node,
                workflow,
                user_id: workflow.owner_id,
                context,
                steps: steps.clone(),
                status: self.status.clone(),
            };
            context = executor
                .execute(input)
                .instrument(span)
                .await
                .map_err(|error| RunError::Node {
                    node_id: node.id.clone(),
                    node_type: node.node_type,
                    error,
                })?;
        }

        Ok(context)
    }

    async fn check_quota(&self, owner_id: UserId) -> Result<(), RunError> {
        let since = month_start(Utc::now());
        let used = self
            .executions
            .count_for_owner_since(owner_id, since)
            .await?;
        if !self.quota.is_exceeded(used) {
            return Ok(());
        }
        if self.entitlements.has_active_subscription(owner_id).await? {
            debug!(%owner_id, used, "over free allowance with active subscription");
            return Ok(());
        }
        Err(RunError::QuotaExceeded {
            owner_id,
            used,
            limit: self.quota.monthly_limit,
        })
    }

    /// Pairs each dispatched node with its executor, so an unregistered type
    /// fails the run before any side effect.
    fn resolve_executors<'p>(
        &self,
        plan: &'p ExecutionPlan,
    ) -> Result<Vec<(&'p Node, Arc<dyn NodeExecutor>)>, RunError> {
        let mut dispatch = Vec::with_capacity(plan.order.len());
        for node in &plan.order {
            if plan.is_skipped(&node.id) {
                debug!(node_id = %node.id, node_type = %node.node_type, "skipping hub-owned node");
                continue;
            }
            dispatch.push((node, self.registry.get(node.node_type)?));
        }
        Ok(dispatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::error::{GraphError, NodeError};
    use crate::execution::ExecutionStatus;
    use crate::node::{NodeId, NodeType};
    use crate::store::{InMemoryExecutionStore, InMemoryWorkflowRepository};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Binds `{"ran": <node id>}` under the node's variable name (or its id).
    #[derive(Clone, Default)]
    struct Recording {
        calls: Arc<Mutex<Vec<NodeId>>>,
    }

    impl Recording {
        fn calls(&self) -> Vec<NodeId> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeExecutor for Recording {
        async fn execute(&self, input: ExecutorInput<'_>) -> Result<ExecutionContext, NodeError> {
            self.calls.lock().unwrap().push(input.node.id.clone());
            let name = input
                .node
                .variable_name()
                .unwrap_or(input.node.id.as_str())
                .to_string();
            Ok(input
                .context
                .with_variable(name, json!({"ran": input.node.id.as_str()})))
        }
    }

    struct Failing;

    #[async_trait]
    impl NodeExecutor for Failing {
        async fn execute(&self, _input: ExecutorInput<'_>) -> Result<ExecutionContext, NodeError> {
            Err(NodeError::failed("webhook rejected the message"))
        }
    }

    struct Harness {
        workflows: InMemoryWorkflowRepository,
        executions: InMemoryExecutionStore,
        entitlements: StaticEntitlements,
        recorder: Recording,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                workflows: InMemoryWorkflowRepository::new(),
                executions: InMemoryExecutionStore::new(),
                entitlements: StaticEntitlements::new(),
                recorder: Recording::default(),
            }
        }

        fn registry(&self) -> ExecutorRegistry {
            let recorder: Arc<dyn NodeExecutor> = Arc::new(self.recorder.clone());
            NodeType::ALL
                .into_iter()
                .fold(ExecutorRegistry::new(), |registry, node_type| {
                    registry.with(node_type, recorder.clone())
                })
        }

        fn orchestrator(&self, registry: ExecutorRegistry) -> WorkflowOrchestrator {
            WorkflowOrchestrator::new(
                Arc::new(self.workflows.clone()),
                Arc::new(self.executions.clone()),
                Arc::new(registry),
            )
            .with_entitlements(Arc::new(self.entitlements.clone()))
        }

        async fn add(&self, workflow: Workflow) -> WorkflowId {
            let id = workflow.id;
            self.workflows.insert(workflow).await;
            id
        }
    }

    fn linear_workflow(owner: UserId) -> Workflow {
        Workflow::new("linear", owner)
            .with_node(Node::new("b", NodeType::Slack).with_data(json!({"variableName": "api"})))
            .with_node(Node::new("a", NodeType::ManualTrigger))
            .with_connection(Connection::new("a", "b"))
    }

    #[tokio::test]
    async fn runs_nodes_in_order_and_records_success() {
        let harness = Harness::new();
        let id = harness.add(linear_workflow(UserId::new())).await;

        let execution = harness
            .orchestrator(harness.registry())
            .run("evt-1", id, None)
            .await
            .expect("run succeeds");

        assert_eq!(harness.recorder.calls(), vec![NodeId::new("a"), NodeId::new("b")]);
        assert_eq!(execution.status, ExecutionStatus::Success);
        let stored = harness.executions.find("evt-1").await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);
        assert_eq!(stored.output.unwrap()["api"], json!({"ran": "b"}));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn initial_data_seeds_the_context() {
        let harness = Harness::new();
        let id = harness.add(linear_workflow(UserId::new())).await;

        let execution = harness
            .orchestrator(harness.registry())
            .run("evt", id, Some(json!({"formData": {"email": "a@b.c"}})))
            .await
            .unwrap();

        let output = execution.output.unwrap();
        assert_eq!(output["formData"]["email"], "a@b.c");
        assert!(output.get("api").is_some());
    }

    #[tokio::test]
    async fn cycle_fails_before_any_node_runs() {
        let harness = Harness::new();
        let workflow = Workflow::new("cyclic", UserId::new())
            .with_node(Node::new("a", NodeType::HttpRequest))
            .with_node(Node::new("b", NodeType::HttpRequest))
            .with_node(Node::new("c", NodeType::HttpRequest))
            .with_connection(Connection::new("a", "b"))
            .with_connection(Connection::new("b", "c"))
            .with_connection(Connection::new("c", "a"));
        let id = harness.add(workflow).await;

        let err = harness
            .orchestrator(harness.registry())
            .run("evt", id, None)
            .await
            .unwrap_err();

        assert_eq!(err, RunError::Graph(GraphError::CycleDetected));
        assert!(harness.recorder.calls().is_empty());
        let stored = harness.executions.find("evt").await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("Workflow contains a cycle"));
    }

    #[tokio::test]
    async fn hub_owned_adapters_are_not_dispatched() {
        let harness = Harness::new();
        let workflow = Workflow::new("agent", UserId::new())
            .with_node(Node::new("trigger", NodeType::ManualTrigger))
            .with_node(Node::new("model", NodeType::OpenAi))
            .with_node(Node::new("memory", NodeType::Postgres))
            .with_node(Node::new("standalone_db", NodeType::Postgres))
            .with_node(Node::new("agent", NodeType::AiAgent))
            .with_connection(Connection::new("trigger", "agent"))
            .with_connection(Connection::new("model", "agent").into_slot("ai-model"))
            .with_connection(Connection::new("memory", "agent").into_slot("database"));
        let id = harness.add(workflow).await;

        harness
            .orchestrator(harness.registry())
            .run("evt", id, None)
            .await
            .unwrap();

        let calls = harness.recorder.calls();
        assert!(!calls.contains(&NodeId::new("model")));
        assert!(!calls.contains(&NodeId::new("memory")));
        assert!(calls.contains(&NodeId::new("standalone_db")));
        assert!(calls.contains(&NodeId::new("agent")));
    }

    #[tokio::test]
    async fn quota_exceeded_finalizes_the_new_record_as_failed() {
        let harness = Harness::new();
        let owner = UserId::new();
        let id = harness.add(linear_workflow(owner)).await;
        for n in 0..101 {
            harness
                .executions
                .create_running(Execution::start(format!("prior-{n}"), id, owner))
                .await
                .unwrap();
        }

        let err = harness
            .orchestrator(harness.registry())
            .run("evt-over", id, None)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RunError::QuotaExceeded {
                owner_id: owner,
                used: 102,
                limit: 100
            }
        );
        assert!(!err.is_retryable());
        assert!(harness.recorder.calls().is_empty());
        let stored = harness.executions.find("evt-over").await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn subscribers_are_not_limited() {
        let harness = Harness::new();
        let owner = UserId::new();
        let id = harness.add(linear_workflow(owner)).await;
        harness.entitlements.subscribe(owner).await;

        let orchestrator = harness
            .orchestrator(harness.registry())
            .with_quota(QuotaPolicy { monthly_limit: 1 });
        orchestrator.run("evt-1", id, None).await.unwrap();
        orchestrator.run("evt-2", id, None).await.unwrap();

        assert_eq!(harness.recorder.calls().len(), 4);
    }

    #[tokio::test]
    async fn first_node_error_stops_the_run() {
        let harness = Harness::new();
        let workflow = Workflow::new("fail-fast", UserId::new())
            .with_node(Node::new("a", NodeType::ManualTrigger))
            .with_node(Node::new("b", NodeType::Discord))
            .with_node(Node::new("c", NodeType::Slack))
            .with_connection(Connection::new("a", "b"))
            .with_connection(Connection::new("b", "c"));
        let id = harness.add(workflow).await;
        let registry = harness
            .registry()
            .with(NodeType::Discord, Arc::new(Failing));

        let err = harness
            .orchestrator(registry)
            .run("evt", id, None)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Node { ref node_id, .. } if node_id.as_str() == "b"));
        assert_eq!(harness.recorder.calls(), vec![NodeId::new("a")]);
        let stored = harness.executions.find("evt").await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert!(stored.output.is_none());
        assert!(stored.error.unwrap().contains("webhook rejected the message"));
        assert!(stored.error_detail.is_some());
    }

    #[tokio::test]
    async fn unregistered_type_fails_before_any_node_runs() {
        let harness = Harness::new();
        let id = harness.add(linear_workflow(UserId::new())).await;
        let registry = ExecutorRegistry::new().with(
            NodeType::ManualTrigger,
            Arc::new(harness.recorder.clone()),
        );

        let err = harness
            .orchestrator(registry)
            .run("evt", id, None)
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(harness.recorder.calls().is_empty());
        let stored = harness.executions.find("evt").await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn duplicate_delivery_of_a_finished_run_is_ignored() {
        let harness = Harness::new();
        let id = harness.add(linear_workflow(UserId::new())).await;
        let orchestrator = harness.orchestrator(harness.registry());

        let first = orchestrator.run("evt", id, None).await.unwrap();
        let second = orchestrator.run("evt", id, None).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(harness.recorder.calls().len(), 2);
        assert_eq!(harness.executions.all().await.len(), 1);
    }

    #[tokio::test]
    async fn missing_workflow_creates_no_record() {
        let harness = Harness::new();
        let missing = WorkflowId::new();

        let err = harness
            .orchestrator(harness.registry())
            .run("evt", missing, None)
            .await
            .unwrap_err();

        assert_eq!(err, RunError::WorkflowNotFound { workflow_id: missing });
        assert!(harness.executions.all().await.is_empty());
    }

    /// Counts how often its `send` step body actually runs.
    #[derive(Clone, Default)]
    struct Sending {
        sends: Arc<std::sync::atomic::AtomicU32>,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl NodeExecutor for Sending {
        async fn execute(&self, input: ExecutorInput<'_>) -> Result<ExecutionContext, NodeError> {
            let sends = self.sends.clone();
            let delay = self.delay;
            let sent = input
                .steps
                .run(
                    &input.step_name("send"),
                    crate::step::step_fn(move || {
                        let sends = sends.clone();
                        async move {
                            tokio::time::sleep(delay).await;
                            sends.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            Ok(json!({"sent": true}))
                        }
                    }),
                )
                .await?;
            Ok(input.context.with_variable("api", sent))
        }
    }

    #[tokio::test]
    async fn running_record_resumes_from_checkpoints() {
        let harness = Harness::new();
        let owner = UserId::new();
        let id = harness.add(linear_workflow(owner)).await;
        let journal = StepJournal::new(crate::step::RetryPolicy::no_retry());
        let sender = Sending::default();

        // A first delivery sent the message but died before finalizing
        harness
            .executions
            .create_running(Execution::start("evt", id, owner))
            .await
            .unwrap();
        journal
            .for_run("evt")
            .run("b:send", crate::step::step_fn(|| async { Ok(json!({"sent": true})) }))
            .await
            .unwrap();

        let registry = harness
            .registry()
            .with(NodeType::Slack, Arc::new(sender.clone()));
        let execution = harness
            .orchestrator(registry)
            .with_steps(Arc::new(journal.clone()))
            .run("evt", id, None)
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(sender.sends.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(harness.executions.all().await.len(), 1);
        // Finished runs drop their checkpoints
        assert_eq!(journal.completed("evt", "b:send").await, None);
    }

    #[tokio::test]
    async fn concurrent_duplicate_delivery_dispatches_once() {
        let harness = Harness::new();
        let id = harness.add(linear_workflow(UserId::new())).await;
        let sender = Sending {
            delay: std::time::Duration::from_millis(100),
            ..Sending::default()
        };
        let registry = harness
            .registry()
            .with(NodeType::Slack, Arc::new(sender.clone()));
        let orchestrator = harness.orchestrator(registry);

        let (first, second) = tokio::join!(
            orchestrator.run("evt-dup", id, None),
            orchestrator.run("evt-dup", id, None),
        );

        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.id, second.id);
        assert_eq!(sender.sends.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(harness.executions.all().await.len(), 1);
        let stored = harness.executions.find("evt-dup").await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);

        // The claim is released once the run is finalized
        let again = orchestrator.run("evt-dup", id, None).await.unwrap();
        assert_eq!(again.status, ExecutionStatus::Success);
        assert_eq!(sender.sends.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn correlation_id_of_another_workflow_is_rejected() {
        let harness = Harness::new();
        let owner = UserId::new();
        let first = harness.add(linear_workflow(owner)).await;
        let second = harness.add(linear_workflow(owner)).await;
        let orchestrator = harness.orchestrator(harness.registry());

        orchestrator.run("evt_stripe_1", first, None).await.unwrap();
        let err = orchestrator
            .run("evt_stripe_1", second, None)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RunError::CorrelationConflict {
                correlation_id: "evt_stripe_1".to_string(),
                existing_workflow_id: first,
            }
        );
        assert_eq!(harness.recorder.calls().len(), 2);
        let records = harness.executions.all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].workflow_id, first);
        assert_eq!(records[0].status, ExecutionStatus::Success);
    }
}
