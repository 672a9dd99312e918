//! Named, idempotent units of side-effecting work.
//!
//! Executors wrap every side effect in a step. A [`StepRunner`] decides what
//! running a step means: the [`StepJournal`] checkpoints completed results by
//! (correlation id, step name), so replaying a run after a partial failure
//! returns the recorded result instead of repeating the side effect, and it
//! retries transient failures with exponential backoff. The orchestrator
//! itself never retries.

use crate::error::NodeError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, info_span, warn};

/// The future produced by one attempt of a step.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<JsonValue, NodeError>> + Send>>;

/// A step body. It may be invoked more than once when retried.
pub type StepFn = Box<dyn Fn() -> StepFuture + Send + Sync>;

/// Boxes an async closure into a [`StepFn`].
pub fn step_fn<F, Fut>(f: F) -> StepFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue, NodeError>> + Send + 'static,
{
    Box::new(move || -> StepFuture { Box::pin(f()) })
}

/// Extra attributes recorded for model-generation steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationTelemetry {
    /// Provider tag, e.g. "openai".
    pub provider: String,
    /// Model identifier.
    pub model: String,
}

/// Runs named steps for one run.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Runs `step` under `name`, or returns its checkpointed result.
    ///
    /// # Errors
    ///
    /// Returns the step's error once the runner gives up on it.
    async fn run(&self, name: &str, step: StepFn) -> Result<JsonValue, NodeError>;

    /// Runs a model-generation step, recording telemetry on a span.
    ///
    /// # Errors
    ///
    /// Same as [`StepRunner::run`].
    async fn run_generation(
        &self,
        name: &str,
        telemetry: GenerationTelemetry,
        step: StepFn,
    ) -> Result<JsonValue, NodeError> {
        let span = info_span!(
            "generation",
            step = name,
            provider = %telemetry.provider,
            model = %telemetry.model
        );
        self.run(name, step).instrument(span).await
    }
}

/// Produces a step runner scoped to one run.
#[async_trait]
pub trait StepRunnerFactory: Send + Sync {
    /// Returns the runner for the run identified by `correlation_id`.
    fn for_run(&self, correlation_id: &str) -> Arc<dyn StepRunner>;

    /// Called once the run's record is terminal and can no longer resume.
    async fn finish_run(&self, _correlation_id: &str) {}
}

/// Retry policy for transient step failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each later one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        // attempt is the 1-based number of the attempt about to start
        let exponent = attempt.saturating_sub(2).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

type JournalKey = (String, String);

/// In-process checkpoint log shared by all runs.
#[derive(Clone, Default)]
pub struct StepJournal {
    entries: Arc<Mutex<HashMap<JournalKey, JsonValue>>>,
    policy: RetryPolicy,
}

impl StepJournal {
    /// Creates an empty journal with the given retry policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            policy,
        }
    }

    /// Returns the checkpointed result of a step, if it completed.
    pub async fn completed(&self, correlation_id: &str, step: &str) -> Option<JsonValue> {
        self.entries
            .lock()
            .await
            .get(&(correlation_id.to_string(), step.to_string()))
            .cloned()
    }

    /// Drops every checkpoint of a run.
    pub async fn forget_run(&self, correlation_id: &str) {
        self.entries
            .lock()
            .await
            .retain(|(run, _), _| run != correlation_id);
    }
}

#[async_trait]
impl StepRunnerFactory for StepJournal {
    fn for_run(&self, correlation_id: &str) -> Arc<dyn StepRunner> {
        Arc::new(JournaledSteps {
            correlation_id: correlation_id.to_string(),
            journal: self.clone(),
        })
    }

    async fn finish_run(&self, correlation_id: &str) {
        self.forget_run(correlation_id).await;
    }
}

struct JournaledSteps {
    correlation_id: String,
    journal: StepJournal,
}

#[async_trait]
impl StepRunner for JournaledSteps {
    async fn run(&self, name: &str, step: StepFn) -> Result<JsonValue, NodeError> {
        let key = (self.correlation_id.clone(), name.to_string());
        if let Some(done) = self.journal.entries.lock().await.get(&key).cloned() {
            debug!(step = name, "replaying checkpointed step");
            return Ok(done);
        }

        let policy = self.journal.policy;
        let mut attempt = 1;
        loop {
            match step().await {
                Ok(value) => {
                    self.journal.entries.lock().await.insert(key, value.clone());
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < policy.max_attempts.max(1) => {
                    attempt += 1;
                    let delay = policy.delay_before(attempt);
                    warn!(step = name, attempt, error = %e, ?delay, "retrying step");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Runs each step exactly once with no checkpointing.
///
/// Used for single-node test runs, which have no run to replay.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateSteps;

#[async_trait]
impl StepRunner for ImmediateSteps {
    async fn run(&self, _name: &str, step: StepFn) -> Result<JsonValue, NodeError> {
        step().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_step(calls: Arc<AtomicU32>, fail_first: u32, error: NodeError) -> StepFn {
        step_fn(move || {
            let calls = calls.clone();
            let error = error.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= fail_first {
                    Err(error)
                } else {
                    Ok(json!({"call": n}))
                }
            }
        })
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn completed_steps_are_not_repeated_on_replay() {
        let journal = StepJournal::new(quick_policy(1));
        let calls = Arc::new(AtomicU32::new(0));

        let first = journal
            .for_run("evt-1")
            .run("b:http", counting_step(calls.clone(), 0, NodeError::failed("x")))
            .await
            .expect("first run");
        let replay = journal
            .for_run("evt-1")
            .run("b:http", counting_step(calls.clone(), 0, NodeError::failed("x")))
            .await
            .expect("replay");

        assert_eq!(first, replay);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(journal.completed("evt-1", "b:http").await, Some(json!({"call": 1})));
    }

    #[tokio::test]
    async fn distinct_runs_do_not_share_checkpoints() {
        let journal = StepJournal::new(quick_policy(1));
        let calls = Arc::new(AtomicU32::new(0));

        for run in ["evt-1", "evt-2"] {
            journal
                .for_run(run)
                .run("b:http", counting_step(calls.clone(), 0, NodeError::failed("x")))
                .await
                .expect("run");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let journal = StepJournal::new(quick_policy(3));
        let calls = Arc::new(AtomicU32::new(0));

        let value = journal
            .for_run("evt")
            .run("s", counting_step(calls.clone(), 2, NodeError::transient("503")))
            .await
            .expect("third attempt succeeds");

        assert_eq!(value, json!({"call": 3}));
    }

    #[tokio::test]
    async fn exhausted_retries_return_the_error() {
        let journal = StepJournal::new(quick_policy(2));
        let calls = Arc::new(AtomicU32::new(0));

        let err = journal
            .for_run("evt")
            .run("s", counting_step(calls.clone(), 5, NodeError::transient("503")))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(journal.completed("evt", "s").await, None);
    }

    #[tokio::test]
    async fn non_retryable_failures_run_once() {
        let journal = StepJournal::new(quick_policy(5));
        let calls = Arc::new(AtomicU32::new(0));

        let err = journal
            .for_run("evt")
            .run("s", counting_step(calls.clone(), 5, NodeError::configuration("bad")))
            .await
            .unwrap_err();

        assert!(matches!(err, NodeError::Configuration { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generation_variant_delegates_to_run() {
        let journal = StepJournal::new(quick_policy(1));
        let calls = Arc::new(AtomicU32::new(0));
        let telemetry = GenerationTelemetry {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
        };

        journal
            .for_run("evt")
            .run_generation("m", telemetry, counting_step(calls.clone(), 0, NodeError::failed("x")))
            .await
            .expect("generation");

        assert!(journal.completed("evt", "m").await.is_some());
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn forget_run_clears_its_checkpoints() {
        let journal = StepJournal::new(quick_policy(1));
        let calls = Arc::new(AtomicU32::new(0));
        journal
            .for_run("evt")
            .run("s", counting_step(calls, 0, NodeError::failed("x")))
            .await
            .expect("run");

        journal.forget_run("evt").await;
        assert_eq!(journal.completed("evt", "s").await, None);
    }
}
