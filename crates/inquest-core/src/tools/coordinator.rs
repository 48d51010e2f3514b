//! Tool dispatch with circuit breaking, deadlines, and audit records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::EngineError;
use crate::state::{ToolExecutionRecord, ToolStatus};

use super::backoff::{backoff_delay, RetryConfig};
use super::health::{CircuitState, ToolHealthRegistry};
use super::{Tool, ToolCategory};

/// Coordinator configuration. Defaults match the canonical engine settings.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Consecutive failures before the circuit opens (`K`).
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub call_timeout_ms: u64,
    /// Concurrent calls allowed per tool category.
    pub category_width: usize,
    pub retry: RetryConfig,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 30_000,
            call_timeout_ms: 10_000,
            category_width: 4,
            retry: RetryConfig::default(),
        }
    }
}

/// Per-call context supplied by the caller (usually an agent toolbox).
#[derive(Debug, Clone, Default)]
pub struct ToolCallContext {
    /// Domain agent on whose behalf the call runs.
    pub agent: Option<String>,
    /// Cumulative attempt number for this tool within one investigation.
    /// Attempt accounting stays investigation-local so concurrent
    /// investigations never leak into each other's audit trail.
    pub attempt: u32,
    /// Derived from the investigation's overall timeout.
    pub deadline: Option<Instant>,
}

/// Typed outcome of a coordinated tool call.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Ok(Value),
    /// Retryable failure; recorded, never aborts the investigation.
    SoftFailure(String),
    /// The breaker refused to dispatch. No external call was made.
    CircuitOpen,
}

impl ToolOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolOutcome::Ok(_))
    }
}

/// Wraps external tool calls with health tracking and bounded concurrency.
pub struct ToolCoordinator {
    tools: HashMap<String, Arc<dyn Tool>>,
    health: Arc<ToolHealthRegistry>,
    semaphores: HashMap<ToolCategory, Arc<Semaphore>>,
    config: ToolConfig,
}

impl ToolCoordinator {
    pub fn new(config: ToolConfig, health: Arc<ToolHealthRegistry>) -> Self {
        let semaphores = [
            ToolCategory::Lookup,
            ToolCategory::Enrichment,
            ToolCategory::Verification,
        ]
        .into_iter()
        .map(|cat| (cat, Arc::new(Semaphore::new(config.category_width.max(1)))))
        .collect();

        Self {
            tools: HashMap::new(),
            health,
            semaphores,
            config,
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn health(&self) -> &Arc<ToolHealthRegistry> {
        &self.health
    }

    /// Execute one tool call. Every outcome -- success, soft failure,
    /// timeout, circuit open -- comes back with an audit record; nothing is
    /// silently dropped.
    pub async fn execute(
        &self,
        tool_name: &str,
        params: Value,
        ctx: &ToolCallContext,
    ) -> (ToolOutcome, ToolExecutionRecord) {
        let start = Instant::now();
        let mut attempt = ctx.attempt.max(1);
        let mut retries_left = self.config.retry.max_retries;
        let mut retry_no = 0u32;

        let (outcome, error) = loop {
            // Circuit check happens before any permit is acquired, so an
            // open breaker never blocks calls to other tools.
            if let CircuitState::Open { remaining } = self.health.check(tool_name) {
                tracing::debug!(
                    tool = tool_name,
                    remaining_ms = remaining.as_millis() as u64,
                    "circuit open, failing fast"
                );
                break (
                    ToolOutcome::CircuitOpen,
                    Some(format!(
                        "circuit open, cooldown remaining {}ms",
                        remaining.as_millis()
                    )),
                );
            }

            let Some(tool) = self.tools.get(tool_name) else {
                break (
                    ToolOutcome::SoftFailure(format!("unknown tool '{tool_name}'")),
                    Some(format!("unknown tool '{tool_name}'")),
                );
            };

            let timeout = self.effective_timeout(ctx);
            if timeout.is_zero() {
                // The caller ran out of budget; the tool was never invoked,
                // so its health is untouched.
                break (
                    ToolOutcome::SoftFailure("deadline exceeded before dispatch".to_string()),
                    Some("deadline exceeded before dispatch".to_string()),
                );
            }

            let permit = match self.semaphore_for(tool.category()).acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    break (
                        ToolOutcome::SoftFailure("tool semaphore closed".to_string()),
                        Some("tool semaphore closed".to_string()),
                    );
                }
            };

            let result = tokio::time::timeout(timeout, tool.execute(params.clone())).await;
            drop(permit);

            let failure = match result {
                Ok(Ok(value)) => {
                    self.health.record_success(tool_name);
                    break (ToolOutcome::Ok(value), None);
                }
                Ok(Err(err)) => format!("{err:#}"),
                Err(_) => EngineError::Timeout {
                    operation: tool_name.to_string(),
                    elapsed_ms: timeout.as_millis() as u64,
                }
                .to_string(),
            };

            self.health.record_failure(tool_name);
            tracing::warn!(
                tool = tool_name,
                attempt,
                error = %failure,
                "tool call failed"
            );

            if retries_left == 0 {
                break (ToolOutcome::SoftFailure(failure.clone()), Some(failure));
            }
            retries_left -= 1;
            attempt += 1;
            tokio::time::sleep(backoff_delay(&self.config.retry, retry_no)).await;
            retry_no += 1;
        };

        let record = ToolExecutionRecord {
            tool_name: tool_name.to_string(),
            agent: ctx.agent.clone(),
            status: if outcome.is_ok() {
                ToolStatus::Completed
            } else {
                ToolStatus::Failed
            },
            attempt_count: attempt,
            latency_ms: start.elapsed().as_millis() as u64,
            error,
        };

        (outcome, record)
    }

    fn semaphore_for(&self, category: ToolCategory) -> &Arc<Semaphore> {
        // All categories are seeded in `new`.
        self.semaphores
            .get(&category)
            .unwrap_or_else(|| &self.semaphores[&ToolCategory::Enrichment])
    }

    fn effective_timeout(&self, ctx: &ToolCallContext) -> Duration {
        let configured = Duration::from_millis(self.config.call_timeout_ms);
        match ctx.deadline {
            Some(deadline) => configured.min(deadline.saturating_duration_since(Instant::now())),
            None => configured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysFails;

    #[async_trait]
    impl Tool for AlwaysFails {
        fn name(&self) -> &str {
            "geocode"
        }

        async fn execute(&self, _params: Value) -> anyhow::Result<Value> {
            anyhow::bail!("upstream 503")
        }
    }

    struct FailsThenSucceeds {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Tool for FailsThenSucceeds {
        fn name(&self) -> &str {
            "geocode"
        }

        async fn execute(&self, _params: Value) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("upstream 503");
            }
            Ok(json!({"lat": 1.0, "lon": 2.0}))
        }
    }

    struct Sleeper;

    #[async_trait]
    impl Tool for Sleeper {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, _params: Value) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }
    }

    fn coordinator(config: ToolConfig) -> ToolCoordinator {
        let health = Arc::new(ToolHealthRegistry::new(
            config.failure_threshold,
            Duration::from_millis(config.cooldown_ms),
        ));
        ToolCoordinator::new(config, health)
    }

    fn ctx(attempt: u32) -> ToolCallContext {
        ToolCallContext {
            agent: Some("location".to_string()),
            attempt,
            deadline: None,
        }
    }

    // Scenario: geocode fails 3 times with K=3; the 4th call returns
    // CircuitOpen without invoking the tool, and its record shows
    // status=failed, attempt_count=4.
    #[tokio::test]
    async fn fourth_call_after_three_failures_is_circuit_open() {
        let config = ToolConfig {
            failure_threshold: 3,
            cooldown_ms: 60_000,
            ..ToolConfig::default()
        };
        let mut coordinator = coordinator(config);
        coordinator.register(Arc::new(AlwaysFails));

        for attempt in 1..=3u32 {
            let (outcome, record) = coordinator
                .execute("geocode", json!({}), &ctx(attempt))
                .await;
            assert!(matches!(outcome, ToolOutcome::SoftFailure(_)));
            assert_eq!(record.status, ToolStatus::Failed);
            assert_eq!(record.attempt_count, attempt);
        }

        let (outcome, record) = coordinator.execute("geocode", json!({}), &ctx(4)).await;
        assert!(matches!(outcome, ToolOutcome::CircuitOpen));
        assert_eq!(record.status, ToolStatus::Failed);
        assert_eq!(record.attempt_count, 4);
        assert!(record.error.as_deref().unwrap_or("").contains("circuit open"));
    }

    #[tokio::test]
    async fn success_after_cooldown_resets_failures() {
        let config = ToolConfig {
            failure_threshold: 2,
            cooldown_ms: 0, // probe allowed immediately
            ..ToolConfig::default()
        };
        let mut coordinator = coordinator(config);
        coordinator.register(Arc::new(FailsThenSucceeds {
            failures: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        }));

        for attempt in 1..=2u32 {
            let (outcome, _) = coordinator
                .execute("geocode", json!({}), &ctx(attempt))
                .await;
            assert!(matches!(outcome, ToolOutcome::SoftFailure(_)));
        }

        let (outcome, record) = coordinator.execute("geocode", json!({}), &ctx(3)).await;
        assert!(outcome.is_ok());
        assert_eq!(record.status, ToolStatus::Completed);

        let snapshot = coordinator.health().snapshot("geocode");
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.state, crate::tools::ToolHealth::Healthy);
    }

    #[tokio::test]
    async fn timeout_is_a_recorded_soft_failure() {
        let config = ToolConfig {
            call_timeout_ms: 20,
            ..ToolConfig::default()
        };
        let mut coordinator = coordinator(config);
        coordinator.register(Arc::new(Sleeper));

        let (outcome, record) = coordinator.execute("slow", json!({}), &ctx(1)).await;

        match outcome {
            ToolOutcome::SoftFailure(reason) => assert!(reason.contains("exceeded its deadline")),
            other => panic!("expected SoftFailure, got {other:?}"),
        }
        assert_eq!(record.status, ToolStatus::Failed);
        assert!(record
            .error
            .as_deref()
            .unwrap_or("")
            .contains("exceeded its deadline"));
    }

    #[tokio::test]
    async fn expired_deadline_is_not_a_tool_failure() {
        let config = ToolConfig {
            failure_threshold: 2,
            ..ToolConfig::default()
        };
        let coordinator = {
            let mut c = coordinator(config);
            c.register(Arc::new(FailsThenSucceeds {
                failures: AtomicU32::new(0),
                calls: AtomicU32::new(0),
            }));
            c
        };
        let expired = ToolCallContext {
            agent: Some("location".to_string()),
            attempt: 1,
            deadline: Some(Instant::now()),
        };

        // Enough out-of-budget calls to trip the breaker, were they counted.
        for _ in 0..2 {
            let (outcome, record) = coordinator.execute("geocode", json!({}), &expired).await;
            assert!(matches!(outcome, ToolOutcome::SoftFailure(_)));
            assert_eq!(record.status, ToolStatus::Failed);
        }

        // The tool was never invoked and its health never touched; a caller
        // with budget left goes straight through.
        let snapshot = coordinator.health().snapshot("geocode");
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.state, crate::tools::ToolHealth::Healthy);

        let (outcome, _) = coordinator.execute("geocode", json!({}), &ctx(1)).await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn unknown_tool_is_soft_failure_without_health_impact() {
        let coordinator = coordinator(ToolConfig::default());

        let (outcome, record) = coordinator.execute("missing", json!({}), &ctx(1)).await;

        assert!(matches!(outcome, ToolOutcome::SoftFailure(_)));
        assert_eq!(record.status, ToolStatus::Failed);
        assert_eq!(
            coordinator.health().snapshot("missing").consecutive_failures,
            0
        );
    }

    #[tokio::test]
    async fn internal_retries_advance_the_attempt_counter() {
        let config = ToolConfig {
            retry: RetryConfig {
                max_retries: 2,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
            ..ToolConfig::default()
        };
        let mut coordinator = coordinator(config);
        coordinator.register(Arc::new(FailsThenSucceeds {
            failures: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        }));

        let (outcome, record) = coordinator.execute("geocode", json!({}), &ctx(1)).await;

        assert!(outcome.is_ok());
        assert_eq!(record.attempt_count, 3);
        assert_eq!(record.status, ToolStatus::Completed);
    }
}
