//! Per-tool health tracking and circuit breaking.
//!
//! The registry is the only state shared across investigations. It is owned
//! by whoever composes the engine(s) and passed in explicitly, so isolated
//! engine instances can run side by side in tests. Locking is per tool, not
//! global.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Health state of one tool backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolHealth {
    Healthy,
    /// Some consecutive failures, below the breaker threshold.
    Degraded,
    /// Breaker open; calls fail fast until the cooldown elapses.
    Unhealthy,
}

#[derive(Debug)]
struct ToolHealthRecord {
    state: ToolHealth,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

impl ToolHealthRecord {
    fn new() -> Self {
        Self {
            state: ToolHealth::Healthy,
            consecutive_failures: 0,
            cooldown_until: None,
        }
    }
}

/// Read-only copy of a tool's health record.
#[derive(Debug, Clone)]
pub struct ToolHealthSnapshot {
    pub tool_name: String,
    pub state: ToolHealth,
    pub consecutive_failures: u32,
    pub cooldown_remaining: Option<Duration>,
}

/// Whether a call may be dispatched right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Fail fast; do not invoke the underlying tool.
    Open { remaining: Duration },
}

/// Registry of per-tool health records guarded by fine-grained locks.
pub struct ToolHealthRegistry {
    records: DashMap<String, Arc<Mutex<ToolHealthRecord>>>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl ToolHealthRegistry {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            records: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    fn record_for(&self, tool_name: &str) -> Arc<Mutex<ToolHealthRecord>> {
        self.records
            .entry(tool_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ToolHealthRecord::new())))
            .clone()
    }

    /// Check the breaker before dispatching. An elapsed cooldown lets a
    /// single probe call through while the state stays unhealthy until a
    /// success resets it.
    pub fn check(&self, tool_name: &str) -> CircuitState {
        let record = self.record_for(tool_name);
        let guard = record.lock();
        if guard.state == ToolHealth::Unhealthy {
            if let Some(until) = guard.cooldown_until {
                let now = Instant::now();
                if now < until {
                    return CircuitState::Open {
                        remaining: until - now,
                    };
                }
            }
        }
        CircuitState::Closed
    }

    /// A success closes the breaker and clears the failure streak.
    pub fn record_success(&self, tool_name: &str) {
        let record = self.record_for(tool_name);
        let mut guard = record.lock();
        guard.consecutive_failures = 0;
        guard.cooldown_until = None;
        if guard.state != ToolHealth::Healthy {
            tracing::info!(tool = tool_name, "tool recovered, circuit closed");
        }
        guard.state = ToolHealth::Healthy;
    }

    /// Record a failure; returns the health state after the update.
    pub fn record_failure(&self, tool_name: &str) -> ToolHealth {
        let record = self.record_for(tool_name);
        let mut guard = record.lock();
        guard.consecutive_failures += 1;
        if guard.consecutive_failures >= self.failure_threshold {
            guard.state = ToolHealth::Unhealthy;
            guard.cooldown_until = Some(Instant::now() + self.cooldown);
            tracing::warn!(
                tool = tool_name,
                consecutive_failures = guard.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "circuit opened"
            );
        } else {
            guard.state = ToolHealth::Degraded;
        }
        guard.state
    }

    pub fn snapshot(&self, tool_name: &str) -> ToolHealthSnapshot {
        let record = self.record_for(tool_name);
        let guard = record.lock();
        let now = Instant::now();
        ToolHealthSnapshot {
            tool_name: tool_name.to_string(),
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            cooldown_remaining: guard
                .cooldown_until
                .and_then(|until| until.checked_duration_since(now)),
        }
    }
}
