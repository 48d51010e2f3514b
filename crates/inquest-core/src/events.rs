//! Incremental event feed with cursor and version-token polling.
//!
//! The engine publishes lifecycle events; consumers poll with the cursor and
//! version token from their previous poll. An unchanged token short-circuits
//! to a not-modified response so idle pollers stay cheap. Cursors are opaque
//! to consumers but totally ordered, so resuming from one never skips or
//! duplicates events.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Suggested delay before the consumer's next poll.
const POLL_INTERVAL_MS: u64 = 1_000;

/// What kind of lifecycle event occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InvestigationStarted,
    PhaseChanged,
    DomainCompleted,
    DomainFailed,
    SafetyFlagged,
    InvestigationFinished,
}

/// One published event. The cursor is `<unix-ms>_<seq>` with a fixed-width
/// sequence so lexicographic order matches publication order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub cursor: String,
    pub investigation_id: String,
    pub kind: EventKind,
    pub payload: Value,
    pub at: DateTime<Utc>,
}

/// Result of one poll.
#[derive(Debug, Clone)]
pub enum Poll {
    /// Nothing new since the supplied version token.
    NotModified { poll_interval_ms: u64 },
    Events {
        events: Vec<EventRecord>,
        /// Pass this back as `after` on the next poll.
        next_cursor: Option<String>,
        /// Pass this back as `if_none_match` on the next poll.
        version_token: String,
        poll_interval_ms: u64,
    },
}

#[derive(Default)]
struct FeedInner {
    events: Vec<EventRecord>,
    seq: u32,
    /// Highest timestamp handed out, for monotonic cursors under clock skew.
    last_ms: u64,
}

/// Append-only in-process event feed.
#[derive(Default)]
pub struct EventFeed {
    inner: RwLock<FeedInner>,
}

impl EventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish one event and return its cursor.
    pub fn publish(&self, investigation_id: &str, kind: EventKind, payload: Value) -> String {
        let mut inner = self.inner.write();
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        inner.last_ms = inner.last_ms.max(now_ms);
        inner.seq = (inner.seq + 1) % 1_000_000;
        let cursor = format!("{}_{:06}", inner.last_ms, inner.seq);

        tracing::debug!(investigation_id, ?kind, cursor = %cursor, "event published");
        inner.events.push(EventRecord {
            cursor: cursor.clone(),
            investigation_id: investigation_id.to_string(),
            kind,
            payload,
            at: Utc::now(),
        });
        cursor
    }

    /// Poll for events after a cursor. With a matching `if_none_match` token
    /// the feed answers not-modified without copying any events.
    pub fn poll(&self, after: Option<&str>, if_none_match: Option<&str>) -> Poll {
        let inner = self.inner.read();
        let token = version_token(inner.events.last().map(|e| e.cursor.as_str()));

        if if_none_match == Some(token.as_str()) {
            return Poll::NotModified {
                poll_interval_ms: POLL_INTERVAL_MS,
            };
        }

        let events: Vec<EventRecord> = match after {
            Some(after) => inner
                .events
                .iter()
                .filter(|e| e.cursor.as_str() > after)
                .cloned()
                .collect(),
            None => inner.events.clone(),
        };

        let next_cursor = events
            .last()
            .map(|e| e.cursor.clone())
            .or_else(|| after.map(str::to_string));
        Poll::Events {
            events,
            next_cursor,
            version_token: token,
            poll_interval_ms: POLL_INTERVAL_MS,
        }
    }
}

/// Opaque change-detection token over the feed's tail cursor.
fn version_token(tail_cursor: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tail_cursor.unwrap_or("empty").as_bytes());
    let digest = hasher.finalize();
    let mut token = String::with_capacity(16);
    for byte in &digest[..8] {
        // Truncated hex digest; collision odds are irrelevant for change
        // detection on a single feed.
        token.push_str(&format!("{byte:02x}"));
    }
    token
}

/// Split a cursor into its timestamp and sequence parts.
pub fn parse_cursor(cursor: &str) -> Option<(u64, u32)> {
    let (ms, seq) = cursor.split_once('_')?;
    Some((ms.parse().ok()?, seq.parse().ok()?))
}
