//! Priority Queue (`spec.md` §4.2)
//!
//! A bounded container of `TracerouteRequest`s ordered by
//! `(priority ascending, queued_at ascending)`, with duplicate
//! suppression per `node_id` and a configurable overflow policy.

use crate::clock::SharedClock;
use crate::config::QueueOverflowStrategy;
use crate::domain::{NodeId, Priority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// A queued traceroute request. See `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerouteRequest {
    /// Unique id for this request.
    pub request_id: String,
    /// Target node; also the queue's duplicate key.
    pub node_id: NodeId,
    /// Queue priority, 1 (highest) through 10 (lowest).
    pub priority: Priority,
    /// Free-form reason for logs/telemetry.
    pub reason: String,
    /// Timestamp used for FIFO tie-breaking.
    pub queued_at: DateTime<Utc>,
    /// Incremented each time this request is re-enqueued after a timeout.
    pub retry_count: u32,
}

/// Outcome of an `enqueue` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The request was inserted (possibly replacing a lower-priority
    /// duplicate, or evicting an entry under the overflow policy).
    Accepted,
    /// A duplicate already queued at an equal-or-higher priority; the
    /// new request was rejected.
    RejectedDuplicate,
    /// The queue was full and the overflow policy rejected the new
    /// request.
    RejectedFull,
}

/// Queue statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStatistics {
    /// Requests currently queued.
    pub size: usize,
    /// Requests accepted (inserted) over the queue's lifetime.
    pub total_enqueued: u64,
    /// Requests rejected because an equal-or-higher-priority duplicate
    /// was already queued.
    pub rejected_duplicates: u64,
    /// Requests dropped (or rejected) because the queue was full.
    pub dropped_for_overflow: u64,
    /// Requests removed via `remove` or consumed via `dequeue`.
    pub dequeued: u64,
}

struct Inner {
    entries: HashMap<NodeId, TracerouteRequest>,
    stats: QueueStatistics,
}

/// Bounded, duplicate-suppressing priority queue of traceroute requests.
#[derive(Debug)]
pub struct PriorityQueue {
    inner: Mutex<Inner>,
    max_size: usize,
    overflow_strategy: QueueOverflowStrategy,
    clock: SharedClock,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("size", &self.entries.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl PriorityQueue {
    /// Creates a new, empty queue.
    #[must_use]
    pub fn new(max_size: usize, overflow_strategy: QueueOverflowStrategy, clock: SharedClock) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                stats: QueueStatistics::default(),
            }),
            max_size,
            overflow_strategy,
            clock,
        }
    }

    /// Attempts to enqueue a traceroute request for `node_id`, per
    /// `spec.md` §4.2. `retry_count` carries forward the number of
    /// timeout-triggered retries already attempted for this node (zero
    /// for a fresh request); see `spec.md` §4.4.
    pub fn enqueue(
        &self,
        node_id: NodeId,
        priority: Priority,
        reason: impl Into<String>,
        request_id: Option<String>,
        retry_count: u32,
    ) -> EnqueueOutcome {
        let now = self.clock.now_wall();
        let mut inner = self.inner.lock().expect("priority queue poisoned");

        if let Some(existing) = inner.entries.get(&node_id) {
            if priority < existing.priority {
                let request_id = request_id.unwrap_or_else(|| existing.request_id.clone());
                let retry_count = existing.retry_count.max(retry_count);
                inner.entries.insert(
                    node_id.clone(),
                    TracerouteRequest {
                        request_id,
                        node_id,
                        priority,
                        reason: reason.into(),
                        queued_at: now,
                        retry_count,
                    },
                );
                inner.stats.total_enqueued += 1;
                return EnqueueOutcome::Accepted;
            }
            inner.stats.rejected_duplicates += 1;
            return EnqueueOutcome::RejectedDuplicate;
        }

        if inner.entries.len() >= self.max_size {
            match self.overflow_strategy {
                QueueOverflowStrategy::DropNew => {
                    inner.stats.dropped_for_overflow += 1;
                    return EnqueueOutcome::RejectedFull;
                }
                QueueOverflowStrategy::DropOldest => {
                    if let Some(oldest_key) = inner
                        .entries
                        .values()
                        .min_by_key(|r| r.queued_at)
                        .map(|r| r.node_id.clone())
                    {
                        inner.entries.remove(&oldest_key);
                        inner.stats.dropped_for_overflow += 1;
                    }
                }
                QueueOverflowStrategy::DropLowestPriority => {
                    let lowest = inner
                        .entries
                        .values()
                        .max_by_key(|r| r.priority)
                        .map(|r| (r.node_id.clone(), r.priority));
                    match lowest {
                        Some((key, lowest_priority)) if priority < lowest_priority => {
                            inner.entries.remove(&key);
                            inner.stats.dropped_for_overflow += 1;
                        }
                        _ => {
                            inner.stats.dropped_for_overflow += 1;
                            return EnqueueOutcome::RejectedFull;
                        }
                    }
                }
            }
        }

        let request_id = request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        inner.entries.insert(
            node_id.clone(),
            TracerouteRequest {
                request_id,
                node_id,
                priority,
                reason: reason.into(),
                queued_at: now,
                retry_count,
            },
        );
        inner.stats.total_enqueued += 1;
        debug!(size = inner.entries.len(), "request enqueued");
        EnqueueOutcome::Accepted
    }

    /// Removes and returns the head of the queue (smallest
    /// `(priority, queued_at)`), or `None` if empty.
    pub fn dequeue(&self) -> Option<TracerouteRequest> {
        let mut inner = self.inner.lock().expect("priority queue poisoned");
        let head_key = inner
            .entries
            .values()
            .min_by(|a, b| (a.priority, a.queued_at).cmp(&(b.priority, b.queued_at)))
            .map(|r| r.node_id.clone())?;
        let request = inner.entries.remove(&head_key);
        if request.is_some() {
            inner.stats.dequeued += 1;
        }
        request
    }

    /// Removes any entry for `node_id`. Idempotent.
    pub fn remove(&self, node_id: &NodeId) -> bool {
        let mut inner = self.inner.lock().expect("priority queue poisoned");
        let removed = inner.entries.remove(node_id).is_some();
        if removed {
            inner.stats.dequeued += 1;
        }
        removed
    }

    /// Whether an entry for `node_id` is currently queued.
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.inner
            .lock()
            .expect("priority queue poisoned")
            .entries
            .contains_key(node_id)
    }

    /// Current number of queued entries.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().expect("priority queue poisoned").entries.len()
    }

    /// Whether the queue is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.size() >= self.max_size
    }

    /// Whether the queue has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("priority queue poisoned");
        inner.entries.clear();
    }

    /// Current statistics snapshot.
    #[must_use]
    pub fn get_statistics(&self) -> QueueStatistics {
        let inner = self.inner.lock().expect("priority queue poisoned");
        QueueStatistics {
            size: inner.entries.len(),
            ..inner.stats
        }
    }
}
