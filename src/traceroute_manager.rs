//! Traceroute Manager (`spec.md` §4.4)
//!
//! Builds outbound probe packets, tracks request/response correlations,
//! and enforces per-probe timeouts and retries. The manager never sends
//! anything itself: `send` hands back the `request_id` and the orchestrator
//! retrieves the built packet via `pending_message` and forwards it to the
//! message router (`spec.md` §6).

use crate::clock::SharedClock;
use crate::config::{MaxHops, MaxRetries, RetryBackoffMultiplier, TimeoutSeconds};
use crate::domain::{NodeId, Priority, RequestId};
use crate::message::Packet;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// A single in-flight probe correlation.
#[derive(Debug, Clone)]
pub struct PendingTraceroute {
    /// The request id carried in the probe's metadata.
    pub request_id: RequestId,
    /// The node the probe was sent to.
    pub node_id: NodeId,
    /// Priority the original request was enqueued with.
    pub priority: Priority,
    /// When the probe was sent.
    pub sent_at: DateTime<Utc>,
    /// When this correlation expires if no response arrives.
    pub timeout_at: DateTime<Utc>,
    /// Retries already attempted.
    pub retry_count: u32,
    /// Retries permitted before the correlation is dropped.
    pub max_retries: u32,
}

/// The outcome of successfully matching a response to a pending probe.
#[derive(Debug, Clone)]
pub struct TracerouteOutcome {
    /// The correlation that was matched and removed.
    pub pending: PendingTraceroute,
    /// Round-trip time, measured against the manager's clock.
    pub round_trip: chrono::Duration,
}

struct Entry {
    pending: PendingTraceroute,
    message: Packet,
}

/// Tracks outbound probes and their correlations.
#[derive(Debug)]
pub struct TracerouteManager {
    pending: Mutex<HashMap<RequestId, Entry>>,
    clock: SharedClock,
    max_hops: MaxHops,
    timeout_seconds: TimeoutSeconds,
    max_retries: MaxRetries,
    retry_backoff_multiplier: RetryBackoffMultiplier,
}

impl TracerouteManager {
    /// Creates a new manager using the given probe parameters.
    #[must_use]
    pub fn new(
        clock: SharedClock,
        max_hops: MaxHops,
        timeout_seconds: TimeoutSeconds,
        max_retries: MaxRetries,
        retry_backoff_multiplier: RetryBackoffMultiplier,
    ) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            clock,
            max_hops,
            timeout_seconds,
            max_retries,
            retry_backoff_multiplier,
        }
    }

    /// Builds a probe for `node_id`, records the correlation, and returns
    /// its `request_id`. The built packet is retrievable via
    /// [`Self::pending_message`] until the correlation is removed.
    /// `retry_count` is the number of prior timeout-triggered retries for
    /// this node (zero for a fresh request); it seeds the recorded
    /// correlation so `can_retry` enforces `spec.md` §4.4's retry budget.
    pub fn send(&self, node_id: NodeId, priority: Priority, retry_count: u32) -> RequestId {
        let request_id = RequestId::generate();
        let now = self.clock.now_wall();
        let timeout: f64 = self.timeout_seconds.into();
        let timeout_at = now + chrono::Duration::milliseconds((timeout * 1000.0) as i64);

        let message = Packet::traceroute_probe(
            uuid::Uuid::new_v4().to_string(),
            node_id.as_ref(),
            self.max_hops.into(),
            request_id.as_ref(),
        );

        let pending = PendingTraceroute {
            request_id: request_id.clone(),
            node_id,
            priority,
            sent_at: now,
            timeout_at,
            retry_count,
            max_retries: self.max_retries.into(),
        };

        self.pending
            .lock()
            .expect("traceroute manager poisoned")
            .insert(request_id.clone(), Entry { pending, message });

        request_id
    }

    /// The probe packet built for `request_id`, if its correlation is
    /// still pending. The orchestrator calls this once, right after
    /// `send`, to obtain the frame to forward.
    #[must_use]
    pub fn pending_message(&self, request_id: &RequestId) -> Option<Packet> {
        self.pending
            .lock()
            .expect("traceroute manager poisoned")
            .get(request_id)
            .map(|e| e.message.clone())
    }

    /// A read-only snapshot of a pending correlation, without removing it.
    #[must_use]
    pub fn peek(&self, request_id: &RequestId) -> Option<PendingTraceroute> {
        self.pending
            .lock()
            .expect("traceroute manager poisoned")
            .get(request_id)
            .map(|e| e.pending.clone())
    }

    /// Matches an inbound response against a pending correlation by its
    /// `request_id` metadata. Unknown or missing request ids are not
    /// errors; they return `None` and the orchestrator forwards the
    /// message regardless (`spec.md` §4.4).
    pub fn handle_response(&self, response: &Packet) -> Option<TracerouteOutcome> {
        let request_id = response.request_id()?;
        let request_id = RequestId::try_new(request_id.to_string()).ok()?;

        let entry = self
            .pending
            .lock()
            .expect("traceroute manager poisoned")
            .remove(&request_id)?;

        let round_trip = self.clock.now_wall() - entry.pending.sent_at;
        debug!(
            request_id = %entry.pending.request_id,
            node_id = %entry.pending.node_id,
            round_trip_ms = round_trip.num_milliseconds(),
            "traceroute response matched"
        );

        Some(TracerouteOutcome { pending: entry.pending, round_trip })
    }

    /// Returns every correlation whose `timeout_at` has passed, removing
    /// them from the pending set (`spec.md` §4.4).
    pub fn check_timeouts(&self) -> Vec<PendingTraceroute> {
        let now = self.clock.now_wall();
        let mut pending = self.pending.lock().expect("traceroute manager poisoned");
        let expired: Vec<RequestId> = pending
            .iter()
            .filter(|(_, e)| e.pending.timeout_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| pending.remove(&id).map(|e| e.pending))
            .collect()
    }

    /// Computes the retry delay for a timed-out correlation whose
    /// `retry_count` is about to become `pending.retry_count + 1`:
    /// `base_timeout × retry_backoff_multiplier^retry_count` (`spec.md`
    /// §4.4). Does not itself sleep; callers use this to schedule the
    /// re-enqueue or delay a subsequent send.
    #[must_use]
    pub fn retry_delay(&self, pending: &PendingTraceroute) -> chrono::Duration {
        let base: f64 = self.timeout_seconds.into();
        let multiplier: f64 = self.retry_backoff_multiplier.into();
        let secs = base * multiplier.powi(pending.retry_count as i32);
        chrono::Duration::milliseconds((secs * 1000.0) as i64)
    }

    /// Whether `pending` has retries remaining.
    #[must_use]
    pub fn can_retry(&self, pending: &PendingTraceroute) -> bool {
        pending.retry_count < pending.max_retries
    }

    /// Returns the count of correlations currently awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("traceroute manager poisoned").len()
    }

    /// Cancels a pending correlation without treating it as a timeout:
    /// used when the built probe never actually reached the router
    /// (`spec.md` §7 `SendFailure`: "the correlation was never created").
    pub fn cancel(&self, request_id: &RequestId) {
        self.pending.lock().expect("traceroute manager poisoned").remove(request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_clock;
    use std::time::Duration as StdDuration;

    fn manager() -> TracerouteManager {
        TracerouteManager::new(
            test_clock(chrono::Utc::now()),
            MaxHops::try_new(7).unwrap(),
            TimeoutSeconds::try_new(60.0).unwrap(),
            MaxRetries::try_new(3).unwrap(),
            RetryBackoffMultiplier::try_new(2.0).unwrap(),
        )
    }

    #[test]
    fn send_records_pending_and_builds_a_matching_probe() {
        let m = manager();
        let node = NodeId::try_new("!abc".to_string()).unwrap();
        let request_id = m.send(node.clone(), Priority::new_indirect_node(), 0);

        let message = m.pending_message(&request_id).expect("message recorded");
        assert_eq!(message.request_id(), Some(request_id.as_ref()));
        assert_eq!(message.recipient_id.as_deref(), Some("!abc"));
        assert_eq!(message.hop_limit, 7);

        let pending = m.peek(&request_id).expect("pending recorded");
        assert_eq!(pending.node_id, node);
        assert_eq!(pending.retry_count, 0);
        assert_eq!(m.pending_count(), 1);
    }

    #[test]
    fn send_seeds_retry_count_so_budget_is_eventually_exhausted() {
        let m = manager();
        let node = NodeId::try_new("!abc".to_string()).unwrap();
        let request_id = m.send(node, Priority::critical(), 3);

        let pending = m.peek(&request_id).expect("pending recorded");
        assert_eq!(pending.retry_count, 3);
        assert_eq!(pending.max_retries, 3);
        assert!(!m.can_retry(&pending));
    }

    #[test]
    fn handle_response_matches_exactly_once() {
        let m = manager();
        let node = NodeId::try_new("!abc".to_string()).unwrap();
        let request_id = m.send(node, Priority::critical(), 0);

        let mut response = Packet::traceroute_probe(
            "resp-1".to_string(),
            "!gateway",
            7,
            request_id.as_ref(),
        );
        response
            .metadata
            .insert("route".to_string(), serde_json::json!(["!gw", "!abc"]));

        let outcome = m.handle_response(&response).expect("should match");
        assert_eq!(outcome.pending.request_id, request_id);
        assert_eq!(m.pending_count(), 0);

        // Second delivery of the same response is a no-op, not a re-match.
        assert!(m.handle_response(&response).is_none());
    }

    #[test]
    fn unknown_request_id_is_not_an_error() {
        let m = manager();
        let mut response = Packet::traceroute_probe(
            "resp-1".to_string(),
            "!gateway",
            7,
            "some-other-nodes-request",
        );
        response
            .metadata
            .insert("route".to_string(), serde_json::json!(["!gw"]));
        assert!(m.handle_response(&response).is_none());
    }

    #[test]
    fn check_timeouts_sweeps_only_expired_correlations() {
        let clock = test_clock(chrono::Utc::now());
        let m = TracerouteManager::new(
            clock.clone(),
            MaxHops::try_new(7).unwrap(),
            TimeoutSeconds::try_new(30.0).unwrap(),
            MaxRetries::try_new(3).unwrap(),
            RetryBackoffMultiplier::try_new(2.0).unwrap(),
        );
        let early = m.send(NodeId::try_new("!early".to_string()).unwrap(), Priority::critical(), 0);
        clock.advance(StdDuration::from_secs(40));
        let late = m.send(NodeId::try_new("!late".to_string()).unwrap(), Priority::critical(), 0);

        let expired = m.check_timeouts();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].request_id, early);
        assert_eq!(m.pending_count(), 1);
        assert!(m.peek(&late).is_some());
    }

    #[test]
    fn retry_delay_grows_geometrically_with_retry_count() {
        let m = manager();
        let mut pending = PendingTraceroute {
            request_id: RequestId::generate(),
            node_id: NodeId::try_new("!abc".to_string()).unwrap(),
            priority: Priority::critical(),
            sent_at: Utc::now(),
            timeout_at: Utc::now(),
            retry_count: 0,
            max_retries: 3,
        };
        let d0 = m.retry_delay(&pending);
        pending.retry_count = 1;
        let d1 = m.retry_delay(&pending);
        pending.retry_count = 2;
        let d2 = m.retry_delay(&pending);

        assert_eq!(d0.num_milliseconds(), 60_000);
        assert_eq!(d1.num_milliseconds(), 120_000);
        assert_eq!(d2.num_milliseconds(), 240_000);
    }

    #[test]
    fn can_retry_respects_max_retries() {
        let pending = PendingTraceroute {
            request_id: RequestId::generate(),
            node_id: NodeId::try_new("!abc".to_string()).unwrap(),
            priority: Priority::critical(),
            sent_at: Utc::now(),
            timeout_at: Utc::now(),
            retry_count: 3,
            max_retries: 3,
        };
        let m = manager();
        assert!(!m.can_retry(&pending));
    }
}
