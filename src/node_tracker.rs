//! Node State Tracker (`spec.md` §4.1)
//!
//! Maintains per-node memory of hop class, signal, timing, trace
//! history, and filter eligibility, and answers the three questions the
//! orchestrator needs: has this node's classification changed, should it
//! be traced given current filters, and which nodes are due a recheck.

use crate::clock::SharedClock;
use crate::config::MapperConfig;
use crate::domain::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, warn};

/// State of a single mesh node. See `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    /// The node's identifier (redundant with the tracker's map key, kept
    /// for serialized snapshots).
    pub node_id: NodeId,
    /// Whether the node is directly heard (hop-count ≤ 1).
    pub is_direct: bool,
    /// Wall-clock time of the most recent ingress observation.
    pub last_seen: DateTime<Utc>,
    /// Wall-clock time of the most recent trace outcome.
    pub last_traced: Option<DateTime<Utc>>,
    /// Scheduled wall-clock time at which a periodic recheck becomes due.
    pub next_recheck: Option<DateTime<Utc>>,
    /// Whether the most recent trace succeeded.
    pub last_trace_success: bool,
    /// Monotonic count of trace attempts resolved (success or failure).
    pub trace_count: u64,
    /// Consecutive-failure counter, reset to zero on success.
    pub failure_count: u64,
    /// Last-reported signal-to-noise ratio.
    pub snr: Option<f64>,
    /// Last-reported received signal strength.
    pub rssi: Option<i32>,
    /// Advertised node role, if any.
    pub role: Option<String>,
    /// Transient flag set when the tracker is told the node went
    /// offline; cleared on the next ingress observation.
    pub was_offline: bool,
}

impl NodeState {
    fn new(node_id: NodeId, is_direct: bool, now: DateTime<Utc>) -> Self {
        Self {
            node_id,
            is_direct,
            last_seen: now,
            last_traced: None,
            next_recheck: None,
            last_trace_success: false,
            trace_count: 0,
            failure_count: 0,
            snr: None,
            rssi: None,
            role: None,
            was_offline: false,
        }
    }
}

/// A single ingress observation passed to `NodeTracker::update`.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    /// Explicit direct flag from the caller, if the radio layer knows it
    /// outright. Can only promote a node to direct, never demote it
    /// below the hop-count inference (`spec.md` §4.1).
    pub explicit_is_direct: Option<bool>,
    /// Hop count to reach the node, if known.
    pub hop_count: Option<u8>,
    pub snr: Option<f64>,
    pub rssi: Option<i32>,
    pub role: Option<String>,
}

/// Outcome of a single `update` call, giving the orchestrator everything
/// it needs to apply the ingress-handler side effects in `spec.md` §4.7.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// Whether this node had never been observed before.
    pub is_new: bool,
    /// The node's `is_direct` value before this update, if it existed.
    pub prior_is_direct: Option<bool>,
    /// The node's `is_direct` value after this update.
    pub new_is_direct: bool,
    /// Whether `was_offline` was set immediately before this update.
    pub was_offline_before: bool,
    /// The node's `trace_count` before this update.
    pub prior_trace_count: u64,
}

impl UpdateOutcome {
    /// A direct transition: node existed, was indirect, and is now direct.
    #[must_use]
    pub fn is_direct_transition(&self) -> bool {
        self.prior_is_direct == Some(false) && self.new_is_direct
    }

    /// A newly-indirect node: either never seen before, or seen but
    /// never traced and not previously known indirect.
    #[must_use]
    pub fn is_newly_indirect(&self) -> bool {
        if self.new_is_direct {
            return false;
        }
        self.is_new || (self.prior_trace_count == 0 && self.prior_is_direct != Some(false))
    }
}

struct Filters {
    blacklist: HashSet<String>,
    whitelist: HashSet<String>,
    exclude_roles: HashSet<String>,
    min_snr_threshold: Option<f64>,
    skip_direct_nodes: bool,
    recheck_enabled: bool,
    recheck_interval_hours: f64,
}

impl Filters {
    fn from_config(config: &MapperConfig) -> Self {
        Self {
            blacklist: config.blacklist.iter().cloned().collect(),
            whitelist: config.whitelist.iter().cloned().collect(),
            exclude_roles: config.exclude_roles.iter().cloned().collect(),
            min_snr_threshold: config.min_snr_threshold.map(Into::into),
            skip_direct_nodes: config.skip_direct_nodes,
            recheck_enabled: config.recheck_enabled,
            recheck_interval_hours: config.recheck_interval_hours.into(),
        }
    }
}

/// Tracks the state of every known mesh node.
#[derive(Debug)]
pub struct NodeTracker {
    nodes: Mutex<HashMap<NodeId, NodeState>>,
    filters: Filters,
    clock: SharedClock,
}

impl std::fmt::Debug for Filters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filters").finish_non_exhaustive()
    }
}

impl NodeTracker {
    /// Creates a new, empty tracker from the given configuration.
    #[must_use]
    pub fn new(config: &MapperConfig, clock: SharedClock) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            filters: Filters::from_config(config),
            clock,
        }
    }

    /// Applies an ingress observation, per `spec.md` §4.1's update
    /// operation, returning the information the orchestrator needs to
    /// decide side effects.
    pub fn update(&self, node_id: &NodeId, observation: &Observation) -> UpdateOutcome {
        let now = self.clock.now_wall();
        let mut nodes = self.nodes.lock().expect("node tracker poisoned");

        let inferred_direct = observation.hop_count.is_some_and(|h| h <= 1);
        let new_is_direct = observation.explicit_is_direct.unwrap_or(false) || inferred_direct;

        if let Some(existing) = nodes.get_mut(node_id) {
            let prior_is_direct = existing.is_direct;
            let was_offline_before = existing.was_offline;
            let prior_trace_count = existing.trace_count;

            existing.was_offline = false;
            // Per spec.md §4.1: recomputed fresh from this observation alone
            // (explicit_is_direct OR hop_count <= 1) -- not a ratchet over
            // the prior value. "Overrides upward not downward" describes the
            // explicit flag's relationship to hop-count inference within the
            // same observation, not persistence across observations.
            existing.is_direct = new_is_direct;
            existing.last_seen = now;
            if observation.snr.is_some() {
                existing.snr = observation.snr;
            }
            if observation.rssi.is_some() {
                existing.rssi = observation.rssi;
            }
            if observation.role.is_some() {
                existing.role = observation.role.clone();
            }

            if !prior_is_direct && existing.is_direct {
                debug!(node_id = %node_id, "node transitioned from indirect to direct");
            }
            if was_offline_before {
                debug!(node_id = %node_id, "node back online");
            }

            UpdateOutcome {
                is_new: false,
                prior_is_direct: Some(prior_is_direct),
                new_is_direct: existing.is_direct,
                was_offline_before,
                prior_trace_count,
            }
        } else {
            let state = NodeState::new(node_id.clone(), new_is_direct, now);
            let mut state = state;
            state.snr = observation.snr;
            state.rssi = observation.rssi;
            state.role = observation.role.clone();
            debug!(node_id = %node_id, is_direct = new_is_direct, "new node discovered");
            nodes.insert(node_id.clone(), state);

            UpdateOutcome {
                is_new: true,
                prior_is_direct: None,
                new_is_direct,
                was_offline_before: false,
                prior_trace_count: 0,
            }
        }
    }

    /// Whether `node_id` is known and currently classified direct.
    #[must_use]
    pub fn is_direct(&self, node_id: &NodeId) -> Option<bool> {
        self.nodes
            .lock()
            .expect("node tracker poisoned")
            .get(node_id)
            .map(|n| n.is_direct)
    }

    /// Whether `node_id` is known and currently classified indirect.
    #[must_use]
    pub fn is_indirect(&self, node_id: &NodeId) -> Option<bool> {
        self.is_direct(node_id).map(|direct| !direct)
    }

    /// Evaluates trace eligibility per `spec.md` §4.1, short-circuiting
    /// on the first rejection.
    #[must_use]
    pub fn should_trace(&self, node_id: &NodeId) -> bool {
        let nodes = self.nodes.lock().expect("node tracker poisoned");
        let Some(node) = nodes.get(node_id) else {
            return false;
        };

        if self.filters.skip_direct_nodes && node.is_direct {
            return false;
        }
        if !self.filters.whitelist.is_empty() && !self.filters.whitelist.contains(node_id.as_ref())
        {
            return false;
        }
        if self.filters.blacklist.contains(node_id.as_ref()) {
            return false;
        }
        if let Some(role) = &node.role {
            if self.filters.exclude_roles.contains(role) {
                return false;
            }
        }
        if let Some(threshold) = self.filters.min_snr_threshold {
            match node.snr {
                Some(snr) if snr >= threshold => {}
                _ => return false,
            }
        }
        true
    }

    /// Records a trace outcome per `spec.md` §4.1's `mark_traced`.
    /// Returns `false` (logging a warning) if the node is unknown.
    pub fn mark_traced(
        &self,
        node_id: &NodeId,
        success: bool,
        next_recheck: Option<DateTime<Utc>>,
    ) -> bool {
        let now = self.clock.now_wall();
        let mut nodes = self.nodes.lock().expect("node tracker poisoned");
        let Some(node) = nodes.get_mut(node_id) else {
            warn!(node_id = %node_id, "mark_traced called for unknown node");
            return false;
        };

        node.last_traced = Some(now);
        node.trace_count += 1;
        node.last_trace_success = success;

        if success {
            node.failure_count = 0;
            node.next_recheck = next_recheck.or_else(|| {
                if self.filters.recheck_enabled && self.filters.recheck_interval_hours > 0.0 {
                    Some(now + chrono::Duration::milliseconds(
                        (self.filters.recheck_interval_hours * 3_600_000.0) as i64,
                    ))
                } else {
                    None
                }
            });
        } else {
            node.failure_count += 1;
        }
        true
    }

    /// Marks a node explicitly offline. Returns `false` (logging a
    /// warning) if the node is unknown.
    pub fn mark_offline(&self, node_id: &NodeId) -> bool {
        let mut nodes = self.nodes.lock().expect("node tracker poisoned");
        let Some(node) = nodes.get_mut(node_id) else {
            warn!(node_id = %node_id, "mark_offline called for unknown node");
            return false;
        };
        node.was_offline = true;
        true
    }

    /// Every node that passes `should_trace` and is either never traced
    /// or has a due recheck.
    #[must_use]
    pub fn nodes_needing_trace(&self) -> Vec<NodeId> {
        let now = self.clock.now_wall();
        let due: Vec<NodeId> = {
            let nodes = self.nodes.lock().expect("node tracker poisoned");
            nodes
                .values()
                .filter(|n| {
                    let due = n.last_traced.is_none() || n.next_recheck.is_some_and(|t| t <= now);
                    due
                })
                .map(|n| n.node_id.clone())
                .collect()
        };
        due.into_iter().filter(|id| self.should_trace(id)).collect()
    }

    /// Every node whose `was_offline` flag is currently set.
    #[must_use]
    pub fn nodes_back_online(&self) -> Vec<NodeId> {
        self.nodes
            .lock()
            .expect("node tracker poisoned")
            .values()
            .filter(|n| n.was_offline)
            .map(|n| n.node_id.clone())
            .collect()
    }

    /// Returns a clone of the full node-id → state map, for
    /// persistence snapshots.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<NodeId, NodeState> {
        self.nodes.lock().expect("node tracker poisoned").clone()
    }

    /// Replaces the tracker's contents with a loaded snapshot (used at
    /// startup when resuming from persisted state).
    pub fn restore(&self, loaded: HashMap<NodeId, NodeState>) {
        *self.nodes.lock().expect("node tracker poisoned") = loaded;
    }

    /// Whether any node is currently known at all.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.lock().expect("node tracker poisoned").len()
    }

    /// Whether the tracker has no known nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of nodes currently classified direct / indirect.
    #[must_use]
    pub fn direct_indirect_counts(&self) -> (usize, usize) {
        let nodes = self.nodes.lock().expect("node tracker poisoned");
        let direct = nodes.values().filter(|n| n.is_direct).count();
        (direct, nodes.len() - direct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_clock;

    fn tracker() -> (NodeTracker, std::sync::Arc<crate::clock::TestClock>) {
        let clock = test_clock(Utc::now());
        let tracker = NodeTracker::new(&MapperConfig::default(), clock.clone());
        (tracker, clock)
    }

    #[test]
    fn hop_count_one_is_direct_hop_count_three_is_indirect() {
        let (tracker, _clock) = tracker();
        let a = NodeId::try_new("!a").unwrap();
        let b = NodeId::try_new("!b").unwrap();

        let out_a = tracker.update(
            &a,
            &Observation {
                hop_count: Some(1),
                ..Default::default()
            },
        );
        assert!(out_a.new_is_direct);

        let out_b = tracker.update(
            &b,
            &Observation {
                hop_count: Some(3),
                ..Default::default()
            },
        );
        assert!(!out_b.new_is_direct);
    }

    #[test]
    fn strong_snr_alone_never_promotes_to_direct() {
        let (tracker, _clock) = tracker();
        let a = NodeId::try_new("!a").unwrap();
        let out = tracker.update(
            &a,
            &Observation {
                hop_count: Some(4),
                snr: Some(15.0),
                ..Default::default()
            },
        );
        assert!(!out.new_is_direct);
    }

    #[test]
    fn explicit_direct_flag_overrides_upward_not_downward() {
        let (tracker, _clock) = tracker();
        let a = NodeId::try_new("!a").unwrap();
        tracker.update(
            &a,
            &Observation {
                hop_count: Some(3),
                ..Default::default()
            },
        );
        assert_eq!(tracker.is_direct(&a), Some(false));

        // Explicit true raises it.
        let out = tracker.update(
            &a,
            &Observation {
                explicit_is_direct: Some(true),
                hop_count: Some(3),
                ..Default::default()
            },
        );
        assert!(out.new_is_direct);

        // Classification is recomputed fresh from each observation; a
        // later observation without the explicit flag is judged purely
        // on its own hop count.
        let out2 = tracker.update(
            &a,
            &Observation {
                hop_count: Some(3),
                ..Default::default()
            },
        );
        assert!(!out2.new_is_direct);
    }

    #[test]
    fn mark_traced_success_resets_failures_and_schedules_recheck() {
        let (tracker, clock) = tracker();
        let a = NodeId::try_new("!a").unwrap();
        tracker.update(
            &a,
            &Observation {
                hop_count: Some(3),
                ..Default::default()
            },
        );
        assert!(tracker.mark_traced(&a, false, None));
        assert!(tracker.mark_traced(&a, false, None));

        let before_success = clock.now_wall();
        assert!(tracker.mark_traced(&a, true, None));

        let snapshot = tracker.snapshot();
        let node = &snapshot[&a];
        assert_eq!(node.failure_count, 0);
        assert_eq!(node.trace_count, 3);
        assert!(node.last_trace_success);
        let recheck = node.next_recheck.expect("recheck scheduled");
        let expected = before_success + chrono::Duration::hours(6);
        assert!((recheck - expected).num_seconds().abs() <= 1);
    }

    #[test]
    fn mark_traced_unknown_node_is_a_no_op() {
        let (tracker, _clock) = tracker();
        let a = NodeId::try_new("!ghost").unwrap();
        assert!(!tracker.mark_traced(&a, true, None));
    }

    #[test]
    fn should_trace_blacklist_dominates_whitelist() {
        let mut config = MapperConfig::default();
        config.whitelist = vec!["!a".to_string()];
        config.blacklist = vec!["!a".to_string()];
        let clock = test_clock(Utc::now());
        let tracker = NodeTracker::new(&config, clock);
        let a = NodeId::try_new("!a").unwrap();
        tracker.update(
            &a,
            &Observation {
                hop_count: Some(3),
                ..Default::default()
            },
        );
        assert!(!tracker.should_trace(&a));
    }

    #[test]
    fn should_trace_unknown_node_rejects() {
        let (tracker, _clock) = tracker();
        let a = NodeId::try_new("!a").unwrap();
        assert!(!tracker.should_trace(&a));
    }

    #[test]
    fn nodes_back_online_reports_offline_flag_and_ingress_clears_it() {
        let (tracker, _clock) = tracker();
        let a = NodeId::try_new("!a").unwrap();
        tracker.update(
            &a,
            &Observation {
                hop_count: Some(3),
                ..Default::default()
            },
        );
        tracker.mark_offline(&a);
        assert_eq!(tracker.nodes_back_online(), vec![a.clone()]);

        let outcome = tracker.update(
            &a,
            &Observation {
                hop_count: Some(3),
                ..Default::default()
            },
        );
        assert!(outcome.was_offline_before);
        assert!(tracker.nodes_back_online().is_empty());
    }
}
