//! Orchestrator (`spec.md` §4.7)
//!
//! Wires every other component into the running system: an ingress
//! handler that applies the classification decision tree, a response
//! path, and five cooperating background loops (queue processing,
//! timeout sweeping, periodic recheck, persistence, and an optional
//! one-shot initial discovery). Shutdown is cooperative, grounded on
//! the teacher's own `server::serve_with_graceful_shutdown` pattern: a
//! single `tokio_util::sync::CancellationToken` the loops select
//! against, joined from `stop`.

use crate::clock::SharedClock;
use crate::config::MapperConfig;
use crate::domain::{NodeId, Priority};
use crate::error::MapperResult;
use crate::health_monitor::NetworkHealthMonitor;
use crate::message::Packet;
use crate::node_tracker::{NodeTracker, Observation};
use crate::persistence::{HistoryEntry, StatePersistence};
use crate::priority_queue::{EnqueueOutcome, PriorityQueue};
use crate::rate_limiter::RateLimiter;
use crate::router::SharedMessageRouter;
use crate::traceroute_manager::TracerouteManager;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const QUEUE_EMPTY_POLL_INTERVAL: Duration = Duration::from_secs(10);
const PERIODIC_RECHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Point-in-time operational statistics (`spec.md` §4.7).
#[derive(Debug, Clone, Copy, Default)]
pub struct Statistics {
    /// Nodes known to the tracker.
    pub nodes_tracked: usize,
    /// Of those, classified direct.
    pub direct_nodes: usize,
    /// Of those, classified indirect.
    pub indirect_nodes: usize,
    /// Requests currently queued.
    pub queue_size: usize,
    /// Correlations currently awaiting a response.
    pub pending_correlations: usize,
    /// Probes sent over the orchestrator's lifetime.
    pub traceroutes_sent: u64,
    /// Probes that resolved successfully.
    pub traceroutes_successful: u64,
    /// Probes that resolved as a failure, including timeouts.
    pub traceroutes_failed: u64,
    /// Of `traceroutes_failed`, the subset that were timeouts.
    pub traceroutes_timeout: u64,
    /// Ingress observations skipped because the node was already direct.
    pub direct_nodes_skipped: u64,
    /// Ingress observations skipped by a node-tracker filter.
    pub filtered_nodes_skipped: u64,
    /// Wall-clock time of the most recently sent probe, if any.
    pub last_traceroute_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Composite health view exposed alongside [`Statistics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthReport {
    /// Probe success rate over the monitor's lifetime window.
    pub success_rate: f64,
    /// Current effective outbound rate, after congestion/emergency-stop
    /// derating.
    pub current_rate: f64,
    /// Whether the recent window indicates congestion.
    pub is_throttled: bool,
    /// Whether `now` falls within the configured quiet-hours window.
    pub is_quiet_hours: bool,
    /// Whether the emergency-stop latch is engaged.
    pub is_emergency_stop: bool,
}

#[derive(Debug, Default)]
struct Counters {
    traceroutes_sent: AtomicU64,
    traceroutes_successful: AtomicU64,
    traceroutes_failed: AtomicU64,
    traceroutes_timeout: AtomicU64,
    direct_nodes_skipped: AtomicU64,
    filtered_nodes_skipped: AtomicU64,
    last_traceroute_time: std::sync::Mutex<Option<chrono::DateTime<chrono::Utc>>>,
}

/// Policy and coordination engine for automatic mesh traceroute
/// discovery and monitoring. Owns every other component and the
/// background loops that drive them.
#[derive(Debug)]
pub struct TracerouteMapper {
    config: MapperConfig,
    tracker: NodeTracker,
    queue: PriorityQueue,
    rate_limiter: RateLimiter,
    manager: TracerouteManager,
    health: NetworkHealthMonitor,
    persistence: Option<StatePersistence>,
    router: SharedMessageRouter,
    clock: SharedClock,
    counters: Counters,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TracerouteMapper {
    /// Builds a new mapper from validated configuration. Returns an
    /// error if `config` fails [`MapperConfig::validate`] or `enabled`
    /// is `false` (`spec.md` §4.7).
    ///
    /// # Errors
    ///
    /// Returns `MapperError::ConfigInvalid` if the configuration is
    /// invalid or the master switch is off.
    pub fn new(
        config: MapperConfig,
        router: SharedMessageRouter,
        clock: SharedClock,
    ) -> MapperResult<Self> {
        config.validate()?;
        if !config.enabled {
            return Err(crate::error::MapperError::ConfigInvalid(
                "traceroute mapper is disabled".to_string(),
            ));
        }

        let tracker = NodeTracker::new(&config, clock.clone());
        let queue = PriorityQueue::new(
            config.queue_max_size.into(),
            config.queue_overflow_strategy,
            clock.clone(),
        );
        let rate_limiter = RateLimiter::new(
            config.traceroutes_per_minute.into(),
            config.burst_multiplier.into(),
            clock.clone(),
        );
        let manager = TracerouteManager::new(
            clock.clone(),
            config.max_hops,
            config.timeout_seconds,
            config.max_retries,
            config.retry_backoff_multiplier,
        );
        let health = NetworkHealthMonitor::new(
            clock.clone(),
            config.congestion_detection.clone(),
            config.emergency_stop.clone(),
            config.quiet_hours.clone(),
        );
        let persistence = config
            .state_persistence_enabled
            .then(|| StatePersistence::new(config.state_file_path.clone(), config.history_per_node.into()));

        Ok(Self {
            config,
            tracker,
            queue,
            rate_limiter,
            manager,
            health,
            persistence,
            router,
            clock,
            counters: Counters::default(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Loads persisted state (if enabled), optionally clears the queue,
    /// enqueues initial discovery, and launches the background loops.
    pub async fn start(self: &Arc<Self>) {
        if let Some(persistence) = &self.persistence {
            let loaded = persistence.load_state(self.clock.now_wall()).await;
            info!(node_count = loaded.len(), "restored persisted node state");
            self.tracker.restore(loaded);
        }

        if self.config.clear_queue_on_startup {
            self.queue.clear();
            info!("cleared queue on startup");
        }

        if self.config.initial_discovery_enabled {
            self.run_initial_discovery();
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.clone().spawn_queue_processing_loop());
        tasks.push(self.clone().spawn_timeout_loop());
        tasks.push(self.clone().spawn_periodic_recheck_loop());
        if self.persistence.is_some() {
            tasks.push(self.clone().spawn_persistence_loop());
        }
        info!("traceroute mapper started");
    }

    /// Cancels every background loop, awaits their completion, and (if
    /// persistence is enabled) performs one final save.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        if let Some(persistence) = &self.persistence {
            persistence.save_state(&self.tracker.snapshot(), self.clock.now_wall()).await;
        }
        info!("traceroute mapper stopped");
    }

    fn run_initial_discovery(&self) {
        let mut enqueued = 0;
        for node_id in self.tracker_known_indirect_nodes() {
            if self.queue.enqueue(
                node_id,
                Priority::new_indirect_node(),
                "initial_discovery",
                None,
                0,
            ) == EnqueueOutcome::Accepted
            {
                enqueued += 1;
            }
        }
        info!(enqueued, "initial discovery enqueued known indirect nodes");
    }

    fn tracker_known_indirect_nodes(&self) -> Vec<NodeId> {
        self.tracker.nodes_needing_trace()
    }

    /// Applies the ingress decision tree from `spec.md` §4.7 to a
    /// received mesh packet, updating node state and enqueueing
    /// follow-up traceroutes as needed.
    pub async fn handle_message(&self, packet: Packet) {
        let Some(sender_id) = packet.sender_id.as_deref() else {
            return;
        };
        let Ok(node_id) = NodeId::try_new(sender_id.to_string()) else {
            return;
        };

        if packet.is_traceroute_response() {
            self.handle_traceroute_response(&node_id, packet).await;
            return;
        }

        let explicit_is_direct = packet.is_neighbor().then_some(true);
        let observation = Observation {
            explicit_is_direct,
            hop_count: packet.hop_count,
            snr: packet.snr,
            rssi: packet.rssi,
            role: packet.role().map(str::to_string),
        };

        let outcome = self.tracker.update(&node_id, &observation);

        if outcome.is_direct_transition() {
            if self.queue.remove(&node_id) {
                debug!(node_id = %node_id, "removed queued request: node became direct");
            }
            self.counters.direct_nodes_skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if outcome.new_is_direct {
            return;
        }

        if outcome.was_offline_before {
            if !self.tracker.should_trace(&node_id) {
                self.counters.filtered_nodes_skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            self.queue.enqueue(node_id.clone(), Priority::node_back_online(), "node_back_online", None, 0);
            return;
        }

        if outcome.is_newly_indirect() {
            if !self.tracker.should_trace(&node_id) {
                self.counters.filtered_nodes_skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            self.queue.enqueue(node_id, Priority::new_indirect_node(), "new_indirect_node", None, 0);
        }
    }

    async fn handle_traceroute_response(&self, node_id: &NodeId, packet: Packet) {
        // Always forwarded regardless of `forward_to_router`, which only
        // gates whether this gateway originates its own outbound probes
        // (`spec.md` §5: forwarding precedes correlation matching, and
        // must not be reordered for "efficiency").
        self.router.send_message(packet.clone()).await;

        let Some(outcome) = self.manager.handle_response(&packet) else {
            return;
        };

        if self.tracker.is_direct(node_id).is_none() {
            self.tracker.update(
                node_id,
                &Observation {
                    explicit_is_direct: Some(false),
                    ..Observation::default()
                },
            );
        }

        let response_time_secs = outcome.round_trip.num_milliseconds().max(0) as f64 / 1000.0;
        self.health.record_success(Some(response_time_secs));
        self.tracker.mark_traced(node_id, true, None);
        self.counters.traceroutes_successful.fetch_add(1, Ordering::Relaxed);

        if self.config.logging.log_traceroute_responses {
            info!(
                node_id = %node_id,
                round_trip_ms = outcome.round_trip.num_milliseconds(),
                "traceroute response matched"
            );
        }

        if let Some(persistence) = &self.persistence {
            let route = packet.route().cloned().unwrap_or_default();
            let entry = HistoryEntry {
                timestamp: self.clock.now_wall(),
                success: true,
                hop_count: route.len(),
                route,
                snr_values: packet.snr.into_iter().collect(),
                rssi_values: packet.rssi.into_iter().collect(),
                duration_ms: outcome.round_trip.num_milliseconds() as f64,
                error_message: None,
            };
            persistence.save_history(node_id, entry).await;
        }
    }

    fn should_process_queue(&self) -> bool {
        let rate: f64 = self.config.traceroutes_per_minute.into();
        rate > 0.0
            && !self.health.is_emergency_stop()
            && !self.health.is_quiet_hours()
            && self.health.is_healthy()
    }

    fn spawn_queue_processing_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let delay: f64 = self.config.startup_delay_seconds.into();
            if delay > 0.0 {
                tokio::select! {
                    () = self.clock.sleep(Duration::from_secs_f64(delay)) => {}
                    () = self.shutdown.cancelled() => return,
                }
            }

            loop {
                if self.shutdown.is_cancelled() {
                    return;
                }
                if !self.should_process_queue() {
                    tokio::select! {
                        () = self.clock.sleep(QUEUE_EMPTY_POLL_INTERVAL) => {}
                        () = self.shutdown.cancelled() => return,
                    }
                    continue;
                }

                let Some(request) = self.queue.dequeue() else {
                    tokio::select! {
                        () = self.clock.sleep(QUEUE_EMPTY_POLL_INTERVAL) => {}
                        () = self.shutdown.cancelled() => return,
                    }
                    continue;
                };

                tokio::select! {
                    () = self.rate_limiter.acquire() => {}
                    () = self.shutdown.cancelled() => return,
                }

                self.send_traceroute(request.node_id, request.priority, request.retry_count).await;
            }
        })
    }

    async fn send_traceroute(&self, node_id: NodeId, priority: Priority, retry_count: u32) {
        let request_id = self.manager.send(node_id.clone(), priority, retry_count);
        let Some(message) = self.manager.pending_message(&request_id) else {
            warn!(node_id = %node_id, "probe built but not retrievable, dropping");
            return;
        };

        if !self.config.forward_to_router {
            self.counters.traceroutes_sent.fetch_add(1, Ordering::Relaxed);
            *self.counters.last_traceroute_time.lock().expect("counters poisoned") =
                Some(self.clock.now_wall());
            if self.config.logging.log_traceroute_requests {
                info!(node_id = %node_id, request_id = %request_id, "traceroute request sent");
            }
            return;
        }

        if self.router.send_message(message).await {
            self.counters.traceroutes_sent.fetch_add(1, Ordering::Relaxed);
            *self.counters.last_traceroute_time.lock().expect("counters poisoned") =
                Some(self.clock.now_wall());
            if self.config.logging.log_traceroute_requests {
                info!(node_id = %node_id, request_id = %request_id, "traceroute request sent");
            }
        } else {
            // SendFailure (`spec.md` §7): the probe never reached the
            // router, so the correlation is canceled rather than left
            // pending -- it must not consume a retry budget.
            warn!(node_id = %node_id, "router rejected outbound probe");
            self.manager.cancel(&request_id);
            self.health.record_failure(false);
            self.counters.traceroutes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn spawn_timeout_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = self.clock.sleep(TIMEOUT_CHECK_INTERVAL) => {}
                    () = self.shutdown.cancelled() => return,
                }

                for pending in self.manager.check_timeouts() {
                    self.health.record_failure(true);
                    self.counters.traceroutes_failed.fetch_add(1, Ordering::Relaxed);
                    self.counters.traceroutes_timeout.fetch_add(1, Ordering::Relaxed);
                    self.tracker.mark_traced(&pending.node_id, false, None);

                    if let Some(persistence) = &self.persistence {
                        let entry = HistoryEntry {
                            timestamp: self.clock.now_wall(),
                            success: false,
                            hop_count: 0,
                            route: Vec::new(),
                            snr_values: Vec::new(),
                            rssi_values: Vec::new(),
                            duration_ms: 0.0,
                            error_message: Some("timeout".to_string()),
                        };
                        persistence.save_history(&pending.node_id, entry).await;
                    }

                    if self.manager.can_retry(&pending) {
                        let retry_count = pending.retry_count + 1;
                        let reason = format!("retry_{retry_count}");
                        self.queue.enqueue(
                            pending.node_id.clone(),
                            pending.priority,
                            reason,
                            None,
                            retry_count,
                        );
                    } else {
                        warn!(node_id = %pending.node_id, "traceroute retries exhausted");
                    }
                }
            }
        })
    }

    fn spawn_periodic_recheck_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = self.clock.sleep(PERIODIC_RECHECK_INTERVAL) => {}
                    () = self.shutdown.cancelled() => return,
                }

                for node_id in self.tracker.nodes_needing_trace() {
                    if self.queue.contains(&node_id) {
                        continue;
                    }
                    self.queue.enqueue(node_id, Priority::periodic_recheck(), "periodic_recheck", None, 0);
                }
            }
        })
    }

    fn spawn_persistence_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let Some(persistence) = self.persistence.as_ref() else { return };
            let interval_minutes: f64 = self.config.auto_save_interval_minutes.into();
            let interval = Duration::from_secs_f64(interval_minutes * 60.0);

            loop {
                tokio::select! {
                    () = self.clock.sleep(interval) => {}
                    () = self.shutdown.cancelled() => return,
                }
                persistence.save_state(&self.tracker.snapshot(), self.clock.now_wall()).await;
            }
        })
    }

    /// A point-in-time statistics snapshot.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        let (direct, indirect) = self.tracker.direct_indirect_counts();
        Statistics {
            nodes_tracked: direct + indirect,
            direct_nodes: direct,
            indirect_nodes: indirect,
            queue_size: self.queue.size(),
            pending_correlations: self.manager.pending_count(),
            traceroutes_sent: self.counters.traceroutes_sent.load(Ordering::Relaxed),
            traceroutes_successful: self.counters.traceroutes_successful.load(Ordering::Relaxed),
            traceroutes_failed: self.counters.traceroutes_failed.load(Ordering::Relaxed),
            traceroutes_timeout: self.counters.traceroutes_timeout.load(Ordering::Relaxed),
            direct_nodes_skipped: self.counters.direct_nodes_skipped.load(Ordering::Relaxed),
            filtered_nodes_skipped: self.counters.filtered_nodes_skipped.load(Ordering::Relaxed),
            last_traceroute_time: *self
                .counters
                .last_traceroute_time
                .lock()
                .expect("counters poisoned"),
        }
    }

    /// The underlying health monitor, for callers that need direct
    /// access beyond the [`HealthReport`] summary (e.g. manually
    /// engaging emergency stop, or feeding synthetic outcomes in tests).
    #[must_use]
    pub fn health_monitor(&self) -> &NetworkHealthMonitor {
        &self.health
    }

    /// A composite health view.
    #[must_use]
    pub fn health_report(&self) -> HealthReport {
        let metrics = self.health.metrics();
        let base_rate: f64 = self.config.traceroutes_per_minute.into();
        HealthReport {
            success_rate: metrics.success_rate,
            current_rate: self.health.recommended_rate(base_rate),
            is_throttled: metrics.is_congested,
            is_quiet_hours: self.health.is_quiet_hours(),
            is_emergency_stop: metrics.is_emergency_stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_clock;
    use crate::message::MessageType;
    use crate::router::StubMessageRouter;
    use chrono::Utc;
    use std::collections::HashMap;

    fn config() -> MapperConfig {
        let mut c = MapperConfig::default();
        c.enabled = true;
        c.state_persistence_enabled = false;
        c.initial_discovery_enabled = false;
        c
    }

    fn mapper(config: MapperConfig) -> (Arc<TracerouteMapper>, Arc<crate::clock::TestClock>, Arc<StubMessageRouter>) {
        let clock = test_clock(Utc::now());
        let router = Arc::new(StubMessageRouter::new());
        let m = Arc::new(
            TracerouteMapper::new(config, router.clone(), clock.clone()).expect("valid config"),
        );
        (m, clock, router)
    }

    fn indirect_packet(sender: &str) -> Packet {
        Packet {
            id: "pkt-1".to_string(),
            sender_id: Some(sender.to_string()),
            recipient_id: None,
            message_type: MessageType::Text,
            content: String::new(),
            hop_limit: 1,
            hop_count: Some(3),
            snr: None,
            rssi: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn disabled_config_rejected() {
        let clock = test_clock(Utc::now());
        let router = Arc::new(StubMessageRouter::new());
        let mut c = MapperConfig::default();
        c.enabled = false;
        assert!(TracerouteMapper::new(c, router, clock).is_err());
    }

    #[tokio::test]
    async fn new_indirect_node_is_enqueued() {
        let (m, _clock, _router) = mapper(config());
        m.handle_message(indirect_packet("!abc")).await;
        assert_eq!(m.statistics().queue_size, 1);
        assert_eq!(m.statistics().indirect_nodes, 1);
    }

    #[tokio::test]
    async fn direct_node_is_never_queued() {
        let (m, _clock, _router) = mapper(config());
        let mut p = indirect_packet("!abc");
        p.hop_count = Some(1);
        m.handle_message(p).await;
        assert_eq!(m.statistics().queue_size, 0);
        assert_eq!(m.statistics().direct_nodes, 1);
    }

    #[tokio::test]
    async fn direct_transition_cancels_pending_queue_entry() {
        let (m, _clock, _router) = mapper(config());
        m.handle_message(indirect_packet("!abc")).await;
        assert_eq!(m.statistics().queue_size, 1);

        let mut p = indirect_packet("!abc");
        p.hop_count = Some(1);
        m.handle_message(p).await;

        assert_eq!(m.statistics().queue_size, 0);
        assert_eq!(m.statistics().direct_nodes_skipped, 1);
    }

    #[tokio::test]
    async fn traceroute_response_matches_and_records_success() {
        let (m, _clock, router) = mapper(config());
        m.handle_message(indirect_packet("!abc")).await;

        let request = {
            let node = NodeId::try_new("!abc").unwrap();
            m.manager.send(node, Priority::new_indirect_node(), 0)
        };
        let message = m.manager.pending_message(&request).unwrap();
        let mut response = message.clone();
        response.sender_id = Some("!abc".to_string());
        response.metadata.insert("route".to_string(), serde_json::json!(["!gw", "!abc"]));

        m.handle_message(response).await;

        let stats = m.statistics();
        assert_eq!(stats.traceroutes_successful, 1);
        assert_eq!(stats.pending_correlations, 0);
        assert_eq!(router.sent_packets().len(), 1);
    }

    #[tokio::test]
    async fn emergency_stop_halts_queue_processing_gate() {
        let (m, _clock, _router) = mapper(config());
        m.health.enter_emergency_stop_manual("test");
        assert!(!m.should_process_queue());
        assert!(m.health_report().is_emergency_stop);
    }

    #[tokio::test]
    async fn rejected_send_cancels_correlation_and_counts_as_failure() {
        let (m, _clock, router) = mapper(config());
        let node = NodeId::try_new("!abc").unwrap();

        router.fail_next_send();
        m.send_traceroute(node, Priority::new_indirect_node(), 0).await;

        let stats = m.statistics();
        assert_eq!(stats.traceroutes_sent, 0);
        assert_eq!(stats.traceroutes_failed, 1);
        assert_eq!(stats.pending_correlations, 0);
        assert!(stats.last_traceroute_time.is_none());
        assert!(m.health.metrics().success_rate < 1.0);

        // Cancel removed the correlation outright, so it does not also
        // show up as a timed-out correlation later.
        assert!(m.manager.check_timeouts().is_empty());
    }

    #[tokio::test]
    async fn repeated_timeouts_exhaust_retry_budget_and_stop_requeuing() {
        let mut c = config();
        c.max_retries = crate::config::MaxRetries::try_new(1).unwrap();
        c.timeout_seconds = crate::config::TimeoutSeconds::try_new(10.0).unwrap();
        let (m, clock, _router) = mapper(c);

        m.handle_message(indirect_packet("!flaky")).await;
        m.start().await;

        // Original attempt (retry_count 0) times out and re-enqueues once
        // (retry_count 1, within the budget of max_retries = 1).
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        clock.advance(Duration::from_secs(11));
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(m.statistics().traceroutes_timeout, 1);
        assert_eq!(m.manager.pending_count() + m.statistics().queue_size, 1);

        // Let the retry (retry_count 1) time out too; the budget is
        // exhausted, so it must not be re-enqueued a third time.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        clock.advance(Duration::from_secs(11));
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(m.statistics().traceroutes_timeout, 2);
        assert_eq!(m.manager.pending_count(), 0);
        assert_eq!(m.statistics().queue_size, 0);

        m.stop().await;
    }
}
