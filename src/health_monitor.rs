//! Network Health Monitor (`spec.md` §4.5)
//!
//! Decides whether probes should be sent at all, and at what rate:
//! tracks success/failure windows, derives congestion, and owns the
//! emergency-stop latch with its auto-recovery check.

use crate::clock::SharedClock;
use crate::config::{parse_hhmm, CongestionConfig, EmergencyStopConfig, QuietHoursConfig};
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{error, info, warn};

const DEFAULT_WINDOW_SIZE: usize = 20;
const MAX_RESPONSE_TIMES: usize = 100;
const EMERGENCY_STOP_MIN_SAMPLE: u64 = 20;

/// Point-in-time health metrics snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NetworkHealthMetrics {
    /// Total probes recorded (success + failure).
    pub total_requests: u64,
    /// Probes recorded as successful.
    pub successful_requests: u64,
    /// Probes recorded as failed, including timeouts.
    pub failed_requests: u64,
    /// Of `failed_requests`, the subset that were timeouts.
    pub timeout_count: u64,
    /// `successful_requests / total_requests`, or `1.0` with no data.
    pub success_rate: f64,
    /// Mean of recorded response times, in seconds.
    pub avg_response_time_secs: f64,
    /// Whether the recent window indicates congestion.
    pub is_congested: bool,
    /// Whether the emergency-stop latch is engaged.
    pub is_emergency_stop: bool,
}

struct State {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    timeout_count: u64,
    consecutive_failures: u64,
    recent_results: VecDeque<bool>,
    response_times: VecDeque<f64>,
    is_congested: bool,
    is_emergency_stop: bool,
    emergency_stop_time: Option<chrono::DateTime<chrono::Utc>>,
    emergency_stop_reason: Option<String>,
}

impl State {
    fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            timeout_count: 0,
            consecutive_failures: 0,
            recent_results: VecDeque::new(),
            response_times: VecDeque::new(),
            is_congested: false,
            is_emergency_stop: false,
            emergency_stop_time: None,
            emergency_stop_reason: None,
        }
    }

    fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    fn recent_success_rate(&self) -> f64 {
        if self.recent_results.is_empty() {
            1.0
        } else {
            let successes = self.recent_results.iter().filter(|r| **r).count();
            successes as f64 / self.recent_results.len() as f64
        }
    }

    fn avg_response_time(&self) -> f64 {
        if self.response_times.is_empty() {
            0.0
        } else {
            self.response_times.iter().sum::<f64>() / self.response_times.len() as f64
        }
    }
}

/// Monitors network health and protects the mesh from excessive probe
/// traffic: congestion derivation, emergency-stop latch, and quiet hours.
#[derive(Debug)]
pub struct NetworkHealthMonitor {
    state: Mutex<State>,
    clock: SharedClock,
    window_size: usize,
    congestion: CongestionConfig,
    emergency_stop: EmergencyStopConfig,
    quiet_hours: QuietHoursConfig,
}

impl NetworkHealthMonitor {
    /// Creates a new monitor from the mapper's congestion, emergency-stop,
    /// and quiet-hours configuration.
    #[must_use]
    pub fn new(
        clock: SharedClock,
        congestion: CongestionConfig,
        emergency_stop: EmergencyStopConfig,
        quiet_hours: QuietHoursConfig,
    ) -> Self {
        Self {
            state: Mutex::new(State::new()),
            clock,
            window_size: DEFAULT_WINDOW_SIZE,
            congestion,
            emergency_stop,
            quiet_hours,
        }
    }

    /// Records a successful probe, resets the consecutive-failure streak,
    /// re-derives congestion, and (while in emergency stop) checks for
    /// automatic recovery.
    pub fn record_success(&self, response_time_secs: Option<f64>) {
        let mut state = self.state.lock().expect("health monitor poisoned");
        state.total_requests += 1;
        state.successful_requests += 1;
        state.consecutive_failures = 0;
        push_bounded(&mut state.recent_results, true, self.window_size);

        if let Some(rt) = response_time_secs {
            push_bounded(&mut state.response_times, rt, MAX_RESPONSE_TIMES);
        }

        self.update_congestion(&mut state);

        if state.is_emergency_stop {
            self.check_auto_recovery(&mut state);
        }
    }

    /// Records a failed probe, bumps the consecutive-failure streak,
    /// re-derives congestion, and checks emergency-stop triggers.
    pub fn record_failure(&self, is_timeout: bool) {
        let mut state = self.state.lock().expect("health monitor poisoned");
        state.total_requests += 1;
        state.failed_requests += 1;
        state.consecutive_failures += 1;
        push_bounded(&mut state.recent_results, false, self.window_size);
        if is_timeout {
            state.timeout_count += 1;
        }

        self.update_congestion(&mut state);
        self.check_emergency_stop(&mut state);
    }

    fn update_congestion(&self, state: &mut State) {
        if !self.congestion.enabled {
            state.is_congested = false;
            return;
        }
        let recent = state.recent_success_rate();
        let threshold: f64 = self.congestion.success_rate_threshold.into();
        let was_congested = state.is_congested;
        state.is_congested = recent < threshold;

        if state.is_congested && !was_congested {
            warn!(recent_success_rate = recent, threshold, "network congestion detected");
        } else if !state.is_congested && was_congested {
            info!(recent_success_rate = recent, "network congestion cleared");
        }
    }

    fn check_emergency_stop(&self, state: &mut State) {
        if state.is_emergency_stop {
            return;
        }
        let threshold: u32 = self.emergency_stop.consecutive_failures.into();
        if state.consecutive_failures >= u64::from(threshold) {
            let reason =
                format!("Consecutive failures threshold exceeded: {}", state.consecutive_failures);
            self.enter_emergency_stop(state, reason);
            return;
        }

        let failure_threshold: f64 = self.emergency_stop.failure_threshold.into();
        let success_rate = state.success_rate();
        if state.total_requests >= EMERGENCY_STOP_MIN_SAMPLE && success_rate < failure_threshold {
            let reason = format!(
                "Success rate below threshold: {success_rate:.2} < {failure_threshold:.2}"
            );
            self.enter_emergency_stop(state, reason);
        }
    }

    fn check_auto_recovery(&self, state: &mut State) {
        let Some(stop_time) = state.emergency_stop_time else {
            return;
        };
        let now = self.clock.now_wall();
        let recovery_minutes: u32 = self.emergency_stop.auto_recovery_minutes.into();
        if now - stop_time < chrono::Duration::minutes(i64::from(recovery_minutes)) {
            return;
        }

        let failure_threshold: f64 = self.emergency_stop.failure_threshold.into();
        let recovery_threshold = failure_threshold * 1.5;
        let recent = state.recent_success_rate();
        if recent > recovery_threshold {
            info!(recent_success_rate = recent, recovery_threshold, "auto-recovery conditions met");
            self.exit_emergency_stop_locked(state);
        }
    }

    fn enter_emergency_stop(&self, state: &mut State, reason: String) {
        if state.is_emergency_stop {
            return;
        }
        state.is_emergency_stop = true;
        state.emergency_stop_time = Some(self.clock.now_wall());
        state.emergency_stop_reason = Some(reason.clone());
        error!(reason = %reason, "emergency stop triggered, probes paused");
    }

    /// Forcibly engages the emergency-stop latch (e.g. an operator
    /// command), independent of the automatic trigger conditions.
    pub fn enter_emergency_stop_manual(&self, reason: impl Into<String>) {
        let mut state = self.state.lock().expect("health monitor poisoned");
        self.enter_emergency_stop(&mut state, reason.into());
    }

    fn exit_emergency_stop_locked(&self, state: &mut State) {
        if !state.is_emergency_stop {
            return;
        }
        state.is_emergency_stop = false;
        state.emergency_stop_time = None;
        state.emergency_stop_reason = None;
        info!("emergency stop cleared, resuming normal operations");
    }

    /// Manually clears the emergency-stop latch. Always permitted
    /// (`spec.md` §4.5).
    pub fn exit_emergency_stop(&self) {
        let mut state = self.state.lock().expect("health monitor poisoned");
        self.exit_emergency_stop_locked(&mut state);
    }

    /// Whether the emergency-stop latch is currently engaged.
    #[must_use]
    pub fn is_emergency_stop(&self) -> bool {
        self.state.lock().expect("health monitor poisoned").is_emergency_stop
    }

    /// The reason the emergency-stop latch was last engaged, if any.
    #[must_use]
    pub fn emergency_stop_reason(&self) -> Option<String> {
        self.state.lock().expect("health monitor poisoned").emergency_stop_reason.clone()
    }

    /// Whether the recent window indicates congestion.
    #[must_use]
    pub fn is_congested(&self) -> bool {
        self.state.lock().expect("health monitor poisoned").is_congested
    }

    /// Whether `now` (per this monitor's clock) falls within the
    /// configured quiet-hours window. A `(start > end)` window spans
    /// midnight (`spec.md` §4.5).
    #[must_use]
    pub fn is_quiet_hours(&self) -> bool {
        if !self.quiet_hours.enabled {
            return false;
        }
        let (Ok(start), Ok(end)) =
            (parse_hhmm(&self.quiet_hours.start_time), parse_hhmm(&self.quiet_hours.end_time))
        else {
            return false;
        };

        let now = self.clock.now_wall();
        let now_minutes = now.time().num_seconds_from_midnight() / 60;

        if start <= end {
            start <= now_minutes && now_minutes <= end
        } else {
            now_minutes >= start || now_minutes <= end
        }
    }

    /// Composite health check: not in emergency stop, not in quiet
    /// hours, and the overall success rate is at or above the
    /// emergency-stop failure threshold (`spec.md` §4.5).
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let state = self.state.lock().expect("health monitor poisoned");
        if state.is_emergency_stop {
            return false;
        }
        if self.is_quiet_hours() {
            return false;
        }
        let failure_threshold: f64 = self.emergency_stop.failure_threshold.into();
        state.success_rate() >= failure_threshold
    }

    /// Recommended outbound rate given `base_rate`: zero under emergency
    /// stop, throttled under congestion, otherwise unchanged.
    #[must_use]
    pub fn recommended_rate(&self, base_rate: f64) -> f64 {
        let state = self.state.lock().expect("health monitor poisoned");
        if state.is_emergency_stop {
            return 0.0;
        }
        if state.is_congested {
            let multiplier: f64 = self.congestion.throttle_multiplier.into();
            return base_rate * multiplier;
        }
        base_rate
    }

    /// A point-in-time metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> NetworkHealthMetrics {
        let state = self.state.lock().expect("health monitor poisoned");
        NetworkHealthMetrics {
            total_requests: state.total_requests,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            timeout_count: state.timeout_count,
            success_rate: state.success_rate(),
            avg_response_time_secs: state.avg_response_time(),
            is_congested: state.is_congested,
            is_emergency_stop: state.is_emergency_stop,
        }
    }

    /// Resets all metrics and latch state.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("health monitor poisoned");
        *state = State::new();
        info!("network health monitor reset");
    }
}

fn push_bounded<T>(deque: &mut VecDeque<T>, value: T, max_len: usize) {
    deque.push_back(value);
    while deque.len() > max_len {
        deque.pop_front();
    }
}
