//! Configuration surface for the traceroute mapper.
//!
//! Every field is range-checked per `spec.md` §6 using `nutype` validated
//! newtypes, so an out-of-range value is rejected the same way whether it
//! is constructed directly or deserialized from an operator-supplied
//! configuration document. `MapperConfig::validate` additionally checks
//! cross-field consistency (e.g. the quiet-hours `HH:MM` strings parse)
//! that a single field's type cannot express on its own.

use crate::error::{MapperError, MapperResult};
use nutype::nutype;
use serde::{Deserialize, Serialize};

macro_rules! ranged_f64 {
    ($name:ident, $min:literal, $max:literal, $doc:literal) => {
        #[nutype(
            validate(greater_or_equal = $min, less_or_equal = $max),
            derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Into)
        )]
        #[doc = $doc]
        pub struct $name(f64);
    };
}

macro_rules! ranged_int {
    ($name:ident, $ty:ty, $min:literal, $max:literal, $doc:literal) => {
        #[nutype(
            validate(greater_or_equal = $min, less_or_equal = $max),
            derive(
                Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Into
            )
        )]
        #[doc = $doc]
        pub struct $name($ty);
    };
}

ranged_f64!(
    TraceroutesPerMinute,
    0.0,
    60.0,
    "Outbound probe rate, in probes per minute. Zero disables sending."
);
ranged_f64!(BurstMultiplier, 1.0, 10.0, "Token-bucket burst multiplier.");
ranged_int!(QueueMaxSize, usize, 10, 10000, "Priority queue capacity.");
ranged_f64!(
    RecheckIntervalHours,
    0.0,
    168.0,
    "Hours between periodic rechecks of a traced node. Zero disables rechecks."
);
ranged_int!(MaxHops, u8, 1, 15, "Hop limit placed on outbound probes.");
ranged_f64!(TimeoutSeconds, 10.0, 300.0, "Per-probe correlation timeout.");
ranged_int!(MaxRetries, u32, 0, 10, "Retries attempted after a probe timeout.");
ranged_f64!(
    RetryBackoffMultiplier,
    1.0,
    10.0,
    "Geometric backoff multiplier applied between retries."
);
ranged_f64!(
    StartupDelaySeconds,
    0.0,
    600.0,
    "Delay before the queue-processing loop sends its first probe."
);
ranged_f64!(MinSnrThreshold, -30.0, 20.0, "Optional SNR gate for trace eligibility.");
ranged_f64!(
    AutoSaveIntervalMinutes,
    1.0,
    60.0,
    "Cadence of the persistence snapshot loop."
);
ranged_int!(HistoryPerNode, usize, 1, 100, "Per-node history cap.");
ranged_f64!(
    SuccessRateThreshold,
    0.0,
    1.0,
    "Recent success rate below which congestion is flagged."
);
ranged_f64!(
    ThrottleMultiplier,
    0.1,
    1.0,
    "Multiplier applied to the base rate while congested."
);
ranged_f64!(
    FailureThreshold,
    0.0,
    1.0,
    "Overall success rate below which the system is unhealthy / emergency-stop eligible."
);
ranged_int!(
    ConsecutiveFailuresThreshold,
    u32,
    1,
    100,
    "Consecutive failures that trip emergency stop."
);
ranged_int!(
    AutoRecoveryMinutes,
    u32,
    1,
    1440,
    "Minimum time in emergency stop before automatic recovery is considered."
);

/// Queue overflow policy, selected when `enqueue` is called on a full
/// queue with a new (non-duplicate) node. See `spec.md` §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOverflowStrategy {
    /// Evict the numerically-largest-priority (least important) entry if
    /// the new request would beat it.
    DropLowestPriority,
    /// Evict the oldest-queued entry unconditionally.
    DropOldest,
    /// Reject the new request.
    DropNew,
}

impl Default for QueueOverflowStrategy {
    fn default() -> Self {
        Self::DropLowestPriority
    }
}

/// Quiet-hours window configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHoursConfig {
    /// Whether quiet hours are enforced at all.
    pub enabled: bool,
    /// Inclusive interval start, `HH:MM`.
    pub start_time: String,
    /// Inclusive interval end, `HH:MM`.
    pub end_time: String,
    /// Informational only: the timezone the caller's wall-clock `now`
    /// is expected to already be expressed in. The mapper performs no
    /// timezone conversion itself (see `SPEC_FULL.md` §3).
    pub timezone: String,
}

impl Default for QuietHoursConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_time: "22:00".to_string(),
            end_time: "06:00".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

/// Congestion-detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongestionConfig {
    /// Whether congestion detection is active.
    pub enabled: bool,
    /// Recent success rate threshold below which congestion is flagged.
    pub success_rate_threshold: SuccessRateThreshold,
    /// Rate multiplier applied while congested.
    pub throttle_multiplier: ThrottleMultiplier,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            success_rate_threshold: SuccessRateThreshold::try_new(0.5).expect("in range"),
            throttle_multiplier: ThrottleMultiplier::try_new(0.5).expect("in range"),
        }
    }
}

/// Emergency-stop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyStopConfig {
    /// Whether the emergency-stop latch is active at all.
    pub enabled: bool,
    /// Overall success rate below which emergency stop triggers.
    pub failure_threshold: FailureThreshold,
    /// Consecutive failures that trigger emergency stop.
    pub consecutive_failures: ConsecutiveFailuresThreshold,
    /// Minimum minutes in emergency stop before auto-recovery is considered.
    pub auto_recovery_minutes: AutoRecoveryMinutes,
}

impl Default for EmergencyStopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: FailureThreshold::try_new(0.3).expect("in range"),
            consecutive_failures: ConsecutiveFailuresThreshold::try_new(5).expect("in range"),
            auto_recovery_minutes: AutoRecoveryMinutes::try_new(30).expect("in range"),
        }
    }
}

/// Ambient logging configuration, carried regardless of `spec.md`'s
/// Non-goals around log transport: this only controls verbosity of
/// this crate's own `tracing` events, never the transport or on-disk
/// format (both out of scope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level this crate emits its own events at.
    pub level: String,
    /// Emit an additional info-level event for every outbound probe.
    pub log_traceroute_requests: bool,
    /// Emit an additional info-level event for every matched response.
    pub log_traceroute_responses: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            log_traceroute_requests: true,
            log_traceroute_responses: true,
        }
    }
}

/// Full configuration surface, matching `spec.md` §6's table plus the
/// supplements in `SPEC_FULL.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Master switch; when false the orchestrator refuses to initialize.
    pub enabled: bool,
    /// Outbound probe rate.
    pub traceroutes_per_minute: TraceroutesPerMinute,
    /// Token-bucket burst multiplier.
    pub burst_multiplier: BurstMultiplier,
    /// Priority queue capacity.
    pub queue_max_size: QueueMaxSize,
    /// Policy applied when the queue is full.
    pub queue_overflow_strategy: QueueOverflowStrategy,
    /// Clear the queue at startup instead of resuming it.
    pub clear_queue_on_startup: bool,
    /// Hours between periodic rechecks.
    pub recheck_interval_hours: RecheckIntervalHours,
    /// Whether periodic rechecks run at all.
    pub recheck_enabled: bool,
    /// Hop limit for outbound probes.
    pub max_hops: MaxHops,
    /// Per-probe correlation timeout.
    pub timeout_seconds: TimeoutSeconds,
    /// Retries attempted after a timeout.
    pub max_retries: MaxRetries,
    /// Geometric backoff multiplier between retries.
    pub retry_backoff_multiplier: RetryBackoffMultiplier,
    /// Enqueue every known indirect node at startup.
    pub initial_discovery_enabled: bool,
    /// Delay before the first probe is sent.
    pub startup_delay_seconds: StartupDelaySeconds,
    /// Skip nodes that are directly heard.
    pub skip_direct_nodes: bool,
    /// Nodes that are never traced.
    pub blacklist: Vec<String>,
    /// When non-empty, only these nodes are eligible for tracing.
    pub whitelist: Vec<String>,
    /// Roles excluded from tracing.
    pub exclude_roles: Vec<String>,
    /// Optional minimum SNR required to trace a node.
    pub min_snr_threshold: Option<MinSnrThreshold>,
    /// Whether state is persisted to disk at all.
    pub state_persistence_enabled: bool,
    /// Path to the JSON snapshot file.
    pub state_file_path: String,
    /// Cadence of the persistence snapshot loop.
    pub auto_save_interval_minutes: AutoSaveIntervalMinutes,
    /// Per-node history cap.
    pub history_per_node: HistoryPerNode,
    /// Whether outbound probes this gateway originates are forwarded to
    /// the message router. Inbound response forwarding is never gated
    /// by this flag (see `SPEC_FULL.md` §3).
    pub forward_to_router: bool,
    /// Quiet-hours window.
    pub quiet_hours: QuietHoursConfig,
    /// Congestion detection.
    pub congestion_detection: CongestionConfig,
    /// Emergency-stop behavior.
    pub emergency_stop: EmergencyStopConfig,
    /// Ambient logging verbosity.
    pub logging: LoggingConfig,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            traceroutes_per_minute: TraceroutesPerMinute::try_new(1.0).expect("in range"),
            burst_multiplier: BurstMultiplier::try_new(2.0).expect("in range"),
            queue_max_size: QueueMaxSize::try_new(500).expect("in range"),
            queue_overflow_strategy: QueueOverflowStrategy::default(),
            clear_queue_on_startup: false,
            recheck_interval_hours: RecheckIntervalHours::try_new(6.0).expect("in range"),
            recheck_enabled: true,
            max_hops: MaxHops::try_new(7).expect("in range"),
            timeout_seconds: TimeoutSeconds::try_new(60.0).expect("in range"),
            max_retries: MaxRetries::try_new(3).expect("in range"),
            retry_backoff_multiplier: RetryBackoffMultiplier::try_new(2.0).expect("in range"),
            initial_discovery_enabled: false,
            startup_delay_seconds: StartupDelaySeconds::try_new(60.0).expect("in range"),
            skip_direct_nodes: true,
            blacklist: Vec::new(),
            whitelist: Vec::new(),
            exclude_roles: vec!["CLIENT".to_string()],
            min_snr_threshold: None,
            state_persistence_enabled: true,
            state_file_path: "data/traceroute_state.json".to_string(),
            auto_save_interval_minutes: AutoSaveIntervalMinutes::try_new(5.0).expect("in range"),
            history_per_node: HistoryPerNode::try_new(10).expect("in range"),
            forward_to_router: true,
            quiet_hours: QuietHoursConfig::default(),
            congestion_detection: CongestionConfig::default(),
            emergency_stop: EmergencyStopConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MapperConfig {
    /// Validates cross-field consistency that individual newtypes cannot
    /// express: the quiet-hours `HH:MM` strings must actually parse.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::ConfigInvalid` if a quiet-hours time string
    /// is malformed.
    pub fn validate(&self) -> MapperResult<()> {
        if self.quiet_hours.enabled {
            parse_hhmm(&self.quiet_hours.start_time)?;
            parse_hhmm(&self.quiet_hours.end_time)?;
        }
        Ok(())
    }
}

/// Parses an `HH:MM` string into minutes-since-midnight.
///
/// # Errors
///
/// Returns `MapperError::ConfigInvalid` if the string is not a valid
/// `HH:MM` time.
pub fn parse_hhmm(s: &str) -> MapperResult<u32> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| MapperError::ConfigInvalid(format!("invalid HH:MM time: {s}")))?;
    let h: u32 = h
        .parse()
        .map_err(|_| MapperError::ConfigInvalid(format!("invalid hour in: {s}")))?;
    let m: u32 = m
        .parse()
        .map_err(|_| MapperError::ConfigInvalid(format!("invalid minute in: {s}")))?;
    if h > 23 || m > 59 {
        return Err(MapperError::ConfigInvalid(format!(
            "time out of range: {s}"
        )));
    }
    Ok(h * 60 + m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(MapperConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_malformed_quiet_hours() {
        let mut config = MapperConfig::default();
        config.quiet_hours.enabled = true;
        config.quiet_hours.start_time = "25:99".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_hhmm_roundtrip() {
        assert_eq!(parse_hhmm("00:00").unwrap(), 0);
        assert_eq!(parse_hhmm("23:59").unwrap(), 23 * 60 + 59);
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("bad").is_err());
    }
}
