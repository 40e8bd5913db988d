//! # `traceroute_mapper`
//!
//! Policy and coordination engine for automatic mesh traceroute discovery
//! and monitoring. This crate decides *which* nodes to trace, *when*,
//! and *how fast*, given a stream of observed mesh packets; the actual
//! radio transmission and MQTT publication are delegated to an external
//! [`router::MessageRouter`] implementation (see `SPEC_FULL.md` §6).
//!
//! ## Components
//!
//! - [`node_tracker`] — tracks direct/indirect node state and trace
//!   eligibility.
//! - [`priority_queue`] — bounded, duplicate-suppressing work queue.
//! - [`rate_limiter`] — token-bucket gate on outbound probe rate.
//! - [`traceroute_manager`] — builds probes and correlates responses.
//! - [`health_monitor`] — congestion and emergency-stop policy.
//! - [`persistence`] — durable snapshot of node state and history.
//! - [`orchestrator`] — wires the above into the running system.

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod health_monitor;
pub mod message;
pub mod node_tracker;
pub mod orchestrator;
pub mod persistence;
pub mod priority_queue;
pub mod rate_limiter;
pub mod router;
pub mod traceroute_manager;

pub use clock::{Clock, SharedClock};
pub use config::MapperConfig;
pub use domain::{NodeId, Priority, RequestId, Snr};
pub use error::{MapperError, MapperResult};
pub use health_monitor::NetworkHealthMonitor;
pub use message::{MessageType, Packet};
pub use node_tracker::NodeTracker;
pub use orchestrator::TracerouteMapper;
pub use persistence::StatePersistence;
pub use priority_queue::PriorityQueue;
pub use rate_limiter::RateLimiter;
pub use router::{MessageRouter, SharedMessageRouter};
pub use traceroute_manager::TracerouteManager;
