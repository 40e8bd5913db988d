//! Domain types for the traceroute mapper
//!
//! Validated newtypes to prevent primitive obsession, following the same
//! `nutype`-based approach the teacher crate uses for its own domain
//! values.

use nutype::nutype;
use serde::{Deserialize, Serialize};

/// Opaque mesh node identifier; the unique key for `NodeState`,
/// `TracerouteRequest`, and `PendingTraceroute`.
#[nutype(
    validate(len_char_min = 1),
    derive(
        Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into, AsRef
    )
)]
pub struct NodeId(String);

/// Unique identifier for an in-flight traceroute request/correlation.
#[nutype(
    validate(len_char_min = 1),
    derive(
        Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into, AsRef
    )
)]
pub struct RequestId(String);

impl RequestId {
    /// Generates a fresh, random request id.
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(uuid::Uuid::new_v4().to_string()).expect("uuid is never empty")
    }
}

/// Queue/probe priority. 1 is highest importance, 10 is lowest, per the
/// priority-level convention in `spec.md` §4.2.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct Priority(u8);

/// Enumerated priority levels from `spec.md` §4.2. Callers should use
/// these constructors rather than inventing new priority values; the
/// queue itself does not interpret priority semantics.
impl Priority {
    /// Newly discovered indirect node.
    #[must_use]
    pub fn new_indirect_node() -> Self {
        Self::try_new(1).expect("within range")
    }

    /// Critical / manually requested trace.
    #[must_use]
    pub fn critical() -> Self {
        Self::try_new(2).expect("within range")
    }

    /// Node back online after being marked offline.
    #[must_use]
    pub fn node_back_online() -> Self {
        Self::try_new(4).expect("within range")
    }

    /// Topology change detected.
    #[must_use]
    pub fn topology_change() -> Self {
        Self::try_new(6).expect("within range")
    }

    /// Periodic recheck of a previously traced node.
    #[must_use]
    pub fn periodic_recheck() -> Self {
        Self::try_new(8).expect("within range")
    }

    /// Low-priority background discovery.
    #[must_use]
    pub fn background_discovery() -> Self {
        Self::try_new(10).expect("within range")
    }
}

/// Signal-to-noise ratio, in dB, as reported by the radio layer.
#[nutype(
    validate(greater_or_equal = -30.0, less_or_equal = 20.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Into)
)]
pub struct Snr(f64);
