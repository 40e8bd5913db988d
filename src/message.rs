//! The mesh packet schema shared with the external message router.
//!
//! `spec.md` §6 specifies this shape as the boundary contract: the core
//! both consumes packets delivered by the router and produces packets
//! (probes) handed back to it. The `metadata` map is deliberately
//! extensible (`serde_json::Value`), mirroring how the teacher's FIPA
//! message type keeps an open `content: serde_json::Value` field for the
//! same reason.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coarse classification of a mesh packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Plain text payload.
    Text,
    /// Routing-layer control message, including traceroute probes and
    /// responses.
    Routing,
    /// Anything else the radio layer hands us; preserved for forwarding
    /// but never a traceroute probe or response.
    #[serde(other)]
    Other,
}

/// A mesh packet, as delivered by or sent to the external router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    /// Packet identifier assigned by the radio layer or this crate.
    pub id: String,
    /// Originating node, if known.
    pub sender_id: Option<String>,
    /// Destination node.
    pub recipient_id: Option<String>,
    /// Coarse message classification.
    pub message_type: MessageType,
    /// Opaque payload; empty for probes.
    pub content: String,
    /// Hop limit the radio layer should enforce.
    pub hop_limit: u8,
    /// Hops already traversed, as reported by the radio layer.
    pub hop_count: Option<u8>,
    /// Signal-to-noise ratio of the last hop, if available.
    pub snr: Option<f64>,
    /// Received signal strength of the last hop, if available.
    pub rssi: Option<i32>,
    /// Extensible metadata bag. Traceroute probes/responses use the
    /// well-known keys documented on the helpers below.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Well-known metadata keys used by traceroute probes and responses.
pub mod metadata_keys {
    /// Set on outbound probes: the responder should reply with a route.
    pub const WANT_RESPONSE: &str = "want_response";
    /// Set on outbound probes: marks the probe as route-discovery traffic.
    pub const ROUTE_DISCOVERY: &str = "route_discovery";
    /// Set on both probes and responses: marks this as traceroute traffic.
    pub const TRACEROUTE: &str = "traceroute";
    /// Correlates a response back to the probe that caused it.
    pub const REQUEST_ID: &str = "request_id";
    /// Present on a traceroute response: the ordered hop list.
    pub const ROUTE: &str = "route";
    /// Advertised node role, when the radio layer reports one.
    pub const ROLE: &str = "role";
    /// Explicit neighbor-table flag, when the radio layer reports one.
    pub const IS_NEIGHBOR: &str = "is_neighbor";
}

impl Packet {
    /// Builds the outbound probe packet described by `spec.md` §4.4/§6:
    /// a `ROUTING` message addressed to `recipient`, hop-limited to
    /// `max_hops`, flagged as a traceroute route-discovery request
    /// carrying `request_id` for correlation.
    #[must_use]
    pub fn traceroute_probe(id: String, recipient: &str, max_hops: u8, request_id: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(metadata_keys::WANT_RESPONSE.to_string(), true.into());
        metadata.insert(metadata_keys::ROUTE_DISCOVERY.to_string(), true.into());
        metadata.insert(metadata_keys::TRACEROUTE.to_string(), true.into());
        metadata.insert(
            metadata_keys::REQUEST_ID.to_string(),
            request_id.to_string().into(),
        );
        Self {
            id,
            sender_id: None,
            recipient_id: Some(recipient.to_string()),
            message_type: MessageType::Routing,
            content: String::new(),
            hop_limit: max_hops,
            hop_count: None,
            snr: None,
            rssi: None,
            metadata,
        }
    }

    /// Whether this packet is recognizable as a traceroute response per
    /// `spec.md` §6: `ROUTING` type, `metadata.traceroute == true`, and
    /// `metadata.route` present.
    #[must_use]
    pub fn is_traceroute_response(&self) -> bool {
        self.message_type == MessageType::Routing
            && self
                .metadata
                .get(metadata_keys::TRACEROUTE)
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
            && self.metadata.contains_key(metadata_keys::ROUTE)
    }

    /// The `request_id` metadata value, if present and a string.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.metadata
            .get(metadata_keys::REQUEST_ID)
            .and_then(serde_json::Value::as_str)
    }

    /// The `route` metadata value as an ordered list of hop descriptors,
    /// if present.
    #[must_use]
    pub fn route(&self) -> Option<&Vec<serde_json::Value>> {
        self.metadata.get(metadata_keys::ROUTE).and_then(serde_json::Value::as_array)
    }

    /// The advertised `role` metadata value, if present and a string.
    #[must_use]
    pub fn role(&self) -> Option<&str> {
        self.metadata.get(metadata_keys::ROLE).and_then(serde_json::Value::as_str)
    }

    /// Whether the radio layer flagged the sender as an explicit
    /// neighbor-table entry, per `metadata.is_neighbor`.
    #[must_use]
    pub fn is_neighbor(&self) -> bool {
        self.metadata
            .get(metadata_keys::IS_NEIGHBOR)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_carries_required_metadata() {
        let p = Packet::traceroute_probe("id-1".to_string(), "!abc", 7, "req-1");
        assert_eq!(p.message_type, MessageType::Routing);
        assert_eq!(p.hop_limit, 7);
        assert_eq!(p.request_id(), Some("req-1"));
        assert!(!p.is_traceroute_response()); // no route yet
    }

    #[test]
    fn response_recognition_requires_all_three_conditions() {
        let mut p = Packet::traceroute_probe("id-2".to_string(), "!abc", 7, "req-2");
        assert!(!p.is_traceroute_response());

        p.metadata.insert(
            metadata_keys::ROUTE.to_string(),
            serde_json::json!(["!gw", "!r1", "!abc"]),
        );
        assert!(p.is_traceroute_response());

        p.message_type = MessageType::Text;
        assert!(!p.is_traceroute_response());
    }

    #[test]
    fn unknown_message_type_deserializes_as_other() {
        let json = serde_json::json!({
            "id": "x", "sender_id": null, "recipient_id": null,
            "message_type": "TELEMETRY", "content": "", "hop_limit": 1,
            "hop_count": null, "snr": null, "rssi": null, "metadata": {}
        });
        let p: Packet = serde_json::from_value(json).unwrap();
        assert_eq!(p.message_type, MessageType::Other);
    }
}
