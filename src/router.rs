//! The external message-router boundary.
//!
//! `spec.md` §1/§6 places the actual wire transmission and broker
//! publication out of scope: this crate only depends on a narrow trait,
//! grounded on the teacher's own `message_router::traits::MessageRouter`
//! trait-boundary pattern (a `Send + Sync` async trait object the
//! orchestrator holds behind an `Arc`).

use crate::message::Packet;
use async_trait::async_trait;

/// The external collaborator that performs wire transmission and
/// downstream fan-out (e.g. broker publication).
#[async_trait]
pub trait MessageRouter: Send + Sync + std::fmt::Debug {
    /// Attempts to transmit and fan out `packet`. Returns whether the
    /// attempt succeeded; failures are recorded as health failures by
    /// the orchestrator (`spec.md` §7, `SendFailure`) and never panic or
    /// propagate as a crate-level error.
    async fn send_message(&self, packet: Packet) -> bool;
}

/// Shared handle to a router implementation.
pub type SharedMessageRouter = std::sync::Arc<dyn MessageRouter>;

/// A router stub that records every packet it was asked to send and
/// always reports success, used by tests and the `mapperctl` demo
/// binary. Production deployments supply their own `MessageRouter`
/// implementation that performs real wire transmission.
#[derive(Debug, Default)]
pub struct StubMessageRouter {
    sent: std::sync::Mutex<Vec<Packet>>,
    fail_next: std::sync::atomic::AtomicBool,
}

impl StubMessageRouter {
    /// Creates a new, empty stub router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of every packet handed to `send_message` so far,
    /// in order.
    #[must_use]
    pub fn sent_packets(&self) -> Vec<Packet> {
        self.sent.lock().expect("stub router poisoned").clone()
    }

    /// Causes the next `send_message` call to report failure without
    /// recording the packet.
    pub fn fail_next_send(&self) {
        self.fail_next.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageRouter for StubMessageRouter {
    async fn send_message(&self, packet: Packet) -> bool {
        if self
            .fail_next
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return false;
        }
        self.sent.lock().expect("stub router poisoned").push(packet);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use std::collections::HashMap;

    fn packet(id: &str) -> Packet {
        Packet {
            id: id.to_string(),
            sender_id: None,
            recipient_id: None,
            message_type: MessageType::Text,
            content: String::new(),
            hop_limit: 1,
            hop_count: None,
            snr: None,
            rssi: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn stub_records_sent_packets() {
        let router = StubMessageRouter::new();
        assert!(router.send_message(packet("a")).await);
        assert!(router.send_message(packet("b")).await);
        assert_eq!(router.sent_packets().len(), 2);
    }

    #[tokio::test]
    async fn stub_can_be_made_to_fail_once() {
        let router = StubMessageRouter::new();
        router.fail_next_send();
        assert!(!router.send_message(packet("a")).await);
        assert!(router.sent_packets().is_empty());
        assert!(router.send_message(packet("b")).await);
        assert_eq!(router.sent_packets().len(), 1);
    }
}
