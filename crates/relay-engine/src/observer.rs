use std::net::SocketAddr;

use serde::Serialize;

use crate::session::{CloseReason, SessionId, Traffic};

/// Lifecycle event of one session, reported to a [`SessionObserver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A client was accepted and the outbound connect was issued.
    Opened { session: SessionId, peer: SocketAddr },
    /// The outbound connection completed; bytes may flow.
    Established { session: SessionId, peer: SocketAddr },
    /// The outbound connect could not even be issued. No session exists.
    ConnectFailed { peer: SocketAddr, error: String },
    /// The session was torn down.
    Closed {
        session: SessionId,
        peer: SocketAddr,
        reason: CloseReason,
        traffic: Traffic,
    },
    /// Bookkeeping disagreed with itself. The engine contained it and kept
    /// running, but it points at a bug.
    Inconsistency { session: SessionId, detail: String },
}

/// Receives session events from an engine.
///
/// Called synchronously on the engine's own thread, between readiness
/// events. Implementations must not block; hand the event off instead.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Observer that discards every event. Engines use it by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_event_carries_reason_and_traffic() {
        let event = SessionEvent::Closed {
            session: 3,
            peer: "127.0.0.1:5555".parse().unwrap(),
            reason: CloseReason::Idle,
            traffic: Traffic {
                upstream: 10,
                downstream: 20,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "closed");
        assert_eq!(json["session"], 3);
        assert_eq!(json["reason"]["kind"], "idle");
        assert_eq!(json["traffic"]["downstream"], 20);
    }
}
