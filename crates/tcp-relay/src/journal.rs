use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use relay_engine::{SessionEvent, SessionObserver};

use crate::rules::RuleId;

/// Forwards one rule's session events into the journal.
///
/// Runs on the engine's thread, so entries go through the sink's
/// non-blocking path.
pub struct JournalObserver {
    rule: RuleId,
    sink: AuditSink,
}

impl JournalObserver {
    pub fn new(rule: RuleId, sink: AuditSink) -> Self {
        Self { rule, sink }
    }
}

impl SessionObserver for JournalObserver {
    fn on_event(&self, event: &SessionEvent) {
        self.sink.record(session_entry(self.rule, event));
    }
}

/// Build the journal entry for a session event of rule `rule`.
pub fn session_entry(rule: RuleId, event: &SessionEvent) -> AuditEntry {
    let source = AuditSource::new("engine").with_rule(rule);
    let (event_type, source) = match event {
        SessionEvent::Opened { session, peer } => (
            AuditEventType::SessionOpened,
            source.with_session(*session).with_peer(peer),
        ),
        SessionEvent::Established { session, peer } => (
            AuditEventType::SessionEstablished,
            source.with_session(*session).with_peer(peer),
        ),
        SessionEvent::ConnectFailed { peer, .. } => {
            (AuditEventType::ConnectFailed, source.with_peer(peer))
        }
        SessionEvent::Closed { session, peer, .. } => (
            AuditEventType::SessionClosed,
            source.with_session(*session).with_peer(peer),
        ),
        SessionEvent::Inconsistency { session, .. } => {
            (AuditEventType::Inconsistency, source.with_session(*session))
        }
    };
    let details = serde_json::to_value(event).unwrap_or_default();
    AuditEntry::new(event_type, source, details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_engine::{CloseReason, Traffic};

    #[test]
    fn closed_session_keeps_reason_and_traffic() {
        let event = SessionEvent::Closed {
            session: 4,
            peer: "127.0.0.1:40000".parse().unwrap(),
            reason: CloseReason::Idle,
            traffic: Traffic {
                upstream: 12,
                downstream: 34,
            },
        };
        let entry = session_entry(2, &event);

        assert_eq!(entry.event_type, AuditEventType::SessionClosed);
        assert_eq!(entry.source.rule_id, Some(2));
        assert_eq!(entry.source.session_id, Some(4));
        assert_eq!(entry.source.peer.as_deref(), Some("127.0.0.1:40000"));
        assert_eq!(entry.details["reason"]["kind"], "idle");
        assert_eq!(entry.details["traffic"]["upstream"], 12);
    }

    #[test]
    fn connect_failure_has_no_session() {
        let event = SessionEvent::ConnectFailed {
            peer: "127.0.0.1:40001".parse().unwrap(),
            error: "connection refused".into(),
        };
        let entry = session_entry(1, &event);

        assert_eq!(entry.event_type, AuditEventType::ConnectFailed);
        assert_eq!(entry.source.session_id, None);
        assert_eq!(entry.details["error"], "connection refused");
    }

    #[tokio::test]
    async fn observer_writes_through_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let (sink, handle) = AuditSink::start(&path).await.unwrap();

        let observer = JournalObserver::new(9, sink);
        observer.on_event(&SessionEvent::Inconsistency {
            session: 3,
            detail: "close for unregistered session".into(),
        });
        drop(observer);
        handle.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let entry: AuditEntry = serde_json::from_str(contents.trim_end()).unwrap();
        assert_eq!(entry.event_type, AuditEventType::Inconsistency);
        assert_eq!(entry.source.rule_id, Some(9));
    }
}
