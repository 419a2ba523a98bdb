use serde::{Deserialize, Serialize};

/// One journal record describing something that happened to a rule or a
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: AuditEventType,
    pub source: AuditSource,
    pub details: serde_json::Value,
}

impl AuditEntry {
    /// Create a new `AuditEntry` with an auto-generated UUID v4 and the current
    /// UTC timestamp.
    pub fn new(
        event_type: AuditEventType,
        source: AuditSource,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            source,
            details,
        }
    }
}

/// The category of event being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    RuleStarted,
    RuleStopped,
    RuleFailed,
    SessionOpened,
    SessionEstablished,
    SessionClosed,
    ConnectFailed,
    Inconsistency,
}

/// Where an event came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSource {
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
}

impl AuditSource {
    /// Convenience constructor that only requires the component name. All
    /// optional fields default to `None`.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ..Self::default()
        }
    }

    pub fn with_rule(mut self, rule_id: u64) -> Self {
        self.rule_id = Some(rule_id);
        self
    }

    pub fn with_session(mut self, session_id: u64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_peer(mut self, peer: impl ToString) -> Self {
        self.peer = Some(peer.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_snake_case_and_skips_empty_fields() {
        let entry = AuditEntry::new(
            AuditEventType::SessionClosed,
            AuditSource::new("engine").with_rule(2).with_session(7),
            serde_json::json!({"reason": "idle"}),
        );
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["event_type"], "session_closed");
        assert_eq!(json["source"]["component"], "engine");
        assert_eq!(json["source"]["rule_id"], 2);
        assert_eq!(json["source"]["session_id"], 7);
        assert!(json["source"].get("peer").is_none());
        assert_eq!(json["details"]["reason"], "idle");
    }

    #[test]
    fn entry_round_trips_through_json() {
        let entry = AuditEntry::new(
            AuditEventType::ConnectFailed,
            AuditSource::new("engine").with_peer("127.0.0.1:4000"),
            serde_json::Value::Null,
        );
        let line = serde_json::to_string(&entry).unwrap();
        let back: AuditEntry = serde_json::from_str(&line).unwrap();

        assert_eq!(back.id, entry.id);
        assert_eq!(back.event_type, AuditEventType::ConnectFailed);
        assert_eq!(back.source, entry.source);
    }
}
