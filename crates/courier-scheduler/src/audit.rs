//! Audit event model — the write-only trail of delivery, read/reply, and
//! rule-fire decisions.
//!
//! Each event type carries only the fields it needs as a tagged variant; the
//! `metadata` map is the escape hatch for genuinely open-ended data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{MessageRecord, MessageStatus};

/// One audit entry. `reference_id` is the message id the event belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub reference_id: String,
    pub user_id: String,
    pub timestamp_utc: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: AuditKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Tagged per-event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditKind {
    MessageDelivery {
        sender_id: String,
        receiver_id: String,
        status: MessageStatus,
        sender_local: String,
        receiver_local: String,
    },
    MessageRead {
        sender_id: String,
        receiver_id: String,
    },
    MessageReplied {
        sender_id: String,
        receiver_id: String,
    },
    RuleFired {
        rule: String,
        action: String,
        description: String,
    },
}

impl AuditKind {
    /// Stable event-type tag, matching the serialized form.
    pub fn type_tag(&self) -> &'static str {
        match self {
            AuditKind::MessageDelivery { .. } => "message_delivery",
            AuditKind::MessageRead { .. } => "message_read",
            AuditKind::MessageReplied { .. } => "message_replied",
            AuditKind::RuleFired { .. } => "rule_fired",
        }
    }
}

impl AuditEvent {
    fn new(reference_id: &str, user_id: &str, timestamp_utc: DateTime<Utc>, kind: AuditKind) -> Self {
        Self {
            id: format!("audit-{}", Uuid::new_v4()),
            reference_id: reference_id.to_string(),
            user_id: user_id.to_string(),
            timestamp_utc,
            kind,
            metadata: BTreeMap::new(),
        }
    }

    /// Delivery decision for a freshly accepted message. Attributed to the
    /// receiver, like every message event.
    pub fn delivery(record: &MessageRecord) -> Self {
        Self::new(
            &record.id,
            &record.receiver_id,
            record.created_at,
            AuditKind::MessageDelivery {
                sender_id: record.sender_id.clone(),
                receiver_id: record.receiver_id.clone(),
                status: record.status,
                sender_local: record.sender_local_time.clone(),
                receiver_local: record.receiver_local_time.clone(),
            },
        )
    }

    pub fn read(record: &MessageRecord, at: DateTime<Utc>) -> Self {
        Self::new(
            &record.id,
            &record.receiver_id,
            at,
            AuditKind::MessageRead {
                sender_id: record.sender_id.clone(),
                receiver_id: record.receiver_id.clone(),
            },
        )
    }

    pub fn replied(record: &MessageRecord, at: DateTime<Utc>) -> Self {
        Self::new(
            &record.id,
            &record.receiver_id,
            at,
            AuditKind::MessageReplied {
                sender_id: record.sender_id.clone(),
                receiver_id: record.receiver_id.clone(),
            },
        )
    }

    /// A behavior rule fired its one-shot action. Attributed to the party the
    /// action targets.
    pub fn rule_fired(
        message_id: &str,
        target_user: &str,
        rule: &str,
        action: &str,
        description: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            message_id,
            target_user,
            at,
            AuditKind::RuleFired {
                rule: rule.to_string(),
                action: action.to_string(),
                description: description.to_string(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_tag() {
        let ev = AuditEvent::rule_fired("msg-1", "user_b", "unread_nudge", "receiver_nudge", "d", Utc::now());
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "rule_fired");
        assert_eq!(json["rule"], "unread_nudge");
        assert_eq!(ev.kind.type_tag(), "rule_fired");
    }
}
