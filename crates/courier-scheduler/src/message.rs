//! Message records and lifecycle state — the core data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery status stamped when the record is created. Terminal for
/// creation — later lifecycle (read/replied) lives in
/// [`MessageLifecycleState`] and is folded in via [`MessageRecord::derived_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Delayed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Delayed => "delayed",
        }
    }
}

/// One scheduled or sent message with its dual-time stamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub sender_timezone: String,
    pub receiver_timezone: String,
    pub sender_local_time: String,
    pub receiver_local_time: String,
    pub utc_time: DateTime<Utc>,
    pub status: MessageStatus,
    pub scheduled_for_utc: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new_id() -> String {
        format!("msg-{}", Uuid::new_v4())
    }

    /// External status: replied > read > delivered > creation status.
    pub fn derived_status(&self, state: Option<&MessageLifecycleState>) -> DerivedStatus {
        match state {
            Some(s) if s.replied_at_utc.is_some() => DerivedStatus::Replied,
            Some(s) if s.read_at_utc.is_some() => DerivedStatus::Read,
            Some(s) if s.delivered_at_utc.is_some() => DerivedStatus::Delivered,
            _ => match self.status {
                MessageStatus::Pending => DerivedStatus::Pending,
                MessageStatus::Delivered => DerivedStatus::Delivered,
                MessageStatus::Delayed => DerivedStatus::Delayed,
            },
        }
    }
}

/// Externally visible, computed message status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivedStatus {
    Pending,
    Delayed,
    Delivered,
    Read,
    Replied,
}

/// Mutable per-message lifecycle, one-to-one with [`MessageRecord`] and
/// created in the same transaction.
///
/// Invariant: each `*_sent` flag transitions false→true exactly once and is
/// never reset — the at-most-once guarantee the rule engine relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageLifecycleState {
    pub message_id: String,
    pub delivered_at_utc: Option<DateTime<Utc>>,
    pub read_at_utc: Option<DateTime<Utc>>,
    pub replied_at_utc: Option<DateTime<Utc>>,
    pub unread_nudge_sent: bool,
    pub reminder_sent: bool,
    pub follow_up_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MessageLifecycleState {
    /// Paired state for a freshly created record. `delivered_at_utc` is
    /// pre-set only when the message went out immediately.
    pub fn for_message(record: &MessageRecord) -> Self {
        Self {
            message_id: record.id.clone(),
            delivered_at_utc: match record.status {
                MessageStatus::Delivered => Some(record.utc_time),
                _ => None,
            },
            read_at_utc: None,
            replied_at_utc: None,
            unread_nudge_sent: false,
            reminder_sent: false,
            follow_up_sent: false,
            created_at: record.created_at,
            updated_at: None,
        }
    }
}
