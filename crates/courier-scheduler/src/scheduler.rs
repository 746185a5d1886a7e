//! Message scheduling — the send/schedule entry points.
//!
//! The scheduler resolves both parties, stamps dual-time strings, applies the
//! receiver's active-hours window, and persists the record plus its paired
//! lifecycle state in the correct initial status. Nothing is ever transmitted;
//! a "delivered" message is a persisted decision, not a network call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use courier_core::{CourierError, Result};

use crate::active_hours::DeliveryPolicy;
use crate::audit::AuditEvent;
use crate::clock;
use crate::message::{DerivedStatus, MessageLifecycleState, MessageRecord, MessageStatus};
use crate::store::{ActiveHoursStore, AuditSink, LifecycleStore, MessageStore, UserDirectory};

/// Computed status view for one message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageStatusView {
    pub message_id: String,
    pub status: DerivedStatus,
    pub delivered_at_utc: Option<String>,
    pub read_at_utc: Option<String>,
    pub replied_at_utc: Option<String>,
}

pub struct MessageScheduler {
    directory: Arc<dyn UserDirectory>,
    active_hours: Arc<dyn ActiveHoursStore>,
    messages: Arc<dyn MessageStore>,
    lifecycle: Arc<dyn LifecycleStore>,
    audit: Arc<dyn AuditSink>,
    policy: DeliveryPolicy,
}

impl MessageScheduler {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        active_hours: Arc<dyn ActiveHoursStore>,
        messages: Arc<dyn MessageStore>,
        lifecycle: Arc<dyn LifecycleStore>,
        audit: Arc<dyn AuditSink>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            directory,
            active_hours,
            messages,
            lifecycle,
            audit,
            policy,
        }
    }

    /// Send immediately. Delivered if the receiver is inside their window at
    /// `now_utc`, otherwise Delayed with a concrete next slot — a delayed
    /// message is always persisted, never dropped.
    pub fn send_now(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        now_utc: DateTime<Utc>,
    ) -> Result<MessageRecord> {
        let (sender_tz, receiver_tz) = self.resolve_parties(sender_id, receiver_id)?;

        let slot = match self.active_hours.get(receiver_id) {
            Some(hours) => Some(self.policy.next_allowed_delivery(now_utc, &receiver_tz, &hours)),
            None => None,
        };
        let (status, scheduled_for_utc) = match &slot {
            Some(s) if s.is_delayed => (MessageStatus::Delayed, Some(s.utc)),
            _ => (MessageStatus::Delivered, None),
        };

        let record = self.build_record(
            sender_id,
            receiver_id,
            content,
            &sender_tz,
            &receiver_tz,
            now_utc,
            now_utc,
            status,
            scheduled_for_utc,
        );
        self.persist(&record)?;

        match status {
            MessageStatus::Delayed => tracing::info!(
                "📨 Message {} delayed until {} ({} local for {})",
                record.id,
                clock::utc_string(scheduled_for_utc.unwrap_or(now_utc)),
                slot.map(|s| s.local_time).unwrap_or_default(),
                receiver_id,
            ),
            _ => tracing::info!("📨 Message {} delivered to {}", record.id, receiver_id),
        }
        Ok(record)
    }

    /// Schedule for a wall-clock time in the *sender's* timezone. The target
    /// is converted to UTC, then the receiver's window is checked against the
    /// converted instant — outside the window shifts it further to the next
    /// allowed slot.
    pub fn schedule(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        deliver_at_local: &str,
        now_utc: DateTime<Utc>,
    ) -> Result<MessageRecord> {
        let (sender_tz, receiver_tz) = self.resolve_parties(sender_id, receiver_id)?;

        let naive = clock::parse_local_timestamp(deliver_at_local)
            .ok_or_else(|| CourierError::InvalidTimestamp(deliver_at_local.to_string()))?;
        let target_utc = clock::local_to_utc(naive, &sender_tz);

        let slot = match self.active_hours.get(receiver_id) {
            Some(hours) => Some(self.policy.next_allowed_delivery(target_utc, &receiver_tz, &hours)),
            None => None,
        };
        let (status, scheduled_for_utc) = match &slot {
            Some(s) if s.is_delayed => (MessageStatus::Delayed, Some(s.utc)),
            _ => (MessageStatus::Pending, Some(target_utc)),
        };

        let record = self.build_record(
            sender_id,
            receiver_id,
            content,
            &sender_tz,
            &receiver_tz,
            target_utc,
            now_utc,
            status,
            scheduled_for_utc,
        );
        self.persist(&record)?;

        tracing::info!(
            "📨 Message {} scheduled for {} ({})",
            record.id,
            clock::utc_string(scheduled_for_utc.unwrap_or(target_utc)),
            record.status.as_str(),
        );
        Ok(record)
    }

    /// Mark a pending/delayed message as having gone out.
    pub fn mark_delivered(&self, message_id: &str, at: DateTime<Utc>) -> Result<MessageStatusView> {
        let record = self.find_record(message_id)?;
        let mut state = self.find_or_seed_state(&record);
        if state.delivered_at_utc.is_none() {
            state.delivered_at_utc = Some(at);
            state.updated_at = Some(at);
            self.lifecycle.update(&state)?;
        }
        Ok(Self::status_view(&record, Some(&state)))
    }

    pub fn mark_read(&self, message_id: &str, at: DateTime<Utc>) -> Result<MessageStatusView> {
        let record = self.find_record(message_id)?;
        let mut state = self.find_or_seed_state(&record);
        if state.read_at_utc.is_none() {
            state.read_at_utc = Some(at);
            state.updated_at = Some(at);
            self.lifecycle.update(&state)?;
            self.audit.record(AuditEvent::read(&record, at));
        }
        Ok(Self::status_view(&record, Some(&state)))
    }

    /// A reply implies the message was read.
    pub fn mark_replied(&self, message_id: &str, at: DateTime<Utc>) -> Result<MessageStatusView> {
        let record = self.find_record(message_id)?;
        let mut state = self.find_or_seed_state(&record);
        if state.replied_at_utc.is_none() {
            state.replied_at_utc = Some(at);
            if state.read_at_utc.is_none() {
                state.read_at_utc = Some(at);
            }
            state.updated_at = Some(at);
            self.lifecycle.update(&state)?;
            self.audit.record(AuditEvent::replied(&record, at));
        }
        Ok(Self::status_view(&record, Some(&state)))
    }

    /// Computed status per the replied > read > delivered priority.
    pub fn message_status(&self, message_id: &str) -> Result<MessageStatusView> {
        let record = self.find_record(message_id)?;
        let state = self.lifecycle.find(message_id);
        Ok(Self::status_view(&record, state.as_ref()))
    }

    fn resolve_parties(&self, sender_id: &str, receiver_id: &str) -> Result<(String, String)> {
        let sender_tz = self
            .directory
            .find_timezone(sender_id)
            .ok_or_else(|| CourierError::InvalidParticipant(sender_id.to_string()))?;
        let receiver_tz = self
            .directory
            .find_timezone(receiver_id)
            .ok_or_else(|| CourierError::InvalidParticipant(receiver_id.to_string()))?;
        Ok((sender_tz, receiver_tz))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_record(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        sender_tz: &str,
        receiver_tz: &str,
        utc_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
        status: MessageStatus,
        scheduled_for_utc: Option<DateTime<Utc>>,
    ) -> MessageRecord {
        let dual = clock::dual_time(sender_tz, receiver_tz, utc_time);
        MessageRecord {
            id: MessageRecord::new_id(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            sender_timezone: sender_tz.to_string(),
            receiver_timezone: receiver_tz.to_string(),
            sender_local_time: dual.sender_local,
            receiver_local_time: dual.receiver_local,
            utc_time,
            status,
            scheduled_for_utc,
            created_at,
        }
    }

    /// Record and paired state land together, then the audit event. An audit
    /// failure never rolls the operation back.
    fn persist(&self, record: &MessageRecord) -> Result<()> {
        self.messages.create(record)?;
        self.lifecycle
            .create(&MessageLifecycleState::for_message(record))?;
        self.audit.record(AuditEvent::delivery(record));
        Ok(())
    }

    fn find_record(&self, message_id: &str) -> Result<MessageRecord> {
        self.messages
            .find(message_id)
            .ok_or_else(|| CourierError::MessageNotFound(message_id.to_string()))
    }

    /// Lifecycle state is created alongside the record, but a missing row is
    /// repaired rather than treated as fatal.
    fn find_or_seed_state(&self, record: &MessageRecord) -> MessageLifecycleState {
        self.lifecycle
            .find(&record.id)
            .unwrap_or_else(|| MessageLifecycleState::for_message(record))
    }

    fn status_view(
        record: &MessageRecord,
        state: Option<&MessageLifecycleState>,
    ) -> MessageStatusView {
        MessageStatusView {
            message_id: record.id.clone(),
            status: record.derived_status(state),
            delivered_at_utc: state
                .and_then(|s| s.delivered_at_utc)
                .map(clock::utc_string),
            read_at_utc: state.and_then(|s| s.read_at_utc).map(clock::utc_string),
            replied_at_utc: state.and_then(|s| s.replied_at_utc).map(clock::utc_string),
        }
    }
}
