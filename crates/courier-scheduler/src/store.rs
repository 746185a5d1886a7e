//! Store contracts and in-memory implementations.
//!
//! Every collaborator the scheduler and evaluator touch is reached through
//! one of these handles, injected at construction — no process-wide state.
//! The in-memory variants back tests and demos; [`crate::persistence`]
//! provides the durable SQLite versions of the same contracts.

use std::collections::HashMap;
use std::sync::Mutex;

use courier_core::Result;

use crate::active_hours::ActiveHours;
use crate::audit::AuditEvent;
use crate::message::{MessageLifecycleState, MessageRecord};

/// Resolves user ids to IANA timezone identifiers.
pub trait UserDirectory: Send + Sync {
    fn find_timezone(&self, user_id: &str) -> Option<String>;
    /// All known users as `(user_id, timezone)` pairs.
    fn list_users(&self) -> Vec<(String, String)>;
    fn upsert_user(&self, user_id: &str, timezone: &str) -> Result<()>;
}

/// Per-user delivery windows. Absence means "no restriction".
pub trait ActiveHoursStore: Send + Sync {
    fn get(&self, user_id: &str) -> Option<ActiveHours>;
    fn set(&self, user_id: &str, hours: ActiveHours) -> Result<()>;
}

/// Immutable-after-create message records.
pub trait MessageStore: Send + Sync {
    fn create(&self, record: &MessageRecord) -> Result<()>;
    fn find(&self, id: &str) -> Option<MessageRecord>;
    /// Newest first.
    fn by_sender(&self, sender_id: &str) -> Vec<MessageRecord>;
    /// Newest first.
    fn by_receiver(&self, receiver_id: &str) -> Vec<MessageRecord>;
}

/// Mutable lifecycle state, one record per message.
pub trait LifecycleStore: Send + Sync {
    fn create(&self, state: &MessageLifecycleState) -> Result<()>;
    fn find(&self, message_id: &str) -> Option<MessageLifecycleState>;
    fn update(&self, state: &MessageLifecycleState) -> Result<()>;
}

/// Write-only audit trail. `record` is fire-and-forget: implementations log
/// failures instead of surfacing them, so an audit problem can never roll
/// back the operation that produced the event.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
    fn all(&self) -> Vec<AuditEvent>;
    fn for_user(&self, user_id: &str) -> Vec<AuditEvent>;
    fn for_reference(&self, reference_id: &str) -> Vec<AuditEvent>;
    fn by_type(&self, type_tag: &str) -> Vec<AuditEvent>;
}

// ─── In-memory implementations ─────────────────────────────────

#[derive(Default)]
pub struct MemoryDirectory {
    users: Mutex<HashMap<String, String>>,
}

impl UserDirectory for MemoryDirectory {
    fn find_timezone(&self, user_id: &str) -> Option<String> {
        self.users.lock().unwrap().get(user_id).cloned()
    }

    fn list_users(&self) -> Vec<(String, String)> {
        let mut users: Vec<_> = self
            .users
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        users.sort();
        users
    }

    fn upsert_user(&self, user_id: &str, timezone: &str) -> Result<()> {
        self.users
            .lock()
            .unwrap()
            .insert(user_id.to_string(), timezone.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryActiveHours {
    hours: Mutex<HashMap<String, ActiveHours>>,
}

impl ActiveHoursStore for MemoryActiveHours {
    fn get(&self, user_id: &str) -> Option<ActiveHours> {
        self.hours.lock().unwrap().get(user_id).copied()
    }

    fn set(&self, user_id: &str, hours: ActiveHours) -> Result<()> {
        self.hours.lock().unwrap().insert(user_id.to_string(), hours);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMessages {
    messages: Mutex<Vec<MessageRecord>>,
}

impl MessageStore for MemoryMessages {
    fn create(&self, record: &MessageRecord) -> Result<()> {
        self.messages.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn find(&self, id: &str) -> Option<MessageRecord> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    fn by_sender(&self, sender_id: &str) -> Vec<MessageRecord> {
        let mut out: Vec<_> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.sender_id == sender_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    fn by_receiver(&self, receiver_id: &str) -> Vec<MessageRecord> {
        let mut out: Vec<_> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.receiver_id == receiver_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }
}

#[derive(Default)]
pub struct MemoryLifecycle {
    states: Mutex<HashMap<String, MessageLifecycleState>>,
}

impl LifecycleStore for MemoryLifecycle {
    fn create(&self, state: &MessageLifecycleState) -> Result<()> {
        self.states
            .lock()
            .unwrap()
            .insert(state.message_id.clone(), state.clone());
        Ok(())
    }

    fn find(&self, message_id: &str) -> Option<MessageLifecycleState> {
        self.states.lock().unwrap().get(message_id).cloned()
    }

    fn update(&self, state: &MessageLifecycleState) -> Result<()> {
        self.states
            .lock()
            .unwrap()
            .insert(state.message_id.clone(), state.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl AuditSink for MemoryAudit {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn all(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    fn for_user(&self, user_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    fn for_reference(&self, reference_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.reference_id == reference_id)
            .cloned()
            .collect()
    }

    fn by_type(&self, type_tag: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind.type_tag() == type_tag)
            .cloned()
            .collect()
    }
}

/// Bundle of in-memory stores sharing no state with anything else. Handy for
/// tests and the CLI demo path.
#[derive(Default)]
pub struct MemoryStores {
    pub directory: std::sync::Arc<MemoryDirectory>,
    pub active_hours: std::sync::Arc<MemoryActiveHours>,
    pub messages: std::sync::Arc<MemoryMessages>,
    pub lifecycle: std::sync::Arc<MemoryLifecycle>,
    pub audit: std::sync::Arc<MemoryAudit>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Seed the three sandbox users and their delivery windows.
pub fn seed_sandbox(directory: &dyn UserDirectory, hours: &dyn ActiveHoursStore) -> Result<()> {
    directory.upsert_user("user_ng", "Africa/Lagos")?;
    directory.upsert_user("user_us", "America/New_York")?;
    directory.upsert_user("user_sa", "Africa/Johannesburg")?;
    hours.set("user_ng", ActiveHours::new(8, 21))?;
    hours.set("user_us", ActiveHours::new(9, 18))?;
    hours.set("user_sa", ActiveHours::new(8, 20))?;
    tracing::info!("🌱 Seeded 3 sandbox users with active-hours windows");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_sandbox() {
        let stores = MemoryStores::new();
        seed_sandbox(&*stores.directory, &*stores.active_hours).unwrap();
        assert_eq!(
            stores.directory.find_timezone("user_ng").as_deref(),
            Some("Africa/Lagos")
        );
        assert_eq!(
            stores.active_hours.get("user_us"),
            Some(ActiveHours::new(9, 18))
        );
        assert_eq!(stores.directory.list_users().len(), 3);
    }
}
