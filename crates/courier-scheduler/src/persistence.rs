//! SQLite-backed persistence for users, windows, messages, lifecycle state,
//! and the audit trail — survives restarts, one file on disk.
//!
//! A single [`CourierDb`] implements every store contract from
//! [`crate::store`], so one `Arc<CourierDb>` can be handed to the scheduler
//! and evaluator as all five collaborators. The connection sits behind a
//! mutex; every operation is a single statement, so the serialized access is
//! also what makes each lifecycle read-modify-write atomic.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use courier_core::{CourierError, Result};

use crate::active_hours::ActiveHours;
use crate::audit::AuditEvent;
use crate::message::{MessageLifecycleState, MessageRecord, MessageStatus};
use crate::store::{ActiveHoursStore, AuditSink, LifecycleStore, MessageStore, UserDirectory};

pub struct CourierDb {
    conn: Mutex<rusqlite::Connection>,
}

impl CourierDb {
    /// Open or create the courier database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| CourierError::Store(format!("DB open: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "
            -- Known users and their IANA timezones
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                timezone TEXT NOT NULL
            );

            -- Per-user delivery windows, half-open [start_hour, end_hour)
            CREATE TABLE IF NOT EXISTS active_hours (
                user_id TEXT PRIMARY KEY,
                start_hour INTEGER NOT NULL,
                end_hour INTEGER NOT NULL
            );

            -- Message records, immutable after create
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                content TEXT NOT NULL,
                sender_timezone TEXT NOT NULL,
                receiver_timezone TEXT NOT NULL,
                sender_local_time TEXT NOT NULL,
                receiver_local_time TEXT NOT NULL,
                utc_time TEXT NOT NULL,
                status TEXT NOT NULL,            -- 'pending', 'delivered', 'delayed'
                scheduled_for_utc TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id);
            CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages(receiver_id);

            -- Mutable lifecycle state, one row per message
            CREATE TABLE IF NOT EXISTS message_state (
                message_id TEXT PRIMARY KEY,
                delivered_at_utc TEXT,
                read_at_utc TEXT,
                replied_at_utc TEXT,
                unread_nudge_sent INTEGER NOT NULL DEFAULT 0,
                reminder_sent INTEGER NOT NULL DEFAULT 0,
                follow_up_sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT
            );

            -- Write-only audit trail; payload is the full event as JSON
            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                reference_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                event_type TEXT NOT NULL,        -- 'message_delivery', 'rule_fired', ...
                timestamp_utc TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_reference ON audit_log(reference_id);
            CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_log(user_id);
         ",
            )
            .map_err(|e| CourierError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
        let utc_time_str: String = row.get(8)?;
        let status_str: String = row.get(9)?;
        let scheduled_str: Option<String> = row.get(10)?;
        let created_at_str: String = row.get(11)?;
        Ok(MessageRecord {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            receiver_id: row.get(2)?,
            content: row.get(3)?,
            sender_timezone: row.get(4)?,
            receiver_timezone: row.get(5)?,
            sender_local_time: row.get(6)?,
            receiver_local_time: row.get(7)?,
            utc_time: parse_ts(&utc_time_str),
            status: match status_str.as_str() {
                "delivered" => MessageStatus::Delivered,
                "delayed" => MessageStatus::Delayed,
                _ => MessageStatus::Pending,
            },
            scheduled_for_utc: scheduled_str.as_deref().map(parse_ts),
            created_at: parse_ts(&created_at_str),
        })
    }

    fn query_messages(&self, sql: &str, param: &str) -> Vec<MessageRecord> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(sql) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        stmt.query_map([param], Self::row_to_message)
            .ok()
            .map(|r| r.filter_map(|m| m.ok()).collect())
            .unwrap_or_default()
    }

    fn query_audit(&self, sql: &str, param: Option<&str>) -> Vec<AuditEvent> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(sql) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let map = |row: &rusqlite::Row<'_>| row.get::<_, String>(0);
        let rows = match param {
            Some(p) => stmt.query_map([p], map),
            None => stmt.query_map([], map),
        };
        rows.ok()
            .map(|r| {
                r.filter_map(|p| p.ok())
                    .filter_map(|p| serde_json::from_str(&p).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, sender_timezone, \
     receiver_timezone, sender_local_time, receiver_local_time, utc_time, status, \
     scheduled_for_utc, created_at";

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

// ─── Store contract implementations ───────────────────────────

impl UserDirectory for CourierDb {
    fn find_timezone(&self, user_id: &str) -> Option<String> {
        self.conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT timezone FROM users WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .ok()
    }

    fn list_users(&self) -> Vec<(String, String)> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare("SELECT user_id, timezone FROM users ORDER BY user_id") {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .ok()
            .map(|r| r.filter_map(|u| u.ok()).collect())
            .unwrap_or_default()
    }

    fn upsert_user(&self, user_id: &str, timezone: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO users (user_id, timezone) VALUES (?1, ?2)",
                [user_id, timezone],
            )
            .map_err(|e| CourierError::Store(format!("Upsert user: {e}")))?;
        Ok(())
    }
}

impl ActiveHoursStore for CourierDb {
    fn get(&self, user_id: &str) -> Option<ActiveHours> {
        self.conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT start_hour, end_hour FROM active_hours WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(ActiveHours {
                        start_hour: row.get(0)?,
                        end_hour: row.get(1)?,
                    })
                },
            )
            .ok()
    }

    fn set(&self, user_id: &str, hours: ActiveHours) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO active_hours (user_id, start_hour, end_hour)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, hours.start_hour, hours.end_hour],
            )
            .map_err(|e| CourierError::Store(format!("Set active hours: {e}")))?;
        Ok(())
    }
}

impl MessageStore for CourierDb {
    fn create(&self, record: &MessageRecord) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO messages
                 (id, sender_id, receiver_id, content, sender_timezone, receiver_timezone,
                  sender_local_time, receiver_local_time, utc_time, status, scheduled_for_utc,
                  created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    record.id,
                    record.sender_id,
                    record.receiver_id,
                    record.content,
                    record.sender_timezone,
                    record.receiver_timezone,
                    record.sender_local_time,
                    record.receiver_local_time,
                    record.utc_time.to_rfc3339(),
                    record.status.as_str(),
                    record.scheduled_for_utc.map(|t| t.to_rfc3339()),
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| CourierError::Store(format!("Save message: {e}")))?;
        Ok(())
    }

    fn find(&self, id: &str) -> Option<MessageRecord> {
        self.conn
            .lock()
            .unwrap()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                Self::row_to_message,
            )
            .ok()
    }

    fn by_sender(&self, sender_id: &str) -> Vec<MessageRecord> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE sender_id = ?1
                 ORDER BY created_at DESC"
            ),
            sender_id,
        )
    }

    fn by_receiver(&self, receiver_id: &str) -> Vec<MessageRecord> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE receiver_id = ?1
                 ORDER BY created_at DESC"
            ),
            receiver_id,
        )
    }
}

impl LifecycleStore for CourierDb {
    fn create(&self, state: &MessageLifecycleState) -> Result<()> {
        self.update(state)
    }

    fn find(&self, message_id: &str) -> Option<MessageLifecycleState> {
        self.conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT message_id, delivered_at_utc, read_at_utc, replied_at_utc,
                        unread_nudge_sent, reminder_sent, follow_up_sent, created_at, updated_at
                 FROM message_state WHERE message_id = ?1",
                [message_id],
                |row| {
                    let created_at_str: String = row.get(7)?;
                    Ok(MessageLifecycleState {
                        message_id: row.get(0)?,
                        delivered_at_utc: parse_opt_ts(row.get(1)?),
                        read_at_utc: parse_opt_ts(row.get(2)?),
                        replied_at_utc: parse_opt_ts(row.get(3)?),
                        unread_nudge_sent: row.get::<_, i32>(4)? != 0,
                        reminder_sent: row.get::<_, i32>(5)? != 0,
                        follow_up_sent: row.get::<_, i32>(6)? != 0,
                        created_at: parse_ts(&created_at_str),
                        updated_at: parse_opt_ts(row.get(8)?),
                    })
                },
            )
            .ok()
    }

    fn update(&self, state: &MessageLifecycleState) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO message_state
                 (message_id, delivered_at_utc, read_at_utc, replied_at_utc,
                  unread_nudge_sent, reminder_sent, follow_up_sent, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    state.message_id,
                    state.delivered_at_utc.map(|t| t.to_rfc3339()),
                    state.read_at_utc.map(|t| t.to_rfc3339()),
                    state.replied_at_utc.map(|t| t.to_rfc3339()),
                    state.unread_nudge_sent as i32,
                    state.reminder_sent as i32,
                    state.follow_up_sent as i32,
                    state.created_at.to_rfc3339(),
                    state.updated_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| CourierError::Store(format!("Save state: {e}")))?;
        Ok(())
    }
}

impl AuditSink for CourierDb {
    /// Fire-and-forget: a failed audit write is logged, never surfaced.
    fn record(&self, event: AuditEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("⚠️ Audit event {} not serializable: {e}", event.id);
                return;
            }
        };
        let result = self.conn.lock().unwrap().execute(
            "INSERT INTO audit_log (id, reference_id, user_id, event_type, timestamp_utc, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                event.id,
                event.reference_id,
                event.user_id,
                event.kind.type_tag(),
                event.timestamp_utc.to_rfc3339(),
                payload,
            ],
        );
        if let Err(e) = result {
            tracing::warn!("⚠️ Audit write failed for {}: {e}", event.reference_id);
        }
    }

    fn all(&self) -> Vec<AuditEvent> {
        self.query_audit("SELECT payload FROM audit_log ORDER BY timestamp_utc", None)
    }

    fn for_user(&self, user_id: &str) -> Vec<AuditEvent> {
        self.query_audit(
            "SELECT payload FROM audit_log WHERE user_id = ?1 ORDER BY timestamp_utc",
            Some(user_id),
        )
    }

    fn for_reference(&self, reference_id: &str) -> Vec<AuditEvent> {
        self.query_audit(
            "SELECT payload FROM audit_log WHERE reference_id = ?1 ORDER BY timestamp_utc",
            Some(reference_id),
        )
    }

    fn by_type(&self, type_tag: &str) -> Vec<AuditEvent> {
        self.query_audit(
            "SELECT payload FROM audit_log WHERE event_type = ?1 ORDER BY timestamp_utc",
            Some(type_tag),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_db(name: &str) -> (std::path::PathBuf, CourierDb) {
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("test.db");
        std::fs::remove_file(&path).ok();
        let db = CourierDb::open(&path).unwrap();
        (dir, db)
    }

    fn sample_record() -> MessageRecord {
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        MessageRecord {
            id: "msg-test-1".into(),
            sender_id: "user_a".into(),
            receiver_id: "user_b".into(),
            content: "hello".into(),
            sender_timezone: "America/New_York".into(),
            receiver_timezone: "Europe/London".into(),
            sender_local_time: "2026-01-15 07:00:00 EST".into(),
            receiver_local_time: "2026-01-15 12:00:00 GMT".into(),
            utc_time: now,
            status: MessageStatus::Delayed,
            scheduled_for_utc: Some(Utc.with_ymd_and_hms(2026, 1, 16, 8, 0, 0).unwrap()),
            created_at: now,
        }
    }

    #[test]
    fn test_open_and_migrate() {
        let (dir, db) = temp_db("courier-db-test-migrate");
        assert!(db.list_users().is_empty());
        assert!(AuditSink::all(&db).is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_users_and_active_hours_roundtrip() {
        let (dir, db) = temp_db("courier-db-test-users");
        db.upsert_user("user_ng", "Africa/Lagos").unwrap();
        db.set("user_ng", ActiveHours::new(8, 21)).unwrap();

        assert_eq!(db.find_timezone("user_ng").as_deref(), Some("Africa/Lagos"));
        assert_eq!(
            ActiveHoursStore::get(&db, "user_ng"),
            Some(ActiveHours::new(8, 21))
        );
        assert!(ActiveHoursStore::get(&db, "user_unknown").is_none());

        // Upsert overwrites
        db.upsert_user("user_ng", "Africa/Accra").unwrap();
        assert_eq!(db.find_timezone("user_ng").as_deref(), Some("Africa/Accra"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_message_roundtrip_preserves_fields() {
        let (dir, db) = temp_db("courier-db-test-messages");
        let record = sample_record();
        MessageStore::create(&db, &record).unwrap();

        let loaded = MessageStore::find(&db, "msg-test-1").unwrap();
        assert_eq!(loaded.status, MessageStatus::Delayed);
        assert_eq!(loaded.utc_time, record.utc_time);
        assert_eq!(loaded.scheduled_for_utc, record.scheduled_for_utc);
        assert_eq!(loaded.receiver_local_time, record.receiver_local_time);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_messages_by_party_newest_first() {
        let (dir, db) = temp_db("courier-db-test-ordering");
        let mut first = sample_record();
        let mut second = sample_record();
        second.id = "msg-test-2".into();
        second.created_at = first.created_at + chrono::Duration::minutes(5);
        first.scheduled_for_utc = None;
        MessageStore::create(&db, &first).unwrap();
        MessageStore::create(&db, &second).unwrap();

        let by_sender = db.by_sender("user_a");
        assert_eq!(by_sender.len(), 2);
        assert_eq!(by_sender[0].id, "msg-test-2");
        assert!(by_sender[0].scheduled_for_utc.is_some());
        assert!(by_sender[1].scheduled_for_utc.is_none());
        assert!(db.by_receiver("user_a").is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_lifecycle_state_flag_roundtrip() {
        let (dir, db) = temp_db("courier-db-test-state");
        let record = sample_record();
        let mut state = MessageLifecycleState::for_message(&record);
        LifecycleStore::create(&db, &state).unwrap();

        state.delivered_at_utc = Some(record.utc_time);
        state.unread_nudge_sent = true;
        state.updated_at = Some(record.utc_time);
        db.update(&state).unwrap();

        let loaded = LifecycleStore::find(&db, "msg-test-1").unwrap();
        assert!(loaded.unread_nudge_sent);
        assert!(!loaded.reminder_sent);
        assert_eq!(loaded.delivered_at_utc, Some(record.utc_time));
        assert_eq!(loaded.updated_at, Some(record.utc_time));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_audit_log_queries() {
        let (dir, db) = temp_db("courier-db-test-audit");
        let record = sample_record();
        db.record(AuditEvent::delivery(&record));
        db.record(AuditEvent::rule_fired(
            &record.id,
            "user_b",
            "unread_nudge",
            "receiver_nudge",
            "Nudge: unread",
            record.utc_time,
        ));

        assert_eq!(AuditSink::all(&db).len(), 2);
        assert_eq!(db.for_reference("msg-test-1").len(), 2);
        assert_eq!(db.for_user("user_b").len(), 2);
        assert_eq!(db.by_type("rule_fired").len(), 1);
        assert_eq!(db.by_type("message_read").len(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }
}
