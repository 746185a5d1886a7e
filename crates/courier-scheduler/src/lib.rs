//! # Courier Scheduler
//!
//! Active-hours delivery scheduling and time-elapsed behavior rules.
//! Messages are never actually transmitted — delivery is simulated and every
//! decision is recorded for audit.
//!
//! ## Architecture
//! ```text
//! send / schedule request
//!   → MessageScheduler
//!       ├── UserDirectory: resolve sender + receiver timezones
//!       ├── clock: dual-time rendering (sender local / receiver local)
//!       ├── DeliveryPolicy: inside [start, end) window? → Delivered
//!       │                   outside?                   → Delayed + next slot
//!       └── persist MessageRecord + MessageLifecycleState, audit event
//!
//! evaluate-rules request (per message, on demand)
//!   → RuleEvaluator
//!       ├── RuleSet: unread_nudge / no_reply_reminder / auto_followup
//!       │   (independent one-shot checks, order never matters)
//!       ├── active-hours gate on the action's recipient → fire or defer
//!       └── flip one-shot flag, persist, then audit
//! ```

pub mod active_hours;
pub mod audit;
pub mod clock;
pub mod message;
pub mod persistence;
pub mod rules;
pub mod scheduler;
pub mod store;

pub use active_hours::{ActiveHours, DeliveryPolicy, DeliverySlot};
pub use audit::{AuditEvent, AuditKind};
pub use message::{DerivedStatus, MessageLifecycleState, MessageRecord, MessageStatus};
pub use persistence::CourierDb;
pub use rules::{
    Rule, RuleAction, RuleActionKind, RuleEvaluation, RuleEvaluator, RuleLog, RuleSet,
    RuleThresholds,
};
pub use scheduler::{MessageScheduler, MessageStatusView};
pub use store::{
    ActiveHoursStore, AuditSink, LifecycleStore, MemoryStores, MessageStore, UserDirectory,
};
