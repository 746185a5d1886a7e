//! Behavior rules — time-elapsed one-shot checks per message.
//!
//! Three independent rules run on every evaluation pass. Each is a pure
//! function of `(record, lifecycle state, now)`: no rule's firing affects
//! another's precondition, so evaluation order never matters. Firing is
//! gated by the *action recipient's* active hours — the nudge goes to the
//! receiver, the reminder and follow-up go back to the sender — and a gated
//! rule is deferred to a future pass, never scheduled forward.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::config::RulesConfig;
use courier_core::{CourierError, Result};

use crate::active_hours::DeliveryPolicy;
use crate::audit::AuditEvent;
use crate::clock;
use crate::message::{MessageLifecycleState, MessageRecord};
use crate::store::{ActiveHoursStore, AuditSink, LifecycleStore, MessageStore, UserDirectory};

/// Elapsed-time thresholds, minutes since delivery.
#[derive(Debug, Clone, Copy)]
pub struct RuleThresholds {
    pub unread_nudge_minutes: i64,
    pub no_reply_reminder_minutes: i64,
    pub auto_followup_minutes: i64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            unread_nudge_minutes: 5,
            no_reply_reminder_minutes: 10,
            auto_followup_minutes: 15,
        }
    }
}

impl From<&RulesConfig> for RuleThresholds {
    fn from(cfg: &RulesConfig) -> Self {
        Self {
            unread_nudge_minutes: cfg.unread_nudge_minutes,
            no_reply_reminder_minutes: cfg.no_reply_reminder_minutes,
            auto_followup_minutes: cfg.auto_followup_minutes,
        }
    }
}

/// The three one-shot actions a rule can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleActionKind {
    SenderReminder,
    ReceiverNudge,
    AutoFollowup,
}

impl RuleActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleActionKind::SenderReminder => "sender_reminder",
            RuleActionKind::ReceiverNudge => "receiver_nudge",
            RuleActionKind::AutoFollowup => "auto_followup",
        }
    }
}

/// Whose active-hours window gates a fired action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateParty {
    Sender,
    Receiver,
}

/// An emitted action. Ephemeral — the persisted trace is the one-shot flag
/// plus the audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct RuleAction {
    pub action: RuleActionKind,
    pub message_id: String,
    pub utc_time: String,
    pub sender_local_time: String,
    pub receiver_local_time: String,
    pub sender_timezone: String,
    pub receiver_timezone: String,
    pub description: String,
}

/// Why a rule did or did not fire this pass. A rule gated out by active
/// hours gets an extra `<name>_delayed` log, distinct from "not triggered".
#[derive(Debug, Clone, Serialize)]
pub struct RuleLog {
    pub rule: String,
    pub message_id: String,
    pub triggered: bool,
    pub reason: String,
    pub utc_time: String,
}

/// Result of one evaluation pass over one message.
#[derive(Debug, Clone, Serialize)]
pub struct RuleEvaluation {
    pub message_id: String,
    pub evaluated_at_utc: String,
    pub actions: Vec<RuleAction>,
    pub logs: Vec<RuleLog>,
}

impl RuleEvaluation {
    fn empty(message_id: &str, now_utc: DateTime<Utc>) -> Self {
        Self {
            message_id: message_id.to_string(),
            evaluated_at_utc: clock::utc_string(now_utc),
            actions: Vec::new(),
            logs: Vec::new(),
        }
    }
}

/// Everything a rule may read.
pub struct RuleContext<'a> {
    pub record: &'a MessageRecord,
    pub state: &'a MessageLifecycleState,
    pub now_utc: DateTime<Utc>,
}

impl RuleContext<'_> {
    /// Whole minutes since delivery; `None` while undelivered.
    fn elapsed_minutes(&self) -> Option<i64> {
        self.state
            .delivered_at_utc
            .map(|d| (self.now_utc - d).num_minutes())
    }
}

/// One behavior rule: a precondition + elapsed-time check and a one-shot
/// flag on the lifecycle state.
pub trait Rule: Send + Sync {
    /// Stable name used in logs and audit ("unread_nudge", ...).
    fn name(&self) -> &'static str;
    fn kind(&self) -> RuleActionKind;
    fn gate(&self) -> GateParty;
    /// Precondition + elapsed-time test. Active hours are the evaluator's
    /// concern, not the rule's.
    fn condition_met(&self, ctx: &RuleContext<'_>) -> bool;
    fn reason(&self, ctx: &RuleContext<'_>, triggered: bool) -> String;
    fn already_fired(&self, state: &MessageLifecycleState) -> bool;
    fn mark_fired(&self, state: &mut MessageLifecycleState);
    fn describe(&self, record: &MessageRecord) -> String;
}

/// Nudge the receiver about a message they have not opened.
pub struct UnreadNudge {
    pub minutes: i64,
}

impl Rule for UnreadNudge {
    fn name(&self) -> &'static str {
        "unread_nudge"
    }

    fn kind(&self) -> RuleActionKind {
        RuleActionKind::ReceiverNudge
    }

    fn gate(&self) -> GateParty {
        GateParty::Receiver
    }

    fn condition_met(&self, ctx: &RuleContext<'_>) -> bool {
        ctx.state.read_at_utc.is_none()
            && !ctx.state.unread_nudge_sent
            && ctx.elapsed_minutes().is_some_and(|m| m >= self.minutes)
    }

    fn reason(&self, ctx: &RuleContext<'_>, triggered: bool) -> String {
        if triggered {
            format!("Message unread for {} minutes", self.minutes)
        } else {
            format!(
                "Conditions not met: delivered={}, unread={}, not_yet_nudged={}",
                ctx.state.delivered_at_utc.is_some(),
                ctx.state.read_at_utc.is_none(),
                !ctx.state.unread_nudge_sent,
            )
        }
    }

    fn already_fired(&self, state: &MessageLifecycleState) -> bool {
        state.unread_nudge_sent
    }

    fn mark_fired(&self, state: &mut MessageLifecycleState) {
        state.unread_nudge_sent = true;
    }

    fn describe(&self, record: &MessageRecord) -> String {
        format!("Nudge: You have an unread message \"{}\"", record.content)
    }
}

/// Remind the sender that their message went unanswered.
pub struct NoReplyReminder {
    pub minutes: i64,
}

impl Rule for NoReplyReminder {
    fn name(&self) -> &'static str {
        "no_reply_reminder"
    }

    fn kind(&self) -> RuleActionKind {
        RuleActionKind::SenderReminder
    }

    fn gate(&self) -> GateParty {
        GateParty::Sender
    }

    fn condition_met(&self, ctx: &RuleContext<'_>) -> bool {
        ctx.state.replied_at_utc.is_none()
            && !ctx.state.reminder_sent
            && ctx.elapsed_minutes().is_some_and(|m| m >= self.minutes)
    }

    fn reason(&self, ctx: &RuleContext<'_>, triggered: bool) -> String {
        if triggered {
            format!("Message not replied to for {} minutes", self.minutes)
        } else {
            format!(
                "Conditions not met: delivered={}, no_reply={}, reminder_not_sent={}",
                ctx.state.delivered_at_utc.is_some(),
                ctx.state.replied_at_utc.is_none(),
                !ctx.state.reminder_sent,
            )
        }
    }

    fn already_fired(&self, state: &MessageLifecycleState) -> bool {
        state.reminder_sent
    }

    fn mark_fired(&self, state: &mut MessageLifecycleState) {
        state.reminder_sent = true;
    }

    fn describe(&self, record: &MessageRecord) -> String {
        format!("Reminder: No reply to message \"{}\"", record.content)
    }
}

/// Send an automatic follow-up on the sender's behalf.
pub struct AutoFollowup {
    pub minutes: i64,
}

impl Rule for AutoFollowup {
    fn name(&self) -> &'static str {
        "auto_followup"
    }

    fn kind(&self) -> RuleActionKind {
        RuleActionKind::AutoFollowup
    }

    fn gate(&self) -> GateParty {
        GateParty::Sender
    }

    fn condition_met(&self, ctx: &RuleContext<'_>) -> bool {
        ctx.state.replied_at_utc.is_none()
            && !ctx.state.follow_up_sent
            && ctx.elapsed_minutes().is_some_and(|m| m >= self.minutes)
    }

    fn reason(&self, ctx: &RuleContext<'_>, triggered: bool) -> String {
        if triggered {
            format!("No reply for {} minutes, sending follow-up", self.minutes)
        } else {
            format!(
                "Conditions not met: delivered={}, no_reply={}, followup_not_sent={}",
                ctx.state.delivered_at_utc.is_some(),
                ctx.state.replied_at_utc.is_none(),
                !ctx.state.follow_up_sent,
            )
        }
    }

    fn already_fired(&self, state: &MessageLifecycleState) -> bool {
        state.follow_up_sent
    }

    fn mark_fired(&self, state: &mut MessageLifecycleState) {
        state.follow_up_sent = true;
    }

    fn describe(&self, record: &MessageRecord) -> String {
        format!("Follow-up: Original message was \"{}\"", record.content)
    }
}

/// An order-independent collection of rules.
pub struct RuleSet {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleSet {
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// The standard three-rule set.
    pub fn standard(thresholds: RuleThresholds) -> Self {
        Self::new(vec![
            Box::new(UnreadNudge {
                minutes: thresholds.unread_nudge_minutes,
            }),
            Box::new(NoReplyReminder {
                minutes: thresholds.no_reply_reminder_minutes,
            }),
            Box::new(AutoFollowup {
                minutes: thresholds.auto_followup_minutes,
            }),
        ])
    }

    pub fn rules(&self) -> &[Box<dyn Rule>] {
        &self.rules
    }
}

/// Evaluates the rule set against one message's lifecycle state.
pub struct RuleEvaluator {
    directory: Arc<dyn UserDirectory>,
    active_hours: Arc<dyn ActiveHoursStore>,
    messages: Arc<dyn MessageStore>,
    lifecycle: Arc<dyn LifecycleStore>,
    audit: Arc<dyn AuditSink>,
    policy: DeliveryPolicy,
    rules: RuleSet,
}

impl RuleEvaluator {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        active_hours: Arc<dyn ActiveHoursStore>,
        messages: Arc<dyn MessageStore>,
        lifecycle: Arc<dyn LifecycleStore>,
        audit: Arc<dyn AuditSink>,
        policy: DeliveryPolicy,
        rules: RuleSet,
    ) -> Self {
        Self {
            directory,
            active_hours,
            messages,
            lifecycle,
            audit,
            policy,
            rules,
        }
    }

    /// Evaluate by message id. Unknown id is a hard not-found; a record with
    /// no lifecycle state yields an empty result instead.
    pub fn evaluate_message(&self, message_id: &str, now_utc: DateTime<Utc>) -> Result<RuleEvaluation> {
        let record = self
            .messages
            .find(message_id)
            .ok_or_else(|| CourierError::MessageNotFound(message_id.to_string()))?;
        self.evaluate(&record, now_utc)
    }

    /// One evaluation pass. Each eligible rule fires at most once per message
    /// lifetime: the one-shot flag is persisted before the audit entry is
    /// written, so a crash between the two loses an audit line, never
    /// duplicates an action.
    pub fn evaluate(&self, record: &MessageRecord, now_utc: DateTime<Utc>) -> Result<RuleEvaluation> {
        let Some(mut state) = self.lifecycle.find(&record.id) else {
            tracing::warn!("⚠️ No lifecycle state for message {} — skipping", record.id);
            return Ok(RuleEvaluation::empty(&record.id, now_utc));
        };

        let mut evaluation = RuleEvaluation::empty(&record.id, now_utc);

        for rule in self.rules.rules() {
            let triggered = {
                let ctx = RuleContext {
                    record,
                    state: &state,
                    now_utc,
                };
                let triggered = rule.condition_met(&ctx);
                evaluation.logs.push(RuleLog {
                    rule: rule.name().to_string(),
                    message_id: record.id.clone(),
                    triggered,
                    reason: rule.reason(&ctx, triggered),
                    utc_time: clock::utc_string(now_utc),
                });
                triggered
            };
            if !triggered {
                continue;
            }

            let (party_id, party_label) = match rule.gate() {
                GateParty::Sender => (&record.sender_id, "sender"),
                GateParty::Receiver => (&record.receiver_id, "receiver"),
            };

            if !self.party_within_hours(party_id, now_utc) {
                evaluation.logs.push(RuleLog {
                    rule: format!("{}_delayed", rule.name()),
                    message_id: record.id.clone(),
                    triggered: false,
                    reason: format!(
                        "{} action delayed: {party_label} outside active hours",
                        rule.kind().as_str()
                    ),
                    utc_time: clock::utc_string(now_utc),
                });
                continue;
            }

            // Flip the one-shot flag and persist before anything observable.
            rule.mark_fired(&mut state);
            state.updated_at = Some(now_utc);
            self.lifecycle.update(&state)?;

            let dual = clock::dual_time(&record.sender_timezone, &record.receiver_timezone, now_utc);
            let description = rule.describe(record);
            let action = RuleAction {
                action: rule.kind(),
                message_id: record.id.clone(),
                utc_time: dual.utc.clone(),
                sender_local_time: dual.sender_local,
                receiver_local_time: dual.receiver_local,
                sender_timezone: record.sender_timezone.clone(),
                receiver_timezone: record.receiver_timezone.clone(),
                description: description.clone(),
            };
            self.audit.record(AuditEvent::rule_fired(
                &record.id,
                party_id,
                rule.name(),
                rule.kind().as_str(),
                &description,
                now_utc,
            ));
            tracing::info!("⚡ Rule '{}' fired for message {}", rule.name(), record.id);
            evaluation.actions.push(action);
        }

        Ok(evaluation)
    }

    /// Is the gate party inside their window right now? No window, or an
    /// unknown party, or an unresolvable zone all mean "no restriction".
    fn party_within_hours(&self, party_id: &str, now_utc: DateTime<Utc>) -> bool {
        let Some(hours) = self.active_hours.get(party_id) else {
            return true;
        };
        let Some(tz) = self.directory.find_timezone(party_id) else {
            return true;
        };
        self.policy
            .can_deliver_now(clock::local_hour(now_utc, &tz), Some(&hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active_hours::ActiveHours;
    use crate::message::MessageStatus;
    use crate::store::{seed_sandbox, MemoryStores};
    use chrono::{Duration, TimeZone};

    // Fixture: 12:00 UTC → sender user_us is at 07:00 (America/New_York,
    // EST), receiver user_ng is at 13:00 (Africa/Lagos).
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn evaluator(stores: &MemoryStores) -> RuleEvaluator {
        RuleEvaluator::new(
            stores.directory.clone(),
            stores.active_hours.clone(),
            stores.messages.clone(),
            stores.lifecycle.clone(),
            stores.audit.clone(),
            DeliveryPolicy::default(),
            RuleSet::standard(RuleThresholds::default()),
        )
    }

    fn delivered_message(stores: &MemoryStores, minutes_ago: i64) -> MessageRecord {
        let delivered_at = now() - Duration::minutes(minutes_ago);
        let record = MessageRecord {
            id: MessageRecord::new_id(),
            sender_id: "user_us".into(),
            receiver_id: "user_ng".into(),
            content: "ping".into(),
            sender_timezone: "America/New_York".into(),
            receiver_timezone: "Africa/Lagos".into(),
            sender_local_time: "x".into(),
            receiver_local_time: "x".into(),
            utc_time: delivered_at,
            status: MessageStatus::Delivered,
            scheduled_for_utc: None,
            created_at: delivered_at,
        };
        stores.messages.create(&record).unwrap();
        stores
            .lifecycle
            .create(&MessageLifecycleState::for_message(&record))
            .unwrap();
        record
    }

    fn open_stores() -> MemoryStores {
        let stores = MemoryStores::new();
        seed_sandbox(&*stores.directory, &*stores.active_hours).unwrap();
        // Make both fixture parties in-window at 12:00 UTC
        stores
            .active_hours
            .set("user_us", ActiveHours::new(6, 18))
            .unwrap();
        stores
            .active_hours
            .set("user_ng", ActiveHours::new(9, 18))
            .unwrap();
        stores
    }

    #[test]
    fn test_unread_nudge_fires_after_threshold() {
        // Scenario: delivered 6 minutes ago, unread, receiver in-window
        let stores = open_stores();
        let record = delivered_message(&stores, 6);
        let eval = evaluator(&stores).evaluate(&record, now()).unwrap();

        assert_eq!(eval.actions.len(), 1);
        assert_eq!(eval.actions[0].action, RuleActionKind::ReceiverNudge);
        let state = stores.lifecycle.find(&record.id).unwrap();
        assert!(state.unread_nudge_sent);
        assert!(!state.reminder_sent);
        // Audit entry written for the fired rule
        assert_eq!(stores.audit.by_type("rule_fired").len(), 1);
    }

    #[test]
    fn test_gated_rule_is_deferred_not_skipped() {
        // Scenario: same as above but receiver outside their window
        let stores = open_stores();
        stores
            .active_hours
            .set("user_ng", ActiveHours::new(14, 18))
            .unwrap();
        let record = delivered_message(&stores, 6);
        let eval = evaluator(&stores).evaluate(&record, now()).unwrap();

        assert!(eval.actions.is_empty());
        let delayed: Vec<_> = eval
            .logs
            .iter()
            .filter(|l| l.rule == "unread_nudge_delayed")
            .collect();
        assert_eq!(delayed.len(), 1);
        assert!(delayed[0].reason.contains("outside active hours"));
        // Flag untouched: the action is deferred to a later pass
        let state = stores.lifecycle.find(&record.id).unwrap();
        assert!(!state.unread_nudge_sent);

        // A later pass with the receiver back in-window fires it
        stores
            .active_hours
            .set("user_ng", ActiveHours::new(9, 18))
            .unwrap();
        let eval = evaluator(&stores).evaluate(&record, now()).unwrap();
        assert_eq!(eval.actions.len(), 1);
    }

    #[test]
    fn test_all_three_rules_fire_in_one_pass() {
        // Scenario: 20 minutes, never read or replied, both parties in-window
        let stores = open_stores();
        let record = delivered_message(&stores, 20);
        let eval = evaluator(&stores).evaluate(&record, now()).unwrap();

        assert_eq!(eval.actions.len(), 3);
        let kinds: Vec<_> = eval.actions.iter().map(|a| a.action).collect();
        assert!(kinds.contains(&RuleActionKind::ReceiverNudge));
        assert!(kinds.contains(&RuleActionKind::SenderReminder));
        assert!(kinds.contains(&RuleActionKind::AutoFollowup));

        let state = stores.lifecycle.find(&record.id).unwrap();
        assert!(state.unread_nudge_sent && state.reminder_sent && state.follow_up_sent);
    }

    #[test]
    fn test_idempotence_second_pass_fires_nothing() {
        let stores = open_stores();
        let record = delivered_message(&stores, 20);
        let ev = evaluator(&stores);

        let first = ev.evaluate(&record, now()).unwrap();
        assert_eq!(first.actions.len(), 3);

        let second = ev.evaluate(&record, now()).unwrap();
        assert!(second.actions.is_empty());
        assert!(second.logs.iter().all(|l| !l.triggered));
        // Exactly three audit entries total, not six
        assert_eq!(stores.audit.by_type("rule_fired").len(), 3);
    }

    #[test]
    fn test_evaluation_order_does_not_matter() {
        let thresholds = RuleThresholds::default();
        let reversed = RuleSet::new(vec![
            Box::new(AutoFollowup {
                minutes: thresholds.auto_followup_minutes,
            }),
            Box::new(NoReplyReminder {
                minutes: thresholds.no_reply_reminder_minutes,
            }),
            Box::new(UnreadNudge {
                minutes: thresholds.unread_nudge_minutes,
            }),
        ]);
        let stores = open_stores();
        let record = delivered_message(&stores, 20);
        let ev = RuleEvaluator::new(
            stores.directory.clone(),
            stores.active_hours.clone(),
            stores.messages.clone(),
            stores.lifecycle.clone(),
            stores.audit.clone(),
            DeliveryPolicy::default(),
            reversed,
        );

        let eval = ev.evaluate(&record, now()).unwrap();
        assert_eq!(eval.actions.len(), 3);
        let state = stores.lifecycle.find(&record.id).unwrap();
        assert!(state.unread_nudge_sent && state.reminder_sent && state.follow_up_sent);
    }

    #[test]
    fn test_read_message_still_gets_reminder_but_no_nudge() {
        let stores = open_stores();
        let record = delivered_message(&stores, 20);
        let mut state = stores.lifecycle.find(&record.id).unwrap();
        state.read_at_utc = Some(now() - Duration::minutes(1));
        stores.lifecycle.update(&state).unwrap();

        let eval = evaluator(&stores).evaluate(&record, now()).unwrap();
        let kinds: Vec<_> = eval.actions.iter().map(|a| a.action).collect();
        assert!(!kinds.contains(&RuleActionKind::ReceiverNudge));
        assert!(kinds.contains(&RuleActionKind::SenderReminder));
        assert!(kinds.contains(&RuleActionKind::AutoFollowup));
    }

    #[test]
    fn test_replied_message_is_terminal() {
        let stores = open_stores();
        let record = delivered_message(&stores, 20);
        let mut state = stores.lifecycle.find(&record.id).unwrap();
        state.read_at_utc = Some(now());
        state.replied_at_utc = Some(now());
        stores.lifecycle.update(&state).unwrap();

        let eval = evaluator(&stores).evaluate(&record, now()).unwrap();
        assert!(eval.actions.is_empty());
    }

    #[test]
    fn test_undelivered_message_fires_nothing() {
        let stores = open_stores();
        let delivered_at = now() - Duration::minutes(30);
        let record = MessageRecord {
            id: MessageRecord::new_id(),
            sender_id: "user_us".into(),
            receiver_id: "user_ng".into(),
            content: "later".into(),
            sender_timezone: "America/New_York".into(),
            receiver_timezone: "Africa/Lagos".into(),
            sender_local_time: "x".into(),
            receiver_local_time: "x".into(),
            utc_time: delivered_at,
            status: MessageStatus::Delayed,
            scheduled_for_utc: Some(now() + Duration::hours(10)),
            created_at: delivered_at,
        };
        stores.messages.create(&record).unwrap();
        stores
            .lifecycle
            .create(&MessageLifecycleState::for_message(&record))
            .unwrap();

        let eval = evaluator(&stores).evaluate(&record, now()).unwrap();
        assert!(eval.actions.is_empty());
        assert!(eval.logs.iter().all(|l| !l.triggered));
    }

    #[test]
    fn test_missing_lifecycle_state_yields_empty_result() {
        let stores = open_stores();
        let record = delivered_message(&stores, 20);
        // Simulate a record whose paired state never landed
        let orphan = MessageRecord {
            id: "msg-orphan".into(),
            ..record
        };
        stores.messages.create(&orphan).unwrap();

        let eval = evaluator(&stores).evaluate(&orphan, now()).unwrap();
        assert!(eval.actions.is_empty());
        assert!(eval.logs.is_empty());
    }

    #[test]
    fn test_evaluate_message_not_found() {
        let stores = open_stores();
        let err = evaluator(&stores)
            .evaluate_message("msg-nope", now())
            .unwrap_err();
        assert!(matches!(err, CourierError::MessageNotFound(_)));
    }

    #[test]
    fn test_unknown_gate_party_fails_open() {
        let stores = open_stores();
        let mut record = delivered_message(&stores, 6);
        // Receiver with a window on record but absent from the directory
        record.receiver_id = "user_ghost".into();
        stores.messages.create(&record).unwrap();
        stores
            .lifecycle
            .create(&MessageLifecycleState::for_message(&record))
            .unwrap();
        stores
            .active_hours
            .set("user_ghost", ActiveHours::new(0, 1))
            .unwrap();

        let eval = evaluator(&stores).evaluate(&record, now()).unwrap();
        // Gate cannot resolve the party → no restriction → nudge fires
        assert_eq!(eval.actions.len(), 1);
    }
}
