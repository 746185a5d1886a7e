//! Per-user delivery windows and the policy that applies them to instants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock;

/// A user's local-time delivery window, half-open `[start_hour, end_hour)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHours {
    /// Local hour 0-23, inclusive lower bound.
    pub start_hour: u32,
    /// Local hour 0-23, exclusive upper bound.
    pub end_hour: u32,
}

impl ActiveHours {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self { start_hour, end_hour }
    }

    /// Half-open window check.
    ///
    /// A window with `start_hour == end_hour` is treated as always open.
    /// With `wraparound` off, a window spanning midnight (start > end, e.g.
    /// 22-6) rejects every hour — this matches the legacy behavior and is a
    /// documented limitation, not an accident of this port. Turning
    /// `wraparound` on enables the corrected two-segment check.
    pub fn contains(&self, local_hour: u32, wraparound: bool) -> bool {
        if self.start_hour == self.end_hour {
            return true;
        }
        if wraparound && self.start_hour > self.end_hour {
            return local_hour >= self.start_hour || local_hour < self.end_hour;
        }
        local_hour >= self.start_hour && local_hour < self.end_hour
    }
}

/// Outcome of the next-allowed-delivery computation.
#[derive(Debug, Clone, Serialize)]
pub struct DeliverySlot {
    pub utc: DateTime<Utc>,
    pub local_time: String,
    pub is_delayed: bool,
}

/// Applies active-hours windows to concrete UTC instants.
///
/// Fail-open throughout: no window configured, or a timezone that cannot be
/// resolved, means "deliverable". A delivery system should not silently
/// swallow messages because of a formatting error.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryPolicy {
    /// See [`ActiveHours::contains`].
    pub wraparound_windows: bool,
}

impl DeliveryPolicy {
    pub fn new(wraparound_windows: bool) -> Self {
        Self { wraparound_windows }
    }

    /// Is a local hour inside the window right now?
    ///
    /// `local_hour = None` is the unresolved-timezone sentinel from
    /// [`clock::local_hour`]; `hours = None` means the user has no window
    /// configured. Both resolve to deliverable.
    pub fn can_deliver_now(&self, local_hour: Option<u32>, hours: Option<&ActiveHours>) -> bool {
        match (local_hour, hours) {
            (_, None) => true,
            (None, _) => true,
            (Some(h), Some(w)) => w.contains(h, self.wraparound_windows),
        }
    }

    /// If `now_utc` is inside the window, the slot is `now_utc` undelayed.
    /// Otherwise the earliest UTC instant whose local rendering is exactly
    /// `start_hour:00` — today if the local hour is still before the window,
    /// else the next calendar day in that zone.
    pub fn next_allowed_delivery(
        &self,
        now_utc: DateTime<Utc>,
        timezone: &str,
        hours: &ActiveHours,
    ) -> DeliverySlot {
        let local_hour = clock::local_hour(now_utc, timezone);
        if self.can_deliver_now(local_hour, Some(hours)) {
            return DeliverySlot {
                utc: now_utc,
                local_time: clock::local_string(now_utc, timezone),
                is_delayed: false,
            };
        }

        // local_hour resolved (an unresolved zone is deliverable above), so
        // next_local_instant resolves too; the fallback keeps us fail-open.
        let next = clock::next_local_instant(now_utc, timezone, hours.start_hour)
            .unwrap_or(now_utc);
        DeliverySlot {
            utc: next,
            local_time: clock::local_string(next, timezone),
            is_delayed: true,
        }
    }
}
