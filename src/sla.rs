//! SLA policy evaluation.
//!
//! Pure functions only: `now` is always passed in by the caller, and the
//! evaluator never writes anything. Breach flags already persisted on a
//! complaint are treated as monotonic sentinels and are never cleared by
//! re-evaluation, even if timestamps or thresholds change afterwards.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Complaint, ComplaintPriority, EngineSettings};

/// Response/resolution deadlines for a priority, in hours from creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaDeadlines {
    pub response_hours: i64,
    pub resolution_hours: i64,
}

/// Deadlines applicable to `priority`, or `None` when SLA tracking is
/// disabled. Critical complaints use the critical thresholds; every other
/// priority uses the standard pair.
pub fn deadlines(settings: &EngineSettings, priority: ComplaintPriority) -> Option<SlaDeadlines> {
    if !settings.sla_enabled {
        return None;
    }
    let (response, resolution) = if priority == ComplaintPriority::Critical {
        (
            settings.sla_critical_response_hours,
            settings.sla_critical_resolution_hours,
        )
    } else {
        (
            settings.sla_response_time_hours,
            settings.sla_resolution_time_hours,
        )
    };
    Some(SlaDeadlines {
        response_hours: i64::from(response),
        resolution_hours: i64::from(resolution),
    })
}

/// Breach verdict for a complaint at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlaBreach {
    pub response: bool,
    pub resolution: bool,
}

impl SlaBreach {
    pub fn any(&self) -> bool {
        self.response || self.resolution
    }
}

/// Evaluate both SLA clocks for `complaint` at `now`.
///
/// The response clock runs from `created_at` until `first_response_at`
/// (or `now` while unanswered); the resolution clock runs from `created_at`
/// until `resolved_at` (or `now` while open). Flags already set on the
/// complaint are OR-ed in, so a previously recorded breach survives any
/// later timestamp correction or threshold change.
pub fn evaluate(settings: &EngineSettings, complaint: &Complaint, now: DateTime<Utc>) -> SlaBreach {
    let stored = SlaBreach {
        response: complaint.sla_response_breached,
        resolution: complaint.sla_resolution_breached,
    };

    let Some(deadlines) = deadlines(settings, complaint.priority) else {
        return stored;
    };

    let response_elapsed = complaint.first_response_at.unwrap_or(now) - complaint.created_at;
    let resolution_elapsed = complaint.resolved_at.unwrap_or(now) - complaint.created_at;

    SlaBreach {
        response: stored.response || response_elapsed > Duration::hours(deadlines.response_hours),
        resolution: stored.resolution
            || resolution_elapsed > Duration::hours(deadlines.resolution_hours),
    }
}
