//! Escalation rules.
//!
//! Everything here is a pure decision over a complaint snapshot, injected
//! settings, and an injected `now`; the sweep driver in [`crate::engine`]
//! turns decisions into atomic writes. A complaint may escalate many times
//! over its life, one level per sweep, up to the configured cap.

use async_graphql::SimpleObject;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Complaint, ComplaintPriority, EngineSettings};
use crate::sla::SlaBreach;

/// Why a complaint is escalating in this sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationTrigger {
    /// Open longer than `escalation_unresolved_hours`.
    Unresolved { hours_open: i64 },
    /// An SLA clock was missed and breach-driven escalation is enabled.
    SlaBreach { response: bool, resolution: bool },
}

impl EscalationTrigger {
    /// Human-readable reason stored on the complaint and in the event trail.
    pub fn reason(&self) -> String {
        match self {
            EscalationTrigger::Unresolved { hours_open } => {
                format!("Unresolved for {} hours", hours_open)
            }
            EscalationTrigger::SlaBreach { response: true, .. } => {
                "SLA breach: response".to_string()
            }
            EscalationTrigger::SlaBreach { .. } => "SLA breach: resolution".to_string(),
        }
    }
}

/// Decide whether `complaint` escalates in the sweep running at `now`.
///
/// The unresolved-duration trigger requires a cool-down of half the
/// threshold since the last escalation (or creation), so a complaint that
/// just escalated is not bounced again on the next tick. The SLA-breach
/// trigger honors the same cool-down once an escalation has happened;
/// before the first one it fires as soon as the breach is observed.
pub fn eligibility(
    settings: &EngineSettings,
    complaint: &Complaint,
    breach: &SlaBreach,
    now: DateTime<Utc>,
) -> Option<EscalationTrigger> {
    if !complaint.is_open() || complaint.escalation_level >= settings.escalation_max_level {
        return None;
    }

    let threshold = Duration::hours(i64::from(settings.escalation_unresolved_hours));
    // Half the threshold, in minutes, to avoid truncating odd hour counts.
    let cool_down = Duration::minutes(i64::from(settings.escalation_unresolved_hours) * 30);

    let since_last = now - complaint.escalated_at.unwrap_or(complaint.created_at);
    let open_for = now - complaint.created_at;

    if open_for > threshold && since_last >= cool_down {
        return Some(EscalationTrigger::Unresolved {
            hours_open: since_last.num_hours(),
        });
    }

    if settings.escalation_sla_breach_auto && breach.any() {
        let cooled = match complaint.escalated_at {
            Some(last) => now - last >= cool_down,
            None => true,
        };
        if cooled {
            return Some(EscalationTrigger::SlaBreach {
                response: breach.response,
                resolution: breach.resolution,
            });
        }
    }

    None
}

/// The state changes one escalation applies. Status is never touched.
#[derive(Debug, Clone)]
pub struct EscalationDecision {
    pub new_level: i32,
    /// `Some` only when auto-priority is on and there is room to raise.
    pub new_priority: Option<ComplaintPriority>,
    pub reason: String,
}

pub fn decide(
    settings: &EngineSettings,
    complaint: &Complaint,
    trigger: &EscalationTrigger,
) -> EscalationDecision {
    let new_level = (complaint.escalation_level + 1).min(settings.escalation_max_level);

    let new_priority = if settings.escalation_auto_priority
        && complaint.priority != ComplaintPriority::Critical
    {
        Some(complaint.priority.raised())
    } else {
        None
    };

    EscalationDecision {
        new_level,
        new_priority,
        reason: trigger.reason(),
    }
}

/// Outcome of one `run_escalation_sweep` invocation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, SimpleObject)]
pub struct SweepReport {
    /// Candidates examined (open, below the level cap).
    pub checked: i64,
    /// Complaints actually escalated.
    pub escalated: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{complaint_created_at, settings_with_escalation};
    use chrono::TimeZone;

    fn t(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    const NO_BREACH: SlaBreach = SlaBreach {
        response: false,
        resolution: false,
    };

    #[test]
    fn unresolved_past_threshold_escalates() {
        let settings = settings_with_escalation(48, 3);
        // Created 50 hours before the sweep, never escalated.
        let complaint = complaint_created_at(t(1, 0), ComplaintPriority::Medium);

        let trigger = eligibility(&settings, &complaint, &NO_BREACH, t(3, 2));
        assert_eq!(
            trigger,
            Some(EscalationTrigger::Unresolved { hours_open: 50 })
        );
    }

    #[test]
    fn cool_down_blocks_immediate_re_escalation() {
        let settings = settings_with_escalation(48, 3);
        let mut complaint = complaint_created_at(t(1, 0), ComplaintPriority::Medium);
        complaint.escalation_level = 1;
        complaint.escalated_at = Some(t(3, 2));

        // One hour after escalating: cool-down (24h) not yet elapsed.
        assert_eq!(eligibility(&settings, &complaint, &NO_BREACH, t(3, 3)), None);

        // Thirty hours after: eligible again.
        let trigger = eligibility(&settings, &complaint, &NO_BREACH, t(4, 8));
        assert_eq!(
            trigger,
            Some(EscalationTrigger::Unresolved { hours_open: 30 })
        );
    }

    #[test]
    fn max_level_excludes_however_overdue() {
        let settings = settings_with_escalation(48, 3);
        let mut complaint = complaint_created_at(t(1, 0), ComplaintPriority::Medium);
        complaint.escalation_level = 3;

        let breach = SlaBreach {
            response: true,
            resolution: true,
        };
        // Weeks overdue and fully breached, but already at the cap.
        assert_eq!(eligibility(&settings, &complaint, &breach, t(28, 0)), None);
    }

    #[test]
    fn breach_trigger_requires_the_auto_flag() {
        let mut settings = settings_with_escalation(48, 3);
        let complaint = complaint_created_at(t(1, 0), ComplaintPriority::Critical);
        let breach = SlaBreach {
            response: true,
            resolution: false,
        };

        settings.escalation_sla_breach_auto = false;
        assert_eq!(eligibility(&settings, &complaint, &breach, t(1, 5)), None);

        settings.escalation_sla_breach_auto = true;
        let trigger = eligibility(&settings, &complaint, &breach, t(1, 5));
        assert_eq!(
            trigger,
            Some(EscalationTrigger::SlaBreach {
                response: true,
                resolution: false,
            })
        );
    }

    #[test]
    fn breach_trigger_cools_down_after_first_escalation() {
        let mut settings = settings_with_escalation(48, 3);
        settings.escalation_sla_breach_auto = true;
        let mut complaint = complaint_created_at(t(1, 0), ComplaintPriority::Critical);
        complaint.escalation_level = 1;
        complaint.escalated_at = Some(t(1, 5));
        let breach = SlaBreach {
            response: true,
            resolution: false,
        };

        // Same stale breach a minute later must not escalate again.
        assert_eq!(eligibility(&settings, &complaint, &breach, t(1, 6)), None);
    }

    #[test]
    fn resolved_complaints_never_escalate() {
        let settings = settings_with_escalation(48, 3);
        let mut complaint = complaint_created_at(t(1, 0), ComplaintPriority::Medium);
        complaint.status = crate::models::ComplaintStatus::Resolved;
        complaint.resolved_at = Some(t(5, 0));

        assert_eq!(eligibility(&settings, &complaint, &NO_BREACH, t(10, 0)), None);
    }

    #[test]
    fn decision_caps_level_and_raises_priority_one_step() {
        let mut settings = settings_with_escalation(48, 2);
        settings.escalation_auto_priority = true;
        let mut complaint = complaint_created_at(t(1, 0), ComplaintPriority::High);
        complaint.escalation_level = 2;

        let decision = decide(
            &settings,
            &complaint,
            &EscalationTrigger::Unresolved { hours_open: 99 },
        );
        assert_eq!(decision.new_level, 2);
        assert_eq!(decision.new_priority, Some(ComplaintPriority::Critical));
    }

    #[test]
    fn critical_priority_is_not_raised_further() {
        let mut settings = settings_with_escalation(48, 3);
        settings.escalation_auto_priority = true;
        let complaint = complaint_created_at(t(1, 0), ComplaintPriority::Critical);

        let decision = decide(
            &settings,
            &complaint,
            &EscalationTrigger::Unresolved { hours_open: 50 },
        );
        assert_eq!(decision.new_priority, None);
    }

    #[test]
    fn reason_strings_name_the_trigger() {
        assert_eq!(
            EscalationTrigger::Unresolved { hours_open: 50 }.reason(),
            "Unresolved for 50 hours"
        );
        assert_eq!(
            EscalationTrigger::SlaBreach {
                response: true,
                resolution: true
            }
            .reason(),
            "SLA breach: response"
        );
        assert_eq!(
            EscalationTrigger::SlaBreach {
                response: false,
                resolution: true
            }
            .reason(),
            "SLA breach: resolution"
        );
    }
}
