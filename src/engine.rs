//! The lifecycle engine: initial assignment, status transitions, and the
//! periodic escalation sweep.
//!
//! Settings are re-read at the start of every public entry point rather
//! than cached, so a deployment can flip assignment or escalation behavior
//! and have it take effect on the next tick without a restart. `now` is
//! injected everywhere; only the outermost caller reads a wall clock.
//!
//! The engine never assumes it is the sole writer: admins may change
//! status, priority, or assignment out of band, and every engine write is
//! an optimistic read-evaluate-write that retries once on a lost race and
//! otherwise leaves the complaint for the next tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::escalation::{self, SweepReport};
use crate::models::{
    AssignmentMethod, Complaint, ComplaintPatch, ComplaintPriority, ComplaintStatus,
    CreateComplaintInput, EngineSettings, HistoryEventType, HistoryRecord,
};
use crate::sla;
use crate::store::{ComplaintStore, RotationPool};
use crate::{assignment, EngineError, Result};

pub struct LifecycleEngine {
    store: Arc<dyn ComplaintStore>,
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn ComplaintStore>) -> Self {
        Self { store }
    }

    /// Direct store access for read-side resolvers.
    pub fn store(&self) -> &Arc<dyn ComplaintStore> {
        &self.store
    }

    async fn settings(&self) -> Result<EngineSettings> {
        match self.store.load_settings().await {
            Ok(settings) => Ok(settings),
            Err(EngineError::ConfigurationMissing) => {
                tracing::warn!("No engine settings configured, using fail-safe defaults");
                Ok(EngineSettings::default())
            }
            Err(e) => Err(e),
        }
    }

    /// File a new complaint and run the assignment policy once.
    ///
    /// Assignment failures never fail the intake: if no agent is available
    /// (or the method is manual) the complaint stays unassigned and is
    /// returned as created.
    pub async fn file_complaint(
        &self,
        input: CreateComplaintInput,
        now: DateTime<Utc>,
    ) -> Result<Complaint> {
        let settings = self.settings().await?;
        let complaint = self.store.create_complaint(&input, now).await?;

        let created = HistoryRecord::new(complaint.id, HistoryEventType::Created)
            .values(None, Some(complaint.status.as_str().to_string()))
            .by(Some(input.submitted_by))
            .with_metadata(json!({
                "ticket_code": complaint.ticket_code,
                "priority": complaint.priority.as_str(),
            }));
        self.store.append_history(&[created], now).await?;

        if !settings.auto_assign_complaints {
            return Ok(complaint);
        }

        match self
            .pick_agent(RotationPool::Intake, settings.assignment_method, now)
            .await
        {
            Ok(Some(agent_id)) => self.commit_assignment(complaint, agent_id, None, now).await,
            Ok(None) => {
                tracing::info!(
                    ticket = %complaint.ticket_code,
                    "no agent available for initial assignment"
                );
                Ok(complaint)
            }
            Err(e) => {
                // The complaint exists either way; assignment can be done
                // by hand or retried, so intake reports success.
                tracing::warn!(
                    ticket = %complaint.ticket_code,
                    error = %e,
                    "initial assignment failed, complaint left unassigned"
                );
                Ok(complaint)
            }
        }
    }

    /// Run the assignment policy for `pool` and return the pick, if any.
    async fn pick_agent(
        &self,
        pool: RotationPool,
        method: AssignmentMethod,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        if !assignment::is_automatic(method) {
            return Ok(None);
        }

        let candidates = self.store.candidates(pool).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        match method {
            AssignmentMethod::Workload => Ok(assignment::select_workload(&candidates)),
            AssignmentMethod::RoundRobin => {
                let mut ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
                ids.sort();
                self.store.advance_rotation(pool, &ids, now).await
            }
            AssignmentMethod::Manual => Ok(None),
        }
    }

    async fn commit_assignment(
        &self,
        complaint: Complaint,
        agent_id: Uuid,
        actor: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Complaint> {
        let mut current = complaint;
        for attempt in 0..2 {
            let patch = ComplaintPatch {
                assigned_to: Some(agent_id),
                ..Default::default()
            };
            let event = HistoryRecord::new(current.id, HistoryEventType::Assignment)
                .values(
                    current.assigned_to.map(|id| id.to_string()),
                    Some(agent_id.to_string()),
                )
                .by(actor);

            match self
                .store
                .apply_patch(current.id, current.updated_at, &patch, &[event], now)
                .await
            {
                Ok(updated) => {
                    self.store.record_assignment(agent_id, now).await?;
                    return Ok(updated);
                }
                Err(EngineError::ConcurrentModification(_)) if attempt == 0 => {
                    current = self.store.complaint(current.id).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::ConcurrentModification(current.id))
    }

    /// Administrative assignment override (the "manual" path).
    pub async fn assign_complaint(
        &self,
        complaint_id: Uuid,
        agent_id: Uuid,
        actor: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Complaint> {
        let complaint = self.store.complaint(complaint_id).await?;
        self.commit_assignment(complaint, agent_id, actor, now).await
    }

    /// Move a complaint along the pending -> in_progress -> resolved
    /// machine. Backward moves and anything out of `resolved` are rejected;
    /// reopening is an administrative concern outside the engine.
    pub async fn set_status(
        &self,
        complaint_id: Uuid,
        new_status: ComplaintStatus,
        actor: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Complaint> {
        let mut complaint = self.store.complaint(complaint_id).await?;

        for attempt in 0..2 {
            let (patch, events) = status_transition(&complaint, new_status, actor, now)?;
            match self
                .store
                .apply_patch(complaint.id, complaint.updated_at, &patch, &events, now)
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(EngineError::ConcurrentModification(_)) if attempt == 0 => {
                    complaint = self.store.complaint(complaint_id).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::ConcurrentModification(complaint_id))
    }

    /// Administrative priority override.
    pub async fn set_priority(
        &self,
        complaint_id: Uuid,
        new_priority: ComplaintPriority,
        actor: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Complaint> {
        let mut complaint = self.store.complaint(complaint_id).await?;

        for attempt in 0..2 {
            if complaint.priority == new_priority {
                return Ok(complaint);
            }
            let patch = ComplaintPatch {
                priority: Some(new_priority),
                ..Default::default()
            };
            let event = HistoryRecord::new(complaint.id, HistoryEventType::PriorityChange)
                .values(
                    Some(complaint.priority.as_str().to_string()),
                    Some(new_priority.as_str().to_string()),
                )
                .by(actor);

            match self
                .store
                .apply_patch(complaint.id, complaint.updated_at, &patch, &[event], now)
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(EngineError::ConcurrentModification(_)) if attempt == 0 => {
                    complaint = self.store.complaint(complaint_id).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::ConcurrentModification(complaint_id))
    }

    pub async fn set_agent_availability(
        &self,
        agent_id: Uuid,
        is_available: bool,
        now: DateTime<Utc>,
    ) -> Result<crate::models::Agent> {
        self.store
            .set_agent_availability(agent_id, is_available, now)
            .await
    }

    /// One escalation sweep over all open complaints below the level cap.
    ///
    /// Per-complaint failures are logged and skipped; only a persistence
    /// outage aborts the sweep, and then with the partial counts attached.
    pub async fn run_escalation_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let settings = self.settings().await?;

        if !settings.escalation_enabled {
            tracing::debug!("escalation disabled, skipping sweep");
            return Ok(SweepReport::default());
        }

        let candidates = self
            .store
            .escalation_candidates(settings.escalation_max_level)
            .await?;

        let mut report = SweepReport::default();
        for complaint in candidates {
            report.checked += 1;
            let ticket = complaint.ticket_code.clone();
            match self.escalate_one(&settings, complaint, now).await {
                Ok(true) => report.escalated += 1,
                Ok(false) => {}
                Err(e) if e.is_persistence_outage() => {
                    tracing::error!(error = %e, "persistence unavailable, aborting sweep");
                    return Err(EngineError::SweepAborted {
                        checked: report.checked,
                        escalated: report.escalated,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    tracing::warn!(ticket = %ticket, error = %e, "skipping complaint in sweep");
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            escalated = report.escalated,
            "escalation sweep complete"
        );
        Ok(report)
    }

    /// Evaluate one candidate and commit whatever it needs: newly observed
    /// breach flags, and the escalation itself when a trigger fires.
    /// Returns whether the complaint escalated.
    async fn escalate_one(
        &self,
        settings: &EngineSettings,
        complaint: Complaint,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut current = complaint;

        for attempt in 0..2 {
            let breach = sla::evaluate(settings, &current, now);

            let mut patch = ComplaintPatch::default();
            let mut events = Vec::new();

            if breach.response && !current.sla_response_breached {
                patch.sla_response_breached = Some(true);
                events.push(
                    HistoryRecord::new(current.id, HistoryEventType::SlaBreach)
                        .values(None, Some("response".to_string())),
                );
            }
            if breach.resolution && !current.sla_resolution_breached {
                patch.sla_resolution_breached = Some(true);
                events.push(
                    HistoryRecord::new(current.id, HistoryEventType::SlaBreach)
                        .values(None, Some("resolution".to_string())),
                );
            }

            let trigger = escalation::eligibility(settings, &current, &breach, now);
            let escalating = trigger.is_some();
            let mut picked: Option<Uuid> = None;

            if let Some(trigger) = trigger {
                let decision = escalation::decide(settings, &current, &trigger);

                patch.escalation_level = Some(decision.new_level);
                patch.escalated_at = Some(now);
                patch.escalation_reason = Some(decision.reason.clone());

                if let Some(new_priority) = decision.new_priority {
                    patch.priority = Some(new_priority);
                    events.push(
                        HistoryRecord::new(current.id, HistoryEventType::PriorityChange)
                            .values(
                                Some(current.priority.as_str().to_string()),
                                Some(new_priority.as_str().to_string()),
                            )
                            .with_metadata(json!({ "trigger": "escalation" })),
                    );
                }

                // Reassign among available seniors. An empty pool does not
                // block the escalation itself; the event metadata records
                // the failed attempt.
                picked = self
                    .pick_agent(RotationPool::Escalation, settings.assignment_method, now)
                    .await?;
                if let Some(agent_id) = picked {
                    patch.assigned_to = Some(agent_id);
                    events.push(
                        HistoryRecord::new(current.id, HistoryEventType::Assignment)
                            .values(
                                current.assigned_to.map(|id| id.to_string()),
                                Some(agent_id.to_string()),
                            )
                            .with_metadata(json!({ "trigger": "escalation" })),
                    );
                }

                events.push(
                    HistoryRecord::new(current.id, HistoryEventType::Escalation)
                        .values(
                            Some(current.escalation_level.to_string()),
                            Some(decision.new_level.to_string()),
                        )
                        .with_metadata(json!({
                            "reason": decision.reason,
                            "reassigned": picked.is_some(),
                        })),
                );
            }

            if patch.is_empty() {
                return Ok(false);
            }

            match self
                .store
                .apply_patch(current.id, current.updated_at, &patch, &events, now)
                .await
            {
                Ok(_) => {
                    if let Some(agent_id) = picked {
                        self.store.record_assignment(agent_id, now).await?;
                    }
                    return Ok(escalating);
                }
                Err(EngineError::ConcurrentModification(_)) if attempt == 0 => {
                    // Lost a race with an out-of-band write; re-read and
                    // re-evaluate once against the fresh state.
                    current = self.store.complaint(current.id).await?;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(
            ticket = %current.ticket_code,
            "lost optimistic race twice, deferring to next sweep"
        );
        Ok(false)
    }
}

fn status_transition(
    complaint: &Complaint,
    new_status: ComplaintStatus,
    actor: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<(ComplaintPatch, Vec<HistoryRecord>)> {
    fn rank(status: ComplaintStatus) -> u8 {
        match status {
            ComplaintStatus::Pending => 0,
            ComplaintStatus::InProgress => 1,
            ComplaintStatus::Resolved => 2,
        }
    }

    if rank(new_status) <= rank(complaint.status) {
        return Err(EngineError::InvalidTransition {
            from: complaint.status,
            to: new_status,
        });
    }

    let mut patch = ComplaintPatch {
        status: Some(new_status),
        ..Default::default()
    };
    if complaint.status == ComplaintStatus::Pending {
        // First departure from pending is the first response, set once.
        patch.first_response_at = Some(now);
    }
    if new_status == ComplaintStatus::Resolved {
        patch.resolved_at = Some(now);
    }

    let event = HistoryRecord::new(complaint.id, HistoryEventType::StatusChange)
        .values(
            Some(complaint.status.as_str().to_string()),
            Some(new_status.as_str().to_string()),
        )
        .by(actor);

    Ok((patch, vec![event]))
}
