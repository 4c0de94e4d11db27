//! Test doubles: an in-memory [`ComplaintStore`] and fixture builders.
//!
//! `MemoryStore` mirrors the Postgres store's semantics - optimistic token
//! checks, set-once timestamps, monotonic flags and level - so engine tests
//! exercise the same contract the production store enforces in SQL.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Agent, Candidate, Complaint, ComplaintFilter, ComplaintPatch, CreateComplaintInput,
    EngineSettings, HistoryEvent, HistoryRecord,
};
use crate::store::{ComplaintStore, RotationPool};
use crate::{assignment, EngineError, Result};

#[derive(Default)]
struct Inner {
    settings: Option<EngineSettings>,
    complaints: BTreeMap<Uuid, Complaint>,
    agents: BTreeMap<Uuid, Agent>,
    history: Vec<HistoryEvent>,
    rotation: HashMap<&'static str, Uuid>,
    conflict_once: HashSet<Uuid>,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let store = Self::default();
        store.inner.lock().unwrap().settings = Some(settings);
        store
    }

    pub fn insert_agent(&self, name: &str, is_senior: bool, is_available: bool) -> Uuid {
        let id = Uuid::new_v4();
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        self.inner.lock().unwrap().agents.insert(
            id,
            Agent {
                id,
                display_name: name.to_string(),
                is_senior,
                is_available,
                last_assigned_at: None,
                created_at: epoch,
                updated_at: epoch,
            },
        );
        id
    }

    /// Seed `count` open complaints already assigned to `agent_id`.
    pub fn seed_open_complaints(&self, agent_id: Uuid, count: usize, at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        for _ in 0..count {
            let mut c = fixtures::complaint_created_at(at, crate::models::ComplaintPriority::Low);
            c.assigned_to = Some(agent_id);
            inner.complaints.insert(c.id, c);
        }
    }

    pub fn force_escalation_level(&self, id: Uuid, level: i32) {
        let mut inner = self.inner.lock().unwrap();
        let c = inner.complaints.get_mut(&id).unwrap();
        c.escalation_level = level;
    }

    /// Make the next patch against `id` lose its optimistic race.
    pub fn conflict_once(&self, id: Uuid) {
        self.inner.lock().unwrap().conflict_once.insert(id);
    }

    pub fn get(&self, id: Uuid) -> Complaint {
        self.inner.lock().unwrap().complaints.get(&id).unwrap().clone()
    }

    pub fn agent(&self, id: Uuid) -> Agent {
        self.inner.lock().unwrap().agents.get(&id).unwrap().clone()
    }

    pub fn events_for(&self, complaint_id: Uuid) -> Vec<HistoryEvent> {
        self.inner
            .lock()
            .unwrap()
            .history
            .iter()
            .filter(|e| e.complaint_id == complaint_id)
            .cloned()
            .collect()
    }
}

fn stamp(event: &HistoryRecord, now: DateTime<Utc>) -> HistoryEvent {
    HistoryEvent {
        id: Uuid::new_v4(),
        complaint_id: event.complaint_id,
        event_type: event.event_type,
        old_value: event.old_value.clone(),
        new_value: event.new_value.clone(),
        changed_by: event.changed_by,
        metadata: event.metadata.clone(),
        created_at: now,
    }
}

#[async_trait]
impl ComplaintStore for MemoryStore {
    async fn load_settings(&self) -> Result<EngineSettings> {
        self.inner
            .lock()
            .unwrap()
            .settings
            .clone()
            .ok_or(EngineError::ConfigurationMissing)
    }

    async fn create_complaint(
        &self,
        input: &CreateComplaintInput,
        now: DateTime<Utc>,
    ) -> Result<Complaint> {
        let mut c = fixtures::complaint_created_at(now, input.priority);
        c.submitted_by = input.submitted_by;
        c.category = input.category;
        c.description = input.description.clone();
        self.inner.lock().unwrap().complaints.insert(c.id, c.clone());
        Ok(c)
    }

    async fn complaint(&self, id: Uuid) -> Result<Complaint> {
        self.inner
            .lock()
            .unwrap()
            .complaints
            .get(&id)
            .cloned()
            .ok_or(EngineError::ComplaintNotFound(id))
    }

    async fn complaint_by_code(&self, ticket_code: &str) -> Result<Complaint> {
        self.inner
            .lock()
            .unwrap()
            .complaints
            .values()
            .find(|c| c.ticket_code == ticket_code)
            .cloned()
            .ok_or_else(|| EngineError::TicketNotFound(ticket_code.to_string()))
    }

    async fn list_complaints(
        &self,
        filter: &ComplaintFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Complaint>> {
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<Complaint> = inner
            .complaints
            .values()
            .filter(|c| filter.status.map_or(true, |s| c.status == s))
            .filter(|c| filter.priority.map_or(true, |p| c.priority == p))
            .filter(|c| filter.assigned_to.map_or(true, |a| c.assigned_to == Some(a)))
            .filter(|c| filter.submitted_by.map_or(true, |u| c.submitted_by == u))
            .filter(|c| filter.category.map_or(true, |k| c.category == k))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn escalation_candidates(&self, max_level: i32) -> Result<Vec<Complaint>> {
        let inner = self.inner.lock().unwrap();
        let mut candidates: Vec<Complaint> = inner
            .complaints
            .values()
            .filter(|c| c.is_open() && c.escalation_level < max_level)
            .cloned()
            .collect();
        candidates.sort_by_key(|c| c.created_at);
        Ok(candidates)
    }

    async fn apply_patch(
        &self,
        id: Uuid,
        expected_updated_at: DateTime<Utc>,
        patch: &ComplaintPatch,
        events: &[HistoryRecord],
        now: DateTime<Utc>,
    ) -> Result<Complaint> {
        let mut inner = self.inner.lock().unwrap();

        if inner.conflict_once.remove(&id) {
            return Err(EngineError::ConcurrentModification(id));
        }

        let Some(c) = inner.complaints.get_mut(&id) else {
            return Err(EngineError::ComplaintNotFound(id));
        };
        if c.updated_at != expected_updated_at {
            return Err(EngineError::ConcurrentModification(id));
        }

        if let Some(status) = patch.status {
            c.status = status;
        }
        if let Some(priority) = patch.priority {
            c.priority = priority;
        }
        if let Some(assigned_to) = patch.assigned_to {
            c.assigned_to = Some(assigned_to);
        }
        if let Some(level) = patch.escalation_level {
            c.escalation_level = c.escalation_level.max(level);
        }
        if let Some(reason) = &patch.escalation_reason {
            c.escalation_reason = Some(reason.clone());
        }
        if let Some(at) = patch.escalated_at {
            c.escalated_at = Some(at);
        }
        // Set-once semantics, as in the SQL COALESCE.
        if c.first_response_at.is_none() {
            c.first_response_at = patch.first_response_at;
        }
        if c.resolved_at.is_none() {
            c.resolved_at = patch.resolved_at;
        }
        // Monotonic flags.
        c.sla_response_breached |= patch.sla_response_breached.unwrap_or(false);
        c.sla_resolution_breached |= patch.sla_resolution_breached.unwrap_or(false);
        c.updated_at = now;

        let updated = c.clone();
        for event in events {
            let stamped = stamp(event, now);
            inner.history.push(stamped);
        }
        Ok(updated)
    }

    async fn append_history(&self, events: &[HistoryRecord], now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for event in events {
            let stamped = stamp(event, now);
            inner.history.push(stamped);
        }
        Ok(())
    }

    async fn history(&self, complaint_id: Uuid) -> Result<Vec<HistoryEvent>> {
        Ok(self.events_for(complaint_id))
    }

    async fn candidates(&self, pool: RotationPool) -> Result<Vec<Candidate>> {
        let inner = self.inner.lock().unwrap();
        let candidates = inner
            .agents
            .values()
            .filter(|a| a.is_available && (!pool.seniors_only() || a.is_senior))
            .map(|a| Candidate {
                id: a.id,
                is_senior: a.is_senior,
                last_assigned_at: a.last_assigned_at,
                open_complaints: inner
                    .complaints
                    .values()
                    .filter(|c| c.assigned_to == Some(a.id) && c.is_open())
                    .count() as i64,
            })
            .collect();
        Ok(candidates)
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        Ok(self.inner.lock().unwrap().agents.values().cloned().collect())
    }

    async fn record_assignment(&self, agent_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let agent = inner
            .agents
            .get_mut(&agent_id)
            .ok_or(EngineError::AgentNotFound(agent_id))?;
        agent.last_assigned_at = Some(now);
        agent.updated_at = now;
        Ok(())
    }

    async fn set_agent_availability(
        &self,
        agent_id: Uuid,
        is_available: bool,
        now: DateTime<Utc>,
    ) -> Result<Agent> {
        let mut inner = self.inner.lock().unwrap();
        let agent = inner
            .agents
            .get_mut(&agent_id)
            .ok_or(EngineError::AgentNotFound(agent_id))?;
        agent.is_available = is_available;
        agent.updated_at = now;
        Ok(agent.clone())
    }

    async fn advance_rotation(
        &self,
        pool: RotationPool,
        ordered_ids: &[Uuid],
        _now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let mut inner = self.inner.lock().unwrap();
        let cursor = inner.rotation.get(pool.key()).copied();
        let next = assignment::next_in_rotation(cursor, ordered_ids);
        if let Some(agent_id) = next {
            inner.rotation.insert(pool.key(), agent_id);
        }
        Ok(next)
    }
}

pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use crate::models::{
        Complaint, ComplaintCategory, ComplaintPriority, ComplaintStatus, EngineSettings,
    };

    pub fn complaint_created_at(at: DateTime<Utc>, priority: ComplaintPriority) -> Complaint {
        let id = Uuid::new_v4();
        Complaint {
            id,
            ticket_code: format!("CMP-{}", &id.simple().to_string()[..8].to_uppercase()),
            submitted_by: Uuid::new_v4(),
            category: ComplaintCategory::Other,
            description: "fixture".to_string(),
            status: ComplaintStatus::Pending,
            priority,
            assigned_to: None,
            escalation_level: 0,
            escalation_reason: None,
            sla_response_breached: false,
            sla_resolution_breached: false,
            first_response_at: None,
            resolved_at: None,
            escalated_at: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn settings_with_sla(
        response: i32,
        resolution: i32,
        critical_response: i32,
        critical_resolution: i32,
    ) -> EngineSettings {
        EngineSettings {
            sla_enabled: true,
            sla_response_time_hours: response,
            sla_resolution_time_hours: resolution,
            sla_critical_response_hours: critical_response,
            sla_critical_resolution_hours: critical_resolution,
            ..Default::default()
        }
    }

    pub fn settings_with_escalation(unresolved_hours: i32, max_level: i32) -> EngineSettings {
        EngineSettings {
            escalation_enabled: true,
            escalation_unresolved_hours: unresolved_hours,
            escalation_max_level: max_level,
            ..Default::default()
        }
    }
}
