//! Persistence seam for the lifecycle engine.
//!
//! The engine talks to storage through [`ComplaintStore`] so every rule can
//! be exercised against an in-memory double with injected timestamps.
//! [`PgComplaintStore`] is the production implementation: PostgreSQL via
//! sqlx, with each engine write performed as a conditional update plus its
//! history append in one transaction, so state and audit trail can never
//! drift apart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    Agent, Candidate, Complaint, ComplaintFilter, ComplaintPatch, ComplaintStatus,
    CreateComplaintInput, EngineSettings, HistoryEvent, HistoryRecord,
};
use crate::{assignment, EngineError, Result};

/// Which agent pool a selection (and its rotation cursor) runs against.
/// Initial assignment draws from every available agent; escalation draws
/// from available seniors only, on an independent cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotationPool {
    Intake,
    Escalation,
}

impl RotationPool {
    pub fn key(&self) -> &'static str {
        match self {
            RotationPool::Intake => "intake",
            RotationPool::Escalation => "escalation",
        }
    }

    pub fn seniors_only(&self) -> bool {
        matches!(self, RotationPool::Escalation)
    }
}

#[async_trait]
pub trait ComplaintStore: Send + Sync {
    /// Read the singleton settings row. `Err(ConfigurationMissing)` when no
    /// row exists; the engine falls back to fail-safe defaults.
    async fn load_settings(&self) -> Result<EngineSettings>;

    async fn create_complaint(
        &self,
        input: &CreateComplaintInput,
        now: DateTime<Utc>,
    ) -> Result<Complaint>;

    async fn complaint(&self, id: Uuid) -> Result<Complaint>;

    async fn complaint_by_code(&self, ticket_code: &str) -> Result<Complaint>;

    async fn list_complaints(
        &self,
        filter: &ComplaintFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Complaint>>;

    /// Open complaints still below the escalation level cap.
    async fn escalation_candidates(&self, max_level: i32) -> Result<Vec<Complaint>>;

    /// Conditionally patch a complaint and append its history events in one
    /// atomic unit. The write only lands if the row's `updated_at` still
    /// equals `expected_updated_at`; otherwise `ConcurrentModification`.
    async fn apply_patch(
        &self,
        id: Uuid,
        expected_updated_at: DateTime<Utc>,
        patch: &ComplaintPatch,
        events: &[HistoryRecord],
        now: DateTime<Utc>,
    ) -> Result<Complaint>;

    /// Append history events not tied to a state write (e.g. `created`).
    async fn append_history(&self, events: &[HistoryRecord], now: DateTime<Utc>) -> Result<()>;

    async fn history(&self, complaint_id: Uuid) -> Result<Vec<HistoryEvent>>;

    /// Available agents for `pool`, each with its derived open-complaint
    /// count, in ascending-id order.
    async fn candidates(&self, pool: RotationPool) -> Result<Vec<Candidate>>;

    async fn list_agents(&self) -> Result<Vec<Agent>>;

    /// Stamp `last_assigned_at` after a successful pick (feeds the workload
    /// tie-break).
    async fn record_assignment(&self, agent_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    async fn set_agent_availability(
        &self,
        agent_id: Uuid,
        is_available: bool,
        now: DateTime<Utc>,
    ) -> Result<Agent>;

    /// Atomically advance `pool`'s rotation cursor past the next candidate
    /// in `ordered_ids` and return that candidate. The read-modify-write
    /// runs under a row lock so concurrent assignments cannot pick the
    /// same slot.
    async fn advance_rotation(
        &self,
        pool: RotationPool,
        ordered_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>>;
}

/// Ticket codes are derived from the complaint id so they are unique and
/// stable without a coordination round-trip.
fn ticket_code(id: &Uuid) -> String {
    let simple = id.simple().to_string();
    format!("CMP-{}", simple[..8].to_uppercase())
}

pub struct PgComplaintStore {
    pool: PgPool,
}

impl PgComplaintStore {
    /// The pool's acquire and statement timeouts bound every call here;
    /// the engine relies on that to never hang a sweep.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ComplaintStore for PgComplaintStore {
    async fn load_settings(&self) -> Result<EngineSettings> {
        let settings = sqlx::query_as::<_, EngineSettings>(
            "SELECT * FROM engine_settings ORDER BY created_at ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load engine settings: {}", e);
            EngineError::Database(e)
        })?;

        settings.ok_or(EngineError::ConfigurationMissing)
    }

    async fn create_complaint(
        &self,
        input: &CreateComplaintInput,
        now: DateTime<Utc>,
    ) -> Result<Complaint> {
        let id = Uuid::new_v4();
        let complaint = sqlx::query_as::<_, Complaint>(
            r#"
            INSERT INTO complaints (
                id, ticket_code, submitted_by, category, description,
                status, priority, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(ticket_code(&id))
        .bind(input.submitted_by)
        .bind(input.category)
        .bind(&input.description)
        .bind(ComplaintStatus::Pending)
        .bind(input.priority)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create complaint: {}", e);
            EngineError::Database(e)
        })?;

        Ok(complaint)
    }

    async fn complaint(&self, id: Uuid) -> Result<Complaint> {
        let complaint = sqlx::query_as::<_, Complaint>("SELECT * FROM complaints WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => EngineError::ComplaintNotFound(id),
                _ => {
                    tracing::error!("Failed to fetch complaint: {}", e);
                    EngineError::Database(e)
                }
            })?;

        Ok(complaint)
    }

    async fn complaint_by_code(&self, ticket_code: &str) -> Result<Complaint> {
        let complaint =
            sqlx::query_as::<_, Complaint>("SELECT * FROM complaints WHERE ticket_code = $1")
                .bind(ticket_code)
                .fetch_optional(&self.pool)
                .await
                .map_err(EngineError::Database)?;

        complaint.ok_or_else(|| EngineError::TicketNotFound(ticket_code.to_string()))
    }

    async fn list_complaints(
        &self,
        filter: &ComplaintFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Complaint>> {
        let mut query = String::from("SELECT * FROM complaints WHERE TRUE");
        let mut params_count = 0;

        if filter.status.is_some() {
            params_count += 1;
            query.push_str(&format!(" AND status = ${}", params_count));
        }

        if filter.priority.is_some() {
            params_count += 1;
            query.push_str(&format!(" AND priority = ${}", params_count));
        }

        if filter.assigned_to.is_some() {
            params_count += 1;
            query.push_str(&format!(" AND assigned_to = ${}", params_count));
        }

        if filter.submitted_by.is_some() {
            params_count += 1;
            query.push_str(&format!(" AND submitted_by = ${}", params_count));
        }

        if filter.category.is_some() {
            params_count += 1;
            query.push_str(&format!(" AND category = ${}", params_count));
        }

        query.push_str(" ORDER BY created_at DESC");
        query.push_str(&format!(" LIMIT ${} OFFSET ${}", params_count + 1, params_count + 2));

        let mut q = sqlx::query_as::<_, Complaint>(&query);

        if let Some(status) = filter.status {
            q = q.bind(status);
        }
        if let Some(priority) = filter.priority {
            q = q.bind(priority);
        }
        if let Some(assigned_to) = filter.assigned_to {
            q = q.bind(assigned_to);
        }
        if let Some(submitted_by) = filter.submitted_by {
            q = q.bind(submitted_by);
        }
        if let Some(category) = filter.category {
            q = q.bind(category);
        }

        q = q.bind(limit).bind(offset);

        let complaints = q.fetch_all(&self.pool).await.map_err(EngineError::Database)?;

        Ok(complaints)
    }

    async fn escalation_candidates(&self, max_level: i32) -> Result<Vec<Complaint>> {
        let complaints = sqlx::query_as::<_, Complaint>(
            r#"
            SELECT * FROM complaints
            WHERE status IN ('pending', 'in_progress')
              AND escalation_level < $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(max_level)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch escalation candidates: {}", e);
            EngineError::Database(e)
        })?;

        Ok(complaints)
    }

    async fn apply_patch(
        &self,
        id: Uuid,
        expected_updated_at: DateTime<Utc>,
        patch: &ComplaintPatch,
        events: &[HistoryRecord],
        now: DateTime<Utc>,
    ) -> Result<Complaint> {
        let mut tx = self.pool.begin().await.map_err(EngineError::Database)?;

        // first_response_at/resolved_at are set-exactly-once and the breach
        // flags and escalation level are monotonic; the SQL enforces both
        // even if a caller hands in a stale patch.
        let updated = sqlx::query_as::<_, Complaint>(
            r#"
            UPDATE complaints SET
                status = COALESCE($3, status),
                priority = COALESCE($4, priority),
                assigned_to = COALESCE($5, assigned_to),
                escalation_level = GREATEST(escalation_level, COALESCE($6, escalation_level)),
                escalation_reason = COALESCE($7, escalation_reason),
                escalated_at = COALESCE($8, escalated_at),
                first_response_at = COALESCE(first_response_at, $9),
                resolved_at = COALESCE(resolved_at, $10),
                sla_response_breached = sla_response_breached OR COALESCE($11, FALSE),
                sla_resolution_breached = sla_resolution_breached OR COALESCE($12, FALSE),
                updated_at = $13
            WHERE id = $1 AND updated_at = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected_updated_at)
        .bind(patch.status)
        .bind(patch.priority)
        .bind(patch.assigned_to)
        .bind(patch.escalation_level)
        .bind(&patch.escalation_reason)
        .bind(patch.escalated_at)
        .bind(patch.first_response_at)
        .bind(patch.resolved_at)
        .bind(patch.sla_response_breached)
        .bind(patch.sla_resolution_breached)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to patch complaint {}: {}", id, e);
            EngineError::Database(e)
        })?;

        let Some(updated) = updated else {
            // Missing row vs lost race: probe to tell them apart.
            let exists = sqlx::query_scalar::<_, i32>("SELECT 1 FROM complaints WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(EngineError::Database)?;
            return Err(match exists {
                Some(_) => EngineError::ConcurrentModification(id),
                None => EngineError::ComplaintNotFound(id),
            });
        };

        for event in events {
            insert_history(&mut tx, event, now).await?;
        }

        tx.commit().await.map_err(EngineError::Database)?;

        Ok(updated)
    }

    async fn append_history(&self, events: &[HistoryRecord], now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(EngineError::Database)?;
        for event in events {
            insert_history(&mut tx, event, now).await?;
        }
        tx.commit().await.map_err(EngineError::Database)?;

        Ok(())
    }

    async fn history(&self, complaint_id: Uuid) -> Result<Vec<HistoryEvent>> {
        let events = sqlx::query_as::<_, HistoryEvent>(
            "SELECT * FROM complaint_history WHERE complaint_id = $1 ORDER BY created_at ASC",
        )
        .bind(complaint_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::Database)?;

        Ok(events)
    }

    async fn candidates(&self, pool: RotationPool) -> Result<Vec<Candidate>> {
        let candidates = sqlx::query_as::<_, Candidate>(
            r#"
            SELECT
                a.id,
                a.is_senior,
                a.last_assigned_at,
                COUNT(c.id) FILTER (WHERE c.status <> 'resolved')::BIGINT AS open_complaints
            FROM agents a
            LEFT JOIN complaints c ON c.assigned_to = a.id
            WHERE a.is_available = TRUE
              AND ($1 = FALSE OR a.is_senior = TRUE)
            GROUP BY a.id, a.is_senior, a.last_assigned_at
            ORDER BY a.id ASC
            "#,
        )
        .bind(pool.seniors_only())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch assignment candidates: {}", e);
            EngineError::Database(e)
        })?;

        Ok(candidates)
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let agents = sqlx::query_as::<_, Agent>("SELECT * FROM agents ORDER BY display_name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::Database)?;

        Ok(agents)
    }

    async fn record_assignment(&self, agent_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let result =
            sqlx::query("UPDATE agents SET last_assigned_at = $2, updated_at = $2 WHERE id = $1")
                .bind(agent_id)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(EngineError::Database)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::AgentNotFound(agent_id));
        }

        Ok(())
    }

    async fn set_agent_availability(
        &self,
        agent_id: Uuid,
        is_available: bool,
        now: DateTime<Utc>,
    ) -> Result<Agent> {
        let agent = sqlx::query_as::<_, Agent>(
            r#"
            UPDATE agents SET is_available = $2, updated_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(agent_id)
        .bind(is_available)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => EngineError::AgentNotFound(agent_id),
            _ => EngineError::Database(e),
        })?;

        Ok(agent)
    }

    async fn advance_rotation(
        &self,
        pool: RotationPool,
        ordered_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        if ordered_ids.is_empty() {
            return Ok(None);
        }

        let mut tx = self.pool.begin().await.map_err(EngineError::Database)?;

        // Seed the cursor row so the FOR UPDATE below always has something
        // to lock, then read-modify-write under that lock.
        sqlx::query(
            "INSERT INTO assignment_rotation (pool, last_agent_id, updated_at)
             VALUES ($1, NULL, $2)
             ON CONFLICT (pool) DO NOTHING",
        )
        .bind(pool.key())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(EngineError::Database)?;

        let cursor: Option<Uuid> = sqlx::query_scalar(
            "SELECT last_agent_id FROM assignment_rotation WHERE pool = $1 FOR UPDATE",
        )
        .bind(pool.key())
        .fetch_one(&mut *tx)
        .await
        .map_err(EngineError::Database)?;

        let next = assignment::next_in_rotation(cursor, ordered_ids);

        if let Some(agent_id) = next {
            sqlx::query(
                "UPDATE assignment_rotation SET last_agent_id = $2, updated_at = $3 WHERE pool = $1",
            )
            .bind(pool.key())
            .bind(agent_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::Database)?;
        }

        tx.commit().await.map_err(EngineError::Database)?;

        Ok(next)
    }
}

async fn insert_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &HistoryRecord,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO complaint_history (
            id, complaint_id, event_type, old_value, new_value, changed_by, metadata, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(event.complaint_id)
    .bind(event.event_type)
    .bind(&event.old_value)
    .bind(&event.new_value)
    .bind(event.changed_by)
    .bind(&event.metadata)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to append history event: {}", e);
        EngineError::Database(e)
    })?;

    Ok(())
}
