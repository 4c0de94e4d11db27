//! GraphQL API for the complaint lifecycle engine.
//!
//! Provides ComplaintQueries and ComplaintMutations that can be integrated
//! into any service's GraphQL schema.
//!
//! ## Usage in Services
//!
//! Services should delegate to these query/mutation structs and provide
//! `Arc<LifecycleEngine>` in the GraphQL context.
//!
//! Authorization checks should be done by the service layer before
//! delegating to these resolvers. The wall clock is read here, at the
//! outermost layer; everything below takes `now` as an argument.

use async_graphql::{Context, Object, Result as GraphQLResult};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::LifecycleEngine;
use crate::escalation::SweepReport;
use crate::models::{
    Agent, Complaint, ComplaintFilter, ComplaintPriority, ComplaintStatus, CreateComplaintInput,
    HistoryEvent,
};

pub struct ComplaintQueries;

#[Object(name = "Query", extends)]
impl ComplaintQueries {
    /// Get a single complaint by ID
    ///
    /// Note: Services should implement authorization checks before calling this
    async fn complaint(&self, ctx: &Context<'_>, id: Uuid) -> GraphQLResult<Complaint> {
        let engine = ctx.data::<Arc<LifecycleEngine>>()?;

        let complaint = engine.store().complaint(id).await?;
        Ok(complaint)
    }

    /// Look a complaint up by its ticket code
    async fn complaint_by_code(
        &self,
        ctx: &Context<'_>,
        ticket_code: String,
    ) -> GraphQLResult<Complaint> {
        let engine = ctx.data::<Arc<LifecycleEngine>>()?;

        let complaint = engine.store().complaint_by_code(&ticket_code).await?;
        Ok(complaint)
    }

    /// List complaints with filters
    ///
    /// Note: Services should implement authorization checks and apply filters
    async fn complaints(
        &self,
        ctx: &Context<'_>,
        filter: Option<ComplaintFilter>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> GraphQLResult<Vec<Complaint>> {
        let engine = ctx.data::<Arc<LifecycleEngine>>()?;

        let complaints = engine
            .store()
            .list_complaints(
                &filter.unwrap_or_default(),
                limit.unwrap_or(20),
                offset.unwrap_or(0),
            )
            .await?;

        Ok(complaints)
    }

    /// Audit trail for a complaint, oldest first
    async fn complaint_history(
        &self,
        ctx: &Context<'_>,
        complaint_id: Uuid,
    ) -> GraphQLResult<Vec<HistoryEvent>> {
        let engine = ctx.data::<Arc<LifecycleEngine>>()?;

        let events = engine.store().history(complaint_id).await?;
        Ok(events)
    }

    /// The agent roster
    ///
    /// Note: Services should implement admin-only authorization before calling this
    async fn agents(&self, ctx: &Context<'_>) -> GraphQLResult<Vec<Agent>> {
        let engine = ctx.data::<Arc<LifecycleEngine>>()?;

        let agents = engine.store().list_agents().await?;
        Ok(agents)
    }
}

pub struct ComplaintMutations;

#[Object(name = "Mutation", extends)]
impl ComplaintMutations {
    /// File a new complaint; the assignment policy runs once, synchronously
    ///
    /// Note: Services should verify user authentication before calling this
    async fn file_complaint(
        &self,
        ctx: &Context<'_>,
        input: CreateComplaintInput,
    ) -> GraphQLResult<Complaint> {
        let engine = ctx.data::<Arc<LifecycleEngine>>()?;

        let complaint = engine.file_complaint(input, Utc::now()).await?;
        Ok(complaint)
    }

    /// Move a complaint forward through pending -> in_progress -> resolved
    ///
    /// Note: Services should provide actor_id from authenticated user context
    async fn set_complaint_status(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        status: ComplaintStatus,
        actor_id: Option<Uuid>,
    ) -> GraphQLResult<Complaint> {
        let engine = ctx.data::<Arc<LifecycleEngine>>()?;

        let complaint = engine.set_status(id, status, actor_id, Utc::now()).await?;
        Ok(complaint)
    }

    /// Administrative priority override
    async fn set_complaint_priority(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        priority: ComplaintPriority,
        actor_id: Option<Uuid>,
    ) -> GraphQLResult<Complaint> {
        let engine = ctx.data::<Arc<LifecycleEngine>>()?;

        let complaint = engine
            .set_priority(id, priority, actor_id, Utc::now())
            .await?;
        Ok(complaint)
    }

    /// Hand a complaint to a specific agent (the manual assignment path)
    ///
    /// Note: Services should implement admin-only authorization before calling this
    async fn assign_complaint(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        agent_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> GraphQLResult<Complaint> {
        let engine = ctx.data::<Arc<LifecycleEngine>>()?;

        let complaint = engine
            .assign_complaint(id, agent_id, actor_id, Utc::now())
            .await?;
        Ok(complaint)
    }

    /// Toggle an agent's availability; unavailable agents leave every
    /// assignment candidate pool
    ///
    /// Note: Services should ensure agents can only toggle themselves
    async fn set_agent_availability(
        &self,
        ctx: &Context<'_>,
        agent_id: Uuid,
        is_available: bool,
    ) -> GraphQLResult<Agent> {
        let engine = ctx.data::<Arc<LifecycleEngine>>()?;

        let agent = engine
            .set_agent_availability(agent_id, is_available, Utc::now())
            .await?;
        Ok(agent)
    }

    /// Run one escalation sweep; meant to be called by an external
    /// scheduler on a fixed interval
    async fn run_escalation_sweep(&self, ctx: &Context<'_>) -> GraphQLResult<SweepReport> {
        let engine = ctx.data::<Arc<LifecycleEngine>>()?;

        let report = engine.run_escalation_sweep(Utc::now()).await?;
        Ok(report)
    }
}
