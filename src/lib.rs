//! # campus-complaints
//!
//! Complaint lifecycle engine for student-services deployments.
//!
//! ## Features
//!
//! - **Auto-Assignment** - Workload-based, round-robin, or manual routing of
//!   new complaints across the available agent roster
//! - **SLA Tracking** - Per-priority response/resolution deadlines with
//!   monotonic breach flags
//! - **Escalation Sweeps** - Periodic re-evaluation of open complaints with
//!   level raises, priority bumps, and senior reassignment
//! - **Audit History** - Append-only event trail for every engine-driven
//!   transition
//! - **GraphQL API** - Queries and mutations for complaint management
//! - **Store Seam** - PostgreSQL data access layer behind a trait, with
//!   optimistic concurrency on every engine write
//!
//! ## Usage
//!
//! ### In a Service
//!
//! ```rust,no_run
//! use campus_complaints::{LifecycleEngine, PgComplaintStore, ComplaintQueries, ComplaintMutations};
//! use sqlx::PgPool;
//! use std::sync::Arc;
//!
//! # async fn example(db_pool: PgPool) {
//! // Create the engine over the Postgres store
//! let store = Arc::new(PgComplaintStore::new(db_pool.clone()));
//! let engine = Arc::new(LifecycleEngine::new(store));
//!
//! // Add to GraphQL context
//! // Schema::build(QueryRoot, MutationRoot, EmptySubscription)
//! //     .data(engine)
//! //     .finish()
//! # }
//! ```
//!
//! ### Periodic sweep
//!
//! An external scheduler (cron, a tokio interval task) drives escalation.
//! `now` is injected so the engine stays deterministic under test:
//!
//! ```rust,no_run
//! # use campus_complaints::LifecycleEngine;
//! # async fn tick(engine: &LifecycleEngine) -> campus_complaints::Result<()> {
//! let report = engine.run_escalation_sweep(chrono::Utc::now()).await?;
//! tracing::info!(checked = report.checked, escalated = report.escalated, "sweep done");
//! # Ok(())
//! # }
//! ```

pub mod assignment;
pub mod engine;
pub mod escalation;
pub mod graphql;
pub mod models;
pub mod sla;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use engine::LifecycleEngine;
pub use escalation::SweepReport;
pub use graphql::{ComplaintMutations, ComplaintQueries};
pub use models::*;
pub use store::{ComplaintStore, PgComplaintStore, RotationPool};

use thiserror::Error;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Complaint not found: {0}")]
    ComplaintNotFound(uuid::Uuid),

    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(uuid::Uuid),

    #[error("No agents available for assignment")]
    NoAgentsAvailable,

    #[error("Complaint {0} was modified concurrently")]
    ConcurrentModification(uuid::Uuid),

    #[error("No engine settings row configured")]
    ConfigurationMissing,

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: models::ComplaintStatus,
        to: models::ComplaintStatus,
    },

    #[error("Escalation sweep aborted after {checked} checked, {escalated} escalated: {source}")]
    SweepAborted {
        checked: i64,
        escalated: i64,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True when the underlying persistence layer looks unreachable, as
    /// opposed to a single row failing. The sweep aborts early on these
    /// and reports partial counts; per-row failures are skipped instead.
    pub fn is_persistence_outage(&self) -> bool {
        matches!(
            self,
            EngineError::Database(
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
