use async_graphql::{Enum, InputObject, SimpleObject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, SimpleObject)]
pub struct Complaint {
    pub id: Uuid,
    /// Human-readable ticket code, unique and stable once generated.
    pub ticket_code: String,
    pub submitted_by: Uuid,
    pub category: ComplaintCategory,
    pub description: String,
    pub status: ComplaintStatus,
    pub priority: ComplaintPriority,
    pub assigned_to: Option<Uuid>,
    pub escalation_level: i32,
    pub escalation_reason: Option<String>,
    pub sla_response_breached: bool,
    pub sla_resolution_breached: bool,
    pub first_response_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Doubles as the optimistic-concurrency token for conditional updates.
    pub updated_at: DateTime<Utc>,
}

impl Complaint {
    /// A complaint is open while the engine may still act on it.
    pub fn is_open(&self) -> bool {
        !matches!(self.status, ComplaintStatus::Resolved)
    }
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "complaint_status", rename_all = "snake_case")]
pub enum ComplaintStatus {
    Pending,
    InProgress,
    Resolved,
}

impl ComplaintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplaintStatus::Pending => "pending",
            ComplaintStatus::InProgress => "in_progress",
            ComplaintStatus::Resolved => "resolved",
        }
    }
}

#[derive(
    Debug, Clone, Copy, Enum, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "complaint_priority", rename_all = "snake_case")]
pub enum ComplaintPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl ComplaintPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplaintPriority::Low => "low",
            ComplaintPriority::Medium => "medium",
            ComplaintPriority::High => "high",
            ComplaintPriority::Critical => "critical",
        }
    }

    /// One step up the low -> medium -> high -> critical ladder.
    /// Critical stays critical.
    pub fn raised(self) -> Self {
        match self {
            ComplaintPriority::Low => ComplaintPriority::Medium,
            ComplaintPriority::Medium => ComplaintPriority::High,
            ComplaintPriority::High | ComplaintPriority::Critical => ComplaintPriority::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "complaint_category", rename_all = "snake_case")]
pub enum ComplaintCategory {
    Academic,
    Facilities,
    Financial,
    Housing,
    Harassment,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, SimpleObject)]
pub struct Agent {
    pub id: Uuid,
    pub display_name: String,
    /// Seniors are the only eligible targets for escalation reassignment.
    pub is_senior: bool,
    pub is_available: bool,
    pub last_assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Assignment candidate snapshot: an available agent joined with its
/// current unresolved-complaint count. Workload is derived per query,
/// never stored on the agent row.
#[derive(Debug, Clone, FromRow)]
pub struct Candidate {
    pub id: Uuid,
    pub is_senior: bool,
    pub last_assigned_at: Option<DateTime<Utc>>,
    pub open_complaints: i64,
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "assignment_method", rename_all = "snake_case")]
pub enum AssignmentMethod {
    Workload,
    RoundRobin,
    Manual,
}

/// Per-deployment engine configuration, read fresh at the start of every
/// engine invocation so settings changes take effect on the next tick.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, SimpleObject)]
pub struct EngineSettings {
    pub auto_assign_complaints: bool,
    pub assignment_method: AssignmentMethod,
    pub escalation_enabled: bool,
    pub escalation_sla_breach_auto: bool,
    pub escalation_unresolved_hours: i32,
    pub escalation_max_level: i32,
    pub escalation_auto_priority: bool,
    pub sla_enabled: bool,
    pub sla_response_time_hours: i32,
    pub sla_resolution_time_hours: i32,
    pub sla_critical_response_hours: i32,
    pub sla_critical_resolution_hours: i32,
}

impl Default for EngineSettings {
    /// Fail-safe defaults used when no settings row exists: the engine
    /// neither assigns nor escalates until a deployment configures it.
    fn default() -> Self {
        Self {
            auto_assign_complaints: false,
            assignment_method: AssignmentMethod::Workload,
            escalation_enabled: false,
            escalation_sla_breach_auto: false,
            escalation_unresolved_hours: 48,
            escalation_max_level: 3,
            escalation_auto_priority: false,
            sla_enabled: true,
            sla_response_time_hours: 24,
            sla_resolution_time_hours: 72,
            sla_critical_response_hours: 4,
            sla_critical_resolution_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, SimpleObject)]
pub struct HistoryEvent {
    pub id: Uuid,
    pub complaint_id: Uuid,
    pub event_type: HistoryEventType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// Null for engine-generated events.
    pub changed_by: Option<Uuid>,
    #[graphql(skip)]
    pub metadata: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "history_event_type", rename_all = "snake_case")]
pub enum HistoryEventType {
    Created,
    StatusChange,
    PriorityChange,
    Assignment,
    Escalation,
    SlaBreach,
}

/// A not-yet-persisted history event. The store stamps id and timestamp
/// when the record is appended alongside its state write.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub complaint_id: Uuid,
    pub event_type: HistoryEventType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_by: Option<Uuid>,
    pub metadata: serde_json::Value,
}

impl HistoryRecord {
    pub fn new(complaint_id: Uuid, event_type: HistoryEventType) -> Self {
        Self {
            complaint_id,
            event_type,
            old_value: None,
            new_value: None,
            changed_by: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn values(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    pub fn by(mut self, actor: Option<Uuid>) -> Self {
        self.changed_by = actor;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Field-level patch applied to a complaint under an optimistic condition.
/// `None` leaves the column untouched; breach flags and the escalation level
/// are additionally kept monotonic by the store.
#[derive(Debug, Clone, Default)]
pub struct ComplaintPatch {
    pub status: Option<ComplaintStatus>,
    pub priority: Option<ComplaintPriority>,
    pub assigned_to: Option<Uuid>,
    pub escalation_level: Option<i32>,
    pub escalation_reason: Option<String>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub sla_response_breached: Option<bool>,
    pub sla_resolution_breached: Option<bool>,
}

impl ComplaintPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_none()
            && self.assigned_to.is_none()
            && self.escalation_level.is_none()
            && self.escalation_reason.is_none()
            && self.escalated_at.is_none()
            && self.first_response_at.is_none()
            && self.resolved_at.is_none()
            && self.sla_response_breached.is_none()
            && self.sla_resolution_breached.is_none()
    }
}

// Input types
#[derive(Debug, Clone, InputObject)]
pub struct CreateComplaintInput {
    pub submitted_by: Uuid,
    pub category: ComplaintCategory,
    pub priority: ComplaintPriority,
    pub description: String,
}

#[derive(Debug, Clone, Default, InputObject)]
pub struct ComplaintFilter {
    pub status: Option<ComplaintStatus>,
    pub priority: Option<ComplaintPriority>,
    pub assigned_to: Option<Uuid>,
    pub submitted_by: Option<Uuid>,
    pub category: Option<ComplaintCategory>,
}
