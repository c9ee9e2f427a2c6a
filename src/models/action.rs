use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::RequestStatus;

/// One decision event. Append-only: written once when a request leaves
/// pending, never mutated, removed only by a cascade when the parent
/// request is purged.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ApprovalAction {
    pub id: Uuid,
    pub request_id: Uuid,
    pub approver_id: Uuid,
    pub decision: Decision,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    /// The terminal request status this decision produces.
    pub fn terminal_status(&self) -> RequestStatus {
        match self {
            Decision::Approved => RequestStatus::Approved,
            Decision::Rejected => RequestStatus::Rejected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }
}
