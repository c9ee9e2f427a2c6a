use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One approval submission.
///
/// `queue_position` is the dense 1..N rank over the pending set, ordered by
/// `created_at` (insertion order breaks ties). It is non-null exactly while
/// `status` is pending; the queue maintainer clears it on the terminal
/// transition and closes the gap for everyone behind.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Request {
    pub id: Uuid,
    pub submitter_id: Uuid,
    pub title: String,
    pub content: Option<String>,
    pub department: String,
    pub status: RequestStatus,
    pub queue_position: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    /// Approved and rejected are absorbing; only pending rows may transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

/// Payload for `Store::submit`. The submitter is the acting principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequest {
    pub title: String,
    pub content: Option<String>,
    pub department: String,
}
