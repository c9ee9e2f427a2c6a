//! Committed-state change feed.
//!
//! The store publishes a row-level event after every commit; external
//! delivery (websockets, webhooks, polling endpoints) subscribes here. The
//! only guarantee is "eventually reflects latest committed state": a
//! subscriber that lags past the buffer loses the oldest events and should
//! re-read the store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::models::action::ApprovalAction;
use crate::models::profile::Profile;
use crate::models::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A row-level event on one of the core tables.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    /// Source table: "requests", "approval_actions" or "profiles".
    pub table: &'static str,
    pub op: ChangeOp,
    pub row_id: Uuid,
    /// Commit-side timestamp of the triggering write.
    pub at: DateTime<Utc>,
    /// Event-specific details (status, position, decision, role).
    pub details: serde_json::Value,
}

impl ChangeEvent {
    pub fn request_inserted(request: &Request) -> Self {
        Self {
            table: "requests",
            op: ChangeOp::Insert,
            row_id: request.id,
            at: request.updated_at,
            details: serde_json::json!({
                "status": request.status,
                "queue_position": request.queue_position,
            }),
        }
    }

    pub fn request_updated(request: &Request) -> Self {
        Self {
            table: "requests",
            op: ChangeOp::Update,
            row_id: request.id,
            at: request.updated_at,
            details: serde_json::json!({
                "status": request.status,
                "queue_position": request.queue_position,
            }),
        }
    }

    pub fn request_deleted(request_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            table: "requests",
            op: ChangeOp::Delete,
            row_id: request_id,
            at,
            details: serde_json::Value::Null,
        }
    }

    pub fn action_inserted(action: &ApprovalAction) -> Self {
        Self {
            table: "approval_actions",
            op: ChangeOp::Insert,
            row_id: action.id,
            at: action.created_at,
            details: serde_json::json!({
                "request_id": action.request_id,
                "decision": action.decision,
            }),
        }
    }

    pub fn action_deleted(action_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            table: "approval_actions",
            op: ChangeOp::Delete,
            row_id: action_id,
            at,
            details: serde_json::Value::Null,
        }
    }

    pub fn profile_upserted(profile: &Profile) -> Self {
        Self {
            table: "profiles",
            op: ChangeOp::Update,
            row_id: profile.id,
            at: profile.updated_at,
            details: serde_json::json!({ "role": profile.role }),
        }
    }
}

/// Broadcast fan-out of [`ChangeEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream` for async consumers.
    pub fn stream(&self) -> BroadcastStream<ChangeEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Fire-and-forget publish. Having no subscribers is normal.
    pub fn publish(&self, event: ChangeEvent) {
        tracing::debug!(
            table = event.table,
            op = ?event.op,
            row_id = %event.row_id,
            "change event"
        );
        let _ = self.tx.send(event);
    }
}

// ── Tests ─────────────────────────────────────────────────────
