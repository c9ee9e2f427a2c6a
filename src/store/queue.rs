//! Queue maintainer: keeps `queue_position` a dense 1..N ranking of the
//! pending set, ordered by `(created_at, rowid)`.
//!
//! Every function here runs on the caller's connection, inside the caller's
//! transaction. The maintainer never owns rows and never commits: if any
//! statement fails, the enclosing transaction rolls back and no partial
//! reindex is ever visible.
//!
//! Two guards keep the recompute from cascading:
//! - [`needs_reindex`] is the trigger predicate. Writes that do not change
//!   pending-set membership (title or content edits) skip the recompute
//!   entirely.
//! - The reindex statement rewrites only rows whose computed rank differs
//!   from the stored position, so running it twice against an unchanged
//!   pending set touches zero rows.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::models::request::RequestStatus;

/// Trigger predicate: does a status transition change pending-set membership?
///
/// `old` is `None` for a fresh insert. Returns true exactly when the row
/// enters or leaves the pending set — the only writes that may move anyone
/// else's position.
pub fn needs_reindex(old: Option<RequestStatus>, new: Option<RequestStatus>) -> bool {
    let was_pending = matches!(old, Some(RequestStatus::Pending));
    let is_pending = matches!(new, Some(RequestStatus::Pending));
    was_pending != is_pending
}

/// Rank a freshly inserted pending row without a second pass: one more than
/// the number of pending rows created strictly earlier (insertion order
/// breaks created-at ties).
pub async fn position_for_insert(
    conn: &mut SqliteConnection,
    created_at: DateTime<Utc>,
    rowid: i64,
) -> Result<i64, sqlx::Error> {
    let earlier: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM requests
           WHERE status = 'pending'
             AND (created_at < ?1 OR (created_at = ?1 AND rowid < ?2))"#,
    )
    .bind(created_at)
    .bind(rowid)
    .fetch_one(&mut *conn)
    .await?;

    Ok(earlier + 1)
}

/// Recompute the dense ranking of the pending set and write back only the
/// rows whose rank moved. Returns the number of rows rewritten.
///
/// `exclude` is the row currently being written by the enclosing operation:
/// it must not observe its own half-committed state, and its own position is
/// assigned (or cleared) by that operation, not here.
pub async fn reindex(
    conn: &mut SqliteConnection,
    exclude: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    // Uuid::nil never collides with a v4 id, so a single statement covers
    // both the excluding and the full-set maintenance form.
    let excluded = exclude.unwrap_or(Uuid::nil());

    let result = sqlx::query(
        r#"UPDATE requests
           SET queue_position = ranked.rank,
               updated_at = ?2
           FROM (
               SELECT id, ROW_NUMBER() OVER (ORDER BY created_at, rowid) AS rank
               FROM requests
               WHERE status = 'pending' AND id <> ?1
           ) AS ranked
           WHERE requests.id = ranked.id
             AND requests.queue_position IS NOT ranked.rank"#,
    )
    .bind(excluded)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let rewritten = result.rows_affected();
    if rewritten > 0 {
        tracing::debug!(rewritten, "queue positions recomputed");
    }
    Ok(rewritten)
}
