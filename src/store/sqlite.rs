//! SQLite-backed request store.
//!
//! All mutations run through a write pool capped at one connection, making
//! the pending set a single-writer serialization point: two concurrent
//! submits can never rank the same position, and two concurrent decisions
//! on one request resolve to exactly one winner. Reads go through a
//! separate pool and never block behind the writer (WAL).

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::auth::{Capability, Principal, Role};
use crate::errors::AppError;
use crate::models::action::{ApprovalAction, Decision};
use crate::models::profile::Profile;
use crate::models::request::{NewRequest, Request, RequestStatus};
use crate::notification::feed::{ChangeEvent, ChangeFeed};

use super::queue;

const REQUEST_COLUMNS: &str =
    "id, submitter_id, title, content, department, status, queue_position, created_at, updated_at";
const ACTION_COLUMNS: &str = "id, request_id, approver_id, decision, comment, created_at";

#[derive(Clone)]
pub struct Store {
    read: SqlitePool,
    write: SqlitePool,
    feed: ChangeFeed,
}

impl Store {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        Self::connect_with_capacity(database_url, 256).await
    }

    pub async fn connect_with_capacity(
        database_url: &str,
        feed_capacity: usize,
    ) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let write = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts.clone())
            .await?;
        let read = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        Ok(Self {
            read,
            write,
            feed: ChangeFeed::new(feed_capacity),
        })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.write).await?;
        Ok(())
    }

    /// Committed-state change feed. Subscribers only ever observe events
    /// published after their transaction committed.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    // -- Request Operations --

    /// Create a request in `pending` and assign its queue position, all in
    /// one transaction.
    pub async fn submit(&self, principal: &Principal, new: NewRequest) -> Result<Request, AppError> {
        principal.require(Capability::SubmitRequests)?;

        if principal.id.is_nil() {
            return Err(AppError::Validation {
                field: "submitter",
                reason: "missing submitter".into(),
            });
        }
        let title = new.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::Validation {
                field: "title",
                reason: "must not be empty".into(),
            });
        }
        let department = new.department.trim().to_string();
        if department.is_empty() {
            return Err(AppError::Validation {
                field: "department",
                reason: "must not be empty".into(),
            });
        }

        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = self.write.begin().await?;

        sqlx::query(
            r#"INSERT INTO requests
                   (id, submitter_id, title, content, department, status, queue_position, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, 'pending', NULL, ?6, ?6)"#,
        )
        .bind(id)
        .bind(principal.id)
        .bind(&title)
        .bind(&new.content)
        .bind(&department)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let rowid: i64 = sqlx::query_scalar("SELECT rowid FROM requests WHERE id = ?1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        // Step 1 of the maintainer: the new row ranks itself from the rows
        // created strictly earlier, no second pass needed.
        let position = queue::position_for_insert(&mut *tx, now, rowid).await?;
        sqlx::query("UPDATE requests SET queue_position = ?1 WHERE id = ?2")
            .bind(position)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if queue::needs_reindex(None, Some(RequestStatus::Pending)) {
            queue::reindex(&mut *tx, Some(id), now).await?;
        }

        let request = Self::fetch_request(&mut *tx, id)
            .await?
            .ok_or(AppError::NotFound)?;
        tx.commit().await?;

        self.feed.publish(ChangeEvent::request_inserted(&request));
        tracing::debug!(request_id = %id, position, "request submitted");
        Ok(request)
    }

    /// Transition a pending request to its terminal state and append the
    /// decision record, atomically.
    ///
    /// First decision wins: a request that already left `pending` yields
    /// `ConflictError`, never a silent success. The action row is written
    /// in the same transaction so a decided request can never lack its
    /// decision record.
    pub async fn decide(
        &self,
        principal: &Principal,
        request_id: Uuid,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<(Request, ApprovalAction), AppError> {
        principal.require(Capability::Decide)?;

        let now = Utc::now();
        let status = decision.terminal_status();

        let mut tx = self.write.begin().await?;

        let updated = sqlx::query(
            r#"UPDATE requests
               SET status = ?1, queue_position = NULL, updated_at = ?2
               WHERE id = ?3 AND status = 'pending'"#,
        )
        .bind(status)
        .bind(now)
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let current: Option<RequestStatus> =
                sqlx::query_scalar("SELECT status FROM requests WHERE id = ?1")
                    .bind(request_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            // tx drops here and rolls back.
            return Err(match current {
                Some(s) => AppError::Conflict(format!("request already {}", s.as_str())),
                None => AppError::NotFound,
            });
        }

        if queue::needs_reindex(Some(RequestStatus::Pending), Some(status)) {
            queue::reindex(&mut *tx, Some(request_id), now).await?;
        }

        let action_id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO approval_actions (id, request_id, approver_id, decision, comment, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        )
        .bind(action_id)
        .bind(request_id)
        .bind(principal.id)
        .bind(decision)
        .bind(&comment)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let request = Self::fetch_request(&mut *tx, request_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let action = Self::fetch_action(&mut *tx, action_id)
            .await?
            .ok_or(AppError::NotFound)?;

        tx.commit().await?;

        self.feed.publish(ChangeEvent::request_updated(&request));
        self.feed.publish(ChangeEvent::action_inserted(&action));
        tracing::info!(
            request_id = %request_id,
            approver = %principal.id,
            decision = decision.as_str(),
            "request decided"
        );
        Ok((request, action))
    }

    /// Edit title/content of a pending request. Only the submitter (or an
    /// admin) may edit, and the edit never touches queue positions: the
    /// trigger predicate sees unchanged membership and skips the reindex.
    pub async fn update_request_text(
        &self,
        principal: &Principal,
        request_id: Uuid,
        title: Option<String>,
        content: Option<String>,
    ) -> Result<Request, AppError> {
        principal.require(Capability::SubmitRequests)?;

        if let Some(t) = &title {
            if t.trim().is_empty() {
                return Err(AppError::Validation {
                    field: "title",
                    reason: "must not be empty".into(),
                });
            }
        }

        let now = Utc::now();
        let mut tx = self.write.begin().await?;

        let current = Self::fetch_request(&mut *tx, request_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if current.submitter_id != principal.id && !principal.can(Capability::ManageRoles) {
            return Err(AppError::NotOwner);
        }
        if current.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "request already {}",
                current.status.as_str()
            )));
        }

        sqlx::query(
            r#"UPDATE requests
               SET title = COALESCE(?1, title),
                   content = COALESCE(?2, content),
                   updated_at = ?3
               WHERE id = ?4"#,
        )
        .bind(title.map(|t| t.trim().to_string()))
        .bind(content)
        .bind(now)
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        // Membership unchanged, so the predicate keeps the maintainer quiet.
        if queue::needs_reindex(Some(current.status), Some(current.status)) {
            queue::reindex(&mut *tx, Some(request_id), now).await?;
        }

        let request = Self::fetch_request(&mut *tx, request_id)
            .await?
            .ok_or(AppError::NotFound)?;
        tx.commit().await?;

        self.feed.publish(ChangeEvent::request_updated(&request));
        Ok(request)
    }

    /// Remove a request outright (admin only). The decision record, if any,
    /// goes with it via the FK cascade; a pending removal closes the gap it
    /// leaves in the queue.
    pub async fn purge_request(
        &self,
        principal: &Principal,
        request_id: Uuid,
    ) -> Result<(), AppError> {
        principal.require(Capability::ManageRoles)?;

        let now = Utc::now();
        let mut tx = self.write.begin().await?;

        let current = Self::fetch_request(&mut *tx, request_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let action = Self::fetch_action_for(&mut *tx, request_id).await?;

        sqlx::query("DELETE FROM requests WHERE id = ?1")
            .bind(request_id)
            .execute(&mut *tx)
            .await?;

        if queue::needs_reindex(Some(current.status), None) {
            queue::reindex(&mut *tx, Some(request_id), now).await?;
        }

        tx.commit().await?;

        self.feed.publish(ChangeEvent::request_deleted(request_id, now));
        if let Some(a) = action {
            self.feed.publish(ChangeEvent::action_deleted(a.id, now));
        }
        tracing::info!(request_id = %request_id, "request purged");
        Ok(())
    }

    /// Maintenance re-rank of the whole pending set, running under the
    /// store's own identity rather than a caller's authorization context.
    /// Returns the number of rows rewritten; zero when the ranking is
    /// already dense, so running it back-to-back is a no-op.
    pub async fn reindex_pending(&self) -> Result<u64, AppError> {
        let now = Utc::now();
        let mut tx = self.write.begin().await?;
        let rewritten = queue::reindex(&mut *tx, None, now).await?;
        tx.commit().await?;
        Ok(rewritten)
    }

    // -- Role Operations --

    /// Change (or grant) a user's role. Admin only.
    pub async fn set_role(
        &self,
        principal: &Principal,
        user_id: Uuid,
        role: Role,
    ) -> Result<Profile, AppError> {
        principal.require(Capability::ManageRoles)?;

        let now = Utc::now();
        let profile = sqlx::query_as::<_, Profile>(
            r#"INSERT INTO profiles (id, role, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?3)
               ON CONFLICT (id) DO UPDATE SET
                   role = excluded.role,
                   updated_at = excluded.updated_at
               RETURNING id, role, created_at, updated_at"#,
        )
        .bind(user_id)
        .bind(role)
        .bind(now)
        .fetch_one(&self.write)
        .await?;

        self.feed.publish(ChangeEvent::profile_upserted(&profile));
        tracing::info!(user = %user_id, role = %role, changed_by = %principal.id, "role changed");
        Ok(profile)
    }

    /// Resolve the principal for an authenticated user id, or `None` when
    /// no role has been granted yet.
    pub async fn principal_for(&self, user_id: Uuid) -> Result<Option<Principal>, AppError> {
        let role: Option<Role> = sqlx::query_scalar("SELECT role FROM profiles WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.read)
            .await?;
        Ok(role.map(|role| Principal::new(user_id, role)))
    }

    // -- Reads --

    pub async fn get_request(
        &self,
        principal: &Principal,
        request_id: Uuid,
    ) -> Result<Request, AppError> {
        principal.require(Capability::ReadQueue)?;
        let mut conn = self.read.acquire().await?;
        Self::fetch_request(&mut conn, request_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// The pending queue in position order.
    pub async fn list_pending(&self, principal: &Principal) -> Result<Vec<Request>, AppError> {
        principal.require(Capability::ReadQueue)?;
        let rows = sqlx::query_as::<_, Request>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE status = 'pending' ORDER BY queue_position ASC"
        ))
        .fetch_all(&self.read)
        .await?;
        Ok(rows)
    }

    pub async fn list_requests(
        &self,
        principal: &Principal,
        status: Option<RequestStatus>,
    ) -> Result<Vec<Request>, AppError> {
        principal.require(Capability::ReadQueue)?;
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, Request>(&format!(
                    "SELECT {REQUEST_COLUMNS} FROM requests WHERE status = ?1 ORDER BY created_at ASC"
                ))
                .bind(status)
                .fetch_all(&self.read)
                .await?
            }
            None => {
                sqlx::query_as::<_, Request>(&format!(
                    "SELECT {REQUEST_COLUMNS} FROM requests ORDER BY created_at ASC"
                ))
                .fetch_all(&self.read)
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn get_action_for(
        &self,
        principal: &Principal,
        request_id: Uuid,
    ) -> Result<Option<ApprovalAction>, AppError> {
        principal.require(Capability::ReadQueue)?;
        let mut conn = self.read.acquire().await?;
        Ok(Self::fetch_action_for(&mut conn, request_id).await?)
    }

    pub async fn list_actions(
        &self,
        principal: &Principal,
        limit: i64,
    ) -> Result<Vec<ApprovalAction>, AppError> {
        principal.require(Capability::ReadQueue)?;
        let rows = sqlx::query_as::<_, ApprovalAction>(&format!(
            "SELECT {ACTION_COLUMNS} FROM approval_actions ORDER BY created_at DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.read)
        .await?;
        Ok(rows)
    }

    // -- Row fetch helpers (shared between transactions and reads) --

    async fn fetch_request(
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> Result<Option<Request>, sqlx::Error> {
        sqlx::query_as::<_, Request>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    async fn fetch_action(
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> Result<Option<ApprovalAction>, sqlx::Error> {
        sqlx::query_as::<_, ApprovalAction>(&format!(
            "SELECT {ACTION_COLUMNS} FROM approval_actions WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    async fn fetch_action_for(
        conn: &mut SqliteConnection,
        request_id: Uuid,
    ) -> Result<Option<ApprovalAction>, sqlx::Error> {
        sqlx::query_as::<_, ApprovalAction>(&format!(
            "SELECT {ACTION_COLUMNS} FROM approval_actions WHERE request_id = ?1"
        ))
        .bind(request_id)
        .fetch_optional(conn)
        .await
    }
}
