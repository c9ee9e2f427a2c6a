use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Role;

/// Capability grant for one principal. Authentication itself lives with the
/// external identity provider; this row only records which role the guard
/// should apply.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Profile {
    pub id: Uuid,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
