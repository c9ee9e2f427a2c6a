//! Capability guard enforced at the data-access boundary.
//!
//! The store is reachable by any authenticated client, so this guard is the
//! actual security boundary, not a convenience check in a calling UI. The
//! identity provider authenticates and hands us a principal id; the role
//! attached to it (the `profiles` table) decides what the principal may do.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

/// Roles supported by the guard.
/// Matches the `role` column in the `profiles` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Employee,
    Approver,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::Approver => "approver",
            Role::Admin => "admin",
        }
    }

    /// Check whether this role grants the given capability.
    pub fn grants(&self, cap: Capability) -> bool {
        match cap {
            Capability::SubmitRequests | Capability::ReadQueue => true,
            Capability::Decide => matches!(self, Role::Approver | Role::Admin),
            Capability::ManageRoles => matches!(self, Role::Admin),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named permission grants checked by store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    SubmitRequests,
    ReadQueue,
    Decide,
    ManageRoles,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::SubmitRequests => "submit_requests",
            Capability::ReadQueue => "read_queue",
            Capability::Decide => "decide",
            Capability::ManageRoles => "manage_roles",
        })
    }
}

/// An authenticated principal, as supplied by the external identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn can(&self, cap: Capability) -> bool {
        self.role.grants(cap)
    }

    /// Enforce a capability, returning `AppError::Authorization` when absent.
    pub fn require(&self, cap: Capability) -> Result<(), AppError> {
        if self.can(cap) {
            Ok(())
        } else {
            tracing::warn!(
                principal = %self.id,
                role = %self.role,
                capability = %cap,
                "capability check denied"
            );
            Err(AppError::Authorization { required: cap })
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
