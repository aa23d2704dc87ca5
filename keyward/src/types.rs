//! Common type definitions for the permission system.
//!
//! This module defines:
//! - Type aliases for entity IDs (UserId, SessionId, etc.)
//! - The [`Action`] enum shared by the database and the resolver
//! - [`abbrev_uuid`] for readable IDs in logs

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type SessionId = Uuid;
pub type RefreshTokenId = Uuid;
pub type RoleId = i32;
pub type ResourceTypeId = i32;
pub type PermissionId = i32;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Actions that can be performed on a resource type.
///
/// `Manage` implies the four CRUD actions; the implication is applied by the
/// permission resolver, not stored in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, utoipa::ToSchema)]
#[sqlx(type_name = "permission_action", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Manage,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Read => write!(f, "read"),
            Action::Update => write!(f, "update"),
            Action::Delete => write!(f, "delete"),
            Action::Manage => write!(f, "manage"),
        }
    }
}

impl Action {
    /// Actions covered by holding this one.
    pub fn implied(self) -> &'static [Action] {
        match self {
            Action::Manage => &[
                Action::Create,
                Action::Read,
                Action::Update,
                Action::Delete,
                Action::Manage,
            ],
            Action::Create => &[Action::Create],
            Action::Read => &[Action::Read],
            Action::Update => &[Action::Update],
            Action::Delete => &[Action::Delete],
        }
    }
}
