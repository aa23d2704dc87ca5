//! Permission resolution: role defaults merged with per-user overrides.
//!
//! Resolution is a pure set computation over a snapshot of the database:
//! start from the role's permission names, add every override with
//! `granted = true`, remove every override with `granted = false`. At most
//! one override exists per (user, permission), so the merge is
//! order-independent. `manage` on a resource type covers the four CRUD
//! actions at check time; the expansion is never materialised.

use std::collections::BTreeSet;

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::handlers::{Permissions, Repository, Users};
use crate::types::{abbrev_uuid, Action, UserId};

/// The effective permission names held by one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    names: BTreeSet<String>,
}

impl PermissionSet {
    pub fn from_names<I: IntoIterator<Item = String>>(names: I) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Whether the set allows `action` on `resource_type`.
    ///
    /// Holding `resource:manage` answers yes for any action on that
    /// resource; otherwise the exact `resource:action` name must be present.
    pub fn allows(&self, resource_type: &str, action: Action) -> bool {
        if self.contains(&format!("{resource_type}:{}", Action::Manage)) {
            return true;
        }
        self.contains(&format!("{resource_type}:{action}"))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// One override applied during resolution.
#[derive(Debug, Clone)]
pub struct Override {
    pub permission_name: String,
    pub granted: bool,
}

/// Merge role defaults with overrides.
///
/// Pure so the order-independence and add/remove semantics can be tested
/// without a database.
pub fn apply_overrides(role_defaults: impl IntoIterator<Item = String>, overrides: &[Override]) -> PermissionSet {
    let mut names: BTreeSet<String> = role_defaults.into_iter().collect();

    for o in overrides {
        if o.granted {
            names.insert(o.permission_name.clone());
        } else {
            names.remove(&o.permission_name);
        }
    }

    PermissionSet { names }
}

/// Resolve the effective permissions of a user from a database snapshot.
///
/// An inactive or unknown user resolves to the empty set: deactivation cuts
/// off authorization even while previously minted access tokens are still
/// within their lifetime.
#[instrument(skip(conn), fields(user_id = %abbrev_uuid(&user_id)), err)]
pub async fn effective_permissions(conn: &mut PgConnection, user_id: UserId) -> Result<PermissionSet> {
    let user = Users::new(conn).get_by_id(user_id).await?;
    match user {
        Some(u) if u.is_active => {}
        _ => return Ok(PermissionSet::default()),
    }

    let mut repo = Permissions::new(conn);
    let role_defaults = repo.role_permissions_for_user(user_id).await?;
    let overrides: Vec<Override> = repo
        .overrides_for_user(user_id)
        .await?
        .into_iter()
        .map(|row| Override {
            permission_name: row.permission_name,
            granted: row.granted,
        })
        .collect();

    Ok(apply_overrides(role_defaults.into_iter().map(|p| p.name), &overrides))
}

/// The single authorization decision point.
///
/// Every protected operation funnels through here; nothing else in the
/// service inspects roles or permission rows directly.
#[instrument(skip(conn), fields(user_id = %abbrev_uuid(&user_id), resource = resource_type, action = %action), err)]
pub async fn has_permission(conn: &mut PgConnection, user_id: UserId, resource_type: &str, action: Action) -> Result<bool> {
    let permissions = effective_permissions(conn, user_id).await?;
    Ok(permissions.allows(resource_type, action))
}
