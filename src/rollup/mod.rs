//! Scope resolution: who may view whose metrics, and whether the view
//! is an individual one or a rollup over transitive subordinates.

pub mod hierarchy;

pub use hierarchy::{Hierarchy, HierarchyEdge};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::types::ViewMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Rep,
    Manager,
    Admin,
}

/// The requesting identity, as supplied by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub organization_id: String,
    pub role: Role,
    #[serde(default)]
    pub manager_id: Option<String>,
}

/// External identity/authorization collaborator boundary.
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Result<Identity>;
}

/// An [`IdentityProvider`] that always returns a fixed identity. Used
/// by the CLI (identity picked from the fixture file) and by tests.
pub struct StaticIdentityProvider {
    identity: Identity,
}

impl StaticIdentityProvider {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn current_identity(&self) -> Result<Identity> {
        Ok(self.identity.clone())
    }
}

/// The authorized scope of a request after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizedScope {
    /// The target entity's own data only.
    Individual { entity_id: String },
    /// The root entity plus every transitive subordinate. `members`
    /// lists the root first, then subordinates in traversal order.
    Rollup { root: String, members: Vec<String> },
}

impl AuthorizedScope {
    /// The entity ids covered by this scope.
    pub fn entity_ids(&self) -> Vec<String> {
        match self {
            AuthorizedScope::Individual { entity_id } => vec![entity_id.clone()],
            AuthorizedScope::Rollup { members, .. } => members.clone(),
        }
    }
}

/// Decide whether `requester` may view `target_entity_id`, and at what
/// scope. Rules apply in order:
///
/// 1. Self-view is always authorized, regardless of role.
/// 2. An admin is authorized unconditionally.
/// 3. A rollup (with subordinates) may only be rooted at the requester
///    themself, unless the requester is an admin.
/// 4. A manager may take an individual view of a direct report (exactly
///    one hierarchy hop).
/// 5. Anything else is forbidden.
pub fn resolve_scope(
    requester: &Identity,
    target_entity_id: &str,
    view_mode: ViewMode,
    include_subordinates: bool,
    hierarchy: &Hierarchy,
) -> Result<AuthorizedScope> {
    let is_admin = requester.role == Role::Admin;

    if view_mode == ViewMode::Rollup && include_subordinates {
        if requester.id != target_entity_id && !is_admin {
            return Err(Error::Forbidden(format!(
                "{} may not view a rollup rooted at {}",
                requester.id, target_entity_id
            )));
        }
        let mut members = vec![target_entity_id.to_string()];
        members.extend(hierarchy.subordinates(target_entity_id)?);
        return Ok(AuthorizedScope::Rollup {
            root: target_entity_id.to_string(),
            members,
        });
    }

    if requester.id == target_entity_id || is_admin {
        return Ok(AuthorizedScope::Individual {
            entity_id: target_entity_id.to_string(),
        });
    }

    if requester.role == Role::Manager
        && hierarchy.is_direct_report(&requester.id, target_entity_id)
    {
        return Ok(AuthorizedScope::Individual {
            entity_id: target_entity_id.to_string(),
        });
    }

    Err(Error::Forbidden(format!(
        "{} may not view metrics for {}",
        requester.id, target_entity_id
    )))
}
