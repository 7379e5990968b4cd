//! Access-control tiers for collections.
//!
//! Each collection carries three tiers (`use`, `manager`, `admin`), each a
//! set of user ids plus a set of group ids. Tiers are cumulative: a
//! principal listed in a higher tier holds every capability of the lower
//! ones. The implication is encoded once, in [`TIER_GRANTS`], instead of
//! being re-derived at each call site.
//!
//! # Action → tier
//!
//! | Action | Minimum tier |
//! |--------|--------------|
//! | read, query | `use` |
//! | create / remove document | `manager` |
//! | edit ACL, chunking policy, embedding model; delete collection | `admin` |
//!
//! Group membership is resolved through a [`GroupResolver`] supplied by the
//! caller (the identity collaborator).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{IndexError, IndexResult};

/// Cumulative privilege level on a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclTier {
    Use,
    Manager,
    Admin,
}

impl AclTier {
    pub const ALL: [AclTier; 3] = [AclTier::Use, AclTier::Manager, AclTier::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            AclTier::Use => "use",
            AclTier::Manager => "manager",
            AclTier::Admin => "admin",
        }
    }

    /// Tiers whose lists satisfy a requirement for `self`.
    pub fn granted_by(&self) -> &'static [AclTier] {
        TIER_GRANTS
            .iter()
            .find(|(tier, _)| tier == self)
            .map(|(_, grants)| *grants)
            .unwrap_or(&[])
    }
}

/// Required tier → tiers whose membership satisfies it.
pub const TIER_GRANTS: [(AclTier, &[AclTier]); 3] = [
    (AclTier::Use, &[AclTier::Use, AclTier::Manager, AclTier::Admin]),
    (AclTier::Manager, &[AclTier::Manager, AclTier::Admin]),
    (AclTier::Admin, &[AclTier::Admin]),
];

/// Operations gated by collection ACLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Query,
    CreateDocument,
    RemoveDocument,
    EditAcl,
    EditChunking,
    EditEmbeddingModel,
    DeleteCollection,
}

/// Action → minimum required tier.
const ACTION_TIERS: [(Action, AclTier); 8] = [
    (Action::Read, AclTier::Use),
    (Action::Query, AclTier::Use),
    (Action::CreateDocument, AclTier::Manager),
    (Action::RemoveDocument, AclTier::Manager),
    (Action::EditAcl, AclTier::Admin),
    (Action::EditChunking, AclTier::Admin),
    (Action::EditEmbeddingModel, AclTier::Admin),
    (Action::DeleteCollection, AclTier::Admin),
];

impl Action {
    pub fn required_tier(&self) -> AclTier {
        ACTION_TIERS
            .iter()
            .find(|(action, _)| action == self)
            .map(|(_, tier)| *tier)
            .unwrap_or(AclTier::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Query => "query",
            Action::CreateDocument => "create document",
            Action::RemoveDocument => "remove document",
            Action::EditAcl => "edit ACL",
            Action::EditChunking => "edit chunking policy",
            Action::EditEmbeddingModel => "edit embedding model",
            Action::DeleteCollection => "delete collection",
        }
    }
}

/// Users and groups listed in one tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclList {
    #[serde(default)]
    pub users: BTreeSet<String>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

impl AclList {
    pub fn new<U, G>(users: U, groups: G) -> Self
    where
        U: IntoIterator,
        U::Item: Into<String>,
        G: IntoIterator,
        G::Item: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    pub fn users<U>(users: U) -> Self
    where
        U: IntoIterator,
        U::Item: Into<String>,
    {
        Self::new(users, Vec::<String>::new())
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }

    fn admits(&self, principal: &str, groups: &dyn GroupResolver) -> bool {
        self.users.contains(principal)
            || self
                .groups
                .iter()
                .any(|group| groups.is_member(principal, group))
    }
}

/// The three ACL tiers of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionAcl {
    #[serde(default, rename = "use")]
    pub use_tier: AclList,
    #[serde(default)]
    pub manager: AclList,
    #[serde(default)]
    pub admin: AclList,
}

impl CollectionAcl {
    pub fn list(&self, tier: AclTier) -> &AclList {
        match tier {
            AclTier::Use => &self.use_tier,
            AclTier::Manager => &self.manager,
            AclTier::Admin => &self.admin,
        }
    }

    /// Highest tier the principal holds, directly or through a group.
    pub fn granted_tier(&self, principal: &str, groups: &dyn GroupResolver) -> Option<AclTier> {
        AclTier::ALL
            .iter()
            .rev()
            .copied()
            .find(|tier| self.list(*tier).admits(principal, groups))
    }

    pub fn allows(&self, principal: &str, action: Action, groups: &dyn GroupResolver) -> bool {
        action
            .required_tier()
            .granted_by()
            .iter()
            .any(|tier| self.list(*tier).admits(principal, groups))
    }
}

/// Identity collaborator: resolves group membership.
pub trait GroupResolver: Send + Sync {
    fn is_member(&self, principal: &str, group: &str) -> bool;
}

/// Resolver for deployments without groups.
pub struct NoGroups;

impl GroupResolver for NoGroups {
    fn is_member(&self, _principal: &str, _group: &str) -> bool {
        false
    }
}

/// Check that `principal` may perform `action` on `collection`.
///
/// Returns [`IndexError::AccessDenied`] otherwise.
pub fn authorize(
    principal: &str,
    collection: &str,
    acl: &CollectionAcl,
    action: Action,
    groups: &dyn GroupResolver,
) -> IndexResult<()> {
    if acl.allows(principal, action, groups) {
        Ok(())
    } else {
        Err(IndexError::AccessDenied {
            principal: principal.to_string(),
            action: action.as_str().to_string(),
            collection: collection.to_string(),
        })
    }
}
