//! The traits all external collaborators are expected to implement.
//!
//! Rule storage, identity linkage, the CRM api, and the CMS account store
//! are owned by the host system. The bridge only ever talks to them through
//! these seams, which also makes every sync path testable with in-memory
//! doubles.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bridge::{ContactId, User, UserId};
use crate::rules::{GroupId, RoleId, Rule};
use crate::sync::roles::RoleDelta;

/// A CRM group, as much of it as the bridge cares about.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    /// The group id.
    pub id: GroupId,
    /// Human-readable group title.
    pub title: String,
    /// Smart groups are backed by a saved search. The CRM computes their
    /// membership, so they cannot take static add/remove writes.
    pub is_smart: bool,
}

/// Read access to the admin-defined association rules.
#[async_trait]
pub trait RuleStore {
    /// Load a snapshot of every association rule.
    async fn load_rules(&self) -> Result<Vec<Rule>>;

    /// Load the rules applicable to any of the given roles.
    async fn load_rules_by_roles(&self, roles: &[RoleId]) -> Result<Vec<Rule>> {
        Ok(self
            .load_rules()
            .await?
            .into_iter()
            .filter(|r| roles.contains(&r.role))
            .collect())
    }

    /// Load the rules targeting one group.
    async fn load_rules_by_group(&self, group: GroupId) -> Result<Vec<Rule>> {
        Ok(self
            .load_rules()
            .await?
            .into_iter()
            .filter(|r| r.group == group)
            .collect())
    }
}

/// The identity-linking service tying CMS accounts to CRM contacts.
///
/// Linkage is zero-or-one in both directions; `None` is a normal condition,
/// not an error.
#[async_trait]
pub trait IdentityLinker {
    /// The contact linked to a user, if any.
    async fn contact_id_for(&self, user: UserId) -> Result<Option<ContactId>>;

    /// The user linked to a contact, if any.
    async fn user_id_for(&self, contact: ContactId) -> Result<Option<UserId>>;
}

/// Query and mutation access to the CRM's groups and their membership.
#[async_trait]
pub trait CrmClient {
    /// Look up a group. `None` when the group does not exist.
    async fn group_info(&self, group: GroupId) -> Result<Option<GroupInfo>>;

    /// Whether the contact currently belongs to the group. Works for smart
    /// groups, which answer per-contact checks but not roster listings.
    async fn is_member(&self, contact: ContactId, group: GroupId) -> Result<bool>;

    /// Add a contact to a group.
    async fn add_member(&self, contact: ContactId, group: GroupId) -> Result<()>;

    /// Remove a contact from a group.
    async fn remove_member(&self, contact: ContactId, group: GroupId) -> Result<()>;
}

/// The CMS-side account store.
///
/// Role changes computed by the bridge are committed back through this seam;
/// the bridge itself never persists an account.
#[async_trait]
pub trait UserDirectory {
    /// Every syncable account id, for a bulk pass.
    async fn user_ids(&self) -> Result<Vec<UserId>>;

    /// Load one account with its current role set.
    async fn load_user(&self, user: UserId) -> Result<Option<User>>;

    /// Apply a role delta to an account and persist it.
    async fn commit_roles(&self, user: UserId, delta: &RoleDelta) -> Result<()>;
}
