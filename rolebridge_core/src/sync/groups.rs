//! Role-to-group reconciliation: keep a contact's static group memberships
//! in line with the roles their user holds.

use std::collections::BTreeSet;
use std::fmt::Display;

use anyhow::{anyhow, Context, Result};
use colored::Colorize;

use crate::bridge::{Bridge, ContactId, User, UserId};
use crate::logging::{debug, info};
use crate::membership;
use crate::rules::{GroupId, RoleId, RuleSet};
use crate::validate;

/// The membership changes needed for one contact.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupDelta {
    /// Groups the contact should be added to.
    pub add: BTreeSet<GroupId>,
    /// Groups the contact should be removed from.
    pub remove: BTreeSet<GroupId>,
}

impl GroupDelta {
    /// True when applying the delta would change nothing.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

impl Display for GroupDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut text = "".to_owned();
        for group in &self.add {
            text += format!("{}", format!("+ group: {group}\n").green()).as_str();
        }
        for group in &self.remove {
            text += format!("{}", format!("- group: {group}\n").red()).as_str();
        }
        write!(f, "{text}")
    }
}

/// Compute the additions needed so the contact is in every group its
/// validated rules call for.
///
/// Membership state is checked here, when the delta is built, so applying
/// it touches the write API exactly once per real change.
pub async fn group_delta_for_roles(
    bridge: &Bridge,
    contact: ContactId,
    roles: &BTreeSet<RoleId>,
) -> Result<GroupDelta> {
    let rules = bridge.rule_set().await?;
    let member_of = membership::contact_group_ids(bridge, contact, &rules).await;

    let candidates = rules.by_roles(roles).into_iter().cloned().collect();
    let valid = validate::validate_groups(bridge, candidates).await;

    let add = valid
        .iter()
        .map(|r| r.group)
        .filter(|g| !member_of.contains(g))
        .collect();

    Ok(GroupDelta {
        add,
        ..Default::default()
    })
}

/// Apply a computed membership delta for a contact.
pub async fn apply_group_delta(
    bridge: &Bridge,
    contact: ContactId,
    delta: &GroupDelta,
) -> Result<()> {
    for group in &delta.add {
        bridge
            .crm
            .add_member(contact, *group)
            .await
            .with_context(|| format!("adding contact {contact} to group {group}"))?;
    }
    for group in &delta.remove {
        bridge
            .crm
            .remove_member(contact, *group)
            .await
            .with_context(|| format!("removing contact {contact} from group {group}"))?;
    }
    Ok(())
}

/// Bring the contact's memberships up to date with the user's roles: the
/// role-to-group half of a full sync, also run at login.
///
/// Builtin roles are skipped; an account holding nothing else is a pure
/// no-op. A user with no linked contact surfaces as an error for the caller
/// to record.
pub async fn user_add_groups(bridge: &Bridge, user: &User) -> Result<GroupDelta> {
    let roles: BTreeSet<RoleId> = user
        .roles
        .iter()
        .filter(|r| !bridge.config.builtin_roles.contains(r))
        .cloned()
        .collect();
    if roles.is_empty() {
        return Ok(GroupDelta::default());
    }

    let contact = bridge
        .contact_id(user.id)
        .await
        .ok_or_else(|| anyhow!("CRM contact not found for user ID {}", user.id))?;

    let delta = group_delta_for_roles(bridge, contact, &roles).await?;

    if bridge.config.debugging && !delta.is_empty() {
        info!("group changes for contact {contact}:\n{delta}");
    }

    apply_group_delta(bridge, contact, &delta).await?;
    Ok(delta)
}

/// Seed group memberships for a newly created account.
///
/// Accounts without a linked contact are skipped quietly; linkage usually
/// lags account creation and the next login or bulk pass catches up.
pub async fn add_groups_on_create(bridge: &Bridge, user: &User) -> Result<()> {
    let contact = match bridge.contact_id(user.id).await {
        Some(contact) => contact,
        None => return Ok(()),
    };

    let delta = group_delta_for_roles(bridge, contact, &user.roles).await?;
    apply_group_delta(bridge, contact, &delta).await
}

/// React to a single role being granted: join the groups its validated
/// rules point at, skipping any the contact is already in.
pub async fn on_role_added(bridge: &Bridge, contact: ContactId, role: &RoleId) -> Result<()> {
    let rules = bridge.rule_store.load_rules_by_roles(&[role.clone()]).await?;
    let valid = validate::validate_groups(bridge, rules).await;
    if valid.is_empty() {
        return Ok(());
    }

    let member_of =
        membership::contact_group_ids(bridge, contact, &RuleSet::new(valid.clone())).await;

    for rule in valid {
        if member_of.contains(&rule.group) {
            continue;
        }
        bridge
            .crm
            .add_member(contact, rule.group)
            .await
            .with_context(|| format!("adding contact {contact} to group {}", rule.group))?;
    }
    Ok(())
}

/// React to a single role being revoked: leave the groups its validated
/// rules point at, unless another role the user still holds maps to the
/// same group through any rule.
///
/// The remaining roles are re-read from the directory at removal time. A
/// stale snapshot here could evict a group another role still needs.
pub async fn on_role_removed(bridge: &Bridge, user: UserId, role: &RoleId) -> Result<()> {
    let contact = bridge
        .contact_id(user)
        .await
        .ok_or_else(|| anyhow!("CRM contact not found for user ID {user}"))?;

    let account = bridge
        .users
        .load_user(user)
        .await?
        .ok_or_else(|| anyhow!("user {user} not found"))?;
    let remaining: BTreeSet<RoleId> = account
        .roles
        .iter()
        .filter(|r| *r != role)
        .cloned()
        .collect();

    let rules = bridge.rule_set().await?;
    let still_wanted: BTreeSet<GroupId> =
        rules.by_roles(&remaining).iter().map(|r| r.group).collect();

    let candidates = rules.by_role(role).into_iter().cloned().collect();
    let valid = validate::validate_groups(bridge, candidates).await;
    if valid.is_empty() {
        return Ok(());
    }

    let member_of =
        membership::contact_group_ids(bridge, contact, &RuleSet::new(valid.clone())).await;

    for rule in valid {
        if still_wanted.contains(&rule.group) {
            debug!(
                "keeping contact {contact} in group {}: another held role maps to it",
                rule.group
            );
            continue;
        }
        if !member_of.contains(&rule.group) {
            continue;
        }
        bridge
            .crm
            .remove_member(contact, rule.group)
            .await
            .with_context(|| format!("removing contact {contact} from group {}", rule.group))?;
    }
    Ok(())
}
