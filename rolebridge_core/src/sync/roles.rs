//! Group-to-role reconciliation: derive a user's roles from the groups
//! their contact belongs to.

use std::collections::BTreeSet;
use std::fmt::Display;

use anyhow::{anyhow, Context, Result};
use colored::Colorize;

use crate::bridge::{Bridge, ContactId, User};
use crate::logging::{debug, error, info};
use crate::membership;
use crate::rules::{RoleId, Rule};

/// The role changes needed to bring a user in line with their contact's
/// group membership.
///
/// A role never appears on both sides; construction in [`reconcile`]
/// guarantees it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleDelta {
    /// Roles the user should gain.
    pub add: BTreeSet<RoleId>,
    /// Roles the user should lose.
    pub remove: BTreeSet<RoleId>,
}

impl RoleDelta {
    /// True when applying the delta would change nothing. Callers skip the
    /// account save in that case.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

impl Display for RoleDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut text = "".to_owned();
        for role in &self.add {
            text += format!("{}", format!("+ role: {role}\n").green()).as_str();
        }
        for role in &self.remove {
            text += format!("{}", format!("- role: {role}\n").red()).as_str();
        }
        write!(f, "{text}")
    }
}

/// Compute the role delta for a contact against a set of currently-held
/// roles.
///
/// Every rule votes its role onto the add side when the contact is in the
/// rule's group, onto the remove side otherwise. Roles no rule mentions are
/// untouched. Smart and even missing groups need no special casing: a group
/// that never reports membership simply keeps its rules voting remove.
pub async fn reconcile(
    bridge: &Bridge,
    contact: ContactId,
    current_roles: &BTreeSet<RoleId>,
) -> Result<RoleDelta> {
    let rules = bridge.rule_set().await?;
    let member_of = membership::contact_group_ids(bridge, contact, &rules).await;

    let mut add = BTreeSet::new();
    let mut remove = BTreeSet::new();
    for rule in rules.all() {
        if member_of.contains(&rule.group) {
            add.insert(rule.role.clone());
        } else {
            remove.insert(rule.role.clone());
        }
    }

    // A role provided through at least one member group is never removed,
    // whatever the rules for its other groups voted.
    let remove = &remove - &add;
    // Never remove a role the user doesn't hold.
    let remove = &remove & current_roles;
    // Never add a role the user already holds.
    let add = &add - current_roles;

    Ok(RoleDelta { add, remove })
}

/// Run a full group-to-role pass for one user and commit any changes.
///
/// Returns the delta that was applied, possibly empty. A user with no
/// linked contact cannot be reconciled; that surfaces as an error for the
/// caller to record.
pub async fn sync_roles(bridge: &Bridge, user: &User) -> Result<RoleDelta> {
    let contact = bridge
        .contact_id(user.id)
        .await
        .ok_or_else(|| anyhow!("CRM contact not found for user ID {}", user.id))?;

    let delta = reconcile(bridge, contact, &user.roles).await?;

    if bridge.config.debugging {
        let mut final_roles = user.roles.clone();
        final_roles.extend(delta.add.iter().cloned());
        final_roles.retain(|r| !delta.remove.contains(r));
        info!(
            "initial roles: [{}], roles to add: [{}], roles to remove: [{}], final roles: [{}]",
            role_list(&user.roles),
            role_list(&delta.add),
            role_list(&delta.remove),
            role_list(&final_roles)
        );
    }

    if !delta.is_empty() {
        bridge
            .users
            .commit_roles(user.id, &delta)
            .await
            .with_context(|| format!("committing role changes for user {}", user.id))?;
    }

    Ok(delta)
}

/// React to a contact joining a group: grant the rule's role to the linked
/// user.
pub async fn on_group_added(bridge: &Bridge, contact: ContactId, rule: &Rule) -> Result<()> {
    let user = match bridge.user_for_contact(contact).await {
        Some(user) => user,
        None => {
            error!("no CMS user linked to contact {contact}; skipping role grant");
            return Ok(());
        }
    };

    if user.roles.contains(&rule.role) {
        return Ok(());
    }

    let delta = RoleDelta {
        add: BTreeSet::from([rule.role.clone()]),
        ..Default::default()
    };
    bridge
        .users
        .commit_roles(user.id, &delta)
        .await
        .with_context(|| format!("granting role {} to user {}", rule.role, user.id))
}

/// React to a contact leaving a group: drop the rule's role unless another
/// member group still provides it.
///
/// Only the rules for this one role are re-checked. That is narrower than a
/// full [`reconcile`], and deliberately so; a single membership event does
/// not pay for a rederivation of the whole role set.
pub async fn on_group_removed(bridge: &Bridge, contact: ContactId, rule: &Rule) -> Result<()> {
    let user = match bridge.user_for_contact(contact).await {
        Some(user) => user,
        None => {
            error!("no CMS user linked to contact {contact}; skipping role removal");
            return Ok(());
        }
    };

    if !user.roles.contains(&rule.role) {
        return Ok(());
    }

    let rules = bridge.rule_set().await?;
    let member_of = membership::contact_group_ids(bridge, contact, &rules).await;

    let still_provided = rules
        .by_role(&rule.role)
        .iter()
        .any(|r| member_of.contains(&r.group));
    if still_provided {
        debug!(
            "user {} keeps role {}: another group still provides it",
            user.id, rule.role
        );
        return Ok(());
    }

    let delta = RoleDelta {
        remove: BTreeSet::from([rule.role.clone()]),
        ..Default::default()
    };
    bridge
        .users
        .commit_roles(user.id, &delta)
        .await
        .with_context(|| format!("removing role {} from user {}", rule.role, user.id))
}

fn role_list(roles: &BTreeSet<RoleId>) -> String {
    roles
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bridge::UserId;
    use crate::rules::GroupId;
    use crate::test_util::{fixture, role, roles, rule, user, MemoryCrm};

    #[tokio::test]
    async fn reconcile_adds_roles_for_member_groups() -> Result<()> {
        let crm = MemoryCrm::with_groups([(5, "Editors", false)]);
        crm.seed_membership(ContactId(1), GroupId(5));
        let fix = fixture(vec![rule(5, "editor")], &[(10, 1)], crm, &[]);

        let delta = reconcile(&fix.bridge, ContactId(1), &roles(&[])).await?;
        assert_eq!(delta.add, roles(&["editor"]));
        assert!(delta.remove.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_is_idempotent_on_converged_users() -> Result<()> {
        let crm = MemoryCrm::with_groups([(5, "Editors", false), (7, "Staff", false)]);
        crm.seed_membership(ContactId(1), GroupId(5));
        let fix = fixture(
            vec![rule(5, "editor"), rule(7, "staff")],
            &[(10, 1)],
            crm,
            &[],
        );

        // roles already match membership: editor held, staff not
        let delta = reconcile(&fix.bridge, ContactId(1), &roles(&["editor"])).await?;
        assert!(delta.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_converges_in_one_step() -> Result<()> {
        let crm = MemoryCrm::with_groups([(5, "Editors", false), (7, "Staff", false)]);
        crm.seed_membership(ContactId(1), GroupId(7));
        let fix = fixture(
            vec![rule(5, "editor"), rule(7, "staff")],
            &[(10, 1)],
            crm,
            &[user(10, &["editor"])],
        );

        let account = user(10, &["editor"]);
        let delta = sync_roles(&fix.bridge, &account).await?;
        assert_eq!(delta.add, roles(&["staff"]));
        assert_eq!(delta.remove, roles(&["editor"]));

        // the committed user reconciles to an empty delta
        let updated = fix.users.get(account.id);
        let again = reconcile(&fix.bridge, ContactId(1), &updated.roles).await?;
        assert!(again.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn add_and_remove_never_overlap() -> Result<()> {
        // same role mapped to a member group and a non-member group
        let crm = MemoryCrm::with_groups([(5, "Editors", false), (7, "Staff", false)]);
        crm.seed_membership(ContactId(1), GroupId(5));
        let fix = fixture(
            vec![rule(5, "editor"), rule(7, "editor")],
            &[(10, 1)],
            crm,
            &[],
        );

        let held = roles(&["editor"]);
        let delta = reconcile(&fix.bridge, ContactId(1), &held).await?;
        assert!(delta.add.intersection(&delta.remove).next().is_none());
        // membership in one of the two groups is enough to keep the role
        assert!(!delta.remove.contains(&role("editor")));
        assert!(delta.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unmapped_roles_are_untouched() -> Result<()> {
        let crm = MemoryCrm::with_groups([(5, "Editors", false)]);
        let fix = fixture(vec![rule(5, "editor")], &[(10, 1)], crm, &[]);

        // "admin" has no rule at all: absent from both sides. "editor" has a
        // rule evaluating to not-a-member: removed.
        let delta = reconcile(&fix.bridge, ContactId(1), &roles(&["admin", "editor"])).await?;
        assert_eq!(delta.remove, roles(&["editor"]));
        assert!(delta.add.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn contact_in_group_grants_role_end_to_end() -> Result<()> {
        let crm = MemoryCrm::with_groups([(5, "Editors", false)]);
        crm.seed_membership(ContactId(1), GroupId(5));
        let fix = fixture(
            vec![rule(5, "editor")],
            &[(10, 1)],
            crm,
            &[user(10, &[])],
        );

        let delta = sync_roles(&fix.bridge, &user(10, &[])).await?;
        assert_eq!(delta.add, roles(&["editor"]));
        assert!(delta.remove.is_empty());
        assert!(fix.users.get(UserId(10)).roles.contains(&role("editor")));
        Ok(())
    }

    #[tokio::test]
    async fn smart_group_membership_still_grants_roles() -> Result<()> {
        // the validator would refuse to write to this group; deriving roles
        // from it works regardless
        let crm = MemoryCrm::with_groups([(6, "Donors (smart)", true)]);
        crm.seed_membership(ContactId(1), GroupId(6));
        let fix = fixture(vec![rule(6, "donor")], &[(10, 1)], crm, &[user(10, &[])]);

        let delta = sync_roles(&fix.bridge, &user(10, &[])).await?;
        assert_eq!(delta.add, roles(&["donor"]));
        Ok(())
    }

    #[tokio::test]
    async fn sync_roles_without_contact_is_an_error() {
        let crm = MemoryCrm::with_groups([(5, "Editors", false)]);
        let fix = fixture(vec![rule(5, "editor")], &[], crm, &[user(10, &[])]);

        let res = sync_roles(&fix.bridge, &user(10, &[])).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn empty_delta_skips_the_commit() -> Result<()> {
        let crm = MemoryCrm::with_groups([(5, "Editors", false)]);
        crm.seed_membership(ContactId(1), GroupId(5));
        let fix = fixture(
            vec![rule(5, "editor")],
            &[(10, 1)],
            crm,
            &[user(10, &["editor"])],
        );

        let delta = sync_roles(&fix.bridge, &user(10, &["editor"])).await?;
        assert!(delta.is_empty());
        assert_eq!(fix.users.commits(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn group_removal_keeps_role_provided_elsewhere() -> Result<()> {
        // editor comes from groups 5 and 7; the contact left 5 but is still
        // in 7
        let crm = MemoryCrm::with_groups([(5, "Editors", false), (7, "Staff", false)]);
        crm.seed_membership(ContactId(1), GroupId(7));
        let fix = fixture(
            vec![rule(5, "editor"), rule(7, "editor")],
            &[(10, 1)],
            crm,
            &[user(10, &["editor"])],
        );

        on_group_removed(&fix.bridge, ContactId(1), &rule(5, "editor")).await?;
        assert!(fix.users.get(UserId(10)).roles.contains(&role("editor")));

        // leaving 7 as well finally drops the role
        fix.crm.clear_membership(ContactId(1), GroupId(7));
        on_group_removed(&fix.bridge, ContactId(1), &rule(7, "editor")).await?;
        assert!(!fix.users.get(UserId(10)).roles.contains(&role("editor")));
        Ok(())
    }

    #[tokio::test]
    async fn group_added_grants_the_role_once() -> Result<()> {
        let crm = MemoryCrm::with_groups([(5, "Editors", false)]);
        let fix = fixture(
            vec![rule(5, "editor")],
            &[(10, 1)],
            crm,
            &[user(10, &[])],
        );

        on_group_added(&fix.bridge, ContactId(1), &rule(5, "editor")).await?;
        assert!(fix.users.get(UserId(10)).roles.contains(&role("editor")));
        assert_eq!(fix.users.commits(), 1);

        // a duplicate event is a no-op
        on_group_added(&fix.bridge, ContactId(1), &rule(5, "editor")).await?;
        assert_eq!(fix.users.commits(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn events_for_unlinked_contacts_are_skipped() -> Result<()> {
        let crm = MemoryCrm::with_groups([(5, "Editors", false)]);
        let fix = fixture(vec![rule(5, "editor")], &[], crm, &[]);

        on_group_added(&fix.bridge, ContactId(9), &rule(5, "editor")).await?;
        on_group_removed(&fix.bridge, ContactId(9), &rule(5, "editor")).await?;
        Ok(())
    }

    #[test]
    fn delta_display_lists_both_sides() {
        let delta = RoleDelta {
            add: roles(&["editor"]),
            remove: roles(&["staff"]),
        };
        let text = format!("{delta}");
        assert!(text.contains("+ role: editor"));
        assert!(text.contains("- role: staff"));
    }
}
