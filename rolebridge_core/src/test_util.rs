//! Utilities for testing
//!
#![cfg(test)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::bridge::{Bridge, BridgeConfig, ContactId, User, UserId};
use crate::collaborators::{CrmClient, GroupInfo, IdentityLinker, RuleStore, UserDirectory};
use crate::rules::{GroupId, RoleId, Rule};
use crate::sync::roles::RoleDelta;

pub(crate) fn role(name: &str) -> RoleId {
    RoleId(name.to_owned())
}

pub(crate) fn roles(names: &[&str]) -> BTreeSet<RoleId> {
    names.iter().map(|n| role(n)).collect()
}

pub(crate) fn rule(group: u64, role_name: &str) -> Rule {
    Rule {
        id: format!("{role_name}_{group}"),
        label: format!("{role_name} in group {group}"),
        group: GroupId(group),
        role: role(role_name),
    }
}

pub(crate) fn user(id: u64, role_names: &[&str]) -> User {
    User {
        id: UserId(id),
        roles: roles(role_names),
    }
}

pub(crate) struct MemoryRules(pub(crate) Vec<Rule>);

#[async_trait]
impl RuleStore for MemoryRules {
    async fn load_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.0.clone())
    }
}

pub(crate) struct MemoryLinker(pub(crate) HashMap<UserId, ContactId>);

#[async_trait]
impl IdentityLinker for MemoryLinker {
    async fn contact_id_for(&self, user: UserId) -> Result<Option<ContactId>> {
        Ok(self.0.get(&user).copied())
    }

    async fn user_id_for(&self, contact: ContactId) -> Result<Option<UserId>> {
        Ok(self
            .0
            .iter()
            .find(|(_, linked)| **linked == contact)
            .map(|(uid, _)| *uid))
    }
}

/// CRM double: a fixed group catalog plus mutable membership, with a write
/// log so tests can assert how often the write api was actually hit.
#[derive(Default)]
pub(crate) struct MemoryCrm {
    pub(crate) groups: HashMap<GroupId, GroupInfo>,
    pub(crate) members: Mutex<HashMap<GroupId, BTreeSet<ContactId>>>,
    pub(crate) writes: Mutex<Vec<String>>,
    pub(crate) fail_writes: bool,
}

impl MemoryCrm {
    pub(crate) fn with_groups(groups: impl IntoIterator<Item = (u64, &'static str, bool)>) -> Self {
        Self {
            groups: groups
                .into_iter()
                .map(|(id, title, is_smart)| {
                    (
                        GroupId(id),
                        GroupInfo {
                            id: GroupId(id),
                            title: title.to_owned(),
                            is_smart,
                        },
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    pub(crate) fn seed_membership(&self, contact: ContactId, group: GroupId) {
        self.members
            .lock()
            .unwrap()
            .entry(group)
            .or_default()
            .insert(contact);
    }

    pub(crate) fn clear_membership(&self, contact: ContactId, group: GroupId) {
        if let Some(members) = self.members.lock().unwrap().get_mut(&group) {
            members.remove(&contact);
        }
    }

    pub(crate) fn is_in(&self, contact: ContactId, group: GroupId) -> bool {
        self.members
            .lock()
            .unwrap()
            .get(&group)
            .map(|members| members.contains(&contact))
            .unwrap_or(false)
    }

    pub(crate) fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

#[async_trait]
impl CrmClient for MemoryCrm {
    async fn group_info(&self, group: GroupId) -> Result<Option<GroupInfo>> {
        Ok(self.groups.get(&group).cloned())
    }

    async fn is_member(&self, contact: ContactId, group: GroupId) -> Result<bool> {
        Ok(self.is_in(contact, group))
    }

    async fn add_member(&self, contact: ContactId, group: GroupId) -> Result<()> {
        if self.fail_writes {
            bail!("CRM api unavailable");
        }
        self.writes
            .lock()
            .unwrap()
            .push(format!("add {contact} {group}"));
        self.seed_membership(contact, group);
        Ok(())
    }

    async fn remove_member(&self, contact: ContactId, group: GroupId) -> Result<()> {
        if self.fail_writes {
            bail!("CRM api unavailable");
        }
        self.writes
            .lock()
            .unwrap()
            .push(format!("remove {contact} {group}"));
        self.clear_membership(contact, group);
        Ok(())
    }
}

pub(crate) struct MemoryUsers {
    users: Mutex<BTreeMap<UserId, User>>,
    commits: Mutex<usize>,
}

impl MemoryUsers {
    pub(crate) fn with_users(users: &[User]) -> Self {
        Self {
            users: Mutex::new(users.iter().map(|u| (u.id, u.clone())).collect()),
            commits: Mutex::new(0),
        }
    }

    pub(crate) fn get(&self, user: UserId) -> User {
        self.users.lock().unwrap()[&user].clone()
    }

    pub(crate) fn commits(&self) -> usize {
        *self.commits.lock().unwrap()
    }
}

#[async_trait]
impl UserDirectory for MemoryUsers {
    async fn user_ids(&self) -> Result<Vec<UserId>> {
        Ok(self.users.lock().unwrap().keys().copied().collect())
    }

    async fn load_user(&self, user: UserId) -> Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&user).cloned())
    }

    async fn commit_roles(&self, user: UserId, delta: &RoleDelta) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        let account = users
            .get_mut(&user)
            .ok_or_else(|| anyhow!("user {user} not found"))?;
        account.roles.extend(delta.add.iter().cloned());
        account.roles.retain(|r| !delta.remove.contains(r));
        *self.commits.lock().unwrap() += 1;
        Ok(())
    }
}

/// A fully wired bridge over in-memory doubles, keeping handles to the
/// mutable ones for assertions.
pub(crate) struct Fixture {
    pub(crate) bridge: Bridge,
    pub(crate) crm: Arc<MemoryCrm>,
    pub(crate) users: Arc<MemoryUsers>,
}

/// Abstract away the wiring boilerplate: rules, user→contact links, a CRM
/// double, and the directory's accounts.
pub(crate) fn fixture(
    rules: Vec<Rule>,
    links: &[(u64, u64)],
    crm: MemoryCrm,
    users: &[User],
) -> Fixture {
    let crm = Arc::new(crm);
    let users = Arc::new(MemoryUsers::with_users(users));
    let linker = MemoryLinker(
        links
            .iter()
            .map(|(uid, cid)| (UserId(*uid), ContactId(*cid)))
            .collect(),
    );

    let bridge = Bridge::new(
        BridgeConfig::default(),
        Arc::new(MemoryRules(rules)),
        Arc::new(linker),
        crm.clone(),
        users.clone(),
    );

    Fixture { bridge, crm, users }
}
