//! Association rules and the in-memory lookup view over a rule snapshot.

use std::collections::BTreeSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// The machine name of a CMS role.
#[derive(Clone, Deserialize, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RoleId(pub String);

impl Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The numeric id of a CRM group.
#[derive(Clone, Copy, Deserialize, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct GroupId(pub u64);

impl Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An admin-defined association between one role and one group.
///
/// `(group, role)` pairs are not required to be unique across rules: a role
/// may be provided by several groups and a group may grant several roles.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq, Serialize)]
pub struct Rule {
    /// Machine name of the rule.
    pub id: String,
    /// Human-readable label, for operator-facing output.
    pub label: String,
    /// The CRM group this rule ties to.
    pub group: GroupId,
    /// The CMS role this rule ties to.
    pub role: RoleId,
}

/// A read-only snapshot of association rules, held for the duration of one
/// sync pass.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Wrap a loaded rule snapshot.
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Every rule in the snapshot.
    pub fn all(&self) -> &[Rule] {
        &self.rules
    }

    /// The rules applicable to one role.
    pub fn by_role(&self, role: &RoleId) -> Vec<&Rule> {
        self.rules.iter().filter(|r| &r.role == role).collect()
    }

    /// The rules applicable to any of the given roles.
    pub fn by_roles(&self, roles: &BTreeSet<RoleId>) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| roles.contains(&r.role))
            .collect()
    }

    /// The rules targeting any of the given groups.
    pub fn by_groups(&self, groups: &BTreeSet<GroupId>) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| groups.contains(&r.group))
            .collect()
    }

    /// The distinct groups referenced by any rule. This is the full set of
    /// groups a membership probe ever needs to touch.
    pub fn group_ids(&self) -> BTreeSet<GroupId> {
        self.rules.iter().map(|r| r.group).collect()
    }

    /// True when the snapshot holds no rules at all.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
