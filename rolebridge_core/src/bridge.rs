//! Bridge module
//!
//! The [`Bridge`] bundles the collaborator handles and the settings that
//! every sync operation runs against.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use yaml_peg::serde as yaml;

use crate::collaborators::{CrmClient, IdentityLinker, RuleStore, UserDirectory};
use crate::logging::warn;
use crate::rules::{RoleId, RuleSet};

/// The id of a CMS account.
#[derive(Clone, Copy, Deserialize, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct UserId(pub u64);

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The id of a CRM contact record.
#[derive(Clone, Copy, Deserialize, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ContactId(pub u64);

impl Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A CMS account as the reconcilers see it: its id and current role set.
///
/// The bridge never saves one of these; role changes go back through
/// [`UserDirectory::commit_roles`] for the owning system to persist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    /// The account id.
    pub id: UserId,
    /// The roles currently held.
    pub roles: BTreeSet<RoleId>,
}

/// Struct representing the bridge settings file.
#[derive(Clone, Deserialize, Debug, Serialize)]
pub struct BridgeConfig {
    /// Log the details of role and group changes as they are computed.
    #[serde(default)]
    pub debugging: bool,
    /// Roles every account holds implicitly. They are skipped when deriving
    /// group membership from roles.
    #[serde(default = "default_builtin_roles")]
    pub builtin_roles: BTreeSet<RoleId>,
}

/// The roles a stock CMS grants without any assignment.
fn default_builtin_roles() -> BTreeSet<RoleId> {
    ["anonymous", "authenticated"]
        .into_iter()
        .map(|r| RoleId(r.to_owned()))
        .collect()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            debugging: false,
            builtin_roles: default_builtin_roles(),
        }
    }
}

impl BridgeConfig {
    /// Parse settings from a yaml document.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut config = yaml::from_str::<BridgeConfig>(raw).context("deserializing config")?;
        config.pop().ok_or_else(|| anyhow!("empty config document"))
    }

    /// Ingest the settings file from the given path.
    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        Self::from_yaml(&raw)
    }

    /// Convert the settings to a yaml string.
    pub fn to_yaml(&self) -> Result<String> {
        yaml::to_string(self).map_err(anyhow::Error::from)
    }
}

/// Represents the bridge in its entirety: settings plus the four
/// collaborator seams.
pub struct Bridge {
    /// The bridge settings.
    pub config: BridgeConfig,
    pub(crate) rule_store: Arc<dyn RuleStore + Send + Sync>,
    pub(crate) linker: Arc<dyn IdentityLinker + Send + Sync>,
    pub(crate) crm: Arc<dyn CrmClient + Send + Sync>,
    pub(crate) users: Arc<dyn UserDirectory + Send + Sync>,
}

impl Bridge {
    /// Assemble a bridge from its collaborators.
    pub fn new(
        config: BridgeConfig,
        rule_store: Arc<dyn RuleStore + Send + Sync>,
        linker: Arc<dyn IdentityLinker + Send + Sync>,
        crm: Arc<dyn CrmClient + Send + Sync>,
        users: Arc<dyn UserDirectory + Send + Sync>,
    ) -> Self {
        Self {
            config,
            rule_store,
            linker,
            crm,
            users,
        }
    }

    /// Load a fresh rule snapshot. Each sync pass takes its own, so rule
    /// edits land between passes, never inside one.
    pub async fn rule_set(&self) -> Result<RuleSet> {
        Ok(RuleSet::new(self.rule_store.load_rules().await?))
    }

    /// The contact linked to a user. A failed lookup is treated the same as
    /// an unlinked user and logged.
    pub async fn contact_id(&self, user: UserId) -> Option<ContactId> {
        match self.linker.contact_id_for(user).await {
            Ok(contact) => contact,
            Err(e) => {
                warn!("contact lookup failed for user {user}: {e:#}");
                None
            }
        }
    }

    /// The account linked to a contact, loaded with its current roles.
    pub async fn user_for_contact(&self, contact: ContactId) -> Option<User> {
        let uid = match self.linker.user_id_for(contact).await {
            Ok(Some(uid)) => uid,
            Ok(None) => return None,
            Err(e) => {
                warn!("user lookup failed for contact {contact}: {e:#}");
                return None;
            }
        };
        match self.users.load_user(uid).await {
            Ok(user) => user,
            Err(e) => {
                warn!("loading user {uid} failed: {e:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = BridgeConfig::default();
        assert!(!config.debugging);
        assert_eq!(config.builtin_roles.len(), 2);
        assert!(config.builtin_roles.contains(&RoleId("anonymous".to_owned())));
    }

    #[test]
    fn config_from_yaml() -> Result<()> {
        let config = BridgeConfig::from_yaml("debugging: true\n")?;
        assert!(config.debugging);
        // omitted fields fall back to their defaults
        assert_eq!(config.builtin_roles, default_builtin_roles());

        let config = BridgeConfig::from_yaml(
            "debugging: false\nbuiltin_roles:\n  - anonymous\n",
        )?;
        assert_eq!(config.builtin_roles.len(), 1);
        Ok(())
    }

    #[test]
    fn config_yaml_round_trip() -> Result<()> {
        let config = BridgeConfig {
            debugging: true,
            ..Default::default()
        };
        let parsed = BridgeConfig::from_yaml(&config.to_yaml()?)?;
        assert!(parsed.debugging);
        Ok(())
    }
}
