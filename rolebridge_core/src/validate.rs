//! Filtering of rules against the live CRM group catalog.

use crate::bridge::Bridge;
use crate::logging::{error, info, warn};
use crate::rules::Rule;

/// Drop rules whose target group cannot take static membership writes.
///
/// A rule pointing at a group the CRM does not know about is an operator
/// misconfiguration and logged as an error. Smart groups are expected here:
/// the CRM computes their membership, so they are skipped for add/remove but
/// still count for role derivation, which is why callers on the group-to-role
/// path do not need this filter.
pub async fn validate_groups(bridge: &Bridge, rules: Vec<Rule>) -> Vec<Rule> {
    let mut valid = Vec::with_capacity(rules.len());

    for rule in rules {
        let found = match bridge.crm.group_info(rule.group).await {
            Ok(found) => found,
            Err(e) => {
                warn!("group lookup failed for group {}: {e:#}", rule.group);
                None
            }
        };

        match found {
            None => {
                error!(
                    "cannot add contact to nonexistent group (ID {})",
                    rule.group
                );
            }
            Some(group) if group.is_smart => {
                if bridge.config.debugging {
                    info!(
                        "group {} ({}) is a smart group, so contacts are not added to it statically",
                        rule.group, group.title
                    );
                }
            }
            Some(_) => valid.push(rule),
        }
    }

    valid
}
