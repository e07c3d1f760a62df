//! Live group-membership lookups against the CRM.

use std::collections::BTreeSet;

use crate::bridge::{Bridge, ContactId};
use crate::logging::warn;
use crate::rules::{GroupId, RuleSet};

/// The subset of rule-referenced groups the contact currently belongs to.
///
/// Each group is probed with a per-contact membership check rather than a
/// roster listing: smart groups cannot be listed, but they do answer
/// membership queries, so both kinds are handled uniformly. Call volume is
/// bounded by the number of distinct groups the rules reference, not by the
/// CRM's group count.
///
/// A failed check counts as not-a-member; a later pass self-corrects.
pub async fn contact_group_ids(
    bridge: &Bridge,
    contact: ContactId,
    rules: &RuleSet,
) -> BTreeSet<GroupId> {
    let mut member_of = BTreeSet::new();

    for group in rules.group_ids() {
        match bridge.crm.is_member(contact, group).await {
            Ok(true) => {
                member_of.insert(group);
            }
            Ok(false) => {}
            Err(e) => {
                warn!("membership check failed for contact {contact} in group {group}: {e:#}");
            }
        }
    }

    member_of
}
