//! Reconciliation between CMS roles and CRM group membership.
//!
//! Role and login events run the role-to-group direction in [`groups`];
//! group-change events and the bulk pass run the group-to-role direction in
//! [`roles`]; [`batch`] drives both over the whole user population.

pub mod batch;
pub mod groups;
pub mod roles;

pub use groups::GroupDelta;
pub use roles::RoleDelta;
