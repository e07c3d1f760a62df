//!
//! Access to the role/group bridge
//!
//! Keeps a CMS's user roles and an external CRM's group membership in
//! agreement, in both directions, according to admin-defined association
//! rules. Rule storage, identity linkage, the CRM API, and the account store
//! stay behind collaborator traits so hosts (and tests) can supply their own.
#![deny(missing_docs)]

pub use bridge::Bridge;
pub use bridge::BridgeConfig;
pub use sync::{GroupDelta, RoleDelta};

pub mod bridge;
pub mod collaborators;
pub mod logging;
pub mod membership;
pub mod rules;
pub mod sync;
pub mod validate;

mod test_util;
