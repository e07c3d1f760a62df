//! Bulk synchronization over the full user population.
//!
//! One user per step. The state between steps is an explicit value the
//! caller can serialize and persist, so an interrupted pass loses at most
//! the user in flight and resumes from the remaining queue.

use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::bridge::{Bridge, UserId};
use crate::logging::{error, info};
use crate::sync::{groups, roles};

/// Resumable state for a bulk sync pass.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq, Serialize)]
pub struct SyncState {
    /// Users still to process.
    pub queue: VecDeque<UserId>,
    /// Size of the original queue.
    pub total: usize,
    /// Users synced successfully.
    pub processed: usize,
    /// Users skipped after a failure.
    pub errors: usize,
}

impl SyncState {
    /// Seed a pass from an explicit id list.
    pub fn new(user_ids: Vec<UserId>) -> Self {
        let total = user_ids.len();
        Self {
            queue: user_ids.into(),
            total,
            processed: 0,
            errors: 0,
        }
    }

    /// The completed fraction of the pass.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            1.0 - self.queue.len() as f64 / self.total as f64
        }
    }

    /// True once the queue is drained.
    pub fn done(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Start a bulk pass over every user the directory knows about.
pub async fn start(bridge: &Bridge) -> Result<SyncState> {
    Ok(SyncState::new(bridge.users.user_ids().await?))
}

/// Process a single user off the queue and report the progress fraction.
///
/// Both sync directions run unconditionally, as a full manual sync does.
/// A per-user failure (missing account, missing contact linkage, CRM write
/// error) is logged and counted; it never aborts the pass.
pub async fn process(bridge: &Bridge, state: &mut SyncState) -> f64 {
    let uid = match state.queue.pop_front() {
        Some(uid) => uid,
        None => return 1.0,
    };

    match sync_one(bridge, uid).await {
        Ok(()) => state.processed += 1,
        Err(e) => {
            error!("sync failed for user {uid}: {e:#}");
            state.errors += 1;
        }
    }

    state.progress()
}

async fn sync_one(bridge: &Bridge, uid: UserId) -> Result<()> {
    let user = bridge
        .users
        .load_user(uid)
        .await?
        .ok_or_else(|| anyhow!("user {uid} not found"))?;

    groups::user_add_groups(bridge, &user).await?;
    // membership may just have changed; derive roles from the updated state
    roles::sync_roles(bridge, &user).await?;
    Ok(())
}

/// Build the operator-facing summary for a finished pass.
pub fn finished(success: bool, state: &SyncState) -> String {
    if !success {
        return "Encountered errors while performing sync.".to_owned();
    }
    match state.processed {
        1 => "One user processed.".to_owned(),
        n => format!("{n} users processed."),
    }
}

/// Drive a pass to completion in-process: the step loop a batch UI or CLI
/// would otherwise own.
pub async fn run(bridge: &Bridge) -> Result<SyncState> {
    let mut state = start(bridge).await?;
    while !state.done() {
        process(bridge, &mut state).await;
    }
    info!("{}", finished(true, &state));
    Ok(state)
}
