//! The single write path into session state trees
//!
//! `StateMutator` owns one [`StateTree`] per session and applies every
//! [`Patch`] through its [`Merger`]. Trees are only ever changed here:
//! either merged via [`StateMutator::apply`] or swapped wholesale via
//! [`StateMutator::replace`] (used when replay restarts from an
//! authoritative snapshot).

use crate::merge::{MergeReport, Merger};
use crate::patch::{Deferred, DeferredPoll, Patch};
use crate::{Path, SessionId, StateTree, Value};
use indexmap::IndexMap;
use tracing::{debug, warn};

/// Per-session state trees plus the merge policy that writes them
#[derive(Debug, Default)]
pub struct StateMutator {
    merger: Merger,
    trees: IndexMap<SessionId, StateTree>,
    deferred: Vec<(SessionId, Deferred)>,
}

impl StateMutator {
    /// Create a mutator with the given merge policy
    pub fn new(merger: Merger) -> Self {
        Self {
            merger,
            trees: IndexMap::new(),
            deferred: Vec::new(),
        }
    }

    /// Get the merge policy
    pub fn merger(&self) -> &Merger {
        &self.merger
    }

    /// Register a session with its initial tree
    ///
    /// Replaces the tree if the session already exists.
    pub fn insert_session(&mut self, session: SessionId, tree: StateTree) {
        self.trees.insert(session, tree);
    }

    /// Drop a session and any deferred patches still aimed at it
    pub fn remove_session(&mut self, session: SessionId) -> Option<StateTree> {
        self.deferred.retain(|(id, _)| *id != session);
        self.trees.shift_remove(&session)
    }

    /// Check if a session is registered
    pub fn contains(&self, session: SessionId) -> bool {
        self.trees.contains_key(&session)
    }

    /// Iterate over registered session ids in registration order
    pub fn sessions(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.trees.keys().copied()
    }

    /// Number of registered sessions
    pub fn session_count(&self) -> usize {
        self.trees.len()
    }

    /// Get the live tree of a session
    pub fn state(&self, session: SessionId) -> Option<&StateTree> {
        self.trees.get(&session)
    }

    /// Read a value from a session's tree
    ///
    /// A missing session or path is not an error: it is reported as a
    /// warning and reads as absent.
    pub fn get(&self, session: SessionId, path: &Path) -> Option<&Value> {
        let Some(tree) = self.trees.get(&session) else {
            warn!(%session, %path, "read from unknown session");
            return None;
        };
        let value = tree.get(path);
        if value.is_none() {
            warn!(%session, %path, "read of undefined path");
        }
        value
    }

    /// Swap a session's tree wholesale
    pub fn replace(&mut self, session: SessionId, tree: StateTree) {
        self.trees.insert(session, tree);
    }

    /// Apply a patch to a session's tree
    ///
    /// Changes are visible to the next read immediately. Deferred patches
    /// are parked and applied by [`StateMutator::poll_deferred`] once
    /// resolved.
    pub fn apply(&mut self, session: SessionId, patch: impl Into<Patch>) -> MergeReport {
        let patch = patch.into();
        let Some(tree) = self.trees.get_mut(&session) else {
            warn!(%session, ?patch, "dropping patch for unknown session");
            return MergeReport {
                rejected: 1,
                ..MergeReport::default()
            };
        };

        let (report, deferred) = self.merger.merge(tree, patch);
        self.deferred
            .extend(deferred.into_iter().map(|pending| (session, pending)));
        report
    }

    /// Apply an optional patch, treating `None` as a no-op
    pub fn apply_opt(&mut self, session: SessionId, patch: Option<Patch>) -> MergeReport {
        match patch {
            Some(patch) => self.apply(session, patch),
            None => MergeReport {
                ignored: 1,
                ..MergeReport::default()
            },
        }
    }

    /// Feed every resolved deferred patch back through [`StateMutator::apply`]
    ///
    /// Returns the number of deferred patches that resolved.
    pub fn poll_deferred(&mut self) -> usize {
        let mut ready = Vec::new();
        self.deferred.retain_mut(|(session, pending)| match pending.poll() {
            DeferredPoll::Ready(patch) => {
                ready.push((*session, patch));
                false
            }
            DeferredPoll::Pending => true,
            DeferredPoll::Abandoned => {
                debug!(%session, "deferred patch abandoned by its producer");
                false
            }
        });

        let resolved = ready.len();
        for (session, patch) in ready {
            self.apply(session, patch);
        }
        resolved
    }

    /// Number of deferred patches still waiting
    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }
}
