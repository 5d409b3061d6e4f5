//! The `session` namespace every session tree carries
//!
//! ```text
//! session: {
//!     id: 7,
//!     mode: "arena",
//!     paused: false,
//!     waitingForPlayers: true,
//! }
//! ```
//!
//! The schedulers read `paused` and `waitingForPlayers` at the start of
//! every tick. `id` is protected by the default merge policy.

use replica_core::{Merger, Patch, SessionId, StateTree, Value};

/// Name of the namespace key at the root of the tree
pub const NAMESPACE: &str = "session";

const PAUSED: &str = "paused";
const WAITING: &str = "waitingForPlayers";

/// Scheduler flags read from a session tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFlags {
    /// Skip the session entirely
    pub paused: bool,
    /// Skip on-tick hooks, keep handling input
    pub waiting_for_players: bool,
}

impl SessionFlags {
    /// Read the flags; missing or non-boolean fields count as false
    pub fn read(tree: &StateTree) -> Self {
        let flag = |key: &str| {
            tree.as_value()
                .get(NAMESPACE)
                .and_then(|ns| ns.get(key))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        Self {
            paused: flag(PAUSED),
            waiting_for_players: flag(WAITING),
        }
    }

    /// Read the flags of an optional tree
    pub fn of(tree: Option<&StateTree>) -> Self {
        tree.map(Self::read).unwrap_or_default()
    }

    /// Patch setting `session.paused`
    pub fn pause_patch(paused: bool) -> Patch {
        Patch::set(format!("{NAMESPACE}.{PAUSED}"), paused)
    }

    /// Patch setting `session.waitingForPlayers`
    pub fn waiting_patch(waiting: bool) -> Patch {
        Patch::set(format!("{NAMESPACE}.{WAITING}"), waiting)
    }
}

/// Fill in the namespace of a freshly created session tree
///
/// Existing flag values in `tree` win over the defaults; `id` and `mode`
/// always reflect the arguments.
pub fn stamp(mut tree: StateTree, session: SessionId, mode: &str) -> StateTree {
    let existing = SessionFlags::read(&tree);
    let namespace = Value::map([
        ("id", Value::from(session.raw())),
        ("mode", Value::from(mode)),
        (PAUSED, Value::from(existing.paused)),
        (WAITING, Value::from(existing.waiting_for_players)),
    ]);
    Merger::new().merge(&mut tree, Patch::merge([(NAMESPACE, namespace)]));
    tree
}
