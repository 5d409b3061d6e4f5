//! Partial state updates
//!
//! A `Patch` is everything a hook may hand back to the [`StateMutator`]:
//!
//! - a nested map merged recursively into the tree
//! - a `(path, value)` pair, expanded into a nested map before merging
//! - an ordered batch of patches
//! - a deferred patch that is applied once its producer resolves it
//!
//! [`StateMutator`]: crate::StateMutator

use crate::{Path, StateTree, Value, ValueMap};
use std::fmt;
use tokio::sync::oneshot;

/// A partial update to a state tree
pub enum Patch {
    /// Merge a nested map into the tree. Lists are replaced wholesale.
    Merge(Value),
    /// Set the value at a dot-separated path, parsed when applied
    Set {
        /// The raw path text
        path: String,
        /// The value to place there
        value: Value,
    },
    /// Set the value at a pre-parsed path
    At {
        /// The parsed path
        path: Path,
        /// The value to place there
        value: Value,
    },
    /// Apply each patch in order
    Batch(Vec<Patch>),
    /// A patch that becomes available later
    Deferred(Deferred),
}

impl Patch {
    /// Create a path/value patch
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Patch::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Create a typed path/value patch
    pub fn at(path: Path, value: impl Into<Value>) -> Self {
        Patch::At {
            path,
            value: value.into(),
        }
    }

    /// Create a merge patch from key/value pairs
    pub fn merge<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Patch::Merge(Value::map(entries))
    }

    /// Check if applying this patch can never change a tree
    ///
    /// Null, an empty map, an empty list and an empty batch are no-ops.
    pub fn is_noop(&self) -> bool {
        match self {
            Patch::Merge(value) => match value {
                Value::Null => true,
                Value::Map(map) => map.is_empty(),
                Value::List(list) => list.is_empty(),
                _ => false,
            },
            Patch::Batch(patches) => patches.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Patch::Merge(value) => f.debug_tuple("Merge").field(value).finish(),
            Patch::Set { path, value } => f
                .debug_struct("Set")
                .field("path", path)
                .field("value", value)
                .finish(),
            Patch::At { path, value } => f
                .debug_struct("At")
                .field("path", &path.to_string())
                .field("value", value)
                .finish(),
            Patch::Batch(patches) => f.debug_list().entries(patches).finish(),
            Patch::Deferred(_) => write!(f, "Deferred"),
        }
    }
}

impl From<Value> for Patch {
    fn from(value: Value) -> Self {
        Patch::Merge(value)
    }
}

impl From<ValueMap> for Patch {
    fn from(map: ValueMap) -> Self {
        Patch::Merge(map.into())
    }
}

impl From<StateTree> for Patch {
    fn from(tree: StateTree) -> Self {
        Patch::Merge(tree.into())
    }
}

impl<V: Into<Value>> From<(&str, V)> for Patch {
    fn from((path, value): (&str, V)) -> Self {
        Patch::set(path, value)
    }
}

impl<V: Into<Value>> From<(Path, V)> for Patch {
    fn from((path, value): (Path, V)) -> Self {
        Patch::at(path, value)
    }
}

impl From<Vec<Patch>> for Patch {
    fn from(patches: Vec<Patch>) -> Self {
        Patch::Batch(patches)
    }
}

impl From<Deferred> for Patch {
    fn from(deferred: Deferred) -> Self {
        Patch::Deferred(deferred)
    }
}

/// State of a deferred patch when polled
#[derive(Debug)]
pub enum DeferredPoll {
    /// The producer resolved the patch
    Ready(Patch),
    /// Not resolved yet
    Pending,
    /// The producer was dropped without resolving
    Abandoned,
}

/// Receiving half of a deferred patch
pub struct Deferred {
    rx: oneshot::Receiver<Patch>,
}

impl Deferred {
    /// Create a linked resolver/deferred pair
    pub fn channel() -> (Resolver, Deferred) {
        let (tx, rx) = oneshot::channel();
        (Resolver { tx }, Deferred { rx })
    }

    /// Check for a resolution without blocking
    pub fn poll(&mut self) -> DeferredPoll {
        match self.rx.try_recv() {
            Ok(patch) => DeferredPoll::Ready(patch),
            Err(oneshot::error::TryRecvError::Empty) => DeferredPoll::Pending,
            Err(oneshot::error::TryRecvError::Closed) => DeferredPoll::Abandoned,
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}

/// Sending half of a deferred patch
#[derive(Debug)]
pub struct Resolver {
    tx: oneshot::Sender<Patch>,
}

impl Resolver {
    /// Resolve the deferred patch
    ///
    /// Returns false if the deferred side was already dropped.
    pub fn resolve(self, patch: impl Into<Patch>) -> bool {
        self.tx.send(patch.into()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_shapes() {
        assert!(Patch::Merge(Value::Null).is_noop());
        assert!(Patch::Merge(Value::empty_map()).is_noop());
        assert!(Patch::Merge(Value::list(Vec::<Value>::new())).is_noop());
        assert!(!Patch::Merge(Value::list([1])).is_noop());
        assert!(Patch::Batch(Vec::new()).is_noop());
        assert!(!Patch::merge([("a", 1)]).is_noop());
        assert!(!Patch::set("a", Value::Null).is_noop());
    }

    #[test]
    fn test_from_conversions() {
        assert!(matches!(Patch::from(("a.b", 1)), Patch::Set { .. }));
        assert!(matches!(
            Patch::from((Path::parse("a").unwrap(), 1)),
            Patch::At { .. }
        ));
        assert!(matches!(Patch::from(Value::map([("a", 1)])), Patch::Merge(_)));
        assert!(matches!(
            Patch::from(vec![Patch::set("a", 1)]),
            Patch::Batch(ref b) if b.len() == 1
        ));
    }

    #[test]
    fn test_deferred_resolution() {
        let (resolver, mut deferred) = Deferred::channel();
        assert!(matches!(deferred.poll(), DeferredPoll::Pending));

        assert!(resolver.resolve(Patch::set("score", 3)));
        assert!(matches!(deferred.poll(), DeferredPoll::Ready(Patch::Set { .. })));
    }

    #[test]
    fn test_deferred_abandoned() {
        let (resolver, mut deferred) = Deferred::channel();
        drop(resolver);
        assert!(matches!(deferred.poll(), DeferredPoll::Abandoned));
    }

    #[test]
    fn test_debug_output() {
        let patch = Patch::Batch(vec![Patch::set("a", 1), Patch::merge([("b", 2)])]);
        let text = format!("{:?}", patch);
        assert!(text.contains("Set"));
        assert!(text.contains("Merge"));
    }
}
