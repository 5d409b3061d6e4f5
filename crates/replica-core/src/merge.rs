//! Recursive merge policy
//!
//! `Merger` is the pure part of the state mutator: it knows how a [`Patch`]
//! changes a [`StateTree`] but owns no trees itself. Rules:
//!
//! - maps merge recursively, key by key
//! - every other value (lists included) replaces what was there
//! - protected paths are stripped from incoming patches first
//! - a malformed patch is dropped and leaves the tree untouched

use crate::patch::{Deferred, Patch};
use crate::path::Segment;
use crate::{Path, StateTree, Value, ValueMap};
use tracing::{trace, warn};

/// Counts describing what a merge did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Patches merged into the tree
    pub applied: usize,
    /// No-op patches skipped
    pub ignored: usize,
    /// Malformed patches dropped
    pub rejected: usize,
    /// Deferred patches parked for later
    pub deferred: usize,
}

impl MergeReport {
    /// Check whether any patch reached the tree
    pub fn changed(&self) -> bool {
        self.applied > 0
    }

    /// Add the counts of another report to this one
    pub fn absorb(&mut self, other: MergeReport) {
        self.applied += other.applied;
        self.ignored += other.ignored;
        self.rejected += other.rejected;
        self.deferred += other.deferred;
    }
}

/// Merge policy applied to every patch
#[derive(Debug, Clone, Default)]
pub struct Merger {
    /// Identity fields a patch may never overwrite
    protected: Vec<Path>,
}

impl Merger {
    /// Create a merger with no protected paths
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a merger that strips the given paths from every patch
    pub fn with_protected(protected: impl IntoIterator<Item = Path>) -> Self {
        Self {
            protected: protected.into_iter().collect(),
        }
    }

    /// The protected paths
    pub fn protected(&self) -> &[Path] {
        &self.protected
    }

    /// Merge a patch into a tree
    ///
    /// Deferred patches are not waited on; they are handed back so the
    /// caller can feed their resolution through this merger later.
    pub fn merge(&self, tree: &mut StateTree, patch: Patch) -> (MergeReport, Vec<Deferred>) {
        let mut report = MergeReport::default();
        let mut deferred = Vec::new();
        self.merge_patch(tree, patch, &mut report, &mut deferred);
        (report, deferred)
    }

    fn merge_patch(
        &self,
        tree: &mut StateTree,
        patch: Patch,
        report: &mut MergeReport,
        deferred: &mut Vec<Deferred>,
    ) {
        if patch.is_noop() {
            report.ignored += 1;
            return;
        }

        match patch {
            Patch::Merge(value) => self.merge_value(tree, value, report),
            Patch::Set { path, value } => match Path::parse(&path) {
                Ok(path) => self.merge_value(tree, path.to_patch(value), report),
                Err(e) => {
                    warn!(error = %e, "dropping path patch");
                    report.rejected += 1;
                }
            },
            Patch::At { path, value } => self.merge_value(tree, path.to_patch(value), report),
            Patch::Batch(patches) => {
                for patch in patches {
                    self.merge_patch(tree, patch, report, deferred);
                }
            }
            Patch::Deferred(pending) => {
                report.deferred += 1;
                deferred.push(pending);
            }
        }
    }

    fn merge_value(&self, tree: &mut StateTree, value: Value, report: &mut MergeReport) {
        let mut incoming = match value {
            Value::Map(map) => map,
            Value::Null => {
                report.ignored += 1;
                return;
            }
            other => {
                warn!(
                    got = other.type_name(),
                    "dropping patch: expected a map at the root"
                );
                report.rejected += 1;
                return;
            }
        };

        for path in &self.protected {
            if path.resolve(&Value::Map(incoming.clone())).is_some() {
                trace!(%path, "stripping protected field from patch");
                strip(std::sync::Arc::make_mut(&mut incoming), path.segments());
            }
        }

        if incoming.is_empty() {
            report.ignored += 1;
            return;
        }

        merge_into(tree.root_mut(), &incoming);
        report.applied += 1;
    }
}

/// Recursively merge `patch` into `target`
pub(crate) fn merge_into(target: &mut ValueMap, patch: &ValueMap) {
    for (key, incoming) in patch {
        let nested = matches!(incoming, Value::Map(_)) && matches!(target.get(key), Some(Value::Map(_)));
        if nested {
            if let (Some(existing), Value::Map(inner)) = (target.get_mut(key), incoming) {
                merge_into(existing.make_map_mut(), inner);
            }
        } else {
            target.insert(key.clone(), incoming.clone());
        }
    }
}

/// Remove the field at `segments`, dropping parent maps the removal empties
fn strip(map: &mut ValueMap, segments: &[Segment]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.shift_remove(first.key());
        return;
    }
    let emptied = match map.get_mut(first.key()) {
        Some(child @ Value::Map(_)) => {
            let inner = child.make_map_mut();
            strip(inner, rest);
            inner.is_empty()
        }
        _ => false,
    };
    if emptied {
        map.shift_remove(first.key());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(value: Value) -> StateTree {
        StateTree::try_from(value).unwrap()
    }

    #[test]
    fn test_nested_merge_keeps_siblings() {
        let mut state = tree(Value::map([(
            "player",
            Value::map([("name", Value::from("a")), ("hp", Value::from(10))]),
        )]));
        let (report, _) = Merger::new().merge(&mut state, Patch::merge([("player", Value::map([("hp", 7)]))]));

        assert_eq!(report.applied, 1);
        assert_eq!(
            state.as_value(),
            &Value::map([(
                "player",
                Value::map([("name", Value::from("a")), ("hp", Value::from(7))])
            )])
        );
    }

    #[test]
    fn test_lists_replaced_wholesale() {
        let mut state = tree(Value::map([("numbers", Value::list([1, 2, 3]))]));
        Merger::new().merge(&mut state, Patch::merge([("numbers", Value::list([9]))]));
        assert_eq!(state.as_value(), &Value::map([("numbers", Value::list([9]))]));
    }

    #[test]
    fn test_path_patch_expands() {
        let mut state = tree(Value::map([(
            "controller",
            Value::map([("child", Value::map([("age", 5), ("name", 1)]))]),
        )]));
        Merger::new().merge(&mut state, Patch::set("controller.child.age", 6));
        let path = Path::parse("controller.child").unwrap();
        assert_eq!(
            state.get(&path),
            Some(&Value::map([("age", 6), ("name", 1)]))
        );
    }

    #[test]
    fn test_noops_leave_tree_shared() {
        let original = tree(Value::map([("count", 0)]));
        let mut state = original.clone();
        let merger = Merger::new();

        for patch in [
            Patch::Merge(Value::Null),
            Patch::Merge(Value::empty_map()),
            Patch::Merge(Value::list(Vec::<Value>::new())),
            Patch::Batch(Vec::new()),
        ] {
            let (report, _) = merger.merge(&mut state, patch);
            assert!(!report.changed());
            assert_eq!(report.ignored, 1);
            assert_eq!(report.rejected, 0);
        }
        assert!(state.shares_root_with(&original));
    }

    #[test]
    fn test_invalid_shapes_rejected() {
        let original = tree(Value::map([("count", 0)]));
        let mut state = original.clone();
        let merger = Merger::new();

        let (report, _) = merger.merge(&mut state, Patch::Merge(Value::Int(4)));
        assert_eq!(report.rejected, 1);
        let (report, _) = merger.merge(&mut state, Patch::set("a..b", 1));
        assert_eq!(report.rejected, 1);
        let (report, _) = merger.merge(&mut state, Patch::set("", 1));
        assert_eq!(report.rejected, 1);

        assert!(state.shares_root_with(&original));
    }

    #[test]
    fn test_batch_applies_in_order_and_skips_bad_entries() {
        let mut state = tree(Value::map([("count", 0)]));
        let (report, _) = Merger::new().merge(
            &mut state,
            Patch::Batch(vec![
                Patch::set("count", 1),
                Patch::Merge(Value::Bool(true)),
                Patch::set("count", 2),
            ]),
        );
        assert_eq!(report.applied, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(state.as_value().get("count"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_protected_paths_stripped() {
        let mut state = tree(Value::map([(
            "session",
            Value::map([("id", Value::from(7)), ("paused", Value::from(false))]),
        )]));
        let merger = Merger::with_protected([Path::parse("session.id").unwrap()]);

        let (report, _) = merger.merge(
            &mut state,
            Patch::merge([(
                "session",
                Value::map([("id", Value::from(99)), ("paused", Value::from(true))]),
            )]),
        );
        assert_eq!(report.applied, 1);
        assert_eq!(
            state.get(&Path::parse("session.id").unwrap()),
            Some(&Value::Int(7))
        );
        assert_eq!(
            state.get(&Path::parse("session.paused").unwrap()),
            Some(&Value::Bool(true))
        );

        let (report, _) = merger.merge(&mut state, Patch::set("session.id", 5));
        assert_eq!(report.ignored, 1);
        assert_eq!(
            state.get(&Path::parse("session.id").unwrap()),
            Some(&Value::Int(7))
        );
    }

    #[test]
    fn test_deferred_handed_back() {
        let mut state = tree(Value::empty_map());
        let (_resolver, deferred) = Deferred::channel();
        let (report, pending) = Merger::new().merge(&mut state, Patch::Deferred(deferred));
        assert_eq!(report.deferred, 1);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_last_write_wins() {
        let mut state = tree(Value::empty_map());
        let merger = Merger::new();
        merger.merge(&mut state, Patch::merge([("a", 1), ("b", 1)]));
        merger.merge(&mut state, Patch::merge([("a", 2)]));
        assert_eq!(state.as_value(), &Value::map([("a", 2), ("b", 1)]));
    }
}
