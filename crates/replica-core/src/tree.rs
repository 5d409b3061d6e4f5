//! The per-session state tree

use crate::{Error, Path, Value, ValueMap};
use serde::{Deserialize, Serialize};

/// All simulated data for one session
///
/// The root is always a map. Cloning is O(1): the clone shares every
/// container with the original until one of them is written, so taking a
/// copy of an authoritative snapshot before replay costs nothing up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct StateTree {
    root: Value,
}

impl StateTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self {
            root: Value::empty_map(),
        }
    }

    /// Create a tree from a root map
    pub fn from_map(map: ValueMap) -> Self {
        Self { root: map.into() }
    }

    /// Create a tree from top-level key/value pairs
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            root: Value::map(entries),
        }
    }

    /// The tree as a value (always a map)
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Number of top-level keys
    pub fn len(&self) -> usize {
        self.root.as_map().map_or(0, |map| map.len())
    }

    /// Check if the tree has no top-level keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutable root map, copied on write if shared
    pub(crate) fn root_mut(&mut self) -> &mut ValueMap {
        self.root.make_map_mut()
    }

    /// Read a value at a path
    pub fn get(&self, path: &Path) -> Option<&Value> {
        path.resolve(&self.root)
    }

    /// Check if two trees still share the same root allocation
    pub fn shares_root_with(&self, other: &StateTree) -> bool {
        self.root.shares_storage_with(&other.root)
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Value> for StateTree {
    type Error = Error;

    fn try_from(value: Value) -> crate::Result<Self> {
        match value {
            Value::Map(_) => Ok(Self { root: value }),
            Value::Null => Ok(Self::new()),
            other => Err(Error::TypeError {
                expected: "map".to_string(),
                got: other.type_name().to_string(),
            }),
        }
    }
}

impl From<StateTree> for Value {
    fn from(tree: StateTree) -> Self {
        tree.root
    }
}

impl From<ValueMap> for StateTree {
    fn from(map: ValueMap) -> Self {
        Self::from_map(map)
    }
}
