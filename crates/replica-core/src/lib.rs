//! Replica Core - state trees, merging and change tracking
//!
//! This crate provides the data layer shared by the server and client
//! schedulers:
//! - Dynamic value types (`Value`, `ValueMap`) with copy-on-write containers
//! - Dot-separated paths into a tree (`Path`)
//! - Partial updates (`Patch`), including deferred ones
//! - The merge policy (`Merger`) and the single write path (`StateMutator`)
//! - Generational change detection with subscriptions (`Tracker`)
//!
//! ## Example
//!
//! ```
//! use replica_core::{Merger, Path, SessionId, StateMutator, StateTree, Value};
//!
//! let session = SessionId::new(1);
//! let mut mutator = StateMutator::new(Merger::new());
//! mutator.insert_session(session, StateTree::from_entries([("count", 0)]));
//!
//! mutator.apply(session, ("count", 1));
//! let count = Path::parse("count").unwrap();
//! assert_eq!(mutator.get(session, &count), Some(&Value::Int(1)));
//! ```

mod error;
mod identity;
pub mod merge;
mod mutator;
pub mod patch;
mod path;
pub mod tracker;
mod tree;
mod value;

pub use error::{Error, Result};
pub use identity::SessionId;
pub use merge::{MergeReport, Merger};
pub use mutator::StateMutator;
pub use patch::{Deferred, DeferredPoll, Patch, Resolver};
pub use path::{Path, Segment};
pub use tracker::{ChangeCallback, Condition, ElementCallback, Focus, Tracker};
pub use tree::StateTree;
pub use value::{Value, ValueMap};
