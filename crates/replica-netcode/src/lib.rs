//! Replica Netcode - client-side prediction by resimulation
//!
//! This crate provides the client half of state synchronization:
//!
//! - **Input capture**: every input gets an id from a shared [`IdSequence`]
//! - **Frame buffering**: one [`Frame`] per client tick, holding its inputs
//! - **Resimulation**: each tick replays all buffered frames on top of the
//!   last authoritative snapshot ([`FrameStore::process`])
//! - **Acknowledgement**: snapshots carrying `highestProcessedMessage` prune
//!   what the server already folded in
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Client                             │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   │
//! │  │ capture_input│──▶│  FrameStore  │──▶│ StateMutator │   │
//! │  └──────────────┘   └──────────────┘   └──────────────┘   │
//! │         │                  ▲                              │
//! │         ▼                  │                              │
//! │  ┌──────────────┐   ┌──────────────────────┐              │
//! │  │ InputMessage │   │ AuthoritativeSnapshot│              │
//! │  └──────────────┘   └──────────────────────┘              │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use replica_core::{Merger, SessionId, StateMutator, StateTree};
//! use replica_netcode::{FrameStore, IdSequence};
//!
//! let session = SessionId::new(1);
//! let initial = StateTree::from_entries([("count", 0)]);
//! let mut mutator = StateMutator::new(Merger::new());
//! mutator.insert_session(session, initial.clone());
//!
//! let mut store = FrameStore::new(session, initial, IdSequence::new());
//! store.process(&mut mutator, 0.1, |mutator, _input, _delta| {
//!     mutator.apply(session, ("count", 1000));
//! });
//! assert_eq!(store.current().map(|frame| frame.id), Some(1));
//! ```

mod error;
mod frame;
mod frame_store;
mod input;
mod messages;

pub use error::{Error, Result};
pub use frame::Frame;
pub use frame_store::{AckReport, FrameStore};
pub use input::{IdSequence, InputQueue, InputRecord, SaveRef};
pub use messages::{AuthoritativeSnapshot, InputMessage};
