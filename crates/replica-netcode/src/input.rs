//! Input records and the pending-input queue
//!
//! Every captured input gets an id from an [`IdSequence`]. The same
//! sequence hands out frame ids, so an input id and a frame id can be
//! compared directly: an input captured before a frame was opened always
//! has a smaller id than that frame.

use replica_core::{SessionId, Value};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic id source shared by frames and input records
///
/// Clones share the same counter. Ids start at 1; 0 means "nothing yet".
#[derive(Debug, Clone, Default)]
pub struct IdSequence {
    last: Arc<AtomicU64>,
}

impl IdSequence {
    /// Create a sequence whose first id is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id
    pub fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The most recently allocated id (0 if none)
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

/// The session (save) an input was produced for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRef {
    /// Session the input targets
    pub id: SessionId,
    /// Game mode of that session
    pub mode: String,
}

impl SaveRef {
    /// Create a save reference
    pub fn new(id: SessionId, mode: impl Into<String>) -> Self {
        Self {
            id,
            mode: mode.into(),
        }
    }
}

/// One captured input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRecord {
    /// Packet id from the shared [`IdSequence`]
    pub id: u64,
    /// Opaque payload interpreted by input handlers
    pub raw_data: Value,
    /// Player that produced the input
    pub player_id: String,
    /// Session the input belongs to
    pub save: SaveRef,
}

impl InputRecord {
    /// Create an input record
    pub fn new(id: u64, player_id: impl Into<String>, raw_data: impl Into<Value>, save: SaveRef) -> Self {
        Self {
            id,
            raw_data: raw_data.into(),
            player_id: player_id.into(),
            save,
        }
    }
}

/// FIFO of input records not yet attached to a frame
///
/// On the client this feeds the next frame; on the server it holds what
/// arrived from the network until the next authoritative step drains it.
#[derive(Debug, Clone, Default)]
pub struct InputQueue {
    records: VecDeque<InputRecord>,
}

impl InputQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record at the back
    pub fn push(&mut self, record: InputRecord) {
        self.records.push_back(record);
    }

    /// Put records back at the front, keeping their relative order
    pub fn requeue_front(&mut self, records: Vec<InputRecord>) {
        for record in records.into_iter().rev() {
            self.records.push_front(record);
        }
    }

    /// Take every queued record, oldest first
    pub fn drain(&mut self) -> Vec<InputRecord> {
        self.records.drain(..).collect()
    }

    /// Drop every record whose id is at or below `highest`
    ///
    /// Returns the number of records dropped.
    pub fn acknowledge(&mut self, highest: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|record| record.id > highest);
        before - self.records.len()
    }

    /// Ids of the queued records, oldest first
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.records.iter().map(|record| record.id)
    }

    /// Iterate over queued records, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &InputRecord> {
        self.records.iter()
    }

    /// The newest queued id
    pub fn newest_id(&self) -> Option<u64> {
        self.records.back().map(|record| record.id)
    }

    /// Get the number of queued records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clear all records
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
