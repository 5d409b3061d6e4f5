//! One simulated tick on the client

use crate::InputRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Input and delta captured for one client tick
///
/// A frame is replayed on every tick until the server acknowledges an id
/// at or above its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Id from the shared sequence
    pub id: u64,
    /// Elapsed seconds this frame simulates
    pub delta: f64,
    /// Wall-clock time the frame was opened
    pub timestamp: DateTime<Utc>,
    /// Inputs captured since the previous frame, in capture order
    pub input: Vec<InputRecord>,
}

impl Frame {
    /// Open a frame stamped with the current time
    pub fn new(id: u64, delta: f64, input: Vec<InputRecord>) -> Self {
        Self {
            id,
            delta,
            timestamp: Utc::now(),
            input,
        }
    }

    /// Check whether the server has folded this frame into a snapshot
    pub fn is_acknowledged(&self, highest_processed_message: u64) -> bool {
        self.id <= highest_processed_message
    }
}
