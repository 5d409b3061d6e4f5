//! Wire messages exchanged between client and server
//!
//! Framing and transport are left to the caller; these types only fix the
//! payload shape and a compact binary encoding.

use crate::{Error, InputRecord, Result};
use chrono::{DateTime, Utc};
use replica_core::{StateTree, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Server to client: the authoritative tree of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoritativeSnapshot {
    /// The full session tree
    pub game_state: StateTree,
    /// Newest input id folded into `game_state`
    pub highest_processed_message: u64,
    /// Message id
    pub id: u64,
    /// When the server produced the snapshot
    pub timestamp: DateTime<Utc>,
}

impl AuthoritativeSnapshot {
    /// Create a snapshot stamped with the current time
    pub fn new(id: u64, game_state: StateTree, highest_processed_message: u64) -> Self {
        Self {
            game_state,
            highest_processed_message,
            id,
            timestamp: Utc::now(),
        }
    }

    /// Encode for the wire
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// Decode from the wire
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

/// Client to server: one captured input, or a frame marker
///
/// The client sends a marker for every frame it opens, input or not. A
/// marker has no payload; its id only tells the server how far the
/// client's frame sequence has got, so an idle client still sees its
/// frames acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMessage {
    /// Input id from the client's shared sequence
    pub id: u64,
    /// Player that produced the input
    pub player_id: String,
    /// Opaque input payload
    pub raw_data: Value,
    /// Every input id the client still waits to see acknowledged
    pub pending_acks: Vec<u64>,
}

impl InputMessage {
    /// Build the outbound message for a record
    pub fn from_record(record: &InputRecord, pending_acks: Vec<u64>) -> Self {
        Self {
            id: record.id,
            player_id: record.player_id.clone(),
            raw_data: record.raw_data.clone(),
            pending_acks,
        }
    }

    /// Build the marker for a newly opened frame
    pub fn frame_marker(frame_id: u64, pending_acks: Vec<u64>) -> Self {
        Self {
            id: frame_id,
            player_id: String::new(),
            raw_data: Value::Null,
            pending_acks,
        }
    }

    /// Check if this message only marks a frame and carries no input
    pub fn is_frame_marker(&self) -> bool {
        self.raw_data.is_null()
    }

    /// Encode for the wire
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// Decode from the wire
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    bincode::serialize(message).map_err(Error::from)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(Error::from)
}
