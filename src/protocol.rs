//! The wire envelopes exchanged between participants.
//!
//! Every datagram carries a UTF-8 JSON object tagged by `message_type`, with
//! one exception: the bootstrap acknowledges a ping with the literal bytes
//! `pong`, outside the JSON framing.

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::chain::{Blockchain, Participant};
use crate::crypto::Address;
use crate::error::Result;
use crate::transaction::Transaction;

/// The non-JSON acknowledgment to a `ping`.
pub const PONG: &[u8] = b"pong";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "lowercase")]
pub enum Envelope {
    /// Peer probing whether the bootstrap is up yet.
    Ping,
    /// Admission request: the peer's address key and its initial stake.
    Key { key: Address, stake: f64 },
    /// Admission response: the assigned identity plus a full snapshot of the
    /// bootstrap's view.
    Activate {
        id: u64,
        color: String,
        blockchain: Blockchain,
        current_block: Vec<Transaction>,
    },
    /// A newly admitted participant's record, fanned out to earlier peers.
    Node { node: Participant },
    Transaction { transaction: Transaction },
    Block { block: Block },
}

impl Envelope {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("envelopes are serializable")
    }

    pub fn decode(bytes: &[u8]) -> Result<Envelope> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
