use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::{Error, Result};
use crate::transaction::Transaction;

/// The `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    /// The id of the participant that sealed this block, 0 for genesis.
    pub validator: u64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub hash: String,
}

/// The hashed body: every field up to and excluding the hash, in wire order.
#[derive(Serialize)]
struct HashingView<'a> {
    index: u64,
    timestamp: &'a DateTime<Utc>,
    validator: u64,
    transactions: &'a [Transaction],
    previous_hash: &'a str,
}

impl Block {
    /// Seals a block over the supplied transactions. Sealing orders the
    /// transactions by timestamp (stable) and computes the hash last.
    pub fn seal(
        index: u64,
        validator: u64,
        mut transactions: Vec<Transaction>,
        previous_hash: String,
    ) -> Block {
        transactions.sort_by_key(|tx| tx.timestamp);

        let mut block = Block {
            index,
            timestamp: Utc::now(),
            validator,
            transactions,
            previous_hash,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    fn hashing_bytes(&self) -> Vec<u8> {
        let body = HashingView {
            index: self.index,
            timestamp: &self.timestamp,
            validator: self.validator,
            transactions: &self.transactions,
            previous_hash: &self.previous_hash,
        };
        serde_json::to_vec(&body).expect("block bodies are serializable")
    }

    pub fn compute_hash(&self) -> String {
        crypto::sha256_hex(&self.hashing_bytes())
    }

    pub fn verify_hash(&self) -> Result<()> {
        if self.hash != self.compute_hash() {
            return Err(Error::InvalidBlockHash);
        }
        Ok(())
    }

    /// The validator credit this block accumulates.
    pub fn total_fees(&self, fee_rate: f64) -> f64 {
        self.transactions.iter().map(|tx| tx.fees(fee_rate)).sum()
    }
}
