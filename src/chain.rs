//! The blockchain and its roster of participants.
//!
//! The chain exclusively owns both. All mutation happens behind the node's
//! chain lock; this module only provides the data model and the validation,
//! registration and projection rules.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::crypto::Address;
use crate::election;
use crate::error::{Error, Result};
use crate::transaction::{Transaction, TransactionKind};

/// Fractional surcharge on coin transfers, paid into the validator credit.
pub const FEE_RATE: f64 = 0.03;

/// One admitted member of the network.
///
/// Serde field names and order match the `node` wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// 0 for the bootstrap, assigned in admission order for peers.
    pub id: u64,
    pub address: String,
    pub port: u16,
    pub key: Address,
    pub stake: f64,
    pub balance: f64,
    /// Count of transactions this participant has originated.
    pub nonce: u64,
}

impl Participant {
    /// Funds not locked as stake; what coin and message transactions may
    /// spend.
    pub fn available_balance(&self) -> f64 {
        self.balance - self.stake
    }
}

/// Balance, stake and nonce of one participant as derived purely from the
/// chain contents.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProjectedFunds {
    pub balance: f64,
    pub stake: f64,
    pub nonce: u64,
}

/// Serde field names and order match the `activate` wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blockchain {
    /// The number of transactions that seals a block.
    pub capacity: usize,
    /// The index the next sealed block will carry.
    pub block_index: u64,
    pub chain: Vec<Block>,
    pub nodes: Vec<Participant>,
}

impl Blockchain {
    pub fn new(capacity: usize) -> Blockchain {
        Blockchain {
            capacity,
            block_index: 0,
            chain: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// The chain tail. Every chain holds at least the genesis block by the
    /// time anything queries it.
    pub fn last_block(&self) -> &Block {
        self.chain.last().expect("chain holds the genesis block")
    }

    /// Extends the chain. The caller has already validated the block.
    pub fn append(&mut self, block: Block) {
        self.chain.push(block);
        self.block_index = self.chain.len() as u64;
    }

    pub fn participant(&self, id: u64) -> Option<&Participant> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn participant_mut(&mut self, id: u64) -> Option<&mut Participant> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    pub fn participant_by_key(&self, key: &Address) -> Option<&Participant> {
        self.nodes.iter().find(|node| node.key == *key)
    }

    fn participant_by_key_mut(&mut self, key: &Address) -> Option<&mut Participant> {
        self.nodes.iter_mut().find(|node| node.key == *key)
    }

    /// Adds a participant to the roster at admission. Records are never
    /// removed for the lifetime of the run.
    pub fn register_participant(&mut self, participant: Participant) {
        if self.participant(participant.id).is_some() {
            log::warn!("participant {} is already registered", participant.id);
            return;
        }
        self.nodes.push(participant);
        self.nodes.sort_by_key(|node| node.id);
    }

    /// Validates a broadcast transaction against the current roster state.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<()> {
        let sender = self
            .participant_by_key(&tx.sender_address)
            .ok_or(Error::UnknownSender)?;

        if tx.receiver_address.is_sentinel() {
            if tx.type_of_transaction != TransactionKind::Stake {
                return Err(Error::UnknownReceiver);
            }
        } else if self.participant_by_key(&tx.receiver_address).is_none() {
            return Err(Error::UnknownReceiver);
        }

        if tx.nonce != sender.nonce {
            return Err(Error::InvalidNonce {
                actual: tx.nonce,
                expected: sender.nonce,
            });
        }

        tx.verify_signature()?;
        tx.verify_hash()?;

        let available = sender.available_balance();
        match tx.type_of_transaction {
            TransactionKind::Coins => {
                let amount = tx.value.amount().ok_or(Error::InvalidAmount)?;
                let total = (1.0 + FEE_RATE) * amount;
                if total <= 0.0 {
                    return Err(Error::InvalidAmount);
                }
                if total > available {
                    return Err(Error::InsufficientFunds);
                }
            }
            TransactionKind::Message => {
                let text = tx.value.text().ok_or(Error::InvalidAmount)?;
                if text.chars().count() as f64 > available {
                    return Err(Error::InsufficientFunds);
                }
            }
            TransactionKind::Stake => {
                let amount = tx.value.amount().ok_or(Error::InvalidAmount)?;
                if amount <= 0.0 {
                    return Err(Error::InvalidAmount);
                }
                // Stake is bounded by the total balance, not the available
                // balance.
                if amount > sender.balance {
                    return Err(Error::InsufficientFunds);
                }
            }
        }

        Ok(())
    }

    /// Applies a validated transaction's economic effect to the roster and
    /// returns the fees it contributes to the pending validator credit.
    pub fn register_transaction(&mut self, tx: &Transaction) -> f64 {
        let fees = tx.fees(FEE_RATE);

        let sender = self
            .participant_by_key_mut(&tx.sender_address)
            .expect("transaction was validated against this roster");
        sender.nonce += 1;

        match tx.type_of_transaction {
            TransactionKind::Coins => {
                let amount = tx.value.amount().unwrap_or(0.0);
                sender.balance -= (1.0 + FEE_RATE) * amount;
                if let Some(receiver) = self.participant_by_key_mut(&tx.receiver_address) {
                    receiver.balance += amount;
                }
            }
            TransactionKind::Message => {
                let length = tx.value.text().map_or(0, |text| text.chars().count());
                sender.balance -= length as f64;
            }
            TransactionKind::Stake => {
                sender.stake += tx.value.amount().unwrap_or(0.0);
            }
        }

        fees
    }

    /// Validates an inbound sealed block against the chain tail and the pool
    /// that was current when its transactions were sealed.
    pub fn validate_block(&self, block: &Block, pool: &[u64]) -> Result<()> {
        if block.index != self.block_index {
            return Err(Error::InvalidBlockIndex {
                actual: block.index,
                expected: self.block_index,
            });
        }
        if block.previous_hash != self.last_block().hash {
            return Err(Error::InvalidPreviousHash);
        }
        if block.validator != election::elect(pool, &block.previous_hash) {
            return Err(Error::InvalidBlockValidator);
        }
        block.verify_hash()?;
        Ok(())
    }

    /// Folds every transaction in the chain into per-participant funds.
    ///
    /// Validator credits are applied for every block except the last one,
    /// whose accumulated fees are returned separately. Stakes declared at
    /// admission are not chain-derivable and start at zero here.
    pub fn project_state(&self) -> (BTreeMap<u64, ProjectedFunds>, f64) {
        let mut funds: BTreeMap<u64, ProjectedFunds> = self
            .nodes
            .iter()
            .map(|node| (node.id, ProjectedFunds::default()))
            .collect();
        let id_of: HashMap<&Address, u64> =
            self.nodes.iter().map(|node| (&node.key, node.id)).collect();

        let mut last_fees = 0.0;
        for (position, block) in self.chain.iter().enumerate() {
            let mut block_fees = 0.0;
            for tx in &block.transactions {
                let receiver = id_of.get(&tx.receiver_address).copied();

                if tx.sender_address.is_sentinel() {
                    // The genesis mint only credits its receiver.
                    if let Some(entry) = receiver.and_then(|id| funds.get_mut(&id)) {
                        entry.balance += tx.value.amount().unwrap_or(0.0);
                    }
                    continue;
                }

                let Some(sender) = id_of
                    .get(&tx.sender_address)
                    .and_then(|id| funds.get_mut(id))
                else {
                    continue;
                };
                sender.nonce += 1;
                match tx.type_of_transaction {
                    TransactionKind::Coins => {
                        let amount = tx.value.amount().unwrap_or(0.0);
                        sender.balance -= (1.0 + FEE_RATE) * amount;
                        if let Some(entry) = receiver.and_then(|id| funds.get_mut(&id)) {
                            entry.balance += amount;
                        }
                    }
                    TransactionKind::Message => {
                        let length = tx.value.text().map_or(0, |text| text.chars().count());
                        sender.balance -= length as f64;
                    }
                    TransactionKind::Stake => {
                        sender.stake += tx.value.amount().unwrap_or(0.0);
                    }
                }
                block_fees += tx.fees(FEE_RATE);
            }

            if position + 1 == self.chain.len() {
                last_fees = block_fees;
            } else if let Some(validator) = funds.get_mut(&block.validator) {
                validator.balance += block_fees;
            }
        }

        (funds, last_fees)
    }

    /// Walks the whole chain re-verifying indices, linkage and hashes.
    pub fn validate_full(&self) -> Result<()> {
        for (position, block) in self.chain.iter().enumerate() {
            if block.index != position as u64 {
                return Err(Error::InvalidBlockIndex {
                    actual: block.index,
                    expected: position as u64,
                });
            }
            block.verify_hash()?;
            if position > 0 && block.previous_hash != self.chain[position - 1].hash {
                return Err(Error::InvalidPreviousHash);
            }
        }
        Ok(())
    }
}
