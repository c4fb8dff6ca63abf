//! The bootstrap role: genesis, admission, identity assignment and the
//! initial coin distribution.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::block::{Block, GENESIS_PREVIOUS_HASH};
use crate::chain::{Blockchain, Participant};
use crate::crypto::Address;
use crate::error::Result;
use crate::network::Endpoint;
use crate::node::{self, Inner, LocalFunds, Node, NodeConfig};
use crate::protocol::Envelope;
use crate::transaction::{Transaction, TransactionKind, TransactionValue};
use crate::wallet::Wallet;

/// Coins minted at genesis per expected participant, and granted to each peer
/// at admission.
const COINS_PER_NODE: f64 = 1000.0;

/// ANSI palette dealt out with each activation. The bootstrap keeps the first
/// entry for itself; peers cycle through the rest.
const COLORS: [&str; 6] = [
    "\x1b[31m", "\x1b[32m", "\x1b[33m", "\x1b[34m", "\x1b[35m", "\x1b[36m",
];

const ADMISSION_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates the genesis block and brings up the bootstrap node with admission
/// open.
pub fn start(config: &NodeConfig, wallet: Wallet) -> Result<Node> {
    let endpoint = Endpoint::bind(config.bootstrap_addr, config.capacity)?;
    let local_addr = endpoint.local_addr()?;

    let mint_value = COINS_PER_NODE * config.nodes as f64;
    let mint = Transaction::mint(wallet.address().clone(), mint_value, 0);
    let genesis = Block::seal(0, 0, vec![mint], GENESIS_PREVIOUS_HASH.to_owned());

    let mut blockchain = Blockchain::new(config.capacity);
    blockchain.append(genesis);
    blockchain.register_participant(Participant {
        id: 0,
        address: local_addr.ip().to_string(),
        port: local_addr.port(),
        key: wallet.address().clone(),
        balance: mint_value,
        stake: config.stake,
        // The genesis mint consumed nonce 0.
        nonce: 1,
    });
    log::info!("genesis block created, minted {mint_value} to the bootstrap");

    let funds = LocalFunds {
        balance: mint_value,
        stake: config.stake,
        nonce: 1,
    };
    Ok(Node::assemble(
        0,
        COLORS[0].to_owned(),
        wallet,
        endpoint,
        blockchain,
        vec![],
        funds,
        Some(Admission::new(config.nodes)),
    ))
}

/// Runs the admission handshake against the bootstrap and returns the
/// activated peer node.
pub fn join(config: &NodeConfig, wallet: Wallet) -> Result<Node> {
    let endpoint = Endpoint::bind((config.listen_ip, 0), config.capacity)?;
    endpoint.ping_bootstrap(config.bootstrap_addr)?;

    endpoint.send(
        &Envelope::Key {
            key: wallet.address().clone(),
            stake: config.stake,
        },
        config.bootstrap_addr,
    )?;
    log::info!("sent key to the bootstrap, awaiting activation");

    loop {
        let (bytes, from) = endpoint.recv()?;
        let envelope = match Envelope::decode(&bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!("dropping malformed datagram from {from}: {err}");
                continue;
            }
        };
        match envelope {
            Envelope::Activate {
                id,
                color,
                blockchain,
                current_block,
            } if from == config.bootstrap_addr => {
                log::info!(
                    "activated as node {id} with a chain of {} blocks",
                    blockchain.chain.len()
                );
                let funds = LocalFunds {
                    balance: 0.0,
                    stake: config.stake,
                    nonce: 0,
                };
                return Ok(Node::assemble(
                    id,
                    color,
                    wallet,
                    endpoint,
                    blockchain,
                    current_block,
                    funds,
                    None,
                ));
            }
            _ => log::debug!("ignoring pre-activation datagram from {from}"),
        }
    }
}

/// Admission state held by the bootstrap's admission worker.
pub(crate) struct Admission {
    /// The roster size at which admission closes.
    total: usize,
    next_id: u64,
}

impl Admission {
    fn new(total: usize) -> Admission {
        Admission { total, next_id: 1 }
    }

    /// Admits one peer: assign the next id, extend the roster, announce the
    /// record to earlier peers, activate the newcomer and grant its initial
    /// coins.
    pub(crate) fn admit(&mut self, inner: &Arc<Inner>, key: Address, stake: f64, from: SocketAddr) {
        let (participant, prior, snapshot, current_block) = {
            let mut chain = inner.chain.lock().unwrap();
            if chain.blockchain.nodes.len() >= self.total {
                log::warn!("admission closed, dropping key from {from}");
                return;
            }
            if chain.blockchain.participant_by_key(&key).is_some() {
                log::warn!("dropping duplicate admission request from {from}");
                return;
            }

            let id = self.next_id;
            self.next_id += 1;
            let participant = Participant {
                id,
                address: from.ip().to_string(),
                port: from.port(),
                key: key.clone(),
                balance: 0.0,
                stake,
                nonce: 0,
            };
            let prior: Vec<Participant> = chain
                .blockchain
                .nodes
                .iter()
                .filter(|node| node.id != 0)
                .cloned()
                .collect();
            chain.blockchain.register_participant(participant.clone());

            let snapshot = chain.blockchain.clone();
            let current_block = inner.pending.lock().unwrap().clone();
            (participant, prior, snapshot, current_block)
        };
        log::info!(
            "admitted node {} at {from} (key {})",
            participant.id,
            key.fingerprint()
        );

        inner.endpoint.broadcast(
            &Envelope::Node {
                node: participant.clone(),
            },
            &prior,
        );

        let color = COLORS[1 + (participant.id as usize - 1) % (COLORS.len() - 1)].to_owned();
        let activate = Envelope::Activate {
            id: participant.id,
            color,
            blockchain: snapshot,
            current_block,
        };
        if let Err(err) = inner.endpoint.send(&activate, from) {
            log::warn!("failed to activate node {}: {err}", participant.id);
        }

        // Grant the admission coins, then wait for the grant to register
        // locally so that the next admission snapshot carries it.
        match node::originate(
            inner,
            key,
            TransactionKind::Coins,
            TransactionValue::Amount(COINS_PER_NODE),
        ) {
            Ok(()) => {
                if !node::wait_settled(inner, ADMISSION_SETTLE_TIMEOUT) {
                    log::warn!(
                        "timed out waiting for node {}'s admission grant to settle",
                        participant.id
                    );
                }
            }
            Err(err) => log::error!("failed to fund node {}: {err}", participant.id),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn genesis_block_test() {
        let config = NodeConfig {
            nodes: 3,
            capacity: 5,
            stake: 10.0,
            bootstrap_addr: "127.0.0.1:0".parse().unwrap(),
            listen_ip: "127.0.0.1".parse().unwrap(),
        };
        let handle = start(&config, Wallet::generate()).unwrap().spawn();

        assert_eq!(handle.funds().balance, 3000.0);
        assert_eq!(handle.funds().stake, 10.0);

        let genesis = handle.last_block();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.validator, 0);
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(genesis.transactions.len(), 1);
        let mint = &genesis.transactions[0];
        assert!(mint.sender_address.is_sentinel());
        assert_eq!(mint.value.amount(), Some(3000.0));
        assert_eq!(mint.type_of_transaction, TransactionKind::Coins);

        let roster = handle.roster();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, 0);
        assert_eq!(roster[0].balance, 3000.0);
        assert_eq!(roster[0].nonce, 1);

        assert!(handle.validate_chain().is_ok());
    }
}
