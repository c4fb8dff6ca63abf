//! The peer node runtime: intake queues, worker threads, transaction and
//! block validation, registration and mining.
//!
//! Locking discipline: the chain lock guards the blockchain, the roster and
//! the past-pools FIFO; the balance lock guards the node's own funds mirror.
//! Whenever both are needed the chain lock is taken first. The balance lock
//! is always released before broadcasting.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::block::Block;
use crate::bootstrap::Admission;
use crate::chain::{Blockchain, Participant, FEE_RATE};
use crate::crypto::Address;
use crate::election;
use crate::error::{Error, Result};
use crate::network::Endpoint;
use crate::protocol::{Envelope, PONG};
use crate::transaction::{Transaction, TransactionKind, TransactionValue};
use crate::wallet::Wallet;

/// Depth of the transaction and block intake queues.
const INTAKE_DEPTH: usize = 128;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Total number of participants, the bootstrap included.
    pub nodes: usize,
    /// The number of transactions that seals a block.
    pub capacity: usize,
    /// The stake declared at admission.
    pub stake: f64,
    pub bootstrap_addr: SocketAddr,
    /// The address peers bind their own socket to, on an ephemeral port.
    pub listen_ip: std::net::IpAddr,
}

/// The node's own balance view, guarded by the balance lock.
///
/// Origination pre-debits it to reserve funds across concurrent sends; the
/// transaction worker only ever credits it for inbound receipts.
#[derive(Debug, Clone, Copy)]
pub struct LocalFunds {
    pub balance: f64,
    pub stake: f64,
    /// Count of transactions this node has originated.
    pub nonce: u64,
}

impl LocalFunds {
    pub fn available(&self) -> f64 {
        self.balance - self.stake
    }
}

/// Everything guarded by the chain lock.
pub(crate) struct ChainState {
    pub(crate) blockchain: Blockchain,
    /// One pool snapshot per sealed pending buffer, consumed in FIFO order
    /// as blocks are accepted.
    pub(crate) past_pools: VecDeque<Vec<u64>>,
}

pub(crate) struct Inner {
    pub(crate) id: u64,
    pub(crate) wallet: Wallet,
    pub(crate) endpoint: Endpoint,
    pub(crate) chain: Mutex<ChainState>,
    /// Signalled on transaction registration, pool snapshots and appends.
    pub(crate) chain_cond: Condvar,
    pub(crate) funds: Mutex<LocalFunds>,
    /// The pending-block buffer. Owned by the transaction worker apart from
    /// the admission snapshot taken while assembling `activate` envelopes.
    pub(crate) pending: Mutex<Vec<Transaction>>,
    pub(crate) history: Mutex<Vec<Transaction>>,
}

/// A constructed but not yet running node. `bootstrap::start` and
/// `bootstrap::join` produce one; `spawn` brings the worker threads up.
pub struct Node {
    inner: Arc<Inner>,
    color: String,
    admission: Option<Admission>,
}

impl Node {
    pub(crate) fn assemble(
        id: u64,
        color: String,
        wallet: Wallet,
        endpoint: Endpoint,
        blockchain: Blockchain,
        pending: Vec<Transaction>,
        funds: LocalFunds,
        admission: Option<Admission>,
    ) -> Node {
        Node {
            inner: Arc::new(Inner {
                id,
                wallet,
                endpoint,
                chain: Mutex::new(ChainState {
                    blockchain,
                    past_pools: VecDeque::new(),
                }),
                chain_cond: Condvar::new(),
                funds: Mutex::new(funds),
                pending: Mutex::new(pending),
                history: Mutex::new(Vec::new()),
            }),
            color,
            admission,
        }
    }

    /// Starts the receive loop and the two worker threads, plus the admission
    /// worker on the bootstrap, and returns the handle the front-end drives.
    pub fn spawn(self) -> NodeHandle {
        let (tx_send, tx_recv) = mpsc::sync_channel(INTAKE_DEPTH);
        let (block_send, block_recv) = mpsc::sync_channel(INTAKE_DEPTH);

        let admission_send = self.admission.map(|admission| {
            let (admission_send, admission_recv) = mpsc::sync_channel(INTAKE_DEPTH);
            let inner = Arc::clone(&self.inner);
            std::thread::spawn(move || admission_worker(inner, admission, admission_recv));
            admission_send
        });

        {
            let inner = Arc::clone(&self.inner);
            std::thread::spawn(move || transaction_worker(inner, tx_recv));
        }
        {
            let inner = Arc::clone(&self.inner);
            std::thread::spawn(move || block_worker(inner, block_recv));
        }
        {
            let inner = Arc::clone(&self.inner);
            std::thread::spawn(move || receive_loop(inner, admission_send, tx_send, block_send));
        }

        NodeHandle {
            inner: self.inner,
            color: self.color,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.endpoint.local_addr()
    }
}

/// The front-end's view of a running node. Cloneable across the CLI and
/// driver threads.
#[derive(Clone)]
pub struct NodeHandle {
    inner: Arc<Inner>,
    color: String,
}

impl NodeHandle {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.endpoint.local_addr()
    }

    pub fn funds(&self) -> LocalFunds {
        *self.inner.funds.lock().unwrap()
    }

    pub fn last_block(&self) -> Block {
        self.inner
            .chain
            .lock()
            .unwrap()
            .blockchain
            .last_block()
            .clone()
    }

    pub fn blockchain(&self) -> Blockchain {
        self.inner.chain.lock().unwrap().blockchain.clone()
    }

    pub fn roster(&self) -> Vec<Participant> {
        self.inner.chain.lock().unwrap().blockchain.nodes.clone()
    }

    /// Transactions this node has sent or received, in registration order.
    pub fn history(&self) -> Vec<Transaction> {
        self.inner.history.lock().unwrap().clone()
    }

    pub fn validate_chain(&self) -> Result<()> {
        self.inner.chain.lock().unwrap().blockchain.validate_full()
    }

    /// Builds, signs and broadcasts a transaction to the given participant.
    /// The sentinel receiver id `-1` is only legal for stake transactions.
    ///
    /// The cost is eagerly deducted from the local funds and the nonce is
    /// consumed exactly once per successful construction. Neither is rolled
    /// back if the network later rejects the transaction.
    pub fn execute_transaction(
        &self,
        receiver_id: i64,
        kind: TransactionKind,
        value: TransactionValue,
    ) -> Result<()> {
        let receiver_address = if receiver_id == -1 {
            if kind != TransactionKind::Stake {
                return Err(Error::UnknownReceiver);
            }
            Address::sentinel()
        } else {
            let receiver_id = u64::try_from(receiver_id).map_err(|_| Error::UnknownReceiver)?;
            let chain = self.inner.chain.lock().unwrap();
            chain
                .blockchain
                .participant(receiver_id)
                .ok_or(Error::UnknownReceiver)?
                .key
                .clone()
        };

        originate(&self.inner, receiver_address, kind, value)
    }

    /// Locks `amount` of the balance for validator election.
    pub fn set_stake(&self, amount: f64) -> Result<()> {
        log::info!("setting stake to {amount}");
        self.execute_transaction(-1, TransactionKind::Stake, TransactionValue::Amount(amount))
    }

    /// Waits until every transaction this node originated has registered in
    /// the local roster. Returns false on timeout.
    pub fn wait_settled(&self, timeout: Duration) -> bool {
        wait_settled(&self.inner, timeout)
    }
}

/// Prechecks, signs and broadcasts a transaction originated by this node.
pub(crate) fn originate(
    inner: &Inner,
    receiver_address: Address,
    kind: TransactionKind,
    value: TransactionValue,
) -> Result<()> {
    let nonce = {
        let mut funds = inner.funds.lock().unwrap();
        let available = funds.available();
        match kind {
            TransactionKind::Coins => {
                let amount = value.amount().ok_or(Error::InvalidAmount)?;
                let total = (1.0 + FEE_RATE) * amount;
                if total <= 0.0 {
                    return Err(Error::InvalidAmount);
                }
                if total > available {
                    return Err(Error::InsufficientFunds);
                }
                funds.balance -= total;
            }
            TransactionKind::Message => {
                let length = value.text().ok_or(Error::InvalidAmount)?.chars().count() as f64;
                if length > available {
                    return Err(Error::InsufficientFunds);
                }
                funds.balance -= length;
            }
            TransactionKind::Stake => {
                let amount = value.amount().ok_or(Error::InvalidAmount)?;
                if amount <= 0.0 {
                    return Err(Error::InvalidAmount);
                }
                if amount > funds.balance {
                    return Err(Error::InsufficientFunds);
                }
                funds.stake += amount;
            }
        }
        let nonce = funds.nonce;
        funds.nonce += 1;
        nonce
        // The balance lock drops here, before the broadcast.
    };

    let tx = Transaction::new(&inner.wallet, receiver_address, kind, value, nonce);
    log::info!("broadcasting transaction {} (nonce {nonce})", tx.uuid);

    let roster = { inner.chain.lock().unwrap().blockchain.nodes.clone() };
    inner
        .endpoint
        .broadcast(&Envelope::Transaction { transaction: tx }, &roster);
    Ok(())
}

/// Waits until the roster's record of this node has consumed every nonce the
/// node has originated.
pub(crate) fn wait_settled(inner: &Inner, timeout: Duration) -> bool {
    let originated = inner.funds.lock().unwrap().nonce;
    let chain = inner.chain.lock().unwrap();
    let (_chain, result) = inner
        .chain_cond
        .wait_timeout_while(chain, timeout, |state| {
            state
                .blockchain
                .participant(inner.id)
                .map_or(true, |node| node.nonce < originated)
        })
        .unwrap();
    !result.timed_out()
}

/// Classifies inbound datagrams and feeds the worker queues. Runs until the
/// socket or a queue is closed.
fn receive_loop(
    inner: Arc<Inner>,
    admission: Option<SyncSender<(Address, f64, SocketAddr)>>,
    tx_queue: SyncSender<Transaction>,
    block_queue: SyncSender<Block>,
) {
    loop {
        let (bytes, from) = match inner.endpoint.recv() {
            Ok(received) => received,
            Err(err) => {
                log::info!("receive loop stopping: {err}");
                return;
            }
        };

        let envelope = match Envelope::decode(&bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!("dropping malformed datagram from {from}: {err}");
                continue;
            }
        };

        match envelope {
            Envelope::Ping => match &admission {
                Some(_) => {
                    if let Err(err) = inner.endpoint.send_raw(PONG, from) {
                        log::warn!("failed to answer ping from {from}: {err}");
                    }
                }
                None => log::debug!("ignoring ping from {from}"),
            },
            Envelope::Key { key, stake } => match &admission {
                Some(admission) => {
                    if admission.send((key, stake, from)).is_err() {
                        return;
                    }
                }
                None => log::warn!("ignoring admission request from {from}"),
            },
            Envelope::Activate { .. } => {
                log::debug!("ignoring duplicate activation from {from}");
            }
            Envelope::Node { node } => {
                log::info!("roster gained node {} at {}:{}", node.id, node.address, node.port);
                inner
                    .chain
                    .lock()
                    .unwrap()
                    .blockchain
                    .register_participant(node);
            }
            Envelope::Transaction { transaction } => {
                if tx_queue.send(transaction).is_err() {
                    return;
                }
            }
            Envelope::Block { block } => {
                if block_queue.send(block).is_err() {
                    return;
                }
            }
        }
    }
}

/// Handles admission requests on the bootstrap, one at a time.
fn admission_worker(
    inner: Arc<Inner>,
    mut admission: Admission,
    queue: Receiver<(Address, f64, SocketAddr)>,
) {
    while let Ok((key, stake, from)) = queue.recv() {
        admission.admit(&inner, key, stake, from);
    }
}

/// Drains the transaction intake queue: validate, register, and seal a block
/// once the pending buffer reaches capacity.
fn transaction_worker(inner: Arc<Inner>, queue: Receiver<Transaction>) {
    // Fees accumulated for the currently pending block. A buffer seeded from
    // the activation snapshot brings its fees along.
    let mut pending_fees: f64 = {
        let pending = inner.pending.lock().unwrap();
        pending.iter().map(|tx| tx.fees(FEE_RATE)).sum()
    };

    while let Ok(tx) = queue.recv() {
        let mut chain = inner.chain.lock().unwrap();

        if let Err(err) = chain.blockchain.validate_transaction(&tx) {
            log::warn!("dropping transaction {}: {err}", tx.uuid);
            continue;
        }
        pending_fees += chain.blockchain.register_transaction(&tx);
        inner.chain_cond.notify_all();
        log::debug!("registered transaction {}", tx.uuid);

        let own_address = inner.wallet.address();
        if tx.sender_address == *own_address || tx.receiver_address == *own_address {
            inner.history.lock().unwrap().push(tx.clone());
        }
        // Credit inbound coins to the funds mirror. The debit side of a
        // transaction this node sent was already applied at origination.
        if tx.type_of_transaction == TransactionKind::Coins && tx.receiver_address == *own_address {
            inner.funds.lock().unwrap().balance += tx.value.amount().unwrap_or(0.0);
        }

        let sealed = {
            let mut pending = inner.pending.lock().unwrap();
            pending.push(tx);
            if pending.len() < chain.blockchain.capacity {
                None
            } else {
                let pool = election::stake_pool(&chain.blockchain.nodes);
                chain.past_pools.push_back(pool.clone());
                inner.chain_cond.notify_all();
                Some((pool, std::mem::take(&mut *pending)))
            }
        };
        let Some((pool, sealed)) = sealed else {
            continue;
        };

        // Mining: run the election over the snapshotted pool, seeded by the
        // tail hash.
        let seed = chain.blockchain.last_block().hash.clone();
        let index = chain.blockchain.block_index;
        let validator = election::elect(&pool, &seed);
        log::info!("node {validator} was elected validator for block {index}");

        if validator == inner.id {
            let block = Block::seal(index, inner.id, sealed, seed);
            inner.funds.lock().unwrap().balance += pending_fees;
            let roster = chain.blockchain.nodes.clone();
            drop(chain);
            log::info!("broadcasting sealed block {index}");
            inner
                .endpoint
                .broadcast(&Envelope::Block { block }, &roster);
        } else {
            drop(chain);
        }
        pending_fees = 0.0;

        // Mining barrier: hold off further registrations until the block
        // worker has accepted the block sealed from this buffer.
        let chain = inner.chain.lock().unwrap();
        let _chain = inner
            .chain_cond
            .wait_while(chain, |state| state.blockchain.block_index <= index)
            .unwrap();
    }
}

/// Drains the block intake queue: validate against the matching past pool,
/// append, credit the validator and re-derive balances from the chain.
fn block_worker(inner: Arc<Inner>, queue: Receiver<Block>) {
    while let Ok(block) = queue.recv() {
        let chain = inner.chain.lock().unwrap();

        // A block can outrun the local transaction intake. Its pool snapshot
        // is only taken once the local pending buffer fills, so wait for it.
        let mut chain = inner
            .chain_cond
            .wait_while(chain, |state| state.past_pools.is_empty())
            .unwrap();

        let pool = chain.past_pools.front().expect("waited for a pool");
        if let Err(err) = chain.blockchain.validate_block(&block, pool) {
            // The pool entry stays; it corresponds to the next accepted
            // block.
            log::warn!("dropping block {}: {err}", block.index);
            continue;
        }
        chain.past_pools.pop_front();

        let index = block.index;
        let validator = block.validator;
        chain.blockchain.append(block);

        // Re-derive balances from the chain, then apply the validator credit
        // for the block that just landed.
        let (projected, last_fees) = chain.blockchain.project_state();
        for node in &mut chain.blockchain.nodes {
            if let Some(funds) = projected.get(&node.id) {
                node.balance = funds.balance;
            }
        }
        if let Some(node) = chain.blockchain.participant_mut(validator) {
            node.balance += last_fees;
        }
        log::info!("appended block {index}, credited {last_fees} to validator {validator}");

        inner.chain_cond.notify_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bootstrap;
    use std::time::Instant;

    fn single_node_config() -> NodeConfig {
        NodeConfig {
            nodes: 1,
            capacity: 1,
            stake: 10.0,
            bootstrap_addr: "127.0.0.1:0".parse().unwrap(),
            listen_ip: "127.0.0.1".parse().unwrap(),
        }
    }

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn single_node_pipeline_test() {
        let node = bootstrap::start(&single_node_config(), Wallet::generate()).unwrap();
        let handle = node.spawn();

        assert_eq!(handle.id(), 0);
        assert_eq!(handle.funds().balance, 1000.0);
        assert_eq!(handle.last_block().index, 0);

        // Capacity is 1, so a single stake transaction seals a block.
        handle.set_stake(5.0).unwrap();

        assert!(wait_until(Duration::from_secs(30), || {
            handle.last_block().index == 1
        }));
        let roster = handle.roster();
        assert_eq!(roster[0].stake, 15.0);
        assert_eq!(roster[0].nonce, 2);
        assert!(handle.validate_chain().is_ok());

        let block = handle.last_block();
        assert_eq!(block.validator, 0);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(
            block.transactions[0].type_of_transaction,
            TransactionKind::Stake
        );
    }

    #[test]
    fn execute_transaction_prechecks_test() {
        let node = bootstrap::start(&single_node_config(), Wallet::generate()).unwrap();
        let handle = node.spawn();

        // Overspending is rejected locally without consuming the nonce.
        let result = handle.execute_transaction(
            0,
            TransactionKind::Coins,
            TransactionValue::Amount(5000.0),
        );
        assert!(matches!(result, Err(Error::InsufficientFunds)));
        assert_eq!(handle.funds().nonce, 1);
        assert_eq!(handle.funds().balance, 1000.0);

        // The sentinel receiver is only legal for stake transactions.
        let result = handle.execute_transaction(
            -1,
            TransactionKind::Coins,
            TransactionValue::Amount(1.0),
        );
        assert!(matches!(result, Err(Error::UnknownReceiver)));

        // Unknown receivers are rejected before any signing happens.
        let result = handle.execute_transaction(
            7,
            TransactionKind::Coins,
            TransactionValue::Amount(1.0),
        );
        assert!(matches!(result, Err(Error::UnknownReceiver)));

        // A non-positive stake is rejected.
        let result = handle.execute_transaction(
            -1,
            TransactionKind::Stake,
            TransactionValue::Amount(0.0),
        );
        assert!(matches!(result, Err(Error::InvalidAmount)));
    }

    #[test]
    fn eager_debit_reserves_funds_test() {
        let mut config = single_node_config();
        config.capacity = 50;
        let node = bootstrap::start(&config, Wallet::generate()).unwrap();
        let handle = node.spawn();

        // Available is 1000 - 10. The first message reserves 600 of it
        // eagerly, which leaves too little for the second regardless of how
        // far the broadcast has travelled.
        handle
            .execute_transaction(
                0,
                TransactionKind::Message,
                TransactionValue::Text("x".repeat(600)),
            )
            .unwrap();
        let result = handle.execute_transaction(
            0,
            TransactionKind::Message,
            TransactionValue::Text("x".repeat(600)),
        );
        assert!(matches!(result, Err(Error::InsufficientFunds)));
        assert_eq!(handle.funds().nonce, 2);
    }
}
