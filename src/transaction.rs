//! Transactions and their canonical encoding.
//!
//! Signature and hash compatibility depend on every participant producing the
//! same bytes for the same transaction, so the signed and hashed bodies are
//! serialized through dedicated view structs whose field order is fixed at the
//! type level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use uuid::Uuid;

use crate::crypto::{self, Address};
use crate::error::{Error, Result};
use crate::wallet::Wallet;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Coins,
    Message,
    Stake,
}

/// The payload of a transaction: an amount for `coins`/`stake`, text for
/// `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionValue {
    Amount(f64),
    Text(String),
}

impl TransactionValue {
    pub fn amount(&self) -> Option<f64> {
        match self {
            TransactionValue::Amount(amount) => Some(*amount),
            TransactionValue::Text(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            TransactionValue::Amount(_) => None,
            TransactionValue::Text(text) => Some(text),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub uuid: Uuid,
    pub sender_address: Address,
    pub receiver_address: Address,
    pub timestamp: DateTime<Utc>,
    pub type_of_transaction: TransactionKind,
    pub value: TransactionValue,
    pub nonce: u64,
    /// Signature over the canonical encoding of all preceding fields. Empty
    /// for the genesis mint, which no one validates.
    #[serde_as(as = "Base64")]
    pub signature: Vec<u8>,
    /// Digest over all preceding fields including the signature.
    pub hash: String,
}

/// The signed body: every field up to and excluding the signature, in wire
/// order.
#[derive(Serialize)]
struct SigningView<'a> {
    uuid: &'a Uuid,
    sender_address: &'a Address,
    receiver_address: &'a Address,
    timestamp: &'a DateTime<Utc>,
    type_of_transaction: &'a TransactionKind,
    value: &'a TransactionValue,
    nonce: u64,
}

/// The hashed body: the signed body plus the signature in its wire form.
#[serde_as]
#[derive(Serialize)]
struct HashingView<'a> {
    uuid: &'a Uuid,
    sender_address: &'a Address,
    receiver_address: &'a Address,
    timestamp: &'a DateTime<Utc>,
    type_of_transaction: &'a TransactionKind,
    value: &'a TransactionValue,
    nonce: u64,
    #[serde_as(as = "Base64")]
    signature: &'a [u8],
}

impl Transaction {
    /// Constructs, signs and hashes a transaction originated by `wallet`.
    pub fn new(
        wallet: &Wallet,
        receiver_address: Address,
        type_of_transaction: TransactionKind,
        value: TransactionValue,
        nonce: u64,
    ) -> Transaction {
        let uuid = Uuid::new_v4();
        let timestamp = Utc::now();
        let body = SigningView {
            uuid: &uuid,
            sender_address: wallet.address(),
            receiver_address: &receiver_address,
            timestamp: &timestamp,
            type_of_transaction: &type_of_transaction,
            value: &value,
            nonce,
        };
        let signature =
            wallet.sign(&serde_json::to_vec(&body).expect("transaction bodies are serializable"));

        let mut tx = Transaction {
            uuid,
            sender_address: wallet.address().clone(),
            receiver_address,
            timestamp,
            type_of_transaction,
            value,
            nonce,
            signature,
            hash: String::new(),
        };
        tx.hash = tx.compute_hash();
        tx
    }

    /// The unsigned genesis mint from the sentinel sender.
    pub fn mint(receiver_address: Address, amount: f64, nonce: u64) -> Transaction {
        let mut tx = Transaction {
            uuid: Uuid::new_v4(),
            sender_address: Address::sentinel(),
            receiver_address,
            timestamp: Utc::now(),
            type_of_transaction: TransactionKind::Coins,
            value: TransactionValue::Amount(amount),
            nonce,
            signature: vec![],
            hash: String::new(),
        };
        tx.hash = tx.compute_hash();
        tx
    }

    fn signing_bytes(&self) -> Vec<u8> {
        let body = SigningView {
            uuid: &self.uuid,
            sender_address: &self.sender_address,
            receiver_address: &self.receiver_address,
            timestamp: &self.timestamp,
            type_of_transaction: &self.type_of_transaction,
            value: &self.value,
            nonce: self.nonce,
        };
        serde_json::to_vec(&body).expect("transaction bodies are serializable")
    }

    fn hashing_bytes(&self) -> Vec<u8> {
        let body = HashingView {
            uuid: &self.uuid,
            sender_address: &self.sender_address,
            receiver_address: &self.receiver_address,
            timestamp: &self.timestamp,
            type_of_transaction: &self.type_of_transaction,
            value: &self.value,
            nonce: self.nonce,
            signature: &self.signature,
        };
        serde_json::to_vec(&body).expect("transaction bodies are serializable")
    }

    pub fn compute_hash(&self) -> String {
        crypto::sha256_hex(&self.hashing_bytes())
    }

    /// Verifies the signature against the sender address.
    pub fn verify_signature(&self) -> Result<()> {
        let public_key = self.sender_address.to_public_key()?;
        public_key.verify(&self.signing_bytes(), &self.signature)
    }

    /// Verifies that the carried hash matches the transaction contents.
    pub fn verify_hash(&self) -> Result<()> {
        if self.hash != self.compute_hash() {
            return Err(Error::InvalidTransactionHash);
        }
        Ok(())
    }

    /// The fees this transaction pays into the next validator credit.
    pub fn fees(&self, fee_rate: f64) -> f64 {
        match self.type_of_transaction {
            // The genesis mint is fee-less.
            TransactionKind::Coins if self.sender_address.is_sentinel() => 0.0,
            TransactionKind::Coins => fee_rate * self.value.amount().unwrap_or(0.0),
            TransactionKind::Message => match &self.value {
                TransactionValue::Text(text) => text.chars().count() as f64,
                TransactionValue::Amount(_) => 0.0,
            },
            TransactionKind::Stake => 0.0,
        }
    }

    /// The full amount the sender pays: fees plus any transferred value.
    pub fn cost(&self, fee_rate: f64) -> f64 {
        let value = match self.type_of_transaction {
            TransactionKind::Coins => self.value.amount().unwrap_or(0.0),
            TransactionKind::Message | TransactionKind::Stake => 0.0,
        };
        self.fees(fee_rate) + value
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chain::FEE_RATE;

    #[test]
    fn canonical_field_order_test() {
        let wallet = Wallet::generate();
        let tx = Transaction::new(
            &wallet,
            Address::sentinel(),
            TransactionKind::Stake,
            TransactionValue::Amount(5.0),
            0,
        );

        let encoded = serde_json::to_string(&tx).unwrap();
        let keys = [
            "\"uuid\"",
            "\"sender_address\"",
            "\"receiver_address\"",
            "\"timestamp\"",
            "\"type_of_transaction\"",
            "\"value\"",
            "\"nonce\"",
            "\"signature\"",
            "\"hash\"",
        ];
        let positions: Vec<usize> = keys.iter().map(|k| encoded.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn round_trip_test() {
        let wallet = Wallet::generate();
        let other = Wallet::generate();
        let tx = Transaction::new(
            &wallet,
            other.address().clone(),
            TransactionKind::Coins,
            TransactionValue::Amount(42.0),
            3,
        );

        let decoded: Transaction =
            serde_json::from_slice(&serde_json::to_vec(&tx).unwrap()).unwrap();
        assert_eq!(decoded, tx);
        assert!(decoded.verify_signature().is_ok());
        assert!(decoded.verify_hash().is_ok());
    }

    #[test]
    fn message_value_round_trip_test() {
        let wallet = Wallet::generate();
        let other = Wallet::generate();
        let tx = Transaction::new(
            &wallet,
            other.address().clone(),
            TransactionKind::Message,
            TransactionValue::Text("hello".to_owned()),
            0,
        );

        let decoded: Transaction =
            serde_json::from_slice(&serde_json::to_vec(&tx).unwrap()).unwrap();
        assert_eq!(decoded.value.text(), Some("hello"));
        assert!(decoded.verify_signature().is_ok());
    }

    #[test]
    fn tampered_value_fails_verification_test() {
        let wallet = Wallet::generate();
        let other = Wallet::generate();
        let mut tx = Transaction::new(
            &wallet,
            other.address().clone(),
            TransactionKind::Coins,
            TransactionValue::Amount(10.0),
            0,
        );

        tx.value = TransactionValue::Amount(1000.0);
        assert!(tx.verify_signature().is_err());
        assert!(tx.verify_hash().is_err());
    }

    #[test]
    fn tampered_receiver_fails_verification_test() {
        let wallet = Wallet::generate();
        let other = Wallet::generate();
        let mut tx = Transaction::new(
            &wallet,
            other.address().clone(),
            TransactionKind::Coins,
            TransactionValue::Amount(10.0),
            0,
        );

        tx.receiver_address = wallet.address().clone();
        assert!(tx.verify_signature().is_err());
    }

    #[test]
    fn fees_test() {
        let wallet = Wallet::generate();
        let other = Wallet::generate();

        let coins = Transaction::new(
            &wallet,
            other.address().clone(),
            TransactionKind::Coins,
            TransactionValue::Amount(100.0),
            0,
        );
        assert!((coins.fees(FEE_RATE) - 3.0).abs() < 1e-9);
        assert!((coins.cost(FEE_RATE) - 103.0).abs() < 1e-9);

        let message = Transaction::new(
            &wallet,
            other.address().clone(),
            TransactionKind::Message,
            TransactionValue::Text("four".to_owned()),
            1,
        );
        assert!((message.fees(FEE_RATE) - 4.0).abs() < 1e-9);
        assert!((message.cost(FEE_RATE) - 4.0).abs() < 1e-9);

        let stake = Transaction::new(
            &wallet,
            Address::sentinel(),
            TransactionKind::Stake,
            TransactionValue::Amount(50.0),
            2,
        );
        assert_eq!(stake.fees(FEE_RATE), 0.0);
        assert_eq!(stake.cost(FEE_RATE), 0.0);
    }

    #[test]
    fn mint_is_fee_less_test() {
        let wallet = Wallet::generate();
        let mint = Transaction::mint(wallet.address().clone(), 3000.0, 0);

        assert!(mint.sender_address.is_sentinel());
        assert!(mint.signature.is_empty());
        assert_eq!(mint.fees(FEE_RATE), 0.0);
        assert!(mint.verify_hash().is_ok());
    }
}
