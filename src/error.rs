use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to validate signature")]
    InvalidSignature(#[from] rsa::signature::Error),
    #[error("address does not contain a valid public key")]
    MalformedAddress(#[from] rsa::pkcs8::spki::Error),
    #[error("the wallet does not have sufficient funds")]
    InsufficientFunds,
    #[error("invalid transaction amount")]
    InvalidAmount,
    #[error("expected nonce {expected} but the transaction carries {actual}")]
    InvalidNonce { actual: u64, expected: u64 },
    #[error("transaction sender is not a member of the roster")]
    UnknownSender,
    #[error("transaction receiver is not a member of the roster")]
    UnknownReceiver,
    #[error("transaction hash does not match its contents")]
    InvalidTransactionHash,
    #[error("block hash does not match its contents")]
    InvalidBlockHash,
    #[error("block index {actual} does not extend the chain at {expected}")]
    InvalidBlockIndex { actual: u64, expected: u64 },
    #[error("block extends an unexpected previous hash")]
    InvalidPreviousHash,
    #[error("block validator does not match the election result")]
    InvalidBlockValidator,
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
