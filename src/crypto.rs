//! The definition of all cryptographic primitives used in BlockChat.

use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::sha2::{Digest, Sha256};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const KEY_SIZE: usize = 2048;

/// The PEM serialization of a participant's public key. This is the canonical
/// participant address that travels on the wire, both as a roster entry and as
/// the sender/receiver of a transaction.
///
/// The literal `"0"` is a sentinel: as a receiver it marks a transaction with
/// no recipient (stake), as a sender it marks the genesis mint.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

const SENTINEL: &str = "0";

impl Address {
    pub fn sentinel() -> Address {
        Address(SENTINEL.to_owned())
    }

    pub fn is_sentinel(&self) -> bool {
        self.0 == SENTINEL
    }

    pub fn from_public_key(public_key: &PublicKey) -> Address {
        let pem = public_key
            .0
            .to_public_key_pem(LineEnding::LF)
            .expect("RSA public keys always serialize to PEM");
        Address(pem)
    }

    /// Recovers the public key this address serializes. Fails on the sentinel
    /// and on addresses that do not hold a PEM document.
    pub fn to_public_key(&self) -> Result<PublicKey> {
        Ok(PublicKey(RsaPublicKey::from_public_key_pem(&self.0)?))
    }

    /// A short stable slice of the key material, for log lines.
    pub fn fingerprint(&self) -> &str {
        self.0.get(100..112).unwrap_or(&self.0)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Verifies an RSA-PSS signature over `data`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        let verifying_key = VerifyingKey::<Sha256>::new(self.0.clone());
        let signature = Signature::try_from(signature)?;
        verifying_key.verify(data, &signature)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl PrivateKey {
    /// Produces a detached RSA-PSS signature over `data` with MGF1-SHA-256.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::<Sha256>::new(self.0.clone());
        signing_key
            .sign_with_rng(&mut rand::thread_rng(), data)
            .to_vec()
    }
}

pub fn generate_keypair() -> (PrivateKey, PublicKey) {
    let mut rng = rand::thread_rng();

    let private_key = RsaPrivateKey::new(&mut rng, KEY_SIZE).expect("failed to generate a key");
    let public_key = RsaPublicKey::from(&private_key);

    (PrivateKey(private_key), PublicKey(public_key))
}

/// The lowercase hex SHA-256 digest used for transaction and block hashes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sign_verify_test() {
        let (private_key, public_key) = generate_keypair();
        let (_, other_public_key) = generate_keypair();
        let data = b"Hello World!";
        let signature = private_key.sign(data);

        assert!(public_key.verify(data, &signature).is_ok());
        assert!(public_key.verify(b"Hello World?", &signature).is_err());
        assert!(other_public_key.verify(data, &signature).is_err());
    }

    #[test]
    fn address_round_trip_test() {
        let (_, public_key) = generate_keypair();
        let address = Address::from_public_key(&public_key);

        assert!(address.0.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(address.to_public_key().unwrap(), public_key);
    }

    #[test]
    fn sentinel_test() {
        let address = Address::sentinel();

        assert!(address.is_sentinel());
        assert!(address.to_public_key().is_err());
        assert_eq!(address.fingerprint(), "0");
    }

    #[test]
    fn sha256_hex_test() {
        let digest = sha256_hex(b"blockchat");

        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, sha256_hex(b"blockchat"));
        assert_ne!(digest, sha256_hex(b"blockchat!"));
    }
}
