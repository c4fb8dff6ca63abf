use crate::crypto::{self, Address, PrivateKey, PublicKey};

/// The keypair of a participant. Balances and nonces live in the chain roster
/// and in the node's local funds mirror, not here.
#[derive(Debug, Clone)]
pub struct Wallet {
    private_key: PrivateKey,
    pub public_key: PublicKey,
    address: Address,
}

impl Wallet {
    pub fn generate() -> Wallet {
        let (private_key, public_key) = crypto::generate_keypair();
        let address = Address::from_public_key(&public_key);
        Wallet {
            private_key,
            public_key,
            address,
        }
    }

    /// The canonical PEM serialization of the public key.
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.private_key.sign(data)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wallet_address_matches_key_test() {
        let wallet = Wallet::generate();

        assert_eq!(
            *wallet.address(),
            Address::from_public_key(&wallet.public_key)
        );
    }

    #[test]
    fn wallet_sign_test() {
        let wallet = Wallet::generate();
        let signature = wallet.sign(b"a message");

        assert!(wallet.public_key.verify(b"a message", &signature).is_ok());
    }
}
