//! A software wallet holding one secp256k1 key.

use crate::auth::verify::address_of;
use crate::gate::ports::{Account, WalletConnector, WalletError};
use alloy_primitives::{eip191_hash_message, Address};
use k256::ecdsa::SigningKey;
use std::sync::atomic::{AtomicU64, Ordering};
use zeroize::Zeroizing;

pub struct LocalKeyWallet {
    key: SigningKey,
    address: Address,
    chain_id: AtomicU64,
}

impl LocalKeyWallet {
    /// Wallet for a raw 32-byte private key, starting on `chain_id`.
    pub fn from_bytes(bytes: &[u8], chain_id: u64) -> Result<Self, WalletError> {
        let key = SigningKey::from_slice(bytes)
            .map_err(|_| WalletError::Failed("Invalid private key".to_string()))?;
        let address = address_of(key.verifying_key());
        Ok(Self {
            key,
            address,
            chain_id: AtomicU64::new(chain_id),
        })
    }

    /// Wallet for a hex private key, `0x` prefix optional.
    pub fn from_hex(text: &str, chain_id: u64) -> Result<Self, WalletError> {
        let text = text.trim();
        let digits = text.strip_prefix("0x").unwrap_or(text);
        let bytes = Zeroizing::new(
            hex::decode(digits)
                .map_err(|_| WalletError::Failed("Private key is not valid hex".to_string()))?,
        );
        Self::from_bytes(&bytes, chain_id)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id.load(Ordering::SeqCst)
    }

    /// EIP-191 personal-message signature: `0x` + hex(r || s || v), v in {27, 28}.
    pub fn sign_personal(&self, message: &str) -> Result<String, WalletError> {
        let prehash = eip191_hash_message(message);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(prehash.as_slice())
            .map_err(|e| WalletError::Failed(format!("Signing failed: {}", e)))?;

        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

impl std::fmt::Debug for LocalKeyWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyWallet")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl WalletConnector for LocalKeyWallet {
    /// Always available; stays on its current chain regardless of the hint.
    async fn connect(&self, _connector_id: &str, _chain_id: u64) -> Result<Account, WalletError> {
        Ok(Account {
            address: self.address,
            chain_id: self.chain_id(),
        })
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<u64, WalletError> {
        self.chain_id.store(chain_id, Ordering::SeqCst);
        Ok(chain_id)
    }

    async fn sign_message(&self, address: Address, message: &str) -> Result<String, WalletError> {
        if address != self.address {
            return Err(WalletError::Failed(format!("Unknown account {}", address)));
        }
        self.sign_personal(message)
    }

    async fn disconnect(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::verify::{recover_address, verify_signature};

    // First anvil/hardhat development account.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn test_address_from_hex_key() {
        let wallet = LocalKeyWallet::from_hex(DEV_KEY, 1).unwrap();
        assert_eq!(wallet.address().to_string(), DEV_ADDRESS);
    }

    #[test]
    fn test_signature_recovers_to_wallet() {
        let wallet = LocalKeyWallet::from_hex(DEV_KEY, 1).unwrap();
        let signature = wallet.sign_personal("hello").unwrap();

        assert_eq!(signature.len(), 132);
        assert!(signature.ends_with("1b") || signature.ends_with("1c"));
        assert_eq!(recover_address("hello", &signature).unwrap(), wallet.address());
        assert!(verify_signature(DEV_ADDRESS, "hello", &signature).is_ok());
        assert!(verify_signature(DEV_ADDRESS, "hello!", &signature).is_err());
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(LocalKeyWallet::from_hex("0xzz", 1).is_err());
        assert!(LocalKeyWallet::from_bytes(&[0u8; 32], 1).is_err());
        assert!(LocalKeyWallet::from_bytes(&[1u8; 16], 1).is_err());
    }

    #[tokio::test]
    async fn test_switch_chain_and_foreign_account() {
        let wallet = LocalKeyWallet::from_bytes(&[5u8; 32], 1).unwrap();
        assert_eq!(wallet.connect("local", 10143).await.unwrap().chain_id, 1);

        assert_eq!(wallet.switch_chain(10143).await.unwrap(), 10143);
        assert_eq!(wallet.connect("local", 10143).await.unwrap().chain_id, 10143);

        let err = wallet
            .sign_message(Address::repeat_byte(9), "msg")
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Failed(_)));
    }
}
