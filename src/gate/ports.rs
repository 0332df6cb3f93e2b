//! Capabilities the auth gate drives but does not own.

use crate::models::VerifyRequest;
use crate::storage::IssuedNonce;
use alloy_primitives::Address;

/// A connected wallet account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub address: Address,
    pub chain_id: u64,
}

/// Connection status as reported by the wallet connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalletStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected(Account),
}

impl WalletStatus {
    pub fn account(&self) -> Option<Account> {
        match self {
            WalletStatus::Connected(account) => Some(*account),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, WalletStatus::Connected(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("Request rejected by user")]
    Rejected,

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Non-2xx response; `reason` is the plain-text body.
    #[error("{reason}")]
    Rejected { status: u16, reason: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Wallet connection, chain switching and message signing.
#[async_trait::async_trait]
pub trait WalletConnector: Send + Sync {
    /// Connect through `connector_id`, asking for `chain_id`. Wallets may
    /// ignore the chain hint; the returned account carries the actual chain.
    async fn connect(&self, connector_id: &str, chain_id: u64) -> Result<Account, WalletError>;

    /// Returns the chain the wallet is on afterwards.
    async fn switch_chain(&self, chain_id: u64) -> Result<u64, WalletError>;

    /// Personal-message signature, hex encoded.
    async fn sign_message(&self, address: Address, message: &str) -> Result<String, WalletError>;

    async fn disconnect(&self);
}

/// The nonce and verify endpoints.
#[async_trait::async_trait]
pub trait AuthApi: Send + Sync {
    async fn fetch_nonce(&self) -> Result<IssuedNonce, ApiError>;

    /// Returns the session token.
    async fn verify(&self, request: &VerifyRequest) -> Result<String, ApiError>;
}
