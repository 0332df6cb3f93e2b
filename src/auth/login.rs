//! Server-side verification of a signed sign-in challenge.
//!
//! Every step is a hard gate and the first failure ends the request:
//! 1. all fields present
//! 2. signature recovers to the claimed address
//! 3. nonce present in the message
//! 4. nonce consumed from the store
//! 5. chain id matches
//! 6. domain matches
//!
//! The nonce is only burned once the signer is confirmed. Chain and domain are
//! checked after consumption, so a request that fails them has still used up
//! its nonce and the client must start over from issuance.

use crate::auth::message::{extract_chain_id, extract_domain, extract_nonce};
use crate::auth::session::generate_session_token;
use crate::auth::verify::{verify_signature, VerifyError};
use crate::error::AppError;
use crate::models::VerifyRequest;
use crate::storage::{ConsumeError, NonceError, NonceStore, StoreError};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("Missing fields")]
    MissingFields,

    #[error("Recover failed: {0}")]
    Recovery(String),

    #[error("Address mismatch")]
    AddressMismatch,

    #[error("Nonce not found")]
    NonceMissing,

    #[error(transparent)]
    Nonce(#[from] NonceError),

    #[error("Invalid chainId")]
    ChainMismatch,

    #[error("Invalid domain")]
    DomainMismatch,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<VerifyError> for LoginError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Recovery(reason) => LoginError::Recovery(reason),
            VerifyError::Mismatch { .. } => LoginError::AddressMismatch,
        }
    }
}

impl From<ConsumeError> for LoginError {
    fn from(err: ConsumeError) -> Self {
        match err {
            ConsumeError::Nonce(e) => LoginError::Nonce(e),
            ConsumeError::Store(e) => LoginError::Store(e),
        }
    }
}

impl From<LoginError> for AppError {
    fn from(err: LoginError) -> Self {
        match err {
            LoginError::AddressMismatch => AppError::Unauthorized(err.to_string()),
            LoginError::Store(e) => AppError::Internal(e.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

/// Verifies signed challenges against one expected chain and domain.
#[derive(Clone)]
pub struct LoginVerifier {
    nonces: Arc<dyn NonceStore>,
    expected_chain_id: u64,
    expected_domain: String,
}

impl LoginVerifier {
    pub fn new(
        nonces: Arc<dyn NonceStore>,
        expected_chain_id: u64,
        expected_domain: impl Into<String>,
    ) -> Self {
        Self {
            nonces,
            expected_chain_id,
            expected_domain: expected_domain.into(),
        }
    }

    pub fn nonces(&self) -> &Arc<dyn NonceStore> {
        &self.nonces
    }

    /// Run the full check and mint a session token on success.
    pub async fn verify(&self, req: &VerifyRequest) -> Result<String, LoginError> {
        let (address, message, signature) = match (&req.address, &req.message, &req.signature) {
            (Some(a), Some(m), Some(s)) if !a.is_empty() && !m.is_empty() && !s.is_empty() => {
                (a.as_str(), m.as_str(), s.as_str())
            }
            _ => return Err(LoginError::MissingFields),
        };

        let signer = verify_signature(address, message, signature).inspect_err(|e| {
            tracing::warn!(action = "auth_failed", address = %address, error = %e, "Signature check failed");
        })?;

        let nonce = extract_nonce(message).ok_or(LoginError::NonceMissing)?;

        self.nonces.consume(nonce).await.inspect_err(|e| {
            tracing::warn!(action = "auth_failed", address = %signer, error = %e, "Nonce rejected");
        })?;

        if extract_chain_id(message) != Some(self.expected_chain_id) {
            tracing::warn!(action = "auth_failed", address = %signer, "Chain id mismatch");
            return Err(LoginError::ChainMismatch);
        }

        if extract_domain(message) != Some(self.expected_domain.as_str()) {
            tracing::warn!(action = "auth_failed", address = %signer, "Domain mismatch");
            return Err(LoginError::DomainMismatch);
        }

        let token = generate_session_token();
        tracing::info!(action = "auth_success", address = %signer, "Wallet authenticated");

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::message::SiweMessage;
    use crate::client::LocalKeyWallet;
    use crate::storage::InMemoryNonceStore;
    use std::time::Duration;

    const CHAIN_ID: u64 = 10143;
    const DOMAIN: &str = "localhost:5173";
    const TTL: Duration = Duration::from_secs(300);

    fn setup() -> (Arc<InMemoryNonceStore>, LoginVerifier, LocalKeyWallet) {
        let store = Arc::new(InMemoryNonceStore::new());
        let verifier = LoginVerifier::new(store.clone(), CHAIN_ID, DOMAIN);
        let wallet = LocalKeyWallet::from_bytes(&[0x11u8; 32], CHAIN_ID).unwrap();
        (store, verifier, wallet)
    }

    fn signed_request(
        wallet: &LocalKeyWallet,
        domain: &str,
        chain_id: u64,
        nonce: &str,
    ) -> VerifyRequest {
        let address = wallet.address().to_string();
        let message =
            SiweMessage::new(domain, &address, "http://localhost:5173", chain_id, nonce)
                .with_statement("Sign in")
                .to_string();
        let signature = wallet.sign_personal(&message).unwrap();
        VerifyRequest::new(address, message, signature)
    }

    #[tokio::test]
    async fn test_verify_success_then_replay() {
        let (store, verifier, wallet) = setup();
        store.insert("n-abc123", TTL);

        let req = signed_request(&wallet, DOMAIN, CHAIN_ID, "n-abc123");
        let token = verifier.verify(&req).await.unwrap();
        assert!(!token.is_empty());

        let replay = verifier.verify(&req).await.unwrap_err();
        assert!(matches!(replay, LoginError::Nonce(NonceError::Unknown)));
    }

    #[tokio::test]
    async fn test_missing_fields() {
        let (_store, verifier, _wallet) = setup();
        let mut req = VerifyRequest::new("0x1", "msg", "0x2");
        req.signature = None;
        assert!(matches!(
            verifier.verify(&req).await,
            Err(LoginError::MissingFields)
        ));

        let req = VerifyRequest::new("", "msg", "0x2");
        assert!(matches!(
            verifier.verify(&req).await,
            Err(LoginError::MissingFields)
        ));
    }

    #[tokio::test]
    async fn test_mismatch_does_not_consume_nonce() {
        let (store, verifier, wallet) = setup();
        store.insert("n-keep", TTL);

        let mut req = signed_request(&wallet, DOMAIN, CHAIN_ID, "n-keep");
        let other = LocalKeyWallet::from_bytes(&[0x22u8; 32], CHAIN_ID).unwrap();
        req.address = Some(other.address().to_string());

        let err = verifier.verify(&req).await.unwrap_err();
        assert!(matches!(err, LoginError::AddressMismatch));
        assert!(matches!(AppError::from(err), AppError::Unauthorized(_)));

        // Still consumable: the failed request never reached the store
        assert!(store.consume_at("n-keep", chrono::Utc::now()).is_ok());
    }

    #[tokio::test]
    async fn test_recovery_error_is_bad_request() {
        let (_store, verifier, wallet) = setup();
        let mut req = signed_request(&wallet, DOMAIN, CHAIN_ID, "n-x");
        req.signature = Some("0xdeadbeef".to_string());

        let err = verifier.verify(&req).await.unwrap_err();
        assert!(matches!(err, LoginError::Recovery(_)));
        assert!(err.to_string().starts_with("Recover failed: "));
        assert!(matches!(AppError::from(err), AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_and_missing_nonce() {
        let (_store, verifier, wallet) = setup();

        let req = signed_request(&wallet, DOMAIN, CHAIN_ID, "n-never-issued");
        assert!(matches!(
            verifier.verify(&req).await,
            Err(LoginError::Nonce(NonceError::Unknown))
        ));

        let address = wallet.address().to_string();
        let message = "localhost:5173 wants you to sign in with your Ethereum account:\nno nonce here";
        let signature = wallet.sign_personal(message).unwrap();
        let req = VerifyRequest::new(address, message, signature);
        assert!(matches!(
            verifier.verify(&req).await,
            Err(LoginError::NonceMissing)
        ));
    }

    #[tokio::test]
    async fn test_wrong_chain_burns_nonce() {
        let (store, verifier, wallet) = setup();
        store.insert("n-abc123", TTL);

        let req = signed_request(&wallet, DOMAIN, 1, "n-abc123");
        let err = verifier.verify(&req).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid chainId");

        assert_eq!(
            store.consume_at("n-abc123", chrono::Utc::now()),
            Err(NonceError::Unknown)
        );
    }

    #[tokio::test]
    async fn test_wrong_domain() {
        let (store, verifier, wallet) = setup();
        store.insert("n-dom", TTL);

        let req = signed_request(&wallet, "evil.example", CHAIN_ID, "n-dom");
        let err = verifier.verify(&req).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid domain");
        assert!(store.is_empty());
    }
}
