//! [`AuthApi`] calling the verifier directly, without a network hop.

use crate::auth::login::{LoginError, LoginVerifier};
use crate::gate::ports::{ApiError, AuthApi};
use crate::models::VerifyRequest;
use crate::storage::IssuedNonce;
use std::time::Duration;

#[derive(Clone)]
pub struct InProcessAuthApi {
    verifier: LoginVerifier,
    nonce_ttl: Duration,
}

impl InProcessAuthApi {
    pub fn new(verifier: LoginVerifier, nonce_ttl: Duration) -> Self {
        Self {
            verifier,
            nonce_ttl,
        }
    }
}

#[async_trait::async_trait]
impl AuthApi for InProcessAuthApi {
    async fn fetch_nonce(&self) -> Result<IssuedNonce, ApiError> {
        self.verifier
            .nonces()
            .issue(self.nonce_ttl)
            .await
            .map_err(|e| ApiError::Rejected {
                status: 500,
                reason: e.to_string(),
            })
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<String, ApiError> {
        self.verifier.verify(request).await.map_err(|err| {
            // Same status mapping as the HTTP endpoint
            let status = match &err {
                LoginError::AddressMismatch => 401,
                LoginError::Store(_) => 500,
                _ => 400,
            };
            ApiError::Rejected {
                status,
                reason: err.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryNonceStore, NonceStore};
    use std::sync::Arc;

    fn api() -> InProcessAuthApi {
        let store: Arc<dyn NonceStore> = Arc::new(InMemoryNonceStore::new());
        InProcessAuthApi::new(
            LoginVerifier::new(store, 10143, "localhost:5173"),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_fetch_nonce() {
        let issued = api().fetch_nonce().await.unwrap();
        assert!(issued.nonce.starts_with("n-"));
        assert!(issued.expires_at > chrono::Utc::now());
    }

    #[tokio::test]
    async fn test_verify_maps_status() {
        let err = api().verify(&VerifyRequest::default()).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Rejected {
                status: 400,
                reason: "Missing fields".to_string()
            }
        );
    }
}
