//! API route handlers.

pub mod auth;

use crate::auth::login::LoginVerifier;
use crate::config::Config;
use crate::storage::NonceStore;
use axum::{routing::post, Router};
use std::sync::Arc;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub verifier: LoginVerifier,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(nonces: Arc<dyn NonceStore>, config: Arc<Config>) -> Self {
        let verifier = LoginVerifier::new(nonces, config.chain_id, config.siwe_domain.clone());
        Self { verifier, config }
    }
}

/// Build the API router with all endpoints.
///
/// Other methods on these paths get 405 from the router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/nonce", post(auth::issue_nonce))
        .route("/api/auth/verify", post(auth::verify))
}
