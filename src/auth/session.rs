//! Token and nonce generation for authentication.

use base64::{engine::general_purpose, Engine as _};
use rand::distr::Alphanumeric;
use rand::Rng;

/// Prefix of every issued nonce.
pub const NONCE_PREFIX: &str = "n-";

/// Random alphanumeric characters after the prefix (~190 bits).
const NONCE_RANDOM_LEN: usize = 32;

/// Generate a cryptographically random session token.
///
/// Returns a URL-safe base64 string (43 characters) from 32 random bytes.
pub fn generate_session_token() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a challenge nonce.
///
/// `n-` followed by 32 alphanumeric characters, so it survives the message's
/// `[A-Za-z0-9-]` nonce grammar unchanged.
pub fn generate_nonce() -> String {
    let random: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(NONCE_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", NONCE_PREFIX, random)
}
