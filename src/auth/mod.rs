//! Sign-in with Ethereum: challenge messages, signature recovery, and the
//! server-side login check.

pub mod login;
pub mod message;
pub mod session;
pub mod verify;

pub use login::{LoginError, LoginVerifier};
pub use message::{build_message, extract_chain_id, extract_domain, extract_nonce, SiweMessage};
pub use session::{generate_nonce, generate_session_token};
pub use verify::{parse_address, recover_address, verify_signature, VerifyError};
