//! Concrete adapters for the auth gate's ports.

pub mod http;
pub mod in_process;
pub mod wallet;

pub use http::HttpAuthApi;
pub use in_process::InProcessAuthApi;
pub use wallet::LocalKeyWallet;
