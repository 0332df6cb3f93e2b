//! Client-side auth gate: blocks the app until the connected wallet has
//! signed a fresh challenge.
//!
//! [`machine::AuthGate`] is a synchronous state machine over user, wallet and
//! network events. [`driver::spawn_gate`] runs it on tokio against a
//! [`ports::WalletConnector`] and an [`ports::AuthApi`].

pub mod driver;
pub mod machine;
pub mod markers;
pub mod ports;
pub mod state;

pub use driver::{spawn_gate, GateHandle};
pub use machine::{AuthGate, Command, GateEvent};
pub use markers::{JsonFileStore, KeyValueStore, MemoryKeyValueStore, SessionMarkers};
pub use ports::{Account, ApiError, AuthApi, WalletConnector, WalletError, WalletStatus};
pub use state::{Challenge, GateError, GatePhase, GateState, GateView, Ticket};
