use super::ports::{Account, WalletStatus};
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Identifies one outstanding asynchronous request.
///
/// Every command that starts I/O carries a fresh ticket, and its completion is
/// applied only while the gate still waits on that same ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(pub(crate) u64);

/// A prepared challenge, bound to the account it was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub nonce: String,
    pub message: String,
    /// Nonce expiry as reported by the server.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Challenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Network switch failed: {0}")]
    Switch(String),

    #[error("Could not prepare sign-in: {0}")]
    Challenge(String),

    #[error("Signature failed: {0}")]
    Signature(String),

    #[error("Signature check failed: {0}")]
    LocalVerify(String),

    #[error("Server verify failed: {0}")]
    ServerVerify(String),

    /// The server refused the request itself; the challenge is unusable.
    #[error("Rejected by server: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    /// Modal not shown.
    Closed,
    /// Shown, no wallet connected.
    Idle { error: Option<GateError> },
    Connecting { ticket: Ticket },
    NetworkMismatch {
        account: Account,
        auto_switch_tried: bool,
        error: Option<GateError>,
    },
    Switching {
        account: Account,
        ticket: Ticket,
        auto_switch_tried: bool,
    },
    Preparing { account: Account, ticket: Ticket },
    ReadyToSign { account: Account, challenge: Challenge },
    Signing {
        account: Account,
        challenge: Challenge,
        ticket: Ticket,
        started_at: Instant,
        slow: bool,
        retried: bool,
    },
    LocallyVerifying {
        account: Account,
        challenge: Challenge,
        ticket: Ticket,
        signature: String,
    },
    ServerVerifying {
        account: Account,
        challenge: Challenge,
        ticket: Ticket,
        signature: String,
    },
    /// A step failed. `challenge` is kept when signing it again can succeed.
    Error {
        account: Account,
        challenge: Option<Challenge>,
        error: GateError,
    },
    Authenticated { account: Account, credential: String },
}

/// Discriminant of [`GateState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Closed,
    Idle,
    Connecting,
    NetworkMismatch,
    Switching,
    Preparing,
    ReadyToSign,
    Signing,
    LocallyVerifying,
    ServerVerifying,
    Error,
    Authenticated,
}

impl GateState {
    pub fn phase(&self) -> GatePhase {
        match self {
            GateState::Closed => GatePhase::Closed,
            GateState::Idle { .. } => GatePhase::Idle,
            GateState::Connecting { .. } => GatePhase::Connecting,
            GateState::NetworkMismatch { .. } => GatePhase::NetworkMismatch,
            GateState::Switching { .. } => GatePhase::Switching,
            GateState::Preparing { .. } => GatePhase::Preparing,
            GateState::ReadyToSign { .. } => GatePhase::ReadyToSign,
            GateState::Signing { .. } => GatePhase::Signing,
            GateState::LocallyVerifying { .. } => GatePhase::LocallyVerifying,
            GateState::ServerVerifying { .. } => GatePhase::ServerVerifying,
            GateState::Error { .. } => GatePhase::Error,
            GateState::Authenticated { .. } => GatePhase::Authenticated,
        }
    }

    /// Whether the modal is shown.
    pub fn is_open(&self) -> bool {
        !matches!(self, GateState::Closed | GateState::Authenticated { .. })
    }

    pub fn account(&self) -> Option<Account> {
        match self {
            GateState::NetworkMismatch { account, .. }
            | GateState::Switching { account, .. }
            | GateState::Preparing { account, .. }
            | GateState::ReadyToSign { account, .. }
            | GateState::Signing { account, .. }
            | GateState::LocallyVerifying { account, .. }
            | GateState::ServerVerifying { account, .. }
            | GateState::Error { account, .. }
            | GateState::Authenticated { account, .. } => Some(*account),
            GateState::Closed | GateState::Idle { .. } | GateState::Connecting { .. } => None,
        }
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        match self {
            GateState::ReadyToSign { challenge, .. }
            | GateState::Signing { challenge, .. }
            | GateState::LocallyVerifying { challenge, .. }
            | GateState::ServerVerifying { challenge, .. } => Some(challenge),
            GateState::Error { challenge, .. } => challenge.as_ref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&GateError> {
        match self {
            GateState::Idle { error } | GateState::NetworkMismatch { error, .. } => error.as_ref(),
            GateState::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Ticket of the request this state is waiting on.
    pub fn ticket(&self) -> Option<Ticket> {
        match self {
            GateState::Connecting { ticket }
            | GateState::Switching { ticket, .. }
            | GateState::Preparing { ticket, .. }
            | GateState::Signing { ticket, .. }
            | GateState::LocallyVerifying { ticket, .. }
            | GateState::ServerVerifying { ticket, .. } => Some(*ticket),
            _ => None,
        }
    }

    /// Auto-switch guard carried across mismatch states.
    pub(crate) fn auto_switch_tried(&self) -> bool {
        match self {
            GateState::NetworkMismatch {
                auto_switch_tried, ..
            }
            | GateState::Switching {
                auto_switch_tried, ..
            } => *auto_switch_tried,
            _ => false,
        }
    }
}

/// Render-ready snapshot of the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateView {
    pub phase: GatePhase,
    pub open: bool,
    pub wallet: WalletStatus,
    /// Challenge text shown to the user before signing.
    pub message: Option<String>,
    pub error: Option<String>,
    /// Connected, on the expected chain, challenge built, nothing in flight.
    pub can_sign: bool,
    /// A fresh challenge can be requested after an error that discarded it.
    pub can_restart: bool,
    pub can_switch_network: bool,
    pub can_dismiss: bool,
    /// The signature request outlived the watchdog; retry is offered.
    pub signature_slow: bool,
    /// The current signature request is a retry.
    pub retried: bool,
    pub credential: Option<String>,
}

impl GateView {
    pub fn is_authenticated(&self) -> bool {
        self.phase == GatePhase::Authenticated
    }

    /// Nothing is in flight and user input is needed to make progress.
    pub fn is_stalled(&self) -> bool {
        self.error.is_some() && !matches!(self.phase, GatePhase::Signing | GatePhase::Preparing)
    }
}
