//! The auth gate state machine.
//!
//! [`AuthGate::handle`] applies one event and returns the I/O to start. It
//! never awaits; the driver executes commands and feeds their completions back
//! as events tagged with the ticket they were issued under. A completion whose
//! ticket no longer matches the current state is dropped.

use super::markers::SessionMarkers;
use super::ports::{Account, ApiError, WalletError, WalletStatus};
use super::state::{Challenge, GateError, GateState, GateView, Ticket};
use crate::auth::message::SiweMessage;
use crate::auth::verify::VerifyError;
use crate::config::GateConfig;
use crate::models::VerifyRequest;
use crate::storage::IssuedNonce;
use alloy_primitives::Address;
use chrono::Utc;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub enum GateEvent {
    /// Show the modal.
    Open,
    /// User asked to close the modal.
    Dismiss,
    /// Connection status pushed by the wallet layer.
    WalletChanged(WalletStatus),
    SelectConnector(String),
    SwitchNetwork,
    Sign,
    /// Re-send the signature request after the watchdog fired.
    RetrySignature,
    /// Fetch a fresh challenge from any error state.
    Restart,
    Disconnect,
    /// Clock tick; fires the signature watchdog.
    Tick,

    Connected {
        ticket: Ticket,
        result: Result<Account, WalletError>,
    },
    ChainSwitched {
        ticket: Ticket,
        result: Result<u64, WalletError>,
    },
    NonceFetched {
        ticket: Ticket,
        result: Result<IssuedNonce, ApiError>,
    },
    SignatureReceived {
        ticket: Ticket,
        result: Result<String, WalletError>,
    },
    LocalVerified {
        ticket: Ticket,
        result: Result<(), VerifyError>,
    },
    ServerVerified {
        ticket: Ticket,
        result: Result<String, ApiError>,
    },
}

/// I/O requested by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect {
        ticket: Ticket,
        connector: String,
        chain_id: u64,
    },
    SwitchChain {
        ticket: Ticket,
        chain_id: u64,
    },
    FetchNonce {
        ticket: Ticket,
    },
    RequestSignature {
        ticket: Ticket,
        address: Address,
        message: String,
    },
    VerifyLocally {
        ticket: Ticket,
        address: Address,
        message: String,
        signature: String,
    },
    VerifyOnServer {
        ticket: Ticket,
        request: VerifyRequest,
    },
    Disconnect,
}

pub struct AuthGate {
    config: GateConfig,
    markers: SessionMarkers,
    wallet: WalletStatus,
    state: GateState,
    last_ticket: u64,
}

impl AuthGate {
    pub fn new(config: GateConfig, markers: SessionMarkers) -> Self {
        Self {
            config,
            markers,
            wallet: WalletStatus::Disconnected,
            state: GateState::Closed,
            last_ticket: 0,
        }
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn wallet(&self) -> WalletStatus {
        self.wallet
    }

    pub fn markers(&self) -> &SessionMarkers {
        &self.markers
    }

    /// When the driver must deliver a [`GateEvent::Tick`].
    pub fn watchdog_deadline(&self) -> Option<Instant> {
        match &self.state {
            GateState::Signing {
                started_at,
                slow: false,
                ..
            } => Some(*started_at + self.config.signature_watchdog),
            _ => None,
        }
    }

    pub fn handle(&mut self, event: GateEvent, now: Instant) -> Vec<Command> {
        let mut commands = Vec::new();
        match event {
            GateEvent::Open => self.open(&mut commands),
            GateEvent::Dismiss => self.dismiss(),
            GateEvent::WalletChanged(status) => self.wallet_changed(status, &mut commands),
            GateEvent::SelectConnector(id) => self.select_connector(id, &mut commands),
            GateEvent::SwitchNetwork => self.switch_network(&mut commands),
            GateEvent::Sign => self.sign(now, &mut commands),
            GateEvent::RetrySignature => self.retry_signature(now, &mut commands),
            GateEvent::Restart => self.restart(&mut commands),
            GateEvent::Disconnect => self.disconnect(&mut commands),
            GateEvent::Tick => self.tick(now),
            GateEvent::Connected { ticket, result } => self.on_connected(ticket, result, &mut commands),
            GateEvent::ChainSwitched { ticket, result } => {
                self.on_chain_switched(ticket, result, &mut commands)
            }
            GateEvent::NonceFetched { ticket, result } => self.on_nonce_fetched(ticket, result),
            GateEvent::SignatureReceived { ticket, result } => {
                self.on_signature(ticket, result, &mut commands)
            }
            GateEvent::LocalVerified { ticket, result } => {
                self.on_local_verified(ticket, result, &mut commands)
            }
            GateEvent::ServerVerified { ticket, result } => self.on_server_verified(ticket, result),
        }
        commands
    }

    pub fn view(&self) -> GateView {
        let state = &self.state;
        let wallet_ready = self.wallet_ready();
        let can_sign = wallet_ready
            && matches!(
                state,
                GateState::ReadyToSign { .. }
                    | GateState::Error {
                        challenge: Some(_),
                        ..
                    }
            );
        let (signature_slow, retried) = match state {
            GateState::Signing { slow, retried, .. } => (*slow, *retried),
            _ => (false, false),
        };

        GateView {
            phase: state.phase(),
            open: state.is_open(),
            wallet: self.wallet,
            message: state.challenge().map(|c| c.message.clone()),
            error: state.error().map(ToString::to_string),
            can_sign,
            can_restart: wallet_ready && matches!(state, GateState::Error { challenge: None, .. }),
            can_switch_network: matches!(state, GateState::NetworkMismatch { .. }),
            can_dismiss: !self.wallet.is_connected()
                || matches!(state, GateState::Authenticated { .. } | GateState::Closed),
            signature_slow,
            retried,
            credential: match state {
                GateState::Authenticated { credential, .. } => Some(credential.clone()),
                _ => None,
            },
        }
    }

    /// Wallet connected on the expected chain.
    fn wallet_ready(&self) -> bool {
        self.wallet
            .account()
            .is_some_and(|a| a.chain_id == self.config.chain_id)
    }

    fn next_ticket(&mut self) -> Ticket {
        self.last_ticket += 1;
        Ticket(self.last_ticket)
    }

    fn discard(&self, kind: &'static str, ticket: Ticket) {
        tracing::debug!(
            action = "stale_result",
            kind,
            ticket = ticket.0,
            "Dropping result of superseded request"
        );
    }

    // User and wallet events

    fn open(&mut self, commands: &mut Vec<Command>) {
        if self.state.is_open() {
            return;
        }
        match self.wallet {
            WalletStatus::Connected(account) => self.enter_connected(account, false, commands),
            WalletStatus::Connecting | WalletStatus::Disconnected => {
                self.state = GateState::Idle { error: None }
            }
        }
    }

    fn dismiss(&mut self) {
        if !self.state.is_open() {
            return;
        }
        if self.wallet.is_connected() {
            tracing::debug!(action = "dismiss_blocked", "Connected wallet must finish sign-in");
            return;
        }
        self.state = GateState::Closed;
    }

    fn wallet_changed(&mut self, status: WalletStatus, commands: &mut Vec<Command>) {
        let previous = self.wallet;
        self.wallet = status;

        if !self.state.is_open() {
            self.wallet_changed_while_closed(previous, status, commands);
            return;
        }

        match status {
            WalletStatus::Connected(account) => {
                if self.state.account() == Some(account) {
                    return;
                }
                let tried = self.state.auto_switch_tried() && account.chain_id != self.config.chain_id;
                self.enter_connected(account, tried, commands);
            }
            // Our own connect attempt reports through its completion.
            WalletStatus::Connecting | WalletStatus::Disconnected
                if matches!(self.state, GateState::Connecting { .. }) => {}
            WalletStatus::Connecting => {}
            WalletStatus::Disconnected => self.state = GateState::Idle { error: None },
        }
    }

    fn wallet_changed_while_closed(
        &mut self,
        previous: WalletStatus,
        status: WalletStatus,
        commands: &mut Vec<Command>,
    ) {
        let Some(account) = status.account() else {
            if matches!(status, WalletStatus::Disconnected) {
                self.state = GateState::Closed;
            }
            return;
        };

        if let GateState::Authenticated { account: signed, .. } = &self.state {
            if signed.address == account.address {
                return;
            }
            self.state = GateState::Closed;
        }

        if self.markers.is_signed(&account.address) {
            self.markers.clear_pending(&account.address);
            return;
        }
        let address_changed = previous.account().map(|a| a.address) != Some(account.address);
        if address_changed {
            tracing::info!(action = "auto_open", address = %account.address, "Unsigned account connected");
            self.open(commands);
        }
    }

    fn select_connector(&mut self, connector: String, commands: &mut Vec<Command>) {
        if !matches!(self.state, GateState::Idle { .. }) || self.wallet.is_connected() {
            return;
        }
        let ticket = self.next_ticket();
        self.wallet = WalletStatus::Connecting;
        self.state = GateState::Connecting { ticket };
        commands.push(Command::Connect {
            ticket,
            connector,
            chain_id: self.config.chain_id,
        });
    }

    fn switch_network(&mut self, commands: &mut Vec<Command>) {
        if let GateState::NetworkMismatch {
            account,
            auto_switch_tried,
            ..
        } = self.state
        {
            self.start_switch(account, auto_switch_tried, commands);
        }
    }

    fn sign(&mut self, now: Instant, commands: &mut Vec<Command>) {
        if !self.wallet_ready() {
            return;
        }
        if let GateState::Error {
            account,
            challenge: None,
            ..
        } = self.state
        {
            return self.prepare(account, commands);
        }
        let (account, challenge) = match &self.state {
            GateState::ReadyToSign { account, challenge }
            | GateState::Error {
                account,
                challenge: Some(challenge),
                ..
            } => (*account, challenge.clone()),
            _ => return,
        };
        if account.chain_id != self.config.chain_id {
            return;
        }
        if challenge.is_expired(Utc::now()) {
            tracing::info!(action = "challenge_expired", nonce = %challenge.nonce, "Fetching a fresh challenge");
            self.prepare(account, commands);
            return;
        }
        self.request_signature(account, challenge, now, false, commands);
    }

    fn retry_signature(&mut self, now: Instant, commands: &mut Vec<Command>) {
        if !self.wallet_ready() {
            return;
        }
        let (account, challenge) = match &self.state {
            GateState::Signing {
                account,
                challenge,
                slow: true,
                ..
            } => (*account, challenge.clone()),
            _ => return,
        };
        if challenge.is_expired(Utc::now()) {
            tracing::info!(action = "retry_refresh", nonce = %challenge.nonce, "Challenge expired, fetching a fresh one");
            self.prepare(account, commands);
            return;
        }
        tracing::info!(action = "retry_signature", address = %account.address, "Re-sending signature request");
        self.request_signature(account, challenge, now, true, commands);
    }

    fn restart(&mut self, commands: &mut Vec<Command>) {
        if !self.wallet_ready() {
            return;
        }
        if let GateState::Error { account, .. } = self.state {
            self.prepare(account, commands);
        }
    }

    fn disconnect(&mut self, commands: &mut Vec<Command>) {
        if matches!(self.wallet, WalletStatus::Disconnected) && !self.state.is_open() {
            return;
        }
        self.wallet = WalletStatus::Disconnected;
        self.state = if self.state.is_open() {
            GateState::Idle { error: None }
        } else {
            GateState::Closed
        };
        commands.push(Command::Disconnect);
    }

    fn tick(&mut self, now: Instant) {
        let deadline = self.watchdog_deadline();
        if let GateState::Signing { slow, .. } = &mut self.state {
            if deadline.is_some_and(|d| now >= d) {
                tracing::warn!(action = "signature_slow", "Signature request still pending");
                *slow = true;
            }
        }
    }

    // Completions

    fn on_connected(
        &mut self,
        ticket: Ticket,
        result: Result<Account, WalletError>,
        commands: &mut Vec<Command>,
    ) {
        if !matches!(self.state, GateState::Connecting { ticket: t } if t == ticket) {
            return self.discard("connect", ticket);
        }
        match result {
            Ok(account) => {
                self.wallet = WalletStatus::Connected(account);
                self.enter_connected(account, false, commands);
            }
            Err(e) => {
                self.wallet = WalletStatus::Disconnected;
                self.state = GateState::Idle {
                    error: Some(GateError::Connection(e.to_string())),
                };
            }
        }
    }

    fn on_chain_switched(
        &mut self,
        ticket: Ticket,
        result: Result<u64, WalletError>,
        commands: &mut Vec<Command>,
    ) {
        let (account, auto_switch_tried) = match self.state {
            GateState::Switching {
                account,
                ticket: t,
                auto_switch_tried,
            } if t == ticket => (account, auto_switch_tried),
            _ => return self.discard("switch_chain", ticket),
        };
        match result {
            Ok(chain_id) => {
                let account = Account { chain_id, ..account };
                self.wallet = WalletStatus::Connected(account);
                self.enter_connected(account, auto_switch_tried, commands);
            }
            Err(e) => {
                self.state = GateState::NetworkMismatch {
                    account,
                    auto_switch_tried,
                    error: Some(GateError::Switch(e.to_string())),
                };
            }
        }
    }

    fn on_nonce_fetched(&mut self, ticket: Ticket, result: Result<IssuedNonce, ApiError>) {
        let account = match self.state {
            GateState::Preparing { account, ticket: t } if t == ticket => account,
            _ => return self.discard("nonce", ticket),
        };
        self.state = match result {
            Ok(issued) => GateState::ReadyToSign {
                account,
                challenge: self.build_challenge(account, issued),
            },
            Err(e) => GateState::Error {
                account,
                challenge: None,
                error: GateError::Challenge(e.to_string()),
            },
        };
    }

    fn on_signature(
        &mut self,
        ticket: Ticket,
        result: Result<String, WalletError>,
        commands: &mut Vec<Command>,
    ) {
        let (account, challenge) = match &self.state {
            GateState::Signing {
                account,
                challenge,
                ticket: t,
                ..
            } if *t == ticket => (*account, challenge.clone()),
            _ => return self.discard("signature", ticket),
        };
        match result {
            Ok(signature) => {
                let ticket = self.next_ticket();
                commands.push(Command::VerifyLocally {
                    ticket,
                    address: account.address,
                    message: challenge.message.clone(),
                    signature: signature.clone(),
                });
                self.state = GateState::LocallyVerifying {
                    account,
                    challenge,
                    ticket,
                    signature,
                };
            }
            Err(e) => {
                self.state = GateState::Error {
                    account,
                    challenge: Some(challenge),
                    error: GateError::Signature(e.to_string()),
                };
            }
        }
    }

    fn on_local_verified(
        &mut self,
        ticket: Ticket,
        result: Result<(), VerifyError>,
        commands: &mut Vec<Command>,
    ) {
        let (account, challenge, signature) = match &self.state {
            GateState::LocallyVerifying {
                account,
                challenge,
                ticket: t,
                signature,
            } if *t == ticket => (*account, challenge.clone(), signature.clone()),
            _ => return self.discard("local_verify", ticket),
        };
        if let Err(e) = result {
            tracing::warn!(action = "local_verify_failed", address = %account.address, error = %e, "Signature does not match account");
            self.state = GateState::Error {
                account,
                challenge: Some(challenge),
                error: GateError::LocalVerify(e.to_string()),
            };
            return;
        }

        if !self.config.require_server_verify {
            self.complete(account, signature);
            return;
        }
        let ticket = self.next_ticket();
        commands.push(Command::VerifyOnServer {
            ticket,
            request: VerifyRequest::new(
                account.address.to_string(),
                challenge.message.clone(),
                signature.clone(),
            ),
        });
        self.state = GateState::ServerVerifying {
            account,
            challenge,
            ticket,
            signature,
        };
    }

    fn on_server_verified(&mut self, ticket: Ticket, result: Result<String, ApiError>) {
        let (account, challenge) = match &self.state {
            GateState::ServerVerifying {
                account,
                challenge,
                ticket: t,
                ..
            } if *t == ticket => (*account, challenge.clone()),
            _ => return self.discard("server_verify", ticket),
        };
        match result {
            Ok(token) => self.complete(account, token),
            // 400: the nonce is consumed or the message is unacceptable.
            Err(ApiError::Rejected { status: 400, reason }) => {
                self.state = GateState::Error {
                    account,
                    challenge: None,
                    error: GateError::Protocol(reason),
                };
            }
            Err(e) => {
                self.state = GateState::Error {
                    account,
                    challenge: Some(challenge),
                    error: GateError::ServerVerify(e.to_string()),
                };
            }
        }
    }

    // Transitions

    /// Route a connected account: switch chains or start preparing a challenge.
    fn enter_connected(&mut self, account: Account, auto_switch_tried: bool, commands: &mut Vec<Command>) {
        if account.chain_id == self.config.chain_id {
            self.prepare(account, commands);
        } else if auto_switch_tried {
            self.state = GateState::NetworkMismatch {
                account,
                auto_switch_tried,
                error: None,
            };
        } else {
            tracing::info!(
                action = "auto_switch",
                from = account.chain_id,
                to = self.config.chain_id,
                "Wallet on unexpected chain"
            );
            self.start_switch(account, true, commands);
        }
    }

    fn start_switch(&mut self, account: Account, auto_switch_tried: bool, commands: &mut Vec<Command>) {
        let ticket = self.next_ticket();
        self.state = GateState::Switching {
            account,
            ticket,
            auto_switch_tried,
        };
        commands.push(Command::SwitchChain {
            ticket,
            chain_id: self.config.chain_id,
        });
    }

    fn prepare(&mut self, account: Account, commands: &mut Vec<Command>) {
        let ticket = self.next_ticket();
        self.state = GateState::Preparing { account, ticket };
        commands.push(Command::FetchNonce { ticket });
    }

    fn build_challenge(&self, account: Account, issued: IssuedNonce) -> Challenge {
        let message = SiweMessage::new(
            &self.config.domain,
            account.address.to_string(),
            &self.config.uri,
            account.chain_id,
            &issued.nonce,
        )
        .with_statement(&self.config.statement);
        Challenge {
            nonce: issued.nonce,
            message: message.to_string(),
            expires_at: Some(issued.expires_at),
        }
    }

    fn request_signature(
        &mut self,
        account: Account,
        challenge: Challenge,
        now: Instant,
        retried: bool,
        commands: &mut Vec<Command>,
    ) {
        let ticket = self.next_ticket();
        self.markers.mark_pending(&account.address);
        commands.push(Command::RequestSignature {
            ticket,
            address: account.address,
            message: challenge.message.clone(),
        });
        self.state = GateState::Signing {
            account,
            challenge,
            ticket,
            started_at: now,
            slow: false,
            retried,
        };
    }

    fn complete(&mut self, account: Account, credential: String) {
        self.markers.record_session(&account.address, &credential);
        self.markers.clear_pending(&account.address);
        tracing::info!(action = "authenticated", address = %account.address, "Sign-in complete");
        self.state = GateState::Authenticated { account, credential };
    }
}
