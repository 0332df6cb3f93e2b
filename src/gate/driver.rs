//! Tokio task that owns an [`AuthGate`] and performs its I/O.

use super::machine::{AuthGate, Command, GateEvent};
use super::ports::{AuthApi, WalletConnector, WalletStatus};
use super::state::GateView;
use crate::auth::verify::verify_signature;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Sends user and wallet events to a running gate and observes its view.
#[derive(Clone)]
pub struct GateHandle {
    events: mpsc::UnboundedSender<GateEvent>,
    view: watch::Receiver<GateView>,
}

impl GateHandle {
    /// Queue an event. Returns false once the gate task has stopped.
    pub fn send(&self, event: GateEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn open(&self) -> bool {
        self.send(GateEvent::Open)
    }

    pub fn dismiss(&self) -> bool {
        self.send(GateEvent::Dismiss)
    }

    pub fn wallet_changed(&self, status: WalletStatus) -> bool {
        self.send(GateEvent::WalletChanged(status))
    }

    pub fn select_connector(&self, connector: impl Into<String>) -> bool {
        self.send(GateEvent::SelectConnector(connector.into()))
    }

    pub fn switch_network(&self) -> bool {
        self.send(GateEvent::SwitchNetwork)
    }

    pub fn sign(&self) -> bool {
        self.send(GateEvent::Sign)
    }

    pub fn retry_signature(&self) -> bool {
        self.send(GateEvent::RetrySignature)
    }

    pub fn restart(&self) -> bool {
        self.send(GateEvent::Restart)
    }

    pub fn disconnect(&self) -> bool {
        self.send(GateEvent::Disconnect)
    }

    /// Latest published view.
    pub fn view(&self) -> GateView {
        self.view.borrow().clone()
    }

    /// Wait until the view satisfies `predicate`. `None` if the gate stopped first.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&GateView) -> bool) -> Option<GateView> {
        self.view.wait_for(predicate).await.ok().map(|view| view.clone())
    }
}

/// Start the gate on the current runtime.
///
/// The task runs until every [`GateHandle`] is dropped.
pub fn spawn_gate(
    gate: AuthGate,
    wallet: Arc<dyn WalletConnector>,
    api: Arc<dyn AuthApi>,
) -> (GateHandle, JoinHandle<()>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (results_tx, results_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(gate.view());

    let driver = GateDriver {
        gate,
        wallet,
        api,
        results: results_tx,
        view: view_tx,
    };
    let task = tokio::spawn(driver.run(events_rx, results_rx));

    (
        GateHandle {
            events: events_tx,
            view: view_rx,
        },
        task,
    )
}

struct GateDriver {
    gate: AuthGate,
    wallet: Arc<dyn WalletConnector>,
    api: Arc<dyn AuthApi>,
    results: mpsc::UnboundedSender<GateEvent>,
    view: watch::Sender<GateView>,
}

impl GateDriver {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<GateEvent>,
        mut results: mpsc::UnboundedReceiver<GateEvent>,
    ) {
        loop {
            let deadline = self.gate.watchdog_deadline();
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                Some(event) = results.recv() => event,
                _ = sleep_until_deadline(deadline) => GateEvent::Tick,
            };

            for command in self.gate.handle(event, Instant::now()) {
                self.execute(command);
            }
            self.view.send_replace(self.gate.view());
        }
        tracing::debug!("Gate driver stopped");
    }

    fn execute(&self, command: Command) {
        match command {
            Command::Connect {
                ticket,
                connector,
                chain_id,
            } => {
                let wallet = self.wallet.clone();
                self.spawn_request(async move {
                    let result = wallet.connect(&connector, chain_id).await;
                    GateEvent::Connected { ticket, result }
                });
            }
            Command::SwitchChain { ticket, chain_id } => {
                let wallet = self.wallet.clone();
                self.spawn_request(async move {
                    let result = wallet.switch_chain(chain_id).await;
                    GateEvent::ChainSwitched { ticket, result }
                });
            }
            Command::FetchNonce { ticket } => {
                let api = self.api.clone();
                self.spawn_request(async move {
                    let result = api.fetch_nonce().await;
                    GateEvent::NonceFetched { ticket, result }
                });
            }
            Command::RequestSignature {
                ticket,
                address,
                message,
            } => {
                let wallet = self.wallet.clone();
                self.spawn_request(async move {
                    let result = wallet.sign_message(address, &message).await;
                    GateEvent::SignatureReceived { ticket, result }
                });
            }
            Command::VerifyLocally {
                ticket,
                address,
                message,
                signature,
            } => {
                // Recovery is a few microseconds of CPU; run it inline.
                let result = verify_signature(&address.to_string(), &message, &signature).map(|_| ());
                let _ = self.results.send(GateEvent::LocalVerified { ticket, result });
            }
            Command::VerifyOnServer { ticket, request } => {
                let api = self.api.clone();
                self.spawn_request(async move {
                    let result = api.verify(&request).await;
                    GateEvent::ServerVerified { ticket, result }
                });
            }
            Command::Disconnect => {
                let wallet = self.wallet.clone();
                tokio::spawn(async move { wallet.disconnect().await });
            }
        }
    }

    fn spawn_request<F>(&self, request: F)
    where
        F: Future<Output = GateEvent> + Send + 'static,
    {
        let results = self.results.clone();
        tokio::spawn(async move {
            let _ = results.send(request.await);
        });
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::login::LoginVerifier;
    use crate::client::{InProcessAuthApi, LocalKeyWallet};
    use crate::config::GateConfig;
    use crate::gate::markers::{MemoryKeyValueStore, SessionMarkers};
    use crate::gate::ports::{Account, WalletError};
    use crate::gate::state::GatePhase;
    use crate::storage::{InMemoryNonceStore, NonceStore};
    use alloy_primitives::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const CHAIN: u64 = 10143;
    const KEY: [u8; 32] = [7u8; 32];

    struct Harness {
        handle: GateHandle,
        markers: SessionMarkers,
        nonces: Arc<InMemoryNonceStore>,
    }

    fn start(
        require_server_verify: bool,
        wallet: Arc<dyn WalletConnector>,
    ) -> Harness {
        let config = GateConfig {
            require_server_verify,
            ..GateConfig::default()
        };
        let nonces = Arc::new(InMemoryNonceStore::new());
        let store: Arc<dyn NonceStore> = nonces.clone();
        let verifier = LoginVerifier::new(store, CHAIN, config.domain.clone());
        let api = Arc::new(InProcessAuthApi::new(verifier, Duration::from_secs(300)));
        let markers = SessionMarkers::new(Arc::new(MemoryKeyValueStore::new()), "wg");
        let gate = AuthGate::new(config, markers.clone());
        let (handle, _task) = spawn_gate(gate, wallet, api);
        Harness {
            handle,
            markers,
            nonces,
        }
    }

    async fn connect_and_prepare(harness: &mut Harness) -> GateView {
        harness.handle.open();
        harness.handle.select_connector("local");
        harness
            .handle
            .wait_for(|v| v.can_sign || v.is_stalled())
            .await
            .unwrap()
    }

    /// Signs with one key while reporting another account.
    struct ImpostorWallet {
        reported: Address,
        signer: LocalKeyWallet,
    }

    #[async_trait::async_trait]
    impl WalletConnector for ImpostorWallet {
        async fn connect(&self, _connector_id: &str, chain_id: u64) -> Result<Account, WalletError> {
            Ok(Account {
                address: self.reported,
                chain_id,
            })
        }

        async fn switch_chain(&self, chain_id: u64) -> Result<u64, WalletError> {
            Ok(chain_id)
        }

        async fn sign_message(&self, _address: Address, message: &str) -> Result<String, WalletError> {
            self.signer.sign_personal(message)
        }

        async fn disconnect(&self) {}
    }

    /// Never answers the first signature request.
    struct StallingWallet {
        inner: LocalKeyWallet,
        requests: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl WalletConnector for StallingWallet {
        async fn connect(&self, connector_id: &str, chain_id: u64) -> Result<Account, WalletError> {
            self.inner.connect(connector_id, chain_id).await
        }

        async fn switch_chain(&self, chain_id: u64) -> Result<u64, WalletError> {
            self.inner.switch_chain(chain_id).await
        }

        async fn sign_message(&self, address: Address, message: &str) -> Result<String, WalletError> {
            if self.requests.fetch_add(1, Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            self.inner.sign_message(address, message).await
        }

        async fn disconnect(&self) {}
    }

    #[tokio::test]
    async fn test_full_sign_in_with_server_verify() {
        let wallet = Arc::new(LocalKeyWallet::from_bytes(&KEY, 1).unwrap());
        let address = wallet.address();
        let mut harness = start(true, wallet.clone());

        let view = connect_and_prepare(&mut harness).await;
        assert!(view.can_sign, "unexpected view {:?}", view);
        // Connected on chain 1; the gate switched the wallet automatically.
        assert_eq!(wallet.chain_id(), CHAIN);
        assert_eq!(harness.nonces.len(), 1);

        harness.handle.sign();
        let view = harness
            .handle
            .wait_for(|v| v.is_authenticated() || v.is_stalled())
            .await
            .unwrap();
        assert!(view.is_authenticated(), "unexpected view {:?}", view);

        let token = view.credential.unwrap();
        assert_eq!(token.len(), 43);
        assert_eq!(harness.markers.session(&address), Some(token));
        assert!(!harness.markers.is_pending(&address));
        assert!(harness.nonces.is_empty());
    }

    #[tokio::test]
    async fn test_local_mode_stores_signature() {
        let wallet = Arc::new(LocalKeyWallet::from_bytes(&KEY, CHAIN).unwrap());
        let address = wallet.address();
        let mut harness = start(false, wallet);

        connect_and_prepare(&mut harness).await;
        harness.handle.sign();
        let view = harness
            .handle
            .wait_for(|v| v.is_authenticated() || v.is_stalled())
            .await
            .unwrap();

        let credential = view.credential.unwrap();
        assert!(credential.starts_with("0x"));
        assert_eq!(credential.len(), 132);
        assert_eq!(harness.markers.session(&address), Some(credential));
        // The server never saw the nonce.
        assert_eq!(harness.nonces.len(), 1);
    }

    #[tokio::test]
    async fn test_impostor_signature_never_reaches_server() {
        let signer = LocalKeyWallet::from_bytes(&[9u8; 32], CHAIN).unwrap();
        let reported = LocalKeyWallet::from_bytes(&KEY, CHAIN).unwrap().address();
        let wallet = Arc::new(ImpostorWallet { reported, signer });
        let mut harness = start(true, wallet);

        connect_and_prepare(&mut harness).await;
        harness.handle.sign();
        let view = harness.handle.wait_for(|v| v.is_stalled()).await.unwrap();

        assert_eq!(view.phase, GatePhase::Error);
        assert!(view.error.unwrap().starts_with("Signature check failed"));
        assert!(view.can_sign);
        assert!(harness.markers.session(&reported).is_none());
        // Nonce still unconsumed on the server.
        assert_eq!(harness.nonces.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_then_retry_completes() {
        let wallet = Arc::new(StallingWallet {
            inner: LocalKeyWallet::from_bytes(&KEY, CHAIN).unwrap(),
            requests: AtomicUsize::new(0),
        });
        let mut harness = start(true, wallet.clone());

        connect_and_prepare(&mut harness).await;
        let before = harness.handle.view().message;
        harness.handle.sign();

        let view = harness.handle.wait_for(|v| v.signature_slow).await.unwrap();
        assert_eq!(view.phase, GatePhase::Signing);
        assert_eq!(view.message, before);

        harness.handle.retry_signature();
        let view = harness
            .handle
            .wait_for(|v| v.is_authenticated() || v.is_stalled())
            .await
            .unwrap();
        assert!(view.is_authenticated(), "unexpected view {:?}", view);
        assert_eq!(wallet.requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dismiss_after_disconnect() {
        let wallet = Arc::new(LocalKeyWallet::from_bytes(&KEY, CHAIN).unwrap());
        let mut harness = start(false, wallet);

        connect_and_prepare(&mut harness).await;
        harness.handle.dismiss();
        harness.handle.disconnect();
        let view = harness
            .handle
            .wait_for(|v| v.phase == GatePhase::Idle)
            .await
            .unwrap();
        assert!(view.can_dismiss);

        harness.handle.dismiss();
        let view = harness.handle.wait_for(|v| !v.open).await.unwrap();
        assert_eq!(view.phase, GatePhase::Closed);
    }
}
