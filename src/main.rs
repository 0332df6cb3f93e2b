//! walletgate entry point.
//!
//! Bootstraps the server:
//! 1. Load configuration from environment
//! 2. Pick the nonce store (Redis when REDIS_URL is set, else in-memory)
//! 3. Build router with API routes + static file serving
//! 4. Apply body limit, CORS and security headers
//! 5. Start Axum server
//!
//! Also supports the `login` subcommand (headless sign-in through the auth
//! gate with a local key) and `address` (print the address of a key).

use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use walletgate::{
    cleanup,
    client::{HttpAuthApi, LocalKeyWallet},
    config::{Config, GateConfig},
    gate::{
        spawn_gate, AuthGate, JsonFileStore, KeyValueStore, MemoryKeyValueStore, SessionMarkers,
    },
    middleware::security_headers,
    routes::{self, AppState},
    storage::{InMemoryNonceStore, NonceStore, RedisNonceStore},
};

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  walletgate                               Run the server");
    eprintln!("  walletgate login <server-url> <key-hex>  Sign in with a local key");
    eprintln!("  walletgate address <key-hex>             Print the key's address");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  SIWE_DOMAIN=localhost:3000 walletgate login http://localhost:3000 0xac09...ff80");
}

/// Drive the auth gate to completion against a running server.
///
/// Prints the session token on success.
async fn login(server_url: &str, key_hex: &str) -> Result<String, String> {
    let mut config = GateConfig::from_env().map_err(|e| format!("Config: {}", e))?;
    // A headless login is only useful with a server token
    config.require_server_verify = true;

    let store: Arc<dyn KeyValueStore> = match &config.storage_file {
        Some(path) => Arc::new(
            JsonFileStore::open(path)
                .map_err(|e| format!("Gate storage {}: {}", path.display(), e))?,
        ),
        None => Arc::new(MemoryKeyValueStore::new()),
    };
    let markers = SessionMarkers::new(store, config.storage_prefix.clone());

    let wallet = Arc::new(
        LocalKeyWallet::from_hex(key_hex, config.chain_id).map_err(|e| e.to_string())?,
    );
    let api = Arc::new(HttpAuthApi::new(server_url));
    let (mut handle, _task) = spawn_gate(AuthGate::new(config, markers), wallet, api);

    handle.open();
    handle.select_connector("local");
    let view = handle
        .wait_for(|v| v.can_sign || v.is_stalled())
        .await
        .ok_or("Gate stopped")?;
    if let Some(error) = view.error.filter(|_| !view.can_sign) {
        return Err(error);
    }

    handle.sign();
    let view = handle
        .wait_for(|v| v.is_authenticated() || v.is_stalled())
        .await
        .ok_or("Gate stopped")?;
    match (view.credential, view.error) {
        (Some(token), _) => Ok(token),
        (None, Some(error)) => Err(error),
        (None, None) => Err("Sign-in did not complete".to_string()),
    }
}

fn run_cli(args: &[String]) -> Option<i32> {
    match args.get(1).map(String::as_str) {
        None => None,
        Some("address") if args.len() == 3 => match LocalKeyWallet::from_hex(&args[2], 0) {
            Ok(wallet) => {
                println!("{}", wallet.address());
                Some(0)
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                Some(1)
            }
        },
        Some("login") if args.len() == 4 => None,
        Some(_) => {
            print_usage();
            Some(1)
        }
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if let Some(code) = run_cli(&args) {
        std::process::exit(code);
    }

    // Initialize tracing with env filter support (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if args.get(1).map(String::as_str) == Some("login") {
        match login(&args[2], &args[3]).await {
            Ok(token) => println!("{}", token),
            Err(e) => {
                eprintln!("Sign-in failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Load config from environment
    let config = Config::from_env().expect("Failed to load config");
    tracing::info!(config = ?config, "Starting walletgate on {}", config.bind_addr);

    let nonces: Arc<dyn NonceStore> = match &config.redis_url {
        Some(url) => {
            let store = RedisNonceStore::open(url).expect("Invalid Redis URL");
            store
                .check_connection()
                .await
                .expect("Failed to connect to Redis");
            tracing::info!("Using Redis nonce store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("REDIS_URL not set; nonces are kept in memory for this process only");
            let store = Arc::new(InMemoryNonceStore::new());
            cleanup::spawn_purge_task(
                store.clone(),
                std::time::Duration::from_secs(config.nonce_purge_secs),
            );
            store
        }
    };

    let state = AppState::new(nonces, Arc::new(config.clone()));

    // Explicit CORS: deny all cross-origin requests (single-origin deployment).
    let cors = CorsLayer::new();

    let app = routes::api_router()
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(axum::extract::DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors)
        .layer(axum::middleware::from_fn(security_headers))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind");
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
