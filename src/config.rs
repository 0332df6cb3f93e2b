use crate::auth::message::DEFAULT_STATEMENT;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Chain the deployment signs in on (Monad Testnet).
pub const DEFAULT_CHAIN_ID: u64 = 10143;

/// Domain expected in the first line of every challenge.
pub const DEFAULT_DOMAIN: &str = "localhost:5173";

pub const DEFAULT_URI: &str = "http://localhost:5173";

/// Nonce lifetime in minutes.
pub const DEFAULT_NONCE_TTL_MINS: u64 = 5;

/// Seconds before a pending signature request is reported as slow.
pub const DEFAULT_SIGN_WATCHDOG_SECS: u64 = 15;

/// Server configuration.
#[derive(Clone)]
pub struct Config {
    // Server
    pub bind_addr: SocketAddr,
    pub static_dir: PathBuf,
    pub max_body_bytes: usize,

    // Nonce store; in-memory when unset
    pub redis_url: Option<String>,
    pub nonce_ttl_mins: u64,
    pub nonce_purge_secs: u64,

    // Challenge binding
    pub siwe_domain: String,
    pub chain_id: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("static_dir", &self.static_dir)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("nonce_ttl_mins", &self.nonce_ttl_mins)
            .field("nonce_purge_secs", &self.nonce_purge_secs)
            .field("siwe_domain", &self.siwe_domain)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Attempt to load .env file, but don't fail if it doesn't exist
        // (env vars may be set directly in production)
        let _ = dotenvy::dotenv();

        // Server
        let bind_addr_str = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_addr = bind_addr_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::ParseError("BIND_ADDR".to_string(), e.to_string()))?;
        let static_dir = PathBuf::from(env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string()));
        let max_body_bytes = parse_env_or_default("MAX_BODY_BYTES", 16_384)?;

        // Nonce store
        let redis_url = env::var("REDIS_URL").ok().filter(|url| !url.is_empty());
        let nonce_ttl_mins = parse_env_or_default("SIWE_EXP_MINUTES", DEFAULT_NONCE_TTL_MINS)?;
        if nonce_ttl_mins == 0 {
            return Err(ConfigError::InvalidValue(
                "SIWE_EXP_MINUTES".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let nonce_purge_secs = parse_env_or_default("NONCE_PURGE_SECS", 60)?;

        // Challenge binding
        let siwe_domain = domain_from_env()?;
        let chain_id = parse_env_or_default("SIWE_CHAIN_ID", DEFAULT_CHAIN_ID)?;

        Ok(Config {
            bind_addr,
            static_dir,
            max_body_bytes,
            redis_url,
            nonce_ttl_mins,
            nonce_purge_secs,
            siwe_domain,
            chain_id,
        })
    }

    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_mins.saturating_mul(60))
    }
}

/// Auth gate (client) configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Domain written into challenges.
    pub domain: String,
    pub uri: String,
    pub statement: String,
    /// Chain the wallet must be on before signing.
    pub chain_id: u64,
    /// Whether the server must accept the signature before the gate completes.
    pub require_server_verify: bool,
    /// Prefix of the client-persisted marker keys.
    pub storage_prefix: String,
    pub storage_file: Option<PathBuf>,
    pub signature_watchdog: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            uri: DEFAULT_URI.to_string(),
            statement: DEFAULT_STATEMENT.to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            require_server_verify: false,
            storage_prefix: "walletgate".to_string(),
            storage_file: None,
            signature_watchdog: Duration::from_secs(DEFAULT_SIGN_WATCHDOG_SECS),
        }
    }
}

impl GateConfig {
    /// Load gate configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let domain = domain_from_env()?;
        let uri = env::var("SIWE_URI").unwrap_or_else(|_| DEFAULT_URI.to_string());
        let statement =
            env::var("SIWE_STATEMENT").unwrap_or_else(|_| DEFAULT_STATEMENT.to_string());
        if statement.trim().is_empty() || statement.contains('\n') {
            return Err(ConfigError::InvalidValue(
                "SIWE_STATEMENT".to_string(),
                "must be a single non-empty line".to_string(),
            ));
        }
        let chain_id = parse_env_or_default("SIWE_CHAIN_ID", DEFAULT_CHAIN_ID)?;
        let require_server_verify = parse_env_or_default("SIWE_REQUIRE_SERVER", false)?;
        let storage_prefix =
            env::var("GATE_STORAGE_PREFIX").unwrap_or_else(|_| "walletgate".to_string());
        let storage_file = env::var("GATE_STORAGE_FILE").ok().map(PathBuf::from);
        let watchdog_secs = parse_env_or_default("SIGN_WATCHDOG_SECS", DEFAULT_SIGN_WATCHDOG_SECS)?;

        Ok(GateConfig {
            domain,
            uri,
            statement,
            chain_id,
            require_server_verify,
            storage_prefix,
            storage_file,
            signature_watchdog: Duration::from_secs(watchdog_secs),
        })
    }
}

/// SIWE_DOMAIN: non-empty, no whitespace (it is the first word of the challenge).
fn domain_from_env() -> Result<String, ConfigError> {
    let domain = env::var("SIWE_DOMAIN").unwrap_or_else(|_| DEFAULT_DOMAIN.to_string());
    if domain.is_empty() || domain.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidValue(
            "SIWE_DOMAIN".to_string(),
            "must be a non-empty host without whitespace".to_string(),
        ));
    }
    Ok(domain)
}

/// Helper function to parse environment variable with a default value
fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| ConfigError::ParseError(key.to_string(), format!("{}: {}", e, val))),
        Err(_) => Ok(default),
    }
}
