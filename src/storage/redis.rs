//! Redis nonce store.
//!
//! Redis key pattern:
//! - `nonce:{value}`: JSON `{"expires_at": <epoch ms>}`
//!
//! Keys are written with a TTL slightly longer than the nonce lifetime so a
//! late consumer gets `Expired` instead of `Unknown`; Redis still reclaims
//! every key on its own. Consumption is an atomic GET+DEL via Lua.

use super::{expiry_after, ConsumeError, IssuedNonce, NonceError, NonceStore, StoreError};
use crate::auth::session::generate_nonce;
use crate::models::StoredNonce;
use chrono::Utc;
use redis::AsyncCommands;
use std::time::Duration;
use zeroize::Zeroizing;

/// Extra key lifetime beyond the nonce expiry.
const EXPIRY_GRACE_SECS: u64 = 60;

#[derive(Clone)]
pub struct RedisNonceStore {
    client: redis::Client,
}

impl RedisNonceStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn open(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(redis::Client::open(redis_url)?))
    }

    /// Open a connection and PING.
    pub async fn check_connection(&self) -> Result<(), StoreError> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<()>(&mut con).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl NonceStore for RedisNonceStore {
    async fn issue(&self, ttl: Duration) -> Result<IssuedNonce, StoreError> {
        let mut con = self.client.get_multiplexed_async_connection().await?;

        let nonce = generate_nonce();
        let expires_at = expiry_after(Utc::now(), ttl);
        store_nonce(&mut con, &nonce, &StoredNonce::new(expires_at), ttl).await?;

        Ok(IssuedNonce { nonce, expires_at })
    }

    async fn consume(&self, nonce: &str) -> Result<(), ConsumeError> {
        let mut con = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::from)?;

        let record = take_nonce(&mut con, nonce)
            .await?
            .ok_or(NonceError::Unknown)?;

        if Utc::now() > record.expires_at() {
            return Err(NonceError::Expired.into());
        }
        Ok(())
    }
}

/// Store a nonce record with a Redis TTL covering its lifetime.
pub async fn store_nonce<C>(
    con: &mut C,
    nonce: &str,
    record: &StoredNonce,
    ttl: Duration,
) -> Result<(), StoreError>
where
    C: AsyncCommands,
{
    let key = format!("nonce:{}", nonce);
    let json = serde_json::to_string(record)?;
    let ttl_secs = ttl.as_secs().max(1).saturating_add(EXPIRY_GRACE_SECS);

    con.set_ex::<_, _, ()>(&key, json, ttl_secs).await?;
    Ok(())
}

/// Get and delete a nonce record atomically.
///
/// Uses a Lua script so two concurrent consumers cannot both read the value.
pub async fn take_nonce<C>(con: &mut C, nonce: &str) -> Result<Option<StoredNonce>, StoreError>
where
    C: AsyncCommands,
{
    let key = format!("nonce:{}", nonce);

    let script = redis::Script::new(
        r"
        local val = redis.call('GET', KEYS[1])
        if val then
            redis.call('DEL', KEYS[1])
        end
        return val
        ",
    );

    let json: Option<String> = script.key(&key).invoke_async(con).await?;

    match json {
        Some(data) => {
            let data = Zeroizing::new(data);
            Ok(Some(serde_json::from_str(&data)?))
        }
        None => Ok(None),
    }
}
