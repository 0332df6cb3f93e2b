//! Request and response models for the API.
//!
//! All models use serde for serialization/deserialization.
//! Storage models represent Redis data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Auth Models
// ============================================================================

/// Response to `POST /api/auth/nonce`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceResponse {
    pub nonce: String,
    /// Expiry, epoch milliseconds.
    pub exp: i64,
}

/// Body of `POST /api/auth/verify`.
///
/// Fields are optional so that a missing field is reported as such rather
/// than as unparseable JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub address: Option<String>,
    pub message: Option<String>,
    pub signature: Option<String>,
}

impl VerifyRequest {
    pub fn new(
        address: impl Into<String>,
        message: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            address: Some(address.into()),
            message: Some(message.into()),
            signature: Some(signature.into()),
        }
    }
}

/// Response after successful verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub ok: bool,
    pub token: String,
}

// ============================================================================
// Storage Models
// ============================================================================

/// Nonce record as stored in Redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredNonce {
    /// Epoch milliseconds.
    pub expires_at: i64,
}

impl StoredNonce {
    pub fn new(expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at: expires_at.timestamp_millis(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.expires_at).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_request_missing_fields_deserialize() {
        let req: VerifyRequest = serde_json::from_str(r#"{"address":"0x1"}"#).unwrap();
        assert_eq!(req.address.as_deref(), Some("0x1"));
        assert!(req.message.is_none());
        assert!(req.signature.is_none());
    }

    #[test]
    fn test_nonce_response_shape() {
        let json = serde_json::to_value(NonceResponse {
            nonce: "n-abc".to_string(),
            exp: 42,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"nonce": "n-abc", "exp": 42}));
    }
}
