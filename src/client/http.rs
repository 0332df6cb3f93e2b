//! [`AuthApi`] over HTTP.

use crate::gate::ports::{ApiError, AuthApi};
use crate::models::{NonceResponse, VerifyRequest, VerifyResponse};
use crate::storage::IssuedNonce;
use chrono::DateTime;
use reqwest::Response;

#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpAuthApi {
    /// `base_url` is the server origin, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait::async_trait]
impl AuthApi for HttpAuthApi {
    async fn fetch_nonce(&self) -> Result<IssuedNonce, ApiError> {
        let response = self
            .http
            .post(self.url("/api/auth/nonce"))
            .send()
            .await
            .map_err(network)?;
        let body: NonceResponse = success(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        let expires_at = DateTime::from_timestamp_millis(body.exp)
            .ok_or_else(|| ApiError::InvalidResponse(format!("exp out of range: {}", body.exp)))?;
        Ok(IssuedNonce {
            nonce: body.nonce,
            expires_at,
        })
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<String, ApiError> {
        let response = self
            .http
            .post(self.url("/api/auth/verify"))
            .json(request)
            .send()
            .await
            .map_err(network)?;
        let body: VerifyResponse = success(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        if !body.ok {
            return Err(ApiError::InvalidResponse("ok=false".to_string()));
        }
        Ok(body.token)
    }
}

fn network(err: reqwest::Error) -> ApiError {
    ApiError::Network(err.to_string())
}

/// Map non-2xx responses to `Rejected` with the plain-text reason.
async fn success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let reason = if text.trim().is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        text.trim().to_string()
    };
    Err(ApiError::Rejected {
        status: status.as_u16(),
        reason,
    })
}
