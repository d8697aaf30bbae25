//! The student-association identity directory: an HMAC-SHA-512 signed HTTPS
//! API with nonce + timestamp replay protection on both sides of the
//! exchange.

use crate::constants::{MIN_NONCE_LEN, PROVIDER_REQUEST_TIMEOUT, TIMESTAMP_SKEW};
use crate::error::{Result, VendError};
use crate::provider::nonce_store::NonceStore;
use crate::provider::{Provider, ProviderInfo, UserInfo};
use crate::session::CardId;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::sync::Arc;
use tracing::{debug, instrument};

type HmacSha512 = Hmac<Sha512>;

fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    rfid: &'a str,
    nonce: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    nethz: String,
    name: String,
    credits: u32,
    nonce: String,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct ReportRequest<'a> {
    rfid: &'a str,
    slot: u16,
    dispensed: bool,
    nonce: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    last_reset: i64,
    next_reset: i64,
    standard_credits: u32,
    reset_interval_days: u32,
    nonce: String,
    timestamp: i64,
}

pub struct HmacHttpsProvider {
    client: Client,
    base_url: String,
    shared_secret: Vec<u8>,
    nonces: Arc<NonceStore>,
}

impl HmacHttpsProvider {
    pub fn new(base_url: String, shared_secret: Vec<u8>, nonces: Arc<NonceStore>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            shared_secret,
            nonces,
        }
    }

    fn sign(&self, body: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(&self.shared_secret).expect("HMAC accepts any key length");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify(&self, body: &[u8], signature_hex: &str) -> Result<bool> {
        let sig_bytes = hex::decode(signature_hex)
            .map_err(|_| VendError::Verification("signature is not valid hex".into()))?;
        let mut mac = HmacSha512::new_from_slice(&self.shared_secret).expect("HMAC accepts any key length");
        mac.update(body);
        Ok(mac.verify_slice(&sig_bytes).is_ok())
    }

    fn signature_header(resp: &reqwest::Response) -> Result<String> {
        resp.headers()
            .get("X-SIGNATURE")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| VendError::Verification("response missing X-SIGNATURE header".into()))
    }

    async fn verify_response_envelope(&self, body: &[u8], signature: &str, nonce: &str, timestamp: i64) -> Result<()> {
        if !self.verify(body, signature)? {
            return Err(VendError::Verification("HMAC signature mismatch".into()));
        }
        if nonce.len() < MIN_NONCE_LEN {
            return Err(VendError::Verification("nonce shorter than minimum length".into()));
        }
        let now = chrono::Utc::now().timestamp();
        if (now - timestamp).abs() > TIMESTAMP_SKEW {
            return Err(VendError::Verification("response timestamp outside acceptable skew".into()));
        }
        if !self.nonces.check_and_record(nonce, timestamp).await? {
            return Err(VendError::Verification("nonce has already been used".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for HmacHttpsProvider {
    fn tag(&self) -> &str {
        "https"
    }

    #[instrument(skip(self), fields(card = %card))]
    async fn authenticate(&self, card: &CardId) -> Result<Option<UserInfo>> {
        let request = AuthRequest {
            rfid: &card.0,
            nonce: generate_nonce(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let body = serde_json::to_vec(&request)?;
        let signature = self.sign(&body);

        let resp = self
            .client
            .post(format!("{}/auth", self.base_url))
            .header("X-SIGNATURE", signature)
            .header("Content-Type", "application/json")
            .timeout(PROVIDER_REQUEST_TIMEOUT)
            .body(body)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!("card not recognised by identity provider");
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        let signature = Self::signature_header(&resp)?;
        let body = resp.bytes().await?;
        let parsed: AuthResponse = serde_json::from_slice(&body)?;
        self.verify_response_envelope(&body, &signature, &parsed.nonce, parsed.timestamp)
            .await?;

        Ok(Some(UserInfo {
            label: format!("{} ({})", parsed.name, parsed.nethz),
            credits: parsed.credits,
            provider_tag: self.tag().to_string(),
        }))
    }

    #[instrument(skip(self), fields(card = %card, slot, dispensed))]
    async fn report(&self, card: &CardId, slot: u16, dispensed: bool) -> Result<()> {
        let request = ReportRequest {
            rfid: &card.0,
            slot,
            dispensed,
            nonce: generate_nonce(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let body = serde_json::to_vec(&request)?;
        let signature = self.sign(&body);

        self.client
            .post(format!("{}/report", self.base_url))
            .header("X-SIGNATURE", signature)
            .header("Content-Type", "application/json")
            .timeout(PROVIDER_REQUEST_TIMEOUT)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn info(&self) -> Result<Option<ProviderInfo>> {
        let body = serde_json::to_vec(&serde_json::json!({}))?;
        let signature = self.sign(&body);

        let resp = self
            .client
            .post(format!("{}/info", self.base_url))
            .header("X-SIGNATURE", signature)
            .header("Content-Type", "application/json")
            .timeout(PROVIDER_REQUEST_TIMEOUT)
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        let signature = Self::signature_header(&resp)?;
        let body = resp.bytes().await?;
        let parsed: InfoResponse = serde_json::from_slice(&body)?;
        self.verify_response_envelope(&body, &signature, &parsed.nonce, parsed.timestamp)
            .await?;

        Ok(Some(ProviderInfo {
            last_reset: parsed.last_reset,
            next_reset: parsed.next_reset,
            standard_credits: parsed.standard_credits,
            reset_interval_days: parsed.reset_interval_days,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trips() {
        let provider = HmacHttpsProvider::new(
            "https://example.invalid".into(),
            b"shared-secret".to_vec(),
            Arc::new(NonceStore::open_in_memory().unwrap()),
        );
        let body = br#"{"hello":"world"}"#;
        let signature = provider.sign(body);
        assert!(provider.verify(body, &signature).unwrap());
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let provider = HmacHttpsProvider::new(
            "https://example.invalid".into(),
            b"shared-secret".to_vec(),
            Arc::new(NonceStore::open_in_memory().unwrap()),
        );
        let signature = provider.sign(b"original");
        assert!(!provider.verify(b"tampered", &signature).unwrap());
    }
}
