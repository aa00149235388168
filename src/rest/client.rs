//! bitFlyer Lightning REST client

use super::types::{Balance, RestError};
use crate::config::{Credentials, RestConfig};
use crate::feed::Tick;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Client for the public and private REST endpoints
pub struct BitflyerClient {
    base_url: Url,
    credentials: Credentials,
    client: Client,
}

impl BitflyerClient {
    /// Create a new client
    pub fn new(config: &RestConfig, credentials: Credentials) -> Result<Self, RestError> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| RestError::InvalidUrl(e.to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url,
            credentials,
            client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Latest ticker for `product_code` (public)
    pub async fn get_ticker(&self, product_code: &str) -> Result<Tick, RestError> {
        let mut raw: Value = self
            .request(Method::GET, "ticker", &[("product_code", product_code)], false)
            .await?;
        assume_utc(&mut raw);

        let mut tick: Tick = serde_json::from_value(raw)?;
        tick.backfill_instrument(product_code);
        Ok(tick)
    }

    /// Account balances (private, signed)
    pub async fn get_balance(&self) -> Result<Vec<Balance>, RestError> {
        self.request(Method::GET, "me/getbalance", &[], true).await
    }

    /// Build the URL for `path` relative to the API base
    pub fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, RestError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| RestError::InvalidUrl(e.to_string()))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        private: bool,
    ) -> Result<T, RestError> {
        let url = self.endpoint(path, query)?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if private {
            let (key, secret) = self
                .credentials
                .pair()
                .ok_or(RestError::MissingCredentials)?;
            let timestamp = chrono::Utc::now().timestamp().to_string();
            let message = signing_message(&timestamp, method.as_str(), &request_uri(&url), "");
            headers.insert("ACCESS-KEY", HeaderValue::from_str(key)?);
            headers.insert("ACCESS-TIMESTAMP", HeaderValue::from_str(&timestamp)?);
            headers.insert("ACCESS-SIGN", HeaderValue::from_str(&sign(secret, &message)?)?);
        }

        tracing::debug!(method = %method, url = %url, private, "REST request");

        let response = self.client.request(method, url).headers(headers).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status, body = %body, "REST request failed");
            return Err(RestError::Status { status, body });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// REST timestamps omit the offset; they are UTC
fn assume_utc(ticker: &mut Value) {
    if let Some(Value::String(ts)) = ticker.get_mut("timestamp") {
        if chrono::DateTime::parse_from_rfc3339(ts).is_err() {
            ts.push('Z');
        }
    }
}

/// Path plus query, as signed by the exchange (e.g. `/v1/me/getbalance`)
fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Text covered by `ACCESS-SIGN`
pub fn signing_message(timestamp: &str, method: &str, request_uri: &str, body: &str) -> String {
    format!("{}{}{}{}", timestamp, method, request_uri, body)
}

/// Hex HMAC-SHA256 of `message` under `secret`
pub fn sign(secret: &str, message: &str) -> Result<String, RestError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| RestError::InvalidSecret)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
