//! REST API types

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

/// Asset balance from `me/getbalance`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Balance {
    pub currency_code: String,
    pub amount: Decimal,
    pub available: Decimal,
}

/// REST client errors
#[derive(Debug, Error)]
pub enum RestError {
    #[error("API_KEY and API_SECRET must be set for private endpoints")]
    MissingCredentials,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
    #[error("Invalid API secret")]
    InvalidSecret,
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}
