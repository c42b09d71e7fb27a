//! Foreign (0x) to native (f/t) address translation

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::AddressTranslator;
use crate::error::{GovernanceError, Result};

const TRANSLATE_METHOD: &str = "Filecoin.EthAddressToFilecoinAddress";

/// True for addresses already in native form (`f1...`, `t410...`)
pub fn is_native(address: &str) -> bool {
    let mut chars = address.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('f' | 't'), Some(c)) if c.is_ascii_digit()
    )
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Translates through the node's JSON-RPC API
pub struct RpcAddressTranslator {
    http: Client,
    url: String,
}

impl RpcAddressTranslator {
    pub fn new(url: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent("allocator-governance/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                GovernanceError::Internal(format!("failed to build RPC HTTP client: {}", e))
            })?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AddressTranslator for RpcAddressTranslator {
    async fn to_native(&self, address: &str) -> Result<String> {
        if is_native(address) {
            return Ok(address.to_string());
        }

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": TRANSLATE_METHOD,
            "params": [address],
            "id": 1,
        });
        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response {
            RpcResponse {
                result: Some(native),
                ..
            } => Ok(native),
            RpcResponse {
                error: Some(err), ..
            } => Err(GovernanceError::AddressTranslation(format!(
                "{} ({}): {}",
                address, err.code, err.message
            ))),
            _ => Err(GovernanceError::AddressTranslation(format!(
                "{}: empty response",
                address
            ))),
        }
    }
}
