use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::WalletConfig;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc client is shut down")]
    Closed,
    #[error("rpc transport error: {0}")]
    Transport(String),
    #[error("rpc http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("rpc decode error: {0}")]
    Decode(String),
}

/// Read access to the target network. Broadcasting goes through the wallet
/// session, not through this client.
#[async_trait]
pub trait RpcClient: Send + Sync + 'static {
    fn chain_id(&self) -> u64;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128, RpcError>;

    /// Latest balance of `address` in wei.
    async fn balance(&self, address: &str) -> Result<U256, RpcError>;

    /// Releases the underlying connection pool. Safe to call repeatedly.
    fn shutdown(&self);
}

#[must_use]
pub fn network_label(chain_id: u64) -> String {
    format!("Sepolia (chain id {chain_id})")
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 over HTTP.
#[derive(Debug)]
pub struct JsonRpcClient {
    endpoint: String,
    chain_id: u64,
    next_id: AtomicU64,
    http: RwLock<Option<reqwest::Client>>,
}

impl JsonRpcClient {
    pub fn new(config: &WalletConfig) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| RpcError::Transport(error.to_string()))?;

        Ok(Self {
            endpoint: config.rpc_url.clone(),
            chain_id: config.chain_id,
            next_id: AtomicU64::new(1),
            http: RwLock::new(Some(http)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_shut_down(&self) -> bool {
        self.http
            .read()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }

    fn http(&self) -> Result<reqwest::Client, RpcError> {
        let guard = self.http.read().map_err(|_| RpcError::Closed)?;
        guard.clone().ok_or(RpcError::Closed)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let http = self.http()?;
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|error| RpcError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|error| RpcError::Transport(error.to_string()))?;
            return Err(RpcError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope = response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|error| RpcError::Decode(error.to_string()))?;
        if let Some(error) = envelope.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        envelope
            .result
            .ok_or_else(|| RpcError::Decode(format!("{method} returned no result")))
    }
}

#[async_trait]
impl RpcClient for JsonRpcClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        let quantity = decode_quantity(&result)?;
        u128::try_from(quantity)
            .map_err(|_| RpcError::Decode(format!("gas price out of range: {quantity}")))
    }

    async fn balance(&self, address: &str) -> Result<U256, RpcError> {
        let result = self
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        decode_quantity(&result)
    }

    fn shutdown(&self) {
        let released = match self.http.write() {
            Ok(mut guard) => guard.take().is_some(),
            Err(poisoned) => poisoned.into_inner().take().is_some(),
        };
        if released {
            tracing::debug!(endpoint = %self.endpoint, "rpc client shut down");
        }
    }
}

fn decode_quantity(value: &Value) -> Result<U256, RpcError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::Decode(format!("expected hex quantity, got {value}")))?;
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| RpcError::Decode(format!("quantity missing 0x prefix: {raw}")))?;
    if digits.is_empty() {
        return Err(RpcError::Decode("empty quantity".to_string()));
    }
    U256::from_str_radix(digits, 16).map_err(|error| RpcError::Decode(format!("{raw}: {error}")))
}
