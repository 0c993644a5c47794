use std::sync::Arc;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::rpc::RpcClient;
use crate::session::{WalletRecord, WalletSession, first_evm_wallet};
use crate::units::{eth_to_wei, is_positive_decimal};

pub const TRANSFER_GAS_LIMIT: u64 = 21_000;
pub const ADDRESS_LENGTH: usize = 42;
pub const UNKNOWN_TX_HASH: &str = "unknown";
pub const MAX_PASSTHROUGH_ERROR_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Loading,
    Success { transaction_hash: String },
    Error { message: String },
}

impl SendState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("enter recipient")]
    MissingRecipient,
    #[error("invalid address")]
    InvalidAddress,
    #[error("enter amount")]
    MissingAmount,
    #[error("enter valid amount")]
    InvalidAmount,
    #[error("no EVM wallet")]
    NoEvmWallet,
    #[error("network error: mainnet RPC unreachable")]
    MainnetRpc,
    #[error("transaction could not reach the network")]
    TransactionNetwork,
    #[error("insufficient balance")]
    InsufficientFunds,
    #[error("invalid recipient address")]
    InvalidRecipient,
    #[error("transaction failed")]
    Generic,
    #[error("{0}")]
    Rejected(String),
}

/// EIP-1559 value transfer handed to the wallet session for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub from: String,
    pub to: String,
    pub value: U256,
    pub gas: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Fixed fee policy: cap at twice the current gas price, tip the full price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeePolicy {
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl FeePolicy {
    #[must_use]
    pub fn from_gas_price(gas_price: u128) -> Self {
        Self {
            gas_limit: TRANSFER_GAS_LIMIT,
            max_fee_per_gas: gas_price.saturating_mul(2),
            max_priority_fee_per_gas: gas_price,
        }
    }

    #[must_use]
    pub fn transfer(&self, from: &str, to: &str, value: U256) -> TransactionRequest {
        TransactionRequest {
            from: from.to_string(),
            to: to.to_string(),
            value,
            gas: self.gas_limit,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
        }
    }
}

#[must_use]
pub fn is_plausible_address(address: &str) -> bool {
    address.starts_with("0x") && address.chars().count() == ADDRESS_LENGTH
}

/// Keeps digits and the first decimal point.
#[must_use]
pub fn sanitize_amount(raw: &str) -> String {
    let mut seen_point = false;
    raw.chars()
        .filter(|ch| {
            if ch.is_ascii_digit() {
                return true;
            }
            if *ch == '.' && !seen_point {
                seen_point = true;
                return true;
            }
            false
        })
        .collect()
}

/// Synchronous checks run before anything touches the network. Returns the
/// amount in wei.
pub fn validate_transfer(recipient: &str, amount: &str) -> Result<U256, SendError> {
    if recipient.trim().is_empty() {
        return Err(SendError::MissingRecipient);
    }
    if !is_plausible_address(recipient) {
        return Err(SendError::InvalidAddress);
    }
    if amount.trim().is_empty() {
        return Err(SendError::MissingAmount);
    }
    if !is_positive_decimal(amount) {
        return Err(SendError::InvalidAmount);
    }
    eth_to_wei(amount).map_err(|_| SendError::InvalidAmount)
}

#[must_use]
pub fn classify_send_failure(raw: &str) -> SendError {
    if raw.contains("eth.llamarpc.com") || raw.contains("Failed to fetch") {
        return SendError::MainnetRpc;
    }
    if raw.contains("TransactionExecutionError") || raw.contains("HTTP request failed") {
        return SendError::TransactionNetwork;
    }
    if raw.contains("insufficient funds") || raw.contains("balance") {
        return SendError::InsufficientFunds;
    }
    if raw.contains("invalid address") || raw.contains("address") {
        return SendError::InvalidRecipient;
    }
    if raw.chars().count() > MAX_PASSTHROUGH_ERROR_LEN {
        return SendError::Generic;
    }
    SendError::Rejected(raw.to_string())
}

/// One-shot value transfer from the user's EVM wallet. Failed submissions
/// are not retried.
pub struct SendController<S: WalletSession, R: RpcClient> {
    session: Arc<S>,
    rpc: Arc<R>,
    state: watch::Sender<SendState>,
    recipient: watch::Sender<String>,
    amount: watch::Sender<String>,
}

impl<S: WalletSession, R: RpcClient> SendController<S, R> {
    pub fn new(session: Arc<S>, rpc: Arc<R>) -> Self {
        Self {
            session,
            rpc,
            state: watch::Sender::new(SendState::Idle),
            recipient: watch::Sender::new(String::new()),
            amount: watch::Sender::new(String::new()),
        }
    }

    pub fn state(&self) -> SendState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SendState> {
        self.state.subscribe()
    }

    pub fn recipient(&self) -> String {
        self.recipient.borrow().clone()
    }

    pub fn amount(&self) -> String {
        self.amount.borrow().clone()
    }

    pub fn set_recipient(&self, value: &str) {
        self.recipient.send_replace(value.trim().to_string());
        self.clear_error();
    }

    pub fn set_amount(&self, value: &str) {
        self.amount.send_replace(sanitize_amount(value));
        self.clear_error();
    }

    pub fn reset(&self) {
        self.state.send_replace(SendState::Idle);
    }

    pub async fn submit(&self) -> SendState {
        let recipient = self.recipient();
        let amount = self.amount();
        let value = match validate_transfer(&recipient, &amount) {
            Ok(value) => value,
            Err(error) => return self.fail(&error),
        };

        self.state.send_replace(SendState::Loading);

        let wallets = self.session.user_wallets();
        let Some(wallet) = first_evm_wallet(&wallets).filter(|wallet| wallet.evm_address().is_some())
        else {
            return self.fail(&SendError::NoEvmWallet);
        };

        match self.broadcast(wallet, &recipient, value).await {
            Ok(hash) => {
                let transaction_hash = hash
                    .filter(|hash| !hash.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_TX_HASH.to_string());
                tracing::info!(%transaction_hash, to = %recipient, "transfer submitted");
                let next = SendState::Success { transaction_hash };
                self.state.send_replace(next.clone());
                next
            }
            Err(raw) => {
                tracing::warn!(error = %raw, to = %recipient, "transfer failed");
                self.fail(&classify_send_failure(&raw))
            }
        }
    }

    async fn broadcast(
        &self,
        wallet: &WalletRecord,
        to: &str,
        value: U256,
    ) -> Result<Option<String>, String> {
        let gas_price = self
            .rpc
            .gas_price()
            .await
            .map_err(|error| error.to_string())?;
        let fees = FeePolicy::from_gas_price(gas_price);
        let from = wallet.evm_address().unwrap_or_default();
        let request = fees.transfer(from, to, value);
        tracing::debug!(
            gas_price,
            max_fee_per_gas = request.max_fee_per_gas,
            gas = request.gas,
            "prepared transfer"
        );
        self.session
            .send_transaction(&request, wallet)
            .await
            .map_err(|error| error.to_string())
    }

    fn fail(&self, error: &SendError) -> SendState {
        let next = SendState::Error {
            message: error.to_string(),
        };
        self.state.send_replace(next.clone());
        next
    }

    fn clear_error(&self) {
        self.state.send_if_modified(|state| {
            if matches!(state, SendState::Error { .. }) {
                *state = SendState::Idle;
                true
            } else {
                false
            }
        });
    }
}
