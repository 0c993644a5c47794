use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::send::TransactionRequest;

const EVM_CHAIN_NAMES: [&str; 3] = ["EVM", "ETH", "ETHEREUM"];

/// Read-only view of a wallet owned by the wallet session service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalletRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl WalletRecord {
    pub fn new(chain: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            chain: Some(chain.into()),
            address: Some(address.into()),
        }
    }

    /// A record whose keys have not been derived yet.
    pub fn pending(chain: impl Into<String>) -> Self {
        Self {
            chain: Some(chain.into()),
            address: None,
        }
    }

    #[must_use]
    pub fn is_evm(&self) -> bool {
        is_evm_chain(self.chain.as_deref())
    }

    /// Non-blank address of an EVM record.
    #[must_use]
    pub fn evm_address(&self) -> Option<&str> {
        if !self.is_evm() {
            return None;
        }
        self.address
            .as_deref()
            .filter(|address| !address.trim().is_empty())
    }
}

#[must_use]
pub fn is_evm_chain(chain: Option<&str>) -> bool {
    let normalized = chain.unwrap_or_default().trim().to_ascii_uppercase();
    EVM_CHAIN_NAMES.contains(&normalized.as_str())
}

#[must_use]
pub fn first_evm_wallet(wallets: &[WalletRecord]) -> Option<&WalletRecord> {
    wallets.iter().find(|wallet| wallet.is_evm())
}

/// Contract of the third-party wallet SDK: OTP auth, key custody and
/// transaction broadcast.
#[async_trait]
pub trait WalletSession: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn send_otp(&self, email: &str) -> Result<(), Self::Error>;
    async fn verify_otp(&self, code: &str) -> Result<(), Self::Error>;
    async fn resend_otp(&self) -> Result<(), Self::Error>;
    async fn logout(&self) -> Result<(), Self::Error>;

    /// Current wallet set, possibly empty while provisioning is in progress.
    fn user_wallets(&self) -> Vec<WalletRecord>;

    /// Live stream of full wallet-set snapshots taken after the call. Every
    /// subscriber sees every snapshot independently. The set held at
    /// subscription time is not replayed; read it with `user_wallets`.
    fn wallet_changes(&self) -> BoxStream<'static, Vec<WalletRecord>>;

    /// Signs and broadcasts; `None` when the SDK did not report a hash.
    async fn send_transaction(
        &self,
        request: &TransactionRequest,
        wallet: &WalletRecord,
    ) -> Result<Option<String>, Self::Error>;
}

/// Platform clipboard. Writes either succeed or are ignored.
pub trait Clipboard: Send + Sync {
    fn set_text(&self, label: &str, text: &str);
}
