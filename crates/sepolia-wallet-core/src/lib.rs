#![cfg_attr(test, allow(clippy::expect_used))]

pub mod auth;
pub mod config;
pub mod rpc;
pub mod send;
pub mod session;
pub mod units;
pub mod wallet;

#[cfg(test)]
mod test_support;

pub use auth::{AuthController, AuthError, AuthState};
pub use config::{ConfigError, RetryPolicy, SEPOLIA_CHAIN_ID, WalletConfig};
pub use rpc::{JsonRpcClient, RpcClient, RpcError, network_label};
pub use send::{FeePolicy, SendController, SendError, SendState, TransactionRequest};
pub use session::{Clipboard, WalletRecord, WalletSession, first_evm_wallet, is_evm_chain};
pub use units::{AmountError, eth_to_wei, wei_to_eth_plain};
pub use wallet::{WalletController, WalletError, WalletState};
