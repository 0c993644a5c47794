#![expect(clippy::print_stdout, reason = "command output goes to stdout")]
#![cfg_attr(test, allow(clippy::panic))]

use alloy_primitives::U256;
use anyhow::{Context, Result, ensure};
use clap::{Parser, Subcommand};
use sepolia_wallet_core::config::normalize_rpc_url;
use sepolia_wallet_core::send::{
    FeePolicy, TransactionRequest, is_plausible_address, validate_transfer,
};
use sepolia_wallet_core::{JsonRpcClient, RpcClient, WalletConfig, network_label, wei_to_eth_plain};
use serde_json::{Value, json};

#[derive(Parser, Debug)]
#[command(name = "sepolia-wallet")]
#[command(about = "Read balances and quote transfers on Sepolia")]
pub struct SepoliaWalletCli {
    /// JSON-RPC endpoint. Overrides SEPOLIA_WALLET_RPC_URL.
    #[arg(long, global = true)]
    pub rpc_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Show the ETH balance of an address
    Balance { address: String },
    /// Show the current gas price and the fee caps derived from it
    GasPrice,
    /// Build the transfer request that would be handed to the wallet for signing
    Quote {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
    },
}

pub fn resolve_config(rpc_url: Option<&str>) -> Result<WalletConfig> {
    let mut config = WalletConfig::from_env().context("load wallet config from environment")?;
    if let Some(raw) = rpc_url {
        config.rpc_url = normalize_rpc_url(raw).context("parse --rpc-url")?;
    }
    Ok(config)
}

pub async fn run() -> Result<()> {
    let cli = SepoliaWalletCli::parse();
    let config = resolve_config(cli.rpc_url.as_deref())?;
    let rpc = JsonRpcClient::new(&config).context("build rpc client")?;
    tracing::debug!(endpoint = rpc.endpoint(), "using rpc endpoint");

    let output = execute(&rpc, cli.command).await;
    rpc.shutdown();
    println!("{}", serde_json::to_string_pretty(&output?)?);
    Ok(())
}

pub async fn execute<R: RpcClient>(rpc: &R, command: Commands) -> Result<Value> {
    match command {
        Commands::Balance { address } => {
            let wei = rpc
                .balance(&address)
                .await
                .with_context(|| format!("fetch balance for {address}"))?;
            Ok(balance_report(rpc.chain_id(), &address, wei))
        }
        Commands::GasPrice => {
            let gas_price = rpc.gas_price().await.context("fetch gas price")?;
            let fees = FeePolicy::from_gas_price(gas_price);
            Ok(json!({
                "network": network_label(rpc.chain_id()),
                "gasPrice": gas_price.to_string(),
                "fees": fees,
            }))
        }
        Commands::Quote { from, to, amount } => {
            let value = validate_quote(&from, &to, &amount)?;
            let gas_price = rpc.gas_price().await.context("fetch gas price")?;
            let request = quote_transfer(gas_price, &from, &to, value);
            Ok(serde_json::to_value(request)?)
        }
    }
}

fn balance_report(chain_id: u64, address: &str, wei: U256) -> Value {
    json!({
        "address": address,
        "network": network_label(chain_id),
        "balanceEth": wei_to_eth_plain(wei),
        "balanceWei": wei.to_string(),
    })
}

/// Sender shape plus the same recipient and amount checks the send
/// controller applies. Returns the amount in wei.
fn validate_quote(from: &str, to: &str, amount: &str) -> Result<U256> {
    ensure!(is_plausible_address(from), "invalid sender address: {from}");
    Ok(validate_transfer(to, amount)?)
}

fn quote_transfer(gas_price: u128, from: &str, to: &str, value: U256) -> TransactionRequest {
    FeePolicy::from_gas_price(gas_price).transfer(from, to, value)
}
