//! In-memory collaborators shared by the controller tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy_primitives::U256;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{Notify, broadcast};

use crate::rpc::{RpcClient, RpcError};
use crate::send::TransactionRequest;
use crate::session::{Clipboard, WalletRecord, WalletSession};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MockError(pub String);

pub struct MockSession {
    wallets: Mutex<Vec<WalletRecord>>,
    changes: broadcast::Sender<Vec<WalletRecord>>,
    failures: Mutex<HashMap<&'static str, String>>,
    calls: Mutex<Vec<String>>,
    wallet_reads: AtomicUsize,
    sent: Mutex<Vec<(TransactionRequest, WalletRecord)>>,
    tx_hash: Mutex<Option<String>>,
}

impl Default for MockSession {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            wallets: Mutex::new(Vec::new()),
            changes,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            wallet_reads: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            tx_hash: Mutex::new(Some("0xfeed".to_string())),
        }
    }
}

impl MockSession {
    pub fn with_wallets(wallets: Vec<WalletRecord>) -> Self {
        let session = Self::default();
        *lock(&session.wallets) = wallets;
        session
    }

    /// Replaces the wallet set and notifies every subscriber.
    pub fn publish(&self, wallets: Vec<WalletRecord>) {
        *lock(&self.wallets) = wallets.clone();
        let _ = self.changes.send(wallets);
    }

    pub fn fail(&self, operation: &'static str, message: &str) {
        lock(&self.failures).insert(operation, message.to_string());
    }

    pub fn set_tx_hash(&self, hash: Option<&str>) {
        *lock(&self.tx_hash) = hash.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn wallet_reads(&self) -> usize {
        self.wallet_reads.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(TransactionRequest, WalletRecord)> {
        lock(&self.sent).clone()
    }

    fn record(&self, operation: &'static str) -> Result<(), MockError> {
        lock(&self.calls).push(operation.to_string());
        match lock(&self.failures).get(operation) {
            Some(message) => Err(MockError(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WalletSession for MockSession {
    type Error = MockError;

    async fn send_otp(&self, email: &str) -> Result<(), MockError> {
        lock(&self.calls).push(format!("email:{email}"));
        self.record("send_otp")
    }

    async fn verify_otp(&self, code: &str) -> Result<(), MockError> {
        lock(&self.calls).push(format!("code:{code}"));
        self.record("verify_otp")
    }

    async fn resend_otp(&self) -> Result<(), MockError> {
        self.record("resend_otp")
    }

    async fn logout(&self) -> Result<(), MockError> {
        self.record("logout")
    }

    fn user_wallets(&self) -> Vec<WalletRecord> {
        self.wallet_reads.fetch_add(1, Ordering::SeqCst);
        lock(&self.wallets).clone()
    }

    fn wallet_changes(&self) -> BoxStream<'static, Vec<WalletRecord>> {
        let receiver = self.changes.subscribe();
        futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(wallets) => return Some((wallets, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    async fn send_transaction(
        &self,
        request: &TransactionRequest,
        wallet: &WalletRecord,
    ) -> Result<Option<String>, MockError> {
        self.record("send_transaction")?;
        lock(&self.sent).push((request.clone(), wallet.clone()));
        Ok(lock(&self.tx_hash).clone())
    }
}

pub struct MockRpc {
    gas_price: Mutex<Result<u128, String>>,
    balance: Mutex<Result<U256, String>>,
    balance_gate: Mutex<Option<Arc<Notify>>>,
    balance_reads: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl Default for MockRpc {
    fn default() -> Self {
        Self {
            gas_price: Mutex::new(Ok(1_000_000_000)),
            balance: Mutex::new(Ok(U256::from(1_500_000_000_000_000_000_u128))),
            balance_gate: Mutex::new(None),
            balance_reads: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }
}

impl MockRpc {
    pub fn set_gas_price(&self, result: Result<u128, &str>) {
        *lock(&self.gas_price) = result.map_err(str::to_string);
    }

    pub fn set_balance(&self, result: Result<U256, &str>) {
        *lock(&self.balance) = result.map_err(str::to_string);
    }

    /// Holds the next balance call open until the returned handle is
    /// notified. Later calls return immediately.
    pub fn hold_next_balance(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.balance_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub fn balance_reads(&self) -> usize {
        self.balance_reads.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcClient for MockRpc {
    fn chain_id(&self) -> u64 {
        crate::config::SEPOLIA_CHAIN_ID
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        lock(&self.gas_price).clone().map_err(RpcError::Transport)
    }

    async fn balance(&self, _address: &str) -> Result<U256, RpcError> {
        self.balance_reads.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.balance_gate).take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        lock(&self.balance).clone().map_err(RpcError::Transport)
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockClipboard {
    entries: Mutex<Vec<(String, String)>>,
}

impl MockClipboard {
    pub fn entries(&self) -> Vec<(String, String)> {
        lock(&self.entries).clone()
    }
}

impl Clipboard for MockClipboard {
    fn set_text(&self, label: &str, text: &str) {
        lock(&self.entries).push((label.to_string(), text.to_string()));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
