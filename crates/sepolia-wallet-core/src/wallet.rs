//! Wallet reconciliation: turns a live, possibly empty wallet set plus an
//! on-demand balance read into one authoritative [`WalletState`].
//!
//! Two triggers feed the same commit step: the session's wallet-change
//! stream and the manual retry path (`load_wallet` / `refresh`). A load only
//! commits while the state is still `Loading`, so whichever trigger lands
//! first wins and a stale result never replaces a `Loaded` state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use alloy_primitives::U256;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{RetryPolicy, WalletConfig};
use crate::rpc::{RpcClient, network_label};
use crate::session::{Clipboard, WalletRecord, WalletSession, first_evm_wallet};
use crate::units::wei_to_eth_plain;

pub const WALLET_ADDRESS_CLIPBOARD_LABEL: &str = "Wallet address";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletState {
    Loading,
    Loaded {
        address: String,
        network: String,
        balance_eth: String,
    },
    Error {
        message: String,
    },
}

impl WalletState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Loaded { .. } => "loaded",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("wallet creation timed out")]
    ProvisioningTimedOut,
    #[error("failed to load wallet")]
    LoadFailed,
}

impl From<WalletError> for WalletState {
    fn from(error: WalletError) -> Self {
        Self::Error {
            message: error.to_string(),
        }
    }
}

/// Single slot for the provisioning timeout. Every arm or cancel bumps
/// `generation`; a firing timer acts only if its generation is current.
#[derive(Debug, Default)]
struct ProvisioningTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

struct Inner<S, R> {
    session: Arc<S>,
    rpc: Arc<R>,
    clipboard: Arc<dyn Clipboard>,
    provisioning_timeout: Duration,
    retry: RetryPolicy,
    state: watch::Sender<WalletState>,
    refreshing: watch::Sender<bool>,
    timer: Mutex<ProvisioningTimer>,
}

pub struct WalletController<S: WalletSession, R: RpcClient> {
    inner: Arc<Inner<S, R>>,
    subscription: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl<S: WalletSession, R: RpcClient> WalletController<S, R> {
    /// Subscribes to wallet-set changes immediately, then reconciles the
    /// wallet set the session already holds before handling any change.
    /// Must be called from within a Tokio runtime.
    pub fn new(
        session: Arc<S>,
        rpc: Arc<R>,
        clipboard: Arc<dyn Clipboard>,
        config: &WalletConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            session,
            rpc,
            clipboard,
            provisioning_timeout: config.provisioning_timeout,
            retry: config.retry,
            state: watch::Sender::new(WalletState::Loading),
            refreshing: watch::Sender::new(false),
            timer: Mutex::new(ProvisioningTimer::default()),
        });

        let mut changes = inner.session.wallet_changes();
        let subscriber = Arc::clone(&inner);
        let subscription = tokio::spawn(async move {
            let current = subscriber.session.user_wallets();
            subscriber.on_wallets_changed(current).await;
            while let Some(wallets) = changes.next().await {
                subscriber.on_wallets_changed(wallets).await;
            }
            tracing::debug!("wallet change stream ended");
        });

        Self {
            inner,
            subscription: Mutex::new(Some(subscription)),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> WalletState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WalletState> {
        self.inner.state.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        *self.inner.refreshing.borrow()
    }

    pub fn subscribe_refreshing(&self) -> watch::Receiver<bool> {
        self.inner.refreshing.subscribe()
    }

    pub fn provisioning_timer_armed(&self) -> bool {
        lock(&self.inner.timer)
            .handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// First EVM record in the session's current wallet set.
    pub fn evm_wallet(&self) -> Option<WalletRecord> {
        first_evm_wallet(&self.inner.session.user_wallets()).cloned()
    }

    /// Manual reload with the capped backoff schedule.
    pub async fn load_wallet(&self) -> WalletState {
        self.inner.load_with_retry().await
    }

    pub async fn refresh(&self) -> WalletState {
        self.inner.refreshing.send_replace(true);
        self.inner.load_with_retry().await
    }

    /// Exports the loaded address. Returns `false` when nothing is loaded.
    pub fn copy_address(&self) -> bool {
        let WalletState::Loaded { address, .. } = self.state() else {
            return false;
        };
        self.inner
            .clipboard
            .set_text(WALLET_ADDRESS_CLIPBOARD_LABEL, &address);
        true
    }

    /// Logs out once; `on_complete` runs whether or not logout succeeded.
    pub async fn logout<F: FnOnce()>(&self, on_complete: F) {
        if let Err(error) = self.inner.session.logout().await {
            tracing::warn!(%error, "logout failed");
        }
        on_complete();
    }

    /// Stops the subscription, cancels the provisioning timer and releases
    /// the RPC connection. Only the first call has any effect.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(subscription) = lock(&self.subscription).take() {
            subscription.abort();
        }
        self.inner.cancel_provisioning_timeout();
        self.inner.rpc.shutdown();
        tracing::debug!("wallet controller disposed");
    }
}

impl<S: WalletSession, R: RpcClient> Drop for WalletController<S, R> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<S: WalletSession, R: RpcClient> Inner<S, R> {
    async fn on_wallets_changed(self: &Arc<Self>, wallets: Vec<WalletRecord>) {
        let evm_wallet = first_evm_wallet(&wallets);
        if let Some(address) = evm_wallet.and_then(WalletRecord::evm_address) {
            self.cancel_provisioning_timeout();
            self.reconcile(address.to_string()).await;
            return;
        }

        if evm_wallet.is_some() {
            // Record exists but its key has not been derived yet.
            self.cancel_provisioning_timeout();
        }
        let awaiting = !*self.refreshing.borrow() && *self.state.borrow() == WalletState::Loading;
        if awaiting {
            self.start_provisioning_timeout();
        }
    }

    async fn reconcile(&self, address: String) {
        let mut proceed = false;
        self.state.send_if_modified(|state| match state {
            WalletState::Loading => {
                proceed = true;
                false
            }
            WalletState::Error { .. } => {
                proceed = true;
                *state = WalletState::Loading;
                true
            }
            WalletState::Loaded { .. } => false,
        });
        if !proceed {
            tracing::debug!(%address, "wallet already loaded; ignoring change notification");
            return;
        }

        let balance = self.fetch_balance(&address).await;
        self.commit_loaded(address, balance);
        self.refreshing.send_replace(false);
    }

    async fn load_with_retry(&self) -> WalletState {
        self.cancel_provisioning_timeout();

        for attempt in 0..self.retry.max_attempts {
            self.state.send_replace(WalletState::Loading);
            self.refreshing.send_replace(true);

            let delay = self.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let wallets = self.session.user_wallets();
            let Some(address) = first_evm_wallet(&wallets)
                .and_then(WalletRecord::evm_address)
                .map(str::to_string)
            else {
                tracing::debug!(attempt, "no provisioned EVM wallet yet");
                continue;
            };

            let balance = self.fetch_balance(&address).await;
            self.commit_loaded(address, balance);
            self.refreshing.send_replace(false);
            return self.state.borrow().clone();
        }

        tracing::warn!(
            attempts = self.retry.max_attempts,
            "no EVM wallet after retries"
        );
        self.state.send_replace(WalletError::LoadFailed.into());
        self.refreshing.send_replace(false);
        self.state.borrow().clone()
    }

    /// Balance read failures degrade to zero rather than an error state.
    async fn fetch_balance(&self, address: &str) -> U256 {
        match self.rpc.balance(address).await {
            Ok(balance) => balance,
            Err(error) => {
                tracing::warn!(%error, %address, "balance fetch failed; showing zero");
                U256::ZERO
            }
        }
    }

    fn commit_loaded(&self, address: String, balance: U256) {
        let loaded = WalletState::Loaded {
            address,
            network: network_label(self.rpc.chain_id()),
            balance_eth: wei_to_eth_plain(balance),
        };
        let committed = self.state.send_if_modified(|state| {
            if *state == WalletState::Loading {
                *state = loaded;
                true
            } else {
                false
            }
        });
        if committed {
            tracing::info!("wallet loaded");
        } else {
            tracing::debug!("state moved on during load; discarding result");
        }
    }

    fn start_provisioning_timeout(self: &Arc<Self>) {
        let mut timer = lock(&self.timer);
        if let Some(previous) = timer.handle.take() {
            previous.abort();
        }
        timer.generation = timer.generation.wrapping_add(1);
        let generation = timer.generation;
        let timeout = self.provisioning_timeout;
        let weak: Weak<Self> = Arc::downgrade(self);
        timer.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_provisioning_timeout(generation);
            }
        }));
        tracing::debug!(generation, ?timeout, "provisioning timeout armed");
    }

    fn cancel_provisioning_timeout(&self) {
        let mut timer = lock(&self.timer);
        if let Some(handle) = timer.handle.take() {
            handle.abort();
            tracing::debug!(generation = timer.generation, "provisioning timeout cancelled");
        }
        timer.generation = timer.generation.wrapping_add(1);
    }

    fn on_provisioning_timeout(&self, generation: u64) {
        let mut timer = lock(&self.timer);
        if timer.generation != generation {
            return;
        }
        timer.handle = None;
        let expired = self.state.send_if_modified(|state| {
            if *state == WalletState::Loading {
                *state = WalletError::ProvisioningTimedOut.into();
                true
            } else {
                false
            }
        });
        if expired {
            tracing::warn!("wallet provisioning timed out");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
