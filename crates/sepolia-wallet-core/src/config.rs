use std::env;
use std::time::Duration;

use thiserror::Error;

pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
pub const DEFAULT_RPC_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_PROVISIONING_TIMEOUT_MS: u64 = 30_000;

pub const ENV_RPC_URL: &str = "SEPOLIA_WALLET_RPC_URL";
pub const ENV_CHAIN_ID: &str = "SEPOLIA_WALLET_CHAIN_ID";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "SEPOLIA_WALLET_CONNECT_TIMEOUT_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "SEPOLIA_WALLET_REQUEST_TIMEOUT_MS";
pub const ENV_PROVISIONING_TIMEOUT_MS: &str = "SEPOLIA_WALLET_PROVISIONING_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("rpc url must not be empty")]
    EmptyRpcUrl,
    #[error("rpc url must use http:// or https:// and include a host")]
    InvalidRpcUrl,
    #[error("invalid {name}: {message}")]
    InvalidNumber { name: &'static str, message: String },
}

/// Manual reload schedule. Attempt `n` (n >= 1) waits
/// `min(base_delay * max(min_multiplier, n), max_delay)` before running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub min_multiplier: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 9,
            base_delay: Duration::from_millis(500),
            min_multiplier: 2,
            max_delay: Duration::from_millis(5_000),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = attempt.max(self.min_multiplier);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub provisioning_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            chain_id: SEPOLIA_CHAIN_ID,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            provisioning_timeout: Duration::from_millis(DEFAULT_PROVISIONING_TIMEOUT_MS),
            retry: RetryPolicy::default(),
        }
    }
}

impl WalletConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let rpc_url = match env_non_empty(ENV_RPC_URL) {
            Some(raw) => normalize_rpc_url(&raw)?,
            None => DEFAULT_RPC_URL.to_string(),
        };
        let chain_id = parse_u64_env(ENV_CHAIN_ID, SEPOLIA_CHAIN_ID)?;
        let connect_timeout_ms = parse_u64_env(ENV_CONNECT_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS)?;
        let request_timeout_ms = parse_u64_env(ENV_REQUEST_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS)?;
        let provisioning_timeout_ms =
            parse_u64_env(ENV_PROVISIONING_TIMEOUT_MS, DEFAULT_PROVISIONING_TIMEOUT_MS)?;

        Ok(Self {
            rpc_url,
            chain_id,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            request_timeout: Duration::from_millis(request_timeout_ms),
            provisioning_timeout: Duration::from_millis(provisioning_timeout_ms),
            retry: RetryPolicy::default(),
        })
    }
}

pub fn normalize_rpc_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyRpcUrl);
    }
    let Some((scheme, remainder)) = trimmed.split_once("://") else {
        return Err(ConfigError::InvalidRpcUrl);
    };
    if scheme != "http" && scheme != "https" {
        return Err(ConfigError::InvalidRpcUrl);
    }
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(ConfigError::InvalidRpcUrl);
    }
    Ok(trimmed.to_string())
}

fn parse_u64_env(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env_non_empty(name) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|error| ConfigError::InvalidNumber {
                name,
                message: format!("{raw}: {error}"),
            }),
        None => Ok(default),
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const ALL_KEYS: [&str; 5] = [
        ENV_RPC_URL,
        ENV_CHAIN_ID,
        ENV_CONNECT_TIMEOUT_MS,
        ENV_REQUEST_TIMEOUT_MS,
        ENV_PROVISIONING_TIMEOUT_MS,
    ];

    fn with_env<T>(overrides: &[(&str, &str)], test: impl FnOnce() -> T) -> T {
        let lock = ENV_LOCK.get_or_init(|| Mutex::new(()));
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let previous = ALL_KEYS
            .iter()
            .map(|key| (*key, env::var(key).ok()))
            .collect::<Vec<_>>();
        for key in ALL_KEYS {
            unsafe { env::remove_var(key) };
        }
        for (key, value) in overrides {
            unsafe { env::set_var(key, value) };
        }

        let result = test();

        for (key, value) in previous {
            match value {
                Some(value) => unsafe { env::set_var(key, value) },
                None => unsafe { env::remove_var(key) },
            }
        }
        result
    }

    #[test]
    fn retry_delays_follow_capped_schedule() {
        let policy = RetryPolicy::default();
        let delays = (0..policy.max_attempts)
            .map(|attempt| policy.delay_for_attempt(attempt).as_millis())
            .collect::<Vec<_>>();
        assert_eq!(
            delays,
            vec![0, 1_000, 1_000, 1_500, 2_000, 2_500, 3_000, 3_500, 4_000]
        );
        assert_eq!(policy.delay_for_attempt(40).as_millis(), 5_000);
    }

    #[test]
    fn normalize_rpc_url_trims_and_drops_trailing_slash() {
        let normalized = normalize_rpc_url(" https://rpc.sepolia.org/ ").expect("valid url");
        assert_eq!(normalized, "https://rpc.sepolia.org");
    }

    #[test]
    fn normalize_rpc_url_requires_http_scheme_and_host() {
        assert_eq!(
            normalize_rpc_url("rpc.sepolia.org"),
            Err(ConfigError::InvalidRpcUrl)
        );
        assert_eq!(
            normalize_rpc_url("ws://rpc.sepolia.org"),
            Err(ConfigError::InvalidRpcUrl)
        );
        assert_eq!(normalize_rpc_url("https://"), Err(ConfigError::InvalidRpcUrl));
        assert_eq!(normalize_rpc_url("  "), Err(ConfigError::EmptyRpcUrl));
    }

    #[test]
    fn from_env_defaults_to_sepolia() {
        with_env(&[], || {
            let config = WalletConfig::from_env().expect("default config");
            assert_eq!(config, WalletConfig::default());
            assert_eq!(config.chain_id, SEPOLIA_CHAIN_ID);
            assert_eq!(config.provisioning_timeout, Duration::from_secs(30));
        });
    }

    #[test]
    fn from_env_reads_overrides() {
        with_env(
            &[
                (ENV_RPC_URL, "http://127.0.0.1:8545/"),
                (ENV_CHAIN_ID, "31337"),
                (ENV_REQUEST_TIMEOUT_MS, "2500"),
                (ENV_PROVISIONING_TIMEOUT_MS, " "),
            ],
            || {
                let config = WalletConfig::from_env().expect("env config");
                assert_eq!(config.rpc_url, "http://127.0.0.1:8545");
                assert_eq!(config.chain_id, 31_337);
                assert_eq!(config.request_timeout, Duration::from_millis(2_500));
                assert_eq!(config.provisioning_timeout, Duration::from_secs(30));
            },
        );
    }

    #[test]
    fn from_env_names_the_malformed_variable() {
        with_env(&[(ENV_CONNECT_TIMEOUT_MS, "soon")], || {
            let error = WalletConfig::from_env().expect_err("expected invalid number");
            assert!(matches!(
                error,
                ConfigError::InvalidNumber {
                    name: ENV_CONNECT_TIMEOUT_MS,
                    ..
                }
            ));
        });
    }
}
