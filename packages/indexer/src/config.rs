//! Indexer Configuration
//!
//! Typed settings for the scan and market-cap loops. Defaults target the BSC
//! `LiquidityAdded` deployment; every value can be overridden through
//! `LPWATCH_*` environment variables (a `.env` file is loaded first when present).

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{address, Address};
use thiserror::Error;

/// Default key namespace
pub const DEFAULT_NAMESPACE: &str = "bsc";

/// Default Redis endpoint
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Contract emitting the scanned event
pub const DEFAULT_CONTRACT: Address = address!("5c952063c7fc8610FFDB798152D69F0B9550762b");

/// Human-readable declaration of the scanned event
pub const DEFAULT_EVENT_SIGNATURE: &str =
    "event LiquidityAdded(address token0, uint256 amount0, address token1, uint256 amount1)";

/// Event argument holding the token being tracked
pub const DEFAULT_KEY_ARGUMENT: &str = "token0";

/// Event argument holding the token it was paired with
pub const DEFAULT_PAIRED_ARGUMENT: &str = "token1";

/// First block scanned when no checkpoint exists
pub const DEFAULT_START_BLOCK: u64 = 49_887_922;

/// Maximum number of blocks covered by one `eth_getLogs` call
pub const DEFAULT_WINDOW_SIZE: u64 = 5_000;

pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_AGGREGATE_INTERVAL_SECS: u64 = 300;

/// Retention of discovered tokens (3 days)
pub const DEFAULT_EVENT_TTL_SECS: u64 = 259_200;

/// Minimum delay between two alerts for the same token
pub const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 3_600;

/// Expiry of the scan lock, in case a holder dies without releasing it
pub const DEFAULT_LOCK_TTL_SECS: u64 = 300;

pub const DEFAULT_ALERT_THRESHOLD_USD: f64 = 800_000.0;

/// Supply assumed for every token when estimating market cap
pub const DEFAULT_TOTAL_SUPPLY: f64 = 1_000_000_000.0;

pub const DEFAULT_WEBHOOK_URL: &str = "http://127.0.0.1:3000/sendMessage";

/// PancakeSwap V2 factory
pub const PANCAKE_FACTORY: Address = address!("cA143Ce32Fe78f1f7019d7d551a6402fC5350c73");
pub const WBNB: Address = address!("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c");
pub const USDT: Address = address!("55d398326f99059fF775485246999027B3197955");
pub const USD1: Address = address!("8d0D000Ee44948FC98c9B98A4FA4921476f08B0d");

/// Chainlink BNB/USD aggregator
pub const BNB_USD_PRICE_FEED: Address = address!("0567F2323251f0Aab15c8dFb1967E4e8A7D42aeE");

/// Errors raised while building the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required variable: {0}")]
    MissingVar(String),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidVar {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Networks with a known RPC environment variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Sepolia,
    Bsc,
    BscTestnet,
}

impl Network {
    /// Environment variable holding this network's RPC endpoint
    pub fn rpc_env_var(&self) -> &'static str {
        match self {
            Network::Mainnet => "MAINNET_NETWORK",
            Network::Sepolia => "SEPOLIA_NETWORK",
            Network::Bsc => "BSC_NETWORK",
            Network::BscTestnet => "BSCTEST_NETWORK",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Sepolia => "sepolia",
            Network::Bsc => "bsc",
            Network::BscTestnet => "bsctest",
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "sepolia" => Ok(Network::Sepolia),
            "bsc" => Ok(Network::Bsc),
            "bsctest" | "bsc-testnet" => Ok(Network::BscTestnet),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// Settings for the range scanner
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Contract emitting the event
    pub contract: Address,
    /// Solidity event declaration, e.g. `event Foo(address a, uint256 b)`
    pub event_signature: String,
    /// Name of the address argument used as the record key
    pub key_argument: String,
    /// Name of the address argument stored alongside the key
    pub paired_argument: String,
    /// First block scanned when no checkpoint exists
    pub start_block: u64,
    /// Maximum blocks per window
    pub window_size: u64,
    pub interval: Duration,
    pub event_ttl: Duration,
    pub lock_ttl: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            contract: DEFAULT_CONTRACT,
            event_signature: DEFAULT_EVENT_SIGNATURE.to_string(),
            key_argument: DEFAULT_KEY_ARGUMENT.to_string(),
            paired_argument: DEFAULT_PAIRED_ARGUMENT.to_string(),
            start_block: DEFAULT_START_BLOCK,
            window_size: DEFAULT_WINDOW_SIZE,
            interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS),
            event_ttl: Duration::from_secs(DEFAULT_EVENT_TTL_SECS),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
        }
    }
}

/// Settings for pricing and market-cap estimation
#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// Factory used for `getPair` lookups
    pub factory: Address,
    /// Wrapped native asset used as the fallback quote
    pub base_asset: Address,
    /// USD stablecoins priced at face value
    pub stable_assets: [Address; 2],
    /// Oracle returning the base asset's USD price scaled by 1e8
    pub oracle: Address,
    pub total_supply: f64,
    pub threshold_usd: f64,
    pub interval: Duration,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            factory: PANCAKE_FACTORY,
            base_asset: WBNB,
            stable_assets: [USDT, USD1],
            oracle: BNB_USD_PRICE_FEED,
            total_supply: DEFAULT_TOTAL_SUPPLY,
            threshold_usd: DEFAULT_ALERT_THRESHOLD_USD,
            interval: Duration::from_secs(DEFAULT_AGGREGATE_INTERVAL_SECS),
        }
    }
}

/// Settings for the alert webhook
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub webhook_url: String,
    pub cooldown: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: DEFAULT_WEBHOOK_URL.to_string(),
            cooldown: Duration::from_secs(DEFAULT_ALERT_COOLDOWN_SECS),
        }
    }
}

/// Complete process configuration
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub network: Network,
    /// RPC endpoint (http(s)://, ws(s):// or an IPC socket path)
    pub rpc_url: String,
    pub redis_url: String,
    /// Prefix for every key written to the store
    pub namespace: String,
    pub scan: ScanConfig,
    pub pricing: PricingConfig,
    pub alert: AlertConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            network: Network::Bsc,
            rpc_url: String::new(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            scan: ScanConfig::default(),
            pricing: PricingConfig::default(),
            alert: AlertConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Load from the process environment, reading `.env` first if it exists
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(network) = parse_var::<Network, _>(&lookup, "LPWATCH_NETWORK")? {
            config.network = network;
        }
        config.rpc_url = lookup("LPWATCH_RPC_URL")
            .or_else(|| lookup(config.network.rpc_env_var()))
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar(config.network.rpc_env_var().to_string()))?;

        if let Some(url) = lookup("LPWATCH_REDIS_URL") {
            config.redis_url = url;
        }
        if let Some(namespace) = lookup("LPWATCH_NAMESPACE") {
            config.namespace = namespace;
        }

        let scan = &mut config.scan;
        override_var(&lookup, "LPWATCH_CONTRACT", &mut scan.contract)?;
        if let Some(signature) = lookup("LPWATCH_EVENT_SIGNATURE") {
            scan.event_signature = signature;
        }
        if let Some(argument) = lookup("LPWATCH_KEY_ARGUMENT") {
            scan.key_argument = argument;
        }
        if let Some(argument) = lookup("LPWATCH_PAIRED_ARGUMENT") {
            scan.paired_argument = argument;
        }
        override_var(&lookup, "LPWATCH_START_BLOCK", &mut scan.start_block)?;
        override_var(&lookup, "LPWATCH_WINDOW_SIZE", &mut scan.window_size)?;
        override_secs(&lookup, "LPWATCH_SCAN_INTERVAL_SECS", &mut scan.interval)?;
        override_secs(&lookup, "LPWATCH_EVENT_TTL_SECS", &mut scan.event_ttl)?;
        override_secs(&lookup, "LPWATCH_LOCK_TTL_SECS", &mut scan.lock_ttl)?;

        let pricing = &mut config.pricing;
        override_var(&lookup, "LPWATCH_FACTORY", &mut pricing.factory)?;
        override_var(&lookup, "LPWATCH_BASE_ASSET", &mut pricing.base_asset)?;
        override_var(&lookup, "LPWATCH_STABLE_ASSET_A", &mut pricing.stable_assets[0])?;
        override_var(&lookup, "LPWATCH_STABLE_ASSET_B", &mut pricing.stable_assets[1])?;
        override_var(&lookup, "LPWATCH_ORACLE", &mut pricing.oracle)?;
        override_var(&lookup, "LPWATCH_TOTAL_SUPPLY", &mut pricing.total_supply)?;
        override_var(&lookup, "LPWATCH_ALERT_THRESHOLD_USD", &mut pricing.threshold_usd)?;
        override_secs(&lookup, "LPWATCH_AGGREGATE_INTERVAL_SECS", &mut pricing.interval)?;

        if let Some(url) = lookup("LPWATCH_WEBHOOK_URL") {
            config.alert.webhook_url = url;
        }
        override_secs(&lookup, "LPWATCH_ALERT_COOLDOWN_SECS", &mut config.alert.cooldown)?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::Invalid("namespace cannot be empty".to_string()));
        }
        if self.scan.window_size == 0 {
            return Err(ConfigError::Invalid("window size must be at least 1".to_string()));
        }
        if self.scan.interval.is_zero() || self.pricing.interval.is_zero() {
            return Err(ConfigError::Invalid("intervals must be non-zero".to_string()));
        }
        if self.scan.event_ttl.as_secs() == 0
            || self.scan.lock_ttl.as_secs() == 0
            || self.alert.cooldown.as_secs() == 0
        {
            return Err(ConfigError::Invalid("TTLs must be at least one second".to_string()));
        }
        if self.scan.key_argument == self.scan.paired_argument {
            return Err(ConfigError::Invalid(
                "key and paired arguments must differ".to_string(),
            ));
        }
        if self.pricing.stable_assets.contains(&self.pricing.base_asset) {
            return Err(ConfigError::Invalid(
                "base asset cannot also be a stable reference".to_string(),
            ));
        }
        if !(self.pricing.total_supply > 0.0) || !(self.pricing.threshold_usd > 0.0) {
            return Err(ConfigError::Invalid(
                "total supply and alert threshold must be positive".to_string(),
            ));
        }
        if self.alert.webhook_url.is_empty() {
            return Err(ConfigError::Invalid("webhook url cannot be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidVar {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn override_var<T, F>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = parse_var(lookup, key)? {
        *target = value;
    }
    Ok(())
}

fn override_secs<F>(lookup: &F, key: &str, target: &mut Duration) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(secs) = parse_var::<u64, _>(lookup, key)? {
        *target = Duration::from_secs(secs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_deployment() {
        let config = IndexerConfig::default();
        assert_eq!(config.namespace, "bsc");
        assert_eq!(config.scan.window_size, 5_000);
        assert_eq!(config.scan.start_block, 49_887_922);
        assert_eq!(config.scan.event_ttl, Duration::from_secs(259_200));
        assert_eq!(config.alert.cooldown, Duration::from_secs(3_600));
        assert_eq!(config.pricing.stable_assets, [USDT, USD1]);
        assert_eq!(config.pricing.base_asset, WBNB);
    }

    #[test]
    fn test_rpc_url_from_network_variable() {
        let config = IndexerConfig::from_lookup(lookup_from(&[(
            "BSC_NETWORK",
            "https://bsc.example.org",
        )]))
        .unwrap();
        assert_eq!(config.rpc_url, "https://bsc.example.org");
    }

    #[test]
    fn test_explicit_rpc_url_wins() {
        let config = IndexerConfig::from_lookup(lookup_from(&[
            ("BSC_NETWORK", "https://bsc.example.org"),
            ("LPWATCH_RPC_URL", "/tmp/node.ipc"),
        ]))
        .unwrap();
        assert_eq!(config.rpc_url, "/tmp/node.ipc");
    }

    #[test]
    fn test_network_selects_rpc_variable() {
        let config = IndexerConfig::from_lookup(lookup_from(&[
            ("LPWATCH_NETWORK", "sepolia"),
            ("BSC_NETWORK", "https://bsc.example.org"),
            ("SEPOLIA_NETWORK", "https://sepolia.example.org"),
        ]))
        .unwrap();
        assert_eq!(config.network, Network::Sepolia);
        assert_eq!(config.rpc_url, "https://sepolia.example.org");
    }

    #[test]
    fn test_missing_rpc_url_is_an_error() {
        let result = IndexerConfig::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(ConfigError::MissingVar(var)) if var == "BSC_NETWORK"));
    }

    #[test]
    fn test_numeric_and_address_overrides() {
        let config = IndexerConfig::from_lookup(lookup_from(&[
            ("BSC_NETWORK", "http://localhost:8545"),
            ("LPWATCH_WINDOW_SIZE", "100"),
            ("LPWATCH_START_BLOCK", "1000"),
            ("LPWATCH_SCAN_INTERVAL_SECS", "5"),
            ("LPWATCH_ALERT_THRESHOLD_USD", "1500.5"),
            ("LPWATCH_FACTORY", "0x0000000000000000000000000000000000000001"),
        ]))
        .unwrap();
        assert_eq!(config.scan.window_size, 100);
        assert_eq!(config.scan.start_block, 1000);
        assert_eq!(config.scan.interval, Duration::from_secs(5));
        assert_eq!(config.pricing.threshold_usd, 1500.5);
        assert_eq!(config.pricing.factory, Address::with_last_byte(1));
    }

    #[test]
    fn test_invalid_number_names_the_variable() {
        let result = IndexerConfig::from_lookup(lookup_from(&[
            ("BSC_NETWORK", "http://localhost:8545"),
            ("LPWATCH_WINDOW_SIZE", "lots"),
        ]));
        match result {
            Err(ConfigError::InvalidVar { key, value, .. }) => {
                assert_eq!(key, "LPWATCH_WINDOW_SIZE");
                assert_eq!(value, "lots");
            }
            other => panic!("expected InvalidVar, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = IndexerConfig::from_lookup(lookup_from(&[
            ("BSC_NETWORK", "http://localhost:8545"),
            ("LPWATCH_WINDOW_SIZE", "0"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_base_asset_cannot_be_stable() {
        let mut config = IndexerConfig::default();
        config.rpc_url = "http://localhost:8545".to_string();
        config.pricing.base_asset = USDT;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("BSC".parse::<Network>().unwrap(), Network::Bsc);
        assert_eq!("bsctest".parse::<Network>().unwrap(), Network::BscTestnet);
        assert_eq!(Network::Mainnet.rpc_env_var(), "MAINNET_NETWORK");
        assert!("solana".parse::<Network>().is_err());
    }
}
