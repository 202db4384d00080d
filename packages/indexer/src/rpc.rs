//! RPC Connection Module
//!
//! Connects to a blockchain node over HTTP, WebSocket or an IPC socket and
//! retries the initial connection with exponential backoff, either up to an
//! attempt budget or until the node answers.

use std::path::Path;
use std::time::Duration;

use alloy::providers::{ProviderBuilder, RootProvider};
use alloy::transports::BoxTransport;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Default attempt budget for a bounded connection
pub const MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Initial backoff delay between attempts
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay between attempts
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Errors that can occur while connecting to the node
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("RPC endpoint cannot be empty")]
    EmptyEndpoint,

    #[error("IPC socket not found at path: {0}")]
    SocketNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Max connection attempts ({0}) exceeded")]
    MaxConnectAttemptsExceeded(u32),
}

/// Configuration for the RPC connection
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// http(s)://, ws(s):// URL or IPC socket path
    pub endpoint: String,
    /// `None` retries until connected
    pub max_connect_attempts: Option<u32>,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
}

impl RpcConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_connect_attempts: Some(MAX_CONNECT_ATTEMPTS),
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }

    /// Same endpoint, retried until the node answers
    pub fn unbounded(self) -> Self {
        Self {
            max_connect_attempts: None,
            ..self
        }
    }

    /// Delay before retry number `attempt + 1`, doubling up to `max_backoff_ms`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let doubled = self.initial_backoff_ms.saturating_mul(1 << attempt.min(10));
        Duration::from_millis(doubled.min(self.max_backoff_ms))
    }
}

/// Resolve a leading `~/` against the home directory
pub fn expand_path(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(relative), Some(home)) => home.join(relative).to_string_lossy().into_owned(),
        _ => path.to_string(),
    }
}

/// Whether the endpoint names an IPC socket rather than a URL
pub fn is_ipc_endpoint(endpoint: &str) -> bool {
    !endpoint.contains("://")
}

/// RPC connection manager with retry support
pub struct RpcConnection {
    config: RpcConfig,
    attempts: u32,
}

impl RpcConnection {
    pub fn new(config: RpcConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self::new(RpcConfig::new(endpoint))
    }

    /// Endpoint with `~` expanded for IPC paths
    pub fn endpoint(&self) -> String {
        if is_ipc_endpoint(&self.config.endpoint) {
            expand_path(&self.config.endpoint)
        } else {
            self.config.endpoint.clone()
        }
    }

    /// Number of failed attempts since the last success
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempt a single connection
    pub async fn connect(&mut self) -> Result<RootProvider<BoxTransport>, RpcError> {
        let endpoint = self.endpoint();
        if endpoint.trim().is_empty() {
            return Err(RpcError::EmptyEndpoint);
        }
        if is_ipc_endpoint(&endpoint) && !Path::new(&endpoint).exists() {
            return Err(RpcError::SocketNotFound(endpoint));
        }

        let provider = ProviderBuilder::new()
            .on_builtin(&endpoint)
            .await
            .map_err(|e| RpcError::ConnectionFailed(e.to_string()))?;

        self.attempts = 0;
        info!("Connected to RPC endpoint {}", redact(&endpoint));
        Ok(provider)
    }

    /// Connect, retrying with exponential backoff
    ///
    /// Returns a provider if successful, or an error once the attempt budget is spent.
    /// Without a budget only an empty endpoint is an error.
    pub async fn connect_with_retry(&mut self) -> Result<RootProvider<BoxTransport>, RpcError> {
        loop {
            match self.connect().await {
                Ok(provider) => return Ok(provider),
                Err(RpcError::EmptyEndpoint) => return Err(RpcError::EmptyEndpoint),
                Err(e) => {
                    self.attempts += 1;
                    error!("Connection attempt {} failed: {}", self.attempts, e);
                }
            }

            if let Some(max) = self.config.max_connect_attempts {
                if self.attempts >= max {
                    return Err(RpcError::MaxConnectAttemptsExceeded(max));
                }
            }

            let delay = self.config.backoff_delay(self.attempts - 1);
            warn!(
                "Retrying RPC connection (attempt {}), waiting {:?}",
                self.attempts + 1,
                delay
            );
            sleep(delay).await;
        }
    }
}

/// Strip the path and query of a URL, which often carry API keys
fn redact(endpoint: &str) -> String {
    match endpoint.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.split(['/', '?']).next().unwrap_or_default();
            format!("{}://{}", scheme, host)
        }
        None => endpoint.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== RpcConfig tests ====================

    #[test]
    fn test_rpc_config_new() {
        let config = RpcConfig::new("http://localhost:8545");
        assert_eq!(config.endpoint, "http://localhost:8545");
        assert_eq!(config.max_connect_attempts, Some(MAX_CONNECT_ATTEMPTS));
        assert_eq!(config.clone().unbounded().max_connect_attempts, None);
        assert_eq!(config.initial_backoff_ms, INITIAL_BACKOFF_MS);
        assert_eq!(config.max_backoff_ms, MAX_BACKOFF_MS);
    }

    #[test]
    fn test_rpc_config_backoff_delay() {
        let config = RpcConfig::new("http://localhost:8545");

        let delays: Vec<u64> = (0..5)
            .map(|attempt| config.backoff_delay(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_600]);
    }

    #[test]
    fn test_rpc_config_backoff_delay_caps_at_max() {
        let config = RpcConfig {
            max_backoff_ms: 2_500,
            ..RpcConfig::new("http://localhost:8545")
        };

        assert_eq!(config.backoff_delay(4), Duration::from_millis(1_600));
        assert_eq!(config.backoff_delay(5), Duration::from_millis(2_500));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_millis(2_500));
    }

    // ==================== endpoint tests ====================

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = expand_path("~/node/bsc.ipc");
        assert!(!expanded.starts_with("~/"));
        assert!(expanded.contains("node/bsc.ipc"));
    }

    #[test]
    fn test_expand_path_tilde_in_middle() {
        assert_eq!(expand_path("/data/~bsc/geth.ipc"), "/data/~bsc/geth.ipc");
    }

    #[test]
    fn test_is_ipc_endpoint() {
        assert!(is_ipc_endpoint("/var/run/geth.ipc"));
        assert!(is_ipc_endpoint("~/.bsc/geth.ipc"));
        assert!(!is_ipc_endpoint("https://bsc-dataseed.binance.org"));
        assert!(!is_ipc_endpoint("wss://bsc.example.org/ws"));
    }

    #[test]
    fn test_url_endpoint_not_expanded() {
        let conn = RpcConnection::with_endpoint("http://localhost:8545");
        assert_eq!(conn.endpoint(), "http://localhost:8545");
        assert_eq!(conn.attempts(), 0);
    }

    #[test]
    fn test_redact_hides_api_key() {
        assert_eq!(
            redact("https://bsc.example.org/v3/secret-key?x=1"),
            "https://bsc.example.org"
        );
        assert_eq!(redact("/tmp/geth.ipc"), "/tmp/geth.ipc");
    }

    // ==================== connect tests ====================

    #[tokio::test]
    async fn test_connect_to_missing_socket() {
        let mut conn = RpcConnection::with_endpoint("/nonexistent/path.ipc");
        let result = conn.connect().await;
        assert!(matches!(result, Err(RpcError::SocketNotFound(_))));
    }

    #[tokio::test]
    async fn test_connect_empty_endpoint() {
        let mut conn = RpcConnection::with_endpoint("");
        let result = conn.connect_with_retry().await;
        assert!(matches!(result, Err(RpcError::EmptyEndpoint)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_gives_up() {
        let mut conn = RpcConnection::new(RpcConfig {
            max_connect_attempts: Some(3),
            ..RpcConfig::new("/nonexistent/path.ipc")
        });
        let result = conn.connect_with_retry().await;
        assert!(matches!(result, Err(RpcError::MaxConnectAttemptsExceeded(3))));
        assert_eq!(conn.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_retry_outlasts_attempt_budget() {
        let mut conn = RpcConnection::new(RpcConfig::new("/nonexistent/path.ipc").unbounded());

        let result =
            tokio::time::timeout(Duration::from_secs(3_600), conn.connect_with_retry()).await;

        assert!(result.is_err(), "retry loop should still be running");
        assert!(conn.attempts() > MAX_CONNECT_ATTEMPTS);
    }
}
