//! Alert Notifier
//!
//! Posts market-cap alerts to a webhook, at most once per token per cooldown.
//! A marker key with the cooldown as TTL is written after each successful
//! delivery; while it lives, further alerts for that token are suppressed.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::records::{current_timestamp_millis, AlertMarker, Keyspace, RecordError, VersionedRecord};
use crate::store::{KeyValueStore, StoreError};

/// Request timeout for webhook deliveries
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Errors that can occur while notifying
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned status {0}")]
    Status(u16),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),
}

/// JSON body posted to the webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub message: String,
}

/// Destination for alert messages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, message: &WebhookMessage) -> Result<(), NotifyError>;
}

/// [`AlertSink`] that POSTs JSON to an HTTP endpoint
pub struct HttpWebhook {
    client: reqwest::Client,
    url: String,
}

impl HttpWebhook {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertSink for HttpWebhook {
    async fn deliver(&self, message: &WebhookMessage) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(message).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// A token whose market cap crossed the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct MarketCapAlert {
    pub entity: Address,
    pub name: String,
    pub symbol: String,
    pub price_usd: f64,
    pub market_cap_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Delivered,
    /// A previous alert is still within its cooldown
    Suppressed,
}

/// Format a market cap as `x.xxM` or `x.xxK`
pub fn format_market_cap(market_cap: f64) -> String {
    if market_cap >= 1_000_000.0 {
        format!("{:.2}M", market_cap / 1_000_000.0)
    } else {
        format!("{:.2}K", market_cap / 1_000.0)
    }
}

/// Render the webhook message for an alert
///
/// The price is printed in plain decimal notation, never as an exponent.
pub fn format_message(alert: &MarketCapAlert) -> String {
    format!(
        "Name : {} \nSymbol : {} \nAddress : {} \nPrice : {} USD \nMarket Cap : {} USD",
        alert.name,
        alert.symbol,
        alert.entity,
        alert.price_usd,
        format_market_cap(alert.market_cap_usd)
    )
}

pub struct AlertNotifier {
    store: Arc<dyn KeyValueStore>,
    sink: Arc<dyn AlertSink>,
    keys: Keyspace,
    cooldown: Duration,
}

impl AlertNotifier {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn AlertSink>,
        keys: Keyspace,
        cooldown: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            keys,
            cooldown,
        }
    }

    /// Deliver an alert unless one was sent for the same token within the cooldown
    pub async fn notify(&self, alert: &MarketCapAlert) -> Result<NotifyOutcome, NotifyError> {
        let key = self.keys.alert(&alert.entity);
        if self.store.exists(&key).await? {
            debug!("Alert for {} suppressed by {}", alert.entity, key);
            return Ok(NotifyOutcome::Suppressed);
        }

        let message = WebhookMessage {
            message: format_message(alert),
        };
        self.sink.deliver(&message).await?;
        info!(
            "Alert delivered for {} ({}), market cap {} USD",
            alert.symbol,
            alert.entity,
            format_market_cap(alert.market_cap_usd)
        );

        // The message is already out; a lost marker only risks a repeat alert.
        let marker = AlertMarker::new(current_timestamp_millis()).encode()?;
        if let Err(e) = self.store.set(&key, &marker, Some(self.cooldown)).await {
            error!("Failed to write alert marker {}: {}", key, e);
        }
        Ok(NotifyOutcome::Delivered)
    }
}
