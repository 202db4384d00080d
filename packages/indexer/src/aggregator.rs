//! Metric Aggregator
//!
//! Prices every discovered token and estimates its market cap. One pass:
//!
//! 1. Enumerate live event records and pick each token's quote asset
//! 2. Resolve name, symbol and pool for all tokens concurrently
//! 3. Resolve `token0` and reserves of every pool concurrently
//! 4. Convert the reserve ratio to USD (through the oracle for base-quoted pools)
//!
//! A failed read only drops the token it concerns from the pass.

use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PricingConfig;
use crate::ledger::LedgerPort;
use crate::notifier::{AlertNotifier, MarketCapAlert, NotifyOutcome};
use crate::pricing::{
    asset_label, market_cap, oracle_price, reserve_ratio_price, usd_price, QuoteAsset,
    ReferenceAssets,
};
use crate::records::{EventRecord, Keyspace, VersionedRecord};
use crate::scheduler::{Job, JobError};
use crate::store::{KeyValueStore, StoreError};

/// Errors that abort a whole pass
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Addresses and constants used for pricing
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub factory: Address,
    pub references: ReferenceAssets,
    pub oracle: Address,
    pub total_supply: f64,
    pub threshold_usd: f64,
}

impl From<&PricingConfig> for AggregatorSettings {
    fn from(config: &PricingConfig) -> Self {
        Self {
            factory: config.factory,
            references: ReferenceAssets::new(config.base_asset, config.stable_assets),
            oracle: config.oracle,
            total_supply: config.total_supply,
            threshold_usd: config.threshold_usd,
        }
    }
}

/// Priced state of one token in one pass
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub entity: Address,
    pub name: String,
    pub symbol: String,
    pub quote: QuoteAsset,
    pub pair: Address,
    pub price_usd: f64,
    pub market_cap_usd: f64,
    /// Market cap is at or above the alert threshold
    pub crosses_threshold: bool,
}

impl MetricSnapshot {
    pub fn to_alert(&self) -> MarketCapAlert {
        MarketCapAlert {
            entity: self.entity,
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            price_usd: self.price_usd,
            market_cap_usd: self.market_cap_usd,
        }
    }
}

/// Token with its pool resolved
struct PooledToken {
    entity: Address,
    name: String,
    symbol: String,
    quote: QuoteAsset,
    pair: Address,
}

pub struct MetricAggregator {
    ledger: Arc<dyn LedgerPort>,
    store: Arc<dyn KeyValueStore>,
    keys: Keyspace,
    settings: AggregatorSettings,
}

impl MetricAggregator {
    pub fn new(
        ledger: Arc<dyn LedgerPort>,
        store: Arc<dyn KeyValueStore>,
        keys: Keyspace,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            ledger,
            store,
            keys,
            settings,
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Price every live token, in key order
    pub async fn aggregate(&self) -> Result<Vec<MetricSnapshot>, AggregateError> {
        let tokens = self.discovered_tokens().await?;
        if tokens.is_empty() {
            debug!("No tokens to price");
            return Ok(Vec::new());
        }

        let pooled = self.resolve_pools(&tokens).await;
        let snapshots = self.price(pooled).await;

        info!(
            "Priced {} of {} tokens, {} at or above {} USD",
            snapshots.len(),
            tokens.len(),
            snapshots.iter().filter(|s| s.crosses_threshold).count(),
            self.settings.threshold_usd
        );
        Ok(snapshots)
    }

    /// Live event records as `(token, quote asset)` pairs
    async fn discovered_tokens(&self) -> Result<Vec<(Address, QuoteAsset)>, AggregateError> {
        let keys = self.store.scan_prefix(&self.keys.event_prefix()).await?;
        let mut tokens = Vec::with_capacity(keys.len());

        for key in keys {
            let Some(entity) = self.keys.entity_from_event_key(&key) else {
                warn!("Ignoring malformed event key {}", key);
                continue;
            };
            // Expired between SCAN and GET
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match EventRecord::decode(&raw) {
                Ok(record) => {
                    tokens.push((entity, self.settings.references.classify(&record.paired_token)))
                }
                Err(e) => warn!("Skipping unreadable record {}: {}", key, e),
            }
        }
        Ok(tokens)
    }

    async fn resolve_pools(&self, tokens: &[(Address, QuoteAsset)]) -> Vec<PooledToken> {
        let ledger = &self.ledger;
        let factory = self.settings.factory;

        let (names, symbols, pairs) = futures::join!(
            join_all(tokens.iter().map(|(entity, _)| ledger.token_name(*entity))),
            join_all(tokens.iter().map(|(entity, _)| ledger.token_symbol(*entity))),
            join_all(
                tokens
                    .iter()
                    .map(|(entity, quote)| ledger.get_pair(factory, *entity, quote.address()))
            ),
        );

        let mut pooled = Vec::with_capacity(tokens.len());
        for (((&(entity, quote), name), symbol), pair) in
            tokens.iter().zip(names).zip(symbols).zip(pairs)
        {
            let (name, symbol, pair) = match (name, symbol, pair) {
                (Ok(name), Ok(symbol), Ok(pair)) => (name, symbol, pair),
                (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                    warn!("Skipping {:#x}: lookup failed: {}", entity, e);
                    continue;
                }
            };
            if pair == Address::ZERO {
                info!(
                    "{:#x} has no pool against {}",
                    entity,
                    asset_label(&quote.address())
                );
                continue;
            }
            pooled.push(PooledToken {
                entity,
                name,
                symbol,
                quote,
                pair,
            });
        }
        pooled
    }

    async fn price(&self, pooled: Vec<PooledToken>) -> Vec<MetricSnapshot> {
        let ledger = &self.ledger;
        let needs_oracle = pooled.iter().any(|token| !token.quote.is_stable());
        let oracle = self.settings.oracle;

        let (token0s, reserves, base_usd) = futures::join!(
            join_all(pooled.iter().map(|token| ledger.pair_token0(token.pair))),
            join_all(pooled.iter().map(|token| ledger.pair_reserves(token.pair))),
            async {
                if !needs_oracle {
                    return None;
                }
                match ledger.oracle_answer(oracle).await {
                    Ok(answer) => {
                        let price = oracle_price(answer);
                        if price.is_none() {
                            warn!("Oracle returned non-positive answer {}", answer);
                        }
                        price
                    }
                    Err(e) => {
                        warn!("Oracle read failed, skipping base-quoted tokens: {}", e);
                        None
                    }
                }
            },
        );

        let mut snapshots = Vec::with_capacity(pooled.len());
        for ((token, token0), reserves) in pooled.into_iter().zip(token0s).zip(reserves) {
            let (token0, reserves) = match (token0, reserves) {
                (Ok(token0), Ok(reserves)) => (token0, reserves),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Skipping {:#x}: pool {:#x} read failed: {}", token.entity, token.pair, e);
                    continue;
                }
            };

            let Some(quote_price) = reserve_ratio_price(token0 == token.entity, &reserves) else {
                warn!("Skipping {:#x}: pool {:#x} holds none of it", token.entity, token.pair);
                continue;
            };
            let Some(price_usd) = usd_price(token.quote, quote_price, base_usd) else {
                debug!("Skipping {:#x}: no base asset price this pass", token.entity);
                continue;
            };

            let market_cap_usd = market_cap(price_usd, self.settings.total_supply);
            snapshots.push(MetricSnapshot {
                entity: token.entity,
                name: token.name,
                symbol: token.symbol,
                quote: token.quote,
                pair: token.pair,
                price_usd,
                market_cap_usd,
                crosses_threshold: market_cap_usd >= self.settings.threshold_usd,
            });
        }
        snapshots
    }
}

/// Counters for one aggregate-and-alert pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassSummary {
    pub priced: usize,
    pub candidates: usize,
    pub delivered: usize,
    pub suppressed: usize,
    pub failed: usize,
}

/// Periodic job: aggregate, then alert on every candidate
pub struct MarketCapJob {
    aggregator: MetricAggregator,
    notifier: AlertNotifier,
}

impl MarketCapJob {
    pub fn new(aggregator: MetricAggregator, notifier: AlertNotifier) -> Self {
        Self {
            aggregator,
            notifier,
        }
    }

    /// Run one pass. A failed delivery is counted and the remaining
    /// candidates are still notified.
    pub async fn aggregate_and_alert(&self) -> Result<PassSummary, AggregateError> {
        let snapshots = self.aggregator.aggregate().await?;
        let mut summary = PassSummary {
            priced: snapshots.len(),
            ..Default::default()
        };

        for snapshot in snapshots.iter().filter(|s| s.crosses_threshold) {
            summary.candidates += 1;
            match self.notifier.notify(&snapshot.to_alert()).await {
                Ok(NotifyOutcome::Delivered) => summary.delivered += 1,
                Ok(NotifyOutcome::Suppressed) => summary.suppressed += 1,
                Err(e) => {
                    warn!("Alert for {:#x} failed: {}", snapshot.entity, e);
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }
}

#[async_trait]
impl Job for MarketCapJob {
    fn name(&self) -> &str {
        "market_cap"
    }

    async fn run(&self) -> Result<(), JobError> {
        let summary = self.aggregate_and_alert().await?;
        info!(
            "Market cap pass: {} priced, {} candidates, {} delivered, {} suppressed, {} failed",
            summary.priced, summary.candidates, summary.delivered, summary.suppressed, summary.failed
        );
        Ok(())
    }
}
