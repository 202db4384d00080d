//! lpwatch Indexer Library
//!
//! This crate scans a contract's liquidity events in checkpointed block windows,
//! records every token it discovers in Redis, periodically prices those tokens
//! against their pools and posts a webhook alert when a token's market cap
//! crosses a threshold.

pub mod aggregator;
pub mod config;
pub mod context;
pub mod decoder;
pub mod ledger;
pub mod notifier;
pub mod persister;
pub mod pricing;
pub mod records;
pub mod redis_store;
pub mod rpc;
pub mod scanner;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use aggregator::{MarketCapJob, MetricAggregator, MetricSnapshot, PassSummary};
pub use config::IndexerConfig;
pub use context::IndexerContext;
pub use decoder::{DecodedEvent, EventDecoder};
pub use ledger::{AlloyLedger, LedgerPort, RawEvent, Reserves};
pub use notifier::{AlertNotifier, AlertSink, HttpWebhook, NotifyOutcome};
pub use redis_store::RedisStore;
pub use scanner::{RangeScanner, ScanOutcome, ScannedRange};
pub use scheduler::{Job, Scheduler};
pub use store::{KeyValueStore, MemoryStore};
