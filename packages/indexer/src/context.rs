//! Indexer Context
//!
//! Holds the configuration and the shared store and ledger handles, and
//! builds each component from them.

use std::sync::Arc;

use crate::aggregator::{AggregatorSettings, MarketCapJob, MetricAggregator};
use crate::config::IndexerConfig;
use crate::decoder::{DecodeError, EventDecoder};
use crate::ledger::LedgerPort;
use crate::notifier::{AlertNotifier, AlertSink};
use crate::persister::EventPersister;
use crate::records::Keyspace;
use crate::scanner::{RangeScanner, ScanSettings};
use crate::store::KeyValueStore;

pub struct IndexerContext {
    pub config: IndexerConfig,
    pub store: Arc<dyn KeyValueStore>,
    pub ledger: Arc<dyn LedgerPort>,
    pub keys: Keyspace,
}

impl IndexerContext {
    pub fn new(
        config: IndexerConfig,
        store: Arc<dyn KeyValueStore>,
        ledger: Arc<dyn LedgerPort>,
    ) -> Self {
        let keys = Keyspace::new(config.namespace.clone());
        Self {
            config,
            store,
            ledger,
            keys,
        }
    }

    /// Build the range scanner, parsing the configured event declaration
    pub fn scanner(&self) -> Result<RangeScanner, DecodeError> {
        let scan = &self.config.scan;
        let decoder = EventDecoder::new(
            &scan.event_signature,
            &scan.key_argument,
            &scan.paired_argument,
        )?;
        let persister = EventPersister::new(self.store.clone(), self.keys.clone(), scan.event_ttl);

        Ok(RangeScanner::new(
            self.ledger.clone(),
            self.store.clone(),
            decoder,
            persister,
            self.keys.clone(),
            ScanSettings::from(scan),
        ))
    }

    pub fn aggregator(&self) -> MetricAggregator {
        MetricAggregator::new(
            self.ledger.clone(),
            self.store.clone(),
            self.keys.clone(),
            AggregatorSettings::from(&self.config.pricing),
        )
    }

    pub fn notifier(&self, sink: Arc<dyn AlertSink>) -> AlertNotifier {
        AlertNotifier::new(
            self.store.clone(),
            sink,
            self.keys.clone(),
            self.config.alert.cooldown,
        )
    }

    /// Aggregator and notifier wired together as one periodic job
    pub fn market_cap_job(&self, sink: Arc<dyn AlertSink>) -> MarketCapJob {
        MarketCapJob::new(self.aggregator(), self.notifier(sink))
    }
}
