//! Range Scanner
//!
//! Walks the chain in bounded windows starting after the stored checkpoint,
//! persists every matching event and only then advances the checkpoint.
//! A failed window leaves the checkpoint untouched so the next run retries it.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ScanConfig;
use crate::decoder::EventDecoder;
use crate::ledger::{LedgerError, LedgerPort, LogQuery};
use crate::persister::{EventPersister, PersistError};
use crate::records::{current_timestamp_millis, Checkpoint, Keyspace, RecordError, VersionedRecord};
use crate::scheduler::{Job, JobError};
use crate::store::{KeyValueStore, StoreError};

/// Errors that abort a scan without moving the checkpoint
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Corrupt checkpoint: {0}")]
    Checkpoint(#[from] RecordError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Checkpoint changed concurrently (expected {expected:?})")]
    CheckpointConflict { expected: Option<u64> },
}

/// Window bounds and lock settings
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub contract: Address,
    /// First block when no checkpoint exists
    pub start_block: u64,
    /// Maximum blocks per window, at least 1
    pub window_size: u64,
    pub lock_ttl: Duration,
}

impl From<&ScanConfig> for ScanSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            contract: config.contract,
            start_block: config.start_block,
            window_size: config.window_size,
            lock_ttl: config.lock_ttl,
        }
    }
}

/// A window that was scanned and committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedRange {
    pub from: u64,
    pub to: u64,
    /// Logs returned by the node
    pub events_found: usize,
    pub events_stored: usize,
    /// Logs that failed to decode or fell outside the window
    pub events_skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The head has not reached the next block to scan
    UpToDate { next_start: u64, head: u64 },
    /// Another scanner holds the lock
    Skipped,
    Scanned(ScannedRange),
}

/// Compute the next window to scan
///
/// # Arguments
/// * `checkpoint` - Last committed block, if any
/// * `start_block` - First block when there is no checkpoint
/// * `window_size` - Maximum number of blocks in the window
/// * `head` - Current chain head
///
/// # Returns
/// Inclusive `(from, to)` bounds, or `None` when there is nothing to scan
pub fn next_window(
    checkpoint: Option<u64>,
    start_block: u64,
    window_size: u64,
    head: u64,
) -> Option<(u64, u64)> {
    let from = next_start(checkpoint, start_block)?;
    let to = from
        .saturating_add(window_size.max(1) - 1)
        .min(head);
    (from <= to).then_some((from, to))
}

/// First block after the checkpoint, `None` once the checkpoint is at `u64::MAX`
fn next_start(checkpoint: Option<u64>, start_block: u64) -> Option<u64> {
    match checkpoint {
        Some(height) => height.checked_add(1),
        None => Some(start_block),
    }
}

pub struct RangeScanner {
    ledger: Arc<dyn LedgerPort>,
    store: Arc<dyn KeyValueStore>,
    decoder: EventDecoder,
    persister: EventPersister,
    keys: Keyspace,
    settings: ScanSettings,
}

impl RangeScanner {
    pub fn new(
        ledger: Arc<dyn LedgerPort>,
        store: Arc<dyn KeyValueStore>,
        decoder: EventDecoder,
        persister: EventPersister,
        keys: Keyspace,
        settings: ScanSettings,
    ) -> Self {
        Self {
            ledger,
            store,
            decoder,
            persister,
            keys,
            settings,
        }
    }

    /// Last committed block, if any
    pub async fn checkpoint(&self) -> Result<Option<u64>, ScanError> {
        let raw = self.store.get(&self.keys.checkpoint()).await?;
        Ok(parse_checkpoint(raw.as_deref())?)
    }

    /// Scan the next window under the scan lock
    pub async fn scan(&self) -> Result<ScanOutcome, ScanError> {
        let lock_key = self.keys.scan_lock();
        let token = format!("{}:{}", std::process::id(), current_timestamp_millis());

        if !self
            .store
            .try_lock(&lock_key, &token, self.settings.lock_ttl)
            .await?
        {
            info!("Scan lock {} is held elsewhere, skipping", lock_key);
            return Ok(ScanOutcome::Skipped);
        }

        let result = self.scan_locked().await;

        match self.store.unlock(&lock_key, &token).await {
            Ok(true) => {}
            Ok(false) => warn!("Scan lock {} expired before release", lock_key),
            Err(e) => warn!("Failed to release scan lock {}: {}", lock_key, e),
        }
        result
    }

    async fn scan_locked(&self) -> Result<ScanOutcome, ScanError> {
        let checkpoint_key = self.keys.checkpoint();
        let stored = self.store.get(&checkpoint_key).await?;
        let checkpoint = parse_checkpoint(stored.as_deref())?;

        let head = self.ledger.head_height().await?;
        let Some((from, to)) = next_window(
            checkpoint,
            self.settings.start_block,
            self.settings.window_size,
            head,
        ) else {
            let next_start = next_start(checkpoint, self.settings.start_block).unwrap_or(u64::MAX);
            info!("No new blocks to scan (next {}, head {})", next_start, head);
            return Ok(ScanOutcome::UpToDate { next_start, head });
        };

        info!("Scanning blocks {} to {}", from, to);
        let logs = self
            .ledger
            .get_logs(LogQuery {
                address: self.settings.contract,
                signature: self.decoder.selector(),
                from_block: from,
                to_block: to,
            })
            .await?;

        let mut events = Vec::with_capacity(logs.len());
        let mut skipped = 0;
        for raw in &logs {
            match self.decoder.decode(raw) {
                Ok(event) if (from..=to).contains(&event.block_number) => events.push(event),
                Ok(event) => {
                    warn!(
                        "Ignoring event at block {} outside window {}..={} (tx {:#x})",
                        event.block_number, from, to, event.transaction_hash
                    );
                    skipped += 1;
                }
                Err(e) => {
                    warn!(
                        "Skipping undecodable log at block {:?} (tx {:?}): {}",
                        raw.block_number, raw.transaction_hash, e
                    );
                    skipped += 1;
                }
            }
        }

        let summary = self.persister.persist(&events).await?;

        let advanced = self
            .store
            .compare_and_set(
                &checkpoint_key,
                stored.as_deref(),
                &Checkpoint::new(to).encode()?,
            )
            .await?;
        if !advanced {
            return Err(ScanError::CheckpointConflict {
                expected: checkpoint,
            });
        }

        info!(
            "Scanned blocks {} to {}: {} found, {} stored, {} skipped",
            from,
            to,
            logs.len(),
            summary.stored,
            skipped
        );
        Ok(ScanOutcome::Scanned(ScannedRange {
            from,
            to,
            events_found: logs.len(),
            events_stored: summary.stored,
            events_skipped: skipped,
        }))
    }
}

fn parse_checkpoint(raw: Option<&str>) -> Result<Option<u64>, RecordError> {
    raw.map(Checkpoint::decode)
        .transpose()
        .map(|checkpoint| checkpoint.map(|c| c.last_scanned_height))
}

#[async_trait]
impl Job for RangeScanner {
    fn name(&self) -> &str {
        "scan"
    }

    async fn run(&self) -> Result<(), JobError> {
        self.scan().await?;
        Ok(())
    }
}
