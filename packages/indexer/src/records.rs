//! Persisted Records
//!
//! Typed, versioned values stored under the indexer's keyspace. Records are
//! JSON objects carrying a `v` schema version and are only (de)serialized at
//! the store boundary.

use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, TxHash};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current schema version written by this build
pub const SCHEMA_VERSION: u32 = 1;

/// Errors raised when a stored value cannot be turned back into a record
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported record version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// A record with a schema version
pub trait VersionedRecord: Serialize + DeserializeOwned {
    fn version(&self) -> u32;

    /// Serialize the record to JSON
    fn encode(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a record, rejecting versions this build does not understand
    fn decode(raw: &str) -> Result<Self, RecordError> {
        let record: Self = serde_json::from_str(raw)?;
        if record.version() != SCHEMA_VERSION {
            return Err(RecordError::UnsupportedVersion {
                found: record.version(),
                expected: SCHEMA_VERSION,
            });
        }
        Ok(record)
    }
}

/// Last block whose window was fully persisted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub v: u32,
    pub last_scanned_height: u64,
}

impl Checkpoint {
    pub fn new(last_scanned_height: u64) -> Self {
        Self {
            v: SCHEMA_VERSION,
            last_scanned_height,
        }
    }
}

/// A token discovered by the scanner.
///
/// Keyed by the token address; a later event for the same token overwrites
/// the record, so only the most recent observation is kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub v: u32,
    /// Block containing the event
    pub observed_at_block: u64,
    /// Transaction that emitted the event
    pub source_transaction: TxHash,
    /// Token the entity was paired with in the event
    pub paired_token: Address,
}

impl EventRecord {
    pub fn new(observed_at_block: u64, source_transaction: TxHash, paired_token: Address) -> Self {
        Self {
            v: SCHEMA_VERSION,
            observed_at_block,
            source_transaction,
            paired_token,
        }
    }
}

/// Marker suppressing repeat alerts until it expires
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlertMarker {
    pub v: u32,
    /// Unix time in milliseconds at which the alert was delivered
    pub issued_at_ms: u64,
}

impl AlertMarker {
    pub fn new(issued_at_ms: u64) -> Self {
        Self {
            v: SCHEMA_VERSION,
            issued_at_ms,
        }
    }
}

impl VersionedRecord for Checkpoint {
    fn version(&self) -> u32 {
        self.v
    }
}

impl VersionedRecord for EventRecord {
    fn version(&self) -> u32 {
        self.v
    }
}

impl VersionedRecord for AlertMarker {
    fn version(&self) -> u32 {
        self.v
    }
}

/// Key layout for one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    namespace: String,
}

impl Keyspace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn checkpoint(&self) -> String {
        format!("{}:scan:last_block", self.namespace)
    }

    pub fn scan_lock(&self) -> String {
        format!("{}:scan:lock", self.namespace)
    }

    /// Prefix shared by every event record
    pub fn event_prefix(&self) -> String {
        format!("{}:event:", self.namespace)
    }

    pub fn event(&self, entity: &Address) -> String {
        format!("{}{}", self.event_prefix(), format_address(*entity))
    }

    /// Recover the entity address from an event record key
    pub fn entity_from_event_key(&self, key: &str) -> Option<Address> {
        key.strip_prefix(&self.event_prefix())?.parse().ok()
    }

    pub fn alert(&self, entity: &Address) -> String {
        format!("{}:market_cap_alert:{}", self.namespace, format_address(*entity))
    }
}

/// Format an address as lowercase hex with 0x prefix
pub fn format_address(address: Address) -> String {
    format!("{:#x}", address)
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
