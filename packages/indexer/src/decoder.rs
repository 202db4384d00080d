//! Event Decoder
//!
//! Decodes raw logs of the configured event into discovery records. The event
//! is described by its Solidity declaration and two argument names: the key
//! argument (the tracked token) and the paired argument stored next to it.
//! Both arguments must be of type `address` and may be indexed or not.

use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::Event;
use alloy::primitives::{Address, TxHash, B256};
use thiserror::Error;

use crate::ledger::RawEvent;

/// Errors that can occur during event decoding
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid event signature '{signature}': {reason}")]
    InvalidSignature { signature: String, reason: String },

    #[error("Event has no argument named '{0}'")]
    UnknownArgument(String),

    #[error("Argument '{name}' has type {ty}, expected address")]
    NotAnAddress { name: String, ty: String },

    #[error("Log topic does not match event selector {expected}")]
    TopicMismatch { expected: B256 },

    #[error("Failed to decode log: {0}")]
    AbiDecode(String),

    #[error("Log has no block number")]
    MissingBlockNumber,

    #[error("Log has no transaction hash")]
    MissingTransactionHash,
}

/// Where an argument lives inside a log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgumentSlot {
    /// Nth indexed argument (topic N + 1)
    Indexed(usize),
    /// Nth non-indexed argument in the data section
    Body(usize),
}

/// One occurrence of the event, reduced to what gets persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    /// Token keyed by the record
    pub entity: Address,
    /// Token it was paired with
    pub paired_token: Address,
    pub block_number: u64,
    pub transaction_hash: TxHash,
}

/// Decoder for a single event declaration
#[derive(Debug, Clone)]
pub struct EventDecoder {
    event: Event,
    selector: B256,
    key: ArgumentSlot,
    paired: ArgumentSlot,
}

impl EventDecoder {
    /// Build a decoder from a declaration such as
    /// `event LiquidityAdded(address token0, uint256 amount0, address token1, uint256 amount1)`
    ///
    /// # Arguments
    /// * `signature` - Solidity event declaration (the `event` keyword is optional)
    /// * `key_argument` - Name of the address argument used as the record key
    /// * `paired_argument` - Name of the address argument stored in the record
    pub fn new(
        signature: &str,
        key_argument: &str,
        paired_argument: &str,
    ) -> Result<Self, DecodeError> {
        let event = Event::parse(signature).map_err(|e| DecodeError::InvalidSignature {
            signature: signature.to_string(),
            reason: e.to_string(),
        })?;
        if event.anonymous {
            return Err(DecodeError::InvalidSignature {
                signature: signature.to_string(),
                reason: "anonymous events have no selector to filter on".to_string(),
            });
        }

        let key = locate_address_argument(&event, key_argument)?;
        let paired = locate_address_argument(&event, paired_argument)?;
        let selector = event.selector();

        Ok(Self {
            event,
            selector,
            key,
            paired,
        })
    }

    /// Topic 0 of every matching log
    pub fn selector(&self) -> B256 {
        self.selector
    }

    pub fn event_name(&self) -> &str {
        &self.event.name
    }

    /// Decode a raw log into a [`DecodedEvent`]
    pub fn decode(&self, raw: &RawEvent) -> Result<DecodedEvent, DecodeError> {
        if raw.topics.first() != Some(&self.selector) {
            return Err(DecodeError::TopicMismatch {
                expected: self.selector,
            });
        }

        let decoded = self
            .event
            .decode_log_parts(raw.topics.iter().copied(), &raw.data, true)
            .map_err(|e| DecodeError::AbiDecode(e.to_string()))?;

        let entity = read_address(&decoded, self.key)?;
        let paired_token = read_address(&decoded, self.paired)?;

        Ok(DecodedEvent {
            entity,
            paired_token,
            block_number: raw.block_number.ok_or(DecodeError::MissingBlockNumber)?,
            transaction_hash: raw
                .transaction_hash
                .ok_or(DecodeError::MissingTransactionHash)?,
        })
    }
}

fn locate_address_argument(event: &Event, name: &str) -> Result<ArgumentSlot, DecodeError> {
    let mut indexed = 0;
    let mut body = 0;
    for input in &event.inputs {
        let slot = if input.indexed {
            ArgumentSlot::Indexed(indexed)
        } else {
            ArgumentSlot::Body(body)
        };
        if input.name == name {
            if input.ty != "address" {
                return Err(DecodeError::NotAnAddress {
                    name: name.to_string(),
                    ty: input.ty.clone(),
                });
            }
            return Ok(slot);
        }
        match slot {
            ArgumentSlot::Indexed(_) => indexed += 1,
            ArgumentSlot::Body(_) => body += 1,
        }
    }
    Err(DecodeError::UnknownArgument(name.to_string()))
}

fn read_address(
    decoded: &alloy::dyn_abi::DecodedEvent,
    slot: ArgumentSlot,
) -> Result<Address, DecodeError> {
    let value: Option<&DynSolValue> = match slot {
        ArgumentSlot::Indexed(i) => decoded.indexed.get(i),
        ArgumentSlot::Body(i) => decoded.body.get(i),
    };
    value
        .and_then(DynSolValue::as_address)
        .ok_or_else(|| DecodeError::AbiDecode(format!("no address at {:?}", slot)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_EVENT_SIGNATURE, USDT};
    use alloy::primitives::{address, b256, Bytes, U256};
    use alloy::sol;
    use alloy::sol_types::SolEvent;

    sol! {
        event LiquidityAdded(address token0, uint256 amount0, address token1, uint256 amount1);
        event Paired(address indexed token, address indexed quote, uint256 amount);
    }

    const TOKEN: Address = address!("1111111111111111111111111111111111111111");
    const TX: TxHash = b256!("1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef");

    fn liquidity_added_log(block: Option<u64>) -> RawEvent {
        let event = LiquidityAdded {
            token0: TOKEN,
            amount0: U256::from(1_000u64),
            token1: USDT,
            amount1: U256::from(2_000u64),
        };
        let data = event.encode_log_data();
        RawEvent {
            block_number: block,
            transaction_hash: Some(TX),
            log_index: Some(0),
            topics: data.topics().to_vec(),
            data: data.data,
        }
    }

    fn default_decoder() -> EventDecoder {
        EventDecoder::new(DEFAULT_EVENT_SIGNATURE, "token0", "token1").unwrap()
    }

    // ==================== EventDecoder::new tests ====================

    #[test]
    fn test_selector_matches_compiled_event() {
        assert_eq!(default_decoder().selector(), LiquidityAdded::SIGNATURE_HASH);
        assert_eq!(default_decoder().event_name(), "LiquidityAdded");
    }

    #[test]
    fn test_signature_without_event_keyword() {
        let decoder = EventDecoder::new(
            "LiquidityAdded(address token0, uint256 amount0, address token1, uint256 amount1)",
            "token0",
            "token1",
        )
        .unwrap();
        assert_eq!(decoder.selector(), LiquidityAdded::SIGNATURE_HASH);
    }

    #[test]
    fn test_invalid_signature() {
        let result = EventDecoder::new("event (((", "a", "b");
        assert!(matches!(result, Err(DecodeError::InvalidSignature { .. })));
    }

    #[test]
    fn test_unknown_argument() {
        let result = EventDecoder::new(DEFAULT_EVENT_SIGNATURE, "token0", "pair");
        assert!(matches!(result, Err(DecodeError::UnknownArgument(name)) if name == "pair"));
    }

    #[test]
    fn test_non_address_argument_rejected() {
        let result = EventDecoder::new(DEFAULT_EVENT_SIGNATURE, "amount0", "token1");
        assert!(matches!(result, Err(DecodeError::NotAnAddress { .. })));
    }

    // ==================== decode tests ====================

    #[test]
    fn test_decode_liquidity_added() {
        let decoded = default_decoder().decode(&liquidity_added_log(Some(100))).unwrap();
        assert_eq!(decoded.entity, TOKEN);
        assert_eq!(decoded.paired_token, USDT);
        assert_eq!(decoded.block_number, 100);
        assert_eq!(decoded.transaction_hash, TX);
    }

    #[test]
    fn test_decode_hand_encoded_payload() {
        let data = hex::decode(concat!(
            "0000000000000000000000001111111111111111111111111111111111111111",
            "00000000000000000000000000000000000000000000000000000000000003e8",
            "00000000000000000000000055d398326f99059ff775485246999027b3197955",
            "00000000000000000000000000000000000000000000000000000000000007d0",
        ))
        .unwrap();
        let raw = RawEvent {
            block_number: Some(7),
            transaction_hash: Some(TX),
            log_index: Some(1),
            topics: vec![LiquidityAdded::SIGNATURE_HASH],
            data: Bytes::from(data),
        };

        let decoded = default_decoder().decode(&raw).unwrap();
        assert_eq!(decoded.entity, TOKEN);
        assert_eq!(decoded.paired_token, USDT);
        assert_eq!(decoded.block_number, 7);
    }

    #[test]
    fn test_decode_with_swapped_roles() {
        let decoder = EventDecoder::new(DEFAULT_EVENT_SIGNATURE, "token1", "token0").unwrap();
        let decoded = decoder.decode(&liquidity_added_log(Some(1))).unwrap();
        assert_eq!(decoded.entity, USDT);
        assert_eq!(decoded.paired_token, TOKEN);
    }

    #[test]
    fn test_decode_indexed_arguments() {
        let decoder = EventDecoder::new(
            "event Paired(address indexed token, address indexed quote, uint256 amount)",
            "quote",
            "token",
        )
        .unwrap();
        let event = Paired {
            token: TOKEN,
            quote: USDT,
            amount: U256::from(5u64),
        };
        let data = event.encode_log_data();
        let raw = RawEvent {
            block_number: Some(7),
            transaction_hash: Some(TX),
            log_index: None,
            topics: data.topics().to_vec(),
            data: data.data,
        };

        let decoded = decoder.decode(&raw).unwrap();
        assert_eq!(decoded.entity, USDT);
        assert_eq!(decoded.paired_token, TOKEN);
    }

    #[test]
    fn test_decode_wrong_topic() {
        let mut raw = liquidity_added_log(Some(1));
        raw.topics[0] = B256::ZERO;
        let result = default_decoder().decode(&raw);
        assert!(matches!(result, Err(DecodeError::TopicMismatch { .. })));
    }

    #[test]
    fn test_decode_no_topics() {
        let mut raw = liquidity_added_log(Some(1));
        raw.topics.clear();
        assert!(default_decoder().decode(&raw).is_err());
    }

    #[test]
    fn test_decode_truncated_data() {
        let mut raw = liquidity_added_log(Some(1));
        raw.data = Bytes::from(raw.data[..40].to_vec());
        let result = default_decoder().decode(&raw);
        assert!(matches!(result, Err(DecodeError::AbiDecode(_))));
    }

    #[test]
    fn test_decode_pending_log_without_block() {
        let result = default_decoder().decode(&liquidity_added_log(None));
        assert!(matches!(result, Err(DecodeError::MissingBlockNumber)));
    }

    #[test]
    fn test_decode_missing_transaction_hash() {
        let mut raw = liquidity_added_log(Some(1));
        raw.transaction_hash = None;
        let result = default_decoder().decode(&raw);
        assert!(matches!(result, Err(DecodeError::MissingTransactionHash)));
    }
}
