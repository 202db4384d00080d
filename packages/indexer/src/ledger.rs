//! Ledger Query Port
//!
//! Every read the indexer makes against the chain goes through [`LedgerPort`]:
//! head height, event logs, and the handful of view calls needed for pricing.
//! [`AlloyLedger`] implements it over an alloy provider.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, TxHash, B256, I256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::sol;
use alloy::sol_types::SolCall;
use alloy::transports::{BoxTransport, TransportError};
use async_trait::async_trait;
use thiserror::Error;

sol! {
    interface IERC20Metadata {
        function name() external view returns (string);
        function symbol() external view returns (string);
    }

    interface IPancakeFactory {
        function getPair(address tokenA, address tokenB) external view returns (address pair);
    }

    interface IPancakePair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
        function token0() external view returns (address);
    }

    interface IPriceFeed {
        function latestAnswer() external view returns (int256 answer);
    }
}

/// Errors raised by ledger reads
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("ABI error: {0}")]
    Abi(#[from] alloy::sol_types::Error),

    #[error("Conversion error: {0}")]
    Conversion(String),
}

/// A log as returned by `eth_getLogs`, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// `None` for logs of pending blocks
    pub block_number: Option<u64>,
    pub transaction_hash: Option<TxHash>,
    pub log_index: Option<u64>,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

impl From<Log> for RawEvent {
    fn from(log: Log) -> Self {
        Self {
            block_number: log.block_number,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data,
        }
    }
}

/// Inclusive block range query for one event of one contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    /// Topic 0 of the event
    pub signature: B256,
    pub from_block: u64,
    pub to_block: u64,
}

/// Pool reserves as reported by `getReserves()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reserves {
    pub reserve0: u128,
    pub reserve1: u128,
}

/// Chain reads used by the scanner and the aggregator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerPort: Send + Sync {
    /// Current chain head height
    async fn head_height(&self) -> Result<u64, LedgerError>;

    /// Logs matching `query`, bounds inclusive
    async fn get_logs(&self, query: LogQuery) -> Result<Vec<RawEvent>, LedgerError>;

    async fn token_name(&self, token: Address) -> Result<String, LedgerError>;

    async fn token_symbol(&self, token: Address) -> Result<String, LedgerError>;

    /// Pool for a token pair, or the zero address if none exists
    async fn get_pair(
        &self,
        factory: Address,
        token_a: Address,
        token_b: Address,
    ) -> Result<Address, LedgerError>;

    async fn pair_token0(&self, pair: Address) -> Result<Address, LedgerError>;

    async fn pair_reserves(&self, pair: Address) -> Result<Reserves, LedgerError>;

    /// Raw `latestAnswer()` of a price feed
    async fn oracle_answer(&self, feed: Address) -> Result<I256, LedgerError>;
}

/// [`LedgerPort`] backed by an alloy provider
#[derive(Clone)]
pub struct AlloyLedger {
    provider: RootProvider<BoxTransport>,
}

impl AlloyLedger {
    pub fn new(provider: RootProvider<BoxTransport>) -> Self {
        Self { provider }
    }

    /// Perform an `eth_call` and decode its return data
    async fn read<C>(&self, to: Address, call: C) -> Result<C::Return, LedgerError>
    where
        C: SolCall + Send,
        C::Return: Send,
    {
        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(call.abi_encode());
        let output = self.provider.call(&tx).await?;
        Ok(C::abi_decode_returns(&output, true)?)
    }
}

#[async_trait]
impl LedgerPort for AlloyLedger {
    async fn head_height(&self) -> Result<u64, LedgerError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn get_logs(&self, query: LogQuery) -> Result<Vec<RawEvent>, LedgerError> {
        let filter = Filter::new()
            .address(query.address)
            .event_signature(query.signature)
            .from_block(query.from_block)
            .to_block(query.to_block);
        let logs = self.provider.get_logs(&filter).await?;
        Ok(logs.into_iter().map(RawEvent::from).collect())
    }

    async fn token_name(&self, token: Address) -> Result<String, LedgerError> {
        Ok(self.read(token, IERC20Metadata::nameCall {}).await?._0)
    }

    async fn token_symbol(&self, token: Address) -> Result<String, LedgerError> {
        Ok(self.read(token, IERC20Metadata::symbolCall {}).await?._0)
    }

    async fn get_pair(
        &self,
        factory: Address,
        token_a: Address,
        token_b: Address,
    ) -> Result<Address, LedgerError> {
        let call = IPancakeFactory::getPairCall {
            tokenA: token_a,
            tokenB: token_b,
        };
        Ok(self.read(factory, call).await?.pair)
    }

    async fn pair_token0(&self, pair: Address) -> Result<Address, LedgerError> {
        Ok(self.read(pair, IPancakePair::token0Call {}).await?._0)
    }

    async fn pair_reserves(&self, pair: Address) -> Result<Reserves, LedgerError> {
        let reserves = self.read(pair, IPancakePair::getReservesCall {}).await?;
        Ok(Reserves {
            reserve0: reserves.reserve0.to::<u128>(),
            reserve1: reserves.reserve1.to::<u128>(),
        })
    }

    async fn oracle_answer(&self, feed: Address) -> Result<I256, LedgerError> {
        Ok(self.read(feed, IPriceFeed::latestAnswerCall {}).await?.answer)
    }
}
