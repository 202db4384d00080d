//! Pricing
//!
//! Pure price math for the market-cap pass: picking the quote asset a token is
//! priced against, reserve-ratio spot prices and oracle scaling.

use std::collections::HashMap;
use std::sync::LazyLock;

use alloy::primitives::{Address, I256};

use crate::config::{WBNB, USD1, USDT};
use crate::ledger::Reserves;

/// Decimals of a Chainlink USD answer
pub const ORACLE_DECIMALS: i32 = 8;

/// Display labels for well-known quote assets
static KNOWN_ASSETS: LazyLock<HashMap<Address, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    map.insert(WBNB, "WBNB");
    map.insert(USDT, "USDT");
    map.insert(USD1, "USD1");
    map
});

/// Label for a quote asset, falling back to its address
pub fn asset_label(asset: &Address) -> String {
    KNOWN_ASSETS
        .get(asset)
        .map(|label| label.to_string())
        .unwrap_or_else(|| format!("{:#x}", asset))
}

/// Asset a token is priced against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuoteAsset {
    /// USD stablecoin, priced at face value
    Stable(Address),
    /// Base network asset, converted to USD through the oracle
    Base(Address),
}

impl QuoteAsset {
    pub fn address(&self) -> Address {
        match self {
            QuoteAsset::Stable(address) | QuoteAsset::Base(address) => *address,
        }
    }

    pub fn is_stable(&self) -> bool {
        matches!(self, QuoteAsset::Stable(_))
    }
}

/// The base asset and the stablecoins recognised as USD quotes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceAssets {
    pub base: Address,
    pub stables: [Address; 2],
}

impl ReferenceAssets {
    pub fn new(base: Address, stables: [Address; 2]) -> Self {
        Self { base, stables }
    }

    /// Quote asset for a token first seen paired with `paired`.
    ///
    /// Tokens paired with one of the stablecoins are quoted against it; every
    /// other token is quoted against the base asset.
    pub fn classify(&self, paired: &Address) -> QuoteAsset {
        // Address equality is byte equality, so checksum casing cannot matter.
        match self.stables.iter().find(|stable| *stable == paired) {
            Some(stable) => QuoteAsset::Stable(*stable),
            None => QuoteAsset::Base(self.base),
        }
    }
}

/// Price of the token in quote units from pool reserves
///
/// # Arguments
/// * `token_is_token0` - Whether the priced token is the pool's `token0`
/// * `reserves` - Pool reserves
///
/// # Returns
/// `None` when the token's own reserve is zero
pub fn reserve_ratio_price(token_is_token0: bool, reserves: &Reserves) -> Option<f64> {
    let (token_side, quote_side) = if token_is_token0 {
        (reserves.reserve0, reserves.reserve1)
    } else {
        (reserves.reserve1, reserves.reserve0)
    };
    if token_side == 0 {
        return None;
    }
    Some(quote_side as f64 / token_side as f64)
}

/// USD price of the base asset from a raw oracle answer
///
/// Returns `None` for non-positive answers.
pub fn oracle_price(answer: I256) -> Option<f64> {
    if !answer.is_positive() {
        return None;
    }
    let raw: f64 = answer.to_string().parse().ok()?;
    Some(raw / 10f64.powi(ORACLE_DECIMALS))
}

/// Convert a quote-denominated price to USD
///
/// Returns `None` for base-quoted prices when no oracle price is available.
pub fn usd_price(quote: QuoteAsset, quote_price: f64, base_usd: Option<f64>) -> Option<f64> {
    match quote {
        QuoteAsset::Stable(_) => Some(quote_price),
        QuoteAsset::Base(_) => base_usd.map(|usd| quote_price * usd),
    }
}

pub fn market_cap(price_usd: f64, total_supply: f64) -> f64 {
    price_usd * total_supply
}
