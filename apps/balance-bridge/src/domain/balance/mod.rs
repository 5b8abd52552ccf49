//! Balance Valuation Types
//!
//! Raw exchange balances, the instrument price table, and the
//! quote-denominated snapshot that is fanned out to subscribers.
//!
//! # Valuation Rules
//!
//! For every raw balance, in exchange order:
//!
//! 1. Skip it when both `free` and `locked` are exactly zero.
//! 2. The quote asset itself passes through unconverted.
//! 3. Any other asset is multiplied by the price of `asset + quote`.
//! 4. Assets without such a price are omitted.
//!
//! Amounts arrive as decimal strings and are multiplied as [`Decimal`]; the
//! published values are `f64`.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

// =============================================================================
// Exchange Inputs
// =============================================================================

/// One entry of the account's raw balance list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBalance {
    /// Asset symbol (e.g. `BTC`).
    pub asset: String,
    /// Amount available for trading.
    pub free: Decimal,
    /// Amount locked in open orders.
    pub locked: Decimal,
}

impl RawBalance {
    /// Create a raw balance.
    #[must_use]
    pub fn new(asset: impl Into<String>, free: Decimal, locked: Decimal) -> Self {
        Self {
            asset: asset.into(),
            free,
            locked,
        }
    }

    /// Whether both amounts are exactly zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.free.is_zero() && self.locked.is_zero()
    }
}

/// Latest price of one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTicker {
    /// Instrument symbol (e.g. `BTCUSDT`).
    pub symbol: String,
    /// Last price in the instrument's quote asset.
    pub price: Decimal,
}

impl PriceTicker {
    /// Create a price ticker.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// An asset balance valued in the quote currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Asset symbol.
    pub asset: String,
    /// Free amount expressed in the quote currency.
    #[serde(rename = "free")]
    pub free_quote_value: f64,
    /// Locked amount expressed in the quote currency.
    #[serde(rename = "locked")]
    pub locked_quote_value: f64,
}

/// Best known account state as of the last processed event.
///
/// Serializes as a JSON array of `{asset, free, locked}` objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(Vec<Balance>);

impl Snapshot {
    /// Create a snapshot from valued balances.
    #[must_use]
    pub const fn new(balances: Vec<Balance>) -> Self {
        Self(balances)
    }

    /// The valued balances, in exchange order.
    #[must_use]
    pub fn balances(&self) -> &[Balance] {
        &self.0
    }

    /// Look up one asset.
    #[must_use]
    pub fn get(&self, asset: &str) -> Option<&Balance> {
        self.0.iter().find(|b| b.asset == asset)
    }

    /// Number of assets in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the snapshot holds no assets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize to the wire format sent to subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (non-finite values).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Valuation
// =============================================================================

/// Value raw balances in `quote_currency` using the given price table.
///
/// Never fails: assets that cannot be valued are left out.
#[must_use]
pub fn value_balances(raw: &[RawBalance], prices: &[PriceTicker], quote_currency: &str) -> Snapshot {
    let price_index: HashMap<&str, Decimal> = prices
        .iter()
        .map(|t| (t.symbol.as_str(), t.price))
        .collect();

    let mut seen = HashSet::new();
    let mut balances = Vec::with_capacity(raw.len());

    for entry in raw {
        if entry.is_empty() || !seen.insert(entry.asset.as_str()) {
            continue;
        }

        if entry.asset == quote_currency {
            balances.push(Balance {
                asset: entry.asset.clone(),
                free_quote_value: entry.free.to_f64().unwrap_or_default(),
                locked_quote_value: entry.locked.to_f64().unwrap_or_default(),
            });
            continue;
        }

        let symbol = format!("{}{quote_currency}", entry.asset);
        let Some(price) = price_index.get(symbol.as_str()) else {
            continue;
        };

        match (entry.free.checked_mul(*price), entry.locked.checked_mul(*price)) {
            (Some(free), Some(locked)) => balances.push(Balance {
                asset: entry.asset.clone(),
                free_quote_value: free.to_f64().unwrap_or_default(),
                locked_quote_value: locked.to_f64().unwrap_or_default(),
            }),
            _ => {
                tracing::warn!(asset = %entry.asset, %symbol, "Balance valuation overflowed, omitting asset");
            }
        }
    }

    Snapshot(balances)
}

// =============================================================================
// Tests
// =============================================================================
