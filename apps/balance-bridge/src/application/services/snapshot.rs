//! Account Snapshot Builder
//!
//! Fetches the raw balance list and the price table from the quote source
//! and values every balance in the configured quote currency.

use std::sync::Arc;

use crate::application::ports::{QuoteSource, QuoteSourceError};
use crate::domain::balance::{Snapshot, value_balances};

/// Builds quote-valued snapshots on demand.
///
/// Holds no state between calls; every build recomputes from scratch.
#[derive(Clone)]
pub struct AccountSnapshotBuilder {
    source: Arc<dyn QuoteSource>,
    quote_currency: String,
}

impl AccountSnapshotBuilder {
    /// Create a builder valuing balances in `quote_currency`.
    #[must_use]
    pub fn new(source: Arc<dyn QuoteSource>, quote_currency: impl Into<String>) -> Self {
        Self {
            source,
            quote_currency: quote_currency.into(),
        }
    }

    /// The quote currency used for valuation.
    #[must_use]
    pub fn quote_currency(&self) -> &str {
        &self.quote_currency
    }

    /// Build a fresh snapshot.
    ///
    /// Balances and prices are requested concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first `QuoteSourceError` from either request.
    pub async fn build(&self) -> Result<Snapshot, QuoteSourceError> {
        let (balances, prices) =
            tokio::try_join!(self.source.fetch_balances(), self.source.fetch_prices())?;

        let snapshot = value_balances(&balances, &prices, &self.quote_currency);

        tracing::debug!(
            raw_balances = balances.len(),
            prices = prices.len(),
            assets = snapshot.len(),
            "Snapshot built"
        );

        Ok(snapshot)
    }
}

impl std::fmt::Debug for AccountSnapshotBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSnapshotBuilder")
            .field("quote_currency", &self.quote_currency)
            .finish_non_exhaustive()
    }
}
