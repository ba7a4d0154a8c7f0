/*
[INPUT]:  Order-book depth, ticker, and liquidity-pool reserves for a pair.
[OUTPUT]: One scalar price per pair (the "Price discovery" collaborator).
[POS]:    Transport layer - price aggregation, out of scope for the engine's
          own invariants. Kept thin on purpose.
[UPDATE]: When adding another source to the aggregation.
*/

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::connector::PriceOracle;
use crate::error::{ChainTransportError, Result};
use crate::types::Asset;

/// A single price observation plus its source, for averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Ticker,
    OrderBookMid,
    LiquidityPool,
}

#[derive(Debug, Clone, Copy)]
pub struct PriceObservation {
    pub source: PriceSource,
    pub price: Decimal,
}

/// Aggregates whichever sources are available into one scalar price by
/// unweighted average. A production deployment would weight by depth;
/// that refinement is a "price discovery" concern the engine treats as
/// external, so it isn't modeled here.
#[derive(Debug, Default)]
pub struct AggregatingPriceOracle {
    observations: std::sync::Mutex<Vec<PriceObservation>>,
}

impl AggregatingPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, source: PriceSource, price: Decimal) {
        self.observations
            .lock()
            .expect("price oracle mutex poisoned")
            .push(PriceObservation { source, price });
    }

    pub fn clear(&self) {
        self.observations
            .lock()
            .expect("price oracle mutex poisoned")
            .clear();
    }

    fn aggregate(&self) -> Option<Decimal> {
        let observations = self.observations.lock().expect("price oracle mutex poisoned");
        if observations.is_empty() {
            return None;
        }
        let sum: Decimal = observations.iter().map(|o| o.price).sum();
        Some(sum / Decimal::from(observations.len()))
    }
}

#[async_trait]
impl PriceOracle for AggregatingPriceOracle {
    async fn current_price(&self, base: &Asset, quote: &Asset) -> Result<Decimal> {
        self.aggregate().ok_or_else(|| ChainTransportError::Rpc {
            code: "NO_PRICE_SOURCE".to_string(),
            message: format!("no price observation for {}/{}", base.symbol, quote.symbol),
        })
    }
}
