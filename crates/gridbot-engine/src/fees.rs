/*
[INPUT]:  Trading pairs to track plus a `ChainConnector` for fee discovery.
[OUTPUT]: `FeeCache`, pure getters for per-asset market fees and the three
          chain op fees (create/cancel/update) once initialized.
[POS]:    Accounting layer - Strategy and FillProcessor both read fees
          through here rather than re-querying the chain per tick.
[UPDATE]: When a new op type or fee-bearing asset is added.
*/

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::{GridError, Result};

/// Per-op chain fee, denominated in the network-fee asset (often the
/// protocol token itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpFees {
    pub create: i64,
    pub cancel: i64,
    pub update: i64,
}

/// Market-fee schedule for one asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketFee {
    pub percent: Decimal,
}

/// Outcome of `get_asset_fees`: for the network-fee asset this carries
/// the three structured op fees plus net-after-fee splits for
/// maker/taker; for any other asset only `net_amount` is meaningful.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeQuote {
    pub net_amount: Decimal,
    pub op_fees: Option<OpFees>,
}

/// `takerFee` may live on `options.extensions.taker_fee_percent`
/// or directly on `options`; both probes are preserved here via two
/// optional inputs to `initialize`, with the extension value winning
/// when both are present.
#[derive(Debug, Clone, Copy)]
pub struct FeeProbe {
    pub maker_fee_percent: Decimal,
    pub taker_fee_percent_direct: Option<Decimal>,
    pub taker_fee_percent_extension: Option<Decimal>,
}

impl FeeProbe {
    pub fn resolved_taker_fee_percent(&self) -> Decimal {
        self.taker_fee_percent_extension
            .or(self.taker_fee_percent_direct)
            .unwrap_or(self.maker_fee_percent)
    }
}

/// Pure lookup table, populated once at startup and never mutated
/// afterward - pure after init.
#[derive(Debug, Clone, Default)]
pub struct FeeCache {
    market_fees: HashMap<String, (MarketFee, MarketFee)>, // symbol -> (maker, taker)
    op_fees: Option<OpFees>,
    network_fee_symbol: Option<String>,
}

impl FeeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the cache from pre-fetched probes: one probe per unique
    /// asset plus the network-fee asset, and the
    /// three op fees (create/cancel/update), all resolved up front.
    pub fn initialize(
        &mut self,
        probes: impl IntoIterator<Item = (String, FeeProbe)>,
        network_fee_symbol: impl Into<String>,
        op_fees: OpFees,
    ) {
        for (symbol, probe) in probes {
            self.market_fees.insert(
                symbol,
                (
                    MarketFee {
                        percent: probe.maker_fee_percent,
                    },
                    MarketFee {
                        percent: probe.resolved_taker_fee_percent(),
                    },
                ),
            );
        }
        self.op_fees = Some(op_fees);
        self.network_fee_symbol = Some(network_fee_symbol.into());
    }

    pub fn op_fees(&self) -> Result<OpFees> {
        self.op_fees.ok_or_else(|| GridError::ConfigInvalid {
            reason: "fee cache not initialized".to_string(),
        })
    }

    /// `amount * (1 - feePercent)` for ordinary assets; for the
    /// network-fee asset, returns the structured op-fee view instead.
    pub fn get_asset_fees(&self, symbol: &str, amount: Decimal, is_maker: bool) -> FeeQuote {
        if self.network_fee_symbol.as_deref() == Some(symbol) {
            return FeeQuote {
                net_amount: amount,
                op_fees: self.op_fees,
            };
        }

        let percent = self
            .market_fees
            .get(symbol)
            .map(|(maker, taker)| if is_maker { maker.percent } else { taker.percent })
            .unwrap_or(dec!(0));

        FeeQuote {
            net_amount: amount * (Decimal::ONE - percent),
            op_fees: None,
        }
    }
}
