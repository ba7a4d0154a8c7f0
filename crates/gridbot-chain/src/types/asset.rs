/*
[INPUT]:  Chain asset metadata (symbol lookups, `get_assets` responses).
[OUTPUT]: `Asset` records carrying mandatory precision.
[POS]:    Data layer - asset identity and precision.
[UPDATE]: When the chain exposes new asset metadata fields.
*/

use serde::{Deserialize, Serialize};

/// A chain asset. `precision` is mandatory: callers that cannot resolve
/// it must fail rather than assume a default (see `PrecisionMissing`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    pub precision: u8,
}

impl Asset {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, precision: u8) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            precision,
        }
    }
}

/// A resolved trading pair: the side whose home asset is bought with BUY
/// orders (`base`) and the side sold for (`quote`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPair {
    pub base: Asset,
    pub quote: Asset,
}

impl AssetPair {
    pub fn new(base: Asset, quote: Asset) -> Self {
        Self { base, quote }
    }
}
