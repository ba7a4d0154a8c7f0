/*
[INPUT]:  Raw limit-order records from `get_full_accounts` / `get_limit_orders`.
[OUTPUT]: `RawChainOrder` wire shape, `ChainId` identity newtype.
[POS]:    Data layer - on-chain order representation (untyped by side/price;
          that derivation happens in the engine's ChainAdapter).
[UPDATE]: When the chain's limit-order schema changes.
*/

use serde::{Deserialize, Serialize};

/// Identity of an on-chain object (order, account, asset), chain-format
/// (e.g. `"1.7.999"`). Opaque to everything except the chain adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `{ amount, asset_id }` pair as it appears in limit-order operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountPair {
    pub amount: i64,
    pub asset_id: String,
}

impl AmountPair {
    pub fn new(amount: i64, asset_id: impl Into<String>) -> Self {
        Self {
            amount,
            asset_id: asset_id.into(),
        }
    }
}

/// Raw limit order as returned by the chain, prior to `parseChainOrder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChainOrder {
    pub id: ChainId,
    pub seller: ChainId,
    pub sell_price: RawPrice,
    pub for_sale: i64,
    pub expiration: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPrice {
    pub base: AmountPair,
    pub quote: AmountPair,
}
