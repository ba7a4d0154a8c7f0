/*
[INPUT]:  n/a (this is the interface the engine programs against).
[OUTPUT]: `ChainConnector` trait - the out-of-scope "chain transport"
          collaborator, named here so the engine can mock it.
[POS]:    Transport layer - connection manager interface.
[UPDATE]: When the chain exposes new query/broadcast methods the engine needs.
*/

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::Result;
use crate::types::{Asset, ChainId, ChainOp, RawChainOrder};

/// Balances for one account, one asset, as reported by `get_full_accounts`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountBalance {
    pub asset_id: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub account_id: ChainId,
    pub balances: Vec<AccountBalance>,
    pub limit_orders: Vec<RawChainOrder>,
}

/// One entry in an account's operation history stream. Only fill
/// operations (`op[0] == FILL`) carry trade data; everything else in the
/// real stream is opaque, matching this crate's scoping.
#[derive(Debug, Clone, PartialEq)]
pub struct FillEvent {
    pub order_id: ChainId,
    pub block_num: u64,
    pub history_id: String,
    pub pays_asset_id: String,
    pub pays_amount: i64,
    pub receives_asset_id: String,
    pub receives_amount: i64,
    pub is_maker: bool,
    pub fee_asset_id: String,
    pub fee_amount: i64,
}

/// A scalar price discovery handle for one pair (external collaborator).
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn current_price(&self, base: &Asset, quote: &Asset) -> Result<Decimal>;
}

/// The chain transport interface the engine programs against. Out of
/// scope for the engine's own logic: it treats any implementation as an
/// external collaborator known only by this trait.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn get_full_accounts(&self, account_ids: &[ChainId]) -> Result<Vec<AccountSnapshot>>;

    async fn get_limit_orders(
        &self,
        base_asset_id: &str,
        quote_asset_id: &str,
        depth: u32,
    ) -> Result<Vec<RawChainOrder>>;

    async fn get_assets(&self, asset_ids: &[String]) -> Result<Vec<Asset>>;

    async fn lookup_asset_symbols(&self, symbols: &[String]) -> Result<Vec<Asset>>;

    /// Broadcast one transaction containing all ops, in order. The i-th
    /// entry of the returned result corresponds to the i-th op.
    async fn broadcast(
        &self,
        signer_account: &ChainId,
        ops: Vec<ChainOp>,
    ) -> Result<crate::types::BroadcastResult>;

    /// Subscribe to an account's operation history stream. The returned
    /// receiver yields fill events as they're observed; dropping it
    /// unsubscribes. Implementations restore the subscription across a
    /// reconnect (the "resubscribe-on-reconnect" pattern).
    async fn subscribe_account(
        &self,
        account_id: &ChainId,
    ) -> Result<tokio::sync::mpsc::UnboundedReceiver<FillEvent>>;
}
