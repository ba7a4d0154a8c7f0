/*
[INPUT]:  Planner actions (Action::Create/Update/Cancel), a signer, and a
          `ChainConnector`.
[OUTPUT]: Signed, broadcastable `ChainOp`s; normalized broadcast results;
          `parseChainOrder`; `readOpenOrders` truncation-defeating union
          read.
[POS]:    Execution layer - the only component that talks to the chain
          transport boundary on the write path.
[UPDATE]: When a new op shape or broadcast response quirk is discovered.
*/

use std::sync::Arc;

use rust_decimal::Decimal;

use gridbot_chain::types::{
    AmountPair, Asset, BroadcastResult, CancelOrderOp, ChainId, ChainOp, CreateOrderOp,
    NewPrice, RawChainOrder, UpdateOrderOp,
};
use gridbot_chain::ChainConnector;

use crate::error::{GridError, Result};
use crate::grid::SlotType;
use crate::precision;

const FEE_ASSET_ID: &str = "1.3.0";

/// Classify a transport-level failure into the taxonomy the pipeline's
/// retry/defer logic branches on. `order_id` is a best-effort label
/// for the `StaleOrder`/`IllegalOrderState` variants when the batch
/// covers a single op; everything else falls through as transient.
fn classify_transport_error(
    err: gridbot_chain::ChainTransportError,
    order_id: &str,
) -> GridError {
    if err.looks_like_stale_order() {
        GridError::StaleOrder {
            order_id: order_id.to_string(),
        }
    } else if err.is_illegal_order_state() {
        GridError::IllegalOrderState {
            order_id: order_id.to_string(),
        }
    } else {
        GridError::from(err)
    }
}

#[derive(Debug, Clone)]
pub struct NewOrderParams {
    pub new_sell_amount: Option<Decimal>,
    pub new_price: Option<Decimal>,
    pub min_to_receive: Option<(Decimal, String)>,
}

pub struct ChainAdapter {
    connector: Arc<dyn ChainConnector>,
}

impl ChainAdapter {
    pub fn new(connector: Arc<dyn ChainConnector>) -> Self {
        Self { connector }
    }

    /// `buildCreateOp`: quantize both legs through PrecisionMath;
    /// reject (return `None`, caller skips the slot this tick) when
    /// either integer resolves to <= 0.
    pub fn build_create_op(
        &self,
        account: &ChainId,
        sell_amount: Decimal,
        sell_asset_id: &str,
        sell_precision: u8,
        min_receive: Decimal,
        receive_asset_id: &str,
        receive_precision: u8,
        expiration: impl Into<String>,
    ) -> Option<ChainOp> {
        let sell_int = precision::to_int(sell_amount, sell_precision);
        let recv_int = precision::to_int(min_receive, receive_precision);
        if sell_int <= 0 || recv_int <= 0 {
            return None;
        }

        Some(ChainOp::Create(CreateOrderOp {
            fee: AmountPair::new(0, FEE_ASSET_ID),
            seller: account.clone(),
            amount_to_sell: AmountPair::new(sell_int, sell_asset_id),
            min_to_receive: AmountPair::new(recv_int, receive_asset_id),
            expiration: expiration.into(),
            fill_or_kill: false,
            extensions: Vec::new(),
        }))
    }

    /// `buildUpdateOp`: compute the sell-side delta against the
    /// cached on-chain order, derive the new receive integer from
    /// whichever field is given, and detect no-ops. When neither amount
    /// nor price changed to integer resolution but a price change was
    /// requested, nudge `recvInt` by +/-1 in the direction of the sign
    /// (the "precision-only price nudge").
    pub fn build_update_op(
        &self,
        account: &ChainId,
        order_id: &ChainId,
        params: &NewOrderParams,
        cached: &RawChainOrder,
        sell_asset_id: &str,
        sell_precision: u8,
        receive_asset_id: &str,
        receive_precision: u8,
    ) -> Option<ChainOp> {
        let current_sell_int = cached.for_sale;
        let current_recv_int = cached.sell_price.quote.amount;
        let current_price = price_from_raw(cached);

        let new_sell_int = match params.new_sell_amount {
            Some(amount) => precision::to_int(amount, sell_precision),
            None => current_sell_int,
        };
        let delta_sell = new_sell_int - current_sell_int;

        let price_requested = params.new_price.is_some();

        let new_recv_int = if let Some((amount, _asset)) = &params.min_to_receive {
            precision::to_int(*amount, receive_precision)
        } else if let Some(new_price) = params.new_price {
            let sell_float = precision::to_float(new_sell_int, sell_precision);
            precision::to_int(sell_float * new_price, receive_precision)
        } else {
            current_recv_int
        };

        let mut final_recv_int = new_recv_int;
        if delta_sell == 0 && new_recv_int == current_recv_int && price_requested {
            if let Some(new_price) = params.new_price {
                let sign: i64 = if new_price > current_price { 1 } else { -1 };
                final_recv_int += sign;
            }
        }

        if delta_sell == 0 && final_recv_int == current_recv_int {
            return None;
        }

        let delta_amount_to_sell = if delta_sell != 0 {
            Some(AmountPair::new(delta_sell, sell_asset_id))
        } else {
            None
        };

        Some(ChainOp::Update(UpdateOrderOp {
            fee: AmountPair::new(0, FEE_ASSET_ID),
            seller: account.clone(),
            order: order_id.clone(),
            new_price: NewPrice {
                base: AmountPair::new(new_sell_int, sell_asset_id),
                quote: AmountPair::new(final_recv_int, receive_asset_id),
            },
            delta_amount_to_sell,
            expiration: None,
        }))
    }

    pub fn build_cancel_op(&self, account: &ChainId, order_id: &ChainId) -> ChainOp {
        ChainOp::Cancel(CancelOrderOp {
            fee: AmountPair::new(0, FEE_ASSET_ID),
            fee_paying_account: account.clone(),
            order: order_id.clone(),
        })
    }

    /// `executeBatch`: broadcast one transaction for the whole op
    /// list. Signing itself is out of scope (a callable
    /// `sign(tx, key)` handles that); the chain connector's `broadcast` already returns
    /// a normalized `{ success, operationResults[] }` shape where the
    /// i-th result corresponds to the i-th op.
    pub async fn execute_batch(&self, account: &ChainId, ops: Vec<ChainOp>) -> Result<BroadcastResult> {
        self.connector
            .broadcast(account, ops)
            .await
            .map_err(|err| classify_transport_error(err, "<batch>"))
    }

    /// `parseChainOrder`: derive `(price, type, size)` from the
    /// raw order's base/quote asset ids and `for_sale`. Returns `None`
    /// when the assets don't match the configured pair or `base.amount == 0`.
    pub fn parse_chain_order(
        raw: &RawChainOrder,
        base_asset: &Asset,
        quote_asset: &Asset,
    ) -> Option<(Decimal, SlotType, Decimal)> {
        if raw.sell_price.base.amount == 0 {
            return None;
        }

        let base_id = &raw.sell_price.base.asset_id;
        let quote_id = &raw.sell_price.quote.asset_id;

        let (slot_type, price) = if base_id == &base_asset.id && quote_id == &quote_asset.id {
            let price = precision::to_float(raw.sell_price.quote.amount, quote_asset.precision)
                / precision::to_float(raw.sell_price.base.amount, base_asset.precision);
            (SlotType::Sell, price)
        } else if base_id == &quote_asset.id && quote_id == &base_asset.id {
            let price = precision::to_float(raw.sell_price.base.amount, base_asset.precision)
                / precision::to_float(raw.sell_price.quote.amount, quote_asset.precision);
            (SlotType::Buy, price)
        } else {
            return None;
        };

        let size = precision::to_float(raw.for_sale, base_asset.precision);
        Some((price, slot_type, size))
    }

    /// `readOpenOrders`: union `get_full_accounts`'s embedded
    /// `limit_orders` with a deep per-market scan (two `get_limit_orders`
    /// calls, one per book side, filtered by seller) so accounts with
    /// more open orders than a single page defeat neither read.
    pub async fn read_open_orders(
        &self,
        account_id: &ChainId,
        base_asset_id: &str,
        quote_asset_id: &str,
        depth: u32,
    ) -> Result<Vec<RawChainOrder>> {
        let accounts = self
            .connector
            .get_full_accounts(std::slice::from_ref(account_id))
            .await?;
        let mut orders: Vec<RawChainOrder> = accounts
            .into_iter()
            .flat_map(|snapshot| snapshot.limit_orders)
            .collect();

        let mut market_side = self
            .connector
            .get_limit_orders(base_asset_id, quote_asset_id, depth)
            .await?;
        let mut market_other_side = self
            .connector
            .get_limit_orders(quote_asset_id, base_asset_id, depth)
            .await?;
        market_side.retain(|o| &o.seller == account_id);
        market_other_side.retain(|o| &o.seller == account_id);

        let known_ids: std::collections::HashSet<&ChainId> = orders.iter().map(|o| &o.id).collect();
        for order in market_side.into_iter().chain(market_other_side) {
            if !known_ids.contains(&order.id) {
                orders.push(order);
            }
        }

        Ok(orders)
    }
}

fn price_from_raw(raw: &RawChainOrder) -> Decimal {
    if raw.sell_price.base.amount == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(raw.sell_price.quote.amount) / Decimal::from(raw.sell_price.base.amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gridbot_chain::{AccountSnapshot, FillEvent};
    use gridbot_chain::types::{AmountPair as AP, RawPrice};
    use rust_decimal_macros::dec;

    struct StubConnector;

    #[async_trait]
    impl ChainConnector for StubConnector {
        async fn get_full_accounts(&self, _ids: &[ChainId]) -> gridbot_chain::Result<Vec<AccountSnapshot>> {
            Ok(Vec::new())
        }
        async fn get_limit_orders(
            &self,
            _base: &str,
            _quote: &str,
            _depth: u32,
        ) -> gridbot_chain::Result<Vec<RawChainOrder>> {
            Ok(Vec::new())
        }
        async fn get_assets(&self, _ids: &[String]) -> gridbot_chain::Result<Vec<Asset>> {
            Ok(Vec::new())
        }
        async fn lookup_asset_symbols(&self, _symbols: &[String]) -> gridbot_chain::Result<Vec<Asset>> {
            Ok(Vec::new())
        }
        async fn broadcast(
            &self,
            _account: &ChainId,
            _ops: Vec<ChainOp>,
        ) -> gridbot_chain::Result<BroadcastResult> {
            unimplemented!()
        }
        async fn subscribe_account(
            &self,
            _account_id: &ChainId,
        ) -> gridbot_chain::Result<tokio::sync::mpsc::UnboundedReceiver<FillEvent>> {
            unimplemented!()
        }
    }

    fn adapter() -> ChainAdapter {
        ChainAdapter::new(Arc::new(StubConnector))
    }

    #[test]
    fn build_create_op_rejects_non_positive_integers() {
        let adapter = adapter();
        let op = adapter.build_create_op(
            &ChainId::new("1.2.1"),
            dec!(0.0000001),
            "1.3.0",
            5,
            dec!(1),
            "1.3.1",
            5,
            "2030-01-01T00:00:00",
        );
        assert!(op.is_none());
    }

    #[test]
    fn build_create_op_emits_quantized_amounts() {
        let adapter = adapter();
        let op = adapter
            .build_create_op(
                &ChainId::new("1.2.1"),
                dec!(10),
                "1.3.0",
                5,
                dec!(9.9),
                "1.3.1",
                5,
                "2030-01-01T00:00:00",
            )
            .unwrap();
        match op {
            ChainOp::Create(create) => {
                assert_eq!(create.amount_to_sell.amount, 1_000_000);
                assert_eq!(create.min_to_receive.amount, 990_000);
            }
            _ => panic!("expected create"),
        }
    }

    fn cached_order(base_amount: i64, quote_amount: i64) -> RawChainOrder {
        RawChainOrder {
            id: ChainId::new("1.7.1"),
            seller: ChainId::new("1.2.1"),
            sell_price: RawPrice {
                base: AP::new(base_amount, "1.3.0"),
                quote: AP::new(quote_amount, "1.3.1"),
            },
            for_sale: base_amount,
            expiration: "2030-01-01T00:00:00".to_string(),
        }
    }

    #[test]
    fn build_update_op_is_none_when_nothing_changed() {
        let adapter = adapter();
        let cached = cached_order(1_000_000, 990_000);
        let params = NewOrderParams {
            new_sell_amount: None,
            new_price: None,
            min_to_receive: None,
        };
        let op = adapter.build_update_op(
            &ChainId::new("1.2.1"),
            &ChainId::new("1.7.1"),
            &params,
            &cached,
            "1.3.0",
            5,
            "1.3.1",
            5,
        );
        assert!(op.is_none());
    }

    #[test]
    fn build_update_op_nudges_receive_by_one_on_precision_only_price_change() {
        let adapter = adapter();
        let cached = cached_order(1_000_000, 990_000);
        let params = NewOrderParams {
            new_sell_amount: None,
            new_price: Some(dec!(0.9900001)),
            min_to_receive: None,
        };
        let op = adapter
            .build_update_op(
                &ChainId::new("1.2.1"),
                &ChainId::new("1.7.1"),
                &params,
                &cached,
                "1.3.0",
                5,
                "1.3.1",
                5,
            )
            .unwrap();
        match op {
            ChainOp::Update(update) => {
                assert_eq!(update.new_price.quote.amount, 990_001);
            }
            _ => panic!("expected update"),
        }
    }

    #[test]
    fn parse_chain_order_rejects_unrelated_asset_pair() {
        let base = Asset::new("1.3.0", "BTS", 5);
        let quote = Asset::new("1.3.1", "USD", 4);
        let raw = RawChainOrder {
            id: ChainId::new("1.7.1"),
            seller: ChainId::new("1.2.1"),
            sell_price: RawPrice {
                base: AP::new(100, "1.3.9"),
                quote: AP::new(100, "1.3.8"),
            },
            for_sale: 100,
            expiration: "2030-01-01T00:00:00".to_string(),
        };
        assert!(ChainAdapter::parse_chain_order(&raw, &base, &quote).is_none());
    }
}
