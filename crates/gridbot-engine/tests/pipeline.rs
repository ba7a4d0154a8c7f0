/*
[INPUT]:  A hand-built 9-slot grid matching the canonical boundary-advance
          scenario, plus two BUY fill events.
[OUTPUT]: Confirms the end-to-end double-fill -> boundary-advance ->
          available-funds path through `Bot`'s public API alone.
[POS]:    Integration test - no access to `Bot`'s private fields.
[UPDATE]: When the boundary-advance contract changes.
*/

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use gridbot_chain::types::{Asset, AssetPair, BroadcastResult, ChainId, ChainOp, RawChainOrder};
use gridbot_chain::{AccountSnapshot, ChainConnector, ChainTransportError, FillEvent};
use gridbot_engine::fees::{FeeCache, FeeProbe, OpFees};
use gridbot_engine::fill_processor::{FillProcessor, ProcessedFills};
use gridbot_engine::grid::{MasterGrid, Slot, SlotState, SlotType};
use gridbot_engine::{Accountant, Bot, Side};

struct NullConnector;

#[async_trait]
impl ChainConnector for NullConnector {
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
        Ok(BroadcastResult {
            success: true,
            operation_results: Vec::new(),
            transaction_id: Some("1.2.3".to_string()),
        })
    }
    async fn subscribe_account(
        &self,
        _account_id: &ChainId,
    ) -> gridbot_chain::Result<tokio::sync::mpsc::UnboundedReceiver<FillEvent>> {
        Err(ChainTransportError::NoReachableNode)
    }
}

fn active_slot(id: &str, slot_type: SlotType, price: Decimal, size: Decimal, order_id: &str) -> Slot {
    let mut slot = Slot::virtual_target(id, slot_type, price, size);
    slot.state = SlotState::Active;
    slot.order_id = Some(ChainId::new(order_id));
    slot
}

fn partial_slot(id: &str, slot_type: SlotType, price: Decimal, size: Decimal, order_id: &str) -> Slot {
    let mut slot = active_slot(id, slot_type, price, size, order_id);
    slot.state = SlotState::Partial;
    slot
}

fn spread_slot(id: &str, price: Decimal) -> Slot {
    Slot::virtual_target(id, SlotType::Spread, price, Decimal::ZERO)
}

/// Builds the nine-slot grid from the canonical scenario: three ACTIVE
/// BUYs at 0.97/0.98/0.99 size 100, three SPREAD slots at 1.00/1.01/1.02,
/// and three SELLs at 1.03 (PARTIAL size 5)/1.04/1.05 (ACTIVE size 10).
fn nine_slot_grid() -> MasterGrid {
    let slots = vec![
        active_slot("slot-0", SlotType::Buy, dec!(0.97), dec!(100), "1.7.10"),
        active_slot("slot-1", SlotType::Buy, dec!(0.98), dec!(100), "1.7.11"),
        active_slot("slot-2", SlotType::Buy, dec!(0.99), dec!(100), "1.7.12"),
        spread_slot("slot-3", dec!(1.00)),
        spread_slot("slot-4", dec!(1.01)),
        spread_slot("slot-5", dec!(1.02)),
        partial_slot("slot-6", SlotType::Sell, dec!(1.03), dec!(5), "1.7.13"),
        active_slot("slot-7", SlotType::Sell, dec!(1.04), dec!(10), "1.7.14"),
        active_slot("slot-8", SlotType::Sell, dec!(1.05), dec!(10), "1.7.15"),
    ];
    MasterGrid::new(3, slots)
}

fn fill_event(order_id: &str, history_id: &str, pays_amount: i64, receives_amount: i64) -> FillEvent {
    FillEvent {
        order_id: ChainId::new(order_id),
        block_num: 1,
        history_id: history_id.to_string(),
        pays_asset_id: "1.3.0".to_string(),
        pays_amount,
        receives_asset_id: "1.3.1".to_string(),
        receives_amount,
        is_maker: true,
        fee_asset_id: "1.3.0".to_string(),
        fee_amount: 0,
    }
}

#[tokio::test]
async fn double_buy_fill_advances_boundary_and_credits_sell_side() {
    let base = Asset::new("1.3.0", "BASE", 5);
    let quote = Asset::new("1.3.1", "QUOTE", 5);

    let master = nine_slot_grid();
    let accountant = Accountant::new(dec!(0), false, false);
    let mut bot = Bot::new(
        ChainId::new("1.2.1"),
        master,
        accountant,
        Arc::new(NullConnector),
        AssetPair::new(base.clone(), quote.clone()),
        86_400,
    );

    let mut fee_cache = FeeCache::new();
    fee_cache.initialize(
        [(
            base.symbol.clone(),
            FeeProbe {
                maker_fee_percent: dec!(0.001),
                taker_fee_percent_direct: Some(dec!(0.002)),
                taker_fee_percent_extension: None,
            },
        )],
        "BTS",
        OpFees {
            create: 1_000_000,
            cancel: 0,
            update: 1_000_000,
        },
    );

    let processor = FillProcessor::new(false);
    let mut processed = ProcessedFills::new();
    let now = std::time::Instant::now();
    let sell_available_before = bot.accountant().available(Side::Sell);

    // Both BUY orders fill at their limit price, paying 98 and 99 quote to
    // receive 100 base each (scaled to 5-decimal precision).
    let events = vec![
        fill_event("1.7.11", "1.10.1", 98_00000, 100_00000),
        fill_event("1.7.12", "1.10.2", 99_00000, 100_00000),
    ];

    let mut filled_slot_ids = Vec::new();
    let mut total_credited = Decimal::ZERO;
    for event in events {
        let batch = processor.dedup_batch(vec![event], &processed);
        let event = batch.into_iter().next().unwrap();
        let (slot_id, slot_type) = processor
            .match_fill(&event, bot.master(), &base, &quote)
            .expect("fill must match a known slot");
        let fill_match = processor.apply_fill(
            &event,
            &slot_id,
            slot_type,
            bot.accountant_mut(),
            &fee_cache,
            &base.symbol,
            base.precision,
        );
        assert_eq!(fill_match.side, Side::Sell);
        total_credited += fill_match.received_net;
        processor.mark_processed(std::slice::from_ref(&event), &mut processed, now);
        filled_slot_ids.push(slot_id);
    }

    assert_eq!(filled_slot_ids, vec!["slot-1".to_string(), "slot-2".to_string()]);
    assert!(total_credited > Decimal::ZERO, "post-fee proceeds must be positive");

    let outcome = bot
        .apply_fill_matches(&filled_slot_ids, Some(0))
        .await
        .unwrap();
    assert!(outcome.executed);

    assert_eq!(bot.master().boundary_idx, 0);
    for id in &filled_slot_ids {
        let cleared = bot.master().get(id).unwrap();
        assert_eq!(cleared.slot_type, SlotType::Spread);
        assert_eq!(cleared.state, SlotState::Virtual);
        assert_eq!(cleared.size, Decimal::ZERO);
        assert!(cleared.order_id.is_none());
    }

    // Untouched slots, including the still-PARTIAL SELL at 1.03, survive
    // the commit unchanged - boundary-advance clears only the filled slots.
    let untouched_partial = bot.master().get("slot-6").unwrap();
    assert_eq!(untouched_partial.state, SlotState::Partial);
    assert_eq!(untouched_partial.size, dec!(5));

    let sell_available_after = bot.accountant().available(Side::Sell);
    assert!(sell_available_after > sell_available_before);
    assert_eq!(sell_available_after - sell_available_before, total_credited);
}
