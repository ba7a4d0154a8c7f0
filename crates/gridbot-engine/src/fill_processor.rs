/*
[INPUT]:  Fill events streamed from `ChainConnector::subscribe_account`.
[OUTPUT]: Deduplicated fill matches applied to the Accountant and grid,
          boundary advance, and a commit trigger.
[POS]:    Accounting/Planning boundary - the only component allowed to
          credit `chainFree` from fill proceeds.
[UPDATE]: When a new match-tolerance rule or dedup window is introduced.
*/

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;

use gridbot_chain::connector::FillEvent;
use gridbot_chain::types::{Asset, ChainId};

use crate::accountant::{Accountant, Side};
use crate::fees::FeeCache;
use crate::grid::{MasterGrid, Slot, SlotState, SlotType};
use crate::precision;

/// Default eviction age for `ProcessedFills`.
pub const DEFAULT_PROCESSED_FILL_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FillKey {
    pub order_id: ChainId,
    pub block_num: u64,
    pub history_id: String,
}

impl FillKey {
    pub fn from_event(event: &FillEvent) -> Self {
        Self {
            order_id: event.order_id.clone(),
            block_num: event.block_num,
            history_id: event.history_id.clone(),
        }
    }
}

/// Time-based eviction ledger of already-applied fills, keyed so a
/// duplicate delivery (reconnect replay, duplicate websocket push) is a
/// no-op.
#[derive(Debug, Clone, Default)]
pub struct ProcessedFills {
    seen: HashMap<FillKey, Instant>,
}

impl ProcessedFills {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &FillKey) -> bool {
        self.seen.contains_key(key)
    }

    pub fn record(&mut self, key: FillKey, now: Instant) {
        self.seen.insert(key, now);
    }

    /// Prune entries older than `max_age` (default 1 hour).
    pub fn clean_old(&mut self, now: Instant, max_age: Duration) {
        self.seen.retain(|_, seen_at| now.duration_since(*seen_at) < max_age);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// `tol = (1/(sizeA * 10^pA) + 1/(sizeB * 10^pB)) * gridPrice`.
pub fn calculate_price_tolerance(
    grid_price: Decimal,
    size_a: Decimal,
    precision_a: u8,
    size_b: Decimal,
    precision_b: u8,
) -> Decimal {
    let unit_a = Decimal::new(1, precision_a as u32);
    let unit_b = Decimal::new(1, precision_b as u32);
    if size_a.is_zero() || size_b.is_zero() {
        return grid_price;
    }
    ((unit_a / size_a) + (unit_b / size_b)) * grid_price
}

#[derive(Debug, Clone)]
pub struct FillMatch {
    pub slot_id: String,
    pub side: Side,
    pub received_net: Decimal,
    pub received_asset_id: String,
}

pub struct FillProcessor {
    allow_smaller_chain_size: bool,
}

impl FillProcessor {
    pub fn new(allow_smaller_chain_size: bool) -> Self {
        Self {
            allow_smaller_chain_size,
        }
    }

    /// Step 1: drop fills already in `ProcessedFills` or duplicated
    /// within this batch.
    pub fn dedup_batch(
        &self,
        events: Vec<FillEvent>,
        processed: &ProcessedFills,
    ) -> Vec<FillEvent> {
        let mut seen_in_batch = std::collections::HashSet::new();
        events
            .into_iter()
            .filter(|event| {
                let key = FillKey::from_event(event);
                if processed.contains(&key) || seen_in_batch.contains(&key) {
                    return false;
                }
                seen_in_batch.insert(key);
                true
            })
            .collect()
    }

    /// Step 2: match one fill to a slot, first by `orderId`, falling
    /// back to price+size within tolerance. Returns `None` when no slot
    /// in `master` matches and this fill must be deferred/logged as
    /// unmatched.
    pub fn match_fill(
        &self,
        event: &FillEvent,
        master: &MasterGrid,
        base_asset: &Asset,
        quote_asset: &Asset,
    ) -> Option<(String, SlotType)> {
        if let Some(slot) = master.slot_by_order_id(&event.order_id) {
            return Some((slot.id.clone(), slot.slot_type));
        }

        let fill_size = precision::to_float(event.pays_amount, base_asset.precision);
        let fill_price = if event.pays_amount == 0 {
            return None;
        } else {
            precision::to_float(event.receives_amount, quote_asset.precision) / fill_size
        };

        master
            .slots_by_state(SlotState::Active)
            .chain(master.slots_by_state(SlotState::Partial))
            .find(|slot| self.matches_price_and_size(slot, fill_price, fill_size, quote_asset.precision))
            .map(|slot| (slot.id.clone(), slot.slot_type))
    }

    fn matches_price_and_size(
        &self,
        slot: &Slot,
        fill_price: Decimal,
        fill_size: Decimal,
        price_precision: u8,
    ) -> bool {
        let tolerance = calculate_price_tolerance(slot.price, slot.size, price_precision, fill_size, price_precision);
        if (slot.price - fill_price).abs() > tolerance {
            return false;
        }
        if self.allow_smaller_chain_size {
            fill_size <= slot.size
        } else {
            let slot_units = precision::to_int(slot.size, price_precision);
            let fill_units = precision::to_int(fill_size, price_precision);
            (slot_units - fill_units).abs() <= 1
        }
    }

    /// Step 3: credit the opposite side's `chainFree` by
    /// `received - fees(received)`, mark `ProcessedFills`, and report
    /// which direction the boundary should advance.
    pub fn apply_fill(
        &self,
        event: &FillEvent,
        slot_id: &str,
        slot_side: SlotType,
        accountant: &mut Accountant,
        fees: &FeeCache,
        quote_symbol: &str,
        receive_precision: u8,
    ) -> FillMatch {
        let received = precision::to_float(event.receives_amount, receive_precision);
        let fee_quote = fees.get_asset_fees(quote_symbol, received, event.is_maker);
        let net = fee_quote.net_amount;

        let credited_side = match slot_side {
            SlotType::Buy => Side::Sell,
            SlotType::Sell | SlotType::Spread => Side::Buy,
        };
        accountant.add_to_chain_free(credited_side, net);

        FillMatch {
            slot_id: slot_id.to_string(),
            side: credited_side,
            received_net: net,
            received_asset_id: event.receives_asset_id.clone(),
        }
    }

    /// Step 4: append this batch's keys with `now`.
    pub fn mark_processed(&self, events: &[FillEvent], processed: &mut ProcessedFills, now: Instant) {
        for event in events {
            processed.record(FillKey::from_event(event), now);
        }
    }
}
