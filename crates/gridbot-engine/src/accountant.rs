/*
[INPUT]:  Chain account snapshots, fill proceeds, grid commits.
[OUTPUT]: `Accountant`, the single owner of fund totals. Every mutation
          to chain/virtual/cache totals goes through here.
[POS]:    Accounting layer - Strategy reads `available`; FillProcessor and
          the Pipeline write through `add_to_chain_free` / `modify_cache_funds`.
[UPDATE]: When a new fund bucket or drift rule is introduced.
*/

use rust_decimal::Decimal;
use tracing::warn;

use crate::grid::{MasterGrid, SlotState, SlotType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Default)]
struct SideFunds {
    chain_free: Decimal,
    virtual_committed: Decimal,
    cache_funds: Decimal,
}

/// Per-side fund totals plus the shared network-fee reserve.
#[derive(Debug, Clone)]
pub struct Accountant {
    buy: SideFunds,
    sell: SideFunds,
    bts_fees_owed: Decimal,
    bts_reservation: Decimal,
    is_bts_side: [bool; 2],
    needs_recovery_sync: bool,
}

fn side_idx(side: Side) -> usize {
    match side {
        Side::Buy => 0,
        Side::Sell => 1,
    }
}

impl Accountant {
    /// `is_bts_buy`/`is_bts_sell`: whether the buy/sell home asset is the
    /// network-fee asset, so `available` can apply the fee reservation
    /// on the correct side.
    pub fn new(bts_reservation: Decimal, is_bts_buy: bool, is_bts_sell: bool) -> Self {
        Self {
            buy: SideFunds::default(),
            sell: SideFunds::default(),
            bts_fees_owed: Decimal::ZERO,
            bts_reservation,
            is_bts_side: [is_bts_buy, is_bts_sell],
            needs_recovery_sync: false,
        }
    }

    fn side(&self, side: Side) -> &SideFunds {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut SideFunds {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }

    /// Absorb a fresh chain snapshot: both free balances set directly,
    /// replacing rather than accumulating.
    pub fn set_account_totals(&mut self, buy_free: Decimal, sell_free: Decimal) {
        self.buy.chain_free = buy_free;
        self.sell.chain_free = sell_free;
    }

    pub fn add_to_chain_free(&mut self, side: Side, delta: Decimal) {
        self.side_mut(side).chain_free += delta;
    }

    pub fn modify_cache_funds(&mut self, side: Side, delta: Decimal, reason: &str) {
        let funds = self.side_mut(side);
        funds.cache_funds += delta;
        tracing::debug!(?side, %delta, reason, "cache funds adjusted");
    }

    pub fn set_virtual_committed(&mut self, side: Side, value: Decimal) {
        self.side_mut(side).virtual_committed = value;
    }

    pub fn add_virtual_committed(&mut self, side: Side, delta: Decimal) {
        self.side_mut(side).virtual_committed += delta;
    }

    pub fn set_bts_fees_owed(&mut self, value: Decimal) {
        self.bts_fees_owed = value;
    }

    pub fn chain_free(&self, side: Side) -> Decimal {
        self.side(side).chain_free
    }

    pub fn cache_funds(&self, side: Side) -> Decimal {
        self.side(side).cache_funds
    }

    pub fn virtual_committed(&self, side: Side) -> Decimal {
        self.side(side).virtual_committed
    }

    /// `available[side] = max(0, chainFree - virtual - (bts reservation if applicable))`.
    pub fn available(&self, side: Side) -> Decimal {
        let funds = self.side(side);
        let mut spendable = funds.chain_free - funds.virtual_committed;
        if self.is_bts_side[side_idx(side)] {
            spendable -= self.bts_fees_owed + self.bts_reservation;
        }
        spendable.max(Decimal::ZERO)
    }

    pub fn needs_recovery_sync(&self) -> bool {
        self.needs_recovery_sync
    }

    /// Drained by the pipeline on a maintenance tick as the accounting-
    /// failure signal; clears the flag once read.
    pub fn drain_recovery_signal(&mut self) -> bool {
        std::mem::replace(&mut self.needs_recovery_sync, false)
    }

    /// Self-healing drift check after processing a batch of fills.
    /// `actual` is the chain-reported balance for
    /// `side`; `expected` is `chainFree + Σ home-asset cost of
    /// ACTIVE|PARTIAL slots on that side` (quote-denominated size*price
    /// for BUY slots, base-denominated size for SELL/SPREAD, matching
    /// `Side`'s home asset). Tolerance is `max(10^-precision, 0.1% * actual)`.
    pub fn check_fund_drift_after_fills(
        &mut self,
        side: Side,
        actual: Decimal,
        master: &MasterGrid,
        slot_type_matches: impl Fn(&crate::grid::Slot) -> bool,
        precision: u8,
    ) -> bool {
        let committed: Decimal = master
            .slots_by_state(SlotState::Active)
            .chain(master.slots_by_state(SlotState::Partial))
            .filter(|slot| slot_type_matches(slot))
            .map(|slot| match slot.slot_type {
                SlotType::Buy => slot.size * slot.price,
                SlotType::Sell | SlotType::Spread => slot.size,
            })
            .sum();

        let expected = self.chain_free(side) + committed;
        let drift = (actual - expected).abs();

        let min_unit = Decimal::new(1, precision as u32);
        let tolerance = min_unit.max(actual.abs() * Decimal::new(1, 3));
        let is_valid = drift <= tolerance;

        if !is_valid {
            warn!(?side, %drift, %tolerance, "fund drift exceeded tolerance, requesting recovery sync");
            self.needs_recovery_sync = true;
        }
        is_valid
    }
}
