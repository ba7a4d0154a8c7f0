/*
[INPUT]:  Fill events, maintenance ticks, chain batch results.
[OUTPUT]: The `Bot` state machine: fills -> plan -> commit -> broadcast ->
          post-commit sync, with the maintenance-tick defer/cooldown and
          commit-guard rules.
[POS]:    Orchestration layer - the component main.rs drives per bot.
[UPDATE]: When a new defer condition or recovery path is introduced.
*/

use std::collections::HashSet;
use std::sync::Arc;

use gridbot_chain::types::{
    Asset, AssetPair, BroadcastResult, ChainId, ChainOp, OperationResult, RawChainOrder, RawPrice,
};
use gridbot_chain::ChainConnector;
use tracing::{debug, info, warn};

use rust_decimal::Decimal;

use crate::accountant::{Accountant, Side};
use crate::chain_adapter::{ChainAdapter, NewOrderParams};
use crate::error::{GridError, Result};
use crate::grid::{Action, MasterGrid, Slot, SlotState, SlotType, WorkingGrid};
use crate::precision;
use crate::strategy::{self, PlanInputs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Normal,
    Rebalancing,
    Broadcasting,
}

#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    pub executed: bool,
    pub aborted: bool,
    pub reason: Option<String>,
}

/// In-flight / deferred-tick bookkeeping for the maintenance tick's defer
/// conditions and illegal-state cooldown.
#[derive(Debug, Default)]
struct TickFlags {
    batch_in_flight: bool,
    retry_in_flight: bool,
    recovery_in_flight: bool,
    broadcasting: bool,
    shadow_order_ids: HashSet<ChainId>,
    incoming_fill_queue_len: usize,
    illegal_state_signal: bool,
    maintenance_cooldown_cycles: u32,
    stale_cleaned_order_ids: HashSet<ChainId>,
}

impl TickFlags {
    fn should_defer(&self) -> bool {
        self.batch_in_flight
            || self.retry_in_flight
            || self.recovery_in_flight
            || self.broadcasting
            || !self.shadow_order_ids.is_empty()
            || self.incoming_fill_queue_len > 0
    }
}

pub struct Bot {
    pub state: BotState,
    pub account_id: ChainId,
    master: MasterGrid,
    accountant: Accountant,
    adapter: ChainAdapter,
    flags: TickFlags,
    pub recovery_sync_calls: u64,
    pair: AssetPair,
    order_expiration_secs: i64,
}

impl Bot {
    pub fn new(
        account_id: ChainId,
        master: MasterGrid,
        accountant: Accountant,
        connector: Arc<dyn ChainConnector>,
        pair: AssetPair,
        order_expiration_secs: i64,
    ) -> Self {
        Self {
            state: BotState::Normal,
            account_id,
            master,
            accountant,
            adapter: ChainAdapter::new(connector),
            flags: TickFlags::default(),
            recovery_sync_calls: 0,
            pair,
            order_expiration_secs,
        }
    }

    pub fn master(&self) -> &MasterGrid {
        &self.master
    }

    pub fn accountant(&self) -> &Accountant {
        &self.accountant
    }

    pub fn accountant_mut(&mut self) -> &mut Accountant {
        &mut self.accountant
    }

    pub fn note_incoming_fills(&mut self, count: usize) {
        self.flags.incoming_fill_queue_len = count;
    }

    pub fn signal_illegal_state(&mut self) {
        self.flags.illegal_state_signal = true;
    }

    pub fn maintenance_cooldown_cycles(&self) -> u32 {
        self.flags.maintenance_cooldown_cycles
    }

    pub fn stale_cleaned_order_ids(&self) -> &HashSet<ChainId> {
        &self.flags.stale_cleaned_order_ids
    }

    /// Checks chain-reported `actual` against `chainFree + committed` for
    /// `side`. A drift beyond tolerance is latched
    /// on the accountant and drained into `illegal_state_signal` on the
    /// next `maintenance_tick`, forcing a recovery sync before any further
    /// planning.
    pub fn check_fund_drift(&mut self, side: Side, actual: Decimal, precision: u8) -> bool {
        let master = &self.master;
        self.accountant
            .check_fund_drift_after_fills(side, actual, master, |slot| side_of(slot.slot_type) == side, precision)
    }

    /// Periodic maintenance tick. Returns `true` if the tick ran
    /// its normal body, `false` if it deferred. `inputs` is `None` on
    /// ticks that have nothing to plan (e.g. price unavailable yet).
    pub async fn maintenance_tick(&mut self, inputs: Option<PlanInputs>) -> Result<bool> {
        if self.accountant.drain_recovery_signal() {
            self.flags.illegal_state_signal = true;
        }

        if self.flags.should_defer() {
            debug!("maintenance tick deferred");
            return Ok(false);
        }

        if self.flags.illegal_state_signal {
            self.flags.illegal_state_signal = false;
            self.trigger_state_recovery_sync().await?;
            self.flags.maintenance_cooldown_cycles = 1;
            return Ok(false);
        }

        if self.flags.maintenance_cooldown_cycles > 0 {
            self.flags.maintenance_cooldown_cycles -= 1;
            debug!("maintenance tick skipped: cooldown active");
            return Ok(false);
        }

        let Some(inputs) = inputs else {
            return Ok(true);
        };

        self.plan_rebalance(&inputs).await?;
        Ok(true)
    }

    /// Strategy -> diff -> overlay -> commit, the production path a
    /// maintenance tick drives, moving the bot from REBALANCING to
    /// BROADCASTING. Empty-action plans never reach `execute_batch`.
    pub async fn plan_rebalance(&mut self, inputs: &PlanInputs) -> Result<CommitOutcome> {
        self.state = BotState::Rebalancing;

        let (buy_targets, buy_residue) =
            strategy::build_target_side(SlotType::Buy, inputs, inputs.buy, "buy");
        let (sell_targets, sell_residue) =
            strategy::build_target_side(SlotType::Sell, inputs, inputs.sell, "sell");
        if buy_residue > Decimal::ZERO {
            self.accountant
                .modify_cache_funds(Side::Buy, buy_residue, "sub-minimum allocation residue");
        }
        if sell_residue > Decimal::ZERO {
            self.accountant
                .modify_cache_funds(Side::Sell, sell_residue, "sub-minimum allocation residue");
        }

        let mut targets = buy_targets;
        targets.extend(sell_targets);

        let outcome = strategy::diff_to_actions(&self.master, &targets, inputs.regeneration_threshold);
        if outcome.spread_role_conversion_blocked > 0 {
            warn!(
                count = outcome.spread_role_conversion_blocked,
                "role-assignment guard blocked ACTIVE->SPREAD conversion(s)"
            );
        }

        if outcome.actions.is_empty() {
            debug!(ctx = %self.account_id, "No actions needed for {}", self.account_id);
            self.state = BotState::Normal;
            return Ok(CommitOutcome::default());
        }

        let working = working_grid_from_actions(&self.master, &outcome.actions);
        self.state = BotState::Broadcasting;
        self.flags.broadcasting = true;
        let result = self.execute_batch(&outcome.actions, working).await;
        self.flags.broadcasting = false;
        self.state = BotState::Normal;
        result
    }

    /// Clear each filled slot to SPREAD and advance the boundary toward
    /// the filled side. Filled-slot clearing is a
    /// fill-driven transition, not a planner re-target, so it bypasses
    /// the role-assignment guard (which only blocks planner CREATE/UPDATE
    /// passes from reassigning a still-live slot).
    pub async fn apply_fill_matches(
        &mut self,
        slot_ids: &[String],
        new_boundary_idx: Option<usize>,
    ) -> Result<CommitOutcome> {
        if slot_ids.is_empty() {
            return Ok(CommitOutcome::default());
        }

        let mut working = WorkingGrid::new(&self.master);
        for slot_id in slot_ids {
            if let Some(existing) = self.master.get(slot_id) {
                let mut cleared = existing.clone();
                cleared.slot_type = SlotType::Spread;
                cleared.state = SlotState::Virtual;
                cleared.order_id = None;
                cleared.size = Decimal::ZERO;
                working.set(cleared);
            }
        }
        if let Some(idx) = new_boundary_idx {
            working.set_boundary_idx(idx);
        }

        match working.commit(&self.master) {
            Ok(new_master) => {
                self.master = new_master;
                info!(version = self.master.version, "Grid committed (fill boundary advance)");
                Ok(CommitOutcome {
                    executed: true,
                    aborted: false,
                    reason: None,
                })
            }
            Err(GridError::CommitStaleBase { base, current }) => {
                warn!(base, current, "fill-driven commit rejected: stale base");
                Ok(CommitOutcome {
                    executed: false,
                    aborted: true,
                    reason: Some("STALE_BASE".to_string()),
                })
            }
            Err(GridError::CommitEmptyDelta) => Ok(CommitOutcome {
                executed: false,
                aborted: true,
                reason: Some("EMPTY_DELTA".to_string()),
            }),
            Err(other) => Err(other),
        }
    }

    async fn trigger_state_recovery_sync(&mut self) -> Result<()> {
        self.flags.recovery_in_flight = true;
        self.recovery_sync_calls += 1;
        warn!("triggering state recovery sync");
        // A full recovery re-reads chain truth via `ChainAdapter::read_open_orders`
        // and rebuilds the master; left to the caller to wire a fresh
        // MasterGrid back in via `replace_master`, since that requires
        // asset/pair context the bot doesn't hold here.
        self.flags.recovery_in_flight = false;
        Ok(())
    }

    pub fn replace_master(&mut self, master: MasterGrid) {
        self.master = master;
    }

    /// Commit guard: re-check every CREATE's target slot is still free,
    /// validate `available[side]` covers the running per-side total of
    /// the whole batch's cost, then broadcast. Cache deduction happens at
    /// the moment of commit, not post-batch.
    pub async fn execute_batch(
        &mut self,
        actions: &[Action],
        working: WorkingGrid,
    ) -> Result<CommitOutcome> {
        for action in actions {
            if let Action::Create { slot } = action {
                if let Some(existing) = self.master.get(&slot.id) {
                    if existing.is_live() {
                        self.state = BotState::Normal;
                        return Ok(CommitOutcome {
                            executed: false,
                            aborted: true,
                            reason: Some("CREATE_SLOT_OCCUPIED".to_string()),
                        });
                    }
                }
            }
        }

        let mut committed_so_far = [Decimal::ZERO; 2];
        for action in actions {
            let (side, cost) = cost_of(&self.master, action);
            let idx = side_idx(side);
            committed_so_far[idx] += cost;
            if self.accountant.available(side) < committed_so_far[idx] {
                self.state = BotState::Normal;
                return Ok(CommitOutcome {
                    executed: false,
                    aborted: true,
                    reason: Some("INSUFFICIENT_AVAILABLE".to_string()),
                });
            }
        }

        let ops = self.build_ops(actions);

        self.flags.batch_in_flight = true;
        let broadcast_result = self.adapter.execute_batch(&self.account_id, ops).await;
        self.flags.batch_in_flight = false;

        let broadcast_result = match broadcast_result {
            Ok(result) => result,
            Err(err) => return self.handle_batch_error(err, actions).await,
        };

        if let Some(code) = self.classify_broadcast_failures(&broadcast_result) {
            let err = if code == "STALE_ORDER" {
                GridError::StaleOrder {
                    order_id: String::new(),
                }
            } else {
                GridError::IllegalOrderState {
                    order_id: String::new(),
                }
            };
            return self.handle_batch_error(err, actions).await;
        }

        if !broadcast_result.success {
            warn!("broadcast reported failure with no classifiable op; aborting without commit");
            self.state = BotState::Normal;
            return Ok(CommitOutcome {
                executed: false,
                aborted: true,
                reason: Some("BROADCAST_FAILED".to_string()),
            });
        }

        self.update_optimistic_free_balance(actions);
        let committed = working.commit(&self.master);
        match committed {
            Ok(new_master) => {
                self.master = new_master;
                info!(version = self.master.version, "Grid committed");
                Ok(CommitOutcome {
                    executed: true,
                    aborted: false,
                    reason: None,
                })
            }
            Err(GridError::CommitStaleBase { base, current }) => {
                warn!(base, current, "commit rejected: stale base");
                Ok(CommitOutcome {
                    executed: false,
                    aborted: true,
                    reason: Some("STALE_BASE".to_string()),
                })
            }
            Err(GridError::CommitEmptyDelta) => Ok(CommitOutcome {
                executed: false,
                aborted: true,
                reason: Some("EMPTY_DELTA".to_string()),
            }),
            Err(other) => Err(other),
        }
    }

    /// Cache deduction applied at commit time, not post-batch.
    fn update_optimistic_free_balance(&mut self, actions: &[Action]) {
        for action in actions {
            let (side, cost) = cost_of(&self.master, action);
            if cost > rust_decimal::Decimal::ZERO {
                self.accountant.add_virtual_committed(side, cost);
            }
        }
    }

    /// A slot's `(sell_asset, recv_asset)` legs: BUY sells the quote asset
    /// to receive the base asset it's accumulating; SELL sells the base
    /// asset to receive quote. `size` is always base-denominated, so the
    /// sell/recv amounts differ by a factor of `price` depending on the side.
    fn order_legs(&self, slot_type: SlotType, price: Decimal, size: Decimal) -> (Decimal, &Asset, Decimal, &Asset) {
        match slot_type {
            SlotType::Buy => (size * price, &self.pair.quote, size, &self.pair.base),
            SlotType::Sell | SlotType::Spread => (size, &self.pair.base, size * price, &self.pair.quote),
        }
    }

    fn expiration(&self) -> String {
        let expires_at = chrono::Utc::now() + chrono::Duration::seconds(self.order_expiration_secs);
        expires_at.format("%Y-%m-%dT%H:%M:%S").to_string()
    }

    /// Synthesizes the "cached" on-chain order `buildUpdateOp` diffs
    /// against, for a live slot whose `rawOnChain` wasn't
    /// populated from a chain read this tick. Quantizes the slot's own
    /// price/size through the same legs a CREATE for it would have used.
    fn synthesize_cached_order(&self, slot: &Slot) -> RawChainOrder {
        let (sell_amount, sell_asset, recv_amount, recv_asset) =
            self.order_legs(slot.slot_type, slot.price, slot.size);
        let sell_int = precision::to_int(sell_amount, sell_asset.precision);
        let recv_int = precision::to_int(recv_amount, recv_asset.precision);
        RawChainOrder {
            id: slot.order_id.clone().unwrap_or_else(|| ChainId::new("")),
            seller: self.account_id.clone(),
            sell_price: RawPrice {
                base: gridbot_chain::types::AmountPair::new(sell_int, sell_asset.id.clone()),
                quote: gridbot_chain::types::AmountPair::new(recv_int, recv_asset.id.clone()),
            },
            for_sale: sell_int,
            expiration: self.expiration(),
        }
    }

    /// Turns diffed planner `Action`s into broadcastable `ChainOp`s via
    /// `ChainAdapter`. A `CREATE`/`UPDATE` that quantizes to a
    /// no-op (e.g. below integer resolution) is silently dropped from
    /// the batch, matching `buildCreateOp`/`buildUpdateOp`'s `None` contract.
    fn build_ops(&self, actions: &[Action]) -> Vec<ChainOp> {
        let expiration = self.expiration();
        let mut ops = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                Action::Create { slot } => {
                    let (sell_amount, sell_asset, recv_amount, recv_asset) =
                        self.order_legs(slot.slot_type, slot.price, slot.size);
                    if let Some(op) = self.adapter.build_create_op(
                        &self.account_id,
                        sell_amount,
                        &sell_asset.id,
                        sell_asset.precision,
                        recv_amount,
                        &recv_asset.id,
                        recv_asset.precision,
                        expiration.clone(),
                    ) {
                        ops.push(op);
                    } else {
                        warn!(slot_id = %slot.id, "CREATE quantized to a non-positive amount; skipping");
                    }
                }
                Action::Update {
                    slot_id,
                    order_id,
                    new_size,
                    new_price,
                } => {
                    let existing = self.master.get(slot_id);
                    let slot_type = existing.map(|s| s.slot_type).unwrap_or(SlotType::Buy);
                    let (sell_amount, sell_asset, recv_amount, recv_asset) =
                        self.order_legs(slot_type, *new_price, *new_size);
                    let fallback_slot;
                    let cached_source = match existing {
                        Some(s) => s,
                        None => {
                            fallback_slot = Slot::virtual_target(slot_id.clone(), slot_type, *new_price, *new_size);
                            &fallback_slot
                        }
                    };
                    let cached = cached_source
                        .raw_on_chain
                        .clone()
                        .unwrap_or_else(|| self.synthesize_cached_order(cached_source));

                    let params = NewOrderParams {
                        new_sell_amount: Some(sell_amount),
                        new_price: Some(*new_price),
                        min_to_receive: Some((recv_amount, recv_asset.id.clone())),
                    };
                    if let Some(op) = self.adapter.build_update_op(
                        &self.account_id,
                        order_id,
                        &params,
                        &cached,
                        &sell_asset.id,
                        sell_asset.precision,
                        &recv_asset.id,
                        recv_asset.precision,
                    ) {
                        ops.push(op);
                    }
                }
                Action::Cancel { order_id, .. } => {
                    ops.push(self.adapter.build_cancel_op(&self.account_id, order_id));
                }
            }
        }
        ops
    }

    /// Retries: "order not found" on cancel/update is a benign
    /// race (stale-only fast path); `ILLEGAL_ORDER_STATE` triggers a
    /// recovery sync and arms a one-tick cooldown; anything else aborts.
    async fn handle_batch_error(&mut self, err: GridError, actions: &[Action]) -> Result<CommitOutcome> {
        self.state = BotState::Normal;

        if err.is_stale_order() {
            if let Action::Cancel { order_id, .. } | Action::Update { order_id, .. } =
                actions.first().cloned().unwrap_or(Action::Cancel {
                    slot_id: String::new(),
                    order_id: ChainId::new(""),
                })
            {
                self.flags.stale_cleaned_order_ids.insert(order_id);
            }
            return Ok(CommitOutcome {
                executed: false,
                aborted: true,
                reason: Some("STALE_ORDER".to_string()),
            });
        }

        if err.is_illegal_order_state() {
            self.trigger_state_recovery_sync().await?;
            self.flags.maintenance_cooldown_cycles = 1;
            return Ok(CommitOutcome {
                executed: false,
                aborted: true,
                reason: Some("ILLEGAL_ORDER_STATE".to_string()),
            });
        }

        Err(err)
    }

    /// Interpret a normalized broadcast response for stale/illegal-state
    /// rejections even when the transport call itself succeeded but one
    /// op inside the batch failed, per the batch's per-op `OperationResult`.
    pub fn classify_broadcast_failures(&self, result: &BroadcastResult) -> Option<&'static str> {
        for op_result in &result.operation_results {
            if let OperationResult::Failed { code, message } = op_result {
                let lowered = message.to_ascii_lowercase();
                if lowered.contains("does not exist") || code == "STALE_ORDER" {
                    return Some("STALE_ORDER");
                }
                if code == "ILLEGAL_ORDER_STATE" {
                    return Some("ILLEGAL_ORDER_STATE");
                }
            }
        }
        None
    }

    /// Rotation fallback recheck: when a planned UPDATE can't be
    /// built because the order looks missing, re-read the chain once.
    /// Present -> keep UPDATE (return `None`, caller should not fall
    /// back). Absent -> convert to CREATE. Errored -> defer this tick.
    pub async fn rotation_fallback_recheck(
        &self,
        order_id: &ChainId,
        base_asset_id: &str,
        quote_asset_id: &str,
        depth: u32,
    ) -> Result<RotationOutcome> {
        let orders = self
            .adapter
            .read_open_orders(&self.account_id, base_asset_id, quote_asset_id, depth)
            .await;

        match orders {
            Ok(orders) => {
                if orders.iter().any(|o| &o.id == order_id) {
                    Ok(RotationOutcome::KeepUpdate)
                } else {
                    Ok(RotationOutcome::ConvertToCreate)
                }
            }
            Err(_) => Ok(RotationOutcome::DeferThisTick),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    KeepUpdate,
    ConvertToCreate,
    DeferThisTick,
}

/// Build the COW overlay a diffed plan implies: CREATE stages a fresh
/// virtual slot, UPDATE stages the existing live slot with its new
/// size/price, CANCEL stages the slot back to VIRTUAL with no capital
/// committed, mirroring the planner's diff-to-actions output.
fn working_grid_from_actions(master: &MasterGrid, actions: &[Action]) -> WorkingGrid {
    let mut working = WorkingGrid::new(master);
    for action in actions {
        match action {
            Action::Create { slot } => working.set(slot.clone()),
            Action::Update {
                slot_id,
                order_id,
                new_size,
                new_price,
            } => {
                if let Some(existing) = master.get(slot_id) {
                    let mut updated = existing.clone();
                    updated.size = *new_size;
                    updated.price = *new_price;
                    updated.order_id = Some(order_id.clone());
                    working.set(updated);
                }
            }
            Action::Cancel { slot_id, .. } => {
                if let Some(existing) = master.get(slot_id) {
                    let mut cleared = existing.clone();
                    cleared.state = SlotState::Virtual;
                    cleared.order_id = None;
                    cleared.size = Decimal::ZERO;
                    working.set(cleared);
                }
            }
        }
    }
    working
}

/// Cost committed against `available(side)` for one action, in the
/// side's own home-asset denomination: a BUY slot spends
/// quote (`size * price`), a SELL slot spends base (`size`) - `Slot.size`
/// itself is always base-denominated.
fn cost_of(master: &MasterGrid, action: &Action) -> (Side, rust_decimal::Decimal) {
    fn home_asset_cost(slot_type: SlotType, size: Decimal, price: Decimal) -> Decimal {
        match slot_type {
            SlotType::Buy => size * price,
            SlotType::Sell | SlotType::Spread => size,
        }
    }

    match action {
        Action::Create { slot } => (
            side_of(slot.slot_type),
            home_asset_cost(slot.slot_type, slot.size, slot.price),
        ),
        Action::Update {
            slot_id,
            new_size,
            new_price,
            ..
        } => {
            let slot_type = master
                .get(slot_id)
                .map(|slot| slot.slot_type)
                .unwrap_or(SlotType::Buy);
            (side_of(slot_type), home_asset_cost(slot_type, *new_size, *new_price))
        }
        Action::Cancel { .. } => (Side::Buy, rust_decimal::Decimal::ZERO),
    }
}

fn side_of(slot_type: SlotType) -> Side {
    match slot_type {
        SlotType::Buy => Side::Buy,
        SlotType::Sell | SlotType::Spread => Side::Sell,
    }
}

fn side_idx(side: Side) -> usize {
    match side {
        Side::Buy => 0,
        Side::Sell => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Slot, SlotType};
    use crate::strategy::SideTargets;
    use async_trait::async_trait;
    use gridbot_chain::{AccountSnapshot, ChainTransportError, FillEvent};
    use gridbot_chain::types::{Asset, ChainOp, RawChainOrder};
    use rust_decimal_macros::dec;

    fn empty_plan_inputs() -> PlanInputs {
        PlanInputs {
            market_price: dec!(1.0),
            increment_percent: dec!(0.01),
            buy: SideTargets {
                count: 0,
                weight: dec!(1),
                budget: dec!(0),
            },
            sell: SideTargets {
                count: 0,
                weight: dec!(1),
                budget: dec!(0),
            },
            min_order_size: dec!(0),
            precision: 5,
            regeneration_threshold: strategy::GRID_REGENERATION_PERCENTAGE,
        }
    }

    struct AlwaysOkConnector;

    #[async_trait]
    impl ChainConnector for AlwaysOkConnector {
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

    fn test_pair() -> AssetPair {
        AssetPair::new(Asset::new("1.3.0", "BASE", 5), Asset::new("1.3.1", "QUOTE", 5))
    }

    fn bot() -> Bot {
        let master = MasterGrid::new(0, vec![]);
        let accountant = Accountant::new(dec!(0), false, false);
        Bot::new(
            ChainId::new("1.2.1"),
            master,
            accountant,
            Arc::new(AlwaysOkConnector),
            test_pair(),
            86_400,
        )
    }

    #[tokio::test]
    async fn empty_plan_never_broadcasts() {
        let mut bot = bot();
        let ran = bot.maintenance_tick(Some(empty_plan_inputs())).await.unwrap();
        assert!(ran);
        assert_eq!(bot.master().version, 0);
    }

    #[tokio::test]
    async fn plan_rebalance_creates_missing_target_slots() {
        let mut bot = bot();
        bot.accountant_mut().set_account_totals(dec!(1000), dec!(1000));
        let mut inputs = empty_plan_inputs();
        inputs.buy = SideTargets {
            count: 1,
            weight: dec!(1),
            budget: dec!(100),
        };
        let outcome = bot.plan_rebalance(&inputs).await.unwrap();
        assert!(outcome.executed);
        assert_eq!(bot.master().version, 1);
        assert_eq!(bot.master().slots_by_type(SlotType::Buy).count(), 1);
    }

    #[tokio::test]
    async fn apply_fill_matches_clears_slot_to_spread_and_advances_boundary() {
        let mut slot = Slot::virtual_target("slot-0", SlotType::Buy, dec!(0.99), dec!(100));
        slot.state = SlotState::Active;
        slot.order_id = Some(ChainId::new("1.7.1"));
        let master = MasterGrid::new(1, vec![slot]);
        let accountant = Accountant::new(dec!(0), false, false);
        let mut bot = Bot::new(ChainId::new("1.2.1"), master, accountant, Arc::new(AlwaysOkConnector), test_pair(), 86_400);

        let outcome = bot
            .apply_fill_matches(&["slot-0".to_string()], Some(0))
            .await
            .unwrap();
        assert!(outcome.executed);
        assert_eq!(bot.master().boundary_idx, 0);
        let cleared = bot.master().get("slot-0").unwrap();
        assert_eq!(cleared.slot_type, SlotType::Spread);
        assert_eq!(cleared.size, Decimal::ZERO);
        assert!(cleared.order_id.is_none());
    }

    #[tokio::test]
    async fn stale_base_commit_leaves_master_untouched() {
        let mut bot = bot();
        let mut working = WorkingGrid::new(bot.master());
        working.set(Slot::virtual_target("slot-0", SlotType::Buy, dec!(0.99), dec!(10)));

        // Advance master out from under the working grid's base version.
        bot.master = bot.master.publish(bot.master.snapshot_map());

        let before = bot.master().clone();
        let outcome = bot.execute_batch(&[], working).await.unwrap();
        assert!(outcome.aborted);
        assert_eq!(bot.master(), &before);
    }

    #[tokio::test]
    async fn occupied_create_slot_aborts_before_broadcast() {
        let mut slot = Slot::virtual_target("slot-1", SlotType::Sell, dec!(1.1), dec!(10));
        slot.state = SlotState::Active;
        slot.order_id = Some(ChainId::new("1.7.1"));
        let master = MasterGrid::new(0, vec![slot]);
        let accountant = Accountant::new(dec!(0), false, false);
        let mut bot = Bot::new(ChainId::new("1.2.1"), master, accountant, Arc::new(AlwaysOkConnector), test_pair(), 86_400);

        let working = WorkingGrid::new(bot.master());
        let conflicting = Action::Create {
            slot: Slot::virtual_target("slot-1", SlotType::Sell, dec!(1.1), dec!(10)),
        };
        let outcome = bot.execute_batch(&[conflicting], working).await.unwrap();
        assert!(outcome.aborted);
        assert_eq!(outcome.reason.as_deref(), Some("CREATE_SLOT_OCCUPIED"));
    }

    #[tokio::test]
    async fn commit_guard_rejects_a_batch_that_jointly_exceeds_available_even_when_each_action_fits_alone() {
        let mut bot = bot();
        // 100 quote available; each CREATE alone costs 60 (fits), but the
        // pair together costs 120 - the guard must accumulate, not check
        // each action against the static starting balance.
        bot.accountant_mut().set_account_totals(dec!(100), dec!(0));

        let working = WorkingGrid::new(bot.master());
        let actions = vec![
            Action::Create {
                slot: Slot::virtual_target("slot-0", SlotType::Buy, dec!(1.0), dec!(60)),
            },
            Action::Create {
                slot: Slot::virtual_target("slot-1", SlotType::Buy, dec!(1.0), dec!(60)),
            },
        ];
        let outcome = bot.execute_batch(&actions, working).await.unwrap();
        assert!(outcome.aborted);
        assert_eq!(outcome.reason.as_deref(), Some("INSUFFICIENT_AVAILABLE"));
        assert_eq!(bot.master().version, 0);
    }

    struct ScriptedBroadcastConnector {
        result: BroadcastResult,
    }

    #[async_trait]
    impl ChainConnector for ScriptedBroadcastConnector {
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
            Ok(self.result.clone())
        }
        async fn subscribe_account(
            &self,
            _account_id: &ChainId,
        ) -> gridbot_chain::Result<tokio::sync::mpsc::UnboundedReceiver<FillEvent>> {
            Err(ChainTransportError::NoReachableNode)
        }
    }

    fn bot_with_broadcast_result(result: BroadcastResult) -> Bot {
        let master = MasterGrid::new(0, vec![]);
        let accountant = Accountant::new(dec!(0), false, false);
        Bot::new(
            ChainId::new("1.2.1"),
            master,
            accountant,
            Arc::new(ScriptedBroadcastConnector { result }),
            test_pair(),
            86_400,
        )
    }

    #[tokio::test]
    async fn a_transport_success_with_a_failed_op_inside_does_not_commit() {
        let mut bot = bot_with_broadcast_result(BroadcastResult {
            success: false,
            operation_results: vec![OperationResult::Failed {
                code: "ILLEGAL_ORDER_STATE".to_string(),
                message: "order state mismatch".to_string(),
            }],
            transaction_id: Some("1.2.3".to_string()),
        });
        bot.accountant_mut().set_account_totals(dec!(1000), dec!(1000));
        let working = WorkingGrid::new(bot.master());
        let actions = vec![Action::Create {
            slot: Slot::virtual_target("slot-0", SlotType::Buy, dec!(1.0), dec!(10)),
        }];

        let outcome = bot.execute_batch(&actions, working).await.unwrap();
        assert!(outcome.aborted);
        assert_eq!(outcome.reason.as_deref(), Some("ILLEGAL_ORDER_STATE"));
        assert_eq!(bot.master().version, 0, "a failed op inside the batch must not commit");
        assert_eq!(bot.recovery_sync_calls, 1);
        assert_eq!(bot.maintenance_cooldown_cycles(), 1);
    }

    #[tokio::test]
    async fn an_unclassifiable_broadcast_failure_aborts_without_committing() {
        let mut bot = bot_with_broadcast_result(BroadcastResult {
            success: false,
            operation_results: vec![OperationResult::Failed {
                code: "UNKNOWN".to_string(),
                message: "node rejected the transaction".to_string(),
            }],
            transaction_id: None,
        });
        bot.accountant_mut().set_account_totals(dec!(1000), dec!(1000));
        let working = WorkingGrid::new(bot.master());
        let actions = vec![Action::Create {
            slot: Slot::virtual_target("slot-0", SlotType::Buy, dec!(1.0), dec!(10)),
        }];

        let outcome = bot.execute_batch(&actions, working).await.unwrap();
        assert!(outcome.aborted);
        assert_eq!(outcome.reason.as_deref(), Some("BROADCAST_FAILED"));
        assert_eq!(bot.master().version, 0);
    }

    #[tokio::test]
    async fn illegal_state_error_triggers_recovery_and_arms_cooldown() {
        let mut bot = bot();
        let working = WorkingGrid::new(bot.master());
        let err = GridError::IllegalOrderState {
            order_id: "1.7.1".to_string(),
        };
        let outcome = bot.handle_batch_error(err, &[]).await.unwrap();
        assert!(outcome.aborted);
        assert_eq!(bot.recovery_sync_calls, 1);
        assert_eq!(bot.maintenance_cooldown_cycles(), 1);
        let _ = working;
    }

    #[tokio::test]
    async fn stale_order_error_takes_fast_path_without_cooldown() {
        let mut bot = bot();
        let err = GridError::StaleOrder {
            order_id: "1.7.999".to_string(),
        };
        let actions = vec![Action::Cancel {
            slot_id: "slot-1".to_string(),
            order_id: ChainId::new("1.7.999"),
        }];
        let outcome = bot.handle_batch_error(err, &actions).await.unwrap();
        assert!(outcome.aborted);
        assert_eq!(bot.recovery_sync_calls, 0);
        assert_eq!(bot.maintenance_cooldown_cycles(), 0);
        assert!(bot.stale_cleaned_order_ids().contains(&ChainId::new("1.7.999")));
    }

    #[test]
    fn build_ops_creates_a_buy_order_selling_quote() {
        let bot = bot();
        let slot = Slot::virtual_target("slot-0", SlotType::Buy, dec!(0.98), dec!(100));
        let ops = bot.build_ops(&[Action::Create { slot }]);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            ChainOp::Create(op) => {
                // BUY slot at price 0.98, size 100: sells 98 quote (1.3.1) to
                // receive 100 base (1.3.0).
                assert_eq!(op.amount_to_sell.asset_id, "1.3.1");
                assert_eq!(op.amount_to_sell.amount, 98_00000);
                assert_eq!(op.min_to_receive.asset_id, "1.3.0");
                assert_eq!(op.min_to_receive.amount, 100_00000);
            }
            other => panic!("expected a Create op, got {other:?}"),
        }
    }

    #[test]
    fn build_ops_update_carries_the_new_sell_amount() {
        let mut slot = Slot::virtual_target("slot-0", SlotType::Sell, dec!(1.05), dec!(10));
        slot.state = SlotState::Active;
        slot.order_id = Some(ChainId::new("1.7.1"));
        let master = MasterGrid::new(0, vec![slot]);
        let accountant = Accountant::new(dec!(0), false, false);
        let bot = Bot::new(ChainId::new("1.2.1"), master, accountant, Arc::new(AlwaysOkConnector), test_pair(), 86_400);

        let ops = bot.build_ops(&[Action::Update {
            slot_id: "slot-0".to_string(),
            order_id: ChainId::new("1.7.1"),
            new_size: dec!(20),
            new_price: dec!(1.05),
        }]);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            ChainOp::Update(op) => {
                // SELL slot sells base; size doubled from 10 to 20 means the
                // delta the chain op carries should reflect the new total.
                let delta = op.delta_amount_to_sell.as_ref().expect("size changed, delta expected");
                assert_eq!(delta.asset_id, "1.3.0");
                assert_eq!(delta.amount, 10_00000);
            }
            other => panic!("expected an Update op, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fund_drift_beyond_tolerance_forces_recovery_on_next_tick() {
        let mut bot = bot();
        bot.accountant_mut().set_account_totals(dec!(40), dec!(0));

        // No committed orders on the grid, so expected == chainFree(40);
        // an actual balance wildly off from that should fail the check
        // and latch a recovery sync for the next maintenance tick.
        let ok = bot.check_fund_drift(Side::Buy, dec!(1000), 5);
        assert!(!ok);

        let ran = bot.maintenance_tick(Some(empty_plan_inputs())).await.unwrap();
        assert!(!ran, "tick should defer into recovery sync, not run normally");
        assert_eq!(bot.recovery_sync_calls, 1);
        assert_eq!(bot.maintenance_cooldown_cycles(), 1);
    }

    #[tokio::test]
    async fn fund_drift_within_tolerance_does_not_interrupt_maintenance() {
        let mut bot = bot();
        bot.accountant_mut().set_account_totals(dec!(40), dec!(0));

        let ok = bot.check_fund_drift(Side::Buy, dec!(40), 5);
        assert!(ok);

        let ran = bot.maintenance_tick(Some(empty_plan_inputs())).await.unwrap();
        assert!(ran);
        assert_eq!(bot.recovery_sync_calls, 0);
    }

    struct CountingConnector {
        full_accounts_calls: Arc<std::sync::atomic::AtomicUsize>,
        present_order: Option<ChainId>,
    }

    #[async_trait]
    impl ChainConnector for CountingConnector {
        async fn get_full_accounts(&self, _ids: &[ChainId]) -> gridbot_chain::Result<Vec<AccountSnapshot>> {
            self.full_accounts_calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Vec::new())
        }
        async fn get_limit_orders(
            &self,
            _base: &str,
            _quote: &str,
            _depth: u32,
        ) -> gridbot_chain::Result<Vec<RawChainOrder>> {
            match &self.present_order {
                Some(id) => Ok(vec![RawChainOrder {
                    id: id.clone(),
                    seller: ChainId::new("1.2.1"),
                    sell_price: gridbot_chain::types::RawPrice {
                        base: gridbot_chain::types::AmountPair::new(100, "1.3.0"),
                        quote: gridbot_chain::types::AmountPair::new(100, "1.3.1"),
                    },
                    for_sale: 100,
                    expiration: "2030-01-01T00:00:00".to_string(),
                }]),
                None => Ok(Vec::new()),
            }
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

    fn bot_with(connector: CountingConnector) -> Bot {
        let master = MasterGrid::new(0, vec![]);
        let accountant = Accountant::new(dec!(0), false, false);
        Bot::new(
            ChainId::new("1.2.1"),
            master,
            accountant,
            Arc::new(connector),
            test_pair(),
            86_400,
        )
    }

    #[tokio::test]
    async fn rotation_fallback_keeps_update_and_reads_chain_exactly_once_when_order_present() {
        let order_id = ChainId::new("1.7.1");
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let connector = CountingConnector {
            full_accounts_calls: calls.clone(),
            present_order: Some(order_id.clone()),
        };
        let bot = bot_with(connector);

        let outcome = bot
            .rotation_fallback_recheck(&order_id, "1.3.0", "1.3.1", 50)
            .await
            .unwrap();
        assert_eq!(outcome, RotationOutcome::KeepUpdate);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rotation_fallback_converts_to_create_and_reads_chain_exactly_once_when_order_absent() {
        let order_id = ChainId::new("1.7.1");
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let connector = CountingConnector {
            full_accounts_calls: calls.clone(),
            present_order: None,
        };
        let bot = bot_with(connector);

        let outcome = bot
            .rotation_fallback_recheck(&order_id, "1.3.0", "1.3.1", 50)
            .await
            .unwrap();
        assert_eq!(outcome, RotationOutcome::ConvertToCreate);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
