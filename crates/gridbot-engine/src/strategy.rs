/*
[INPUT]:  Current MasterGrid, market price, target order counts, fund
          budgets per side, weight distribution, min order size.
[OUTPUT]: A target grid (geometric half-ladders) diffed against master
          into `Action`s; RMS divergence detection between target and
          persisted grids.
[POS]:    Planning layer - the heaviest single component by line share;
          everything downstream (ChainAdapter, Pipeline) acts on its output.
[UPDATE]: When the weighting/allocation formula or the diff thresholds change.
*/

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

use crate::grid::{Action, MasterGrid, Slot, SlotState, SlotType};
use crate::precision;

/// Default named tolerance: an active slot's target size must differ
/// by at least this fraction of its current size before it's reworked
/// into an UPDATE action.
pub const GRID_REGENERATION_PERCENTAGE: Decimal = dec!(0.03);

/// Default named tolerance for RMS divergence between calculated and
/// persisted grids (~1/7).
pub fn rms_percentage_default() -> Decimal {
    Decimal::from(1) / Decimal::from(7)
}

#[derive(Debug, Clone, Copy)]
pub struct SideTargets {
    pub count: usize,
    pub weight: Decimal,
    pub budget: Decimal,
}

#[derive(Debug, Clone)]
pub struct PlanInputs {
    pub market_price: Decimal,
    pub increment_percent: Decimal,
    pub buy: SideTargets,
    pub sell: SideTargets,
    pub min_order_size: Decimal,
    pub precision: u8,
    pub regeneration_threshold: Decimal,
}

impl PlanInputs {
    pub fn with_default_regeneration_threshold(mut self) -> Self {
        self.regeneration_threshold = GRID_REGENERATION_PERCENTAGE;
        self
    }
}

/// One side's worth of target prices and sizes, produced by the ladder-
/// construction steps before diffing against the master.
#[derive(Debug, Clone)]
pub struct TargetSlot {
    pub id: String,
    pub slot_type: SlotType,
    pub price: Decimal,
    pub size: Decimal,
}

/// Step 1: half-grid of `n` prices walking away from `market_price` by
/// `(1 ± inc)^k`, k = 1..=n. BUY prices decrease, SELL prices increase.
pub fn geometric_prices(
    market_price: Decimal,
    increment_percent: Decimal,
    n: usize,
    side: SlotType,
) -> Vec<Decimal> {
    let factor = match side {
        SlotType::Buy => Decimal::ONE - increment_percent,
        SlotType::Sell => Decimal::ONE + increment_percent,
        SlotType::Spread => return Vec::new(),
    };
    let mut prices = Vec::with_capacity(n);
    let mut multiplier = Decimal::ONE;
    for _ in 0..n {
        multiplier *= factor;
        prices.push(market_price * multiplier);
    }
    prices
}

/// Step 2: `allocate_funds_by_weights`. Assigns raw weights
/// `w_k = (1 - inc)^(idx * weight)`, `idx` reversed for BUY so the
/// largest weight sits nearest the market, normalizes to sum 1, scales
/// by `total`, quantizes each bucket to integer units, and redistributes
/// the remainder into the largest bucket so integer sums equal
/// `to_int(total, precision)` exactly.
pub fn allocate_funds_by_weights(
    total: Decimal,
    n: usize,
    weight: Decimal,
    increment_percent: Decimal,
    reverse: bool,
    precision: u8,
) -> Vec<Decimal> {
    if n == 0 {
        return Vec::new();
    }

    let base = Decimal::ONE - increment_percent;
    let weight_multiplier = weight.round().to_i64().unwrap_or(1).max(0);
    let raw_weights: Vec<Decimal> = (0..n)
        .map(|k| {
            let idx = if reverse { n - 1 - k } else { k } as i64;
            pow_decimal(base, idx * weight_multiplier)
        })
        .collect();

    let weight_sum: Decimal = raw_weights.iter().copied().sum();
    let normalized: Vec<Decimal> = raw_weights.iter().map(|w| *w / weight_sum).collect();

    let total_units = precision::to_int(total, precision);
    let mut unit_allocations: Vec<i64> = normalized
        .iter()
        .map(|w| precision::to_int(total * *w, precision))
        .collect();

    let allocated: i64 = unit_allocations.iter().sum();
    let remainder = total_units - allocated;
    if remainder != 0 {
        if let Some((largest_idx, _)) = unit_allocations
            .iter()
            .enumerate()
            .max_by_key(|(_, v)| **v)
        {
            unit_allocations[largest_idx] += remainder;
        }
    }

    unit_allocations
        .into_iter()
        .map(|units| precision::to_float(units, precision))
        .collect()
}

fn pow_decimal(base: Decimal, exponent: i64) -> Decimal {
    if exponent == 0 {
        return Decimal::ONE;
    }
    let mut result = Decimal::ONE;
    let abs_exp = exponent.unsigned_abs();
    for _ in 0..abs_exp {
        result *= base;
    }
    if exponent < 0 {
        Decimal::ONE / result
    } else {
        result
    }
}

/// Build a full target ladder for one side, filter
/// out sub-minimum sizes, and report the filtered-out budget so the
/// caller can fold it into `cacheFunds[side]`.
pub fn build_target_side(
    side: SlotType,
    inputs: &PlanInputs,
    targets: SideTargets,
    id_prefix: &str,
) -> (Vec<TargetSlot>, Decimal) {
    let prices = geometric_prices(
        inputs.market_price,
        inputs.increment_percent,
        targets.count,
        side,
    );
    let sizes = allocate_funds_by_weights(
        targets.budget,
        targets.count,
        targets.weight,
        inputs.increment_percent,
        side == SlotType::Buy,
        inputs.precision,
    );

    let mut slots = Vec::with_capacity(targets.count);
    let mut filtered_budget = Decimal::ZERO;
    for (k, (price, size)) in prices.into_iter().zip(sizes).enumerate() {
        if size < inputs.min_order_size {
            filtered_budget += size;
            continue;
        }
        slots.push(TargetSlot {
            id: format!("{id_prefix}-{k}"),
            slot_type: side,
            price,
            size,
        });
    }

    (slots, filtered_budget)
}

#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    pub actions: Vec<Action>,
    pub spread_role_conversion_blocked: u64,
}

/// Diff a target ladder against the current master into CREATE / UPDATE
/// / CANCEL actions.
///
/// CREATE actions are ordered inside-to-outside (market-adjacent first),
/// matching the spec's placement-priority note in step 4.
pub fn diff_to_actions(master: &MasterGrid, targets: &[TargetSlot], threshold: Decimal) -> PlanOutcome {
    let mut outcome = PlanOutcome::default();
    let mut creates = Vec::new();

    for target in targets {
        match master.get(&target.id) {
            None => {
                creates.push(Action::Create {
                    slot: Slot::virtual_target(
                        target.id.clone(),
                        target.slot_type,
                        target.price,
                        target.size,
                    ),
                });
            }
            Some(existing) if existing.is_live() => {
                let delta = (target.size - existing.size).abs();
                let relative = if existing.size.is_zero() {
                    Decimal::ONE
                } else {
                    delta / existing.size
                };
                if relative >= threshold {
                    outcome.actions.push(Action::Update {
                        slot_id: target.id.clone(),
                        order_id: existing.order_id.clone().expect("live slot carries order id"),
                        new_size: target.size,
                        new_price: target.price,
                    });
                }
            }
            Some(_virtual_slot) => {
                creates.push(Action::Create {
                    slot: Slot::virtual_target(
                        target.id.clone(),
                        target.slot_type,
                        target.price,
                        target.size,
                    ),
                });
            }
        }
    }

    let target_ids: std::collections::HashSet<&str> =
        targets.iter().map(|t| t.id.as_str()).collect();
    for existing in master.iter() {
        if existing.is_live() && !target_ids.contains(existing.id.as_str()) {
            outcome.actions.push(Action::Cancel {
                slot_id: existing.id.clone(),
                order_id: existing.order_id.clone().expect("live slot carries order id"),
            });
        }
    }

    outcome.actions.extend(creates);
    outcome
}

/// Role-assignment guard: a slot ACTIVE/PARTIAL on chain is never
/// reassigned to SPREAD in the same plan. Call before applying any
/// SPREAD retarget; returns `false` (and bumps the blocked counter) when
/// the retarget must be dropped.
pub fn guard_spread_reassignment(
    master: &MasterGrid,
    slot_id: &str,
    outcome: &mut PlanOutcome,
) -> bool {
    match master.get(slot_id) {
        Some(slot) if slot.is_live() => {
            outcome.spread_role_conversion_blocked += 1;
            false
        }
        _ => true,
    }
}

/// RMS divergence between a calculated (target) grid and the persisted
/// (master) grid for one side. Unmatched target entries (no master slot
/// of the same id) contribute `e = 1`. Returns the metric; caller
/// compares against `RMS_PERCENTAGE`.
pub fn rms_divergence(master: &MasterGrid, targets: &[TargetSlot]) -> Decimal {
    if targets.is_empty() {
        return Decimal::ZERO;
    }
    let mut sum_sq = Decimal::ZERO;
    for target in targets {
        let e = match master.get(&target.id) {
            Some(existing) if !existing.size.is_zero() => {
                (existing.size - target.size) / target.size
            }
            Some(_) => Decimal::ONE,
            None => Decimal::ONE,
        };
        sum_sq += e * e;
    }
    let mean_sq = sum_sq / Decimal::from(targets.len());
    decimal_sqrt(mean_sq)
}

/// Newton's method sqrt for `Decimal` (no native `sqrt` on stable
/// `rust_decimal` without the `maths` feature); good to several digits
/// in a handful of iterations, which is all an RMS threshold check needs.
fn decimal_sqrt(value: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let mut guess = value;
    for _ in 0..40 {
        guess = (guess + value / guess) / Decimal::from(2);
    }
    guess
}

/// Exposed for readers that need an f64 comparison against a configured
/// threshold sourced from a float-based config file.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}
