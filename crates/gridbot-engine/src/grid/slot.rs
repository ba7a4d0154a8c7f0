/*
[INPUT]:  Planner output (Strategy), chain order parses (ChainAdapter),
          fill events (FillProcessor).
[OUTPUT]: `Slot`, `SlotType`, `SlotState`, `Action` - the unit of grid state
          and the planner's diff output.
[POS]:    Data layer - the record every other grid component reads/writes.
[UPDATE]: When a new slot invariant or action variant is introduced.
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gridbot_chain::types::{ChainId, RawChainOrder};

pub type SlotId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotType {
    Buy,
    Sell,
    Spread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Virtual,
    Active,
    Partial,
}

impl SlotState {
    /// `state = ACTIVE | PARTIAL` iff `orderId = Some`.
    pub fn requires_order_id(self) -> bool {
        matches!(self, SlotState::Active | SlotState::Partial)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    pub state: SlotState,
    pub price: Decimal,
    pub size: Decimal,
    pub order_id: Option<ChainId>,
    #[serde(skip)]
    pub raw_on_chain: Option<RawChainOrder>,
}

impl Slot {
    pub fn virtual_spread(id: impl Into<SlotId>, price: Decimal) -> Self {
        Self {
            id: id.into(),
            slot_type: SlotType::Spread,
            state: SlotState::Virtual,
            price,
            size: Decimal::ZERO,
            order_id: None,
            raw_on_chain: None,
        }
    }

    pub fn virtual_target(
        id: impl Into<SlotId>,
        slot_type: SlotType,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            slot_type,
            state: SlotState::Virtual,
            price,
            size,
            order_id: None,
            raw_on_chain: None,
        }
    }

    /// Invariant: ACTIVE/PARTIAL slots always carry an order id and
    /// non-SPREAD/non-VIRTUAL checks are enforced by construction here
    /// rather than scattered across callers.
    pub fn is_invariant_consistent(&self) -> bool {
        let order_id_ok = self.state.requires_order_id() == self.order_id.is_some();
        let spread_ok = self.slot_type != SlotType::Spread || self.size == Decimal::ZERO;
        order_id_ok && spread_ok
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, SlotState::Active | SlotState::Partial)
    }
}

/// Planner output: one diff entry between the target grid and the
/// current master.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Create {
        slot: Slot,
    },
    Update {
        slot_id: SlotId,
        order_id: ChainId,
        new_size: Decimal,
        new_price: Decimal,
    },
    Cancel {
        slot_id: SlotId,
        order_id: ChainId,
    },
}

impl Action {
    pub fn slot_id(&self) -> &str {
        match self {
            Action::Create { slot } => &slot.id,
            Action::Update { slot_id, .. } => slot_id,
            Action::Cancel { slot_id, .. } => slot_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn virtual_spread_slot_carries_no_capital() {
        let slot = Slot::virtual_spread("slot-4", dec!(1.0));
        assert!(slot.is_invariant_consistent());
        assert_eq!(slot.size, Decimal::ZERO);
    }

    #[test]
    fn active_slot_without_order_id_is_inconsistent() {
        let mut slot = Slot::virtual_target("slot-1", SlotType::Buy, dec!(0.99), dec!(100));
        slot.state = SlotState::Active;
        assert!(!slot.is_invariant_consistent());
        slot.order_id = Some(ChainId::new("1.7.1"));
        assert!(slot.is_invariant_consistent());
    }
}
