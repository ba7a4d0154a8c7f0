/*
[INPUT]:  A committed overlay from a WorkingGrid.
[OUTPUT]: `MasterGrid`, the immutable-after-publish snapshot every reader
          takes a stable handle on.
[POS]:    Data layer - the grid's single source of truth, replaced wholesale
          on each successful commit; never mutated in place.
[UPDATE]: When a new index (beyond state/type/orderId) is needed for lookups.
*/

use std::collections::BTreeMap;
use std::sync::Arc;

use gridbot_chain::types::ChainId;

use super::slot::{Slot, SlotId, SlotState, SlotType};

/// Immutable snapshot of every slot in a bot's grid, plus lookup indexes
/// rebuilt on every publish. `Arc`-wrapped so readers can hold a cheap
/// stable handle across suspension points.
#[derive(Debug, Clone)]
pub struct MasterGrid {
    pub version: u64,
    pub boundary_idx: usize,
    slots: Arc<BTreeMap<SlotId, Slot>>,
    by_state: Arc<BTreeMap<SlotState, Vec<SlotId>>>,
    by_type: Arc<BTreeMap<SlotType, Vec<SlotId>>>,
    by_order_id: Arc<BTreeMap<ChainId, SlotId>>,
}

impl PartialEq for MasterGrid {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.boundary_idx == other.boundary_idx
            && *self.slots == *other.slots
    }
}

impl Ord for SlotState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        rank(*self).cmp(&rank(*other))
    }
}
impl PartialOrd for SlotState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
fn rank(s: SlotState) -> u8 {
    match s {
        SlotState::Virtual => 0,
        SlotState::Active => 1,
        SlotState::Partial => 2,
    }
}

impl Ord for SlotType {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        type_rank(*self).cmp(&type_rank(*other))
    }
}
impl PartialOrd for SlotType {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
fn type_rank(t: SlotType) -> u8 {
    match t {
        SlotType::Buy => 0,
        SlotType::Sell => 1,
        SlotType::Spread => 2,
    }
}

impl MasterGrid {
    /// Build the initial (version 0) grid from a complete slot list -
    /// the only place a MasterGrid is constructed outside of `publish`.
    pub fn new(boundary_idx: usize, slots: Vec<Slot>) -> Self {
        let mut grid = Self {
            version: 0,
            boundary_idx,
            slots: Arc::new(BTreeMap::new()),
            by_state: Arc::new(BTreeMap::new()),
            by_type: Arc::new(BTreeMap::new()),
            by_order_id: Arc::new(BTreeMap::new()),
        };
        let map: BTreeMap<SlotId, Slot> = slots.into_iter().map(|s| (s.id.clone(), s)).collect();
        grid.reindex(map);
        grid
    }

    /// Replace the slot map and rebuild all indexes, bumping the
    /// version by one. Called only from `WorkingGrid::commit`.
    pub(crate) fn publish(&self, new_map: BTreeMap<SlotId, Slot>) -> Self {
        let mut grid = Self {
            version: self.version + 1,
            boundary_idx: self.boundary_idx,
            slots: Arc::new(BTreeMap::new()),
            by_state: Arc::new(BTreeMap::new()),
            by_type: Arc::new(BTreeMap::new()),
            by_order_id: Arc::new(BTreeMap::new()),
        };
        grid.reindex(new_map);
        grid
    }

    pub(crate) fn set_boundary_idx(&mut self, idx: usize) {
        self.boundary_idx = idx;
    }

    fn reindex(&mut self, map: BTreeMap<SlotId, Slot>) {
        let mut by_state: BTreeMap<SlotState, Vec<SlotId>> = BTreeMap::new();
        let mut by_type: BTreeMap<SlotType, Vec<SlotId>> = BTreeMap::new();
        let mut by_order_id: BTreeMap<ChainId, SlotId> = BTreeMap::new();

        for (id, slot) in map.iter() {
            by_state.entry(slot.state).or_default().push(id.clone());
            by_type.entry(slot.slot_type).or_default().push(id.clone());
            if let Some(order_id) = &slot.order_id {
                by_order_id.insert(order_id.clone(), id.clone());
            }
        }

        self.slots = Arc::new(map);
        self.by_state = Arc::new(by_state);
        self.by_type = Arc::new(by_type);
        self.by_order_id = Arc::new(by_order_id);
    }

    pub fn get(&self, id: &str) -> Option<&Slot> {
        self.slots.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }

    pub fn slots_by_state(&self, state: SlotState) -> impl Iterator<Item = &Slot> {
        self.by_state
            .get(&state)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.slots.get(id))
    }

    pub fn slots_by_type(&self, slot_type: SlotType) -> impl Iterator<Item = &Slot> {
        self.by_type
            .get(&slot_type)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.slots.get(id))
    }

    pub fn slot_by_order_id(&self, order_id: &ChainId) -> Option<&Slot> {
        self.by_order_id
            .get(order_id)
            .and_then(|id| self.slots.get(id))
    }

    pub fn snapshot_map(&self) -> BTreeMap<SlotId, Slot> {
        (*self.slots).clone()
    }

    /// Position of `slot_id` among all slots ordered by price ascending -
    /// the index space `boundary_idx` advances along (slot prices are
    /// monotonic in slot index). `None` if the id isn't in this grid.
    pub fn price_order_index(&self, slot_id: &str) -> Option<usize> {
        let mut by_price: Vec<&Slot> = self.slots.values().collect();
        by_price.sort_by(|a, b| a.price.cmp(&b.price));
        by_price.iter().position(|slot| slot.id == slot_id)
    }
}
