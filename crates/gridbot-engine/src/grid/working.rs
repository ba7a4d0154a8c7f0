/*
[INPUT]:  A MasterGrid snapshot plus planner writes (Strategy).
[OUTPUT]: `WorkingGrid`, a copy-on-write overlay gated by version equality
          at commit.
[POS]:    Data layer - the only place slot mutations are staged before
          becoming visible to the rest of the bot.
[UPDATE]: When commit needs to validate something beyond version equality
          (see Pipeline's commit guard, which wraps this with its own checks).
*/

use std::collections::BTreeMap;

use crate::error::{GridError, Result};

use super::master::MasterGrid;
use super::slot::{Slot, SlotId};

/// Copy-on-write overlay on top of a `MasterGrid` snapshot. Reads fall
/// through to the master; writes land only in the overlay until commit.
#[derive(Debug, Clone)]
pub struct WorkingGrid {
    base_version: u64,
    overlay: BTreeMap<SlotId, Slot>,
    new_boundary_idx: Option<usize>,
}

impl WorkingGrid {
    pub fn new(master: &MasterGrid) -> Self {
        Self {
            base_version: master.version,
            overlay: BTreeMap::new(),
            new_boundary_idx: None,
        }
    }

    /// Record a boundary-index advance to apply atomically with this
    /// overlay's commit, advancing the boundary toward the filled side.
    pub fn set_boundary_idx(&mut self, idx: usize) {
        self.new_boundary_idx = Some(idx);
    }

    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    pub fn is_empty(&self) -> bool {
        self.overlay.is_empty()
    }

    /// Overlay takes precedence over master.
    pub fn get<'a>(&'a self, master: &'a MasterGrid, id: &str) -> Option<&'a Slot> {
        self.overlay.get(id).or_else(|| master.get(id))
    }

    /// Writes only ever land in the overlay.
    pub fn set(&mut self, slot: Slot) {
        self.overlay.insert(slot.id.clone(), slot);
    }

    /// Overlay-aware view of every slot id touched in this working
    /// grid, master ids first then any overlay-only additions.
    pub fn get_indexes(&self, master: &MasterGrid) -> Vec<SlotId> {
        let mut ids: Vec<SlotId> = master.iter().map(|s| s.id.clone()).collect();
        for id in self.overlay.keys() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// Under the caller's mutation lock: compare `baseVersion` to
    /// `master.version`. Equal -> apply overlay atop a fresh copy of the
    /// master's slot map, rebuild indexes, publish a new MasterGrid at
    /// `version + 1`. Unequal -> `CommitStaleBase`, master untouched.
    /// An empty overlay is rejected before the version check so a no-op
    /// plan never bumps `gridVersion` - empty-overlay commits are
    /// rejected without side effects.
    pub fn commit(self, master: &MasterGrid) -> Result<MasterGrid> {
        if self.overlay.is_empty() {
            return Err(GridError::CommitEmptyDelta);
        }
        if self.base_version != master.version {
            return Err(GridError::CommitStaleBase {
                base: self.base_version,
                current: master.version,
            });
        }

        let mut map = master.snapshot_map();
        for (id, slot) in self.overlay {
            map.insert(id, slot);
        }
        let mut published = master.publish(map);
        if let Some(idx) = self.new_boundary_idx {
            published.set_boundary_idx(idx);
        }
        Ok(published)
    }
}
