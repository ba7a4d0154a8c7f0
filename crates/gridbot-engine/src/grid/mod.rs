/*
[INPUT]:  n/a
[OUTPUT]: Re-exported grid data types.
[POS]:    Data layer - module wiring.
[UPDATE]: When adding a new grid submodule.
*/

pub mod master;
pub mod slot;
pub mod working;

pub use master::MasterGrid;
pub use slot::{Action, Slot, SlotId, SlotState, SlotType};
pub use working::WorkingGrid;
