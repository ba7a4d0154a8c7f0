/*
[INPUT]:  n/a
[OUTPUT]: Public API surface of gridbot-engine.
[POS]:    Crate root - library entry point.
[UPDATE]: When adding a new top-level module.
*/

pub mod accountant;
pub mod async_lock;
pub mod chain_adapter;
pub mod config;
pub mod error;
pub mod fees;
pub mod fill_processor;
pub mod grid;
pub mod pipeline;
pub mod precision;
pub mod store;
pub mod strategy;

pub use accountant::{Accountant, Side};
pub use async_lock::{AcquireOptions, AsyncLock, AsyncLockError};
pub use chain_adapter::ChainAdapter;
pub use config::{BotConfig, GridConfig, NodeConfig};
pub use error::{GridError, Result};
pub use fees::FeeCache;
pub use fill_processor::{FillMatch, FillProcessor, ProcessedFills};
pub use grid::{Action, MasterGrid, Slot, SlotId, SlotState, SlotType, WorkingGrid};
pub use pipeline::{Bot, BotState, CommitOutcome};
pub use store::Store;
pub use strategy::{PlanInputs, PlanOutcome, SideTargets, TargetSlot};
