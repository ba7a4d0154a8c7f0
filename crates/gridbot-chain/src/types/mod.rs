/*
[INPUT]:  n/a
[OUTPUT]: Re-exported wire types for the chain transport boundary.
[POS]:    Data layer - module wiring.
[UPDATE]: When adding new wire types.
*/

pub mod asset;
pub mod broadcast;
pub mod chain_order;
pub mod ops;

pub use asset::{Asset, AssetPair};
pub use broadcast::{BroadcastResult, OperationResult};
pub use chain_order::{AmountPair, ChainId, RawChainOrder, RawPrice};
pub use ops::{CancelOrderOp, ChainOp, CreateOrderOp, NewPrice, UpdateOrderOp};
