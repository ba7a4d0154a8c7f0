/*
[INPUT]:  Failures surfaced anywhere in the grid-maintenance pipeline.
[OUTPUT]: `GridError`, the single taxonomy the pipeline's retry/defer logic
          branches on.
[POS]:    Error handling layer - crate-wide error type.
[UPDATE]: When adding a new failure mode the pipeline must distinguish.
*/

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("asset {asset_id} has no known precision")]
    PrecisionMissing { asset_id: String },

    #[error("amount {value} for asset {asset_id} does not fit in i64 at precision {precision}")]
    AmountOutOfRange {
        asset_id: String,
        value: String,
        precision: u8,
    },

    #[error("order {order_id} no longer exists on chain")]
    StaleOrder { order_id: String },

    #[error("chain rejected operation on order {order_id}: current on-chain state disagrees")]
    IllegalOrderState { order_id: String },

    #[error("chain RPC call failed transiently: {0}")]
    ChainRpcTransient(#[from] gridbot_chain::ChainTransportError),

    #[error("commit rejected: working grid base version {base} is behind master version {current}")]
    CommitStaleBase { base: u64, current: u64 },

    #[error("commit rejected: overlay carries no pending changes")]
    CommitEmptyDelta,

    #[error("accounting drift detected for bot {bot_id}: calculated {calculated} vs ledger {ledger}")]
    AccountingDrift {
        bot_id: String,
        calculated: String,
        ledger: String,
    },

    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    #[error("persistence I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("persistence serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

impl GridError {
    /// Whether the pipeline should retry the same op after a short delay
    /// rather than replan — the stale-only fast path.
    pub fn is_stale_order(&self) -> bool {
        matches!(self, GridError::StaleOrder { .. })
    }

    pub fn is_illegal_order_state(&self) -> bool {
        matches!(self, GridError::IllegalOrderState { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GridError::ChainRpcTransient(e) if e.is_transient())
    }
}

pub type Result<T> = std::result::Result<T, GridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_order_is_distinguishable_from_illegal_state() {
        let stale = GridError::StaleOrder {
            order_id: "1.7.1".to_string(),
        };
        let illegal = GridError::IllegalOrderState {
            order_id: "1.7.1".to_string(),
        };
        assert!(stale.is_stale_order());
        assert!(!stale.is_illegal_order_state());
        assert!(illegal.is_illegal_order_state());
        assert!(!illegal.is_stale_order());
    }
}
