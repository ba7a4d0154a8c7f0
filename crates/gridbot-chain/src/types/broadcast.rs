/*
[INPUT]:  Raw chain broadcast responses (shape varies by node/version).
[OUTPUT]: One normalized `BroadcastResult` per batch, one `OperationResult`
          per op in the batch, in submission order.
[POS]:    Data layer - broadcast response normalization.
[UPDATE]: When the chain's broadcast response envelope changes.
*/

use serde::{Deserialize, Serialize};

use super::chain_order::ChainId;

/// Outcome of a single operation inside a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationResult {
    /// `limit_order_create` succeeded; the chain assigned an id.
    Created { order_id: ChainId },
    /// `limit_order_update` / `limit_order_cancel` succeeded.
    Applied,
    /// The node rejected the op. `code` is the chain's symbolic reason
    /// (e.g. `"ILLEGAL_ORDER_STATE"`); benign "already gone" races are
    /// reported as `StaleOrder` by the caller, not here.
    Failed { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub success: bool,
    pub operation_results: Vec<OperationResult>,
    pub transaction_id: Option<String>,
}

impl BroadcastResult {
    pub fn all_applied(results: Vec<OperationResult>, transaction_id: impl Into<String>) -> Self {
        Self {
            success: true,
            operation_results: results,
            transaction_id: Some(transaction_id.into()),
        }
    }
}
