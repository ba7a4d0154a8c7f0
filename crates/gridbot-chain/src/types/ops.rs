/*
[INPUT]:  Quantized integer amounts from the engine's ChainAdapter.
[OUTPUT]: Tagged operation-data shapes matching the chain's transaction
          builder contracts (`tx.limit_order_create/update/cancel`).
[POS]:    Data layer - outbound transaction op shapes.
[UPDATE]: When the chain's op-data schema changes.
*/

use serde::{Deserialize, Serialize};

use super::chain_order::{AmountPair, ChainId};

pub const OP_CODE_CREATE: u8 = 1;
pub const OP_CODE_CANCEL: u8 = 2;
pub const OP_CODE_UPDATE: u8 = 77;
pub const OP_CODE_FILL: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderOp {
    pub fee: AmountPair,
    pub seller: ChainId,
    pub amount_to_sell: AmountPair,
    pub min_to_receive: AmountPair,
    pub expiration: String,
    pub fill_or_kill: bool,
    pub extensions: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPrice {
    pub base: AmountPair,
    pub quote: AmountPair,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOrderOp {
    pub fee: AmountPair,
    pub seller: ChainId,
    pub order: ChainId,
    pub new_price: NewPrice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_amount_to_sell: Option<AmountPair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderOp {
    pub fee: AmountPair,
    pub fee_paying_account: ChainId,
    pub order: ChainId,
}

/// One broadcastable operation. Order within a batch is preserved so the
/// i-th broadcast result lines up with the i-th op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op_code")]
pub enum ChainOp {
    #[serde(rename = "1")]
    Create(CreateOrderOp),
    #[serde(rename = "2")]
    Cancel(CancelOrderOp),
    #[serde(rename = "77")]
    Update(UpdateOrderOp),
}

impl ChainOp {
    pub fn op_code(&self) -> u8 {
        match self {
            ChainOp::Create(_) => OP_CODE_CREATE,
            ChainOp::Cancel(_) => OP_CODE_CANCEL,
            ChainOp::Update(_) => OP_CODE_UPDATE,
        }
    }
}
