/*
[INPUT]:  Error sources at the chain transport boundary (RPC, WebSocket,
          serialization).
[OUTPUT]: `ChainTransportError`, the low-level error the engine's
          ChainAdapter classifies into `GridError`.
[POS]:    Error handling layer - transport-facing errors only. The engine
          never matches on this type directly outside `chain_adapter.rs`.
[UPDATE]: When adding new transport failure modes.
*/

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainTransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("node returned error (code {code}): {message}")]
    Rpc { code: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("no reachable node in the pool")]
    NoReachableNode,
}

impl ChainTransportError {
    /// Transient network/RPC failures the caller should retry with
    /// backoff, surfaced as `ChainRpcTransient`.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainTransportError::Http(_)
                | ChainTransportError::WebSocket(_)
                | ChainTransportError::Timeout { .. }
                | ChainTransportError::NoReachableNode
        )
    }

    /// An "order not found" style rejection on cancel/update, treated as
    /// an already-cancelled race rather than a real failure, surfaced as `StaleOrder`.
    pub fn looks_like_stale_order(&self) -> bool {
        match self {
            ChainTransportError::Rpc { message, .. } => {
                let lowered = message.to_ascii_lowercase();
                lowered.contains("does not exist") || lowered.contains("unknown order")
            }
            _ => false,
        }
    }

    /// The chain rejected an op because of its current on-chain order
    /// state, surfaced as `IllegalOrderState`.
    pub fn is_illegal_order_state(&self) -> bool {
        matches!(self, ChainTransportError::Rpc { code, .. } if code == "ILLEGAL_ORDER_STATE")
    }
}

pub type Result<T> = std::result::Result<T, ChainTransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_order_is_detected_from_message() {
        let err = ChainTransportError::Rpc {
            code: "unknown".to_string(),
            message: "Limit order 1.7.999 does not exist".to_string(),
        };
        assert!(err.looks_like_stale_order());
    }

    #[test]
    fn illegal_order_state_is_detected_from_code() {
        let err = ChainTransportError::Rpc {
            code: "ILLEGAL_ORDER_STATE".to_string(),
            message: "order already closed".to_string(),
        };
        assert!(err.is_illegal_order_state());
    }
}
