/*
[INPUT]:  n/a
[OUTPUT]: Public surface of the chain transport crate - the external
          collaborators scoped out of the engine: chain RPC
          transport, multi-node failover, price discovery, and signing.
[POS]:    Crate root - module wiring.
[UPDATE]: When adding a new transport collaborator.
*/

pub mod connector;
pub mod error;
pub mod node_manager;
pub mod price_oracle;
pub mod rpc_client;
pub mod signer;
pub mod types;
pub mod ws;

pub use connector::{AccountBalance, AccountSnapshot, ChainConnector, FillEvent, PriceOracle};
pub use error::{ChainTransportError, Result};
pub use node_manager::{NodeHealth, NodeManager};
pub use price_oracle::{AggregatingPriceOracle, PriceObservation, PriceSource};
pub use rpc_client::{RpcChainClient, RpcClientConfig};
pub use signer::{MockSigner, Signer, SignedTx, SigningKey, UnsignedTx};
