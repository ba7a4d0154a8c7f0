/*
[INPUT]:  An unsigned transaction and a signing key handle.
[OUTPUT]: A signed transaction ready for `broadcast`.
[POS]:    Transport layer - signing boundary only. Key custody/management
          is explicitly a non-goal: this crate never stores or
          generates keys, it only defines the callable contract.
[UPDATE]: When the signed-transaction envelope shape changes.
*/

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ChainId;

/// Opaque signing key handle. The engine never inspects its contents.
#[derive(Debug, Clone)]
pub struct SigningKey(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub signer_account: ChainId,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, tx: UnsignedTx, key: &SigningKey) -> Result<SignedTx>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    pub signer_account: ChainId,
    pub payload: Vec<u8>,
}

/// Deterministic signer for tests: "signs" by appending the key bytes.
/// Never use for real transactions.
#[derive(Debug, Default)]
pub struct MockSigner;

#[async_trait]
impl Signer for MockSigner {
    async fn sign(&self, tx: UnsignedTx, key: &SigningKey) -> Result<SignedTx> {
        let mut payload = tx.payload;
        payload.extend_from_slice(key.0.as_bytes());
        Ok(SignedTx {
            signer_account: tx.signer_account,
            payload,
        })
    }
}
