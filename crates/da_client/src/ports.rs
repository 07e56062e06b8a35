//! Collaborator interfaces the DA client is written against.
//!
//! The Celestia node, the celestia-core RPC and the Blobstream contract are
//! all reached through these traits so the orchestration logic can be driven
//! by in-memory fakes in tests.

use async_trait::async_trait;
use blob_pointer::Hash32;
use celestia_adapter::{
    BlobProof, DataRootInclusionProof, ExtendedDataSquare, ExtendedHeader, Namespace,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Outcome of a blob submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// Height the blob landed at. Zero means the node rejected it.
    pub height: u64,
    /// Share commitment of the submitted blob.
    pub commitment: Hash32,
}

/// Tuple committed to by a Blobstream data commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRootTuple {
    pub height: u64,
    pub data_root: Hash32,
}

/// Binary Merkle proof of a [`DataRootTuple`] within an attested range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryMerkleProof {
    pub side_nodes: Vec<Hash32>,
    pub key: u64,
    pub num_leaves: u64,
}

#[async_trait]
pub trait BlobSubmitter: Send + Sync {
    /// Submit `payload` under `namespace`.
    async fn submit(&self, namespace: &Namespace, payload: &[u8]) -> Result<Submission>;
}

#[async_trait]
pub trait BlobRetriever: Send + Sync {
    /// Fetch the blob with `commitment` at `height`.
    async fn get_blob(&self, height: u64, namespace: &Namespace, commitment: &Hash32) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait ProofFetcher: Send + Sync {
    /// Fetch the share inclusion proof of a blob.
    async fn get_inclusion_proof(
        &self,
        height: u64,
        namespace: &Namespace,
        commitment: &Hash32,
    ) -> Result<BlobProof>;

    /// Ask the node to check `proof` against `commitment`.
    async fn check_included(
        &self,
        height: u64,
        namespace: &Namespace,
        proof: &BlobProof,
        commitment: &Hash32,
    ) -> Result<bool>;

    /// Proof that the data root at `height` is in the commitment over `[begin, end)`.
    async fn data_root_inclusion_proof(&self, height: u64, begin: u64, end: u64) -> Result<DataRootInclusionProof>;
}

#[async_trait]
pub trait HeaderReader: Send + Sync {
    async fn get_header_by_height(&self, height: u64) -> Result<ExtendedHeader>;

    /// Height of the node's local chain head.
    async fn get_local_head(&self) -> Result<u64>;
}

#[async_trait]
pub trait SquareReader: Send + Sync {
    async fn get_extended_data_square(&self, header: &ExtendedHeader) -> Result<ExtendedDataSquare>;
}

/// The Blobstream contract on the settlement chain.
#[async_trait]
pub trait AttestationBridge: Send + Sync {
    /// Nonce of the latest relayed data commitment.
    async fn current_nonce(&self) -> Result<u64>;

    /// Check `tuple` against the data commitment stored under `nonce`.
    async fn verify_attestation(
        &self,
        nonce: u64,
        tuple: &DataRootTuple,
        proof: &BinaryMerkleProof,
    ) -> Result<bool>;
}

/// Everything the DA client needs from the Celestia side.
pub trait CelestiaRpc: BlobSubmitter + BlobRetriever + ProofFetcher + HeaderReader + SquareReader {}

impl<T> CelestiaRpc for T where T: BlobSubmitter + BlobRetriever + ProofFetcher + HeaderReader + SquareReader {}

#[cfg(test)]
pub mod mock {
    //! In-memory collaborators for tests.

    use super::*;
    use crate::error::DaError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct RpcState {
        pub submit_height: u64,
        pub commitment: Hash32,
        pub submitted: Vec<Vec<u8>>,
        pub blobs: HashMap<(u64, Hash32), Vec<u8>>,
        pub proof: BlobProof,
        pub included: bool,
        pub header: ExtendedHeader,
        pub header_fails: bool,
        pub eds: ExtendedDataSquare,
        pub data_root_proof: DataRootInclusionProof,
        /// Successive local head readings; the last one repeats.
        pub heads: Vec<u64>,
        pub head_reads: usize,
        pub head_fails: bool,
        pub calls: Vec<&'static str>,
    }

    #[derive(Debug, Default)]
    pub struct MockRpc {
        pub state: Mutex<RpcState>,
    }

    impl MockRpc {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with<F: FnOnce(&mut RpcState)>(self, f: F) -> Self {
            f(&mut self.state.lock().unwrap());
            self
        }

        pub fn calls(&self) -> Vec<&'static str> {
            self.state.lock().unwrap().calls.clone()
        }
    }

    #[async_trait]
    impl BlobSubmitter for MockRpc {
        async fn submit(&self, _namespace: &Namespace, payload: &[u8]) -> Result<Submission> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("submit");
            s.submitted.push(payload.to_vec());
            Ok(Submission {
                height: s.submit_height,
                commitment: s.commitment,
            })
        }
    }

    #[async_trait]
    impl BlobRetriever for MockRpc {
        async fn get_blob(&self, height: u64, _namespace: &Namespace, commitment: &Hash32) -> Result<Vec<u8>> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("get_blob");
            s.blobs
                .get(&(height, *commitment))
                .cloned()
                .ok_or_else(|| DaError::Transport("blob not found".to_string()))
        }
    }

    #[async_trait]
    impl ProofFetcher for MockRpc {
        async fn get_inclusion_proof(
            &self,
            _height: u64,
            _namespace: &Namespace,
            _commitment: &Hash32,
        ) -> Result<BlobProof> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("get_inclusion_proof");
            Ok(s.proof.clone())
        }

        async fn check_included(
            &self,
            _height: u64,
            _namespace: &Namespace,
            _proof: &BlobProof,
            _commitment: &Hash32,
        ) -> Result<bool> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("check_included");
            Ok(s.included)
        }

        async fn data_root_inclusion_proof(&self, _height: u64, _begin: u64, _end: u64) -> Result<DataRootInclusionProof> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("data_root_inclusion_proof");
            Ok(s.data_root_proof.clone())
        }
    }

    #[async_trait]
    impl HeaderReader for MockRpc {
        async fn get_header_by_height(&self, _height: u64) -> Result<ExtendedHeader> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("get_header_by_height");
            if s.header_fails {
                return Err(DaError::Transport("header unavailable".to_string()));
            }
            Ok(s.header.clone())
        }

        async fn get_local_head(&self) -> Result<u64> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("get_local_head");
            if s.head_fails {
                return Err(DaError::Transport("head unavailable".to_string()));
            }
            let idx = s.head_reads.min(s.heads.len().saturating_sub(1));
            s.head_reads += 1;
            Ok(s.heads.get(idx).copied().unwrap_or(0))
        }
    }

    #[async_trait]
    impl SquareReader for MockRpc {
        async fn get_extended_data_square(&self, _header: &ExtendedHeader) -> Result<ExtendedDataSquare> {
            let mut s = self.state.lock().unwrap();
            s.calls.push("get_extended_data_square");
            Ok(s.eds.clone())
        }
    }

    #[derive(Debug, Default)]
    pub struct BridgeState {
        /// Successive nonce readings; the last one repeats.
        pub nonces: Vec<u64>,
        pub nonce_reads: usize,
        pub verify_result: bool,
        pub verify_fails: bool,
        pub verified: Vec<(u64, DataRootTuple, BinaryMerkleProof)>,
    }

    #[derive(Debug, Default)]
    pub struct MockBridge {
        pub state: Mutex<BridgeState>,
    }

    impl MockBridge {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with<F: FnOnce(&mut BridgeState)>(self, f: F) -> Self {
            f(&mut self.state.lock().unwrap());
            self
        }
    }

    #[async_trait]
    impl AttestationBridge for MockBridge {
        async fn current_nonce(&self) -> Result<u64> {
            let mut s = self.state.lock().unwrap();
            let idx = s.nonce_reads.min(s.nonces.len().saturating_sub(1));
            s.nonce_reads += 1;
            Ok(s.nonces.get(idx).copied().unwrap_or(0))
        }

        async fn verify_attestation(
            &self,
            nonce: u64,
            tuple: &DataRootTuple,
            proof: &BinaryMerkleProof,
        ) -> Result<bool> {
            let mut s = self.state.lock().unwrap();
            if s.verify_fails {
                return Err(DaError::Transport("contract call reverted".to_string()));
            }
            s.verified.push((nonce, *tuple, proof.clone()));
            Ok(s.verify_result)
        }
    }
}
