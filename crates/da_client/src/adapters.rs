//! Port implementations backed by the Celestia node and celestia-core RPCs.

use async_trait::async_trait;
use blob_pointer::Hash32;
use celestia_adapter::{
    BlobProof, CelestiaClient, DataRootInclusionProof, ExtendedDataSquare, ExtendedHeader, Namespace,
    TendermintClient,
};
use tracing::{debug, warn};

use crate::config::DaConfig;
use crate::error::{DaError, Result};
use crate::ports::{BlobRetriever, BlobSubmitter, HeaderReader, ProofFetcher, SquareReader, Submission};

/// Celestia node plus celestia-core client pair.
#[derive(Clone)]
pub struct CelestiaRpcClient {
    node: CelestiaClient,
    tendermint: TendermintClient,
}

impl CelestiaRpcClient {
    pub fn new(node: CelestiaClient, tendermint: TendermintClient) -> Self {
        Self { node, tendermint }
    }

    /// Build both clients from the configured endpoints and token.
    pub fn from_config(config: &DaConfig) -> Self {
        let node = CelestiaClient::with_url(&config.rpc).with_auth_token(config.auth_token.clone());
        Self::new(node, TendermintClient::with_url(&config.tendermint_rpc))
    }

    pub fn node(&self) -> &CelestiaClient {
        &self.node
    }
}

pub(crate) fn to_hash32(bytes: &[u8], what: &str) -> Result<Hash32> {
    bytes
        .try_into()
        .map_err(|_| DaError::InvalidResponse(format!("{} must be 32 bytes, got {}", what, bytes.len())))
}

#[async_trait]
impl BlobSubmitter for CelestiaRpcClient {
    async fn submit(&self, namespace: &Namespace, payload: &[u8]) -> Result<Submission> {
        let height = self.node.submit_blob(namespace, payload).await.map_err(|e| {
            warn!("blob.Submit failed: {}", e);
            DaError::from(e)
        })?;
        if height == 0 {
            return Ok(Submission {
                height: 0,
                commitment: [0u8; 32],
            });
        }

        // blob.Submit only reports the height; the commitment comes from the block.
        let commitment = self
            .node
            .find_commitment(namespace, height, payload)
            .await
            .map_err(|e| {
                warn!("Looking up commitment at height {} failed: {}", height, e);
                DaError::from(e)
            })?;
        Ok(Submission {
            height,
            commitment: to_hash32(&commitment, "commitment")?,
        })
    }
}

#[async_trait]
impl BlobRetriever for CelestiaRpcClient {
    async fn get_blob(&self, height: u64, namespace: &Namespace, commitment: &Hash32) -> Result<Vec<u8>> {
        let blob = self.node.get_blob(namespace, height, commitment).await.map_err(|e| {
            warn!("blob.Get at height {} failed: {}", height, e);
            DaError::from(e)
        })?;
        debug!("Fetched blob at height {}: {} bytes", height, blob.data.len());
        Ok(blob.data)
    }
}

#[async_trait]
impl ProofFetcher for CelestiaRpcClient {
    async fn get_inclusion_proof(
        &self,
        height: u64,
        namespace: &Namespace,
        commitment: &Hash32,
    ) -> Result<BlobProof> {
        self.node.get_proof(namespace, height, commitment).await.map_err(|e| {
            warn!("blob.GetProof at height {} failed: {}", height, e);
            DaError::from(e)
        })
    }

    async fn check_included(
        &self,
        height: u64,
        namespace: &Namespace,
        proof: &BlobProof,
        commitment: &Hash32,
    ) -> Result<bool> {
        self.node
            .included(namespace, height, proof, commitment)
            .await
            .map_err(|e| {
                warn!("blob.Included at height {} failed: {}", height, e);
                DaError::from(e)
            })
    }

    async fn data_root_inclusion_proof(&self, height: u64, begin: u64, end: u64) -> Result<DataRootInclusionProof> {
        self.tendermint
            .data_root_inclusion_proof(height, begin, end)
            .await
            .map_err(|e| {
                warn!("data_root_inclusion_proof for height {} failed: {}", height, e);
                DaError::from(e)
            })
    }
}

#[async_trait]
impl HeaderReader for CelestiaRpcClient {
    async fn get_header_by_height(&self, height: u64) -> Result<ExtendedHeader> {
        self.node.get_header(height).await.map_err(|e| {
            warn!("header.GetByHeight({}) failed: {}", height, e);
            DaError::from(e)
        })
    }

    async fn get_local_head(&self) -> Result<u64> {
        self.node.get_head_height().await.map_err(|e| {
            warn!("header.LocalHead failed: {}", e);
            DaError::from(e)
        })
    }
}

#[async_trait]
impl SquareReader for CelestiaRpcClient {
    async fn get_extended_data_square(&self, header: &ExtendedHeader) -> Result<ExtendedDataSquare> {
        self.node.get_eds(header).await.map_err(|e| {
            warn!("share.GetEDS at height {} failed: {}", header.height, e);
            DaError::from(e)
        })
    }
}
