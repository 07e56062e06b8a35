//! Celestia-backed data availability writer and reader.

use std::sync::Arc;

use async_trait::async_trait;
use blob_pointer::{BlobPointer, Hash32};
use celestia_adapter::Namespace;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{to_hash32, CelestiaRpcClient};
use crate::config::DaConfig;
use crate::error::{DaError, Result};
use crate::poller::{cancellable, ConfirmationPoller};
use crate::ports::{AttestationBridge, BinaryMerkleProof, CelestiaRpc, DataRootTuple};
use crate::square::SquareData;

/// Write side of a DA layer.
#[async_trait]
pub trait DataAvailabilityWriter: Send + Sync {
    /// Publish `message` and return a pointer to it.
    async fn store(&self, cancel: &CancellationToken, message: &[u8]) -> Result<BlobPointer>;

    /// Block until the local head reaches `height`.
    async fn wait_for_height(&self, cancel: &CancellationToken, height: u64) -> Result<u64>;

    /// Block until Blobstream has relayed past `nonce`.
    async fn wait_for_relay(&self, cancel: &CancellationToken, nonce: u64) -> Result<u64>;

    /// Attach a data root inclusion proof to `pointer` and check it on the
    /// bridge once the covering commitment is relayed.
    async fn verify(
        &self,
        cancel: &CancellationToken,
        pointer: &mut BlobPointer,
        begin_block: u64,
        end_block: u64,
    ) -> Result<bool>;

    /// Frame `pointer` for inclusion in a batch.
    fn serialize(&self, pointer: &BlobPointer) -> Vec<u8>;
}

/// Read side of a DA layer.
#[async_trait]
pub trait DataAvailabilityReader: Send + Sync {
    /// Fetch the payload behind `pointer` and the square rows covering it.
    async fn read(&self, cancel: &CancellationToken, pointer: &BlobPointer) -> Result<(Vec<u8>, SquareData)>;
}

/// Celestia DA client bound to one namespace.
pub struct CelestiaDa {
    namespace: Namespace,
    rpc: Arc<dyn CelestiaRpc>,
    bridge: Option<Arc<dyn AttestationBridge>>,
    poller: ConfirmationPoller,
}

impl CelestiaDa {
    /// Create a client without a bridge. Only `store`, `read` and
    /// `wait_for_height` work until one is attached.
    pub fn new(namespace: Namespace, rpc: Arc<dyn CelestiaRpc>) -> Self {
        Self {
            namespace,
            rpc,
            bridge: None,
            poller: ConfirmationPoller::default(),
        }
    }

    /// Connect to the endpoints named in `config`. Fails when the config
    /// is disabled.
    pub fn from_config(config: &DaConfig) -> Result<Self> {
        config.ensure_enabled()?;
        let rpc = Arc::new(CelestiaRpcClient::from_config(config));
        Ok(Self::new(config.namespace()?, rpc).with_poller(config.poller()?))
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn AttestationBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_poller(mut self, poller: ConfirmationPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn bridge(&self) -> Result<&dyn AttestationBridge> {
        self.bridge
            .as_deref()
            .ok_or_else(|| DaError::Config("no attestation bridge configured".to_string()))
    }

    /// Rows of the extended square that hold shares `[start, start + count)`.
    fn row_window(start: u64, count: u64, square_size: u64) -> Result<(u64, u64)> {
        let ods = square_size / 2;
        if ods == 0 {
            return Err(DaError::InvalidResponse(format!("square size {} too small", square_size)));
        }
        let start_row = start / ods;
        if start_row >= ods {
            return Err(DaError::InvalidResponse(format!(
                "share {} lies outside an original square of width {}",
                start, ods
            )));
        }
        // Inclusive of the row holding share `start + count`, so a blob that
        // ends on a row boundary also yields the following row.
        let end_row = start.saturating_add(count) / ods;
        Ok((start_row, end_row.min(square_size - 1)))
    }
}

fn side_nodes(aunts: &[Vec<u8>]) -> Result<Vec<Hash32>> {
    aunts
        .iter()
        .enumerate()
        .map(|(i, aunt)| -> Result<Hash32> {
            aunt.as_slice()
                .try_into()
                .map_err(|_| DaError::InvalidProof(format!("side node {} is {} bytes, expected 32", i, aunt.len())))
        })
        .collect()
}

#[async_trait]
impl DataAvailabilityWriter for CelestiaDa {
    async fn store(&self, cancel: &CancellationToken, message: &[u8]) -> Result<BlobPointer> {
        let ns = &self.namespace;
        let submission = cancellable(cancel, self.rpc.submit(ns, message)).await?;
        if submission.height == 0 {
            warn!("Blob submission returned height 0");
            return Err(DaError::SubmissionRejected { height: 0 });
        }
        let height = submission.height;
        let commitment = submission.commitment;
        info!("Blob of {} bytes included at height {}", message.len(), height);

        let proof = cancellable(cancel, self.rpc.get_inclusion_proof(height, ns, &commitment)).await?;
        let included = cancellable(cancel, self.rpc.check_included(height, ns, &proof, &commitment)).await?;
        if !included {
            warn!("Node did not confirm inclusion of blob at height {}", height);
            return Err(DaError::InclusionUnconfirmed { height });
        }

        let header = cancellable(cancel, self.rpc.get_header_by_height(height)).await?;
        let data_root = to_hash32(&header.data_hash, "data root")?;

        let (start, shares_length) = proof.share_span();
        debug!(
            "Blob at height {} spans shares [{}, {})",
            height,
            start,
            start.saturating_add(shares_length)
        );
        Ok(BlobPointer::new(height, commitment, data_root).with_share_range(start, shares_length))
    }

    async fn wait_for_height(&self, cancel: &CancellationToken, height: u64) -> Result<u64> {
        self.poller.wait_for_height(cancel, self.rpc.as_ref(), height).await
    }

    async fn wait_for_relay(&self, cancel: &CancellationToken, nonce: u64) -> Result<u64> {
        self.poller.wait_for_nonce(cancel, self.bridge()?, nonce).await
    }

    async fn verify(
        &self,
        cancel: &CancellationToken,
        pointer: &mut BlobPointer,
        begin_block: u64,
        end_block: u64,
    ) -> Result<bool> {
        let bridge = self.bridge()?;
        let height = pointer.block_height;
        let proof = cancellable(
            cancel,
            self.rpc.data_root_inclusion_proof(height, begin_block, end_block),
        )
        .await?;
        let side_nodes = side_nodes(&proof.aunts)?;
        if proof.index >= proof.total {
            return Err(DaError::InvalidProof(format!(
                "leaf index {} out of range for {} leaves",
                proof.index, proof.total
            )));
        }
        // A pointer that already names its commitment nonce keeps it.
        let nonce = if pointer.tuple_root_nonce != 0 {
            pointer.tuple_root_nonce
        } else {
            cancellable(cancel, bridge.current_nonce()).await?
        };

        pointer.key = proof.index;
        pointer.num_leaves = proof.total;
        pointer.side_nodes = side_nodes;
        pointer.tuple_root_nonce = nonce;
        debug!(
            "Attached data root proof for height {} (key {} of {}, nonce {})",
            height, pointer.key, pointer.num_leaves, nonce
        );

        self.wait_for_relay(cancel, nonce).await?;

        let tuple = DataRootTuple {
            height,
            data_root: pointer.data_root,
        };
        let merkle_proof = BinaryMerkleProof {
            side_nodes: pointer.side_nodes.clone(),
            key: pointer.key,
            num_leaves: pointer.num_leaves,
        };
        let verified = cancellable(
            cancel,
            bridge.verify_attestation(pointer.tuple_root_nonce, &tuple, &merkle_proof),
        )
        .await
        .map_err(|e| {
            warn!("verifyAttestation for height {} failed: {}", height, e);
            e
        })?;
        info!("Attestation for height {} verified: {}", height, verified);
        Ok(verified)
    }

    fn serialize(&self, pointer: &BlobPointer) -> Vec<u8> {
        blob_pointer::serialize(pointer)
    }
}

#[async_trait]
impl DataAvailabilityReader for CelestiaDa {
    async fn read(&self, cancel: &CancellationToken, pointer: &BlobPointer) -> Result<(Vec<u8>, SquareData)> {
        let height = pointer.block_height;
        let payload = cancellable(
            cancel,
            self.rpc.get_blob(height, &self.namespace, &pointer.tx_commitment),
        )
        .await?;
        let header = cancellable(cancel, self.rpc.get_header_by_height(height)).await?;
        let eds = cancellable(cancel, self.rpc.get_extended_data_square(&header)).await?;

        let square_size = eds.width() as u64;
        let (start_row, end_row) = Self::row_window(pointer.start, pointer.shares_length, square_size)?;
        let rows = (start_row..=end_row)
            .map(|i| {
                eds.row(i as usize)
                    .map(<[Vec<u8>]>::to_vec)
                    .ok_or_else(|| DaError::InvalidResponse(format!("row {} missing from square", i)))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "Read {} bytes at height {}, rows {}..={} of {}",
            payload.len(),
            height,
            start_row,
            end_row,
            square_size
        );

        Ok((
            payload,
            SquareData {
                row_roots: header.row_roots,
                column_roots: header.column_roots,
                rows,
                square_size,
                start_row,
                end_row,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::{MockBridge, MockRpc};
    use celestia_adapter::{BlobProof, DataRootInclusionProof, ExtendedDataSquare, ShareRange};
    use std::time::Duration;

    const HEIGHT: u64 = 42;
    const COMMITMENT: Hash32 = [0xc0; 32];
    const DATA_ROOT: [u8; 32] = [0xd0; 32];

    fn namespace() -> Namespace {
        Namespace::from_hex("000008e5f679bf7116cb").unwrap()
    }

    fn eds(width: usize) -> ExtendedDataSquare {
        let shares = (0..width * width).map(|i| vec![i as u8]).collect();
        ExtendedDataSquare::new(shares).unwrap()
    }

    fn happy_rpc() -> MockRpc {
        MockRpc::new().with(|s| {
            s.submit_height = HEIGHT;
            s.commitment = COMMITMENT;
            s.proof = BlobProof {
                ranges: vec![ShareRange { start: 5, end: 8 }, ShareRange { start: 8, end: 10 }],
                raw: serde_json::Value::Null,
            };
            s.included = true;
            s.header.height = HEIGHT;
            s.header.data_hash = DATA_ROOT.to_vec();
            s.header.row_roots = (0..8u8).map(|i| vec![i; 90]).collect();
            s.eds = eds(8);
            s.blobs.insert((HEIGHT, COMMITMENT), b"payload".to_vec());
            s.data_root_proof = DataRootInclusionProof {
                total: 4,
                index: 2,
                aunts: vec![vec![0xa1; 32], vec![0xa2; 32]],
            };
            s.heads = vec![HEIGHT];
        })
    }

    fn client(rpc: MockRpc, bridge: MockBridge) -> (CelestiaDa, Arc<MockRpc>, Arc<MockBridge>) {
        let rpc = Arc::new(rpc);
        let bridge = Arc::new(bridge);
        let da = CelestiaDa::new(namespace(), rpc.clone())
            .with_bridge(bridge.clone())
            .with_poller(ConfirmationPoller::new(Duration::from_secs(5)).with_max_polls(10));
        (da, rpc, bridge)
    }

    #[tokio::test]
    async fn test_store_builds_pointer() {
        let (da, rpc, _) = client(happy_rpc(), MockBridge::new());
        let pointer = da.store(&CancellationToken::new(), b"payload").await.unwrap();

        assert_eq!(pointer.block_height, HEIGHT);
        assert_eq!(pointer.tx_commitment, COMMITMENT);
        assert_eq!(pointer.data_root, DATA_ROOT);
        assert_eq!(pointer.start, 5);
        assert_eq!(pointer.shares_length, 5);
        assert!(!pointer.has_proof());
        assert_eq!(
            rpc.calls(),
            vec!["submit", "get_inclusion_proof", "check_included", "get_header_by_height"]
        );
        assert_eq!(rpc.state.lock().unwrap().submitted, vec![b"payload".to_vec()]);
    }

    #[tokio::test]
    async fn test_store_rejects_zero_height() {
        let (da, rpc, _) = client(happy_rpc().with(|s| s.submit_height = 0), MockBridge::new());
        let err = da.store(&CancellationToken::new(), b"payload").await.unwrap_err();
        assert!(matches!(err, DaError::SubmissionRejected { height: 0 }));
        assert_eq!(rpc.calls(), vec!["submit"]);
    }

    #[tokio::test]
    async fn test_store_not_included() {
        let (da, rpc, _) = client(happy_rpc().with(|s| s.included = false), MockBridge::new());
        let err = da.store(&CancellationToken::new(), b"payload").await.unwrap_err();
        assert!(matches!(err, DaError::InclusionUnconfirmed { height: HEIGHT }));
        assert!(!rpc.calls().contains(&"get_header_by_height"));
    }

    #[tokio::test]
    async fn test_store_header_failure_after_submit() {
        // The blob is on chain, yet the caller only sees the header error.
        let (da, rpc, _) = client(happy_rpc().with(|s| s.header_fails = true), MockBridge::new());
        let err = da.store(&CancellationToken::new(), b"payload").await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(rpc.state.lock().unwrap().submitted.len(), 1);
    }

    #[tokio::test]
    async fn test_store_bad_data_root_length() {
        let (da, _, _) = client(happy_rpc().with(|s| s.header.data_hash = vec![1; 20]), MockBridge::new());
        let err = da.store(&CancellationToken::new(), b"payload").await.unwrap_err();
        assert!(matches!(err, DaError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_store_cancelled() {
        let (da, rpc, _) = client(happy_rpc(), MockBridge::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = da.store(&cancel, b"payload").await.unwrap_err();
        assert!(matches!(err, DaError::Cancelled));
        assert!(rpc.calls().is_empty());
    }

    #[tokio::test]
    async fn test_read_returns_row_window() {
        let (da, _, _) = client(happy_rpc(), MockBridge::new());
        let pointer = BlobPointer::new(HEIGHT, COMMITMENT, DATA_ROOT).with_share_range(5, 5);
        let (payload, square) = da.read(&CancellationToken::new(), &pointer).await.unwrap();

        assert_eq!(payload, b"payload".to_vec());
        // ODS width 4: shares 5..=9 live in rows 1 and 2.
        assert_eq!(square.square_size, 8);
        assert_eq!((square.start_row, square.end_row), (1, 2));
        assert_eq!(square.rows.len(), 2);
        assert_eq!(square.rows[0][0], vec![8u8]);
        assert_eq!(square.rows[1][7], vec![23u8]);
        assert_eq!(square.row_roots.len(), 8);
    }

    #[test]
    fn test_row_window() {
        // ODS width 4. A blob ending on a row boundary takes the next row too.
        assert_eq!(CelestiaDa::row_window(0, 4, 8).unwrap(), (0, 1));
        assert_eq!(CelestiaDa::row_window(4, 4, 8).unwrap(), (1, 2));
        assert_eq!(CelestiaDa::row_window(3, 2, 8).unwrap(), (0, 1));
        assert_eq!(CelestiaDa::row_window(5, 2, 8).unwrap(), (1, 1));
        assert_eq!(CelestiaDa::row_window(6, 0, 8).unwrap(), (1, 1));
        // Clamped to the extended square.
        assert_eq!(CelestiaDa::row_window(12, 100, 8).unwrap(), (3, 7));
        assert_eq!(CelestiaDa::row_window(15, u64::MAX, 8).unwrap(), (3, 7));
        assert!(CelestiaDa::row_window(0, 1, 1).is_err());
    }

    #[test]
    fn test_row_window_start_outside_original_square() {
        // Shares 16.. are parity data, not part of the original square.
        assert!(CelestiaDa::row_window(16, 1, 8).is_err());
        assert!(CelestiaDa::row_window(31, 0, 8).is_err());
        assert!(CelestiaDa::row_window(32, 1, 8).is_err());
        assert_eq!(CelestiaDa::row_window(15, 0, 8).unwrap(), (3, 3));
    }

    #[tokio::test]
    async fn test_read_unknown_blob() {
        let (da, _, _) = client(happy_rpc(), MockBridge::new());
        let pointer = BlobPointer::new(HEIGHT, [0u8; 32], DATA_ROOT);
        assert!(da.read(&CancellationToken::new(), &pointer).await.unwrap_err().is_transport());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_attaches_proof_and_checks_pointer_nonce() {
        let bridge = MockBridge::new().with(|s| {
            s.nonces = vec![17, 17, 18];
            s.verify_result = true;
        });
        let (da, _, bridge) = client(happy_rpc(), bridge);
        let mut pointer = BlobPointer::new(HEIGHT, COMMITMENT, DATA_ROOT).with_share_range(5, 5);

        let ok = da.verify(&CancellationToken::new(), &mut pointer, 40, 50).await.unwrap();
        assert!(ok);
        assert_eq!(pointer.key, 2);
        assert_eq!(pointer.num_leaves, 4);
        assert_eq!(pointer.side_nodes, vec![[0xa1; 32], [0xa2; 32]]);
        assert_eq!(pointer.tuple_root_nonce, 17);

        let state = bridge.state.lock().unwrap();
        assert_eq!(state.verified.len(), 1);
        let (nonce, tuple, proof) = &state.verified[0];
        // The attestation is checked against the nonce carried in the pointer.
        assert_eq!(*nonce, pointer.tuple_root_nonce);
        assert_eq!(
            *tuple,
            DataRootTuple {
                height: HEIGHT,
                data_root: DATA_ROOT
            }
        );
        assert_eq!(proof.key, 2);
        assert_eq!(proof.side_nodes.len(), 2);

        // The populated pointer survives the wire format.
        let decoded = blob_pointer::deserialize(&da.serialize(&pointer)).unwrap();
        assert_eq!(decoded, pointer);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_keeps_preset_nonce() {
        let bridge = MockBridge::new().with(|s| {
            s.nonces = vec![29, 31];
            s.verify_result = true;
        });
        let (da, _, bridge) = client(happy_rpc(), bridge);
        let mut pointer = BlobPointer::new(HEIGHT, COMMITMENT, DATA_ROOT);
        pointer.tuple_root_nonce = 30;

        assert!(da.verify(&CancellationToken::new(), &mut pointer, 40, 50).await.unwrap());
        assert_eq!(pointer.tuple_root_nonce, 30);

        let state = bridge.state.lock().unwrap();
        // No snapshot read: both reads belong to the relay wait.
        assert_eq!(state.nonce_reads, 2);
        assert_eq!(state.verified[0].0, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_false_is_not_an_error() {
        let bridge = MockBridge::new().with(|s| s.nonces = vec![1, 2]);
        let (da, _, _) = client(happy_rpc(), bridge);
        let mut pointer = BlobPointer::new(HEIGHT, COMMITMENT, DATA_ROOT);
        assert!(!da.verify(&CancellationToken::new(), &mut pointer, 40, 50).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_contract_error_propagates() {
        let bridge = MockBridge::new().with(|s| {
            s.nonces = vec![1, 2];
            s.verify_fails = true;
        });
        let (da, _, _) = client(happy_rpc(), bridge);
        let mut pointer = BlobPointer::new(HEIGHT, COMMITMENT, DATA_ROOT);
        let err = da
            .verify(&CancellationToken::new(), &mut pointer, 40, 50)
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_verify_rejects_short_side_node() {
        let rpc = happy_rpc().with(|s| s.data_root_proof.aunts = vec![vec![0xa1; 32], vec![0xa2; 31]]);
        let (da, _, bridge) = client(rpc, MockBridge::new());
        let mut pointer = BlobPointer::new(HEIGHT, COMMITMENT, DATA_ROOT);
        let err = da
            .verify(&CancellationToken::new(), &mut pointer, 40, 50)
            .await
            .unwrap_err();
        assert!(matches!(err, DaError::InvalidProof(_)));
        // The pointer is untouched and the bridge was never consulted.
        assert!(!pointer.has_proof());
        assert_eq!(bridge.state.lock().unwrap().nonce_reads, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_poll_limit() {
        let bridge = MockBridge::new().with(|s| s.nonces = vec![5]);
        let (da, _, bridge) = client(happy_rpc(), bridge);
        let mut pointer = BlobPointer::new(HEIGHT, COMMITMENT, DATA_ROOT);
        let err = da
            .verify(&CancellationToken::new(), &mut pointer, 40, 50)
            .await
            .unwrap_err();
        assert!(matches!(err, DaError::PollLimitExceeded { polls: 10 }));
        assert!(bridge.state.lock().unwrap().verified.is_empty());
    }

    #[tokio::test]
    async fn test_verify_without_bridge() {
        let da = CelestiaDa::new(namespace(), Arc::new(happy_rpc()));
        let mut pointer = BlobPointer::new(HEIGHT, COMMITMENT, DATA_ROOT);
        let err = da
            .verify(&CancellationToken::new(), &mut pointer, 40, 50)
            .await
            .unwrap_err();
        assert!(matches!(err, DaError::Config(_)));
        assert!(matches!(
            da.wait_for_relay(&CancellationToken::new(), 1).await,
            Err(DaError::Config(_))
        ));
    }

    #[test]
    fn test_from_config_requires_enable() {
        let mut config = DaConfig {
            namespace_id: "000008e5f679bf7116cb".to_string(),
            max_polls: Some(3),
            ..Default::default()
        };
        assert!(matches!(CelestiaDa::from_config(&config), Err(DaError::Config(_))));

        config.enable = true;
        let da = CelestiaDa::from_config(&config).unwrap();
        assert_eq!(da.namespace(), &namespace());
        assert_eq!(da.poller.max_polls(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_height_delegates() {
        let (da, _, _) = client(happy_rpc().with(|s| s.heads = vec![1, 2, 3]), MockBridge::new());
        assert_eq!(da.wait_for_height(&CancellationToken::new(), 3).await.unwrap(), 3);
    }
}
