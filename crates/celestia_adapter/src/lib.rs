//! Celestia DA adapter for submitting and retrieving blobs.
//!
//! This crate provides clients for the two Celestia endpoints the DA client
//! talks to:
//! - [`CelestiaClient`]: celestia-node JSON-RPC (blobs, proofs, headers, shares)
//! - [`TendermintClient`]: celestia-core RPC (data root inclusion proofs)

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Default Celestia node RPC endpoint (bridge node).
pub const DEFAULT_RPC_URL: &str = "http://localhost:26658";

/// Default celestia-core (Tendermint) RPC endpoint.
pub const DEFAULT_TENDERMINT_RPC_URL: &str = "http://localhost:26657";

/// Size of a Celestia namespace in bytes.
pub const NAMESPACE_SIZE: usize = 29;

/// Maximum ID length of a version-0 blob namespace.
pub const NAMESPACE_V0_ID_SIZE: usize = 10;

/// Namespace used for erasure-coded parity shares.
pub const PARITY_SHARES_NAMESPACE: [u8; NAMESPACE_SIZE] = [0xff; NAMESPACE_SIZE];

/// Errors that can occur when interacting with Celestia.
#[derive(Error, Debug)]
pub enum CelestiaError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON-RPC error: code={code}, message={message}")]
    JsonRpc { code: i64, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("blob not found")]
    BlobNotFound,
    #[error("namespace error: {0}")]
    Namespace(String),
}

/// A Celestia namespace (29 bytes: 1 byte version + 28 bytes ID).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Version byte (0 for user namespaces).
    pub version: u8,
    /// 28-byte namespace ID.
    pub id: [u8; 28],
}

impl Namespace {
    /// Create a version-0 blob namespace from an ID of at most 10 bytes.
    ///
    /// The ID is left-padded to 10 bytes and prefixed with 18 zero bytes.
    pub fn v0(id: &[u8]) -> Result<Self, CelestiaError> {
        if id.len() > NAMESPACE_V0_ID_SIZE {
            return Err(CelestiaError::Namespace(format!(
                "v0 namespace id must be at most {} bytes, got {}",
                NAMESPACE_V0_ID_SIZE,
                id.len()
            )));
        }
        let mut full = [0u8; 28];
        full[28 - id.len()..].copy_from_slice(id);
        Ok(Self { version: 0, id: full })
    }

    /// Create a version-0 blob namespace from a hex-encoded ID.
    pub fn from_hex(id_hex: &str) -> Result<Self, CelestiaError> {
        if id_hex.is_empty() {
            return Err(CelestiaError::Namespace("namespace id cannot be blank".to_string()));
        }
        let id = hex::decode(id_hex).map_err(|e| CelestiaError::Namespace(e.to_string()))?;
        Self::v0(&id)
    }

    /// Create a namespace from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CelestiaError> {
        if bytes.len() != NAMESPACE_SIZE {
            return Err(CelestiaError::Namespace(format!(
                "expected 29 bytes, got {}",
                bytes.len()
            )));
        }
        let version = bytes[0];
        let mut id = [0u8; 28];
        id.copy_from_slice(&bytes[1..]);
        Ok(Self { version, id })
    }

    /// Convert to 29-byte representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.version];
        bytes.extend_from_slice(&self.id);
        bytes
    }

    /// Convert to base64 for API calls.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }
}

/// A retrieved blob.
#[derive(Debug, Clone)]
pub struct RetrievedBlob {
    /// The blob data.
    pub data: Vec<u8>,
    /// The namespace.
    pub namespace: Vec<u8>,
    /// Share commitment.
    pub commitment: Vec<u8>,
    /// Index in the block.
    pub index: u32,
}

/// Half-open range of shares `[start, end)` covered by one NMT range proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ShareRange {
    pub start: u64,
    pub end: u64,
}

impl ShareRange {
    /// Number of shares in the range.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inclusion proof of a blob's shares, as returned by `blob.GetProof`.
#[derive(Debug, Clone, Default)]
pub struct BlobProof {
    /// Share ranges, one per row the blob touches.
    pub ranges: Vec<ShareRange>,
    /// The proof as returned by the node, passed back verbatim to `blob.Included`.
    pub raw: serde_json::Value,
}

impl BlobProof {
    /// First share index and total share count covered by the proof.
    pub fn share_span(&self) -> (u64, u64) {
        let start = self.ranges.first().map(|r| r.start).unwrap_or(0);
        let length = self.ranges.iter().map(ShareRange::len).sum();
        (start, length)
    }
}

/// Block header with its data availability header.
#[derive(Debug, Clone, Default)]
pub struct ExtendedHeader {
    /// Block height.
    pub height: u64,
    /// Data root (`header.data_hash`).
    pub data_hash: Vec<u8>,
    /// Row roots of the extended data square.
    pub row_roots: Vec<Vec<u8>>,
    /// Column roots of the extended data square.
    pub column_roots: Vec<Vec<u8>>,
    /// The header as returned by the node, passed back verbatim to `share.GetEDS`.
    pub raw: serde_json::Value,
}

/// Erasure-coded share matrix of a block, stored row-major.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedDataSquare {
    width: usize,
    shares: Vec<Vec<u8>>,
}

impl ExtendedDataSquare {
    /// Build a square from row-major shares.
    pub fn new(shares: Vec<Vec<u8>>) -> Result<Self, CelestiaError> {
        let width = (shares.len() as f64).sqrt() as usize;
        if width * width != shares.len() {
            return Err(CelestiaError::InvalidResponse(format!(
                "{} shares do not form a square",
                shares.len()
            )));
        }
        Ok(Self { width, shares })
    }

    /// Width of the extended square (twice the original square width).
    pub fn width(&self) -> usize {
        self.width
    }

    /// Shares of row `index`, or `None` if out of range.
    pub fn row(&self, index: usize) -> Option<&[Vec<u8>]> {
        if index >= self.width {
            return None;
        }
        Some(&self.shares[index * self.width..(index + 1) * self.width])
    }
}

/// Binary Merkle proof of a data root tuple inside an attested range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataRootInclusionProof {
    /// Number of tuples in the range.
    pub total: u64,
    /// Index of the tuple.
    pub index: u64,
    /// Sibling hashes from leaf to root.
    pub aunts: Vec<Vec<u8>>,
}

/// JSON-RPC request structure.
#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: T,
}

/// JSON-RPC response structure.
#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Blob API response.
#[derive(Deserialize)]
struct BlobResponse {
    namespace: String,
    data: String,
    #[serde(rename = "share_version")]
    _share_version: u8,
    commitment: String,
    index: u32,
}

impl BlobResponse {
    fn into_blob(self) -> Result<RetrievedBlob, CelestiaError> {
        Ok(RetrievedBlob {
            data: decode_base64(&self.data)?,
            namespace: decode_base64(&self.namespace)?,
            commitment: decode_base64(&self.commitment)?,
            index: self.index,
        })
    }
}

#[derive(Deserialize)]
struct HeaderResponse {
    header: RawHeader,
    dah: RawDah,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(deserialize_with = "u64_from_str_or_int")]
    height: u64,
    data_hash: String,
}

#[derive(Deserialize)]
struct RawDah {
    row_roots: Vec<String>,
    column_roots: Vec<String>,
}

#[derive(Deserialize)]
struct EdsResponse {
    data_square: Vec<String>,
}

fn decode_base64(s: &str) -> Result<Vec<u8>, CelestiaError> {
    BASE64
        .decode(s)
        .map_err(|e| CelestiaError::InvalidResponse(format!("invalid base64: {}", e)))
}

/// Tendermint encodes 64-bit integers as JSON strings; accept both forms.
fn u64_from_str_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrInt {
        Str(String),
        Int(u64),
    }

    match StrOrInt::deserialize(deserializer)? {
        StrOrInt::Int(n) => Ok(n),
        StrOrInt::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Celestia DA client.
#[derive(Clone)]
pub struct CelestiaClient {
    client: reqwest::Client,
    rpc_url: String,
    auth_token: Option<String>,
    request_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl CelestiaClient {
    /// Create a new client with the default RPC URL.
    pub fn new() -> Self {
        Self::with_url(DEFAULT_RPC_URL)
    }

    /// Create a new client with a custom RPC URL.
    pub fn with_url(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url: url.to_string(),
            auth_token: None,
            request_id: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(1)),
        }
    }

    /// Attach a bearer token sent with every request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth_token = (!token.is_empty()).then_some(token);
        self
    }

    /// RPC URL this client talks to.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    fn next_id(&self) -> u64 {
        self.request_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    async fn call<P: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, CelestiaError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id(),
            method: method.to_string(),
            params,
        };

        debug!("Calling {} on {}", method, self.rpc_url);

        let mut builder = self.client.post(&self.rpc_url).json(&request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;

        let json: JsonRpcResponse<R> = response.json().await?;

        if let Some(error) = json.error {
            return Err(CelestiaError::JsonRpc {
                code: error.code,
                message: error.message,
            });
        }

        json.result
            .ok_or_else(|| CelestiaError::InvalidResponse("no result in response".to_string()))
    }

    /// Submit a blob to Celestia under the given namespace and return the
    /// inclusion height. Use [`find_commitment`](Self::find_commitment) for
    /// its commitment.
    pub async fn submit_blob(&self, namespace: &Namespace, data: &[u8]) -> Result<u64, CelestiaError> {
        let ns_base64 = namespace.to_base64();
        let data_base64 = BASE64.encode(data);

        info!(
            "Submitting blob: namespace={}, data_len={}",
            ns_base64,
            data.len()
        );

        let blob = serde_json::json!([{
            "namespace": ns_base64,
            "data": data_base64,
            "share_version": 0,
            "commitment": null,
            "index": null
        }]);

        // blob.Submit takes [blobs, TxConfig]
        let params = serde_json::json!([blob, {}]);

        let height: u64 = self.call("blob.Submit", params).await?;

        info!("Blob submitted at height {}", height);

        Ok(height)
    }

    /// Look up the commitment of a blob with the given data at `height`.
    pub async fn find_commitment(
        &self,
        namespace: &Namespace,
        height: u64,
        data: &[u8],
    ) -> Result<Vec<u8>, CelestiaError> {
        self.get_blobs(namespace, height)
            .await?
            .into_iter()
            .find(|blob| blob.data == data)
            .map(|blob| blob.commitment)
            .ok_or(CelestiaError::BlobNotFound)
    }

    /// Get a single blob by commitment.
    pub async fn get_blob(
        &self,
        namespace: &Namespace,
        height: u64,
        commitment: &[u8],
    ) -> Result<RetrievedBlob, CelestiaError> {
        let params = serde_json::json!([height, namespace.to_base64(), BASE64.encode(commitment)]);
        let response: BlobResponse = match self.call("blob.Get", params).await {
            Ok(r) => r,
            Err(CelestiaError::JsonRpc { message, .. }) if message.contains("blob: not found") => {
                return Err(CelestiaError::BlobNotFound);
            }
            Err(e) => return Err(e),
        };
        response.into_blob()
    }

    /// Get all blobs for a namespace at a specific height.
    pub async fn get_blobs(
        &self,
        namespace: &Namespace,
        height: u64,
    ) -> Result<Vec<RetrievedBlob>, CelestiaError> {
        let ns_base64 = namespace.to_base64();

        debug!("Getting blobs at height {} for namespace", height);

        let params = serde_json::json!([height, [ns_base64]]);

        let responses: Vec<BlobResponse> = match self.call("blob.GetAll", params).await {
            Ok(r) => r,
            Err(CelestiaError::JsonRpc { code: _, message })
                if message.contains("blob: not found") =>
            {
                return Ok(vec![]);
            }
            Err(e) => return Err(e),
        };

        responses.into_iter().map(BlobResponse::into_blob).collect()
    }

    /// Get the share inclusion proof of a blob.
    pub async fn get_proof(
        &self,
        namespace: &Namespace,
        height: u64,
        commitment: &[u8],
    ) -> Result<BlobProof, CelestiaError> {
        let params = serde_json::json!([height, namespace.to_base64(), BASE64.encode(commitment)]);
        let raw: serde_json::Value = self.call("blob.GetProof", params).await?;
        let ranges: Vec<ShareRange> = serde_json::from_value(raw.clone())
            .map_err(|e| CelestiaError::InvalidResponse(format!("invalid blob proof: {}", e)))?;
        Ok(BlobProof { ranges, raw })
    }

    /// Check a blob inclusion proof against the commitment.
    pub async fn included(
        &self,
        namespace: &Namespace,
        height: u64,
        proof: &BlobProof,
        commitment: &[u8],
    ) -> Result<bool, CelestiaError> {
        let params = serde_json::json!([
            height,
            namespace.to_base64(),
            proof.raw,
            BASE64.encode(commitment)
        ]);
        self.call("blob.Included", params).await
    }

    /// Get the extended header at a height.
    pub async fn get_header(&self, height: u64) -> Result<ExtendedHeader, CelestiaError> {
        let raw: serde_json::Value = self.call("header.GetByHeight", [height]).await?;
        let parsed: HeaderResponse = serde_json::from_value(raw.clone())
            .map_err(|e| CelestiaError::InvalidResponse(format!("invalid header: {}", e)))?;

        let data_hash = hex::decode(&parsed.header.data_hash)
            .map_err(|e| CelestiaError::InvalidResponse(format!("invalid data hash: {}", e)))?;
        let row_roots = parsed
            .dah
            .row_roots
            .iter()
            .map(|r| decode_base64(r))
            .collect::<Result<_, _>>()?;
        let column_roots = parsed
            .dah
            .column_roots
            .iter()
            .map(|r| decode_base64(r))
            .collect::<Result<_, _>>()?;

        Ok(ExtendedHeader {
            height: parsed.header.height,
            data_hash,
            row_roots,
            column_roots,
            raw,
        })
    }

    /// Get the extended data square for a header.
    pub async fn get_eds(&self, header: &ExtendedHeader) -> Result<ExtendedDataSquare, CelestiaError> {
        let response: EdsResponse = self.call("share.GetEDS", [&header.raw]).await?;
        let shares = response
            .data_square
            .iter()
            .map(|s| decode_base64(s))
            .collect::<Result<Vec<_>, _>>()?;
        ExtendedDataSquare::new(shares)
    }

    /// Get the current chain head height.
    pub async fn get_head_height(&self) -> Result<u64, CelestiaError> {
        #[derive(Deserialize)]
        struct Header {
            header: HeaderInner,
        }

        #[derive(Deserialize)]
        struct HeaderInner {
            #[serde(deserialize_with = "u64_from_str_or_int")]
            height: u64,
        }

        let params: [u8; 0] = [];
        let header: Header = self.call("header.LocalHead", params).await?;

        Ok(header.header.height)
    }

    /// Check if the node is ready.
    pub async fn is_ready(&self) -> Result<bool, CelestiaError> {
        let params: [u8; 0] = [];
        let ready: bool = self.call("node.Ready", params).await?;
        Ok(ready)
    }
}

impl Default for CelestiaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct InclusionProofResult {
    proof: RawInclusionProof,
}

#[derive(Deserialize)]
struct RawInclusionProof {
    #[serde(deserialize_with = "u64_from_str_or_int")]
    total: u64,
    #[serde(deserialize_with = "u64_from_str_or_int")]
    index: u64,
    #[serde(default)]
    aunts: Vec<String>,
}

/// celestia-core RPC client.
#[derive(Clone)]
pub struct TendermintClient {
    client: reqwest::Client,
    rpc_url: String,
}

impl TendermintClient {
    /// Create a new client with a custom RPC URL.
    pub fn with_url(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url: url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the proof that the data root at `height` is part of the data
    /// commitment over `[start, end)`.
    pub async fn data_root_inclusion_proof(
        &self,
        height: u64,
        start: u64,
        end: u64,
    ) -> Result<DataRootInclusionProof, CelestiaError> {
        let url = format!("{}/data_root_inclusion_proof", self.rpc_url);
        debug!("Requesting data root inclusion proof: height={}, range=[{}, {})", height, start, end);

        let response = self
            .client
            .get(&url)
            .query(&[("height", height), ("start", start), ("end", end)])
            .send()
            .await?;

        let json: JsonRpcResponse<InclusionProofResult> = response.json().await?;
        if let Some(error) = json.error {
            return Err(CelestiaError::JsonRpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = json
            .result
            .ok_or_else(|| CelestiaError::InvalidResponse("no result in response".to_string()))?;

        let aunts = result
            .proof
            .aunts
            .iter()
            .map(|a| decode_base64(a))
            .collect::<Result<_, _>>()?;

        Ok(DataRootInclusionProof {
            total: result.proof.total,
            index: result.proof.index,
            aunts,
        })
    }
}
