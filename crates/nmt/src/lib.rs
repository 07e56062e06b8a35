//! Namespaced Merkle tree (NMT) for Celestia shares.
//!
//! This crate computes NMT roots the way celestia-node does (SHA-256,
//! RFC 6962 tree shape, max-namespace ignored) while handing every computed
//! digest and its exact preimage to the caller. The tree is never kept in
//! memory: only the root and a flat digest -> preimage relation survive, and
//! [`NmtHasher::reconstruct_content`] walks that relation back down to the
//! original leaves.
//!
//! Every namespaced hash has the layout `min_ns || max_ns || sha256(..)`.
//! Leaf preimages are `0x00 || namespaced_data`, node preimages are
//! `0x01 || left || right`.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

/// Namespace size used by Celestia (1 byte version + 28 bytes ID).
pub const NAMESPACE_SIZE: usize = 29;

/// Size of the underlying SHA-256 digest.
pub const HASH_SIZE: usize = 32;

/// Domain separator prepended to leaf data before hashing.
pub const LEAF_PREFIX: u8 = 0x00;

/// Domain separator prepended to child hashes before hashing.
pub const NODE_PREFIX: u8 = 0x01;

/// A 32-byte digest, the key of the preimage relation.
pub type Hash32 = [u8; 32];

/// Errors that can occur during tree operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NmtError {
    #[error("can not compute root of incomplete row: share {index} is absent")]
    IncompleteInput { index: usize },
    #[error("missing preimage for hash {}", hex::encode(.hash))]
    MissingPreimage { hash: Hash32 },
    #[error("share {index} is {len} bytes, shorter than the {namespace_size}-byte namespace")]
    ShareTooShort {
        index: usize,
        len: usize,
        namespace_size: usize,
    },
    #[error("share {index} is out of namespace order")]
    NamespaceOrder { index: usize },
    #[error("invalid namespaced hash length: expected {expected}, got {got}")]
    InvalidHashLength { expected: usize, got: usize },
    #[error("malformed preimage for hash {}: {reason}", hex::encode(.hash))]
    MalformedPreimage { hash: Hash32, reason: &'static str },
    #[error("preimage oracle error: {0}")]
    Oracle(String),
}

/// A namespaced hash: `min_ns || max_ns || digest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedHash {
    bytes: Vec<u8>,
    namespace_size: usize,
}

impl NamespacedHash {
    /// Parse a namespaced hash produced with the given namespace size.
    pub fn from_bytes(bytes: &[u8], namespace_size: usize) -> Result<Self, NmtError> {
        let expected = 2 * namespace_size + HASH_SIZE;
        if bytes.len() != expected {
            return Err(NmtError::InvalidHashLength {
                expected,
                got: bytes.len(),
            });
        }
        Ok(Self {
            bytes: bytes.to_vec(),
            namespace_size,
        })
    }

    fn from_parts(min: &[u8], max: &[u8], digest: &Hash32) -> Self {
        let mut bytes = Vec::with_capacity(min.len() + max.len() + HASH_SIZE);
        bytes.extend_from_slice(min);
        bytes.extend_from_slice(max);
        bytes.extend_from_slice(digest);
        Self {
            bytes,
            namespace_size: min.len(),
        }
    }

    /// Smallest namespace covered by this subtree.
    pub fn min_namespace(&self) -> &[u8] {
        &self.bytes[..self.namespace_size]
    }

    /// Largest namespace covered by this subtree.
    pub fn max_namespace(&self) -> &[u8] {
        &self.bytes[self.namespace_size..2 * self.namespace_size]
    }

    /// The plain SHA-256 digest, used as key into the preimage relation.
    pub fn digest(&self) -> Hash32 {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&self.bytes[2 * self.namespace_size..]);
        digest
    }

    /// Raw bytes of the namespaced hash.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Result of one hashing step: the namespaced hash and the exact bytes that
/// were fed to SHA-256 to produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hashed {
    pub hash: NamespacedHash,
    pub preimage: Vec<u8>,
}

impl Hashed {
    /// Key under which `preimage` is recorded.
    pub fn digest(&self) -> Hash32 {
        self.hash.digest()
    }
}

fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Largest power of two strictly less than `n` (n >= 2).
fn split_point(n: usize) -> usize {
    let k = n.next_power_of_two();
    if k == n {
        n / 2
    } else {
        k / 2
    }
}

/// Namespaced hasher and tree engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmtHasher {
    namespace_size: usize,
    ignore_max_namespace: bool,
    max_namespace: Vec<u8>,
}

impl Default for NmtHasher {
    fn default() -> Self {
        Self::new(NAMESPACE_SIZE)
    }
}

impl NmtHasher {
    /// Create a hasher for the given namespace size, ignoring the max namespace.
    pub fn new(namespace_size: usize) -> Self {
        Self {
            namespace_size,
            ignore_max_namespace: true,
            max_namespace: vec![0xff; namespace_size],
        }
    }

    /// Toggle whether the reserved max namespace is excluded from ranges.
    pub fn with_ignore_max_namespace(mut self, ignore: bool) -> Self {
        self.ignore_max_namespace = ignore;
        self
    }

    /// Namespace size in bytes.
    pub fn namespace_size(&self) -> usize {
        self.namespace_size
    }

    /// Length of a namespaced hash produced by this hasher.
    pub fn hash_len(&self) -> usize {
        2 * self.namespace_size + HASH_SIZE
    }

    /// Root of a tree with no leaves.
    pub fn empty_root(&self) -> Hashed {
        let zeros = vec![0u8; self.namespace_size];
        Hashed {
            hash: NamespacedHash::from_parts(&zeros, &zeros, &sha256(&[])),
            preimage: Vec::new(),
        }
    }

    /// Hash namespaced leaf data (`namespace || payload`).
    pub fn hash_leaf(&self, ndata: &[u8]) -> Result<Hashed, NmtError> {
        if ndata.len() < self.namespace_size {
            return Err(NmtError::ShareTooShort {
                index: 0,
                len: ndata.len(),
                namespace_size: self.namespace_size,
            });
        }
        let namespace = &ndata[..self.namespace_size];

        let mut preimage = Vec::with_capacity(1 + ndata.len());
        preimage.push(LEAF_PREFIX);
        preimage.extend_from_slice(ndata);

        Ok(Hashed {
            hash: NamespacedHash::from_parts(namespace, namespace, &sha256(&preimage)),
            preimage,
        })
    }

    /// Hash two children into their parent.
    pub fn hash_node(&self, left: &NamespacedHash, right: &NamespacedHash) -> Hashed {
        let min = left.min_namespace();
        let mut max = right.max_namespace();
        if self.ignore_max_namespace && right.min_namespace() == self.max_namespace.as_slice() {
            max = left.max_namespace();
        }

        let mut preimage = Vec::with_capacity(1 + 2 * self.hash_len());
        preimage.push(NODE_PREFIX);
        preimage.extend_from_slice(left.as_bytes());
        preimage.extend_from_slice(right.as_bytes());

        Hashed {
            hash: NamespacedHash::from_parts(min, max, &sha256(&preimage)),
            preimage,
        }
    }

    /// Compute the NMT root over ordered shares.
    ///
    /// `on_hash` is invoked once per computed digest with the bytes that were
    /// hashed. Nothing is recorded if the input is rejected.
    pub fn compute_root<S, F>(&self, shares: &[Option<S>], mut on_hash: F) -> Result<NamespacedHash, NmtError>
    where
        S: AsRef<[u8]>,
        F: FnMut(&Hash32, &[u8]),
    {
        if let Some(index) = shares.iter().position(Option::is_none) {
            return Err(NmtError::IncompleteInput { index });
        }

        let mut leaves = Vec::with_capacity(shares.len());
        let mut last_namespace: Option<&[u8]> = None;
        for (index, share) in shares.iter().flatten().enumerate() {
            let share = share.as_ref();
            if share.len() < self.namespace_size {
                return Err(NmtError::ShareTooShort {
                    index,
                    len: share.len(),
                    namespace_size: self.namespace_size,
                });
            }
            let namespace = &share[..self.namespace_size];
            if last_namespace.is_some_and(|last| namespace < last) {
                return Err(NmtError::NamespaceOrder { index });
            }
            last_namespace = Some(namespace);
            leaves.push(share);
        }

        if leaves.is_empty() {
            let empty = self.empty_root();
            on_hash(&empty.digest(), &empty.preimage);
            return Ok(empty.hash);
        }

        let mut leaf_hashes = Vec::with_capacity(leaves.len());
        for share in leaves {
            let hashed = self.hash_leaf(share)?;
            on_hash(&hashed.digest(), &hashed.preimage);
            leaf_hashes.push(hashed.hash);
        }

        Ok(self.build(&leaf_hashes, &mut on_hash))
    }

    fn build<F>(&self, nodes: &[NamespacedHash], on_hash: &mut F) -> NamespacedHash
    where
        F: FnMut(&Hash32, &[u8]),
    {
        if nodes.len() == 1 {
            return nodes[0].clone();
        }
        let k = split_point(nodes.len());
        let left = self.build(&nodes[..k], on_hash);
        let right = self.build(&nodes[k..], on_hash);
        let hashed = self.hash_node(&left, &right);
        on_hash(&hashed.digest(), &hashed.preimage);
        hashed.hash
    }

    /// Recover the ordered leaf data under `root` using only the preimage
    /// relation.
    ///
    /// Each returned entry is the namespaced leaf data that was pushed into
    /// [`compute_root`](Self::compute_root).
    pub fn reconstruct_content<O>(&self, oracle: O, root: &NamespacedHash) -> Result<Vec<Vec<u8>>, NmtError>
    where
        O: Fn(&Hash32) -> Result<Option<Vec<u8>>, NmtError>,
    {
        if root.as_bytes().len() != self.hash_len() {
            return Err(NmtError::InvalidHashLength {
                expected: self.hash_len(),
                got: root.as_bytes().len(),
            });
        }
        let mut leaves = Vec::new();
        self.walk(&oracle, root, &mut leaves)?;
        Ok(leaves)
    }

    fn walk<O>(&self, oracle: &O, root: &NamespacedHash, out: &mut Vec<Vec<u8>>) -> Result<(), NmtError>
    where
        O: Fn(&Hash32) -> Result<Option<Vec<u8>>, NmtError>,
    {
        let digest = root.digest();
        let preimage = oracle(&digest)?.ok_or(NmtError::MissingPreimage { hash: digest })?;
        if sha256(&preimage) != digest {
            return Err(NmtError::MalformedPreimage {
                hash: digest,
                reason: "preimage does not hash to key",
            });
        }

        // Empty tree.
        if preimage.is_empty() {
            return Ok(());
        }

        let is_leaf = root.min_namespace() == root.max_namespace() && preimage[0] == LEAF_PREFIX;
        if is_leaf {
            out.push(preimage[1..].to_vec());
            return Ok(());
        }

        let child_len = self.hash_len();
        if preimage[0] != NODE_PREFIX || preimage.len() != 1 + 2 * child_len {
            return Err(NmtError::MalformedPreimage {
                hash: digest,
                reason: "not a node preimage",
            });
        }

        let left = NamespacedHash::from_bytes(&preimage[1..1 + child_len], self.namespace_size)?;
        let right = NamespacedHash::from_bytes(&preimage[1 + child_len..], self.namespace_size)?;
        self.walk(oracle, &left, out)?;
        self.walk(oracle, &right, out)
    }
}

/// Compute a Celestia NMT root (29-byte namespaces, max namespace ignored).
pub fn compute_nmt_root<S, F>(shares: &[Option<S>], on_hash: F) -> Result<NamespacedHash, NmtError>
where
    S: AsRef<[u8]>,
    F: FnMut(&Hash32, &[u8]),
{
    NmtHasher::default().compute_root(shares, on_hash)
}

/// Reconstruct leaf data under a Celestia NMT root from a preimage oracle.
pub fn nmt_content<O>(oracle: O, root: &NamespacedHash) -> Result<Vec<Vec<u8>>, NmtError>
where
    O: Fn(&Hash32) -> Result<Option<Vec<u8>>, NmtError>,
{
    NmtHasher::default().reconstruct_content(oracle, root)
}

/// Recording callback that collects preimages into a map.
pub fn record_into(map: &mut HashMap<Hash32, Vec<u8>>) -> impl FnMut(&Hash32, &[u8]) + '_ {
    move |digest, preimage| {
        map.insert(*digest, preimage.to_vec());
    }
}
