//! Blob pointer wire format for batch data posted to Celestia DA.
//!
//! A [`BlobPointer`] references a blob that was previously submitted to
//! Celestia together with the data root inclusion proof used to check it
//! against the bridge contract. The pointer crosses process and chain
//! boundaries, so its byte layout is fixed and versioned.
//!
//! Layout of schema version 1 (all integers little-endian):
//!
//! ```text
//! offset size  field
//! 0      1     version (0x01)
//! 1      8     block height
//! 9      32    share commitment
//! 41     32    data root
//! ---- extended section, only written when populated ----
//! 73     8     start share index
//! 81     8     share count
//! 89     8     proof key
//! 97     8     proof num_leaves
//! 105    8     attestation nonce
//! 113    8     side node count N
//! 121    32*N  side nodes
//! ```
//!
//! When framed inside a batch message the record is preceded by a single
//! header byte, see [`serialize`] and [`is_blob_pointer_header_byte`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current schema version for blob pointers.
pub const SCHEMA_VERSION: u8 = 1;

/// Header flag marking a framed message as a Celestia blob pointer.
pub const CELESTIA_MESSAGE_HEADER_FLAG: u8 = 0x0c;

/// Header flag marking a framed message as a stub DA key.
pub const CELESTIA_STUB_MESSAGE_HEADER_FLAG: u8 = 0x02;

/// Length of the fixed section (version, height, commitment, data root).
pub const FIXED_SECTION_LEN: usize = 1 + 8 + 32 + 32;

/// Length of the extended section before the side nodes.
pub const EXTENDED_HEADER_LEN: usize = 6 * 8;

/// A 32-byte hash/root value.
pub type Hash32 = [u8; 32];

/// Errors that can occur while decoding a blob pointer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointerError {
    #[error("truncated pointer: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("unsupported schema version: expected {expected}, got {got}")]
    UnsupportedVersion { expected: u8, got: u8 },
    #[error("side node section declares {declared} nodes but only {remaining} bytes remain")]
    SideNodesOverflow { declared: u64, remaining: usize },
    #[error("{0} trailing bytes after pointer")]
    TrailingBytes(usize),
    #[error("proof key {key} out of range for {num_leaves} leaves")]
    InvalidProofKey { key: u64, num_leaves: u64 },
    #[error("message header byte {0:#04x} is not a blob pointer header")]
    MissingHeaderFlag(u8),
}

/// Reference to a blob posted to Celestia, plus the proof that its block's
/// data root was committed to the bridge contract.
///
/// The serde form is for human-facing output and renders hashes as hex; the
/// wire form is [`BlobPointer::encode`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobPointer {
    /// Celestia block height the blob was included at.
    pub block_height: u64,
    /// Index of the first share of the blob in the original data square.
    pub start: u64,
    /// Number of shares the blob occupies.
    pub shares_length: u64,
    /// Index of the data root tuple in the attested range.
    pub key: u64,
    /// Number of leaves in the attested range.
    pub num_leaves: u64,
    /// Share commitment of the blob.
    #[serde(with = "hex_hash")]
    pub tx_commitment: Hash32,
    /// Data root of the block at `block_height`.
    #[serde(with = "hex_hash")]
    pub data_root: Hash32,
    /// Sibling hashes of the data root tuple inclusion proof.
    #[serde(with = "hex_hashes")]
    pub side_nodes: Vec<Hash32>,
    /// Bridge attestation nonce the proof is checked against.
    pub tuple_root_nonce: u64,
}

impl BlobPointer {
    /// Create a pointer with only the fields known at submission time.
    pub fn new(block_height: u64, tx_commitment: Hash32, data_root: Hash32) -> Self {
        Self {
            block_height,
            tx_commitment,
            data_root,
            ..Default::default()
        }
    }

    /// Set the share range covered by the blob.
    pub fn with_share_range(mut self, start: u64, shares_length: u64) -> Self {
        self.start = start;
        self.shares_length = shares_length;
        self
    }

    /// Whether a data root inclusion proof has been attached.
    pub fn has_proof(&self) -> bool {
        self.num_leaves > 0
    }

    fn has_extended_section(&self) -> bool {
        self.start != 0
            || self.shares_length != 0
            || self.key != 0
            || self.num_leaves != 0
            || self.tuple_root_nonce != 0
            || !self.side_nodes.is_empty()
    }

    /// Length in bytes of the encoded record.
    pub fn encoded_len(&self) -> usize {
        if self.has_extended_section() {
            FIXED_SECTION_LEN + EXTENDED_HEADER_LEN + 32 * self.side_nodes.len()
        } else {
            FIXED_SECTION_LEN
        }
    }

    /// Encode the pointer record (without the message header byte).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(SCHEMA_VERSION);
        buf.extend_from_slice(&self.block_height.to_le_bytes());
        buf.extend_from_slice(&self.tx_commitment);
        buf.extend_from_slice(&self.data_root);

        if self.has_extended_section() {
            buf.extend_from_slice(&self.start.to_le_bytes());
            buf.extend_from_slice(&self.shares_length.to_le_bytes());
            buf.extend_from_slice(&self.key.to_le_bytes());
            buf.extend_from_slice(&self.num_leaves.to_le_bytes());
            buf.extend_from_slice(&self.tuple_root_nonce.to_le_bytes());
            buf.extend_from_slice(&(self.side_nodes.len() as u64).to_le_bytes());
            for node in &self.side_nodes {
                buf.extend_from_slice(node);
            }
        }

        buf
    }

    /// Decode a pointer record.
    ///
    /// All fields are copied out of `bytes`; the returned pointer never
    /// aliases the input buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self, PointerError> {
        let mut reader = Reader::new(bytes);

        if bytes.len() < FIXED_SECTION_LEN {
            return Err(PointerError::Truncated {
                needed: FIXED_SECTION_LEN,
                got: bytes.len(),
            });
        }

        let version = reader.u8()?;
        if version != SCHEMA_VERSION {
            return Err(PointerError::UnsupportedVersion {
                expected: SCHEMA_VERSION,
                got: version,
            });
        }

        let mut pointer = BlobPointer {
            block_height: reader.u64()?,
            tx_commitment: reader.hash()?,
            data_root: reader.hash()?,
            ..Default::default()
        };

        if reader.is_empty() {
            return Ok(pointer);
        }

        pointer.start = reader.u64()?;
        pointer.shares_length = reader.u64()?;
        pointer.key = reader.u64()?;
        pointer.num_leaves = reader.u64()?;
        pointer.tuple_root_nonce = reader.u64()?;

        let declared = reader.u64()?;
        let remaining = reader.remaining();
        let needed = declared
            .checked_mul(32)
            .filter(|n| *n <= remaining as u64)
            .ok_or(PointerError::SideNodesOverflow {
                declared,
                remaining,
            })?;

        pointer.side_nodes = Vec::with_capacity(needed as usize / 32);
        for _ in 0..declared {
            pointer.side_nodes.push(reader.hash()?);
        }

        if !reader.is_empty() {
            return Err(PointerError::TrailingBytes(reader.remaining()));
        }

        if pointer.num_leaves > 0 && pointer.key >= pointer.num_leaves {
            return Err(PointerError::InvalidProofKey {
                key: pointer.key,
                num_leaves: pointer.num_leaves,
            });
        }

        Ok(pointer)
    }
}

/// Bounds-checked cursor over an input buffer.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PointerError> {
        if self.remaining() < n {
            return Err(PointerError::Truncated {
                needed: self.pos + n,
                got: self.bytes.len(),
            });
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, PointerError> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64, PointerError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn hash(&mut self) -> Result<Hash32, PointerError> {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(self.take(32)?);
        Ok(hash)
    }
}

/// Whether a message header byte carries the Celestia blob pointer flag.
///
/// The flag shares the header byte with other message kinds, so this tests
/// bit containment rather than equality.
pub fn is_blob_pointer_header_byte(header: u8) -> bool {
    header & CELESTIA_MESSAGE_HEADER_FLAG != 0
}

/// Whether a message header byte carries the stub DA flag.
pub fn is_stub_header_byte(header: u8) -> bool {
    header & CELESTIA_STUB_MESSAGE_HEADER_FLAG != 0
}

/// Frame a pointer as a batch message: header byte followed by the record.
pub fn serialize(pointer: &BlobPointer) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + pointer.encoded_len());
    buf.push(CELESTIA_MESSAGE_HEADER_FLAG);
    buf.extend_from_slice(&pointer.encode());
    buf
}

/// Parse a framed batch message produced by [`serialize`].
pub fn deserialize(message: &[u8]) -> Result<BlobPointer, PointerError> {
    let (&header, record) = message.split_first().ok_or(PointerError::Truncated {
        needed: 1 + FIXED_SECTION_LEN,
        got: 0,
    })?;
    if !is_blob_pointer_header_byte(header) {
        return Err(PointerError::MissingHeaderFlag(header));
    }
    BlobPointer::decode(record)
}

/// Convert a hash to hex string.
pub fn hash_to_hex(hash: &Hash32) -> String {
    hex::encode(hash)
}

/// Parse a hex string to hash.
pub fn hex_to_hash(s: &str) -> Result<Hash32, hex::FromHexError> {
    let bytes = hex::decode(s.trim_start_matches("0x"))?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

mod hex_hash {
    use super::{hex_to_hash, Hash32};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash32, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex_to_hash(&raw).map_err(D::Error::custom)
    }
}

mod hex_hashes {
    use super::{hex_to_hash, Hash32};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hashes: &[Hash32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(hashes.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Hash32>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|raw| hex_to_hash(raw).map_err(D::Error::custom))
            .collect()
    }
}
