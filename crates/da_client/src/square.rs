//! Row windows of the extended data square and their NMT preimages.
//!
//! A verifier that only holds row roots can recover the rows of a read
//! through the preimage relation recorded here.

use std::collections::HashMap;

use celestia_adapter::{NAMESPACE_SIZE, PARITY_SHARES_NAMESPACE};
use nmt::{Hash32, NamespacedHash, NmtError, NmtHasher};
use preimage_store::{PreimageStore, StoreError};
use tracing::{debug, warn};

use crate::error::{DaError, Result};

/// Header roots and the window of square rows that covers a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SquareData {
    pub row_roots: Vec<Vec<u8>>,
    pub column_roots: Vec<Vec<u8>>,
    /// Rows `start_row..=end_row`, each of `square_size` shares.
    pub rows: Vec<Vec<Vec<u8>>>,
    /// Width of the extended square.
    pub square_size: u64,
    pub start_row: u64,
    pub end_row: u64,
}

impl SquareData {
    /// Width of the original (unextended) square.
    pub fn ods_width(&self) -> u64 {
        self.square_size / 2
    }

    /// Row indices covered by the window, paired with their shares.
    pub fn window(&self) -> impl Iterator<Item = (u64, &Vec<Vec<u8>>)> {
        (self.start_row..).zip(self.rows.iter())
    }

    fn row_root(&self, row: u64) -> Result<&[u8]> {
        self.row_roots
            .get(row as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| DaError::InvalidResponse(format!("no row root for row {}", row)))
    }
}

/// Prefix each share of `row` with its NMT namespace.
///
/// Shares in the original quadrant carry their own namespace; every other
/// cell is parity data.
pub fn namespaced_row(row: u64, shares: &[Vec<u8>], ods_width: u64) -> Result<Vec<Option<Vec<u8>>>> {
    shares
        .iter()
        .enumerate()
        .map(|(col, share)| -> Result<Option<Vec<u8>>> {
            let original = row < ods_width && (col as u64) < ods_width;
            let namespace: &[u8] = if original {
                share.get(..NAMESPACE_SIZE).ok_or_else(|| {
                    DaError::InvalidResponse(format!(
                        "share ({}, {}) is {} bytes, shorter than a namespace",
                        row,
                        col,
                        share.len()
                    ))
                })?
            } else {
                &PARITY_SHARES_NAMESPACE
            };
            let mut cell = Vec::with_capacity(NAMESPACE_SIZE + share.len());
            cell.extend_from_slice(namespace);
            cell.extend_from_slice(share);
            Ok(Some(cell))
        })
        .collect()
}

/// Compute the root of every row in the window, check it against the header
/// and persist the preimages. Returns the number of preimages written.
///
/// Nothing is written for a row whose root does not match.
pub fn record_square_preimages(square: &SquareData, store: &dyn PreimageStore) -> Result<usize> {
    let hasher = NmtHasher::default();
    let mut written = 0;
    for (row, shares) in square.window() {
        let cells = namespaced_row(row, shares, square.ods_width())?;
        let mut preimages = HashMap::new();
        let root = hasher.compute_root(&cells, nmt::record_into(&mut preimages))?;

        let expected = square.row_root(row)?;
        if root.as_bytes() != expected {
            warn!("Row {} root mismatch", row);
            return Err(DaError::RootMismatch {
                row,
                computed: hex::encode(root.as_bytes()),
                expected: hex::encode(expected),
            });
        }

        for (digest, preimage) in &preimages {
            store.put(digest, preimage)?;
        }
        written += preimages.len();
        debug!("Recorded {} preimages for row {}", preimages.len(), row);
    }
    store.flush()?;
    Ok(written)
}

/// Adapt a store into a preimage oracle for tree reconstruction.
pub fn store_oracle(store: &dyn PreimageStore) -> impl Fn(&Hash32) -> std::result::Result<Option<Vec<u8>>, NmtError> + '_ {
    move |digest| {
        store
            .try_get(digest)
            .map_err(|e: StoreError| NmtError::Oracle(e.to_string()))
    }
}

/// Recover the shares of every row in the window from their row roots.
pub fn recover_rows(square: &SquareData, store: &dyn PreimageStore) -> Result<Vec<Vec<Vec<u8>>>> {
    let hasher = NmtHasher::default();
    let oracle = store_oracle(store);
    (square.start_row..=square.end_row)
        .map(|row| -> Result<Vec<Vec<u8>>> {
            let root = NamespacedHash::from_bytes(square.row_root(row)?, NAMESPACE_SIZE)?;
            let leaves = hasher.reconstruct_content(&oracle, &root)?;
            leaves
                .into_iter()
                .map(|leaf| {
                    leaf.get(NAMESPACE_SIZE..).map(<[u8]>::to_vec).ok_or_else(|| {
                        DaError::InvalidResponse(format!("row {} leaf shorter than a namespace", row))
                    })
                })
                .collect()
        })
        .collect()
}
