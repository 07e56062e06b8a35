//! Celestia data availability client.
//!
//! This crate provides the client side of a rollup's Celestia DA path:
//! - Publishes batch payloads as blobs and returns compact [`BlobPointer`]s
//! - Reads payloads back together with the square rows that cover them
//! - Attaches Blobstream data root proofs and checks them on the bridge
//! - Records NMT preimages so rows can be recovered from their roots
//! - Offers a content-addressed stub for running without Celestia

pub mod adapters;
pub mod celestia;
pub mod config;
pub mod error;
pub mod poller;
pub mod ports;
pub mod square;
pub mod stub;

pub use adapters::CelestiaRpcClient;
pub use blob_pointer::BlobPointer;
pub use celestia::{CelestiaDa, DataAvailabilityReader, DataAvailabilityWriter};
pub use config::DaConfig;
pub use error::{DaError, Result};
pub use poller::ConfirmationPoller;
pub use ports::{AttestationBridge, BinaryMerkleProof, CelestiaRpc, DataRootTuple, Submission};
pub use square::{record_square_preimages, recover_rows, SquareData};
pub use stub::StubDa;
