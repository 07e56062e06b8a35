//! Error type for DA client operations.

use blob_pointer::PointerError;
use celestia_adapter::CelestiaError;
use nmt::NmtError;
use preimage_store::StoreError;
use thiserror::Error;

/// Errors that can occur during DA operations.
///
/// An error from `store` never proves the message was not included: the
/// blob may already be on chain when a later step fails.
#[derive(Error, Debug)]
pub enum DaError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed blob pointer: {0}")]
    Format(#[from] PointerError),
    #[error("nmt error: {0}")]
    Nmt(#[from] NmtError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("blob submission rejected: unexpected height {height}")]
    SubmissionRejected { height: u64 },
    #[error("blob at height {height} was not confirmed as included")]
    InclusionUnconfirmed { height: u64 },
    #[error("invalid proof: {0}")]
    InvalidProof(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("row {row} root mismatch: computed {computed}, header has {expected}")]
    RootMismatch {
        row: u64,
        computed: String,
        expected: String,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("condition not met after {polls} polls")]
    PollLimitExceeded { polls: u64 },
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<CelestiaError> for DaError {
    fn from(e: CelestiaError) -> Self {
        DaError::Transport(e.to_string())
    }
}

impl DaError {
    /// Whether the error came from an external collaborator call.
    pub fn is_transport(&self) -> bool {
        matches!(self, DaError::Transport(_))
    }
}

/// Result type for DA operations.
pub type Result<T> = std::result::Result<T, DaError>;
