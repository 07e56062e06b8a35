//! Local content-addressed stand-in for Celestia.

use std::sync::Arc;

use blob_pointer::{is_stub_header_byte, Hash32, CELESTIA_STUB_MESSAGE_HEADER_FLAG};
use preimage_store::PreimageStore;
use tracing::{info, warn};

use crate::error::{DaError, Result};

/// Stores messages under their SHA-256 and hands back a tagged key.
#[derive(Clone)]
pub struct StubDa {
    store: Arc<dyn PreimageStore>,
}

impl StubDa {
    pub fn new(store: Arc<dyn PreimageStore>) -> Self {
        Self { store }
    }

    /// Store `message` and return `[stub flag] ++ sha256(message)`.
    pub fn store(&self, message: &[u8]) -> Result<Vec<u8>> {
        let key = self.store.put_content(message).map_err(|e| {
            warn!("Stub store failed: {}", e);
            DaError::from(e)
        })?;
        self.store.flush()?;
        info!("Stored {} bytes under {}", message.len(), hex::encode(key));

        let mut reference = Vec::with_capacity(1 + key.len());
        reference.push(CELESTIA_STUB_MESSAGE_HEADER_FLAG);
        reference.extend_from_slice(&key);
        Ok(reference)
    }

    /// Resolve a reference produced by [`store`](Self::store).
    pub fn read(&self, reference: &[u8]) -> Result<Vec<u8>> {
        let (&header, key) = reference
            .split_first()
            .ok_or_else(|| DaError::InvalidResponse("empty stub reference".to_string()))?;
        if !is_stub_header_byte(header) {
            return Err(DaError::InvalidResponse(format!(
                "header byte {:#04x} is not a stub reference",
                header
            )));
        }
        let key: Hash32 = key.try_into().map_err(|_| {
            DaError::InvalidResponse(format!("stub key must be 32 bytes, got {}", key.len()))
        })?;
        Ok(self.store.get(&key)?)
    }
}
