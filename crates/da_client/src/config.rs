//! DA client configuration.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use celestia_adapter::Namespace;
use serde::{Deserialize, Serialize};

use crate::error::{DaError, Result};
use crate::poller::ConfirmationPoller;

/// Default seconds between confirmation polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Configuration for the Celestia DA client.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct DaConfig {
    /// Whether the Celestia DA path is enabled. A disabled config cannot
    /// build a [`CelestiaDa`](crate::CelestiaDa).
    pub enable: bool,
    /// Celestia node JSON-RPC URL.
    pub rpc: String,
    /// celestia-core RPC URL, used for data root inclusion proofs.
    pub tendermint_rpc: String,
    /// Hex-encoded 10-byte version 0 namespace ID.
    pub namespace_id: String,
    /// Bearer token for the Celestia node.
    pub auth_token: String,
    /// Seconds between confirmation polls.
    pub poll_interval_secs: u64,
    /// Give up polling after this many reads. Unbounded when unset.
    pub max_polls: Option<u64>,
}

impl Default for DaConfig {
    fn default() -> Self {
        Self {
            enable: false,
            rpc: celestia_adapter::DEFAULT_RPC_URL.to_string(),
            tendermint_rpc: celestia_adapter::DEFAULT_TENDERMINT_RPC_URL.to_string(),
            namespace_id: String::new(),
            auth_token: String::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_polls: None,
        }
    }
}

// The auth token never reaches logs.
impl fmt::Debug for DaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaConfig")
            .field("enable", &self.enable)
            .field("rpc", &self.rpc)
            .field("tendermint_rpc", &self.tendermint_rpc)
            .field("namespace_id", &self.namespace_id)
            .field("auth_token", &if self.auth_token.is_empty() { "" } else { "<redacted>" })
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("max_polls", &self.max_polls)
            .finish()
    }
}

impl DaConfig {
    /// Load a config from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DaError::Config(format!("reading {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| DaError::Config(format!("parsing {}: {}", path.display(), e)))
    }

    /// Fail with [`DaError::Config`] unless the DA path is enabled.
    pub fn ensure_enabled(&self) -> Result<()> {
        if !self.enable {
            return Err(DaError::Config("celestia DA is disabled (enable = false)".to_string()));
        }
        Ok(())
    }

    /// Parse the configured namespace ID.
    pub fn namespace(&self) -> Result<Namespace> {
        Namespace::from_hex(&self.namespace_id).map_err(|e| DaError::Config(e.to_string()))
    }

    /// Interval between confirmation polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Build the confirmation poller this config describes.
    pub fn poller(&self) -> Result<ConfirmationPoller> {
        if self.poll_interval_secs == 0 {
            return Err(DaError::Config("poll-interval-secs must be positive".to_string()));
        }
        let poller = ConfirmationPoller::new(self.poll_interval());
        Ok(match self.max_polls {
            Some(n) => poller.with_max_polls(n),
            None => poller,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DaConfig::default();
        assert!(!config.enable);
        assert!(matches!(config.ensure_enabled(), Err(DaError::Config(_))));
        assert_eq!(config.rpc, celestia_adapter::DEFAULT_RPC_URL);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.max_polls, None);
    }

    #[test]
    fn test_parse_partial_json() {
        let config: DaConfig = serde_json::from_str(
            r#"{"enable": true, "namespace-id": "000008e5f679bf7116cb", "max-polls": 12}"#,
        )
        .unwrap();
        assert!(config.enable);
        assert!(config.ensure_enabled().is_ok());
        assert_eq!(config.max_polls, Some(12));
        assert_eq!(config.tendermint_rpc, celestia_adapter::DEFAULT_TENDERMINT_RPC_URL);

        let ns = config.namespace().unwrap();
        assert_eq!(ns.version, 0);
        assert_eq!(&ns.id[18..], &hex::decode("000008e5f679bf7116cb").unwrap()[..]);
    }

    #[test]
    fn test_bad_namespace_is_config_error() {
        let config = DaConfig {
            namespace_id: "zz".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.namespace(), Err(DaError::Config(_))));

        let empty = DaConfig::default();
        assert!(matches!(empty.namespace(), Err(DaError::Config(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = DaConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.poller(), Err(DaError::Config(_))));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = DaConfig {
            auth_token: "secret-token".to_string(),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"rpc": "http://celestia:26658", "poll-interval-secs": 2}}"#).unwrap();
        let config = DaConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.rpc, "http://celestia:26658");
        assert_eq!(config.poll_interval(), Duration::from_secs(2));

        let missing = DaConfig::from_json_file(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(DaError::Config(_))));
    }
}
