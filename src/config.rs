//! Node configuration

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name the node registers under on the message bus
    pub name: String,
    /// Store directory; `None` keeps everything in a temporary store
    pub data_dir: Option<PathBuf>,
    pub difficulty_bits: u32,
    /// Miner data placed in the coinbase of blocks this node produces
    pub coinbase_data: String,
    /// Mine a genesis block paying this node's wallet when its chain is empty
    pub create_genesis: bool,
    pub min_sleep_ms: u64,
    pub max_sleep_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "node".to_string(),
            data_dir: None,
            difficulty_bits: DEFAULT_DIFFICULTY_BITS,
            coinbase_data: GENESIS_COINBASE_DATA.to_string(),
            create_genesis: false,
            min_sleep_ms: 50,
            max_sleep_ms: 200,
        }
    }
}

impl NodeConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file; absent fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| LedgerError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(LedgerError::Config("node name is empty".to_string()));
        }
        if !(1..=255).contains(&self.difficulty_bits) {
            return Err(LedgerError::Config(format!(
                "difficulty bits {} outside 1..=255",
                self.difficulty_bits
            )));
        }
        if self.min_sleep_ms > self.max_sleep_ms {
            return Err(LedgerError::Config(format!(
                "min sleep {}ms exceeds max sleep {}ms",
                self.min_sleep_ms, self.max_sleep_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::named("alice");
        assert_eq!(config.name, "alice");
        assert_eq!(config.difficulty_bits, DEFAULT_DIFFICULTY_BITS);
        assert!(config.data_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = NodeConfig::named("a");
        config.difficulty_bits = 0;
        assert!(matches!(config.validate(), Err(LedgerError::Config(_))));

        let mut config = NodeConfig::named("a");
        config.min_sleep_ms = 500;
        assert!(matches!(config.validate(), Err(LedgerError::Config(_))));
    }

    #[test]
    fn test_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "bob", "difficulty_bits": 8, "create_genesis": true}}"#).unwrap();

        let config = NodeConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.name, "bob");
        assert_eq!(config.difficulty_bits, 8);
        assert!(config.create_genesis);
        assert_eq!(config.max_sleep_ms, 200);
    }
}
