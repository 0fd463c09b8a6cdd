//! Runtime configuration for the ledger, miner and CLI
//!
//! Read from a JSON file when present; `STRAIN_STORE` and
//! `STRAIN_DIFFICULTY` override the file.

use crate::pow::MiningConfig;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "strain.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrainConfig {
    /// Ledger file
    pub store_path: String,
    /// Leading zero bits demanded of every record
    pub difficulty: u8,
    /// Breeder identity recorded when none is given
    pub breeder: String,
    pub mining: MiningConfig,
}

impl Default for StrainConfig {
    fn default() -> Self {
        Self {
            store_path: "strain-ledger.sldg".to_string(),
            difficulty: 12,
            breeder: "local".to_string(),
            mining: MiningConfig::default(),
        }
    }
}

impl StrainConfig {
    /// Load the config file if it exists and parses, then apply env overrides
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut config = Self::default();
        if path.exists() {
            match std::fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|json| serde_json::from_str::<StrainConfig>(&json).map_err(|e| e.to_string()))
            {
                Ok(loaded) => {
                    info!("Loaded config from {}", path.display());
                    config = loaded;
                }
                Err(e) => warn!("Ignoring config {}: {}", path.display(), e),
            }
        }
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(store) = var("STRAIN_STORE") {
            self.store_path = store;
        }
        if let Some(raw) = var("STRAIN_DIFFICULTY") {
            match raw.parse() {
                Ok(d) => self.difficulty = d,
                Err(_) => warn!("STRAIN_DIFFICULTY={} is not a number 0-255", raw),
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
