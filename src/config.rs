//! Engine Configuration
//!
//! Loaded from TOML. Every section has a default so the engine runs without
//! a file; `validate()` rejects identities that would make the controller
//! unusable.

use crate::lifecycle::{Address, ControllerConfig};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub controller: ControllerSection,
    pub journal: JournalSection,
    pub asset: AssetSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub controller_address: String,
    pub factory_address: String,
    /// Empty means any caller may submit samples.
    pub oracle_allowlist: Vec<String>,
    pub max_sample_age_secs: Option<i64>,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            controller_address: "controller".into(),
            factory_address: "factory".into(),
            oracle_allowlist: vec!["oracle".into()],
            max_sample_age_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSection {
    /// SQLite file for the event journal. In-memory when unset.
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSection {
    pub symbol: String,
}

impl Default for AssetSection {
    fn default() -> Self {
        Self {
            symbol: "USDC".into(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let controller = Address::new(&self.controller.controller_address);
        let factory = Address::new(&self.controller.factory_address);
        if controller.is_empty() {
            bail!("controller.controller_address must not be empty");
        }
        if factory.is_empty() {
            bail!("controller.factory_address must not be empty");
        }
        if controller == factory {
            bail!("controller and factory must have distinct addresses");
        }
        if self
            .controller
            .oracle_allowlist
            .iter()
            .any(|o| Address::new(o).is_empty())
        {
            bail!("controller.oracle_allowlist contains an empty address");
        }
        if let Some(max_age) = self.controller.max_sample_age_secs {
            if max_age < 0 {
                bail!("controller.max_sample_age_secs must be non-negative");
            }
        }
        if self.asset.symbol.trim().is_empty() {
            bail!("asset.symbol must not be empty");
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            address: Address::new(&self.controller.controller_address),
            factory: Address::new(&self.controller.factory_address),
            oracle_allowlist: self
                .controller
                .oracle_allowlist
                .iter()
                .map(Address::new)
                .collect(),
            max_sample_age_secs: self.controller.max_sample_age_secs,
        }
    }

    pub fn factory_address(&self) -> Address {
        Address::new(&self.controller.factory_address)
    }
}
