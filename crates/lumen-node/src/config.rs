use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use lumen_core::ChainParams;
use lumen_crypto::{secret_key_from_hex, Address, SecretKey};
use serde::Deserialize;

/// Node settings: built-in defaults, then an optional file, then `LUMEN_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub master_key: Option<String>,
    pub beneficiary: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub genesis_timestamp: Option<u64>,
    pub target_gas_limit: u64,
    pub tick_ms: u64,
    pub log_filter: String,
    #[serde(default)]
    pub chain: ChainParams,
}

impl NodeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(File::from_str(
            include_str!("../config.default.toml"),
            FileFormat::Toml,
        ));
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }
        let full = builder
            .add_source(
                Environment::with_prefix("LUMEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read node configuration")?;
        Ok(full.try_deserialize()?)
    }

    pub fn master_key(&self) -> Result<Option<SecretKey>> {
        self.master_key
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| secret_key_from_hex(s).context("invalid master_key"))
            .transpose()
    }

    pub fn beneficiary(&self) -> Result<Option<Address>> {
        self.beneficiary
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<Address>().context("invalid beneficiary"))
            .transpose()
    }
}
