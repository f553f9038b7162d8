use crate::core::{ChainParams, DEFAULT_DIFFICULTY_BITS, DEFAULT_MAX_NONCE, DEFAULT_MINING_REWARD};
use crate::error::{LedgerError, Result};
use crate::storage::ChainStore;
use log::debug;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File read when no `--config` path is given
pub const DEFAULT_CONFIG_FILE: &str = "ledger.toml";

const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const WALLET_FILE_KEY: &str = "LEDGER_WALLET_FILE";
const DIFFICULTY_BITS_KEY: &str = "LEDGER_DIFFICULTY_BITS";
const MAX_NONCE_KEY: &str = "LEDGER_MAX_NONCE";
const LOG_LEVEL_KEY: &str = "LEDGER_LOG_LEVEL";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub data_dir: PathBuf,
    pub wallet_file: PathBuf,
    pub difficulty_bits: u32,
    pub max_nonce: u64,
    pub mining_reward: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("./data/blocks"),
            wallet_file: PathBuf::from("./data/wallets.dat"),
            difficulty_bits: DEFAULT_DIFFICULTY_BITS,
            max_nonce: DEFAULT_MAX_NONCE,
            mining_reward: DEFAULT_MINING_REWARD,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Read `path` (or `./ledger.toml` when present), then apply `LEDGER_*`
    /// environment overrides and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        debug!("Reading configuration from {}", path.display());
        let text = fs::read_to_string(path).map_err(|e| {
            LedgerError::Config(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Config> {
        Ok(toml::from_str(text)?)
    }

    // `lookup` reads the process environment outside of tests
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup(WALLET_FILE_KEY) {
            self.wallet_file = PathBuf::from(file);
        }
        if let Some(bits) = lookup(DIFFICULTY_BITS_KEY) {
            self.difficulty_bits = parse_override(DIFFICULTY_BITS_KEY, &bits)?;
        }
        if let Some(max_nonce) = lookup(MAX_NONCE_KEY) {
            self.max_nonce = parse_override(MAX_NONCE_KEY, &max_nonce)?;
        }
        if let Some(level) = lookup(LOG_LEVEL_KEY) {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=255).contains(&self.difficulty_bits) {
            return Err(LedgerError::Config(format!(
                "difficulty_bits must be between 1 and 255, got {}",
                self.difficulty_bits
            )));
        }
        if self.max_nonce == 0 {
            return Err(LedgerError::Config("max_nonce must be positive".to_string()));
        }
        if self.mining_reward == 0 {
            return Err(LedgerError::Config(
                "mining_reward must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn chain_params(&self) -> ChainParams {
        ChainParams {
            difficulty_bits: self.difficulty_bits,
            max_nonce: self.max_nonce,
            mining_reward: self.mining_reward,
        }
    }

    pub fn open_store(&self) -> Result<ChainStore> {
        ChainStore::open(&self.data_dir)
    }
}

fn parse_override<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| LedgerError::Config(format!("{key}={value}: {e}")))
}
