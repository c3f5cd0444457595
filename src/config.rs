//! Configuration management for SecroChain

use crate::error::LedgerError;
use crate::miner::{ProofOfWorkMiner, DEFAULT_DIFFICULTY, DEFAULT_MAX_ITERATIONS, MAX_DIFFICULTY};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "secrochain.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mining: MiningConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiningConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    /// Hash attempts per block before giving up; 0 means unbounded.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl MiningConfig {
    pub fn miner(&self) -> Result<ProofOfWorkMiner, LedgerError> {
        let budget = match self.max_iterations {
            0 => None,
            n => Some(n),
        };
        ProofOfWorkMiner::new(self.difficulty, budget)
    }
}

fn default_database_path() -> String {
    "secrochain.db".to_string()
}

fn default_difficulty() -> u32 {
    DEFAULT_DIFFICULTY
}

fn default_max_iterations() -> u64 {
    DEFAULT_MAX_ITERATIONS
}

/// Parses a TOML configuration and validates critical values.
pub fn parse_config(text: &str) -> Result<Config, LedgerError> {
    let config: Config = toml::from_str(text)?;

    if config.database.path.is_empty() {
        return Err(LedgerError::Config("database.path must be set".to_string()));
    }
    if config.mining.difficulty > MAX_DIFFICULTY {
        return Err(LedgerError::Config(format!(
            "mining.difficulty must be at most {}, got {}",
            MAX_DIFFICULTY, config.mining.difficulty
        )));
    }
    Ok(config)
}

/// Loads the configuration at `path`, falling back to defaults when the
/// file does not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, LedgerError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = fs::read_to_string(path)?;
    parse_config(&text)
}
