//! Error types for SecroChain

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Account {0} is not active")]
    AccountInactive(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: String, requested: String },
    #[error("Cannot transfer to the same account")]
    SameAccount,
    #[error("Chain integrity violation at block {index}: {reason}")]
    ChainIntegrityViolation { index: u64, reason: String },
    #[error("Mining failed: no valid nonce within {iterations} iterations at difficulty {difficulty}")]
    MiningFailed { iterations: u64, difficulty: u32 },
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),
    #[error("Ledger state is inconsistent: {0}")]
    InconsistentState(String),
    #[error("Invalid difficulty {0}: must be between 0 and 64")]
    InvalidDifficulty(u32),
    /// A partial write could not be undone. The store needs manual inspection.
    #[error("FATAL: rollback failed, ledger may be inconsistent: {0}")]
    RollbackFailed(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl LedgerError {
    /// Business rule violations the caller can correct and retry.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAmount(_)
                | LedgerError::AccountInactive(_)
                | LedgerError::AccountNotFound(_)
                | LedgerError::InsufficientBalance { .. }
                | LedgerError::SameAccount
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::RollbackFailed(_))
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}
