//! Error handling for the ledger
//!
//! Every fallible operation in the crate returns [`Result`], so callers can
//! tell a recoverable condition (insufficient funds, a bad signature) apart
//! from storage corruption or a failed mining attempt.

use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A stored block failed its hash, Merkle or linkage check
    #[error("Malformed block {hash}: {reason}")]
    MalformedBlock { hash: String, reason: String },

    /// No nonce below the target was found before the iteration cap
    #[error("Mining exhausted after {attempts} attempts without reaching the target")]
    MiningExhausted { attempts: u64 },

    #[error("Mining cancelled after {attempts} attempts")]
    MiningCancelled { attempts: u64 },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    /// An input references a transaction that is not on the chain
    #[error("Missing prior transaction: {0}")]
    MissingPriorTransaction(String),

    #[error("Invalid signature on transaction {0}")]
    InvalidSignature(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// I/O or transaction failure reported by the storage layer
    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No existing blockchain found. Create one first.")]
    ChainNotFound,

    #[error("Blockchain already exists")]
    ChainAlreadyExists,
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Persistence(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<LedgerError>> for LedgerError {
    fn from(err: sled::transaction::TransactionError<LedgerError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => LedgerError::from(e),
        }
    }
}

impl From<bincode::error::EncodeError> for LedgerError {
    fn from(err: bincode::error::EncodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for LedgerError {
    fn from(err: bincode::error::DecodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_message() {
        let err = LedgerError::InsufficientFunds {
            required: 1000,
            available: 20,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: required 1000, available 20"
        );
    }

    #[test]
    fn test_transaction_abort_unwraps_inner_error() {
        let err: LedgerError = sled::transaction::TransactionError::Abort(
            LedgerError::InvalidTransaction("double spend".to_string()),
        )
        .into();
        assert!(matches!(err, LedgerError::InvalidTransaction(_)));
    }
}
