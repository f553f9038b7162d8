//! # Ledger Chain - a single-node proof-of-work ledger
//!
//! An append-only chain of hash-linked blocks carrying UTXO transfers, signed
//! with ECDSA P-256 and admitted by a fixed-difficulty proof-of-work. A UTXO
//! index derived from the chain answers balance and coin-selection queries.
//!
//! ## How the code is organized
//! - `core/`: blocks, transactions, Merkle commitment, proof-of-work and the
//!   [`Ledger`] controller that extends the chain
//! - `storage/`: the sled-backed [`ChainStore`] and the [`UtxoSet`] index
//! - `wallet/`: key pairs, Base58Check addresses and the wallet file
//! - `config/`: TOML configuration with environment overrides
//! - `utils/`: hashing, signing and bincode helpers
//! - `cli/`: command-line definitions used by `main.rs`
//!
//! ## Where to start reading
//! 1. `core/ledger.rs` for how a block is admitted and committed
//! 2. `core/transaction.rs` for signing and verification
//! 3. `storage/utxo_set.rs` for the spendable-output index
//!
//! The chain store is the source of truth: a [`Ledger`] reopened on the same
//! directory sees exactly the blocks whose commit finished.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
mod test_utils;

pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    Block, ChainIterator, ChainParams, Ledger, MerkleProof, MerkleTree, ProofOfWork,
    Transaction, TxInput, TxOutput,
};
pub use error::{LedgerError, Result};
pub use storage::{ChainStore, OutPoint, UtxoSet};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
