//! Data storage and persistence
//!
//! The sled-backed chain store and the UTXO index derived from the chain.

pub mod chain_store;
pub mod utxo_set;

pub use chain_store::{ChainStore, TIP_BLOCK_HASH_KEY};
pub use utxo_set::{OutPoint, UnspentOutput, UtxoDelta, UtxoSet};
