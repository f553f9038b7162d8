//! Core ledger functionality
//!
//! Blocks, transactions, the Merkle commitment, proof-of-work and the
//! ledger controller that ties them to the chain store.

pub mod block;
pub mod ledger;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::{Block, BLOCK_FORMAT_VERSION};
pub use ledger::{ChainIterator, ChainParams, Ledger, DEFAULT_MINING_REWARD, GENESIS_MEMO};
pub use merkle::{MerkleProof, MerkleTree, ProofElement};
pub use proof_of_work::{ProofOfWork, DEFAULT_DIFFICULTY_BITS, DEFAULT_MAX_NONCE};
pub use transaction::{
    PriorTransactions, Transaction, TxInput, TxOutput, COINBASE_OUT_INDEX,
};
