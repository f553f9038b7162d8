//! Test utilities shared by the unit tests

use crate::core::{ChainParams, Ledger, ProofOfWork};
use crate::storage::ChainStore;
use crate::wallet::Wallet;

/// Low difficulty so every mined block takes a few hundred hashes
pub const TEST_DIFFICULTY_BITS: u32 = 8;

pub fn test_pow() -> ProofOfWork {
    ProofOfWork::new(TEST_DIFFICULTY_BITS).unwrap()
}

pub fn test_wallet() -> Wallet {
    Wallet::new().unwrap()
}

pub fn test_params() -> ChainParams {
    ChainParams {
        difficulty_bits: TEST_DIFFICULTY_BITS,
        ..ChainParams::default()
    }
}

/// Fresh in-memory chain whose genesis reward went to the returned wallet
pub fn test_ledger() -> (Ledger, Wallet) {
    let wallet = test_wallet();
    let store = ChainStore::temporary().unwrap();
    let ledger = Ledger::create(store, test_params(), &wallet.pub_key_hash()).unwrap();
    (ledger, wallet)
}
