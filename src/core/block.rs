use crate::core::{MerkleTree, ProofOfWork, Transaction};
use crate::error::{LedgerError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};

/// Leading byte of every stored block; bump it when the layout changes
pub const BLOCK_FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    transactions: Vec<Transaction>,
    prev_hash: Vec<u8>,
    hash: Vec<u8>,
    nonce: u64,
}

impl Block {
    /// Stamp the current time, commit to the transactions and mine the block.
    ///
    /// # Panics
    ///
    /// Panics when `transactions` is empty: every block carries at least one
    /// transaction and callers check this before mining.
    pub fn new_block(
        transactions: Vec<Transaction>,
        prev_hash: &[u8],
        pow: &ProofOfWork,
    ) -> Result<Block> {
        assert!(
            !transactions.is_empty(),
            "a block must contain at least one transaction"
        );

        let mut block = Block {
            timestamp: current_timestamp()?,
            transactions,
            prev_hash: prev_hash.to_vec(),
            hash: vec![],
            nonce: 0,
        };
        let merkle_root = block.merkle_root()?;

        info!(
            "Starting proof-of-work for block with {} transaction(s) (difficulty: {})",
            block.transactions.len(),
            pow.difficulty_bits()
        );
        let (nonce, hash) = pow.run(&block.prev_hash, &merkle_root, block.timestamp)?;
        block.nonce = nonce;
        block.hash = hash;
        info!(
            "Proof-of-work completed for block {} after {} attempts",
            HEXLOWER.encode(&block.hash),
            nonce + 1
        );

        Ok(block)
    }

    pub fn genesis(coinbase: Transaction, pow: &ProofOfWork) -> Result<Block> {
        Block::new_block(vec![coinbase], &[], pow)
    }

    /// Merkle root over the serialized transactions, in block order
    pub fn merkle_root(&self) -> Result<Vec<u8>> {
        let serialized = self
            .transactions
            .iter()
            .map(Transaction::serialize)
            .collect::<Result<Vec<_>>>()?;
        MerkleTree::root_of(&serialized)
    }

    pub fn merkle_tree(&self) -> Result<MerkleTree> {
        let serialized = self
            .transactions
            .iter()
            .map(Transaction::serialize)
            .collect::<Result<Vec<_>>>()?;
        MerkleTree::new(&serialized)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![BLOCK_FORMAT_VERSION];
        bytes.extend(serialize(self)?);
        Ok(bytes)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        match bytes.split_first() {
            Some((&BLOCK_FORMAT_VERSION, body)) => deserialize::<Block>(body),
            Some((version, _)) => Err(LedgerError::Serialization(format!(
                "Unsupported block format version {version}"
            ))),
            None => Err(LedgerError::Serialization(
                "Empty block record".to_string(),
            )),
        }
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_prev_hash(&self) -> &[u8] {
        self.prev_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_hash_hex(&self) -> String {
        HEXLOWER.encode(&self.hash)
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_pow, test_wallet};

    fn coinbase(memo: &str) -> Transaction {
        let wallet = test_wallet();
        Transaction::new_coinbase(&wallet.pub_key_hash(), memo, 50).unwrap()
    }

    #[test]
    fn test_genesis_block() {
        let pow = test_pow();
        let block = Block::genesis(coinbase("Genesis block"), &pow).unwrap();

        assert!(block.is_genesis());
        assert_eq!(block.get_transactions().len(), 1);
        assert!(block.get_transactions()[0].is_coinbase());
        assert_eq!(block.get_hash().len(), 32);
        assert!(pow.validate(&block));
    }

    #[test]
    fn test_round_trip() {
        let pow = test_pow();
        let block = Block::new_block(vec![coinbase("a"), coinbase("b")], &[7u8; 32], &pow)
            .unwrap();

        let bytes = block.serialize().unwrap();
        assert_eq!(bytes[0], BLOCK_FORMAT_VERSION);
        assert_eq!(Block::deserialize(&bytes).unwrap(), block);
    }

    #[test]
    fn test_unknown_format_version_is_rejected() {
        let pow = test_pow();
        let block = Block::genesis(coinbase("v"), &pow).unwrap();
        let mut bytes = block.serialize().unwrap();
        bytes[0] = BLOCK_FORMAT_VERSION + 1;

        assert!(matches!(
            Block::deserialize(&bytes),
            Err(LedgerError::Serialization(_))
        ));
        assert!(Block::deserialize(&[]).is_err());
    }

    #[test]
    fn test_tampering_invalidates_block() {
        let pow = test_pow();
        let block = Block::new_block(vec![coinbase("a"), coinbase("b")], &[7u8; 32], &pow)
            .unwrap();
        assert!(pow.validate(&block));

        let mut tampered = block.clone();
        tampered.timestamp += 1;
        assert!(!pow.validate(&tampered));

        let mut tampered = block.clone();
        tampered.nonce += 1;
        assert!(!pow.validate(&tampered));

        let mut tampered = block.clone();
        tampered.prev_hash[0] ^= 0x01;
        assert!(!pow.validate(&tampered));

        let mut tampered = block.clone();
        tampered.hash[31] ^= 0x01;
        assert!(!pow.validate(&tampered));

        let mut tampered = block.clone();
        tampered.transactions.pop();
        assert!(!pow.validate(&tampered));
    }

    #[test]
    fn test_reordering_transactions_changes_root_and_hash() {
        let pow = test_pow();
        let (a, b) = (coinbase("a"), coinbase("b"));
        let block = Block::new_block(vec![a, b], &[7u8; 32], &pow).unwrap();

        let mut reordered = block.clone();
        reordered.transactions.swap(0, 1);
        assert_ne!(reordered.merkle_root().unwrap(), block.merkle_root().unwrap());
        assert!(!pow.validate(&reordered));
    }

    #[test]
    fn test_merkle_proof_for_block_transaction() {
        let pow = test_pow();
        let block = Block::new_block(
            vec![coinbase("a"), coinbase("b"), coinbase("c")],
            &[1u8; 32],
            &pow,
        )
        .unwrap();

        let tree = block.merkle_tree().unwrap();
        assert_eq!(tree.root(), block.merkle_root().unwrap().as_slice());
        assert!(tree.proof(2).unwrap().verify(tree.root()));
    }

    #[test]
    #[should_panic(expected = "at least one transaction")]
    fn test_empty_block_panics() {
        let _ = Block::new_block(vec![], &[], &test_pow());
    }
}
