// Durable storage for the chain: blocks, the tip pointer and the UTXO index
// all live in one sled database, one tree per key space

use crate::core::Block;
use crate::error::{LedgerError, Result};
use crate::storage::{UnspentOutput, UtxoDelta, UtxoSet};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{debug, info};
use sled::transaction::ConflictableTransactionResult;
use sled::{Batch, Db, Transactional, Tree};
use std::path::Path;

const BLOCKS_TREE: &str = "blocks"; // block hash -> versioned block, plus the tip key
const UTXO_TREE: &str = "chainstate"; // transaction id -> unspent outputs
const META_TREE: &str = "meta";

/// Key of the tip pointer inside the blocks tree
pub const TIP_BLOCK_HASH_KEY: &str = "lh";
const DIFFICULTY_KEY: &str = "difficulty_bits";

#[derive(Clone)]
pub struct ChainStore {
    db: Db,
    blocks: Tree,
    chainstate: Tree,
    meta: Tree,
}

impl ChainStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ChainStore> {
        let path = path.as_ref();
        info!("Opening chain store at {}", path.display());
        let db = sled::open(path).map_err(|e| {
            LedgerError::Persistence(format!("Failed to open database at {}: {e}", path.display()))
        })?;
        Self::from_db(db)
    }

    /// In-memory store that disappears when dropped
    pub fn temporary() -> Result<ChainStore> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<ChainStore> {
        Ok(ChainStore {
            blocks: db.open_tree(BLOCKS_TREE)?,
            chainstate: db.open_tree(UTXO_TREE)?,
            meta: db.open_tree(META_TREE)?,
            db,
        })
    }

    pub fn get_tip(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.blocks.get(TIP_BLOCK_HASH_KEY)?.map(|tip| tip.to_vec()))
    }

    pub fn has_chain(&self) -> Result<bool> {
        Ok(self.blocks.contains_key(TIP_BLOCK_HASH_KEY)?)
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        match self.blocks.get(block_hash)? {
            Some(bytes) => Ok(Some(Block::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store `block`, point the tip at it and apply `delta` to the UTXO tree
    /// in one transaction; after a crash either all of it is visible or none.
    pub fn commit_block(&self, block: &Block, delta: &UtxoDelta) -> Result<()> {
        let block_bytes = block.serialize()?;
        let mut utxo_writes = Vec::new();
        for (txid, outs) in delta.changes() {
            let value = if outs.is_empty() {
                None
            } else {
                Some(serialize(&outs.to_vec())?)
            };
            utxo_writes.push((txid.to_vec(), value));
        }

        (&self.blocks, &self.chainstate).transaction(
            |(blocks, chainstate)| -> ConflictableTransactionResult<(), LedgerError> {
                blocks.insert(block.get_hash(), block_bytes.as_slice())?;
                blocks.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                for (txid, value) in &utxo_writes {
                    match value {
                        Some(outs) => chainstate.insert(txid.as_slice(), outs.as_slice())?,
                        None => chainstate.remove(txid.as_slice())?,
                    };
                }
                Ok(())
            },
        )?;
        self.db.flush()?;

        debug!(
            "Committed block {} with {} UTXO change(s)",
            HEXLOWER.encode(block.get_hash()),
            utxo_writes.len()
        );
        Ok(())
    }

    pub fn load_utxo(&self) -> Result<UtxoSet> {
        self.chainstate
            .iter()
            .map(|item| -> Result<(Vec<u8>, Vec<UnspentOutput>)> {
                let (txid, bytes) = item?;
                let outs: Vec<UnspentOutput> = deserialize(&bytes)?;
                Ok((txid.to_vec(), outs))
            })
            .collect()
    }

    /// Swap the stored UTXO index for `utxo_set` in a single batch
    pub fn replace_utxo(&self, utxo_set: &UtxoSet) -> Result<()> {
        let mut batch = Batch::default();
        for key in self.chainstate.iter().keys() {
            batch.remove(key?);
        }
        for (txid, outs) in utxo_set.entries() {
            batch.insert(txid, serialize(&outs.to_vec())?);
        }
        self.chainstate.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn difficulty_bits(&self) -> Result<Option<u32>> {
        match self.meta.get(DIFFICULTY_KEY)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes[..].try_into().map_err(|_| {
                    LedgerError::Persistence(format!(
                        "Stored difficulty has {} bytes, expected 4",
                        bytes.len()
                    ))
                })?;
                Ok(Some(u32::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    pub fn set_difficulty_bits(&self, difficulty_bits: u32) -> Result<()> {
        self.meta
            .insert(DIFFICULTY_KEY, difficulty_bits.to_be_bytes().to_vec())?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
