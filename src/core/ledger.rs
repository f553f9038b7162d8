// The ledger controller - the only thing allowed to extend the chain
// It owns the cached tip hash and UTXO set; the chain store is the source of truth on restart
// Mining is serialized by one mutex, readers only ever see fully applied blocks

use crate::core::proof_of_work::{DEFAULT_DIFFICULTY_BITS, DEFAULT_MAX_NONCE};
use crate::core::{Block, PriorTransactions, ProofOfWork, Transaction, TxOutput};
use crate::error::{LedgerError, Result};
use crate::storage::{ChainStore, OutPoint, UtxoSet};
use crate::wallet::Wallet;
use data_encoding::HEXLOWER;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard};

/// Memo carried by the coinbase of every genesis block
pub const GENESIS_MEMO: &str = "Genesis block";

/// Units minted by the genesis coinbase unless configured otherwise
pub const DEFAULT_MINING_REWARD: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub difficulty_bits: u32,
    pub max_nonce: u64,
    pub mining_reward: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            difficulty_bits: DEFAULT_DIFFICULTY_BITS,
            max_nonce: DEFAULT_MAX_NONCE,
            mining_reward: DEFAULT_MINING_REWARD,
        }
    }
}

pub struct Ledger {
    store: ChainStore,
    pow: ProofOfWork,
    params: ChainParams,
    tip_hash: RwLock<Vec<u8>>,
    utxo: RwLock<UtxoSet>,
    // held for the whole of add_block and reindex_utxo
    mining: Mutex<()>,
}

impl Ledger {
    /// Mine a genesis block paying `params.mining_reward` to `genesis_pub_key_hash`
    /// into an empty store.
    pub fn create(
        store: ChainStore,
        params: ChainParams,
        genesis_pub_key_hash: &[u8],
    ) -> Result<Ledger> {
        if store.has_chain()? {
            return Err(LedgerError::ChainAlreadyExists);
        }
        if params.mining_reward == 0 {
            return Err(LedgerError::Config(
                "mining_reward must be positive".to_string(),
            ));
        }

        let pow = ProofOfWork::new(params.difficulty_bits)?.with_max_nonce(params.max_nonce);
        let coinbase =
            Transaction::new_coinbase(genesis_pub_key_hash, GENESIS_MEMO, params.mining_reward)?;
        let genesis = Block::genesis(coinbase, &pow)?;

        let mut utxo = UtxoSet::new();
        let delta = utxo.delta_for(genesis.get_transactions())?;
        store.set_difficulty_bits(params.difficulty_bits)?;
        store.commit_block(&genesis, &delta)?;
        utxo.apply_delta(&delta);

        info!("Created blockchain with genesis block {}", genesis.get_hash_hex());
        Ok(Ledger {
            store,
            pow,
            params,
            tip_hash: RwLock::new(genesis.get_hash().to_vec()),
            utxo: RwLock::new(utxo),
            mining: Mutex::new(()),
        })
    }

    /// Open the chain already held by `store`.
    ///
    /// The difficulty stored with the chain overrides `params.difficulty_bits`.
    /// The tip block is validated, and the UTXO index is rebuilt from the
    /// chain when the store has none.
    pub fn open(store: ChainStore, mut params: ChainParams) -> Result<Ledger> {
        let tip = store.get_tip()?.ok_or(LedgerError::ChainNotFound)?;

        if let Some(stored_bits) = store.difficulty_bits()? {
            if stored_bits != params.difficulty_bits {
                warn!(
                    "Chain was created with difficulty {stored_bits}, ignoring configured {}",
                    params.difficulty_bits
                );
                params.difficulty_bits = stored_bits;
            }
        }
        let pow = ProofOfWork::new(params.difficulty_bits)?.with_max_nonce(params.max_nonce);

        let tip_block = Self::load_checked(&store, &pow, &tip)?;
        info!("Opened blockchain at tip {}", tip_block.get_hash_hex());

        let mut utxo = store.load_utxo()?;
        if utxo.is_empty() {
            warn!("UTXO index is empty, rebuilding from the chain");
            let blocks = ChainIterator::new(store.clone(), pow.clone(), tip.clone());
            utxo = UtxoSet::reindex(blocks)?;
            store.replace_utxo(&utxo)?;
        }

        Ok(Ledger {
            store,
            pow,
            params,
            tip_hash: RwLock::new(tip),
            utxo: RwLock::new(utxo),
            mining: Mutex::new(()),
        })
    }

    // Fetch a block and make sure it is the block its key promises
    fn load_checked(store: &ChainStore, pow: &ProofOfWork, block_hash: &[u8]) -> Result<Block> {
        let block = store
            .get_block(block_hash)?
            .ok_or_else(|| LedgerError::MalformedBlock {
                hash: HEXLOWER.encode(block_hash),
                reason: "block is missing from the store".to_string(),
            })?;
        Self::check_block(pow, &block, block_hash)?;
        Ok(block)
    }

    fn check_block(pow: &ProofOfWork, block: &Block, expected_hash: &[u8]) -> Result<()> {
        if block.get_hash() != expected_hash {
            return Err(LedgerError::MalformedBlock {
                hash: HEXLOWER.encode(expected_hash),
                reason: format!("stored block carries hash {}", block.get_hash_hex()),
            });
        }
        if !pow.validate(block) {
            return Err(LedgerError::MalformedBlock {
                hash: block.get_hash_hex(),
                reason: "proof-of-work does not validate".to_string(),
            });
        }
        Ok(())
    }

    // Writers replace or update the guarded values in one step, so a poisoned
    // lock still holds a consistent value.
    fn read_utxo(&self) -> RwLockReadGuard<'_, UtxoSet> {
        self.utxo.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn difficulty_bits(&self) -> u32 {
        self.pow.difficulty_bits()
    }

    pub fn pow(&self) -> &ProofOfWork {
        &self.pow
    }

    /// Walk the chain from the tip back to genesis
    pub fn iter(&self) -> ChainIterator {
        ChainIterator::new(self.store.clone(), self.pow.clone(), self.tip_hash())
    }

    pub fn block_count(&self) -> Result<usize> {
        self.iter().try_fold(0, |count, block| block.map(|_| count + 1))
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        self.store.get_block(block_hash)
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        for block in self.iter() {
            let block = block?;
            if let Some(tx) = block
                .get_transactions()
                .iter()
                .find(|tx| tx.get_id() == txid)
            {
                return Ok(Some(tx.clone()));
            }
        }
        Ok(None)
    }

    /// Every transaction the inputs of `tx` refer to, looked up on the chain
    pub fn prior_transactions(&self, tx: &Transaction) -> Result<PriorTransactions> {
        self.prior_transactions_with(tx, &[])
    }

    // Like prior_transactions, but `pending` (earlier transactions of the block
    // being assembled) are searched before the chain
    fn prior_transactions_with(
        &self,
        tx: &Transaction,
        pending: &[Transaction],
    ) -> Result<PriorTransactions> {
        let mut prior = PriorTransactions::new();
        if tx.is_coinbase() {
            return Ok(prior);
        }

        let mut wanted: HashSet<Vec<u8>> = HashSet::new();
        for input in tx.get_inputs() {
            let txid = input.get_ref_tx_id();
            match pending.iter().find(|candidate| candidate.get_id() == txid) {
                Some(found) => {
                    prior.insert(HEXLOWER.encode(txid), found.clone());
                }
                None => {
                    wanted.insert(txid.to_vec());
                }
            }
        }

        if !wanted.is_empty() {
            for block in self.iter() {
                let block = block?;
                for candidate in block.get_transactions() {
                    if wanted.remove(candidate.get_id()) {
                        prior.insert(HEXLOWER.encode(candidate.get_id()), candidate.clone());
                    }
                }
                if wanted.is_empty() {
                    break;
                }
            }
        }

        match wanted.iter().next() {
            Some(missing) => Err(LedgerError::MissingPriorTransaction(HEXLOWER.encode(missing))),
            None => Ok(prior),
        }
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prior = self.prior_transactions(tx)?;
        tx.sign(pkcs8, &prior)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        let prior = self.prior_transactions(tx)?;
        tx.verify(&prior)
    }

    // Signatures verify and inputs carry exactly the value the outputs hand out
    fn admit(&self, tx: &Transaction, pending: &[Transaction]) -> Result<()> {
        let txid = HEXLOWER.encode(tx.get_id());
        if tx.is_coinbase() {
            return Err(LedgerError::InvalidTransaction(format!(
                "Coinbase transaction {txid} is only allowed in the genesis block"
            )));
        }
        if tx.get_inputs().is_empty() || tx.get_outputs().is_empty() {
            return Err(LedgerError::InvalidTransaction(format!(
                "Transaction {txid} needs at least one input and one output"
            )));
        }

        let prior = self.prior_transactions_with(tx, pending)?;
        if !tx.verify(&prior)? {
            warn!("Rejecting transaction {txid}: signature check failed");
            return Err(LedgerError::InvalidSignature(txid));
        }

        let mut input_value = 0u64;
        for input in tx.get_inputs() {
            let spent = prior
                .get(&HEXLOWER.encode(input.get_ref_tx_id()))
                .and_then(|prev| {
                    usize::try_from(input.get_ref_out_index())
                        .ok()
                        .and_then(|idx| prev.get_outputs().get(idx))
                })
                .map(TxOutput::get_value)
                .ok_or_else(|| {
                    LedgerError::InvalidTransaction(format!(
                        "Transaction {txid} references a non-existent output"
                    ))
                })?;
            input_value = input_value.checked_add(spent).ok_or_else(|| {
                LedgerError::InvalidTransaction(format!("Input value overflow in {txid}"))
            })?;
        }

        let output_value = tx.get_output_value()?;
        if input_value != output_value {
            warn!("Rejecting transaction {txid}: inputs {input_value} != outputs {output_value}");
            return Err(LedgerError::InvalidTransaction(format!(
                "Transaction {txid} spends {input_value} but creates {output_value}"
            )));
        }
        Ok(())
    }

    /// Validate `transactions`, mine them on top of the tip and append the block.
    ///
    /// The block, the tip pointer and the UTXO changes are committed together;
    /// on any error the chain is left as it was.
    pub fn add_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        if transactions.is_empty() {
            return Err(LedgerError::InvalidTransaction(
                "A block needs at least one transaction".to_string(),
            ));
        }
        let _mining = self.mining.lock().unwrap_or_else(PoisonError::into_inner);

        for (idx, tx) in transactions.iter().enumerate() {
            self.admit(tx, &transactions[..idx])?;
        }

        // refuse to extend past a damaged tip
        let tip = self.tip_hash();
        Self::load_checked(&self.store, &self.pow, &tip)?;

        let delta = self.read_utxo().delta_for(&transactions)?;
        let block = Block::new_block(transactions, &tip, &self.pow)?;
        self.store.commit_block(&block, &delta)?;

        {
            let mut utxo = self.utxo.write().unwrap_or_else(PoisonError::into_inner);
            let mut tip_hash = self.tip_hash.write().unwrap_or_else(PoisonError::into_inner);
            utxo.apply_delta(&delta);
            *tip_hash = block.get_hash().to_vec();
        }

        info!(
            "Added block {} with {} transaction(s)",
            block.get_hash_hex(),
            block.get_transactions().len()
        );
        Ok(block)
    }

    /// Build, sign and mine a transfer of `amount` from `from` to `to_pub_key_hash`
    pub fn transfer(&self, from: &Wallet, to_pub_key_hash: &[u8], amount: u64) -> Result<Block> {
        let mut tx = {
            let utxo = self.read_utxo();
            Transaction::new_transfer(from.public_key(), to_pub_key_hash, amount, &utxo)?
        };
        self.sign_transaction(&mut tx, from.pkcs8())?;
        self.add_block(vec![tx])
    }

    pub fn balance(&self, pub_key_hash: &[u8]) -> u64 {
        self.read_utxo().balance(pub_key_hash)
    }

    pub fn find_spendable(&self, pub_key_hash: &[u8], amount: u64) -> (u64, Vec<OutPoint>) {
        self.read_utxo().find_spendable(pub_key_hash, amount)
    }

    pub fn unspent_outputs(&self, pub_key_hash: &[u8]) -> Vec<TxOutput> {
        self.read_utxo().find_utxo(pub_key_hash)
    }

    /// Copy of the current UTXO index
    pub fn utxo_snapshot(&self) -> UtxoSet {
        self.read_utxo().clone()
    }

    /// Rebuild the UTXO index from the chain and store it; returns the number
    /// of transactions that still have unspent outputs
    pub fn reindex_utxo(&self) -> Result<usize> {
        let _mining = self.mining.lock().unwrap_or_else(PoisonError::into_inner);

        let rebuilt = UtxoSet::reindex(self.iter())?;
        self.store.replace_utxo(&rebuilt)?;
        let count = rebuilt.count_transactions();
        *self.utxo.write().unwrap_or_else(PoisonError::into_inner) = rebuilt;

        info!("Reindexed UTXO set: {count} transaction(s) with unspent outputs");
        Ok(count)
    }

    /// Check proof-of-work, stored hash and back-links of every block.
    ///
    /// Returns the number of blocks, or the first `MalformedBlock` found.
    pub fn verify_chain(&self) -> Result<usize> {
        self.block_count()
    }

    /// Abort the mining attempt currently in progress, if any
    pub fn cancel_mining(&self) {
        self.pow.cancel_handle().store(true, Ordering::SeqCst);
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}

/// Newest-first walk over the stored chain, ending after the genesis block.
///
/// Every block is checked against the key it was read from and against the
/// proof-of-work before its back-link is followed. The first bad record is
/// yielded as `MalformedBlock` and ends the walk.
pub struct ChainIterator {
    store: ChainStore,
    pow: ProofOfWork,
    current_hash: Option<Vec<u8>>,
}

impl ChainIterator {
    fn new(store: ChainStore, pow: ProofOfWork, tip_hash: Vec<u8>) -> ChainIterator {
        ChainIterator {
            store,
            pow,
            current_hash: Some(tip_hash),
        }
    }
}

impl Iterator for ChainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;
        match self.store.get_block(&hash) {
            Ok(Some(block)) => {
                if let Err(e) = Ledger::check_block(&self.pow, &block, &hash) {
                    return Some(Err(e));
                }
                if !block.is_genesis() {
                    self.current_hash = Some(block.get_prev_hash().to_vec());
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(LedgerError::MalformedBlock {
                hash: HEXLOWER.encode(&hash),
                reason: "block is missing from the store".to_string(),
            })),
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_ledger, test_params, test_wallet, TEST_DIFFICULTY_BITS};

    #[test]
    fn test_create_funds_genesis_payee() {
        let (ledger, alice) = test_ledger();
        assert_eq!(ledger.balance(&alice.pub_key_hash()), DEFAULT_MINING_REWARD);
        assert_eq!(ledger.block_count().unwrap(), 1);
        assert_eq!(ledger.difficulty_bits(), TEST_DIFFICULTY_BITS);

        let genesis = ledger.iter().next().unwrap().unwrap();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.get_hash(), ledger.tip_hash().as_slice());
    }

    #[test]
    fn test_create_twice_fails() {
        let store = ChainStore::temporary().unwrap();
        let alice = test_wallet();
        let ledger = Ledger::create(store.clone(), test_params(), &alice.pub_key_hash()).unwrap();
        drop(ledger);
        assert!(matches!(
            Ledger::create(store, test_params(), &alice.pub_key_hash()),
            Err(LedgerError::ChainAlreadyExists)
        ));
    }

    #[test]
    fn test_open_without_chain() {
        let store = ChainStore::temporary().unwrap();
        assert!(matches!(
            Ledger::open(store, test_params()),
            Err(LedgerError::ChainNotFound)
        ));
    }

    #[test]
    fn test_transfer_moves_value() {
        let (ledger, alice) = test_ledger();
        let bob = test_wallet();

        let block = ledger.transfer(&alice, &bob.pub_key_hash(), 20).unwrap();
        assert_eq!(block.get_prev_hash().len(), 32);
        assert_eq!(ledger.tip_hash(), block.get_hash().to_vec());
        assert_eq!(ledger.balance(&alice.pub_key_hash()), 30);
        assert_eq!(ledger.balance(&bob.pub_key_hash()), 20);
        assert_eq!(ledger.block_count().unwrap(), 2);
        assert_eq!(ledger.verify_chain().unwrap(), 2);
    }

    #[test]
    fn test_insufficient_funds_leaves_chain_unchanged() {
        let (ledger, _alice) = test_ledger();
        let bob = test_wallet();
        let tip = ledger.tip_hash();

        let result = ledger.transfer(&bob, &bob.pub_key_hash(), 1000);
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds {
                required: 1000,
                available: 0
            })
        ));
        assert_eq!(ledger.tip_hash(), tip);
    }

    #[test]
    fn test_unsigned_transaction_is_rejected() {
        let (ledger, alice) = test_ledger();
        let bob = test_wallet();

        let tx = Transaction::new_transfer(
            alice.public_key(),
            &bob.pub_key_hash(),
            10,
            &ledger.utxo_snapshot(),
        )
        .unwrap();
        assert!(matches!(
            ledger.add_block(vec![tx]),
            Err(LedgerError::InvalidSignature(_))
        ));
        assert_eq!(ledger.block_count().unwrap(), 1);
    }

    #[test]
    fn test_foreign_signature_is_rejected() {
        let (ledger, alice) = test_ledger();
        let mallory = test_wallet();

        let mut tx = Transaction::new_transfer(
            alice.public_key(),
            &mallory.pub_key_hash(),
            50,
            &ledger.utxo_snapshot(),
        )
        .unwrap();
        ledger.sign_transaction(&mut tx, mallory.pkcs8()).unwrap();
        assert!(!ledger.verify_transaction(&tx).unwrap());
        assert!(matches!(
            ledger.add_block(vec![tx]),
            Err(LedgerError::InvalidSignature(_))
        ));
        assert_eq!(ledger.balance(&alice.pub_key_hash()), 50);
    }

    #[test]
    fn test_coinbase_after_genesis_is_rejected() {
        let (ledger, alice) = test_ledger();
        let coinbase = Transaction::new_coinbase(&alice.pub_key_hash(), "", 50).unwrap();
        assert!(matches!(
            ledger.add_block(vec![coinbase]),
            Err(LedgerError::InvalidTransaction(_))
        ));
        assert!(matches!(
            ledger.add_block(vec![]),
            Err(LedgerError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_double_spend_across_blocks_is_rejected() {
        let (ledger, alice) = test_ledger();
        let bob = test_wallet();

        let mut tx = Transaction::new_transfer(
            alice.public_key(),
            &bob.pub_key_hash(),
            50,
            &ledger.utxo_snapshot(),
        )
        .unwrap();
        ledger.sign_transaction(&mut tx, alice.pkcs8()).unwrap();
        ledger.add_block(vec![tx.clone()]).unwrap();

        assert!(matches!(
            ledger.add_block(vec![tx]),
            Err(LedgerError::InvalidTransaction(_))
        ));
        assert_eq!(ledger.balance(&bob.pub_key_hash()), 50);
    }

    #[test]
    fn test_chained_spend_inside_one_block() {
        let (ledger, alice) = test_ledger();
        let bob = test_wallet();
        let carol = test_wallet();

        let mut to_bob = Transaction::new_transfer(
            alice.public_key(),
            &bob.pub_key_hash(),
            20,
            &ledger.utxo_snapshot(),
        )
        .unwrap();
        ledger.sign_transaction(&mut to_bob, alice.pkcs8()).unwrap();

        let mut preview = ledger.utxo_snapshot();
        let delta = preview.delta_for(std::slice::from_ref(&to_bob)).unwrap();
        preview.apply_delta(&delta);
        let mut to_carol =
            Transaction::new_transfer(bob.public_key(), &carol.pub_key_hash(), 5, &preview)
                .unwrap();
        let prior: PriorTransactions = [(HEXLOWER.encode(to_bob.get_id()), to_bob.clone())]
            .into_iter()
            .collect();
        to_carol.sign(bob.pkcs8(), &prior).unwrap();

        ledger.add_block(vec![to_bob, to_carol]).unwrap();
        assert_eq!(ledger.balance(&alice.pub_key_hash()), 30);
        assert_eq!(ledger.balance(&bob.pub_key_hash()), 15);
        assert_eq!(ledger.balance(&carol.pub_key_hash()), 5);
    }

    #[test]
    fn test_reindex_matches_live_index() {
        let (ledger, alice) = test_ledger();
        let bob = test_wallet();
        ledger.transfer(&alice, &bob.pub_key_hash(), 20).unwrap();
        ledger.transfer(&bob, &alice.pub_key_hash(), 5).unwrap();

        let live = ledger.utxo_snapshot();
        let count = ledger.reindex_utxo().unwrap();
        assert_eq!(count, live.count_transactions());
        assert_eq!(ledger.utxo_snapshot(), live);
    }

    #[test]
    fn test_find_transaction_and_prior_lookup() {
        let (ledger, alice) = test_ledger();
        let bob = test_wallet();
        let block = ledger.transfer(&alice, &bob.pub_key_hash(), 20).unwrap();
        let tx = &block.get_transactions()[0];

        assert_eq!(ledger.find_transaction(tx.get_id()).unwrap().as_ref(), Some(tx));
        assert_eq!(ledger.find_transaction(b"nope").unwrap(), None);

        let prior = ledger.prior_transactions(tx).unwrap();
        assert_eq!(prior.len(), 1);
        assert!(ledger.verify_transaction(tx).unwrap());
    }

    #[test]
    fn test_cancel_before_mining_does_not_block_later_blocks() {
        let (ledger, alice) = test_ledger();
        let bob = test_wallet();
        ledger.cancel_mining();
        // the flag is cleared when a new attempt starts
        assert!(ledger.transfer(&alice, &bob.pub_key_hash(), 1).is_ok());
    }
}
