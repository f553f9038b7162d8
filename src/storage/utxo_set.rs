use crate::core::{Block, Transaction, TxOutput};
use crate::error::{LedgerError, Result};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// An output still waiting to be spent, tagged with its position in the
/// transaction that created it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct UnspentOutput {
    index: i64,
    output: TxOutput,
}

impl UnspentOutput {
    pub fn get_index(&self) -> i64 {
        self.index
    }

    pub fn get_output(&self) -> &TxOutput {
        &self.output
    }
}

/// `(transaction id, output index)` pair naming one spendable output
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Vec<u8>,
    pub index: i64,
}

/// Changes a block makes to the UTXO set: the new list of unspent outputs
/// for every transaction it touches. An empty list removes the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoDelta {
    changes: BTreeMap<Vec<u8>, Vec<UnspentOutput>>,
}

impl UtxoDelta {
    pub fn changes(&self) -> impl Iterator<Item = (&[u8], &[UnspentOutput])> {
        self.changes
            .iter()
            .map(|(txid, outs)| (txid.as_slice(), outs.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Unspent outputs keyed by the raw id of the transaction that created them.
///
/// The `chainstate` tree uses the same raw bytes as keys; ids are only
/// hex-encoded for display and for lookups of prior transactions.
///
/// Entries never hold an empty list; a fully spent transaction is removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    entries: BTreeMap<Vec<u8>, Vec<UnspentOutput>>,
}

impl UtxoSet {
    pub fn new() -> UtxoSet {
        UtxoSet::default()
    }

    /// Rebuild the set from a newest-first walk of the chain.
    ///
    /// Inputs seen closer to the tip mark outputs as spent before the walk
    /// reaches the transaction that created them. Transactions inside a block
    /// are visited last-to-first for the same reason.
    pub fn reindex<I>(blocks: I) -> Result<UtxoSet>
    where
        I: IntoIterator<Item = Result<Block>>,
    {
        let mut spent: HashMap<Vec<u8>, Vec<i64>> = HashMap::new();
        let mut entries = BTreeMap::new();

        for block in blocks {
            let block = block?;
            for tx in block.get_transactions().iter().rev() {
                let spent_here = spent.get(tx.get_id());
                let unspent: Vec<UnspentOutput> = tx
                    .get_outputs()
                    .iter()
                    .enumerate()
                    .map(|(idx, out)| UnspentOutput {
                        index: idx as i64,
                        output: out.clone(),
                    })
                    .filter(|utxo| !spent_here.is_some_and(|s| s.contains(&utxo.index)))
                    .collect();
                if !unspent.is_empty() {
                    entries.insert(tx.get_id().to_vec(), unspent);
                }

                if tx.is_coinbase() {
                    continue;
                }
                for input in tx.get_inputs() {
                    spent
                        .entry(input.get_ref_tx_id().to_vec())
                        .or_default()
                        .push(input.get_ref_out_index());
                }
            }
        }

        Ok(UtxoSet { entries })
    }

    /// Work out what `transactions`, applied in order, would do to the set.
    ///
    /// Nothing is mutated. Every input must name an output that is unspent at
    /// that point, which also rejects two inputs of one block claiming the
    /// same output.
    pub fn delta_for(&self, transactions: &[Transaction]) -> Result<UtxoDelta> {
        let mut working: BTreeMap<Vec<u8>, Vec<UnspentOutput>> = BTreeMap::new();

        for tx in transactions {
            if !tx.is_coinbase() {
                for input in tx.get_inputs() {
                    let txid = input.get_ref_tx_id();
                    let outs = working
                        .entry(txid.to_vec())
                        .or_insert_with(|| self.entries.get(txid).cloned().unwrap_or_default());
                    let position = outs
                        .iter()
                        .position(|utxo| utxo.index == input.get_ref_out_index())
                        .ok_or_else(|| {
                            LedgerError::InvalidTransaction(format!(
                                "Transaction {} spends {}:{} which is not unspent",
                                HEXLOWER.encode(tx.get_id()),
                                HEXLOWER.encode(txid),
                                input.get_ref_out_index()
                            ))
                        })?;
                    outs.remove(position);
                }
            }

            let already_unspent = self.entries.contains_key(tx.get_id())
                || working.get(tx.get_id()).is_some_and(|outs| !outs.is_empty());
            if already_unspent {
                return Err(LedgerError::InvalidTransaction(format!(
                    "Duplicate transaction id {}",
                    HEXLOWER.encode(tx.get_id())
                )));
            }
            let created = tx
                .get_outputs()
                .iter()
                .enumerate()
                .map(|(idx, out)| UnspentOutput {
                    index: idx as i64,
                    output: out.clone(),
                })
                .collect();
            working.insert(tx.get_id().to_vec(), created);
        }

        Ok(UtxoDelta { changes: working })
    }

    pub fn apply_delta(&mut self, delta: &UtxoDelta) {
        for (txid, outs) in &delta.changes {
            if outs.is_empty() {
                self.entries.remove(txid);
            } else {
                self.entries.insert(txid.clone(), outs.clone());
            }
        }
    }

    /// Incremental maintenance after `block` has been appended
    pub fn apply_block(&mut self, block: &Block) -> Result<()> {
        let delta = self.delta_for(block.get_transactions())?;
        self.apply_delta(&delta);
        Ok(())
    }

    /// Collect outputs owned by `pub_key_hash` until they cover `amount`.
    ///
    /// Outputs come in index order (transaction id, then output index); the
    /// returned total is below `amount` when the owner cannot afford it.
    pub fn find_spendable(&self, pub_key_hash: &[u8], amount: u64) -> (u64, Vec<OutPoint>) {
        let mut accumulated = 0u64;
        let mut spendable = vec![];

        'outer: for (txid, outs) in &self.entries {
            for utxo in outs {
                if accumulated >= amount {
                    break 'outer;
                }
                if utxo.output.is_locked_with_key(pub_key_hash) {
                    accumulated = accumulated.saturating_add(utxo.output.get_value());
                    spendable.push(OutPoint {
                        txid: txid.clone(),
                        index: utxo.index,
                    });
                }
            }
        }
        (accumulated, spendable)
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Vec<TxOutput> {
        self.entries
            .values()
            .flatten()
            .filter(|utxo| utxo.output.is_locked_with_key(pub_key_hash))
            .map(|utxo| utxo.output.clone())
            .collect()
    }

    pub fn balance(&self, pub_key_hash: &[u8]) -> u64 {
        self.find_utxo(pub_key_hash)
            .iter()
            .map(TxOutput::get_value)
            .fold(0u64, u64::saturating_add)
    }

    pub fn get(&self, txid: &[u8]) -> Option<&[UnspentOutput]> {
        self.entries.get(txid).map(Vec::as_slice)
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> usize {
        self.entries.len()
    }

    pub fn total_value(&self) -> u64 {
        self.entries
            .values()
            .flatten()
            .map(|utxo| utxo.output.get_value())
            .fold(0u64, u64::saturating_add)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&[u8], &[UnspentOutput])> {
        self.entries
            .iter()
            .map(|(txid, outs)| (txid.as_slice(), outs.as_slice()))
    }
}

impl FromIterator<(Vec<u8>, Vec<UnspentOutput>)> for UtxoSet {
    fn from_iter<T: IntoIterator<Item = (Vec<u8>, Vec<UnspentOutput>)>>(iter: T) -> Self {
        UtxoSet {
            entries: iter.into_iter().filter(|(_, outs)| !outs.is_empty()).collect(),
        }
    }
}
