// This file implements the transaction engine - how value moves in my ledger
// Every transaction consumes earlier outputs and creates new ones (UTXO model)
// Inputs are signed one by one against a sighash bound to the output they spend

use crate::error::{LedgerError, Result};
use crate::storage::UtxoSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest,
};
use crate::wallet::hash_pub_key;
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Output index carried by the single input of a coinbase transaction
pub const COINBASE_OUT_INDEX: i64 = -1;

/// Prior transactions keyed by hex-encoded id, used for signing and verification
pub type PriorTransactions = HashMap<String, Transaction>;

// This references one earlier output: "I want to spend output #2 from transaction ABC123"
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    ref_tx_id: Vec<u8>, // id of the transaction holding the output I spend
    ref_out_index: i64, // index of that output, -1 for coinbase
    signature: Vec<u8>, // r ‖ s, empty until signed
    pub_key: Vec<u8>,   // x ‖ y of the spender, or the memo on a coinbase
}

impl TxInput {
    pub fn new(ref_tx_id: &[u8], ref_out_index: i64, pub_key: &[u8]) -> TxInput {
        TxInput {
            ref_tx_id: ref_tx_id.to_vec(),
            ref_out_index,
            signature: vec![],
            pub_key: pub_key.to_vec(),
        }
    }

    pub fn get_ref_tx_id(&self) -> &[u8] {
        self.ref_tx_id.as_slice()
    }

    pub fn get_ref_out_index(&self) -> i64 {
        self.ref_out_index
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    /// True when this input was created by the holder of `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

// This is like a "check" that can be cashed later by whoever owns pub_key_hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TxOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, pub_key_hash: &[u8]) -> Result<TxOutput> {
        if value == 0 {
            return Err(LedgerError::InvalidTransaction(
                "Output value must be positive".to_string(),
            ));
        }
        if pub_key_hash.is_empty() {
            return Err(LedgerError::InvalidTransaction(
                "Output must be locked to a public key hash".to_string(),
            ));
        }

        Ok(TxOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        })
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
}

impl Transaction {
    // The reward transaction: one input that spends nothing, one output to the payee
    pub fn new_coinbase(payee_pub_key_hash: &[u8], memo: &str, reward: u64) -> Result<Transaction> {
        // An empty memo gets a random one so two rewards to the same payee never share an id
        let memo = if memo.is_empty() {
            format!("Reward {}", Uuid::new_v4())
        } else {
            memo.to_string()
        };

        let mut tx = Transaction {
            id: vec![],
            inputs: vec![TxInput::new(&[], COINBASE_OUT_INDEX, memo.as_bytes())],
            outputs: vec![TxOutput::new(reward, payee_pub_key_hash)?],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Build an unsigned transfer of `amount` from the owner of `payer_pub_key`.
    ///
    /// Outputs are gathered greedily in the order the UTXO set yields them
    /// until they cover `amount`; any surplus goes back to the payer as change.
    pub fn new_transfer(
        payer_pub_key: &[u8],
        payee_pub_key_hash: &[u8],
        amount: u64,
        utxo_set: &UtxoSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(LedgerError::InvalidTransaction(
                "Amount must be positive".to_string(),
            ));
        }

        let payer_pub_key_hash = hash_pub_key(payer_pub_key);
        let (accumulated, spendable) = utxo_set.find_spendable(&payer_pub_key_hash, amount);
        if accumulated < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let inputs = spendable
            .iter()
            .map(|out_point| TxInput::new(&out_point.txid, out_point.index, payer_pub_key))
            .collect();

        let mut outputs = vec![TxOutput::new(amount, payee_pub_key_hash)?];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TxOutput::new(change, &payer_pub_key_hash)?);
        }

        let mut tx = Transaction {
            id: vec![],
            inputs,
            outputs,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].ref_tx_id.is_empty()
            && self.inputs[0].ref_out_index == COINBASE_OUT_INDEX
    }

    /// Content hash: SHA-256 of the serialization with the id held empty
    pub fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    // Signatures and public keys cleared on every input
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput::new(&input.ref_tx_id, input.ref_out_index, &[]))
            .collect();
        Transaction {
            id: self.id.clone(),
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    // Every input must point at a transaction I was handed
    fn ensure_prior_transactions(&self, prior: &PriorTransactions) -> Result<()> {
        for input in &self.inputs {
            let txid_hex = HEXLOWER.encode(&input.ref_tx_id);
            if !prior.contains_key(&txid_hex) {
                return Err(LedgerError::MissingPriorTransaction(txid_hex));
            }
        }
        Ok(())
    }

    // The output an input claims, or None when the index is out of range
    fn referenced_output<'a>(
        input: &TxInput,
        prior: &'a PriorTransactions,
    ) -> Option<&'a TxOutput> {
        let prev_tx = prior.get(&HEXLOWER.encode(&input.ref_tx_id))?;
        let index = usize::try_from(input.ref_out_index).ok()?;
        prev_tx.outputs.get(index)
    }

    // The per-input sighash: the trimmed copy with this one input carrying the
    // pub_key_hash of the output it spends
    fn sighash(trimmed: &mut Transaction, idx: usize, spent: &TxOutput) -> Result<Vec<u8>> {
        trimmed.inputs[idx].signature = vec![];
        trimmed.inputs[idx].pub_key = spent.pub_key_hash.clone();
        let digest = trimmed.hash();
        trimmed.inputs[idx].pub_key = vec![];
        digest
    }

    pub fn sign(&mut self, pkcs8: &[u8], prior: &PriorTransactions) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        self.ensure_prior_transactions(prior)?;

        let mut tx_copy = self.trimmed_copy();
        for idx in 0..self.inputs.len() {
            let spent = Self::referenced_output(&self.inputs[idx], prior).ok_or_else(|| {
                LedgerError::InvalidTransaction(format!(
                    "Input {idx} references a non-existent output index {}",
                    self.inputs[idx].ref_out_index
                ))
            })?;

            let digest = Self::sighash(&mut tx_copy, idx, spent)?;
            self.inputs[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, &digest)?;
        }
        Ok(())
    }

    /// Check every input signature against its own sighash.
    ///
    /// Coinbase transactions are always valid here; a reference to an unknown
    /// transaction is an error, while a bad signature or a malformed key is `false`.
    pub fn verify(&self, prior: &PriorTransactions) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        self.ensure_prior_transactions(prior)?;

        let mut tx_copy = self.trimmed_copy();
        for (idx, input) in self.inputs.iter().enumerate() {
            let Some(spent) = Self::referenced_output(input, prior) else {
                log::warn!(
                    "Input {idx} of {} references a non-existent output",
                    HEXLOWER.encode(&self.id)
                );
                return Ok(false);
            };

            let digest = Self::sighash(&mut tx_copy, idx, spent)?;
            if !ecdsa_p256_sha256_sign_verify(&input.pub_key, &input.signature, &digest) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_inputs(&self) -> &[TxInput] {
        self.inputs.as_slice()
    }

    pub fn get_outputs(&self) -> &[TxOutput] {
        self.outputs.as_slice()
    }

    pub fn get_output_value(&self) -> Result<u64> {
        self.outputs.iter().try_fold(0u64, |total, out| {
            total
                .checked_add(out.value)
                .ok_or_else(|| LedgerError::InvalidTransaction("Output value overflow".to_string()))
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", HEXLOWER.encode(&self.id))?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "     Input {i}:")?;
            writeln!(f, "       TXID:      {}", HEXLOWER.encode(&input.ref_tx_id))?;
            writeln!(f, "       Out:       {}", input.ref_out_index)?;
            writeln!(f, "       Signature: {}", HEXLOWER.encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", HEXLOWER.encode(&input.pub_key))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "     Output {i}:")?;
            writeln!(f, "       Value:  {}", output.value)?;
            write!(f, "       Script: {}", HEXLOWER.encode(&output.pub_key_hash))?;
            if i + 1 < self.outputs.len() {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
