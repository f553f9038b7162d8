use crate::core::Block;
use crate::error::{LedgerError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::{debug, info};
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Iteration ceiling used when the configuration does not set one
pub const DEFAULT_MAX_NONCE: u64 = i64::MAX as u64;

/// Difficulty used when the configuration does not set one
pub const DEFAULT_DIFFICULTY_BITS: u32 = 16;

// how many nonces are tried between two looks at the cancel flag
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Fixed-difficulty proof-of-work: a block is admitted when
/// `SHA256(prev_hash ‖ merkle_root ‖ timestamp ‖ difficulty_bits ‖ nonce)`,
/// read as a big-endian integer, is below `2^(256 - difficulty_bits)`.
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    difficulty_bits: u32,
    target: BigInt,
    max_nonce: u64,
    cancel: Arc<AtomicBool>,
}

impl ProofOfWork {
    pub fn new(difficulty_bits: u32) -> Result<ProofOfWork> {
        if !(1..256).contains(&difficulty_bits) {
            return Err(LedgerError::Config(format!(
                "difficulty_bits must be between 1 and 255, got {difficulty_bits}"
            )));
        }

        let mut target = BigInt::from(1);
        target.shl_assign(256 - difficulty_bits);
        Ok(ProofOfWork {
            difficulty_bits,
            target,
            max_nonce: DEFAULT_MAX_NONCE,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_max_nonce(mut self, max_nonce: u64) -> ProofOfWork {
        self.max_nonce = max_nonce;
        self
    }

    pub fn difficulty_bits(&self) -> u32 {
        self.difficulty_bits
    }

    pub fn target(&self) -> &BigInt {
        &self.target
    }

    pub fn max_nonce(&self) -> u64 {
        self.max_nonce
    }

    /// Flag that aborts an in-progress [`ProofOfWork::run`] when set
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn prepare_data(
        prev_hash: &[u8],
        merkle_root: &[u8],
        timestamp: i64,
        bits: u32,
        nonce: u64,
    ) -> Vec<u8> {
        let mut data_bytes = Vec::with_capacity(prev_hash.len() + merkle_root.len() + 24);
        data_bytes.extend(prev_hash);
        data_bytes.extend(merkle_root);
        data_bytes.extend(timestamp.to_be_bytes());
        data_bytes.extend(i64::from(bits).to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    /// Search nonces upward from zero until the header hash is below the target.
    ///
    /// Fails with `MiningExhausted` once `max_nonce` candidates were tried and
    /// with `MiningCancelled` if the cancel flag is raised meanwhile.
    pub fn run(
        &self,
        prev_hash: &[u8],
        merkle_root: &[u8],
        timestamp: i64,
    ) -> Result<(u64, Vec<u8>)> {
        self.cancel.store(false, Ordering::SeqCst);
        debug!(
            "Mining on top of {} with difficulty {}",
            HEXLOWER.encode(prev_hash),
            self.difficulty_bits
        );

        let mut nonce = 0u64;
        while nonce < self.max_nonce {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && self.cancel.load(Ordering::SeqCst) {
                info!("Mining cancelled after {nonce} attempts");
                return Err(LedgerError::MiningCancelled { attempts: nonce });
            }

            let data =
                Self::prepare_data(prev_hash, merkle_root, timestamp, self.difficulty_bits, nonce);
            let hash = sha256_digest(&data);
            if self.meets_target(&hash) {
                debug!("Found nonce {nonce}: {}", HEXLOWER.encode(&hash));
                return Ok((nonce, hash));
            }
            nonce += 1;
        }

        Err(LedgerError::MiningExhausted {
            attempts: self.max_nonce,
        })
    }

    /// Recompute the hash from the block's own fields and nonce.
    ///
    /// True only when it equals the stored hash and is below the target.
    pub fn validate(&self, block: &Block) -> bool {
        let merkle_root = match block.merkle_root() {
            Ok(root) => root,
            Err(_) => return false,
        };
        let data = Self::prepare_data(
            block.get_prev_hash(),
            &merkle_root,
            block.get_timestamp(),
            self.difficulty_bits,
            block.get_nonce(),
        );
        let hash = sha256_digest(&data);

        hash.as_slice() == block.get_hash() && self.meets_target(&hash)
    }
}
