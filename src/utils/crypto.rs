use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED,
    ECDSA_P256_SHA256_FIXED_SIGNING,
};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{LedgerError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Byte length of one P-256 scalar or coordinate.
pub const P256_COORDINATE_LEN: usize = 32;

/// `x ‖ y` public keys and `r ‖ s` signatures are both two fixed-size halves.
pub const P256_PAIR_LEN: usize = 2 * P256_COORDINATE_LEN;

// SEC1 tag for an uncompressed point, which is what ring expects
const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| LedgerError::Crypto(format!("System time error: {e}")))?
        .as_millis();

    i64::try_from(duration).map_err(|_| LedgerError::Crypto("Timestamp overflow".to_string()))
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| LedgerError::InvalidAddress(format!("Invalid base58 encoding: {e}")))
}

/// Generates a fresh P-256 key pair and returns it as PKCS#8 bytes.
pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| LedgerError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?
        .as_ref()
        .to_vec();
    Ok(pkcs8)
}

/// Returns the raw `x ‖ y` public key (64 bytes) for a PKCS#8 private key.
pub fn public_key_from_pkcs8(pkcs8: &[u8]) -> Result<Vec<u8>> {
    let key_pair = load_key_pair(pkcs8)?;
    let point = key_pair.public_key().as_ref();
    match point.split_first() {
        Some((&UNCOMPRESSED_POINT_TAG, coordinates)) if coordinates.len() == P256_PAIR_LEN => {
            Ok(coordinates.to_vec())
        }
        _ => Err(LedgerError::Crypto(
            "Unexpected public key encoding".to_string(),
        )),
    }
}

/// Signs `message` and returns the fixed `r ‖ s` encoding (32 bytes each).
///
/// The algorithm hashes `message` with SHA-256 before signing, so a sighash
/// passed here is signed as `SHA256(sighash)`.
pub fn ecdsa_p256_sha256_sign_digest(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = load_key_pair(pkcs8)?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| LedgerError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    Ok(signature)
}

/// Verifies an `r ‖ s` signature against an `x ‖ y` public key.
///
/// `message` is hashed with SHA-256 first, matching the signing side.
///
/// Both byte strings are split as two explicit 32-byte halves; any other
/// length is a verification failure rather than an error.
pub fn ecdsa_p256_sha256_sign_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    if public_key.len() != P256_PAIR_LEN || signature.len() != P256_PAIR_LEN {
        return false;
    }
    let (x, y) = public_key.split_at(P256_COORDINATE_LEN);

    let mut point = Vec::with_capacity(1 + P256_PAIR_LEN);
    point.push(UNCOMPRESSED_POINT_TAG);
    point.extend_from_slice(x);
    point.extend_from_slice(y);

    let peer_public_key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, point);
    peer_public_key.verify(message, signature).is_ok()
}

fn load_key_pair(pkcs8: &[u8]) -> Result<EcdsaKeyPair> {
    let rng = SystemRandom::new();
    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| LedgerError::Crypto(format!("Failed to create key pair from PKCS8: {e}")))
}
