use crate::error::{LedgerError, Result};
use crate::utils::{
    base58_decode, base58_encode, new_key_pair, public_key_from_pkcs8, ripemd160_digest,
    sha256_digest,
};
use serde::{Deserialize, Serialize};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;

/// A P-256 key pair: the PKCS#8 document used for signing and the raw
/// `x ‖ y` public key that goes into transaction inputs
#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = new_key_pair()?;
        let public_key = public_key_from_pkcs8(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    /// Base58Check address: version ‖ pub_key_hash ‖ checksum
    pub fn address(&self) -> String {
        convert_address(&self.pub_key_hash())
    }

    pub fn pub_key_hash(&self) -> Vec<u8> {
        hash_pub_key(&self.public_key)
    }

    pub fn public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }
}

// keep the private key out of logs
impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let pub_key_sha256 = sha256_digest(pub_key);
    ripemd160_digest(pub_key_sha256.as_slice())
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = sha256_digest(payload);
    let second_sha = sha256_digest(first_sha.as_slice());
    second_sha[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

pub fn validate_address(address: &str) -> bool {
    let payload = match base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };
    // version byte, at least one hash byte, checksum
    if payload.len() < ADDRESS_CHECK_SUM_LEN + 2 {
        return false;
    }

    let (body, actual_checksum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    checksum(body).as_slice() == actual_checksum
}

pub fn convert_address(pub_key_hash: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![VERSION];
    payload.extend(pub_key_hash);
    let checksum = checksum(payload.as_slice());
    payload.extend(checksum.as_slice());
    base58_encode(payload.as_slice())
}

/// Recover the public-key hash an address commits to
pub fn address_to_pub_key_hash(address: &str) -> Result<Vec<u8>> {
    if !validate_address(address) {
        return Err(LedgerError::InvalidAddress(address.to_string()));
    }
    let payload = base58_decode(address)?;
    Ok(payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::P256_PAIR_LEN;

    #[test]
    fn test_new_wallet_key_shapes() {
        let wallet = Wallet::new().unwrap();
        assert_eq!(wallet.public_key().len(), P256_PAIR_LEN);
        assert_eq!(wallet.pub_key_hash().len(), 20);
        assert!(!wallet.pkcs8().is_empty());
    }

    #[test]
    fn test_address_round_trip() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.address();

        assert!(validate_address(&address));
        assert_eq!(
            address_to_pub_key_hash(&address).unwrap(),
            wallet.pub_key_hash()
        );
        assert_eq!(convert_address(&wallet.pub_key_hash()), address);
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(!validate_address(""));
        assert!(!validate_address("not-base58-0OIl"));
        assert!(!validate_address("1111"));

        let mut address = Wallet::new().unwrap().address();
        let last = address.pop().unwrap();
        address.push(if last == '2' { '3' } else { '2' });
        assert!(!validate_address(&address));
        assert!(matches!(
            address_to_pub_key_hash(&address),
            Err(LedgerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_debug_hides_key_material() {
        let wallet = Wallet::new().unwrap();
        let text = format!("{wallet:?}");
        assert!(text.contains(&wallet.address()));
        assert!(!text.contains("pkcs8"));
    }
}
