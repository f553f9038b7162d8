use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::info;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Wallets keyed by address, persisted as one bincode file
pub struct Wallets {
    wallets: BTreeMap<String, Wallet>,
    path: PathBuf,
}

impl Wallets {
    /// Load the wallet file at `path`; a missing file means no wallets yet
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Wallets> {
        let path = path.as_ref().to_path_buf();
        let mut wallets = Wallets {
            wallets: BTreeMap::new(),
            path,
        };
        if !wallets.path.exists() {
            return Ok(wallets);
        }

        let mut file = File::open(&wallets.path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        wallets.wallets = deserialize(&buf).map_err(|e| {
            LedgerError::Wallet(format!(
                "Wallet file {} is corrupt: {e}",
                wallets.path.display()
            ))
        })?;
        Ok(wallets)
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        self.save()?;
        info!("Created wallet {address}");
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}
