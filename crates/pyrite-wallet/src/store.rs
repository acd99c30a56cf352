//! Wallet file: a map from address to PKCS#8 key document.
//!
//! # File format
//! ```text
//! header_len (4 bytes LE) || header_json || bincode payload
//! ```
//! The header is plain JSON carrying magic bytes and a format version; the
//! payload is the address → key map. Writes go to a temp file first and
//! are renamed into place, so a crash never leaves a torn wallet.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use pyrite_core::address::Address;
use pyrite_core::crypto::KeyPair;

use crate::error::WalletError;

/// Magic bytes identifying a Pyrite wallet file.
pub const WALLET_MAGIC: &[u8; 4] = b"PYWL";

/// Current wallet file format version.
pub const WALLET_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct WalletFileHeader {
    magic: String,
    version: u32,
}

/// The key pairs owned by this node, keyed by encoded address.
///
/// A `BTreeMap` keeps the on-disk payload byte-stable across saves.
pub struct WalletStore {
    path: PathBuf,
    keys: BTreeMap<String, Vec<u8>>,
}

impl WalletStore {
    /// Load the wallet file at `path`, or start an empty store if the file
    /// does not exist yet.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                path,
                keys: BTreeMap::new(),
            });
        }

        let bytes = fs::read(&path)?;
        let keys = Self::parse(&bytes)?;
        Ok(Self { path, keys })
    }

    fn parse(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, WalletError> {
        if bytes.len() < 4 {
            return Err(WalletError::Format("file too short".into()));
        }
        let header_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < 4 + header_len {
            return Err(WalletError::Format("truncated header".into()));
        }

        let header: WalletFileHeader = serde_json::from_slice(&bytes[4..4 + header_len])
            .map_err(|e| WalletError::Format(format!("bad header: {e}")))?;
        if header.magic.as_bytes() != WALLET_MAGIC {
            return Err(WalletError::Format("not a wallet file".into()));
        }
        if header.version != WALLET_VERSION {
            return Err(WalletError::Format(format!(
                "unsupported version {}",
                header.version
            )));
        }

        pyrite_core::codec::from_bytes(&bytes[4 + header_len..])
            .map_err(|e| WalletError::Format(e.to_string()))
    }

    /// Generate a key pair, record it, and persist the store.
    pub fn create_wallet(&mut self) -> Result<Address, WalletError> {
        let keypair = KeyPair::generate()?;
        let address = Address::from_public_key(&keypair.public_key());
        self.keys
            .insert(address.encode(), keypair.to_pkcs8().to_vec());
        self.persist()?;
        info!(%address, "created wallet");
        Ok(address)
    }

    /// Encoded addresses of every stored key, sorted.
    pub fn addresses(&self) -> Vec<String> {
        self.keys.keys().cloned().collect()
    }

    /// Reconstruct the key pair for an address.
    pub fn keypair(&self, address: &str) -> Result<KeyPair, WalletError> {
        let pkcs8 = self
            .keys
            .get(address)
            .ok_or_else(|| WalletError::UnknownAddress(address.to_string()))?;
        Ok(KeyPair::from_pkcs8(pkcs8)?)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Write the store to disk: temp file, then rename over the target.
    fn persist(&self) -> Result<(), WalletError> {
        let header = serde_json::to_vec(&WalletFileHeader {
            magic: String::from_utf8_lossy(WALLET_MAGIC).to_string(),
            version: WALLET_VERSION,
        })
        .map_err(|e| WalletError::Format(e.to_string()))?;
        let payload = pyrite_core::codec::to_bytes(&self.keys)
            .map_err(|e| WalletError::Format(e.to_string()))?;

        let mut bytes = Vec::with_capacity(4 + header.len() + payload.len());
        bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&payload);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_wallet_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("wallets_test.data")
    }

    #[test]
    fn starts_empty_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::load_or_create(temp_wallet_path(&dir)).unwrap();
        assert!(store.is_empty());
        assert!(store.addresses().is_empty());
    }

    #[test]
    fn created_wallets_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_wallet_path(&dir);

        let (a, b) = {
            let mut store = WalletStore::load_or_create(&path).unwrap();
            let a = store.create_wallet().unwrap();
            let b = store.create_wallet().unwrap();
            (a, b)
        };

        let store = WalletStore::load_or_create(&path).unwrap();
        assert_eq!(store.len(), 2);
        let mut expected = vec![a.encode(), b.encode()];
        expected.sort();
        assert_eq!(store.addresses(), expected);
    }

    #[test]
    fn reloaded_keypair_matches_address() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_wallet_path(&dir);

        let address = {
            let mut store = WalletStore::load_or_create(&path).unwrap();
            store.create_wallet().unwrap()
        };

        let store = WalletStore::load_or_create(&path).unwrap();
        let keypair = store.keypair(&address.encode()).unwrap();
        assert_eq!(
            Address::from_public_key(&keypair.public_key()),
            address
        );
    }

    #[test]
    fn reloaded_keypair_still_signs() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_wallet_path(&dir);

        let mut store = WalletStore::load_or_create(&path).unwrap();
        let address = store.create_wallet().unwrap();

        let keypair = store.keypair(&address.encode()).unwrap();
        let sig = keypair.sign(b"probe").unwrap();
        assert!(keypair.public_key().verify(b"probe", &sig).is_ok());
    }

    #[test]
    fn unknown_address_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::load_or_create(temp_wallet_path(&dir)).unwrap();
        assert!(matches!(
            store.keypair("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy"),
            Err(WalletError::UnknownAddress(_))
        ));
    }

    #[test]
    fn garbage_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_wallet_path(&dir);
        fs::write(&path, b"definitely not a wallet").unwrap();
        assert!(matches!(
            WalletStore::load_or_create(&path),
            Err(WalletError::Format(_))
        ));
    }

    #[test]
    fn no_stray_temp_file_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_wallet_path(&dir);
        let mut store = WalletStore::load_or_create(&path).unwrap();
        store.create_wallet().unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}
