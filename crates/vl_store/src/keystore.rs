//! Role-keyed device key storage.
//!
//! The device key pair lives outside the credential database: the keyring
//! implementation hands the raw key bytes to the OS secret service,
//! base64-encoded.  The in-memory implementation backs tests and headless
//! environments.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

use vl_crypto::DeviceKeyPair;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRole {
    Encryption,
    Decryption,
}

impl KeyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRole::Encryption => "encryption_key",
            KeyRole::Decryption => "decryption_key",
        }
    }
}

impl std::fmt::Display for KeyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait KeyStore: Send + Sync {
    /// Fetch a key by role; `None` when the role has never been provisioned.
    fn get(&self, role: KeyRole) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, role: KeyRole, key: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, role: KeyRole) -> Result<(), StoreError>;
}

/// Generate and persist a fresh device key pair (account creation).
pub fn provision_device_keys(store: &dyn KeyStore) -> Result<(), StoreError> {
    let pair = DeviceKeyPair::generate();
    store.put(KeyRole::Encryption, &pair.encryption_key)?;
    store.put(KeyRole::Decryption, &pair.decryption_key.0)?;
    tracing::info!("device key pair provisioned");
    Ok(())
}

// ── OS keyring ────────────────────────────────────────────────────────────────

pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    fn entry(&self, role: KeyRole) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&self.service, role.as_str()).map_err(|e| StoreError::KeyStore {
            role,
            message: format!("keyring init: {e}"),
        })
    }
}

impl KeyStore for KeyringStore {
    fn get(&self, role: KeyRole) -> Result<Option<Vec<u8>>, StoreError> {
        match self.entry(role)?.get_password() {
            Ok(encoded) => {
                let key = B64.decode(encoded).map_err(|e| StoreError::KeyStore {
                    role,
                    message: format!("decode stored key: {e}"),
                })?;
                Ok(Some(key))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::KeyStore { role, message: format!("load key: {e}") }),
        }
    }

    fn put(&self, role: KeyRole, key: &[u8]) -> Result<(), StoreError> {
        self.entry(role)?
            .set_password(&B64.encode(key))
            .map_err(|e| StoreError::KeyStore { role, message: format!("store key: {e}") })
    }

    fn delete(&self, role: KeyRole) -> Result<(), StoreError> {
        match self.entry(role)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::KeyStore { role, message: format!("delete key: {e}") }),
        }
    }
}

// ── In-memory (tests, headless) ───────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<KeyRole, Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeded with the given device key pair.
    pub fn with_device_keys(pair: &DeviceKeyPair) -> Self {
        let store = Self::new();
        store.put(KeyRole::Encryption, &pair.encryption_key).expect("memory put");
        store.put(KeyRole::Decryption, &pair.decryption_key.0).expect("memory put");
        store
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, role: KeyRole) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.keys.lock().expect("keystore lock").get(&role).cloned())
    }

    fn put(&self, role: KeyRole, key: &[u8]) -> Result<(), StoreError> {
        self.keys.lock().expect("keystore lock").insert(role, key.to_vec());
        Ok(())
    }

    fn delete(&self, role: KeyRole) -> Result<(), StoreError> {
        self.keys.lock().expect("keystore lock").remove(&role);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryKeyStore::new();
        assert!(store.get(KeyRole::Encryption).unwrap().is_none());
        store.put(KeyRole::Encryption, &[1, 2, 3]).unwrap();
        assert_eq!(store.get(KeyRole::Encryption).unwrap().unwrap(), vec![1, 2, 3]);
        store.delete(KeyRole::Encryption).unwrap();
        assert!(store.get(KeyRole::Encryption).unwrap().is_none());
    }

    #[test]
    fn provisioning_fills_both_roles() {
        let store = MemoryKeyStore::new();
        provision_device_keys(&store).unwrap();
        assert!(store.get(KeyRole::Encryption).unwrap().is_some());
        assert!(store.get(KeyRole::Decryption).unwrap().is_some());
    }
}
