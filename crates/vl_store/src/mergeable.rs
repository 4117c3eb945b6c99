//! The mergeable store: credential records plus scalar login values.
//!
//! This is the in-memory replica the sync subsystem exchanges and merges.
//! Maps are `BTreeMap` so serialisation is canonical and `content_hash`
//! is stable across peers holding equal content.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::record::CredentialRecord;
use crate::stamp::Stamp;

/// Well-known scalar value keys (login/session state; never synchronised).
pub mod value_keys {
    pub const COMPLETED_ONBOARDING: &str = "login_completed_onboarding";
    pub const HAS_BIOMETRIC_AUTH: &str = "login_has_biometric_auth";
    pub const LOGIN_PD_SALT: &str = "login_pd_salt";
    pub const VAULT_KEY_CIPHERTEXT: &str = "login_vault_key_ciphertext";
    pub const VAULT_KEY_NONCE: &str = "login_vault_key_nonce";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeableStore {
    records: BTreeMap<String, CredentialRecord>,
    values: BTreeMap<String, Stamp>,
}

impl MergeableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current wall-clock logical time for new stamps.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    pub fn insert_record(&mut self, id: impl Into<String>, record: CredentialRecord) {
        self.records.insert(id.into(), record);
    }

    pub fn remove_record(&mut self, id: &str) -> Option<CredentialRecord> {
        self.records.remove(id)
    }

    pub fn record(&self, id: &str) -> Option<&CredentialRecord> {
        self.records.get(id)
    }

    pub fn record_mut(&mut self, id: &str) -> Option<&mut CredentialRecord> {
        self.records.get_mut(id)
    }

    pub fn records(&self) -> impl Iterator<Item = (&String, &CredentialRecord)> {
        self.records.iter()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = (&String, &mut CredentialRecord)> {
        self.records.iter_mut()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>, time: i64) {
        self.values.insert(key.into(), Stamp::new(value, time));
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|stamp| stamp.value.as_str())
    }

    /// Deep copy of the record collection only — scalar values excluded.
    /// This is the structural snapshot the sync view is built from.
    pub fn records_snapshot(&self) -> Self {
        Self {
            records: self.records.clone(),
            values: BTreeMap::new(),
        }
    }

    /// Field-wise LWW merge.  Records present only remotely are adopted
    /// wholesale; shared records merge stamp by stamp.  Idempotent,
    /// commutative, monotonic.
    pub fn merge(&mut self, remote: &MergeableStore) {
        for (id, remote_record) in &remote.records {
            match self.records.get_mut(id) {
                Some(local) => local.merge_from(remote_record),
                None => {
                    self.records.insert(id.clone(), remote_record.clone());
                }
            }
        }
        for (key, remote_stamp) in &remote.values {
            match self.values.get_mut(key) {
                Some(local) => local.merge_from(remote_stamp),
                None => {
                    self.values.insert(key.clone(), remote_stamp.clone());
                }
            }
        }
    }

    /// Hash of the canonical JSON serialisation; equal hashes mean the
    /// replicas have converged.
    pub fn content_hash(&self) -> Result<String, StoreError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(vl_crypto::hash::content_hash(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(id: &str, name: &str, time: i64) -> MergeableStore {
        let mut store = MergeableStore::new();
        store.insert_record(id, CredentialRecord::new(name, time));
        store
    }

    #[test]
    fn merge_adopts_unknown_records() {
        let mut a = store_with("r1", "Site", 100);
        let b = store_with("r2", "Other", 100);
        a.merge(&b);
        assert_eq!(a.record_count(), 2);
        assert_eq!(a.record("r2").unwrap().name.value, "Other");
    }

    #[test]
    fn merge_prefers_newer_fields() {
        let mut a = store_with("r1", "Old name", 100);
        let b = store_with("r1", "New name", 200);
        a.merge(&b);
        assert_eq!(a.record("r1").unwrap().name.value, "New name");
    }

    #[test]
    fn merge_twice_equals_merge_once() {
        let mut a = store_with("r1", "Site", 100);
        let b = store_with("r1", "Renamed", 200);
        a.merge(&b);
        let once = a.clone();
        a.merge(&b);
        assert_eq!(a, once);
    }

    #[test]
    fn merge_is_commutative() {
        let a = store_with("r1", "From A", 150);
        let b = store_with("r1", "From B", 150);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn sanitized_password_conflict_converges_both_ways() {
        // Two replicas hold the same record with equal-time sanitized
        // passwords; after merging in both directions the content hashes
        // must agree, or a live sync would never terminate.
        let sanitized = |value: &str| {
            let mut store = store_with("r1", "Site", 1_000);
            store
                .record_mut("r1")
                .unwrap()
                .password_ciphertext
                .sanitize_with(value);
            store.record_mut("r1").unwrap().password_ciphertext.time = 1_000;
            store
        };
        let a = sanitized("p@ss-from-A");
        let b = sanitized("p@ss-from-B");

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);
        assert_eq!(ab.content_hash().unwrap(), ba.content_hash().unwrap());
    }

    #[test]
    fn snapshot_excludes_values() {
        let mut store = store_with("r1", "Site", 100);
        store.set_value(value_keys::COMPLETED_ONBOARDING, "true", 100);
        let snapshot = store.records_snapshot();
        assert_eq!(snapshot.record_count(), 1);
        assert!(snapshot.value(value_keys::COMPLETED_ONBOARDING).is_none());
    }

    #[test]
    fn content_hash_tracks_convergence() {
        let mut a = store_with("r1", "Site", 100);
        let mut b = store_with("r1", "Renamed", 200);
        assert_ne!(a.content_hash().unwrap(), b.content_hash().unwrap());

        let a_copy = a.clone();
        a.merge(&b);
        b.merge(&a_copy);
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }
}
