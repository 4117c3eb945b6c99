//! Sanitized store view — what actually crosses the wire.
//!
//! Ciphertext blobs are useless to the peer (they are bound to this
//! device's key pair) and leak this device's KDF/KEM parameters, so the
//! view carries the locally decrypted plaintext instead and strips every
//! salt/nonce/KEM blob.  The receiving side re-encrypts under its own
//! device keys before anything touches durable state.
//!
//! All three operations are all-or-nothing with respect to keys: a
//! missing device key aborts before any plaintext is produced or merged.

use vl_store::keystore::{KeyRole, KeyStore};
use vl_store::MergeableStore;

use crate::error::SyncError;

fn device_key(keys: &dyn KeyStore, role: KeyRole) -> Result<[u8; 32], SyncError> {
    let raw = keys.get(role)?.ok_or(SyncError::KeyNotAvailable(role))?;
    raw.try_into()
        .map_err(|_| SyncError::Crypto(vl_crypto::CryptoError::InvalidKey(
            format!("{role} key must be 32 bytes"),
        )))
}

/// Build the transient view for one sync session.
///
/// Takes a structural snapshot of the record collection (scalar values
/// excluded), decrypts each password with the device decryption key, and
/// sanitizes the record.  Records that are malformed, undecryptable, or
/// not valid UTF-8 are excluded rather than failing the session.  The
/// durable store is never mutated.
pub fn build_view(
    store: &MergeableStore,
    vault_key: &[u8],
    keys: &dyn KeyStore,
) -> Result<MergeableStore, SyncError> {
    let decryption_key = device_key(keys, KeyRole::Decryption)?;

    let mut view = store.records_snapshot();
    let mut excluded = Vec::new();

    for (id, record) in view.records_mut() {
        if !record.has_password() {
            continue;
        }
        let field = match record.encrypted_field() {
            Ok(field) => field,
            Err(e) => {
                tracing::warn!(record = %id, error = %e, "malformed record excluded from sync view");
                excluded.push(id.clone());
                continue;
            }
        };
        let plaintext = match vl_crypto::field::decrypt_field(vault_key, &decryption_key, &field) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!(record = %id, error = %e, "undecryptable record excluded from sync view");
                excluded.push(id.clone());
                continue;
            }
        };
        let Ok(password) = std::str::from_utf8(&plaintext) else {
            tracing::warn!(record = %id, "non-UTF-8 password excluded from sync view");
            excluded.push(id.clone());
            continue;
        };
        record.sanitize_with_plaintext(password);
    }

    for id in excluded {
        view.remove_record(&id);
    }
    Ok(view)
}

/// Re-encrypt a received view with this device's encryption key.
///
/// Every record whose password field holds embedded plaintext gets fresh
/// salts/nonces/ciphertexts and fresh stamps; the plaintext is dropped.
/// Fails before producing a partial result when the encryption key is
/// absent — the caller must not merge anything on error.
pub fn reconcile_view(
    view: &MergeableStore,
    vault_key: &[u8],
    keys: &dyn KeyStore,
) -> Result<MergeableStore, SyncError> {
    let encryption_key = device_key(keys, KeyRole::Encryption)?;

    let mut reconciled = view.clone();
    let time = MergeableStore::now_millis();

    for (_, record) in reconciled.records_mut() {
        if !record.has_plaintext_password() {
            continue;
        }
        let field = vl_crypto::field::encrypt_field(
            vault_key,
            &encryption_key,
            record.password_ciphertext.value.as_bytes(),
        )?;
        record.set_encrypted_field(&field, time);
    }
    Ok(reconciled)
}

/// Commit a reconciled view into the durable store (field-wise LWW merge).
pub fn merge_into(durable: &mut MergeableStore, reconciled: &MergeableStore) {
    durable.merge(reconciled);
}
