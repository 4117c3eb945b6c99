//! The credential record: display name plus the six-blob encrypted
//! password envelope, every field individually stamped for LWW merge.
//!
//! Blob fields are base64 strings; `updated_at` is an RFC 3339 timestamp
//! shown in the UI, distinct from the per-field logical times.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};

use vl_crypto::EncryptedField;

use crate::error::StoreError;
use crate::stamp::Stamp;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub name: Stamp,
    pub pd_salt: Stamp,
    pub kdf_salt: Stamp,
    pub kem_nonce: Stamp,
    pub kem_ciphertext: Stamp,
    pub password_nonce: Stamp,
    pub password_ciphertext: Stamp,
    pub updated_at: Stamp,
}

impl CredentialRecord {
    pub fn new(name: impl Into<String>, time: i64) -> Self {
        Self {
            name: Stamp::new(name, time),
            updated_at: Stamp::new(
                chrono::DateTime::from_timestamp_millis(time)
                    .unwrap_or_default()
                    .to_rfc3339(),
                time,
            ),
            ..Default::default()
        }
    }

    /// Field-wise LWW merge with a replica of the same record.
    pub fn merge_from(&mut self, remote: &CredentialRecord) {
        self.name.merge_from(&remote.name);
        self.pd_salt.merge_from(&remote.pd_salt);
        self.kdf_salt.merge_from(&remote.kdf_salt);
        self.kem_nonce.merge_from(&remote.kem_nonce);
        self.kem_ciphertext.merge_from(&remote.kem_ciphertext);
        self.password_nonce.merge_from(&remote.password_nonce);
        self.password_ciphertext.merge_from(&remote.password_ciphertext);
        self.updated_at.merge_from(&remote.updated_at);
    }

    /// True when the record carries an encrypted (or embedded-plaintext)
    /// password at all.
    pub fn has_password(&self) -> bool {
        !self.password_ciphertext.is_empty()
    }

    /// True when the password field holds sanitized plaintext (non-empty
    /// value with a cleared version hash) rather than ciphertext.
    pub fn has_plaintext_password(&self) -> bool {
        !self.password_ciphertext.is_empty() && self.password_ciphertext.hash.is_empty()
    }

    /// Decode the six blobs into an `EncryptedField`.
    /// Fails with `MalformedRecord` naming the first missing field.
    pub fn encrypted_field(&self) -> Result<EncryptedField, StoreError> {
        fn blob(stamp: &Stamp, field: &'static str) -> Result<Vec<u8>, StoreError> {
            if stamp.is_empty() {
                return Err(StoreError::MalformedRecord(field));
            }
            B64.decode(&stamp.value)
                .map_err(|_| StoreError::MalformedRecord(field))
        }

        Ok(EncryptedField {
            pd_salt: blob(&self.pd_salt, "pd_salt")?,
            kdf_salt: blob(&self.kdf_salt, "kdf_salt")?,
            kem_nonce: blob(&self.kem_nonce, "kem_nonce")?,
            kem_ciphertext: blob(&self.kem_ciphertext, "kem_ciphertext")?,
            password_nonce: blob(&self.password_nonce, "password_nonce")?,
            password_ciphertext: blob(&self.password_ciphertext, "password_ciphertext")?,
        })
    }

    /// Write all six blobs back with fresh stamps at `time`.
    pub fn set_encrypted_field(&mut self, field: &EncryptedField, time: i64) {
        self.pd_salt = Stamp::new(B64.encode(&field.pd_salt), time);
        self.kdf_salt = Stamp::new(B64.encode(&field.kdf_salt), time);
        self.kem_nonce = Stamp::new(B64.encode(&field.kem_nonce), time);
        self.kem_ciphertext = Stamp::new(B64.encode(&field.kem_ciphertext), time);
        self.password_nonce = Stamp::new(B64.encode(&field.password_nonce), time);
        self.password_ciphertext = Stamp::new(B64.encode(&field.password_ciphertext), time);
    }

    /// Strip the device-local salts/nonces/KEM material and embed the
    /// decrypted plaintext in the password field (sync view form).
    pub fn sanitize_with_plaintext(&mut self, plaintext: &str) {
        self.pd_salt.sanitize();
        self.kdf_salt.sanitize();
        self.kem_nonce.sanitize();
        self.kem_ciphertext.sanitize();
        self.password_nonce.sanitize();
        self.password_ciphertext.sanitize_with(plaintext);
    }
}
