//! Six-blob per-field credential encryption.
//!
//! Every stored password is encrypted under a fresh 32-byte field key,
//! which is in turn encapsulated for the device's X25519 encryption key:
//!
//! 1. `k_pw  = Argon2id(vault_key, pd_salt)`
//! 2. `dh    = X25519(ephemeral_secret, device_encryption_key)`
//! 3. `kek   = HKDF-SHA256(salt = kdf_salt, ikm = k_pw || dh)`
//! 4. `kem_ciphertext = ephemeral_public || AEAD(kek, kem_nonce, field_key)`
//! 5. `password_ciphertext = AEAD(field_key, password_nonce, plaintext)`
//!
//! Decryption requires both the vault key (derived from the master
//! password) and the device decryption key, so neither a stolen database
//! nor a stolen device key alone is sufficient.

use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::aead;
use crate::error::CryptoError;
use crate::kdf;
use crate::keys::KEY_LEN;

const KEM_AAD: &[u8] = b"vaultlink-field-kem-v1";
const PASSWORD_AAD: &[u8] = b"vaultlink-field-password-v1";

/// The six blobs that together form one encrypted credential field.
/// All-or-nothing: a record missing any of them is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedField {
    pub pd_salt: Vec<u8>,
    pub kdf_salt: Vec<u8>,
    pub kem_nonce: Vec<u8>,
    pub kem_ciphertext: Vec<u8>,
    pub password_nonce: Vec<u8>,
    pub password_ciphertext: Vec<u8>,
}

/// Encrypt `plaintext` for this device.  All salts, nonces, and the field
/// key are freshly generated on every call.
pub fn encrypt_field(
    vault_key: &[u8],
    device_encryption_key: &[u8; KEY_LEN],
    plaintext: &[u8],
) -> Result<EncryptedField, CryptoError> {
    let pd_salt = kdf::generate_salt(kdf::PD_SALT_LEN);
    let kdf_salt = kdf::generate_salt(kdf::KDF_SALT_LEN);

    let k_pw = kdf::password_key(vault_key, &pd_salt)?;

    let ephemeral = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let dh = ephemeral.diffie_hellman(&PublicKey::from(*device_encryption_key));

    let kek = kdf::derive_kek(&k_pw, dh.as_bytes(), &kdf_salt)?;

    let mut field_key = Zeroizing::new([0u8; KEY_LEN]);
    rand::rngs::OsRng.fill_bytes(field_key.as_mut_slice());

    let kem_nonce = aead::generate_nonce();
    let wrapped = aead::seal_detached(&kek, &kem_nonce, field_key.as_ref(), KEM_AAD)?;
    let mut kem_ciphertext = Vec::with_capacity(KEY_LEN + wrapped.len());
    kem_ciphertext.extend_from_slice(ephemeral_public.as_bytes());
    kem_ciphertext.extend_from_slice(&wrapped);

    let password_nonce = aead::generate_nonce();
    let password_ciphertext =
        aead::seal_detached(&field_key, &password_nonce, plaintext, PASSWORD_AAD)?;

    Ok(EncryptedField {
        pd_salt,
        kdf_salt,
        kem_nonce: kem_nonce.to_vec(),
        kem_ciphertext,
        password_nonce: password_nonce.to_vec(),
        password_ciphertext,
    })
}

/// Invert `encrypt_field` with the device decryption key.
pub fn decrypt_field(
    vault_key: &[u8],
    device_decryption_key: &[u8; KEY_LEN],
    field: &EncryptedField,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if field.kem_ciphertext.len() < KEY_LEN {
        return Err(CryptoError::FieldDecrypt);
    }
    let (ephemeral_public, wrapped) = field.kem_ciphertext.split_at(KEY_LEN);
    let ephemeral_public: [u8; KEY_LEN] = ephemeral_public
        .try_into()
        .map_err(|_| CryptoError::FieldDecrypt)?;

    let k_pw = kdf::password_key(vault_key, &field.pd_salt)?;

    let secret = StaticSecret::from(*device_decryption_key);
    let dh = secret.diffie_hellman(&PublicKey::from(ephemeral_public));

    let kek = kdf::derive_kek(&k_pw, dh.as_bytes(), &field.kdf_salt)?;

    let field_key = aead::open_detached(&kek, &field.kem_nonce, wrapped, KEM_AAD)?;
    let field_key: [u8; KEY_LEN] = field_key
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::FieldDecrypt)?;

    aead::open_detached(
        &field_key,
        &field.password_nonce,
        &field.password_ciphertext,
        PASSWORD_AAD,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::DeviceKeyPair;

    #[test]
    fn field_roundtrip() {
        let keys = DeviceKeyPair::generate();
        let field = encrypt_field(b"vault key", &keys.encryption_key, b"p@ss").unwrap();
        let plain = decrypt_field(b"vault key", &keys.decryption_key.0, &field).unwrap();
        assert_eq!(plain.as_slice(), b"p@ss");
    }

    #[test]
    fn fresh_material_every_call() {
        let keys = DeviceKeyPair::generate();
        let a = encrypt_field(b"vault key", &keys.encryption_key, b"p@ss").unwrap();
        let b = encrypt_field(b"vault key", &keys.encryption_key, b"p@ss").unwrap();
        assert_ne!(a.pd_salt, b.pd_salt);
        assert_ne!(a.password_nonce, b.password_nonce);
        assert_ne!(a.password_ciphertext, b.password_ciphertext);
    }

    #[test]
    fn wrong_vault_key_fails() {
        let keys = DeviceKeyPair::generate();
        let field = encrypt_field(b"vault key", &keys.encryption_key, b"p@ss").unwrap();
        assert!(decrypt_field(b"other key", &keys.decryption_key.0, &field).is_err());
    }

    #[test]
    fn wrong_device_key_fails() {
        let keys = DeviceKeyPair::generate();
        let other = DeviceKeyPair::generate();
        let field = encrypt_field(b"vault key", &keys.encryption_key, b"p@ss").unwrap();
        assert!(decrypt_field(b"vault key", &other.decryption_key.0, &field).is_err());
    }

    #[test]
    fn truncated_kem_blob_fails() {
        let keys = DeviceKeyPair::generate();
        let mut field = encrypt_field(b"vault key", &keys.encryption_key, b"p@ss").unwrap();
        field.kem_ciphertext.truncate(16);
        assert!(decrypt_field(b"vault key", &keys.decryption_key.0, &field).is_err());
    }
}
