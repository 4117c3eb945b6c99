//! Key derivation.
//!
//! `password_key` — Argon2id over the vault key and a per-record salt.
//! `derive_kek`   — HKDF-SHA256, binds the Argon2 output and the X25519
//!                  shared secret into the key-encapsulation key.

use argon2::{Argon2, Params, Version};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const PD_SALT_LEN: usize = 16;
pub const KDF_SALT_LEN: usize = 32;

/// Argon2id parameters — interactive profile; per-record derivation runs
/// during sync view construction, so this stays on the light side.
fn argon2_params() -> Params {
    Params::new(
        19 * 1024, // m_cost: 19 MiB
        2,         // t_cost
        1,         // p_cost
        Some(32),
    )
    .expect("static Argon2 params are always valid")
}

/// Derive the per-record password key from the vault key and a 16-byte salt.
pub fn password_key(vault_key: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    if salt.len() != PD_SALT_LEN {
        return Err(CryptoError::KeyDerivation("bad password-derivation salt length".into()));
    }
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params());
    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(vault_key, salt, output.as_mut_slice())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(output)
}

/// Derive the key-encapsulation key from `password_key || dh_shared`.
pub fn derive_kek(
    password_key: &[u8; 32],
    dh_shared: &[u8; 32],
    salt: &[u8],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut ikm = Zeroizing::new([0u8; 64]);
    ikm[..32].copy_from_slice(password_key);
    ikm[32..].copy_from_slice(dh_shared);

    let hk = Hkdf::<Sha256>::new(Some(salt), ikm.as_ref());
    let mut kek = Zeroizing::new([0u8; 32]);
    hk.expand(b"vaultlink-field-kek-v1", kek.as_mut_slice())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(kek)
}

/// Fresh random salt of the given length.
pub fn generate_salt(len: usize) -> Vec<u8> {
    let mut salt = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}
