//! Device key pair and per-session shared secret.
//!
//! The device key pair is a static X25519 pair provisioned once at account
//! creation: the public half is the "encryption key" role, the secret half
//! the "decryption key" role.  It is independent of any sync session.
//!
//! The session secret is a 32-byte symmetric key generated by the sharing
//! device and handed to the peer out-of-band (QR payload, base64).

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;

/// Static X25519 device key pair.
pub struct DeviceKeyPair {
    /// Public half — safe to store and to hand to `encrypt_field`.
    pub encryption_key: [u8; KEY_LEN],
    /// Secret half — zeroized on drop.
    pub decryption_key: DecryptionKey,
}

/// Secret half of the device key pair.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DecryptionKey(pub [u8; KEY_LEN]);

impl DeviceKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self {
            encryption_key: public.to_bytes(),
            decryption_key: DecryptionKey(secret.to_bytes()),
        }
    }
}

/// Symmetric key securing one sync session's framed transport.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret([u8; KEY_LEN]);

impl SessionSecret {
    /// Generate a fresh session secret (sharing side, once per session).
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode the out-of-band base64 form.
    ///
    /// A 32-byte payload is used verbatim; anything else (e.g. a short
    /// human-supplied code) is stretched to 32 bytes deterministically, so
    /// both peers derive the same transport key from the same code.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let raw = B64.decode(encoded)?;
        if raw.is_empty() {
            return Err(CryptoError::InvalidKey("empty session secret".into()));
        }
        match <[u8; KEY_LEN]>::try_from(raw.as_slice()) {
            Ok(bytes) => Ok(Self(bytes)),
            Err(_) => Ok(Self(blake3::derive_key("vaultlink session secret v1", &raw))),
        }
    }

    /// Encode for the out-of-band payload.
    pub fn to_base64(&self) -> String {
        B64.encode(self.0)
    }

    pub fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionSecret(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_secret_base64_roundtrip() {
        let secret = SessionSecret::generate();
        let decoded = SessionSecret::from_base64(&secret.to_base64()).unwrap();
        assert_eq!(secret.bytes(), decoded.bytes());
    }

    #[test]
    fn short_secret_is_stretched_deterministically() {
        // "QUJDRA==" decodes to the 4-byte code "ABCD"; both peers must
        // derive the same 32-byte transport key from it.
        let a = SessionSecret::from_base64("QUJDRA==").unwrap();
        let b = SessionSecret::from_base64("QUJDRA==").unwrap();
        assert_eq!(a.bytes(), b.bytes());
    }

    #[test]
    fn empty_secret_rejected() {
        assert!(SessionSecret::from_base64("").is_err());
    }

    #[test]
    fn device_key_pairs_are_distinct() {
        let a = DeviceKeyPair::generate();
        let b = DeviceKeyPair::generate();
        assert_ne!(a.encryption_key, b.encryption_key);
    }
}
