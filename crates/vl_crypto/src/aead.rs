//! Authenticated encryption for sync envelopes and field blobs.
//!
//! Uses XChaCha20-Poly1305 (192-bit nonce).
//! Key size: 32 bytes.  Nonce: 24 bytes (random).  Tag: 16 bytes.
//!
//! Envelope wire format:
//!   [ nonce (24 bytes) | ciphertext + tag ]
//!
//! Field blobs keep their nonce in a separate column instead, so the
//! explicit-nonce variants are exposed for `field`.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const NONCE_LEN: usize = 24;

/// Context string authenticated into every sync envelope.
const ENVELOPE_AAD: &[u8] = b"vaultlink-sync-envelope-v1";

/// Generate a fresh random 24-byte nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt with an explicit nonce, which the caller stores separately.
pub fn seal_detached(
    key: &[u8; 32],
    nonce: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::FieldEncrypt);
    }
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::FieldEncrypt)?;
    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            chacha20poly1305::aead::Payload { msg: plaintext, aad },
        )
        .map_err(|_| CryptoError::FieldEncrypt)
}

/// Decrypt with an explicit nonce.  Tag mismatch surfaces as `FieldDecrypt`.
pub fn open_detached(
    key: &[u8; 32],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::FieldDecrypt);
    }
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::FieldDecrypt)?;
    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(nonce),
            chacha20poly1305::aead::Payload { msg: ciphertext, aad },
        )
        .map_err(|_| CryptoError::FieldDecrypt)?;
    Ok(Zeroizing::new(plaintext))
}

/// Seal a sync envelope: random nonce prepended to the ciphertext.
pub fn seal_envelope(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = generate_nonce();
    let ciphertext =
        seal_detached(key, &nonce, plaintext, ENVELOPE_AAD).map_err(|_| CryptoError::EnvelopeSeal)?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sync envelope (nonce || ciphertext+tag).
pub fn open_envelope(key: &[u8; 32], data: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < NONCE_LEN {
        return Err(CryptoError::EnvelopeOpen);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    open_detached(key, nonce, ciphertext, ENVELOPE_AAD).map_err(|_| CryptoError::EnvelopeOpen)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn envelope_roundtrip() {
        let sealed = seal_envelope(&KEY, b"hello peer").unwrap();
        let opened = open_envelope(&KEY, &sealed).unwrap();
        assert_eq!(opened.as_slice(), b"hello peer");
    }

    #[test]
    fn envelope_roundtrip_empty() {
        let sealed = seal_envelope(&KEY, b"").unwrap();
        let opened = open_envelope(&KEY, &sealed).unwrap();
        assert!(opened.is_empty());
    }

    #[test]
    fn tampered_envelope_rejected() {
        let mut sealed = seal_envelope(&KEY, b"payload").unwrap();
        // Flip one bit anywhere in the sealed blob.
        for i in 0..sealed.len() {
            sealed[i] ^= 0x01;
            assert!(open_envelope(&KEY, &sealed).is_err(), "bit flip at {i} accepted");
            sealed[i] ^= 0x01;
        }
    }

    #[test]
    fn wrong_key_rejected() {
        let sealed = seal_envelope(&KEY, b"payload").unwrap();
        let other = [8u8; 32];
        assert!(open_envelope(&other, &sealed).is_err());
    }

    #[test]
    fn truncated_envelope_rejected() {
        assert!(open_envelope(&KEY, &[0u8; 10]).is_err());
    }
}
