use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("envelope encryption failed")]
    EnvelopeSeal,

    #[error("envelope decryption failed (authentication tag mismatch)")]
    EnvelopeOpen,

    #[error("field encryption failed")]
    FieldEncrypt,

    #[error("field decryption failed (wrong key or corrupted blob)")]
    FieldDecrypt,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
