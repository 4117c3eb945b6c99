use std::time::Duration;

use thiserror::Error;

use vl_store::keystore::KeyRole;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("declared frame length {0} exceeds the per-frame ceiling")]
    FrameTooLarge(usize),

    #[error("envelope decryption failed: {0}")]
    Envelope(#[from] vl_crypto::CryptoError),

    #[error("malformed packet: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    #[error("a sync session is already active; stop it first")]
    SessionActive,

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("device {0} key is not available")]
    KeyNotAvailable(KeyRole),

    #[error("crypto error: {0}")]
    Crypto(#[from] vl_crypto::CryptoError),

    #[error("store error: {0}")]
    Store(#[from] vl_store::StoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
