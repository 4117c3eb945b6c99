use thiserror::Error;

use crate::keystore::KeyRole;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("crypto error: {0}")]
    Crypto(#[from] vl_crypto::CryptoError),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("record is missing required field `{0}`")]
    MalformedRecord(&'static str),

    #[error("key store error for {role} key: {message}")]
    KeyStore { role: KeyRole, message: String },
}
