//! vl_crypto — VaultLink cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Errors are typed (`CryptoError`); nothing in here panics on bad input.
//!
//! # Module layout
//! - `aead`  — XChaCha20-Poly1305 envelope sealing for the sync transport
//! - `field` — six-blob per-credential-field encryption (Argon2id + HKDF +
//!             X25519 KEM + XChaCha20-Poly1305)
//! - `kdf`   — Argon2id / HKDF-SHA256 key derivation
//! - `keys`  — device key pair and per-session shared secret
//! - `hash`  — BLAKE3 utilities (field stamps, store content hashes)
//! - `error` — unified error type

pub mod aead;
pub mod error;
pub mod field;
pub mod hash;
pub mod kdf;
pub mod keys;

pub use error::CryptoError;
pub use field::EncryptedField;
pub use keys::{DeviceKeyPair, SessionSecret};
