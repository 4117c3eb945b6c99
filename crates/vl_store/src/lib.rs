//! vl_store — VaultLink mergeable credential store
//!
//! The durable on-disk persistence layer lives outside this workspace; what
//! this crate owns is the merge semantics the sync subsystem depends on:
//!
//! - `stamp`    — per-field value + version metadata, last-writer-wins merge
//! - `record`   — the credential record (name + six encrypted-password blobs)
//! - `mergeable`— the record collection + scalar login values, content
//!                hashing, field-wise merge
//! - `keystore` — role-keyed device key storage (OS keyring / in-memory)
//! - `error`    — unified error type

pub mod error;
pub mod keystore;
pub mod mergeable;
pub mod record;
pub mod stamp;

pub use error::StoreError;
pub use keystore::{KeyRole, KeyStore, MemoryKeyStore};
pub use mergeable::MergeableStore;
pub use record::CredentialRecord;
pub use stamp::Stamp;
