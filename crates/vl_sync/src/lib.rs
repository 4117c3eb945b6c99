//! vl_sync — VaultLink peer-to-peer secure synchronization
//!
//! Two devices on the same network exchange their credential stores over an
//! ad-hoc encrypted TCP connection, without a server.  The sharing device
//! publishes `{ip, port, session secret}` out-of-band (QR code); the other
//! device connects with it.  Both sides exchange a sanitized view of their
//! record collections, merge conflict-free, and re-encrypt with their own
//! device keys before committing.
//!
//! # Module layout
//! - `transport`  — length-prefixed framing over TCP, session-keyed writer
//! - `codec`      — sync packet (de)serialisation + envelope encryption
//! - `view`       — sanitized store view: build / reconcile / merge
//! - `engine`     — synchronizer driving the hash-exchange protocol
//! - `completion` — bilateral termination-detection state machine
//! - `session`    — session lifecycle: share / connect / stop, UI events
//! - `error`      — unified error type

pub mod codec;
pub mod completion;
pub mod engine;
pub mod error;
pub mod session;
pub mod transport;
pub mod view;

pub use error::{CodecError, SyncError};
pub use session::{SessionState, ShareInfo, SyncEndpoint, SyncEvent};
