//! Sync packet codec.
//!
//! A packet is the protocol envelope exchanged during synchronization:
//! optional destination peer id, optional request id, a message kind, and
//! an opaque JSON body.  On the wire it is canonical JSON sealed as one
//! authenticated-encryption unit under the session secret; tampering is
//! detected on open and rejected.

use serde::{Deserialize, Serialize};

use vl_crypto::{aead, SessionSecret};

use crate::error::CodecError;

/// Identifier substituted for an absent `to_peer_id` before the packet
/// reaches the synchronizer.
pub const DEFAULT_PEER_ID: &str = "peer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// "Here is the hash of my content" — opens a negotiation round.
    ContentHashes,
    /// Full mergeable content, sent when hashes differ.
    ContentDiff,
    /// Hashes were equal; the sender considers itself converged.
    HashesMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPacket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_peer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub kind: MessageKind,
    pub body: serde_json::Value,
}

impl SyncPacket {
    pub fn new(kind: MessageKind, request_id: Option<String>, body: serde_json::Value) -> Self {
        Self { to_peer_id: None, request_id, kind, body }
    }

    /// Destination peer id, defaulted when absent.
    pub fn peer_id(&self) -> &str {
        self.to_peer_id.as_deref().unwrap_or(DEFAULT_PEER_ID)
    }
}

/// Serialize and seal a packet for the framed transport.
pub fn encode_packet(packet: &SyncPacket, secret: &SessionSecret) -> Result<Vec<u8>, CodecError> {
    let plaintext = serde_json::to_vec(packet)?;
    Ok(aead::seal_envelope(secret.bytes(), &plaintext)?)
}

/// Open and parse one received frame payload.
pub fn decode_packet(data: &[u8], secret: &SessionSecret) -> Result<SyncPacket, CodecError> {
    let plaintext = aead::open_envelope(secret.bytes(), data)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SessionSecret {
        SessionSecret::from_bytes([9u8; 32])
    }

    #[test]
    fn packet_roundtrip() {
        let packet = SyncPacket::new(
            MessageKind::ContentHashes,
            Some("req-1".into()),
            serde_json::json!({"hash": "abc"}),
        );
        let encoded = encode_packet(&packet, &secret()).unwrap();
        let decoded = decode_packet(&encoded, &secret()).unwrap();
        assert_eq!(decoded.kind, MessageKind::ContentHashes);
        assert_eq!(decoded.request_id.as_deref(), Some("req-1"));
        assert_eq!(decoded.body["hash"], "abc");
    }

    #[test]
    fn absent_peer_id_defaults() {
        let packet = SyncPacket::new(MessageKind::HashesMatch, None, serde_json::Value::Null);
        assert_eq!(packet.peer_id(), DEFAULT_PEER_ID);
    }

    #[test]
    fn tampering_is_rejected() {
        let packet = SyncPacket::new(MessageKind::HashesMatch, None, serde_json::Value::Null);
        let mut encoded = encode_packet(&packet, &secret()).unwrap();
        let mid = encoded.len() / 2;
        encoded[mid] ^= 0x80;
        assert!(matches!(
            decode_packet(&encoded, &secret()),
            Err(CodecError::Envelope(_))
        ));
    }

    #[test]
    fn wrong_session_secret_rejected() {
        let packet = SyncPacket::new(MessageKind::HashesMatch, None, serde_json::Value::Null);
        let encoded = encode_packet(&packet, &secret()).unwrap();
        let other = SessionSecret::from_bytes([10u8; 32]);
        assert!(decode_packet(&encoded, &other).is_err());
    }
}
