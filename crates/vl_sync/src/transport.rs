//! Length-prefixed framing over the session's TCP connection.
//!
//! Wire format: 4-byte big-endian payload length, then that many bytes of
//! sealed envelope.  `FrameBuffer` is the pure incremental decoder for the
//! receive direction; the writer side runs as a task fed through a channel
//! so protocol code can emit frames without awaiting the socket.
//!
//! Failure policy (per half-closed peers being normal here): a frame that
//! cannot be written is logged and dropped, never an error the sync
//! session dies on.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vl_crypto::SessionSecret;

use crate::codec::{self, SyncPacket};
use crate::error::CodecError;

/// Per-frame size ceiling.  A peer declaring more than this is either
/// corrupt or hostile; the frame is rejected before any allocation.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Prefix a payload with its 4-byte big-endian length.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Incremental frame decoder.  Chunks go in as they arrive; complete
/// payloads come out in strict FIFO order; partial frames stay buffered.
#[derive(Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame payload, if one is fully buffered.
    ///
    /// An oversized declared length clears the buffer and errors; the
    /// stream cannot be resynchronized after that.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let declared = u32::from_be_bytes(
            self.buf[..HEADER_LEN].try_into().expect("4-byte slice"),
        ) as usize;
        if declared > MAX_FRAME_LEN {
            self.buf.clear();
            return Err(CodecError::FrameTooLarge(declared));
        }
        if self.buf.len() < HEADER_LEN + declared {
            return Ok(None);
        }
        let payload = self.buf[HEADER_LEN..HEADER_LEN + declared].to_vec();
        self.buf.drain(..HEADER_LEN + declared);
        Ok(Some(payload))
    }

    /// Discard everything buffered (fail-fast on a corrupted stream).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

enum WriterCmd {
    Frame(Vec<u8>),
    /// Half-close the write side: signals "done sending" to the peer.
    Finish,
    /// Tear the writer down entirely.
    Destroy,
}

/// Cheap-to-clone sending handle over the session's write half.
#[derive(Clone)]
pub struct FramedSender {
    tx: mpsc::UnboundedSender<WriterCmd>,
    secret: Arc<SessionSecret>,
}

impl FramedSender {
    /// Create the sender and spawn its writer task on `write_half`.
    pub fn spawn(write_half: OwnedWriteHalf, secret: Arc<SessionSecret>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_writer(write_half, rx));
        (Self { tx, secret }, task)
    }

    /// Seal and enqueue one packet.  Dropped (with a log line) when the
    /// writer is gone or the packet cannot be sealed.
    pub fn send(&self, packet: &SyncPacket) {
        match codec::encode_packet(packet, &self.secret) {
            Ok(sealed) => {
                if self.tx.send(WriterCmd::Frame(frame(&sealed))).is_err() {
                    tracing::warn!(request_id = ?packet.request_id, "writer gone, frame dropped");
                }
            }
            Err(e) => tracing::error!(error = %e, "packet seal failed, frame dropped"),
        }
    }

    /// Half-close the write direction.  Idempotent.
    pub fn finish(&self) {
        let _ = self.tx.send(WriterCmd::Finish);
    }

    /// Shut the writer task down.  Idempotent.
    pub fn destroy(&self) {
        let _ = self.tx.send(WriterCmd::Destroy);
    }
}

async fn run_writer(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<WriterCmd>) {
    let mut finished = false;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriterCmd::Frame(bytes) => {
                if finished {
                    tracing::warn!("write side closed, frame dropped");
                    continue;
                }
                if let Err(e) = write_half.write_all(&bytes).await {
                    tracing::warn!(error = %e, "socket not writable, frame dropped");
                    finished = true;
                }
            }
            WriterCmd::Finish => {
                if !finished {
                    finished = true;
                    if let Err(e) = write_half.shutdown().await {
                        tracing::debug!(error = %e, "shutdown on already-closed socket");
                    }
                }
            }
            WriterCmd::Destroy => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip_all_small_lengths() {
        for len in 0..64usize {
            let payload = vec![0xA5u8; len];
            let mut buffer = FrameBuffer::new();
            buffer.push(&frame(&payload));
            assert_eq!(buffer.next_frame().unwrap(), Some(payload), "length {len}");
            assert_eq!(buffer.next_frame().unwrap(), None);
        }
    }

    #[test]
    fn zero_length_frame_roundtrips() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&frame(b""));
        assert_eq!(buffer.next_frame().unwrap(), Some(Vec::new()));
    }

    #[test]
    fn partial_frames_stay_buffered_across_chunks() {
        let framed = frame(b"split across many chunks");
        let mut buffer = FrameBuffer::new();
        for chunk in framed.chunks(3) {
            buffer.push(chunk);
        }
        assert_eq!(buffer.next_frame().unwrap().unwrap(), b"split across many chunks");
    }

    #[test]
    fn coalesced_frames_pop_in_order() {
        let mut bytes = frame(b"first");
        bytes.extend_from_slice(&frame(b"second"));
        bytes.extend_from_slice(&frame(b"third")[..4]); // partial tail

        let mut buffer = FrameBuffer::new();
        buffer.push(&bytes);
        assert_eq!(buffer.next_frame().unwrap().unwrap(), b"first");
        assert_eq!(buffer.next_frame().unwrap().unwrap(), b"second");
        assert_eq!(buffer.next_frame().unwrap(), None);
    }

    #[test]
    fn oversized_declared_length_rejected_and_buffer_discarded() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        buffer.push(&[0u8; 32]);
        assert!(matches!(buffer.next_frame(), Err(CodecError::FrameTooLarge(_))));
        // Buffer was discarded; the decoder is empty again.
        assert_eq!(buffer.next_frame().unwrap(), None);
    }
}
