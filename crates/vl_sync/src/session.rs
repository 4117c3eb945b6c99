//! Session lifecycle: share / connect / run / stop.
//!
//! One endpoint runs at most one sync session at a time.  The sharing
//! device binds an ephemeral port and publishes `ShareInfo` out-of-band;
//! the scanning device connects with it.  Everything session-scoped (the
//! secret, the socket tasks, the transient view) is owned by the
//! `SyncEndpoint` that created it and torn down by [`SyncEndpoint::stop`].
//!
//! ```text
//! Connecting → Exchanging → Finishing → Completed
//!                        ↘ Failed            (reconcile/merge error)
//!              any state → Aborted           (stop() mid-flight)
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use zeroize::Zeroizing;

use vl_crypto::SessionSecret;
use vl_store::keystore::KeyStore;
use vl_store::MergeableStore;

use crate::codec;
use crate::completion::{CompletionDetector, DetectorEvent, Effect, DEFAULT_SETTLE_DELAY};
use crate::engine::Synchronizer;
use crate::error::{CodecError, SyncError};
use crate::transport::{FrameBuffer, FramedSender};
use crate::view;

/// Bound on outbound connection attempts.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 8 * 1024;

/// After this many undecodable frames in one session the stream is
/// treated as unrecoverable.
const MAX_CODEC_FAILURES: u32 = 3;

/// The out-of-band payload the sharing device publishes (QR code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareInfo {
    pub ip: String,
    pub port: u16,
    pub secret_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Exchanging,
    Finishing,
    Completed,
    Failed,
    Aborted,
}

/// Notifications surfaced to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    PeerConnected,
    SyncComplete,
    SyncFailed,
}

pub struct SyncEndpoint {
    store: Arc<Mutex<MergeableStore>>,
    keys: Arc<dyn KeyStore>,
    settle_delay: Duration,
    events_tx: mpsc::UnboundedSender<SyncEvent>,
    active: Mutex<Option<ActiveSession>>,
}

struct ActiveSession {
    /// Present on the sharing side; re-issued if `start_sharing` is
    /// called again while the listener is still up.
    share: Option<ShareInfo>,
    state: Arc<StdMutex<SessionState>>,
    sender: Arc<StdMutex<Option<FramedSender>>>,
    tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

impl ActiveSession {
    fn new(share: Option<ShareInfo>) -> Self {
        Self {
            share,
            state: Arc::new(StdMutex::new(SessionState::Connecting)),
            sender: Arc::new(StdMutex::new(None)),
            tasks: Arc::new(StdMutex::new(Vec::new())),
        }
    }
}

/// Everything a running session's tasks need, cloned out of the endpoint
/// so teardown never races task startup.
#[derive(Clone)]
struct SessionCtx {
    store: Arc<Mutex<MergeableStore>>,
    keys: Arc<dyn KeyStore>,
    vault_key: Arc<Zeroizing<Vec<u8>>>,
    secret: Arc<SessionSecret>,
    settle_delay: Duration,
    events_tx: mpsc::UnboundedSender<SyncEvent>,
    state: Arc<StdMutex<SessionState>>,
    sender_slot: Arc<StdMutex<Option<FramedSender>>>,
    tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

impl SessionCtx {
    fn set_state(&self, state: SessionState) {
        *self.state.lock().expect("session state lock") = state;
    }

    fn push_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().expect("session tasks lock").push(task);
    }
}

/// Single slot for the settle timer.  Re-arming cancels the pending
/// timer instead of leaking a task per idle blip.
struct SettleTimer {
    handle: Option<JoinHandle<()>>,
}

impl SettleTimer {
    fn new() -> Self {
        Self { handle: None }
    }

    fn arm(&mut self, det_tx: mpsc::UnboundedSender<DetectorEvent>, delay: Duration, token: u64) {
        if let Some(old) = self.handle.take() {
            old.abort();
        }
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = det_tx.send(DetectorEvent::SettleElapsed(token));
        }));
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl SyncEndpoint {
    /// Create an endpoint over the durable store and device key store.
    /// Returns the endpoint and the UI event stream.
    pub fn new(
        store: Arc<Mutex<MergeableStore>>,
        keys: Arc<dyn KeyStore>,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        Self::with_settle_delay(store, keys, DEFAULT_SETTLE_DELAY)
    }

    /// As [`SyncEndpoint::new`] with a custom idle-settle delay (the
    /// 1-second default is a heuristic; tests shrink it).
    pub fn with_settle_delay(
        store: Arc<Mutex<MergeableStore>>,
        keys: Arc<dyn KeyStore>,
        settle_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                keys,
                settle_delay,
                events_tx,
                active: Mutex::new(None),
            },
            events_rx,
        )
    }

    /// Act as the sharing device: bind an ephemeral port, generate a
    /// session secret, and wait (in the background) for one peer.
    /// Calling again while the share is still up returns the same info.
    pub async fn start_sharing(&self, vault_key: &[u8]) -> Result<ShareInfo, SyncError> {
        let mut active = self.active.lock().await;
        if let Some(session) = active.as_ref() {
            if let Some(share) = &session.share {
                return Ok(share.clone());
            }
            return Err(SyncError::SessionActive);
        }

        let secret = Arc::new(SessionSecret::generate());
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let port = listener.local_addr()?.port();
        let ip = local_ipv4().unwrap_or_else(|| {
            tracing::warn!("no non-loopback IPv4 address found, falling back to loopback");
            Ipv4Addr::LOCALHOST
        });

        let share = ShareInfo {
            ip: ip.to_string(),
            port,
            secret_key: secret.to_base64(),
        };
        let session = ActiveSession::new(Some(share.clone()));
        let ctx = self.session_ctx(&session, vault_key, secret);

        let accept_ctx = ctx.clone();
        let accept = tokio::spawn(async move {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    tracing::info!(%peer_addr, "peer connected");
                    let _ = accept_ctx.events_tx.send(SyncEvent::PeerConnected);
                    run_session(accept_ctx, socket).await;
                }
                Err(e) => tracing::error!(error = %e, "accept failed"),
            }
        });
        session.tasks.lock().expect("session tasks lock").push(accept);

        *active = Some(session);
        tracing::info!(port, "sharing started");
        Ok(share)
    }

    /// Act as the scanning device: connect to a published `ShareInfo`.
    /// Resolves once the connection is established; the exchange itself
    /// runs in the background and reports through the event stream.
    pub async fn connect(&self, peer: &ShareInfo, vault_key: &[u8]) -> Result<(), SyncError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(SyncError::SessionActive);
        }

        let secret = Arc::new(SessionSecret::from_base64(&peer.secret_key)?);
        let addr = format!("{}:{}", peer.ip, peer.port);
        let socket = match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr.as_str())).await {
            Err(_) => return Err(SyncError::ConnectTimeout(CONNECT_TIMEOUT)),
            Ok(Err(e)) => return Err(SyncError::ConnectFailed(e)),
            Ok(Ok(socket)) => socket,
        };
        tracing::info!(%addr, "connected to sharing device");

        let session = ActiveSession::new(None);
        let ctx = self.session_ctx(&session, vault_key, secret);
        let task = tokio::spawn(run_session(ctx, socket));
        session.tasks.lock().expect("session tasks lock").push(task);

        *active = Some(session);
        Ok(())
    }

    /// Tear the session down: listener, synchronizer transport, socket
    /// tasks.  Safe to call in any state, any number of times.
    pub async fn stop(&self) {
        let Some(session) = self.active.lock().await.take() else {
            return;
        };
        if let Some(sender) = session.sender.lock().expect("session sender lock").take() {
            sender.destroy();
        }
        for task in session.tasks.lock().expect("session tasks lock").drain(..) {
            task.abort();
        }
        {
            let mut state = session.state.lock().expect("session state lock");
            if matches!(
                *state,
                SessionState::Connecting | SessionState::Exchanging | SessionState::Finishing
            ) {
                *state = SessionState::Aborted;
            }
        }
        tracing::info!("sync session stopped");
    }

    /// State of the current (or most recent, if not yet stopped) session.
    pub async fn session_state(&self) -> Option<SessionState> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .map(|session| *session.state.lock().expect("session state lock"))
    }

    fn session_ctx(
        &self,
        session: &ActiveSession,
        vault_key: &[u8],
        secret: Arc<SessionSecret>,
    ) -> SessionCtx {
        SessionCtx {
            store: self.store.clone(),
            keys: self.keys.clone(),
            vault_key: Arc::new(Zeroizing::new(vault_key.to_vec())),
            secret,
            settle_delay: self.settle_delay,
            events_tx: self.events_tx.clone(),
            state: session.state.clone(),
            sender_slot: session.sender.clone(),
            tasks: session.tasks.clone(),
        }
    }
}

async fn run_session(ctx: SessionCtx, socket: TcpStream) {
    if let Err(e) = drive_session(&ctx, socket).await {
        tracing::error!(error = %e, "sync session failed");
        ctx.set_state(SessionState::Failed);
        let _ = ctx.events_tx.send(SyncEvent::SyncFailed);
    }
}

async fn drive_session(ctx: &SessionCtx, socket: TcpStream) -> Result<(), SyncError> {
    // Sanitized view first — no bytes move if the decryption key is absent.
    let view = {
        let store = ctx.store.lock().await;
        view::build_view(&store, &ctx.vault_key, ctx.keys.as_ref())?
    };
    let view = Arc::new(Mutex::new(view));

    let (mut read_half, write_half) = socket.into_split();
    let (sender, writer_task) = FramedSender::spawn(write_half, ctx.secret.clone());
    ctx.push_task(writer_task);
    *ctx.sender_slot.lock().expect("session sender lock") = Some(sender.clone());

    let sync = Arc::new(Synchronizer::new(view.clone(), Arc::new(sender.clone())));
    let mut status_rx = sync.status();

    ctx.set_state(SessionState::Exchanging);

    let (det_tx, mut det_rx) = mpsc::unbounded_channel::<DetectorEvent>();

    // Reader: chunks → frames → packets → engine; EOF → remote finished.
    // A lone codec error discards the buffer and the session limps on;
    // repeated ones mean the stream is garbage and the failure is handed
    // to the session driver for teardown.
    let (fail_tx, mut fail_rx) = oneshot::channel::<CodecError>();
    {
        let det_tx = det_tx.clone();
        let sync = sync.clone();
        let secret = ctx.secret.clone();
        ctx.push_task(tokio::spawn(async move {
            let mut fail_tx = Some(fail_tx);
            let mut buffer = FrameBuffer::new();
            let mut chunk = vec![0u8; READ_CHUNK];
            let mut codec_failures = 0u32;
            let mut last_error = None;
            'read: loop {
                match read_half.read(&mut chunk).await {
                    Ok(0) => {
                        tracing::debug!("peer half-closed");
                        let _ = det_tx.send(DetectorEvent::RemoteEnded);
                        break;
                    }
                    Ok(n) => {
                        buffer.push(&chunk[..n]);
                        loop {
                            match buffer.next_frame() {
                                Ok(Some(payload)) => {
                                    match codec::decode_packet(&payload, &secret) {
                                        Ok(packet) => {
                                            if let Err(e) = sync.handle_packet(packet).await {
                                                tracing::error!(error = %e, "sync packet handling failed");
                                            }
                                        }
                                        Err(e) => {
                                            // Fail fast: the stream cannot be
                                            // resynchronized after a bad frame.
                                            tracing::error!(error = %e, "receive failed, discarding buffer");
                                            buffer.clear();
                                            codec_failures += 1;
                                            last_error = Some(e);
                                            break;
                                        }
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    tracing::error!(error = %e, "receive failed, discarding buffer");
                                    codec_failures += 1;
                                    last_error = Some(e);
                                    break;
                                }
                            }
                        }
                        if codec_failures >= MAX_CODEC_FAILURES {
                            tracing::error!("too many codec failures, giving up on the stream");
                            if let (Some(tx), Some(e)) = (fail_tx.take(), last_error.take()) {
                                let _ = tx.send(e);
                            }
                            break 'read;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "socket read error");
                        let _ = det_tx.send(DetectorEvent::RemoteEnded);
                        break;
                    }
                }
            }
        }));
    }

    // Status watcher: engine status transitions → detector events.
    {
        let det_tx = det_tx.clone();
        ctx.push_task(tokio::spawn(async move {
            loop {
                let status = *status_rx.borrow_and_update();
                if det_tx.send(DetectorEvent::Status(status)).is_err() {
                    break;
                }
                if status_rx.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    sync.start_sync().await?;

    let mut detector = CompletionDetector::new(ctx.settle_delay);
    let mut settle_timer = SettleTimer::new();
    let mut failure = None;
    let mut reader_alive = true;
    loop {
        tokio::select! {
            event = det_rx.recv() => {
                let Some(event) = event else { break };
                match detector.handle(event) {
                    Effect::None => {}
                    Effect::ArmSettle(token) => {
                        settle_timer.arm(det_tx.clone(), ctx.settle_delay, token);
                    }
                    Effect::LocalFinished { session_complete } => {
                        tracing::debug!("local side settled, signalling done-sending");
                        sender.finish();
                        if session_complete {
                            break;
                        }
                    }
                    Effect::Complete => break,
                }
            }
            reported = &mut fail_rx, if reader_alive => {
                match reported {
                    Ok(e) => {
                        failure = Some(e);
                        break;
                    }
                    // Reader exited without reporting; keep draining events.
                    Err(_) => reader_alive = false,
                }
            }
        }
    }
    settle_timer.cancel();

    if let Some(e) = failure {
        sender.destroy();
        return Err(SyncError::Codec(e));
    }

    // Both directions finished: commit exactly once.
    ctx.set_state(SessionState::Finishing);
    let snapshot = view.lock().await.clone();
    let reconciled = view::reconcile_view(&snapshot, &ctx.vault_key, ctx.keys.as_ref())?;
    {
        let mut store = ctx.store.lock().await;
        view::merge_into(&mut store, &reconciled);
    }
    ctx.set_state(SessionState::Completed);
    let _ = ctx.events_tx.send(SyncEvent::SyncComplete);
    sync.destroy();
    tracing::info!("sync session completed");
    Ok(())
}

/// Best-effort local IPv4 discovery: a connected UDP socket's local
/// address is the interface the OS would route through.  No packets are
/// sent.
fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(("192.0.2.1", 9)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}
