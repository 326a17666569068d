//! # Connection
//!
//! One framed, bidirectional connection over a [`Transport`].
//!
//! A [`Connection`] moves through three states: uninitialized, active and
//! disposed. [`Connection::start`] takes ownership of a transport, applies the
//! socket options, optionally runs the TLS handshake and then spawns two tasks:
//!
//! - the **receive task**, which reads up to `receive_buffer_size` bytes at a
//!   time, decodes complete units with [`FrameCodec`], drops keep-alive units
//!   and hands every other unit to [`ConnectionHandler::on_message`];
//! - the **keep-alive task** (when enabled), which writes a keep-alive unit
//!   after each interval without a send.
//!
//! Sends serialize a batch of payloads into one buffer and write it while
//! holding the writer lock, so the bytes of concurrent batches never
//! interleave. Each send counts as outstanding until its write finishes.
//!
//! Disposal happens exactly once, whichever of a local `disconnect()`, a
//! remote close or an I/O failure gets there first. The first reason wins and
//! is the one passed to [`ConnectionHandler::on_disconnected`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use once_cell::sync::OnceCell;
use rustls::client::ServerCertVerifier;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ConnectionConfig;
use crate::core::codec::{Frame, FrameCodec};
use crate::core::payload::Payload;
use crate::error::constants::{ERR_ALREADY_STARTED, ERR_DISPOSED, ERR_EMPTY_BATCH, ERR_NOT_STARTED};
use crate::error::{ProtocolError, Result};
use crate::protocol::handler::{ConnectionHandler, DisconnectReason};
use crate::protocol::keepalive::KeepAliveTimer;
use crate::transport::{tls, Role, Stream, Transport};
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::timeout::{io_deadline, with_timeout_error, CLOSE_TIMEOUT};

const UNINITIALIZED: u8 = 0;
const STARTING: u8 = 1;
const ACTIVE: u8 = 2;
const DISPOSED: u8 = 3;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Counters for one connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub keepalives_sent: u64,
    pub keepalives_received: u64,
    pub outstanding_sends: usize,
}

struct Inner {
    id: u64,
    state: AtomicU8,
    handler: Arc<dyn ConnectionHandler>,
    verifier: OnceCell<Arc<dyn ServerCertVerifier>>,

    config: OnceCell<ConnectionConfig>,
    remote_addr: OnceCell<Option<SocketAddr>>,
    keepalive: OnceCell<Arc<KeepAliveTimer>>,

    writer: Mutex<Option<BoxedWriter>>,
    shutdown: CancellationToken,
    closed: CancellationToken,

    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    keepalives_sent: AtomicU64,
    keepalives_received: AtomicU64,
    outstanding_sends: AtomicUsize,
}

/// Handle to a framed connection.
///
/// Cloning is cheap and every clone refers to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// Keeps a send counted as outstanding until dropped
struct OutstandingSend<'a>(&'a AtomicUsize);

impl<'a> OutstandingSend<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for OutstandingSend<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

enum WriteOutcome {
    Written,
    Released,
    Failed(std::io::Error),
}

impl Connection {
    /// Create an unstarted connection that reports events to `handler`
    pub fn new<H: ConnectionHandler>(handler: H) -> Self {
        Self::with_shared_handler(Arc::new(handler))
    }

    /// Create an unstarted connection around an already shared handler
    pub fn with_shared_handler(handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                state: AtomicU8::new(UNINITIALIZED),
                handler,
                verifier: OnceCell::new(),
                config: OnceCell::new(),
                remote_addr: OnceCell::new(),
                keepalive: OnceCell::new(),
                writer: Mutex::new(None),
                shutdown: CancellationToken::new(),
                closed: CancellationToken::new(),
                bytes_sent: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
                messages_sent: AtomicU64::new(0),
                messages_received: AtomicU64::new(0),
                keepalives_sent: AtomicU64::new(0),
                keepalives_received: AtomicU64::new(0),
                outstanding_sends: AtomicUsize::new(0),
            }),
        }
    }

    /// Validate the server certificate with `verifier` instead of WebPKI.
    ///
    /// Only used in the client role with TLS enabled, and only when set
    /// before [`start`](Self::start).
    pub fn with_certificate_verifier(self, verifier: Arc<dyn ServerCertVerifier>) -> Self {
        if self.inner.verifier.set(verifier).is_err() {
            warn!(conn = self.inner.id, "Certificate verifier already set; keeping the first");
        }
        self
    }

    /// Take ownership of `transport` and begin framing over it.
    ///
    /// Fails with `InvalidArgument` for an invalid configuration and with
    /// `InvalidState` when the connection was already started or disposed.
    /// A failed TLS handshake disposes the connection without a disconnect
    /// callback, and a `disconnect()` that lands before start completes makes
    /// it fail with `ConnectionClosed`.
    #[instrument(skip_all, fields(conn = self.inner.id, role = ?role))]
    pub async fn start<T: Transport>(
        &self,
        role: Role,
        transport: T,
        config: ConnectionConfig,
    ) -> Result<()> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ProtocolError::InvalidArgument(errors.join("; ")));
        }

        match self.inner.state.compare_exchange(
            UNINITIALIZED,
            STARTING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(DISPOSED) => return Err(ProtocolError::InvalidState(ERR_DISPOSED)),
            Err(_) => return Err(ProtocolError::InvalidState(ERR_ALREADY_STARTED)),
        }

        match self.establish(role, transport, config).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Connection failed to start");
                global_metrics().start_failed();
                self.release_unstarted();
                Err(e)
            }
        }
    }

    async fn establish<T: Transport>(
        &self,
        role: Role,
        transport: T,
        config: ConnectionConfig,
    ) -> Result<()> {
        let inner = &self.inner;

        transport.configure(&config)?;
        let remote = transport.peer_addr();

        let stream = if config.tls.enabled {
            let _timer = Timer::start("tls_handshake");
            let verifier = inner.verifier.get().cloned();
            let handshake = tls::handshake(role, transport, &config.tls, verifier);
            tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => return Err(ProtocolError::ConnectionClosed),
                secured = with_timeout_error(handshake, config.handshake_timeout) => secured?,
            }
        } else {
            Stream::Plain(transport)
        };
        let secure = stream.is_secure();
        let (reader, writer) = tokio::io::split(stream);

        let receive_buffer_size = config.receive_buffer_size;
        let receive_timeout = config.receive_timeout;
        let keepalive = config
            .keepalive
            .enabled
            .then(|| Arc::new(KeepAliveTimer::new(config.keepalive.interval)));

        // The state guard above makes each of these the only write.
        let _ = inner.remote_addr.set(remote);
        let _ = inner.config.set(config);
        if let Some(ref timer) = keepalive {
            let _ = inner.keepalive.set(timer.clone());
        }

        let mut slot = inner.writer.lock().await;
        if inner
            .state
            .compare_exchange(STARTING, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ProtocolError::ConnectionClosed);
        }
        *slot = Some(Box::new(writer));

        global_metrics().connection_established();
        info!(remote = ?remote, tls = secure, "Connection started");

        // The writer lock is held until the tasks are running, so a concurrent
        // dispose cannot report the disconnect ahead of the connect.
        inner.handler.on_connected(self);

        if let Some(timer) = keepalive {
            debug!(interval_ms = timer.interval().as_millis() as u64, "Keep-alive enabled");
            tokio::spawn(keepalive_loop(self.clone(), timer));
        }
        tokio::spawn(receive_loop(
            self.clone(),
            Box::new(reader),
            receive_buffer_size,
            receive_timeout,
        ));

        drop(slot);
        Ok(())
    }

    /// Send a batch of payloads as one contiguous write
    pub async fn send(&self, payloads: &[Payload]) -> Result<()> {
        self.send_with(payloads, |_| {}).await
    }

    /// Send a batch and call `on_complete` with the bytes written once the
    /// write finishes.
    ///
    /// Oversized payloads and empty batches are rejected before anything is
    /// written. A send on a disposed connection is ignored and `on_complete`
    /// is not called.
    pub async fn send_with<F>(&self, payloads: &[Payload], on_complete: F) -> Result<()>
    where
        F: FnOnce(usize),
    {
        if payloads.is_empty() {
            return Err(ProtocolError::InvalidArgument(ERR_EMPTY_BATCH.into()));
        }
        let buf = FrameCodec::serialize(payloads)?;

        match self.inner.state.load(Ordering::Acquire) {
            ACTIVE => {}
            DISPOSED => {
                debug!(conn = self.inner.id, "Send ignored: connection disposed");
                return Ok(());
            }
            _ => return Err(ProtocolError::InvalidState(ERR_NOT_STARTED)),
        }

        if let Some(written) = self.write_buffer(buf, payloads.len() as u64).await {
            on_complete(written);
        }
        Ok(())
    }

    /// Queue a batch for sending from a background task.
    ///
    /// Validation happens before returning; the write itself does not block
    /// the caller. Batches posted from separate calls carry no ordering
    /// guarantee relative to each other; use [`send`](Self::send) when order
    /// matters.
    pub fn post(&self, payloads: Vec<Payload>) -> Result<()> {
        if payloads.is_empty() {
            return Err(ProtocolError::InvalidArgument(ERR_EMPTY_BATCH.into()));
        }
        let buf = FrameCodec::serialize(&payloads)?;

        match self.inner.state.load(Ordering::Acquire) {
            ACTIVE => {}
            DISPOSED => return Ok(()),
            _ => return Err(ProtocolError::InvalidState(ERR_NOT_STARTED)),
        }

        let conn = self.clone();
        let messages = payloads.len() as u64;
        tokio::spawn(async move {
            conn.write_buffer(buf, messages).await;
        });
        Ok(())
    }

    /// Write one serialized buffer. Returns the byte count when it reached the
    /// transport, `None` when it was dropped because the connection went away.
    async fn write_buffer(&self, buf: Bytes, messages: u64) -> Option<usize> {
        let inner = &self.inner;

        let outcome = {
            let _outstanding = OutstandingSend::new(&inner.outstanding_sends);
            let mut slot = inner.writer.lock().await;
            match slot.as_mut() {
                None => WriteOutcome::Released,
                Some(writer) => {
                    tokio::select! {
                        biased;
                        _ = inner.shutdown.cancelled() => WriteOutcome::Released,
                        written = write_and_flush(writer, &buf) => match written {
                            Ok(()) => WriteOutcome::Written,
                            Err(e) => WriteOutcome::Failed(e),
                        },
                    }
                }
            }
        };

        if let Some(timer) = inner.keepalive.get() {
            timer.reset();
        }

        match outcome {
            WriteOutcome::Written => {
                let len = buf.len();
                inner.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
                inner.messages_sent.fetch_add(messages, Ordering::Relaxed);
                global_metrics().write_completed(messages, len as u64);
                trace!(conn = inner.id, bytes = len, messages, "Write complete");
                Some(len)
            }
            WriteOutcome::Released => {
                trace!(conn = inner.id, "Write dropped: transport released");
                None
            }
            WriteOutcome::Failed(e) => {
                if !self.is_disposed() {
                    warn!(conn = inner.id, error = %e, "Write failed");
                    self.dispose(DisconnectReason::Interrupted).await;
                }
                None
            }
        }
    }

    /// Dispose the connection with [`DisconnectReason::LocalRequest`].
    ///
    /// Safe to call any number of times and from any task; only the first
    /// call has an effect. Disconnecting an unstarted connection releases it
    /// without a callback.
    pub async fn disconnect(&self) {
        self.dispose(DisconnectReason::LocalRequest).await;
    }

    /// Resolve once the connection has been disposed and its callback has run
    pub async fn wait_disconnected(&self) {
        self.inner.closed.cancelled().await;
    }

    async fn dispose(&self, reason: DisconnectReason) {
        let inner = &self.inner;
        let previous = inner.state.swap(DISPOSED, Ordering::AcqRel);
        if previous == DISPOSED {
            return;
        }

        inner.shutdown.cancel();

        let writer = inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            match tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => trace!(conn = inner.id, error = %e, "Transport shutdown error ignored"),
                Err(_) => trace!(conn = inner.id, "Transport shutdown timed out"),
            }
        }

        if previous == ACTIVE {
            global_metrics().connection_closed(reason);
            info!(
                conn = inner.id,
                reason = %reason,
                bytes_sent = inner.bytes_sent.load(Ordering::Relaxed),
                bytes_received = inner.bytes_received.load(Ordering::Relaxed),
                "Connection disposed"
            );
            inner.handler.on_disconnected(self, reason);
        }

        inner.closed.cancel();
    }

    fn release_unstarted(&self) {
        if self.inner.state.swap(DISPOSED, Ordering::AcqRel) != DISPOSED {
            self.inner.shutdown.cancel();
            self.inner.closed.cancel();
        }
    }

    /// Process-unique identifier, used in log fields
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Address of the peer, when the transport exposes one
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr.get().copied().flatten()
    }

    /// Settings the connection was started with
    pub fn config(&self) -> Option<&ConnectionConfig> {
        self.inner.config.get()
    }

    /// Whether the connection has started and not yet been disposed
    pub fn is_active(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == ACTIVE
    }

    /// Whether teardown has run
    pub fn is_disposed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == DISPOSED
    }

    /// Total bytes written, keep-alive units included
    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total bytes read since the connection started
    pub fn bytes_received(&self) -> u64 {
        self.inner.bytes_received.load(Ordering::Relaxed)
    }

    /// Sends whose writes have not finished yet
    pub fn outstanding_sends(&self) -> usize {
        self.inner.outstanding_sends.load(Ordering::Acquire)
    }

    /// Snapshot of the per-connection counters
    pub fn stats(&self) -> ConnectionStats {
        let inner = &self.inner;
        ConnectionStats {
            bytes_sent: inner.bytes_sent.load(Ordering::Relaxed),
            bytes_received: inner.bytes_received.load(Ordering::Relaxed),
            messages_sent: inner.messages_sent.load(Ordering::Relaxed),
            messages_received: inner.messages_received.load(Ordering::Relaxed),
            keepalives_sent: inner.keepalives_sent.load(Ordering::Relaxed),
            keepalives_received: inner.keepalives_received.load(Ordering::Relaxed),
            outstanding_sends: inner.outstanding_sends.load(Ordering::Acquire),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.state.load(Ordering::Acquire) {
            UNINITIALIZED => "uninitialized",
            STARTING => "starting",
            ACTIVE => "active",
            _ => "disposed",
        };
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &state)
            .field("remote_addr", &self.remote_addr())
            .finish()
    }
}

async fn write_and_flush(writer: &mut BoxedWriter, buf: &[u8]) -> std::io::Result<()> {
    writer.write_all(buf).await?;
    writer.flush().await
}

async fn keepalive_loop(conn: Connection, timer: Arc<KeepAliveTimer>) {
    let shutdown = conn.inner.shutdown.clone();
    let conn = &conn;
    timer
        .run(shutdown, move || async move {
            if conn.write_buffer(FrameCodec::keepalive(), 0).await.is_some() {
                conn.inner.keepalives_sent.fetch_add(1, Ordering::Relaxed);
                global_metrics().keepalive_sent();
                trace!(conn = conn.inner.id, "Keep-alive sent");
            }
        })
        .await;
    trace!(conn = conn.inner.id, "Keep-alive task stopped");
}

async fn receive_loop(
    conn: Connection,
    mut reader: BoxedReader,
    receive_buffer_size: usize,
    receive_timeout: Option<Duration>,
) {
    let inner = &conn.inner;
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::with_capacity(receive_buffer_size);

    let reason = loop {
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(Frame::KeepAlive)) => {
                    inner.keepalives_received.fetch_add(1, Ordering::Relaxed);
                    global_metrics().keepalive_received();
                    trace!(conn = inner.id, "Keep-alive received");
                }
                Ok(Some(Frame::Message(payload))) => {
                    if !conn.is_active() {
                        return;
                    }
                    inner.messages_received.fetch_add(1, Ordering::Relaxed);
                    global_metrics().message_received();
                    inner
                        .handler
                        .on_message(&conn, payload.opcode, payload.body);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(conn = inner.id, error = %e, "Undecodable data on connection");
                    conn.dispose(DisconnectReason::Interrupted).await;
                    return;
                }
            }
        }

        buf.reserve(receive_buffer_size);
        let mut window = (&mut buf).limit(receive_buffer_size);

        let read = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return,
            read = io_deadline(reader.read_buf(&mut window), receive_timeout) => read,
        };

        match read {
            Ok(0) => break DisconnectReason::RemoteClosed,
            Ok(n) => {
                inner.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                global_metrics().bytes_read(n as u64);
            }
            Err(e) => {
                if conn.is_disposed() {
                    return;
                }
                warn!(conn = inner.id, error = %e, "Read failed");
                break DisconnectReason::Interrupted;
            }
        }
    };

    debug!(conn = inner.id, reason = %reason, "Receive loop finished");
    conn.dispose(reason).await;
}
