//! Connection management.
//!
//! RESP carries no request ids, so replies are matched to requests purely by
//! order. A connection keeps a FIFO of pending slots; the read loop resolves
//! the oldest slot for every decoded reply. Sends push their slot and hand
//! their frame to the writer task under one lock, so queue order and wire
//! order can never disagree.

use crate::capability::GeoProbe;
use crate::error::ClientError;
use bytes::BytesMut;
use parking_lot::Mutex;
use respline_protocol::{Command, Decoder, Encoder, ProtocolError, Reply, DEFAULT_PORT};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// How the client re-establishes a connection that failed underneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Connection attempts per reconnect before giving up.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout. Also bounds how long `disconnect` waits for replies.
    pub request_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Run the capability probes right after connecting instead of lazily.
    pub probe_on_connect: bool,
    /// How geo support is detected.
    pub geo_probe: GeoProbe,
    /// Reconnect policy (optional).
    pub reconnect: Option<ReconnectPolicy>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            probe_on_connect: false,
            geo_probe: GeoProbe::Live,
            reconnect: None,
        }
    }

    /// Returns `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_probe_on_connect(mut self, probe: bool) -> Self {
        self.probe_on_connect = probe;
        self
    }

    pub fn with_geo_probe(mut self, probe: GeoProbe) -> Self {
        self.geo_probe = probe;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

/// Lifecycle of a connection.
///
/// `Connecting -> Ready -> (Draining | Failed) -> Closed`
///
/// A `Connection` exists only once its transport is up, so it starts in
/// `Ready`. `Connecting` is what `Client::state` reports while a new
/// transport is being established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    /// Graceful shutdown: new sends are refused, pending replies still arrive.
    Draining,
    /// Protocol violation or transport failure: pending requests were failed.
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Draining => "draining",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

type Completion = oneshot::Sender<Result<Reply, ClientError>>;

/// One in-flight command awaiting its reply.
struct PendingRequest {
    command: String,
    tx: Completion,
}

/// Why a connection is being torn down.
enum Teardown {
    Protocol(ProtocolError),
    Transport,
}

/// State shared by senders, the read loop and the writer task.
struct Shared {
    state: ConnectionState,
    pending: VecDeque<PendingRequest>,
    /// Frames queued for the writer task. `None` once the transport is released.
    outbound: Option<mpsc::UnboundedSender<BytesMut>>,
}

/// A pipelined connection to a Redis-compatible server.
pub struct Connection {
    config: ConnectionConfig,
    peer: String,
    shared: Mutex<Shared>,
    /// Signalled whenever the pending queue empties or the connection dies.
    drained: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Connects to `config.host:config.port` over TCP.
    pub async fn connect(config: ConnectionConfig) -> Result<Arc<Self>, ClientError> {
        let addr = config.addr();
        tracing::debug!("Connecting to {}...", addr);

        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection to {} timed out", addr);
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection to {} failed: {}", addr, e);
            ClientError::Io(e)
        })?;

        // Configure TCP options for small request/reply frames
        stream.set_nodelay(true).ok();

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or(addr);
        let conn = Self::start(stream, config, peer);
        tracing::info!("Connected to {}", conn.peer);
        Ok(conn)
    }

    /// Runs a connection over an already established transport.
    pub fn from_stream<S>(stream: S, config: ConnectionConfig) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = config.addr();
        Self::start(stream, config, peer)
    }

    fn start<S>(stream: S, config: ConnectionConfig, peer: String) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, frames) = mpsc::unbounded_channel();
        let buffer_size = config.read_buffer_size;

        let conn = Arc::new(Self {
            config,
            peer,
            shared: Mutex::new(Shared {
                state: ConnectionState::Ready,
                pending: VecDeque::new(),
                outbound: Some(outbound),
            }),
            drained: Notify::new(),
            tasks: Mutex::new(Vec::with_capacity(2)),
        });

        let reader = tokio::spawn(read_loop(
            Arc::downgrade(&conn),
            read_half,
            buffer_size,
        ));
        let writer = tokio::spawn(write_loop(Arc::downgrade(&conn), write_half, frames));
        conn.tasks.lock().extend([reader, writer]);
        conn
    }

    /// Sends a command and waits for its reply.
    ///
    /// Error replies are returned as `Reply::Error`; turning them into
    /// failures is up to the caller.
    pub async fn send(&self, command: Command) -> Result<Reply, ClientError> {
        let mut receivers = self.enqueue(std::slice::from_ref(&command))?;
        let rx = receivers.pop().ok_or(ClientError::NotConnected)?;
        self.await_reply(command.name(), rx).await
    }

    /// Sends several commands back to back and waits for all their replies.
    ///
    /// The replies come back in command order. An error reply to one command
    /// appears in its slot and does not affect the others.
    pub async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>, ClientError> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let receivers = self.enqueue(&commands)?;

        let mut replies = Vec::with_capacity(commands.len());
        for (command, rx) in commands.iter().zip(receivers) {
            replies.push(self.await_reply(command.name(), rx).await?);
        }
        Ok(replies)
    }

    /// Queues pending slots and their frames in one step.
    fn enqueue(
        &self,
        commands: &[Command],
    ) -> Result<Vec<oneshot::Receiver<Result<Reply, ClientError>>>, ClientError> {
        let frame = Encoder::encode_pipeline(commands);

        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        match shared.state {
            ConnectionState::Ready => {}
            ConnectionState::Draining => return Err(ClientError::Draining),
            _ => return Err(ClientError::NotConnected),
        }
        let outbound = shared.outbound.as_ref().ok_or(ClientError::NotConnected)?;

        let mut receivers = Vec::with_capacity(commands.len());
        for command in commands {
            let (tx, rx) = oneshot::channel();
            shared.pending.push_back(PendingRequest {
                command: command.name().to_string(),
                tx,
            });
            receivers.push(rx);
        }

        if outbound.send(frame).is_err() {
            for _ in commands {
                shared.pending.pop_back();
            }
            return Err(ClientError::ConnectionClosed);
        }

        tracing::debug!(
            "Queued {} command(s) to {}, {} pending",
            commands.len(),
            self.peer,
            shared.pending.len()
        );
        Ok(receivers)
    }

    async fn await_reply(
        &self,
        command: &str,
        rx: oneshot::Receiver<Result<Reply, ClientError>>,
    ) -> Result<Reply, ClientError> {
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            // The slot stays queued; its reply is consumed in order and dropped.
            Err(_) => {
                tracing::debug!("{} to {} timed out", command, self.peer);
                Err(ClientError::Timeout)
            }
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Ok(Ok(result)) => result,
        }
    }

    /// Resolves the oldest pending slot with `reply`.
    fn resolve_next(&self, reply: Reply) -> Result<(), ProtocolError> {
        let (pending, now_empty) = {
            let mut shared = self.shared.lock();
            let pending = shared
                .pending
                .pop_front()
                .ok_or(ProtocolError::UnsolicitedReply)?;
            (pending, shared.pending.is_empty())
        };

        if pending.tx.send(Ok(reply)).is_err() {
            tracing::debug!("Discarding reply to abandoned {}", pending.command);
        }
        if now_empty {
            self.drained.notify_waiters();
        }
        Ok(())
    }

    /// Releases the transport and fails every pending request.
    fn teardown(&self, next: ConnectionState, cause: Teardown) {
        let pending = {
            let mut shared = self.shared.lock();
            if shared.state == ConnectionState::Closed {
                return;
            }
            shared.state = next;
            shared.outbound = None;
            std::mem::take(&mut shared.pending)
        };

        match &cause {
            Teardown::Protocol(e) => tracing::warn!(
                "Protocol error on {}: {} ({} pending request(s) failed)",
                self.peer,
                e,
                pending.len()
            ),
            Teardown::Transport if !pending.is_empty() => tracing::warn!(
                "Connection to {} lost with {} pending request(s)",
                self.peer,
                pending.len()
            ),
            Teardown::Transport => tracing::debug!("Connection to {} {}", self.peer, next),
        }

        for request in pending {
            let err = match &cause {
                Teardown::Protocol(e) => ClientError::Protocol(e.clone()),
                Teardown::Transport => ClientError::ConnectionClosed,
            };
            let _ = request.tx.send(Err(err));
        }
        self.drained.notify_waiters();
    }

    /// Gracefully closes the connection.
    ///
    /// New sends are refused immediately; replies already in flight are
    /// awaited for up to the request timeout. Anything still pending after
    /// that fails with `ConnectionClosed`.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        {
            let mut shared = self.shared.lock();
            match shared.state {
                ConnectionState::Closed => return Ok(()),
                ConnectionState::Ready => shared.state = ConnectionState::Draining,
                ConnectionState::Connecting
                | ConnectionState::Draining
                | ConnectionState::Failed => {}
            }
        }
        tracing::debug!("Draining connection to {}...", self.peer);

        if tokio::time::timeout(self.config.request_timeout, self.wait_drained())
            .await
            .is_err()
        {
            tracing::warn!(
                "Closing {} with {} reply(ies) outstanding",
                self.peer,
                self.pending_count()
            );
        }

        self.teardown(ConnectionState::Closed, Teardown::Transport);
        if let Some(reader) = self.tasks.lock().first() {
            reader.abort();
        }
        tracing::info!("Disconnected from {}", self.peer);
        Ok(())
    }

    async fn wait_drained(&self) {
        loop {
            // Registered before the check so a wakeup in between is not lost
            let notified = self.drained.notified();
            let done = {
                let shared = self.shared.lock();
                shared.pending.is_empty()
                    || matches!(
                        shared.state,
                        ConnectionState::Failed | ConnectionState::Closed
                    )
            };
            if done {
                return;
            }
            notified.await;
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Returns whether new commands are accepted.
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Returns the number of requests awaiting replies, abandoned ones included.
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Returns the remote address.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Reads replies and resolves pending slots in order (single consumer).
async fn read_loop<R>(weak: Weak<Connection>, mut reader: R, buffer_size: usize)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Decoder::with_capacity(buffer_size);
    let mut buf = vec![0u8; buffer_size];

    loop {
        let read = reader.read(&mut buf).await;
        let Some(conn) = weak.upgrade() else {
            return;
        };

        let n = match read {
            Ok(0) => {
                let next = match conn.state() {
                    ConnectionState::Draining => ConnectionState::Closed,
                    _ => ConnectionState::Failed,
                };
                tracing::debug!("read_loop: {} closed the connection", conn.peer);
                conn.teardown(next, Teardown::Transport);
                return;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("read_loop: read from {} failed: {}", conn.peer, e);
                conn.teardown(ConnectionState::Failed, Teardown::Transport);
                return;
            }
        };

        tracing::trace!("read_loop: received {} bytes", n);
        decoder.extend(&buf[..n]);

        loop {
            let decoded = decoder
                .decode_reply()
                .and_then(|reply| match reply {
                    Some(reply) => conn.resolve_next(reply).map(|_| true),
                    None => Ok(false),
                });
            match decoded {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    conn.teardown(ConnectionState::Failed, Teardown::Protocol(e));
                    return;
                }
            }
        }
    }
}

/// Writes queued frames in order; exits once the queue is closed.
async fn write_loop<W>(
    conn: Weak<Connection>,
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<BytesMut>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            if let Some(conn) = conn.upgrade() {
                tracing::debug!("write_loop: write to {} failed: {}", conn.peer, e);
                conn.teardown(ConnectionState::Failed, Teardown::Transport);
            }
            return;
        }
    }
    let _ = writer.shutdown().await;
}
