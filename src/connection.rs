//! TCP socket wrapper: serialized writes and a broadcast of raw chunks

use crate::constants::{CHUNK_CHANNEL_CAPACITY, SOCKET_BUF_SIZE};
use crate::error::{EslError, EslResult};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the stream.
    ConnectionClosed,
    /// A read or write failed.
    IoError(String),
    /// `dispose()` was called.
    ClientRequested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ClientRequested => write!(f, "client requested"),
        }
    }
}

/// Liveness of a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected(DisconnectReason),
}

struct ConnectionInner {
    id: u64,
    peer: Option<SocketAddr>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: StdMutex<Option<OwnedReadHalf>>,
    chunks: StdMutex<Option<broadcast::Sender<Bytes>>>,
    started: AtomicBool,
    disposed: AtomicBool,
    shutdown: CancellationToken,
    status_tx: watch::Sender<ConnectionStatus>,
}

/// Owns one TCP stream.
///
/// Writes are serialized through an async mutex. Reads run on a dedicated task once
/// [`start`](Self::start) is called and are fanned out, replayless, to every
/// [`subscribe`](Self::subscribe)r. End of stream, an I/O error or [`dispose`](Self::dispose)
/// all dispose the connection, which closes the subscriber channels.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("status", &*self.inner.status_tx.borrow())
            .finish()
    }
}

impl Connection {
    /// Wrap a connected stream. Nothing is read until [`start`](Self::start).
    pub fn new(stream: TcpStream) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let peer = stream
            .peer_addr()
            .ok();
        if let Err(e) = stream.set_nodelay(true) {
            trace!("({}) Could not set TCP_NODELAY: {}", id, e);
        }
        let (reader, writer) = stream.into_split();
        let (chunks, _) = broadcast::channel(CHUNK_CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(ConnectionStatus::Connected);
        debug!("({}) Connection created for {:?}", id, peer);
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                peer,
                writer: Mutex::new(Some(writer)),
                reader: StdMutex::new(Some(reader)),
                chunks: StdMutex::new(Some(chunks)),
                started: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                status_tx,
            }),
        }
    }

    /// Connect to `host:port`, failing with [`EslError::Timeout`] after `connect_timeout`.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> EslResult<Self> {
        let timeout_ms = u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX);
        match timeout(connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => {
                debug!("[CONNECT] TCP connection established to {}:{}", host, port);
                Ok(Self::new(stream))
            }
            Ok(Err(e)) => {
                warn!("[CONNECT] TCP connect to {}:{} failed: {}", host, port, e);
                Err(EslError::Io(e))
            }
            Err(_) => {
                warn!("[CONNECT] TCP connect timed out after {}ms", timeout_ms);
                Err(EslError::Timeout { timeout_ms })
            }
        }
    }

    /// Process-unique connection id used in log lines.
    pub fn id(&self) -> u64 {
        self.inner
            .id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner
            .peer
    }

    /// Receive raw chunks read after this call. `None` once disposed.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Bytes>> {
        lock(&self.inner.chunks)
            .as_ref()
            .map(broadcast::Sender::subscribe)
    }

    /// Spawn the read task. Later calls do nothing.
    pub fn start(&self) {
        if self
            .inner
            .started
            .swap(true, Ordering::AcqRel)
        {
            return;
        }
        let reader = lock(&self.inner.reader).take();
        let chunks = lock(&self.inner.chunks).clone();
        match (reader, chunks) {
            (Some(reader), Some(chunks)) => {
                tokio::spawn(read_loop(self.clone(), reader, chunks));
            }
            _ => debug!("({}) start() after dispose, not reading", self.inner.id),
        }
    }

    /// Write `bytes`. Concurrent callers queue behind each other.
    pub async fn send(&self, bytes: &[u8]) -> EslResult<()> {
        if !self.is_connected() {
            return Err(EslError::Disconnected);
        }
        let mut guard = self
            .inner
            .writer
            .lock()
            .await;
        let writer = guard
            .as_mut()
            .ok_or(EslError::Disconnected)?;
        let result = async {
            writer
                .write_all(bytes)
                .await?;
            writer
                .flush()
                .await
        }
        .await;
        drop(guard);
        if let Err(e) = result {
            error!("({}) Write failed: {}", self.inner.id, e);
            self.dispose_with(DisconnectReason::IoError(e.to_string()));
            return Err(EslError::Io(e));
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        !self
            .inner
            .disposed
            .load(Ordering::Acquire)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner
            .status_tx
            .borrow()
            .clone()
    }

    /// Close the socket and end the chunk stream. Idempotent.
    pub fn dispose(&self) {
        self.dispose_with(DisconnectReason::ClientRequested);
    }

    fn dispose_with(&self, reason: DisconnectReason) {
        if self
            .inner
            .disposed
            .swap(true, Ordering::AcqRel)
        {
            return;
        }
        debug!("({}) Disposing connection: {}", self.inner.id, reason);
        self.inner
            .shutdown
            .cancel();
        lock(&self.inner.chunks).take();
        lock(&self.inner.reader).take();
        match self
            .inner
            .writer
            .try_lock()
        {
            Ok(mut writer) => {
                writer.take();
            }
            Err(_) => {
                let inner = self
                    .inner
                    .clone();
                tokio::spawn(async move {
                    inner
                        .writer
                        .lock()
                        .await
                        .take();
                });
            }
        }
        self.inner
            .status_tx
            .send_replace(ConnectionStatus::Disconnected(reason));
    }

    /// Resolves once the connection has been disposed.
    pub async fn disposed(&self) {
        self.inner
            .shutdown
            .cancelled()
            .await
    }
}

pub(crate) fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn read_loop(connection: Connection, mut reader: OwnedReadHalf, chunks: broadcast::Sender<Bytes>) {
    let id = connection.id();
    let mut buf = BytesMut::with_capacity(SOCKET_BUF_SIZE);
    let reason = loop {
        buf.reserve(SOCKET_BUF_SIZE);
        tokio::select! {
            _ = connection.inner.shutdown.cancelled() => break DisconnectReason::ClientRequested,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    debug!("({}) Socket closed by peer", id);
                    break DisconnectReason::ConnectionClosed;
                }
                Ok(n) => {
                    trace!("({}) Read {} bytes", id, n);
                    if chunks.send(buf.split().freeze()).is_err() {
                        trace!("({}) No chunk subscribers", id);
                    }
                }
                Err(e) => {
                    error!("({}) Socket read failed: {}", id, e);
                    break DisconnectReason::IoError(e.to_string());
                }
            }
        }
    };
    drop(chunks);
    drop(reader);
    connection.dispose_with(reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener
            .local_addr()
            .unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (Connection::new(client.unwrap()), server.unwrap().0)
    }

    #[tokio::test]
    async fn chunks_reach_subscribers() {
        let (connection, mut peer) = pair().await;
        let mut rx = connection
            .subscribe()
            .unwrap();
        connection.start();
        peer.write_all(b"hello")
            .await
            .unwrap();
        let chunk = rx
            .recv()
            .await
            .unwrap();
        assert_eq!(&chunk[..], b"hello");
    }

    #[tokio::test]
    async fn peer_close_disposes_and_ends_stream() {
        let (connection, peer) = pair().await;
        let mut rx = connection
            .subscribe()
            .unwrap();
        connection.start();
        drop(peer);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        connection
            .disposed()
            .await;
        assert_eq!(
            connection.status(),
            ConnectionStatus::Disconnected(DisconnectReason::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn send_after_dispose_is_disconnected() {
        let (connection, _peer) = pair().await;
        connection.start();
        connection.dispose();
        connection.dispose();
        assert!(matches!(
            connection
                .send(b"api status\n\n")
                .await,
            Err(EslError::Disconnected)
        ));
        assert!(connection
            .subscribe()
            .is_none());
    }

    #[tokio::test]
    async fn writes_arrive_in_order() {
        let (connection, mut peer) = pair().await;
        connection.start();
        let a = connection.clone();
        let b = connection.clone();
        a.send(b"first\n")
            .await
            .unwrap();
        b.send(b"second\n")
            .await
            .unwrap();
        let mut buf = vec![0u8; 13];
        peer.read_exact(&mut buf)
            .await
            .unwrap();
        assert_eq!(&buf, b"first\nsecond\n");
    }
}
