//! Outbound mode: FreeSWITCH connects to us from the `socket` dialplan application.

use crate::channel::Channel;
use crate::connection::lock;
use crate::error::{EslError, EslResult};
use crate::socket::EventSocket;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Source of raw connections for an [`OutboundListener`].
pub trait Acceptor: Send + Sync {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

type Tracked = Arc<StdMutex<HashMap<u64, EventSocket>>>;

/// Accepts outbound connections and turns them into ready [`Channel`]s.
///
/// Every accepted socket is tracked until it is disposed. Running the accept loop is
/// up to the caller.
pub struct OutboundListener<A = TcpListener> {
    acceptor: A,
    connections: Tracked,
    shutdown: CancellationToken,
}

impl OutboundListener<TcpListener> {
    /// Listen on `addr`, e.g. `"0.0.0.0:8084"`.
    pub async fn bind(addr: impl ToSocketAddrs) -> EslResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening for outbound connections on {:?}", listener.local_addr().ok());
        Ok(Self::new(listener))
    }

    pub fn local_addr(&self) -> EslResult<SocketAddr> {
        Ok(self
            .acceptor
            .local_addr()?)
    }
}

impl<A: Acceptor> OutboundListener<A> {
    pub fn new(acceptor: A) -> Self {
        Self {
            acceptor,
            connections: Arc::new(StdMutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Accept the next connection and wrap it, without any handshake.
    ///
    /// Fails with [`EslError::Cancelled`] after [`shutdown`](Self::shutdown).
    pub async fn accept_socket(&self) -> EslResult<EventSocket> {
        let (stream, peer) = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(EslError::Cancelled),
            accepted = self.acceptor.accept() => accepted?,
        };
        let socket = EventSocket::new(stream);
        debug!("({}) Accepted outbound connection from {}", socket.id(), peer);
        self.track(socket.clone());
        Ok(socket)
    }

    /// Accept connections until one completes the channel handshake.
    ///
    /// Connections that fail the handshake are logged and closed.
    pub async fn accept(&self) -> EslResult<Channel> {
        loop {
            let socket = self
                .accept_socket()
                .await?;
            match Channel::create(socket.clone()).await {
                Ok(channel) => {
                    info!("({}) [{}] New channel", socket.id(), channel.uuid());
                    return Ok(channel);
                }
                Err(e) => {
                    error!("({}) Outbound handshake failed: {}", socket.id(), e);
                    socket.dispose();
                }
            }
        }
    }

    /// Number of accepted connections not yet disposed.
    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Stop accepting and dispose every tracked connection.
    pub fn shutdown(&self) {
        self.shutdown
            .cancel();
        let sockets: Vec<EventSocket> = lock(&self.connections)
            .drain()
            .map(|(_, socket)| socket)
            .collect();
        for socket in sockets {
            socket.dispose();
        }
    }

    fn track(&self, socket: EventSocket) {
        let id = socket.id();
        if self
            .shutdown
            .is_cancelled()
        {
            socket.dispose();
            return;
        }
        lock(&self.connections).insert(id, socket.clone());
        let connections = self
            .connections
            .clone();
        tokio::spawn(async move {
            socket
                .disposed()
                .await;
            lock(&connections).remove(&id);
            debug!("({}) Connection released", id);
        });
    }
}

impl<A> Drop for OutboundListener<A> {
    fn drop(&mut self) {
        self.shutdown
            .cancel();
    }
}
