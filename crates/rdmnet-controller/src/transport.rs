// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream transports used to reach devices.
//!
//! [`TcpTransport`] is what the controller uses on a real network.
//! [`MemoryTransport`] connects to in-process listeners over
//! `tokio::io::duplex` pipes, for simulated devices and tests.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Byte stream carrying one device session.
pub trait SessionStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> SessionStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn SessionStream>;

/// A freshly established connection.
pub struct Connection {
    pub stream: BoxedStream,
    pub peer: SocketAddr,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

pub type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<Connection>> + Send>>;

/// Opens connections to devices. Completion is reported by the future; the
/// caller never blocks on it.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self, addr: SocketAddr, timeout: Duration) -> ConnectFuture;
}

/// TCP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn connect(&self, addr: SocketAddr, timeout: Duration) -> ConnectFuture {
        Box::pin(async move {
            let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out after {:?}", addr, timeout),
                    )
                })??;

            stream.set_nodelay(true).ok();
            let peer = stream.peer_addr()?;

            Ok(Connection {
                stream: Box::new(stream),
                peer,
            })
        })
    }
}

const DEFAULT_PIPE_SIZE: usize = 64 * 1024;

/// In-process transport backed by duplex pipes.
#[derive(Clone)]
pub struct MemoryTransport {
    listeners: Arc<Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<DuplexStream>>>>,
    pipe_size: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            pipe_size: DEFAULT_PIPE_SIZE,
        }
    }

    /// Accept connections addressed to `addr`. Replaces an earlier listener.
    pub fn listen(&self, addr: SocketAddr) -> MemoryListener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().insert(addr, tx);
        MemoryListener { incoming: rx }
    }

    /// Stop accepting connections for `addr`; later attempts are refused.
    pub fn unlisten(&self, addr: &SocketAddr) {
        self.listeners.lock().remove(addr);
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, addr: SocketAddr, _timeout: Duration) -> ConnectFuture {
        let listener = self.listeners.lock().get(&addr).cloned();
        let pipe_size = self.pipe_size;

        Box::pin(async move {
            let refused =
                || io::Error::new(io::ErrorKind::ConnectionRefused, format!("{} refused", addr));

            let listener = listener.ok_or_else(refused)?;
            let (client, server) = tokio::io::duplex(pipe_size);
            listener.send(server).map_err(|_| refused())?;

            Ok(Connection {
                stream: Box::new(client),
                peer: addr,
            })
        })
    }
}

/// Server side of a [`MemoryTransport`] address.
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MemoryListener {
    /// Wait for the next inbound connection.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.incoming.recv().await
    }

    /// Take an already queued connection, if any.
    pub fn try_accept(&mut self) -> Option<DuplexStream> {
        self.incoming.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn addr() -> SocketAddr {
        "10.0.0.5:5569".parse().unwrap()
    }

    #[tokio::test]
    async fn test_memory_connect_refused_without_listener() {
        let transport = MemoryTransport::new();
        let err = transport
            .connect(addr(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_memory_connect_pipes_bytes() {
        let transport = MemoryTransport::new();
        let mut listener = transport.listen(addr());

        let mut conn = transport
            .connect(addr(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(conn.peer, addr());

        let mut server = listener.accept().await.unwrap();
        conn.stream.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_memory_unlisten_refuses() {
        let transport = MemoryTransport::new();
        let _listener = transport.listen(addr());
        transport.unlisten(&addr());
        assert!(transport
            .connect(addr(), Duration::from_secs(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = TcpTransport.connect(addr, Duration::from_secs(2)).await;
        assert!(result.is_err());
    }
}
