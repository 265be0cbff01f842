//! Reliable newline-delimited transport over TCP

use crate::error::{Result, TransportError};
use crate::Transport;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use swarm_core::{EncodingError, Message, NodeAddress};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// One TCP connection carrying `kind|payload` lines
pub struct TcpTransport {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer_addr: SocketAddr,
    closed: bool,
}

impl TcpTransport {
    /// Connect to a remote node
    pub async fn connect(addr: &NodeAddress) -> Result<Self> {
        let stream = TcpStream::connect((addr.host.as_str(), addr.port))
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        Self::from_stream(stream)
    }

    /// Connect, giving up after `timeout`
    pub async fn connect_timeout(addr: &NodeAddress, timeout: Duration) -> Result<Self> {
        match tokio::time::timeout(timeout, Self::connect(addr)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Connect {
                addr: addr.to_string(),
                source: std::io::Error::new(ErrorKind::TimedOut, "connect timed out"),
            }),
        }
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {}: {}", peer_addr, e);
        }
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            peer_addr,
            closed: false,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Send a message and wait for the single reply
    pub async fn request(&mut self, message: &Message) -> Result<Message> {
        self.send(message).await?;
        self.receive().await
    }

    fn map_io_error(err: std::io::Error) -> TransportError {
        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected => TransportError::ConnectionClosed,
            _ => TransportError::Io(err),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, message: &Message) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let mut line = message.encode()?;
        if line.contains(['\n', '\r']) {
            return Err(EncodingError::LineBreak.into());
        }
        line.push('\n');

        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(Self::map_io_error)?;
        self.writer.flush().await.map_err(Self::map_io_error)?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Message> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let mut buf = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(Self::map_io_error)?;
        if read == 0 {
            return Err(TransportError::ConnectionClosed);
        }

        // Garbled bytes still decode to a best-effort message
        let line = String::from_utf8_lossy(&buf);
        Ok(Message::decode(line.trim_end_matches(['\r', '\n'])))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.writer.shutdown().await {
            if e.kind() != ErrorKind::NotConnected {
                warn!("Error shutting down connection to {}: {}", self.peer_addr, e);
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Listening side of the reliable transport
pub struct TcpListenerTransport {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
}

impl TcpListenerTransport {
    /// Bind to `host:port`
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| TransportError::Bind {
                addr: format!("{}:{}", host, port),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener: Some(listener),
            local_addr,
        })
    }

    /// Bind starting at `port`, moving to the next port each time the
    /// address is already in use, for at most `max_attempts` tries.
    /// Other bind errors are returned immediately.
    pub async fn bind_with_retry(host: &str, port: u16, max_attempts: u32) -> Result<Self> {
        let mut port = port;
        let mut attempt = 1;

        loop {
            match Self::bind(host, port).await {
                Ok(listener) => return Ok(listener),
                Err(e) if e.is_address_in_use() && attempt < max_attempts => {
                    let Some(next) = port.checked_add(1) else {
                        return Err(e);
                    };
                    warn!("{}; retrying on port {}", e, next);
                    port = next;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next peer
    pub async fn accept(&mut self) -> Result<TcpTransport> {
        let listener = self.listener.as_ref().ok_or(TransportError::Closed)?;
        let (stream, peer_addr) = listener.accept().await?;
        debug!("Accepted connection from {}", peer_addr);
        TcpTransport::from_stream(stream)
    }

    /// Stop listening. Closing twice is not an error.
    pub fn close(&mut self) {
        if self.listener.take().is_some() {
            debug!("Stopped listening on {}", self.local_addr);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_none()
    }
}
