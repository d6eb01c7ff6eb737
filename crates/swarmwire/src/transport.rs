//! # Transport Abstraction
//!
//! A minimal, async interface for moving frames between a service and the supervisor.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about messages or payloads.
//!   It moves opaque, already-delimited buffers.
//! - **Fire-and-Forget**: `send` hands a frame over; replies are just more frames on
//!   `recv`. Request/response is built on top of this, not defined here.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use futures::SinkExt;
use futures::StreamExt;
use futures::stream::SplitSink;
use futures::stream::SplitStream;
use tokio::net::TcpStream;
use tokio::net::ToSocketAddrs;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A duplex channel of frames.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Writes one frame.
    ///
    /// # invariants
    /// - Frames sent from one task arrive in the order they were sent.
    /// - Should not interpret the payload content.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Reads the next frame, or `None` once the peer has closed the channel.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Closes the sending half. Subsequent `send` calls fail.
    async fn close(&self) -> Result<()>;
}

type FramedTcp = Framed<TcpStream, LengthDelimitedCodec>;

/// Length-delimited frames over a TCP stream.
pub struct TcpTransport {
    peer: SocketAddr,
    sink: Mutex<SplitSink<FramedTcp, Bytes>>,
    stream: Mutex<SplitStream<FramedTcp>>,
}

impl TcpTransport {
    /// Dials `addr` and wraps the resulting stream.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::ConnectionLost(e.to_string()))?;
        Self::from_stream(stream)
    }

    /// Wraps an accepted stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (sink, stream) = Framed::new(stream, LengthDelimitedCodec::new()).split();
        Ok(Self {
            peer,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(Bytes::copy_from_slice(payload))
            .await
            .map_err(|e| Error::ConnectionLost(e.to_string()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        match self.stream.lock().await.next().await {
            Some(Ok(frame)) => Ok(Some(frame.to_vec())),
            Some(Err(e)) => Err(Error::Io(e.to_string())),
            None => Ok(None),
        }
    }

    async fn close(&self) -> Result<()> {
        self.sink.lock().await.close().await.map_err(Error::from)
    }
}
