//! Transports delivering telegram bytes to a receiver. A datagram transport
//! yields exactly one telegram per received packet; a stream transport
//! yields arbitrarily chunked bytes and therefore owns a stream extractor
//! which reassembles whole telegrams.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use log::{error, warn};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpStream, ToSocketAddrs, UdpSocket};
use tokio::time::{Instant, timeout};

use crate::compact_stream::CompactStreamExtractor;
use crate::msgpack_stream::MsgpackStreamExtractor;

/// Default timeout for a single socket read.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(3);
/// Default deadline within which a stream transport must assemble at least
/// one telegram per receive call.
pub const DEFAULT_TELEGRAM_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("no data received within {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// OS error code, when one is available.
    pub fn code(&self) -> Option<i32> {
        match self {
            TransportError::Io(err) => err.raw_os_error(),
            TransportError::Timeout(_) => None,
        }
    }
}

/// Assembles whole telegrams from arbitrarily chunked stream data.
pub trait StreamExtractor {
    fn extract_data_packages(&mut self, data: &[u8]) -> Vec<Bytes>;
}

impl StreamExtractor for CompactStreamExtractor {
    fn extract_data_packages(&mut self, data: &[u8]) -> Vec<Bytes> {
        CompactStreamExtractor::extract_data_packages(self, data)
    }
}

impl StreamExtractor for MsgpackStreamExtractor {
    fn extract_data_packages(&mut self, data: &[u8]) -> Vec<Bytes> {
        MsgpackStreamExtractor::extract_data_packages(self, data)
    }
}

/// Source of telegram-sized byte chunks.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Blocks until a telegram is available and returns it together with an
    /// identifier of its sender. An empty chunk signals a timeout or error;
    /// the error, if any, is available through [`Transport::last_error`].
    async fn receive_new_scan_segment(&mut self) -> (Bytes, String);

    /// True while the last receive saw no transport error.
    fn has_no_error(&self) -> bool {
        self.last_error().is_none()
    }

    /// The error of the last receive, if it had one.
    fn last_error(&self) -> Option<&TransportError>;

    /// Number of telegrams handed out so far.
    fn data_counter(&self) -> u64;
}

/// Receives one telegram per datagram, as sent by sensors streaming over
/// UDP.
pub struct UdpTransport {
    socket: UdpSocket,
    recv_buf: Vec<u8>,
    receive_timeout: Duration,
    counter: u64,
    last_error: Option<TransportError>,
}

impl UdpTransport {
    /// Binds a datagram socket on the given local address. `buffer_size`
    /// must hold the largest expected telegram; one datagram carries one
    /// telegram.
    pub async fn bind(addr: impl ToSocketAddrs, buffer_size: usize) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(UdpTransport {
            socket,
            recv_buf: vec![0; buffer_size],
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            counter: 0,
            last_error: None,
        })
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }
}

impl Transport for UdpTransport {
    async fn receive_new_scan_segment(&mut self) -> (Bytes, String) {
        self.last_error = None;
        match timeout(self.receive_timeout, self.socket.recv_from(&mut self.recv_buf)).await {
            Err(_) => {
                warn!("timed out waiting for a datagram");
                self.last_error = Some(TransportError::Timeout(self.receive_timeout));
                (Bytes::new(), String::new())
            }
            Ok(Err(err)) => {
                error!("failed to receive datagram: {err}");
                self.last_error = Some(TransportError::Io(err));
                (Bytes::new(), String::new())
            }
            Ok(Ok((len, sender))) => {
                self.counter += 1;
                (
                    Bytes::copy_from_slice(&self.recv_buf[..len]),
                    sender.to_string(),
                )
            }
        }
    }

    fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }

    fn data_counter(&self) -> u64 {
        self.counter
    }
}

/// Receives telegrams from a connection-oriented stream. Chunks read from
/// the stream run through the extractor; completed telegrams queue up so one
/// stream read can satisfy several receive calls.
pub struct TcpTransport<E, S = TcpStream> {
    stream: S,
    extractor: E,
    pending: VecDeque<Bytes>,
    read_buf: Vec<u8>,
    peer: String,
    read_timeout: Duration,
    telegram_deadline: Duration,
    counter: u64,
    last_error: Option<TransportError>,
}

pub type CompactTcpTransport = TcpTransport<CompactStreamExtractor>;
pub type MsgpackTcpTransport = TcpTransport<MsgpackStreamExtractor>;

impl<E: StreamExtractor> TcpTransport<E> {
    /// Connects to a sensor. `buffer_size` is the chunk size of a single
    /// socket read; a value in the order of one scan segment avoids both
    /// excessive read calls and oversized buffers.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        extractor: E,
        buffer_size: usize,
    ) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        Ok(Self::from_stream(stream, extractor, buffer_size, peer))
    }
}

impl<E: StreamExtractor, S: AsyncRead + Unpin> TcpTransport<E, S> {
    /// Wraps an already connected stream.
    pub fn from_stream(stream: S, extractor: E, buffer_size: usize, peer: String) -> Self {
        TcpTransport {
            stream,
            extractor,
            pending: VecDeque::new(),
            read_buf: vec![0; buffer_size],
            peer,
            read_timeout: DEFAULT_RECEIVE_TIMEOUT,
            telegram_deadline: DEFAULT_TELEGRAM_DEADLINE,
            counter: 0,
            last_error: None,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_telegram_deadline(mut self, telegram_deadline: Duration) -> Self {
        self.telegram_deadline = telegram_deadline;
        self
    }
}

impl<E: StreamExtractor, S: AsyncRead + Unpin> Transport for TcpTransport<E, S> {
    async fn receive_new_scan_segment(&mut self) -> (Bytes, String) {
        self.last_error = None;
        let deadline = Instant::now() + self.telegram_deadline;
        loop {
            if let Some(telegram) = self.pending.pop_front() {
                self.counter += 1;
                return (telegram, self.peer.clone());
            }
            if Instant::now() >= deadline {
                warn!(
                    "no complete telegram found in the stream within {:?}",
                    self.telegram_deadline
                );
                self.last_error = Some(TransportError::Timeout(self.telegram_deadline));
                return (Bytes::new(), String::new());
            }
            match timeout(self.read_timeout, self.stream.read(&mut self.read_buf)).await {
                Err(_) => {
                    warn!("stream read timed out");
                    self.last_error = Some(TransportError::Timeout(self.read_timeout));
                    return (Bytes::new(), String::new());
                }
                Ok(Err(err)) => {
                    error!("failed to read from stream: {err}");
                    self.last_error = Some(TransportError::Io(err));
                    return (Bytes::new(), String::new());
                }
                Ok(Ok(0)) => {
                    error!("stream closed by peer");
                    self.last_error =
                        Some(TransportError::Io(std::io::ErrorKind::UnexpectedEof.into()));
                    return (Bytes::new(), String::new());
                }
                Ok(Ok(len)) => {
                    self.pending
                        .extend(self.extractor.extract_data_packages(&self.read_buf[..len]));
                }
            }
        }
    }

    fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }

    fn data_counter(&self) -> u64 {
        self.counter
    }
}
