// src/rtmp/transport.rs - Byte stream to the server (TCP, optionally TLS)
//
// Core features:
// - Separate reader/writer handles over one socket
// - Read timeout switchable between handshake and polling values
// - shutdown(Both) on the raw socket unblocks any pending read or write
//
// TLS streams cannot be split, so both handles share one locked stream and
// the reader only holds the lock for one timed read.

use crate::error::{ConnectionError, Result};
use crate::rtmp::endpoint::Endpoint;
use log::{debug, warn};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(feature = "rtmps")]
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

enum Stream {
    Tcp(TcpStream),
    #[cfg(feature = "rtmps")]
    Tls(Arc<Mutex<native_tls::TlsStream<TcpStream>>>),
}

impl Stream {
    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Stream::Tcp(s) => Ok(Stream::Tcp(s.try_clone()?)),
            #[cfg(feature = "rtmps")]
            Stream::Tls(s) => Ok(Stream::Tls(Arc::clone(s))),
        }
    }
}

/// An open connection to the server.
pub struct Transport {
    raw: TcpStream,
    stream: Stream,
}

impl Transport {
    /// Connects to `endpoint`, negotiating TLS for `rtmps`.
    pub fn open(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        if endpoint.tls && !cfg!(feature = "rtmps") {
            return Err(ConnectionError::TlsUnsupported.into());
        }

        let raw = connect_tcp(&endpoint.host, endpoint.port, timeout)?;
        raw.set_nodelay(true)?;
        raw.set_read_timeout(Some(timeout))?;
        raw.set_write_timeout(Some(timeout))?;
        debug!("TCP connected to {}:{}", endpoint.host, endpoint.port);

        let stream = if endpoint.tls {
            Self::tls_stream(&endpoint.host, &raw)?
        } else {
            Stream::Tcp(raw.try_clone()?)
        };
        Ok(Self { raw, stream })
    }

    #[cfg(feature = "rtmps")]
    fn tls_stream(host: &str, raw: &TcpStream) -> Result<Stream> {
        let connector = native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
            .build()
            .map_err(|e| ConnectionError::Tls(e.to_string()))?;
        let tls = connector
            .connect(host, raw.try_clone()?)
            .map_err(|e| ConnectionError::Tls(e.to_string()))?;
        debug!("TLS session established with {}", host);
        Ok(Stream::Tls(Arc::new(Mutex::new(tls))))
    }

    #[cfg(not(feature = "rtmps"))]
    fn tls_stream(_host: &str, _raw: &TcpStream) -> Result<Stream> {
        Err(ConnectionError::TlsUnsupported.into())
    }

    pub fn reader(&self) -> io::Result<TransportReader> {
        Ok(TransportReader {
            stream: self.stream.try_clone()?,
        })
    }

    pub fn writer(&self) -> io::Result<TransportWriter> {
        Ok(TransportWriter {
            stream: self.stream.try_clone()?,
        })
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.raw.set_read_timeout(timeout)
    }

    /// Handle that can close the socket from another thread.
    pub fn closer(&self) -> io::Result<TcpStream> {
        self.raw.try_clone()
    }
}

/// Closes both directions, unblocking readers and writers.
pub fn shutdown_socket(socket: &TcpStream) {
    if let Err(e) = socket.shutdown(Shutdown::Both) {
        if e.kind() != io::ErrorKind::NotConnected {
            warn!("Socket shutdown error: {}", e);
        }
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address resolved for {}", host),
        )
    }))
}

pub struct TransportReader {
    stream: Stream,
}

impl Read for TransportReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stream {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(feature = "rtmps")]
            Stream::Tls(s) => s.lock().unwrap_or_else(PoisonError::into_inner).read(buf),
        }
    }
}

pub struct TransportWriter {
    stream: Stream,
}

impl Write for TransportWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.stream {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(feature = "rtmps")]
            Stream::Tls(s) => s.lock().unwrap_or_else(PoisonError::into_inner).write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stream {
            Stream::Tcp(s) => s.flush(),
            #[cfg(feature = "rtmps")]
            Stream::Tls(s) => s.lock().unwrap_or_else(PoisonError::into_inner).flush(),
        }
    }
}

/// Whether a read error only means the poll interval elapsed.
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
