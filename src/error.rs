// src/error.rs - Crate-wide error types
//
// Every fallible operation returns `crate::error::Result`. Domain errors are
// grouped per subsystem and folded into the top-level `Error` via `#[from]`.

use std::io;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("AMF0 error: {0}")]
    Amf(#[from] AmfError),

    #[error("RTMP protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("FLV mux error: {0}")]
    Mux(#[from] MuxError),

    #[error("{0}")]
    Connection(#[from] ConnectionError),

    #[error("Frame queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Publisher build error: {0}")]
    Build(#[from] BuildError),

    #[error("Worker thread exited")]
    ThreadExited,
}

#[derive(thiserror::Error, Debug)]
pub enum AmfError {
    #[error("Unsupported AMF0 type marker: {0:#04x}")]
    UnsupportedType(u8),

    #[error("Truncated AMF0 value")]
    Truncated,

    #[error("Missing AMF0 object end marker")]
    MissingEndMarker,

    #[error("AMF0 string is not valid UTF-8")]
    InvalidString,

    #[error("AMF0 string too long: {0} bytes")]
    StringTooLong(usize),

    #[error("AMF0 values nested deeper than {0} levels")]
    NestingTooDeep(usize),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown RTMP message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("Unsupported chunk stream id: {0}")]
    UnsupportedChunkStreamId(u32),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(u32),

    #[error("Message of {0} bytes exceeds the 24-bit length field")]
    MessageTooLarge(usize),

    #[error("Malformed {kind} message body")]
    MalformedBody { kind: &'static str },

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

#[derive(thiserror::Error, Debug)]
pub enum MuxError {
    #[error("Malformed Annex-B buffer: {0}")]
    MalformedAnnexB(&'static str),

    #[error("SPS too short to carry profile and level")]
    InvalidSps,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Endpoint malformed, should be: rtmp://ip:port/appname/streamname ({0})")]
    EndpointMalformed(String),

    #[error("rtmps requested but TLS support is not compiled in")]
    TlsUnsupported,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Auth error: {0}")]
    AuthFailed(String),

    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Fail to {0}, time out")]
    Timeout(&'static str),

    #[error("Wait for {0} cancelled")]
    Cancelled(&'static str),

    #[error("Connection failed: {0}")]
    Failed(String),
}

impl ConnectionError {
    /// Malformed endpoints never become valid by retrying.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ConnectionError::EndpointMalformed(_) | ConnectionError::TlsUnsupported
        )
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("Cannot resize frame queue to {requested}: {backlog} frames are pending")]
    BacklogExceedsCapacity { requested: usize, backlog: usize },

    #[error("Frame queue capacity must be greater than zero")]
    ZeroCapacity,
}

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),
}
