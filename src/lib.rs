//! **ez-rtmp** publishes H.264/AAC elementary streams to an RTMP server.
//!
//! Encoder output goes through the FLV muxer (`flv`), which builds sequence headers
//! and tag bodies in pooled buffers, into bounded per-media queues. A sender thread
//! drains the queues into an RTMP connection (`rtmp`) that performs the handshake,
//! the `connect`/`createStream`/`publish` exchange, and chunked message framing.
//!
//! ## Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | `rtmp` | Publisher, connection state machine, packets, AMF0, chunk headers |
//! | `flv` | Annex-B demux, AVC/AAC tag layouts, frame queues, muxer |
//! | `util` | Allocation pool shared by muxer and sender |
//! | `error` | Error enums and the crate `Result` alias |
//!
//! # Example
//!
//! ```rust,ignore
//! use ez_rtmp::{RtmpPublisher, SampleInfo};
//!
//! let publisher = RtmpPublisher::builder()
//!     .connect_checker(checker)
//!     .retries(3)
//!     .build()?;
//! publisher.start("rtmp://live.example.com/app/stream-key")?;
//! publisher.send_video(&annexb, &SampleInfo::new(pts_us).key_frame())?;
//! ```

pub mod error;
pub mod flv;
pub mod rtmp;
pub mod util;

pub use error::{Error, Result};
pub use flv::{FlvMuxer, SampleInfo};
pub use rtmp::auth::Credentials;
pub use rtmp::{
    ConnectChecker, ConnectionConfig, ConnectionState, PublisherBuilder, PublisherConfig,
    RtmpConnection, RtmpPublisher,
};
