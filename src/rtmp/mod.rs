//! The **RTMP** module implements the publishing side of RTMP: the handshake, AMF0
//! commands, chunked message framing, and a publisher (`RtmpPublisher`) that feeds
//! muxed FLV tags to a server such as nginx-rtmp, SRS or a CDN ingest.
//!
//! # Architecture
//!
//! Each publisher runs two threads:
//! - **rtmp-publisher-sender**: connects, publishes, then drains the audio/video frame queues
//! - **rtmp-rx**: reads server messages, answers pings and acknowledgements, and
//!   resolves the pending `connect`/`publish` waits
//!
//! Writes from both threads go through one buffered writer; the chunk stream state
//! lives in `RtmpSessionInfo` behind its own lock (writer first, then session).
//!
//! ## Key Components
//!
//! - `RtmpConnection`: Connect/createStream/publish state machine plus media sends
//! - `RtmpPacket`: Typed RTMP messages with body encode/decode and chunked `write_to`
//! - `RtmpDecoder`: Incremental chunk reassembly over a growing byte buffer
//! - `Amf0`: AMF0 value codec used by commands and `onMetaData`
//! - `ConnectChecker`: Callback sink for lifecycle events
//!
//! ## Connection States
//!
//! | State | Entered when | Left when |
//! |-------|--------------|-----------|
//! | Disconnected | Initial, after close or failure | `connect()` |
//! | Handshaking | TCP/TLS open | C0/C1/C2 exchanged |
//! | ConnectSent | `connect` command written | `_result` / `_error` / timeout |
//! | Connected | `NetConnection.Connect.Success` | `publish()` |
//! | StreamCreating | createStream sent | `NetStream.Publish.Start` / rejection |
//! | Publishing | Publish accepted | `close()` or socket failure |
//! | Closing | `close()` in progress | Teardown done |
//!
//! ## Failure Reporting
//!
//! | Condition | Callback | Reason text |
//! |-----------|----------|-------------|
//! | Bad URL | `on_connection_failed` | `Endpoint malformed, should be: ...` |
//! | No `_result` in time | `on_connection_failed` | `Fail to connect, time out` |
//! | Auth rejected | `on_auth_error` | - |
//! | Publish refused | `on_connection_failed` | Server description |
//! | No publish answer | `on_connection_failed` | `Error configure stream, publish permitted failed` |
//! | Socket lost | `on_connection_failed` | `Error reading packet: ...` / `Error send packet: ...` |
//!
//! # Example
//!
//! ```rust,ignore
//! struct Checker;
//!
//! impl ConnectChecker for Checker {
//!     fn on_connection_success(&self) { println!("live"); }
//!     fn on_connection_failed(&self, reason: &str) { eprintln!("failed: {reason}"); }
//!     fn on_new_bitrate(&self, bitrate: u64) { println!("{bitrate} bps"); }
//!     fn on_disconnect(&self) {}
//!     fn on_auth_error(&self) {}
//!     fn on_auth_success(&self) {}
//! }
//!
//! let publisher = RtmpPublisher::builder()
//!     .connect_checker(Arc::new(Checker))
//!     .video_resolution(1280, 720)
//!     .build()?;
//! publisher.start("rtmp://localhost:1935/live/stream")?;
//!
//! // Encoder output
//! publisher.send_video(&access_unit, &SampleInfo::new(pts_us).key_frame())?;
//! publisher.send_audio(&aac_frame, &SampleInfo::new(pts_us))?;
//!
//! publisher.stop();
//! ```
//!
//! **Feature Flag**: `rtmps://` URLs need the `rtmps` feature (native-tls).

pub mod amf0;
pub mod auth;
mod bitrate;
pub mod connect_checker;
pub mod endpoint;
mod handshake;
pub mod rtmp_connection;
pub mod rtmp_decoder;
pub mod rtmp_header;
pub mod rtmp_packet;
pub mod rtmp_publisher;
pub mod session_info;
mod transport;

#[cfg(test)]
mod test_server;

pub use connect_checker::ConnectChecker;
pub use rtmp_connection::{ConnectionConfig, ConnectionState, RtmpConnection};
pub use rtmp_publisher::{PublisherBuilder, PublisherConfig, RtmpPublisher};
