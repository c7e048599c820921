//! The **FLV** module turns raw encoder output (H.264 Annex-B access units and AAC
//! samples) into FLV tag bodies ready to be wrapped in RTMP audio/video messages.
//!
//! ## Key Components
//!
//! - `FlvMuxer`: Demuxes Annex-B, tracks SPS/PPS, builds sequence headers and tags
//! - `FrameQueue`: Bounded per-media queue between the muxer and the sender thread
//! - `FlvFrame`: One tag body in a pooled `Allocation`, plus routing metadata
//!
//! ## Tag Layouts
//!
//! | Tag | Layout |
//! |-----|--------|
//! | AVC sequence header | `0x17 0x00 00 00 00` + AVCDecoderConfigurationRecord |
//! | AVC NALU | `(frame_type<<4 \| 7) 0x01 00 00 00` + (u32 length + NAL)* |
//! | AAC sequence header | `flags 0x00` + AudioSpecificConfig (2) + ADTS header (7) |
//! | AAC raw | `flags 0x01` + raw AAC frame |
//!
//! ## Gating Rules
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | No SPS/PPS yet | Picture frames dropped |
//! | After `reset()` | Frames dropped until a keyframe (or fresh sequence header) |
//! | SPS/PPS unchanged and already sent | No new sequence header |
//! | Queue full | Newest frame dropped and counted |
//!
//! # Example
//!
//! ```rust,ignore
//! let muxer = FlvMuxer::default();
//! muxer.write_video_sample(&access_unit, &SampleInfo::new(pts_us).key_frame())?;
//! muxer.write_audio_sample(&aac, &SampleInfo::new(pts_us))?;
//!
//! while let Some(frame) = muxer.video_queue().poll(Duration::from_millis(1)) {
//!     connection.publish_video_data(frame.tag.as_slice(), frame.dts)?;
//!     muxer.release(frame);
//! }
//! ```

pub mod aac;
pub mod annexb;
pub mod avc;
pub mod flv_frame;
pub mod flv_muxer;
pub mod frame_queue;

pub use flv_frame::{FlvFrame, FlvTagType, SampleInfo};
pub use flv_muxer::FlvMuxer;
pub use frame_queue::FrameQueue;
