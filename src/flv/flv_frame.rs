// src/flv/flv_frame.rs - Muxed FLV tags waiting to be published

use crate::flv::aac::aac_packet_type;
use crate::flv::avc::{avc_packet_type, frame_type};
use crate::util::allocator::Allocation;

/// Which media a tag carries; values are the FLV tag types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlvTagType {
    Audio = 8,
    Video = 9,
}

/// Metadata of one encoded sample handed to the muxer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleInfo {
    /// Presentation time in microseconds.
    pub presentation_time_us: i64,
    pub is_key_frame: bool,
    /// The sample only carries codec configuration (SPS/PPS or AudioSpecificConfig).
    pub is_codec_config: bool,
}

impl SampleInfo {
    pub fn new(presentation_time_us: i64) -> Self {
        Self {
            presentation_time_us,
            ..Default::default()
        }
    }

    pub fn key_frame(mut self) -> Self {
        self.is_key_frame = true;
        self
    }

    pub fn codec_config(mut self) -> Self {
        self.is_codec_config = true;
        self
    }

    /// Decode timestamp in milliseconds.
    pub fn dts_ms(&self) -> i64 {
        self.presentation_time_us / 1000
    }
}

/// One complete FLV tag body plus what the sender needs to route it.
///
/// The tag bytes live in a pooled [`Allocation`] that must go back to the
/// pool it came from once the frame is sent or discarded.
#[derive(Debug)]
pub struct FlvFrame {
    pub tag: Allocation,
    pub tag_type: FlvTagType,
    /// AVC or AAC packet type.
    pub packet_type: u8,
    /// FLV video frame type, 0 for audio.
    pub frame_type: u8,
    /// Decode timestamp in milliseconds.
    pub dts: i64,
}

impl FlvFrame {
    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.tag_type == FlvTagType::Audio
    }

    pub fn is_keyframe(&self) -> bool {
        self.is_video() && self.frame_type == frame_type::KEY_FRAME
    }

    pub fn is_sequence_header(&self) -> bool {
        match self.tag_type {
            FlvTagType::Video => self.packet_type == avc_packet_type::SEQUENCE_HEADER,
            FlvTagType::Audio => self.packet_type == aac_packet_type::SEQUENCE_HEADER,
        }
    }
}
