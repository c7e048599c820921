// src/flv/flv_muxer.rs - H.264/AAC samples to queued FLV tags
//
// Core features:
// - Annex-B demux with SPS/PPS capture and AVC sequence header emission
// - Keyframe gate after every reset so a stream never starts on a P-frame
// - AAC sequence header synthesized from the first audio sample
// - Tags built in pooled allocations and handed to bounded per-media queues

use crate::error::{MuxError, QueueError, Result};
use crate::flv::aac::{self, aac_packet_type};
use crate::flv::annexb::{self, nal_type, NalUnit};
use crate::flv::avc::{self, avc_packet_type, frame_type, profile_iop};
use crate::flv::flv_frame::{FlvFrame, FlvTagType, SampleInfo};
use crate::flv::frame_queue::{FrameQueue, DEFAULT_QUEUE_CAPACITY};
use crate::util::allocator::{AllocatorPool, AUDIO_ALLOC_SIZE, VIDEO_ALLOC_SIZE};
use crate::util::lock;
use log::{debug, warn};
use std::sync::Mutex;

const INITIAL_VIDEO_ALLOCATIONS: usize = 4;
const INITIAL_AUDIO_ALLOCATIONS: usize = 8;

struct MuxState {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    sequence_header_sent: bool,
    needs_keyframe: bool,
    aac_config_sent: bool,
    profile_iop: u8,
    sample_rate: u32,
    stereo: bool,
}

impl MuxState {
    fn update_sps(&mut self, sps: &[u8]) {
        if self.sps.as_deref() != Some(sps) {
            debug!("SPS updated ({} bytes)", sps.len());
            self.sps = Some(sps.to_vec());
            self.sequence_header_sent = false;
        }
    }

    fn update_pps(&mut self, pps: &[u8]) {
        if self.pps.as_deref() != Some(pps) {
            debug!("PPS updated ({} bytes)", pps.len());
            self.pps = Some(pps.to_vec());
            self.sequence_header_sent = false;
        }
    }

    fn has_parameter_sets(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    fn channels(&self) -> u8 {
        if self.stereo {
            2
        } else {
            1
        }
    }
}

/// FLV muxer
///
/// Turns encoder output into FLV tag bodies. Safe to feed audio and video from
/// different threads; the sender drains [`video_queue`](Self::video_queue) and
/// [`audio_queue`](Self::audio_queue) and gives allocations back through
/// [`release`](Self::release).
pub struct FlvMuxer {
    video_pool: AllocatorPool,
    audio_pool: AllocatorPool,
    video_queue: FrameQueue,
    audio_queue: FrameQueue,
    state: Mutex<MuxState>,
}

impl Default for FlvMuxer {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl FlvMuxer {
    /// Creates a muxer whose audio and video queues hold `queue_capacity` frames each.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            video_pool: AllocatorPool::with_initial_count(VIDEO_ALLOC_SIZE, INITIAL_VIDEO_ALLOCATIONS),
            audio_pool: AllocatorPool::with_initial_count(AUDIO_ALLOC_SIZE, INITIAL_AUDIO_ALLOCATIONS),
            video_queue: FrameQueue::new(queue_capacity),
            audio_queue: FrameQueue::new(queue_capacity),
            state: Mutex::new(MuxState {
                sps: None,
                pps: None,
                sequence_header_sent: false,
                needs_keyframe: true,
                aac_config_sent: false,
                profile_iop: profile_iop::BASELINE,
                sample_rate: 44100,
                stereo: true,
            }),
        }
    }

    pub fn video_queue(&self) -> &FrameQueue {
        &self.video_queue
    }

    pub fn audio_queue(&self) -> &FrameQueue {
        &self.audio_queue
    }

    pub fn set_profile_iop(&self, profile_iop: u8) {
        lock(&self.state).profile_iop = profile_iop;
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        lock(&self.state).sample_rate = sample_rate;
    }

    pub fn set_is_stereo(&self, stereo: bool) {
        lock(&self.state).stereo = stereo;
    }

    /// Provides SPS and PPS out of band. Leading start codes are stripped.
    pub fn set_sps_pps(&self, sps: &[u8], pps: &[u8]) {
        let mut state = lock(&self.state);
        state.update_sps(annexb::strip_start_code(sps));
        state.update_pps(annexb::strip_start_code(pps));
    }

    /// Whether P-frames are currently accepted.
    pub fn is_ready_for_inter_frames(&self) -> bool {
        !lock(&self.state).needs_keyframe
    }

    /// Muxes one Annex-B access unit.
    ///
    /// Parameter sets update the stored SPS/PPS; slices become one video tag.
    /// Frames that cannot be played yet (no SPS/PPS, or waiting for a
    /// keyframe) are dropped silently.
    pub fn write_video_sample(&self, data: &[u8], info: &SampleInfo) -> Result<()> {
        let units = annexb::split_nal_units(data)?;
        let dts = info.dts_ms();

        let mut slices: Vec<NalUnit> = Vec::with_capacity(units.len());
        let mut has_idr = false;
        let mut state = lock(&self.state);
        for unit in &units {
            match unit.nal_type(data) {
                nal_type::SPS => state.update_sps(unit.bytes(data)),
                nal_type::PPS => state.update_pps(unit.bytes(data)),
                nal_type::IDR => {
                    has_idr = true;
                    slices.push(*unit);
                }
                _ if unit.is_slice(data) => slices.push(*unit),
                _ => {}
            }
        }

        let is_key = has_idr || (info.is_key_frame && !slices.is_empty());
        if !state.sequence_header_sent
            && state.has_parameter_sets()
            && (slices.is_empty() || is_key)
        {
            self.queue_sequence_header(&mut state, dts)?;
        }

        if slices.is_empty() {
            return Ok(());
        }
        if !state.has_parameter_sets() {
            debug!("Dropping video frame at {dts}ms: SPS/PPS not known yet");
            return Ok(());
        }
        if state.needs_keyframe {
            if !is_key {
                debug!("Dropping video frame at {dts}ms: waiting for keyframe");
                return Ok(());
            }
            state.needs_keyframe = false;
        }
        drop(state);

        let size = avc::VIDEO_TAG_HEADER_SIZE
            + slices
                .iter()
                .map(|s| avc::NALU_LENGTH_SIZE + s.len)
                .sum::<usize>();
        let mut tag = self.video_pool.allocate(size);
        let frame_type = if is_key {
            frame_type::KEY_FRAME
        } else {
            frame_type::INTER_FRAME
        };
        avc::write_video_tag_header(&mut tag, frame_type, avc_packet_type::NALU);
        for slice in &slices {
            avc::write_nalu(&mut tag, slice.bytes(data));
        }
        self.queue_video(FlvFrame {
            tag,
            tag_type: FlvTagType::Video,
            packet_type: avc_packet_type::NALU,
            frame_type,
            dts,
        });
        Ok(())
    }

    fn queue_sequence_header(&self, state: &mut MuxState, dts: i64) -> Result<(), MuxError> {
        let (Some(sps), Some(pps)) = (state.sps.as_deref(), state.pps.as_deref()) else {
            return Ok(());
        };
        let mut tag = self
            .video_pool
            .allocate(avc::VIDEO_TAG_HEADER_SIZE + avc::decoder_configuration_size(sps, pps));
        avc::write_video_tag_header(&mut tag, frame_type::KEY_FRAME, avc_packet_type::SEQUENCE_HEADER);
        if let Err(e) = avc::write_decoder_configuration(&mut tag, sps, pps, state.profile_iop) {
            self.video_pool.release(tag);
            return Err(e);
        }
        debug!("AVC sequence header queued ({} bytes)", tag.size());

        let queued = self.queue_video(FlvFrame {
            tag,
            tag_type: FlvTagType::Video,
            packet_type: avc_packet_type::SEQUENCE_HEADER,
            frame_type: frame_type::KEY_FRAME,
            dts,
        });
        // A dropped header is rebuilt on the next chance.
        state.sequence_header_sent = queued;
        if queued {
            state.needs_keyframe = false;
        }
        Ok(())
    }

    /// Muxes one AAC sample.
    ///
    /// The first sample after a reset is turned into the AAC sequence header
    /// (AudioSpecificConfig plus ADTS header); its payload is not sent.
    pub fn write_audio_sample(&self, data: &[u8], info: &SampleInfo) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let dts = info.dts_ms();
        let mut state = lock(&self.state);

        if !state.aac_config_sent {
            let channels = state.channels();
            let mut tag = self.audio_pool.allocate(aac::SEQUENCE_HEADER_TAG_SIZE);
            aac::write_audio_tag_header(
                &mut tag,
                state.sample_rate,
                state.stereo,
                aac_packet_type::SEQUENCE_HEADER,
            );
            aac::write_audio_specific_config(&mut tag, state.sample_rate, channels);
            aac::write_adts_header(&mut tag, state.sample_rate, channels, data.len());
            state.aac_config_sent = self.queue_audio(FlvFrame {
                tag,
                tag_type: FlvTagType::Audio,
                packet_type: aac_packet_type::SEQUENCE_HEADER,
                frame_type: 0,
                dts,
            });
            return Ok(());
        }
        if info.is_codec_config {
            return Ok(());
        }

        let mut tag = self
            .audio_pool
            .allocate(aac::AUDIO_TAG_HEADER_SIZE + data.len());
        aac::write_audio_tag_header(&mut tag, state.sample_rate, state.stereo, aac_packet_type::RAW);
        drop(state);
        tag.put_slice(data);
        self.queue_audio(FlvFrame {
            tag,
            tag_type: FlvTagType::Audio,
            packet_type: aac_packet_type::RAW,
            frame_type: 0,
            dts,
        });
        Ok(())
    }

    fn queue_video(&self, frame: FlvFrame) -> bool {
        match self.video_queue.push(frame) {
            Ok(()) => true,
            Err(frame) => {
                warn!("Video queue full, dropping frame at {}ms", frame.dts);
                self.video_pool.release(frame.tag);
                false
            }
        }
    }

    fn queue_audio(&self, frame: FlvFrame) -> bool {
        match self.audio_queue.push(frame) {
            Ok(()) => true,
            Err(frame) => {
                warn!("Audio queue full, dropping frame at {}ms", frame.dts);
                self.audio_pool.release(frame.tag);
                false
            }
        }
    }

    /// Returns a frame's allocation to the pool it came from.
    pub fn release(&self, frame: FlvFrame) {
        match frame.tag_type {
            FlvTagType::Video => self.video_pool.release(frame.tag),
            FlvTagType::Audio => self.audio_pool.release(frame.tag),
        }
    }

    /// Drops every queued frame, releasing its allocation.
    pub fn clear_queues(&self) {
        for frame in self.video_queue.drain() {
            self.video_pool.release(frame.tag);
        }
        for frame in self.audio_queue.drain() {
            self.audio_pool.release(frame.tag);
        }
    }

    /// Resizes both queues, or neither if one of them cannot take `capacity`.
    pub fn resize_queues(&self, capacity: usize) -> Result<(), QueueError> {
        self.video_queue.can_resize(capacity)?;
        self.audio_queue.can_resize(capacity)?;
        self.video_queue.resize(capacity)?;
        self.audio_queue.resize(capacity)
    }

    pub fn queue_capacity(&self) -> usize {
        self.video_queue.capacity()
    }

    /// Frames waiting in both queues.
    pub fn pending_frames(&self) -> usize {
        self.video_queue.len() + self.audio_queue.len()
    }

    /// Re-arms the keyframe gate and both sequence headers.
    ///
    /// SPS/PPS are kept, so the AVC sequence header is rebuilt in front of the
    /// next keyframe.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.sequence_header_sent = false;
        state.needs_keyframe = true;
        state.aac_config_sent = false;
    }

    /// Pooled allocations currently parked for reuse, video then audio.
    pub fn available_allocations(&self) -> (usize, usize) {
        (self.video_pool.available(), self.audio_pool.available())
    }
}
