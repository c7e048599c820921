// src/flv/aac.rs - FLV audio tag bodies for AAC
//
// Core features:
// - Audio tag header byte (format, rate, size, channels)
// - AudioSpecificConfig for AAC-LC
// - ADTS header appended to the sequence header for servers that expect it

use crate::util::allocator::Allocation;

/// FLV sound format id for AAC.
pub const AAC_SOUND_FORMAT: u8 = 10;

/// AAC packet types.
pub mod aac_packet_type {
    pub const SEQUENCE_HEADER: u8 = 0;
    pub const RAW: u8 = 1;
}

/// AAC-LC object type.
const AAC_LC: u8 = 2;

pub const AUDIO_TAG_HEADER_SIZE: usize = 2;
pub const AUDIO_SPECIFIC_CONFIG_SIZE: usize = 2;
pub const ADTS_HEADER_SIZE: usize = 7;

/// Total size of the audio sequence-header tag body.
pub const SEQUENCE_HEADER_TAG_SIZE: usize =
    AUDIO_TAG_HEADER_SIZE + AUDIO_SPECIFIC_CONFIG_SIZE + ADTS_HEADER_SIZE;

const SAMPLE_RATES: [u32; 11] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025,
];

/// Sampling frequency index of `sample_rate`, 44100 Hz (index 4) when unknown.
pub fn sampling_frequency_index(sample_rate: u32) -> u8 {
    SAMPLE_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .map_or(4, |i| i as u8)
}

/// FLV sound rate code: 1 for 11 kHz, 2 for 22 kHz, 3 otherwise.
fn flv_sound_rate(sample_rate: u32) -> u8 {
    match sample_rate {
        22050 => 2,
        11025 => 1,
        _ => 3,
    }
}

/// Writes the 2-byte audio tag header.
pub fn write_audio_tag_header(
    out: &mut Allocation,
    sample_rate: u32,
    stereo: bool,
    packet_type: u8,
) {
    // 16-bit samples
    let flags = (AAC_SOUND_FORMAT << 4) | (flv_sound_rate(sample_rate) << 2) | (1 << 1) | u8::from(stereo);
    out.put(flags);
    out.put(packet_type);
}

/// Appends the AAC-LC AudioSpecificConfig.
pub fn write_audio_specific_config(out: &mut Allocation, sample_rate: u32, channels: u8) {
    let sfi = sampling_frequency_index(sample_rate);
    out.put((AAC_LC << 3) | (sfi >> 1));
    out.put(((sfi & 0x01) << 7) | ((channels & 0x0f) << 3));
}

/// Appends a 7-byte ADTS header (no CRC) describing a frame of
/// `payload_len` bytes.
pub fn write_adts_header(out: &mut Allocation, sample_rate: u32, channels: u8, payload_len: usize) {
    let sfi = sampling_frequency_index(sample_rate);
    let frame_len = (payload_len + ADTS_HEADER_SIZE) & 0x1fff;
    let profile = AAC_LC - 1;

    out.put(0xff);
    out.put(0xf1); // MPEG-4, layer 0, protection absent
    out.put((profile << 6) | (sfi << 2) | ((channels >> 2) & 0x01));
    out.put(((channels & 0x03) << 6) | ((frame_len >> 11) as u8 & 0x03));
    out.put(((frame_len >> 3) & 0xff) as u8);
    out.put((((frame_len & 0x07) as u8) << 5) | 0x1f);
    out.put(0xfc);
}
