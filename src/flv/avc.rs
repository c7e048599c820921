// src/flv/avc.rs - FLV video tag bodies for H.264
//
// Core features:
// - Video tag header (frame type, codec id, AVC packet type, composition time)
// - AVCDecoderConfigurationRecord from SPS/PPS
// - Length-prefixed NAL units for AVC NALU packets

use crate::error::MuxError;
use crate::util::allocator::Allocation;

/// FLV codec id for AVC.
pub const AVC_CODEC_ID: u8 = 7;

/// FLV video frame types.
pub mod frame_type {
    pub const KEY_FRAME: u8 = 1;
    pub const INTER_FRAME: u8 = 2;
}

/// AVC packet types.
pub mod avc_packet_type {
    pub const SEQUENCE_HEADER: u8 = 0;
    pub const NALU: u8 = 1;
}

/// `profile_idc` compatibility flags written into the configuration record.
pub mod profile_iop {
    pub const BASELINE: u8 = 0x00;
    pub const CONSTRAINED: u8 = 0xC0;
}

/// Size of the video tag header: flags, packet type and a 24-bit composition time.
pub const VIDEO_TAG_HEADER_SIZE: usize = 5;
/// Size of the length prefix in front of every NAL unit.
pub const NALU_LENGTH_SIZE: usize = 4;

/// Writes the 5-byte video tag header. Composition time is always zero.
pub fn write_video_tag_header(out: &mut Allocation, frame_type: u8, packet_type: u8) {
    out.put((frame_type << 4) | AVC_CODEC_ID);
    out.put(packet_type);
    out.put_slice(&[0, 0, 0]);
}

/// Size of the AVCDecoderConfigurationRecord built from `sps` and `pps`.
pub fn decoder_configuration_size(sps: &[u8], pps: &[u8]) -> usize {
    11 + sps.len() + pps.len()
}

/// Appends an AVCDecoderConfigurationRecord.
///
/// `sps` and `pps` carry no start code. Profile and level come from the SPS;
/// the compatibility byte is `profile_iop`.
pub fn write_decoder_configuration(
    out: &mut Allocation,
    sps: &[u8],
    pps: &[u8],
    profile_iop: u8,
) -> Result<(), MuxError> {
    if sps.len() < 4 {
        return Err(MuxError::InvalidSps);
    }
    let (sps_len, pps_len) = match (u16::try_from(sps.len()), u16::try_from(pps.len())) {
        (Ok(s), Ok(p)) => (s, p),
        _ => return Err(MuxError::MalformedAnnexB("parameter set larger than 64 KiB")),
    };

    out.put(0x01); // configurationVersion
    out.put(sps[1]); // AVCProfileIndication
    out.put(profile_iop);
    out.put(sps[3]); // AVCLevelIndication
    out.put(0x03); // reserved(6) + lengthSizeMinusOne(2): 4-byte NALU lengths
    out.put(0x01); // reserved(3) + numOfSequenceParameterSets(5)
    out.put_slice(&sps_len.to_be_bytes());
    out.put_slice(sps);
    out.put(0x01); // numOfPictureParameterSets
    out.put_slice(&pps_len.to_be_bytes());
    out.put_slice(pps);
    Ok(())
}

/// Appends one NAL unit with its 4-byte big-endian length prefix.
pub fn write_nalu(out: &mut Allocation, nal: &[u8]) {
    out.put_slice(&(nal.len() as u32).to_be_bytes());
    out.put_slice(nal);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::allocator::AllocatorPool;

    #[test]
    fn test_sequence_header_layout() {
        let pool = AllocatorPool::new(64);
        let mut out = pool.allocate(64);
        let sps = [0x67, 0x42, 0x80, 0x1f, 0xda];
        let pps = [0x68, 0xce, 0x3c];

        write_video_tag_header(&mut out, frame_type::KEY_FRAME, avc_packet_type::SEQUENCE_HEADER);
        write_decoder_configuration(&mut out, &sps, &pps, profile_iop::CONSTRAINED).unwrap();

        assert_eq!(
            out.as_slice(),
            &[
                0x17, 0x00, 0, 0, 0, // tag header
                0x01, 0x42, 0xC0, 0x1f, 0x03, 0x01, // record prefix
                0x00, 0x05, 0x67, 0x42, 0x80, 0x1f, 0xda, // sps
                0x01, 0x00, 0x03, 0x68, 0xce, 0x3c, // pps
            ]
        );
        assert_eq!(
            out.size(),
            VIDEO_TAG_HEADER_SIZE + decoder_configuration_size(&sps, &pps)
        );
    }

    #[test]
    fn test_short_sps_rejected() {
        let pool = AllocatorPool::new(16);
        let mut out = pool.allocate(16);
        assert!(matches!(
            write_decoder_configuration(&mut out, &[0x67, 0x42], &[0x68], 0),
            Err(MuxError::InvalidSps)
        ));
    }

    #[test]
    fn test_inter_frame_nalu() {
        let pool = AllocatorPool::new(16);
        let mut out = pool.allocate(16);
        write_video_tag_header(&mut out, frame_type::INTER_FRAME, avc_packet_type::NALU);
        write_nalu(&mut out, &[0x41, 0x9a]);
        assert_eq!(out.as_slice(), &[0x27, 0x01, 0, 0, 0, 0, 0, 0, 2, 0x41, 0x9a]);
    }
}
