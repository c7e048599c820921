// src/flv/annexb.rs - Annex-B start code scanning for H.264 elementary streams
//
// Core features:
// - 3 and 4 byte start code detection
// - Splits an access unit into NAL units without copying
// - Rejects buffers that are too short or carry garbage before the first start code

use crate::error::MuxError;

/// H.264 NAL unit types the muxer cares about.
pub mod nal_type {
    pub const NON_IDR: u8 = 1;
    pub const IDR: u8 = 5;
    pub const SEI: u8 = 6;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
}

/// One NAL unit inside an Annex-B buffer, start code excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit {
    pub offset: usize,
    pub len: usize,
    pub start_code_len: usize,
}

impl NalUnit {
    pub fn bytes<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.offset..self.offset + self.len]
    }

    /// The low five bits of the NAL header, 0 for an empty unit.
    pub fn nal_type(&self, buf: &[u8]) -> u8 {
        self.bytes(buf).first().map_or(0, |b| b & 0x1f)
    }

    /// Coded slice of any kind (types 1 to 5).
    pub fn is_slice(&self, buf: &[u8]) -> bool {
        (nal_type::NON_IDR..=nal_type::IDR).contains(&self.nal_type(buf))
    }
}

/// Finds the next start code at or after `from`.
///
/// Returns the position of the first zero byte and the start code length.
pub fn find_start_code(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= buf.len() {
        if buf[i] == 0 && buf[i + 1] == 0 {
            if buf[i + 2] == 1 {
                return Some((i, 3));
            }
            if buf[i + 2] == 0 && i + 3 < buf.len() && buf[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Splits an Annex-B access unit into its NAL units.
///
/// Trailing zero bytes in front of a following start code belong to that
/// start code (`00 00 00 01`) and are not counted in the previous unit.
pub fn split_nal_units(buf: &[u8]) -> Result<Vec<NalUnit>, MuxError> {
    if buf.len() < 4 {
        return Err(MuxError::MalformedAnnexB("buffer shorter than a start code"));
    }
    let (first, first_len) =
        find_start_code(buf, 0).ok_or(MuxError::MalformedAnnexB("no start code found"))?;
    if buf[..first].iter().any(|&b| b != 0) {
        return Err(MuxError::MalformedAnnexB("data before the first start code"));
    }

    let mut units = Vec::new();
    let mut start = first + first_len;
    let mut start_code_len = first_len;
    loop {
        match find_start_code(buf, start) {
            Some((next, next_len)) => {
                units.push(NalUnit {
                    offset: start,
                    len: next - start,
                    start_code_len,
                });
                start = next + next_len;
                start_code_len = next_len;
            }
            None => {
                units.push(NalUnit {
                    offset: start,
                    len: buf.len() - start,
                    start_code_len,
                });
                break;
            }
        }
    }
    Ok(units)
}

/// Returns `buf` without a leading Annex-B start code.
pub fn strip_start_code(buf: &[u8]) -> &[u8] {
    match find_start_code(buf, 0) {
        Some((0, len)) => &buf[len..],
        _ => buf,
    }
}
