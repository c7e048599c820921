// src/rtmp/rtmp_header.rs - RTMP chunk header codec
//
// Core features:
// - Basic header byte: fmt (2 bits) | chunk stream id (6 bits)
// - Four message header forms (11/7/3/0 bytes)
// - Extended timestamp when a 3-byte field reaches 0xFFFFFF
// - Per chunk stream previous-header bookkeeping for rx and tx

use crate::error::{Error, ProtocolError, Result};
use crate::rtmp::session_info::{ChunkStreamInfo, RtmpSessionInfo};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// 3-byte timestamp sentinel announcing a 4-byte extended timestamp
pub const EXTENDED_TIMESTAMP_SENTINEL: u32 = 0x00FF_FFFF;
/// Largest body the 3-byte message length field can describe.
pub const MAX_MESSAGE_LENGTH: u32 = 0x00FF_FFFF;

/// Highest chunk stream id expressible in the one-byte basic header
const MAX_ONE_BYTE_CHUNK_STREAM_ID: u8 = 63;

/// Well-known chunk stream ids
pub mod chunk_stream {
    pub const PROTOCOL_CONTROL: u8 = 0x02;
    pub const OVER_CONNECTION: u8 = 0x03;
    pub const OVER_CONNECTION2: u8 = 0x04;
    pub const OVER_STREAM: u8 = 0x05;
    pub const VIDEO: u8 = 0x06;
    pub const AUDIO: u8 = 0x07;
}

/// Message header form, from the top two bits of the basic header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    /// Full header: timestamp, length, type, stream id
    Type0 = 0,
    /// Same stream: delta, length, type
    Type1 = 1,
    /// Same stream and shape: delta only
    Type2 = 2,
    /// Continuation: nothing
    Type3 = 3,
}

impl ChunkType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => ChunkType::Type0,
            1 => ChunkType::Type1,
            2 => ChunkType::Type2,
            _ => ChunkType::Type3,
        }
    }

    /// Message header size in bytes, basic header and extended timestamp excluded.
    pub fn message_header_size(self) -> usize {
        match self {
            ChunkType::Type0 => 11,
            ChunkType::Type1 => 7,
            ChunkType::Type2 => 3,
            ChunkType::Type3 => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    SetChunkSize = 0x01,
    Abort = 0x02,
    Acknowledgement = 0x03,
    UserControlMessage = 0x04,
    WindowAcknowledgementSize = 0x05,
    SetPeerBandwidth = 0x06,
    Audio = 0x08,
    Video = 0x09,
    DataAmf3 = 0x0F,
    SharedObjectAmf3 = 0x10,
    CommandAmf3 = 0x11,
    DataAmf0 = 0x12,
    SharedObjectAmf0 = 0x13,
    CommandAmf0 = 0x14,
    Aggregate = 0x16,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(MessageType::SetChunkSize),
            0x02 => Some(MessageType::Abort),
            0x03 => Some(MessageType::Acknowledgement),
            0x04 => Some(MessageType::UserControlMessage),
            0x05 => Some(MessageType::WindowAcknowledgementSize),
            0x06 => Some(MessageType::SetPeerBandwidth),
            0x08 => Some(MessageType::Audio),
            0x09 => Some(MessageType::Video),
            0x0F => Some(MessageType::DataAmf3),
            0x10 => Some(MessageType::SharedObjectAmf3),
            0x11 => Some(MessageType::CommandAmf3),
            0x12 => Some(MessageType::DataAmf0),
            0x13 => Some(MessageType::SharedObjectAmf0),
            0x14 => Some(MessageType::CommandAmf0),
            0x16 => Some(MessageType::Aggregate),
            _ => None,
        }
    }
}

/// A chunk header.
///
/// `message_type_id` keeps the raw byte so that headers inherited from an
/// unknown previous header still decode; packet decoding rejects unknown
/// types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpHeader {
    pub chunk_type: ChunkType,
    pub chunk_stream_id: u8,
    pub absolute_timestamp: u32,
    pub timestamp_delta: u32,
    pub packet_length: u32,
    pub message_type_id: u8,
    pub message_stream_id: u32,
    extended_timestamp: bool,
}

impl RtmpHeader {
    pub fn new(chunk_type: ChunkType, chunk_stream_id: u8, message_type: MessageType) -> Self {
        Self {
            chunk_type,
            chunk_stream_id,
            absolute_timestamp: 0,
            timestamp_delta: 0,
            packet_length: 0,
            message_type_id: message_type as u8,
            message_stream_id: 0,
            extended_timestamp: false,
        }
    }

    /// Zero bases for a chunk stream with no previous header.
    fn empty(chunk_stream_id: u8) -> Self {
        Self {
            chunk_type: ChunkType::Type0,
            chunk_stream_id,
            absolute_timestamp: 0,
            timestamp_delta: 0,
            packet_length: 0,
            message_type_id: 0,
            message_stream_id: 0,
            extended_timestamp: false,
        }
    }

    pub fn message_type(&self) -> std::result::Result<MessageType, ProtocolError> {
        MessageType::from_u8(self.message_type_id)
            .ok_or(ProtocolError::UnknownMessageType(self.message_type_id))
    }

    /// Whether the timestamp of this header travelled in the extended field.
    pub fn has_extended_timestamp(&self) -> bool {
        self.extended_timestamp
    }

    /// Reads one chunk header, resolving compact forms against the previous
    /// rx header of the same chunk stream.
    ///
    /// Running out of input surfaces as an `UnexpectedEof` IO error.
    pub fn read_from<R: Read>(reader: &mut R, session: &RtmpSessionInfo) -> Result<Self> {
        let basic = reader.read_u8()?;
        let chunk_type = ChunkType::from_bits(basic >> 6);
        let chunk_stream_id = basic & 0x3F;
        if chunk_stream_id < 2 {
            return Err(ProtocolError::UnsupportedChunkStreamId(u32::from(chunk_stream_id)).into());
        }

        let channel = session.chunk_stream_info(chunk_stream_id);
        let prev = channel
            .and_then(ChunkStreamInfo::prev_header_rx)
            .cloned()
            .unwrap_or_else(|| RtmpHeader::empty(chunk_stream_id));
        let continuation = channel.map_or(false, ChunkStreamInfo::is_rx_in_progress);

        let mut header = RtmpHeader {
            chunk_type,
            chunk_stream_id,
            ..prev.clone()
        };

        match chunk_type {
            ChunkType::Type0 => {
                let timestamp = reader.read_u24::<BigEndian>()?;
                header.packet_length = reader.read_u24::<BigEndian>()?;
                header.message_type_id = reader.read_u8()?;
                header.message_stream_id = reader.read_u32::<LittleEndian>()?;
                header.extended_timestamp = timestamp >= EXTENDED_TIMESTAMP_SENTINEL;
                header.absolute_timestamp = if header.extended_timestamp {
                    reader.read_u32::<BigEndian>()?
                } else {
                    timestamp
                };
                header.timestamp_delta = 0;
            }
            ChunkType::Type1 | ChunkType::Type2 => {
                let delta = reader.read_u24::<BigEndian>()?;
                if chunk_type == ChunkType::Type1 {
                    header.packet_length = reader.read_u24::<BigEndian>()?;
                    header.message_type_id = reader.read_u8()?;
                }
                header.extended_timestamp = delta >= EXTENDED_TIMESTAMP_SENTINEL;
                if header.extended_timestamp {
                    header.absolute_timestamp = reader.read_u32::<BigEndian>()?;
                    header.timestamp_delta =
                        header.absolute_timestamp.wrapping_sub(prev.absolute_timestamp);
                } else {
                    header.timestamp_delta = delta;
                    header.absolute_timestamp = prev.absolute_timestamp.wrapping_add(delta);
                }
            }
            ChunkType::Type3 => {
                let extended = if prev.extended_timestamp {
                    Some(reader.read_u32::<BigEndian>()?)
                } else {
                    None
                };
                if !continuation {
                    // A new message reusing the previous header advances by its delta.
                    header.absolute_timestamp = match extended {
                        Some(ts) if prev.chunk_type == ChunkType::Type0 => ts,
                        _ => prev.absolute_timestamp.wrapping_add(prev.timestamp_delta),
                    };
                }
            }
        }
        Ok(header)
    }

    /// Writes this header as `chunk_type` and records it as the channel's
    /// previous tx header.
    ///
    /// For Type1/Type2 the delta is taken against the previous tx header;
    /// Type3 repeats the extended timestamp of the header it continues.
    pub fn write_to<W: Write>(
        &self,
        writer: &mut W,
        chunk_type: ChunkType,
        channel: &mut ChunkStreamInfo,
    ) -> Result<()> {
        if self.chunk_stream_id < 2 || self.chunk_stream_id > MAX_ONE_BYTE_CHUNK_STREAM_ID {
            return Err(Error::Protocol(ProtocolError::UnsupportedChunkStreamId(
                u32::from(self.chunk_stream_id),
            )));
        }
        if self.packet_length > MAX_MESSAGE_LENGTH {
            return Err(ProtocolError::MessageTooLarge(self.packet_length as usize).into());
        }
        writer.write_u8(((chunk_type as u8) << 6) | self.chunk_stream_id)?;

        match chunk_type {
            ChunkType::Type0 => {
                let extended = self.absolute_timestamp >= EXTENDED_TIMESTAMP_SENTINEL;
                writer.write_u24::<BigEndian>(self.absolute_timestamp.min(EXTENDED_TIMESTAMP_SENTINEL))?;
                writer.write_u24::<BigEndian>(self.packet_length)?;
                writer.write_u8(self.message_type_id)?;
                writer.write_u32::<LittleEndian>(self.message_stream_id)?;
                if extended {
                    writer.write_u32::<BigEndian>(self.absolute_timestamp)?;
                }
                channel.set_prev_header_tx(RtmpHeader {
                    chunk_type,
                    timestamp_delta: 0,
                    extended_timestamp: extended,
                    ..self.clone()
                });
            }
            ChunkType::Type1 | ChunkType::Type2 => {
                let prev_timestamp = channel
                    .prev_header_tx()
                    .map_or(0, |h| h.absolute_timestamp);
                let delta = self.absolute_timestamp.wrapping_sub(prev_timestamp);
                let extended = delta >= EXTENDED_TIMESTAMP_SENTINEL;
                writer.write_u24::<BigEndian>(delta.min(EXTENDED_TIMESTAMP_SENTINEL))?;
                if chunk_type == ChunkType::Type1 {
                    writer.write_u24::<BigEndian>(self.packet_length)?;
                    writer.write_u8(self.message_type_id)?;
                }
                if extended {
                    writer.write_u32::<BigEndian>(self.absolute_timestamp)?;
                }
                channel.set_prev_header_tx(RtmpHeader {
                    chunk_type,
                    timestamp_delta: delta,
                    extended_timestamp: extended,
                    ..self.clone()
                });
            }
            ChunkType::Type3 => {
                if let Some(prev) = channel.prev_header_tx() {
                    if prev.extended_timestamp {
                        writer.write_u32::<BigEndian>(prev.absolute_timestamp)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn video_header(timestamp: u32, length: u32) -> RtmpHeader {
        let mut header = RtmpHeader::new(ChunkType::Type0, chunk_stream::VIDEO, MessageType::Video);
        header.absolute_timestamp = timestamp;
        header.packet_length = length;
        header.message_stream_id = 1;
        header
    }

    /// Encodes with the tx state of `tx`, decodes with the rx state of `rx`
    /// and commits the decoded header as the rx previous header.
    fn transfer(
        header: &RtmpHeader,
        chunk_type: ChunkType,
        tx: &mut RtmpSessionInfo,
        rx: &mut RtmpSessionInfo,
    ) -> (Vec<u8>, RtmpHeader) {
        let mut bytes = Vec::new();
        header
            .write_to(&mut bytes, chunk_type, tx.chunk_stream_info_mut(header.chunk_stream_id))
            .expect("write header");
        let decoded = RtmpHeader::read_from(&mut Cursor::new(&bytes), rx).expect("read header");
        rx.chunk_stream_info_mut(decoded.chunk_stream_id)
            .set_prev_header_rx(decoded.clone());
        (bytes, decoded)
    }

    #[test]
    fn test_type0_layout() {
        let mut session = RtmpSessionInfo::new();
        let mut bytes = Vec::new();
        let mut header = video_header(0x010203, 0x000456);
        header.message_stream_id = 0x01020304;
        header
            .write_to(&mut bytes, ChunkType::Type0, session.chunk_stream_info_mut(6))
            .expect("write");
        assert_eq!(
            bytes,
            vec![0x06, 0x01, 0x02, 0x03, 0x00, 0x04, 0x56, 0x09, 0x04, 0x03, 0x02, 0x01]
        );
        assert_eq!(bytes.len(), 1 + ChunkType::Type0.message_header_size());
    }

    #[test]
    fn test_message_header_sizes_match_encoding() {
        let mut session = RtmpSessionInfo::new();
        let channel = session.chunk_stream_info_mut(6);
        let header = video_header(100, 10);
        header
            .write_to(&mut Vec::new(), ChunkType::Type0, channel)
            .expect("write");
        for chunk_type in [ChunkType::Type1, ChunkType::Type2, ChunkType::Type3] {
            let mut bytes = Vec::new();
            header.write_to(&mut bytes, chunk_type, channel).expect("write");
            assert_eq!(bytes.len(), 1 + chunk_type.message_header_size(), "{:?}", chunk_type);
        }
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut session = RtmpSessionInfo::new();
        let header = video_header(0, MAX_MESSAGE_LENGTH + 1);
        let mut bytes = Vec::new();
        let result = header.write_to(&mut bytes, ChunkType::Type0, session.chunk_stream_info_mut(6));
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::MessageTooLarge(_)))
        ));
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_basic_header_encodes_type_and_id() {
        let mut session = RtmpSessionInfo::new();
        let header = video_header(0, 10);
        let mut bytes = Vec::new();
        header
            .write_to(&mut bytes, ChunkType::Type3, session.chunk_stream_info_mut(6))
            .expect("write");
        assert_eq!(bytes, vec![0xC6]);
    }

    #[test]
    fn test_type0_round_trip() {
        let mut tx = RtmpSessionInfo::new();
        let mut rx = RtmpSessionInfo::new();
        let header = video_header(1234, 99);
        let (_, decoded) = transfer(&header, ChunkType::Type0, &mut tx, &mut rx);
        assert_eq!(decoded.absolute_timestamp, 1234);
        assert_eq!(decoded.packet_length, 99);
        assert_eq!(decoded.message_type(), Ok(MessageType::Video));
        assert_eq!(decoded.message_stream_id, 1);
    }

    #[test]
    fn test_delta_reconstruction_type1_type2_type3() {
        let mut tx = RtmpSessionInfo::new();
        let mut rx = RtmpSessionInfo::new();
        transfer(&video_header(1000, 50), ChunkType::Type0, &mut tx, &mut rx);

        let (bytes, decoded) = transfer(&video_header(1040, 70), ChunkType::Type1, &mut tx, &mut rx);
        assert_eq!(bytes.len(), 8);
        assert_eq!(decoded.absolute_timestamp, 1040);
        assert_eq!(decoded.timestamp_delta, 40);
        assert_eq!(decoded.packet_length, 70);
        assert_eq!(decoded.message_stream_id, 1);

        let (bytes, decoded) = transfer(&video_header(1073, 70), ChunkType::Type2, &mut tx, &mut rx);
        assert_eq!(bytes.len(), 4);
        assert_eq!(decoded.absolute_timestamp, 1073);
        assert_eq!(decoded.packet_length, 70);

        // New message with a bare Type3 header reuses the last delta.
        let (bytes, decoded) = transfer(&video_header(1106, 70), ChunkType::Type3, &mut tx, &mut rx);
        assert_eq!(bytes.len(), 1);
        assert_eq!(decoded.absolute_timestamp, 1073 + 33);
    }

    #[test]
    fn test_extended_timestamp_type0_and_type3() {
        let mut tx = RtmpSessionInfo::new();
        let mut rx = RtmpSessionInfo::new();
        let header = video_header(0x0100_0000, 10);
        let (bytes, decoded) = transfer(&header, ChunkType::Type0, &mut tx, &mut rx);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[1..4], &[0xFF, 0xFF, 0xFF]);
        assert_eq!(&bytes[12..16], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(decoded.absolute_timestamp, 0x0100_0000);
        assert!(decoded.has_extended_timestamp());

        let mut cont = Vec::new();
        header
            .write_to(&mut cont, ChunkType::Type3, tx.chunk_stream_info_mut(6))
            .expect("write");
        assert_eq!(cont, vec![0xC6, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_timestamp_at_sentinel_is_extended() {
        let mut tx = RtmpSessionInfo::new();
        let mut rx = RtmpSessionInfo::new();
        let (bytes, decoded) = transfer(
            &video_header(EXTENDED_TIMESTAMP_SENTINEL, 1),
            ChunkType::Type0,
            &mut tx,
            &mut rx,
        );
        assert_eq!(bytes.len(), 16);
        assert_eq!(decoded.absolute_timestamp, EXTENDED_TIMESTAMP_SENTINEL);
    }

    #[test]
    fn test_missing_previous_header_uses_zero_bases() {
        let rx = RtmpSessionInfo::new();
        // Type1, csid 4, delta 5, length 3, type audio
        let bytes = [0x44, 0x00, 0x00, 0x05, 0x00, 0x00, 0x03, 0x08];
        let decoded = RtmpHeader::read_from(&mut Cursor::new(&bytes[..]), &rx).expect("read");
        assert_eq!(decoded.absolute_timestamp, 5);
        assert_eq!(decoded.message_stream_id, 0);
        assert_eq!(decoded.message_type(), Ok(MessageType::Audio));
    }

    #[test]
    fn test_truncated_header_is_eof() {
        let rx = RtmpSessionInfo::new();
        let bytes = [0x06, 0x00, 0x00];
        match RtmpHeader::read_from(&mut Cursor::new(&bytes[..]), &rx) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_two_byte_chunk_stream_id_rejected() {
        let rx = RtmpSessionInfo::new();
        let bytes = [0x00, 0x10];
        assert!(matches!(
            RtmpHeader::read_from(&mut Cursor::new(&bytes[..]), &rx),
            Err(Error::Protocol(ProtocolError::UnsupportedChunkStreamId(0)))
        ));
    }
}
