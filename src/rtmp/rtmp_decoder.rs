// src/rtmp/rtmp_decoder.rs - Incremental inbound message decoder
//
// Consumes whole chunks from a receive buffer, reassembles messages per
// chunk stream and reports window acknowledgements as a regular outcome.
// An Abort message drops the partial message on the chunk stream it names.

use crate::error::{Error, Result};
use crate::rtmp::rtmp_header::RtmpHeader;
use crate::rtmp::rtmp_packet::{PacketBody, RtmpPacket};
use crate::rtmp::session_info::RtmpSessionInfo;
use bytes::{Buf, BytesMut};
use std::io::{Cursor, ErrorKind};

/// Result of one decode step.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete message
    Packet(RtmpPacket),
    /// The buffer holds no complete chunk
    NeedMoreData,
    /// The acknowledgement window filled up; acknowledge this many bytes
    AckRequired(u32),
}

#[derive(Debug, Default)]
pub struct RtmpDecoder {
    // Message completed by the chunk that also triggered an acknowledgement.
    pending: Option<RtmpPacket>,
}

impl RtmpDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes chunks from the front of `buf` until a message completes,
    /// an acknowledgement is due, or the buffer runs short.
    ///
    /// Consumed bytes are removed from `buf`; a partial chunk is left in place.
    pub fn read_packet(
        &mut self,
        buf: &mut BytesMut,
        session: &mut RtmpSessionInfo,
    ) -> Result<ReadOutcome> {
        if let Some(packet) = self.pending.take() {
            return Ok(ReadOutcome::Packet(packet));
        }

        loop {
            let (header, header_len) = {
                let mut cursor = Cursor::new(&buf[..]);
                match RtmpHeader::read_from(&mut cursor, session) {
                    Ok(header) => (header, cursor.position() as usize),
                    Err(Error::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                        return Ok(ReadOutcome::NeedMoreData)
                    }
                    Err(e) => return Err(e),
                }
            };

            let rx_chunk_size = session.rx_chunk_size() as usize;
            let channel = session.chunk_stream_info_mut(header.chunk_stream_id);
            let remaining = (header.packet_length as usize).saturating_sub(channel.stored_len());
            let chunk_len = remaining.min(rx_chunk_size);
            if buf.len() < header_len + chunk_len {
                return Ok(ReadOutcome::NeedMoreData);
            }

            buf.advance(header_len);
            channel.store_chunk(&buf[..chunk_len]);
            buf.advance(chunk_len);
            channel.set_prev_header_rx(header.clone());

            let packet = if channel.stored_len() >= header.packet_length as usize {
                let body = channel.take_stored_chunks();
                Some(RtmpPacket::decode(header, body)?)
            } else {
                None
            };
            if let Some(PacketBody::Abort(aborted)) = packet.as_ref().map(|p| &p.body) {
                if let Ok(id) = u8::try_from(*aborted) {
                    session.chunk_stream_info_mut(id).clear_stored_chunks();
                }
            }

            let ack = session.add_to_window_bytes_read((header_len + chunk_len) as u32);
            match (ack, packet) {
                (Some(total), packet) => {
                    self.pending = packet;
                    return Ok(ReadOutcome::AckRequired(total));
                }
                (None, Some(packet)) => return Ok(ReadOutcome::Packet(packet)),
                (None, None) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::amf0::{AmfObject, AmfValue};
    use crate::rtmp::rtmp_header::{chunk_stream, ChunkType};
    use crate::rtmp::rtmp_packet::Command;
    use bytes::Bytes;

    fn encode(packets: &[RtmpPacket], chunk_size: u32) -> Vec<u8> {
        let mut session = RtmpSessionInfo::new();
        let mut out = Vec::new();
        for packet in packets {
            let channel = session.chunk_stream_info_mut(packet.header.chunk_stream_id);
            packet.write_to(&mut out, chunk_size, channel).expect("write");
        }
        out
    }

    fn expect_packet(outcome: ReadOutcome) -> RtmpPacket {
        match outcome {
            ReadOutcome::Packet(p) => p,
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn test_reassembles_multi_chunk_message() {
        let payload: Vec<u8> = (0..400u32).map(|i| i as u8).collect();
        let bytes = encode(&[RtmpPacket::video(Bytes::from(payload.clone()), 66, 1)], 128);

        let mut session = RtmpSessionInfo::new();
        let mut decoder = RtmpDecoder::new();
        let mut buf = BytesMut::from(&bytes[..]);
        let packet = expect_packet(decoder.read_packet(&mut buf, &mut session).unwrap());
        assert_eq!(packet.header.absolute_timestamp, 66);
        assert_eq!(packet.body, PacketBody::Video(Bytes::from(payload)));
        assert!(buf.is_empty());
        assert!(matches!(
            decoder.read_packet(&mut buf, &mut session).unwrap(),
            ReadOutcome::NeedMoreData
        ));
    }

    #[test]
    fn test_byte_by_byte_feed() {
        let command = Command::new("onStatus", 0)
            .with_arg(AmfValue::Null)
            .with_arg(AmfObject::new().with("code", "NetStream.Publish.Start").with("description", "x".repeat(150)));
        let packets = [
            RtmpPacket::window_ack_size(2_500_000),
            RtmpPacket::command(chunk_stream::OVER_STREAM, 1, command.clone()),
        ];
        let bytes = encode(&packets, 128);

        let mut session = RtmpSessionInfo::new();
        let mut decoder = RtmpDecoder::new();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for b in bytes {
            buf.extend_from_slice(&[b]);
            loop {
                match decoder.read_packet(&mut buf, &mut session).unwrap() {
                    ReadOutcome::Packet(p) => decoded.push(p.body),
                    ReadOutcome::NeedMoreData => break,
                    ReadOutcome::AckRequired(_) => panic!("no window set"),
                }
            }
        }
        assert_eq!(
            decoded,
            vec![PacketBody::WindowAckSize(2_500_000), PacketBody::Command(command)]
        );
    }

    #[test]
    fn test_larger_rx_chunk_size() {
        let payload = vec![7u8; 3000];
        let bytes = encode(&[RtmpPacket::audio(Bytes::from(payload.clone()), 0, 1)], 4096);
        assert_eq!(bytes.len(), 12 + 3000);

        let mut session = RtmpSessionInfo::new();
        session.set_rx_chunk_size(4096);
        let mut decoder = RtmpDecoder::new();
        let mut buf = BytesMut::from(&bytes[..]);
        let packet = expect_packet(decoder.read_packet(&mut buf, &mut session).unwrap());
        assert_eq!(packet.body, PacketBody::Audio(Bytes::from(payload)));
    }

    #[test]
    fn test_ack_required_then_pending_packet() {
        let bytes = encode(&[RtmpPacket::acknowledgement(1), RtmpPacket::acknowledgement(2)], 128);
        // Each message is 12 + 4 bytes.
        let mut session = RtmpSessionInfo::new();
        session.set_acknowledgement_window_size(20);
        let mut decoder = RtmpDecoder::new();
        let mut buf = BytesMut::from(&bytes[..]);

        let first = expect_packet(decoder.read_packet(&mut buf, &mut session).unwrap());
        assert_eq!(first.body, PacketBody::Acknowledgement(1));

        match decoder.read_packet(&mut buf, &mut session).unwrap() {
            ReadOutcome::AckRequired(total) => assert_eq!(total, 32),
            other => panic!("expected ack, got {:?}", other),
        }
        let second = expect_packet(decoder.read_packet(&mut buf, &mut session).unwrap());
        assert_eq!(second.body, PacketBody::Acknowledgement(2));
    }

    /// Splits one encoded message into its chunks, headers included.
    fn chunks_of(bytes: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        let mut rest = bytes;
        let mut header_len = 1 + ChunkType::Type0.message_header_size();
        while !rest.is_empty() {
            let len = (header_len + chunk_size).min(rest.len());
            chunks.push(rest[..len].to_vec());
            rest = &rest[len..];
            header_len = 1 + ChunkType::Type3.message_header_size();
        }
        chunks
    }

    #[test]
    fn test_interleaved_chunk_streams() {
        let audio_payload = vec![0xAA; 200];
        let video_payload: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let audio = chunks_of(
            &encode(&[RtmpPacket::audio(Bytes::from(audio_payload.clone()), 10, 1)], 128),
            128,
        );
        let video = chunks_of(
            &encode(&[RtmpPacket::video(Bytes::from(video_payload.clone()), 20, 1)], 128),
            128,
        );
        assert_eq!((audio.len(), video.len()), (2, 3));

        let mut wire = Vec::new();
        for chunk in [&audio[0], &video[0], &audio[1], &video[1], &video[2]] {
            wire.extend_from_slice(chunk);
        }

        let mut session = RtmpSessionInfo::new();
        let mut decoder = RtmpDecoder::new();
        let mut buf = BytesMut::from(&wire[..]);
        let first = expect_packet(decoder.read_packet(&mut buf, &mut session).unwrap());
        assert_eq!(first.header.chunk_stream_id, chunk_stream::AUDIO);
        assert_eq!(first.header.absolute_timestamp, 10);
        assert_eq!(first.body, PacketBody::Audio(Bytes::from(audio_payload)));

        let second = expect_packet(decoder.read_packet(&mut buf, &mut session).unwrap());
        assert_eq!(second.header.chunk_stream_id, chunk_stream::VIDEO);
        assert_eq!(second.header.absolute_timestamp, 20);
        assert_eq!(second.body, PacketBody::Video(Bytes::from(video_payload)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_abort_discards_partial_message() {
        let partial = chunks_of(&encode(&[RtmpPacket::video(Bytes::from(vec![1u8; 200]), 0, 1)], 128), 128);
        let fresh_payload = vec![9u8; 50];
        let fresh = encode(&[RtmpPacket::video(Bytes::from(fresh_payload.clone()), 40, 1)], 128);

        let mut wire = partial[0].clone();
        wire.extend(encode(&[RtmpPacket::abort(u32::from(chunk_stream::VIDEO))], 128));
        wire.extend(fresh);

        let mut session = RtmpSessionInfo::new();
        let mut decoder = RtmpDecoder::new();
        let mut buf = BytesMut::from(&wire[..]);
        let abort = expect_packet(decoder.read_packet(&mut buf, &mut session).unwrap());
        assert_eq!(abort.body, PacketBody::Abort(u32::from(chunk_stream::VIDEO)));
        assert!(!session
            .chunk_stream_info(chunk_stream::VIDEO)
            .is_some_and(|c| c.is_rx_in_progress()));

        let packet = expect_packet(decoder.read_packet(&mut buf, &mut session).unwrap());
        assert_eq!(packet.header.absolute_timestamp, 40);
        assert_eq!(packet.body, PacketBody::Video(Bytes::from(fresh_payload)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_message_type_is_error() {
        // Type0 on csid 3, length 0, type 0x42
        let bytes = [0x03, 0, 0, 0, 0, 0, 0, 0x42, 0, 0, 0, 0];
        let mut session = RtmpSessionInfo::new();
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(RtmpDecoder::new().read_packet(&mut buf, &mut session).is_err());
    }
}
