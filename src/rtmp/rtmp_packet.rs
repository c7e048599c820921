// src/rtmp/rtmp_packet.rs - RTMP messages and chunked framing
//
// Core features:
// - One header plus a typed body per message kind
// - Body encode/decode per message type
// - Chunking: first chunk with the header's form, then Type3 continuations

use crate::error::{Error, ProtocolError, Result};
use crate::rtmp::amf0::AmfValue;
use crate::rtmp::rtmp_header::{chunk_stream, ChunkType, MessageType, RtmpHeader, MAX_MESSAGE_LENGTH};
use crate::rtmp::session_info::ChunkStreamInfo;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use std::io::Write;

/// SetPeerBandwidth limit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitType {
    Hard = 0,
    Soft = 1,
    Dynamic = 2,
}

impl LimitType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LimitType::Hard),
            1 => Some(LimitType::Soft),
            2 => Some(LimitType::Dynamic),
            _ => None,
        }
    }
}

// User control event types
const EVENT_STREAM_BEGIN: u16 = 0;
const EVENT_STREAM_EOF: u16 = 1;
const EVENT_STREAM_DRY: u16 = 2;
const EVENT_SET_BUFFER_LENGTH: u16 = 3;
const EVENT_STREAM_IS_RECORDED: u16 = 4;
const EVENT_PING_REQUEST: u16 = 6;
const EVENT_PING_RESPONSE: u16 = 7;

fn put_event(buf: &mut Vec<u8>, event_type: u16, values: &[u32]) {
    buf.extend_from_slice(&event_type.to_be_bytes());
    for v in values {
        buf.extend_from_slice(&v.to_be_bytes());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_length_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16, data: Bytes },
}

impl UserControlEvent {
    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            UserControlEvent::StreamBegin(id) => put_event(buf, EVENT_STREAM_BEGIN, &[*id]),
            UserControlEvent::StreamEof(id) => put_event(buf, EVENT_STREAM_EOF, &[*id]),
            UserControlEvent::StreamDry(id) => put_event(buf, EVENT_STREAM_DRY, &[*id]),
            UserControlEvent::SetBufferLength {
                stream_id,
                buffer_length_ms,
            } => put_event(buf, EVENT_SET_BUFFER_LENGTH, &[*stream_id, *buffer_length_ms]),
            UserControlEvent::StreamIsRecorded(id) => {
                put_event(buf, EVENT_STREAM_IS_RECORDED, &[*id])
            }
            UserControlEvent::PingRequest(ts) => put_event(buf, EVENT_PING_REQUEST, &[*ts]),
            UserControlEvent::PingResponse(ts) => put_event(buf, EVENT_PING_RESPONSE, &[*ts]),
            UserControlEvent::Unknown { event_type, data } => {
                put_event(buf, *event_type, &[]);
                buf.extend_from_slice(data);
            }
        }
    }

    fn decode(mut body: &[u8]) -> Option<Self> {
        let event_type = body.read_u16::<BigEndian>().ok()?;
        let first = body.read_u32::<BigEndian>();
        let event = match (event_type, first) {
            (EVENT_STREAM_BEGIN, Ok(id)) => UserControlEvent::StreamBegin(id),
            (EVENT_STREAM_EOF, Ok(id)) => UserControlEvent::StreamEof(id),
            (EVENT_STREAM_DRY, Ok(id)) => UserControlEvent::StreamDry(id),
            (EVENT_SET_BUFFER_LENGTH, Ok(stream_id)) => UserControlEvent::SetBufferLength {
                stream_id,
                buffer_length_ms: body.read_u32::<BigEndian>().ok()?,
            },
            (EVENT_STREAM_IS_RECORDED, Ok(id)) => UserControlEvent::StreamIsRecorded(id),
            (EVENT_PING_REQUEST, Ok(ts)) => UserControlEvent::PingRequest(ts),
            (EVENT_PING_RESPONSE, Ok(ts)) => UserControlEvent::PingResponse(ts),
            (
                EVENT_STREAM_BEGIN
                | EVENT_STREAM_EOF
                | EVENT_STREAM_DRY
                | EVENT_SET_BUFFER_LENGTH
                | EVENT_STREAM_IS_RECORDED
                | EVENT_PING_REQUEST
                | EVENT_PING_RESPONSE,
                Err(_),
            ) => return None,
            (event_type, first) => {
                let mut data = Vec::new();
                if let Ok(v) = first {
                    data.extend_from_slice(&v.to_be_bytes());
                }
                data.extend_from_slice(body);
                UserControlEvent::Unknown {
                    event_type,
                    data: Bytes::from(data),
                }
            }
        };
        Some(event)
    }
}

/// An AMF0 command invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: u32,
    /// Values after the transaction id, command object first
    pub arguments: Vec<AmfValue>,
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: u32) -> Self {
        Self {
            name: name.into(),
            transaction_id,
            arguments: Vec::new(),
        }
    }

    pub fn with_arg(mut self, value: impl Into<AmfValue>) -> Self {
        self.arguments.push(value.into());
        self
    }

    /// First string property named `key` among the object arguments.
    pub fn info_str(&self, key: &str) -> Option<&str> {
        self.arguments
            .iter()
            .filter_map(AmfValue::as_object)
            .find_map(|o| o.get_str(key))
    }
}

/// An AMF0 data message.
#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub data_type: String,
    pub values: Vec<AmfValue>,
}

impl Data {
    pub fn new(data_type: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            values: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<AmfValue>) -> Self {
        self.values.push(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PacketBody {
    SetChunkSize(u32),
    Abort(u32),
    Acknowledgement(u32),
    UserControl(UserControlEvent),
    WindowAckSize(u32),
    SetPeerBandwidth { window_size: u32, limit_type: LimitType },
    Command(Command),
    Data(Data),
    Audio(Bytes),
    Video(Bytes),
    /// Known message types this client does not interpret (AMF3, shared objects, aggregates)
    Unhandled(Bytes),
}

/// An RTMP message: header plus typed body.
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpPacket {
    pub header: RtmpHeader,
    pub body: PacketBody,
}

impl RtmpPacket {
    fn control(message_type: MessageType, body: PacketBody) -> Self {
        Self {
            header: RtmpHeader::new(ChunkType::Type0, chunk_stream::PROTOCOL_CONTROL, message_type),
            body,
        }
    }

    pub fn set_chunk_size(chunk_size: u32) -> Self {
        Self::control(MessageType::SetChunkSize, PacketBody::SetChunkSize(chunk_size))
    }

    pub fn abort(chunk_stream_id: u32) -> Self {
        Self::control(MessageType::Abort, PacketBody::Abort(chunk_stream_id))
    }

    pub fn acknowledgement(sequence_number: u32) -> Self {
        Self::control(MessageType::Acknowledgement, PacketBody::Acknowledgement(sequence_number))
    }

    pub fn user_control(event: UserControlEvent) -> Self {
        Self::control(MessageType::UserControlMessage, PacketBody::UserControl(event))
    }

    pub fn window_ack_size(window_size: u32) -> Self {
        Self::control(MessageType::WindowAcknowledgementSize, PacketBody::WindowAckSize(window_size))
    }

    pub fn set_peer_bandwidth(window_size: u32, limit_type: LimitType) -> Self {
        Self::control(
            MessageType::SetPeerBandwidth,
            PacketBody::SetPeerBandwidth {
                window_size,
                limit_type,
            },
        )
    }

    pub fn command(chunk_stream_id: u8, message_stream_id: u32, command: Command) -> Self {
        let mut header = RtmpHeader::new(ChunkType::Type0, chunk_stream_id, MessageType::CommandAmf0);
        header.message_stream_id = message_stream_id;
        Self {
            header,
            body: PacketBody::Command(command),
        }
    }

    pub fn data(chunk_stream_id: u8, message_stream_id: u32, data: Data) -> Self {
        let mut header = RtmpHeader::new(ChunkType::Type0, chunk_stream_id, MessageType::DataAmf0);
        header.message_stream_id = message_stream_id;
        Self {
            header,
            body: PacketBody::Data(data),
        }
    }

    pub fn audio(payload: Bytes, timestamp: u32, message_stream_id: u32) -> Self {
        Self {
            header: media_header(MessageType::Audio, timestamp, message_stream_id),
            body: PacketBody::Audio(payload),
        }
    }

    pub fn video(payload: Bytes, timestamp: u32, message_stream_id: u32) -> Self {
        Self {
            header: media_header(MessageType::Video, timestamp, message_stream_id),
            body: PacketBody::Video(payload),
        }
    }

    /// Encodes the message body.
    pub fn encode_body(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match &self.body {
            PacketBody::SetChunkSize(v)
            | PacketBody::Abort(v)
            | PacketBody::Acknowledgement(v)
            | PacketBody::WindowAckSize(v) => buf.write_u32::<BigEndian>(*v)?,
            PacketBody::UserControl(event) => event.encode(&mut buf),
            PacketBody::SetPeerBandwidth {
                window_size,
                limit_type,
            } => {
                buf.write_u32::<BigEndian>(*window_size)?;
                buf.write_u8(*limit_type as u8)?;
            }
            PacketBody::Command(command) => {
                AmfValue::String(command.name.clone()).write_to(&mut buf)?;
                AmfValue::Number(f64::from(command.transaction_id)).write_to(&mut buf)?;
                for arg in &command.arguments {
                    arg.write_to(&mut buf)?;
                }
            }
            PacketBody::Data(data) => {
                AmfValue::String(data.data_type.clone()).write_to(&mut buf)?;
                for value in &data.values {
                    value.write_to(&mut buf)?;
                }
            }
            PacketBody::Audio(payload) | PacketBody::Video(payload) | PacketBody::Unhandled(payload) => {
                buf.extend_from_slice(payload)
            }
        }
        Ok(buf)
    }

    /// Serializes the message as chunks of at most `chunk_size` payload bytes.
    ///
    /// The header's `packet_length` is filled in from the encoded body.
    pub fn write_to<W: Write>(
        &self,
        writer: &mut W,
        chunk_size: u32,
        channel: &mut ChunkStreamInfo,
    ) -> Result<()> {
        let body = match &self.body {
            PacketBody::Audio(payload) | PacketBody::Video(payload) => {
                return write_chunked(writer, &self.header, payload, chunk_size, channel);
            }
            _ => self.encode_body()?,
        };
        write_chunked(writer, &self.header, &body, chunk_size, channel)
    }

    /// Builds a packet from a reassembled message body.
    pub fn decode(header: RtmpHeader, body: Bytes) -> Result<Self> {
        let message_type = header.message_type()?;
        let malformed = |kind| Error::Protocol(ProtocolError::MalformedBody { kind });
        let mut reader: &[u8] = &body;

        let body = match message_type {
            MessageType::SetChunkSize => PacketBody::SetChunkSize(
                reader.read_u32::<BigEndian>().map_err(|_| malformed("SetChunkSize"))? & 0x7FFF_FFFF,
            ),
            MessageType::Abort => {
                PacketBody::Abort(reader.read_u32::<BigEndian>().map_err(|_| malformed("Abort"))?)
            }
            MessageType::Acknowledgement => PacketBody::Acknowledgement(
                reader.read_u32::<BigEndian>().map_err(|_| malformed("Acknowledgement"))?,
            ),
            MessageType::UserControlMessage => PacketBody::UserControl(
                UserControlEvent::decode(reader).ok_or_else(|| malformed("UserControl"))?,
            ),
            MessageType::WindowAcknowledgementSize => PacketBody::WindowAckSize(
                reader.read_u32::<BigEndian>().map_err(|_| malformed("WindowAckSize"))?,
            ),
            MessageType::SetPeerBandwidth => {
                let window_size = reader
                    .read_u32::<BigEndian>()
                    .map_err(|_| malformed("SetPeerBandwidth"))?;
                let limit_type = reader
                    .read_u8()
                    .ok()
                    .and_then(LimitType::from_u8)
                    .ok_or_else(|| malformed("SetPeerBandwidth"))?;
                PacketBody::SetPeerBandwidth {
                    window_size,
                    limit_type,
                }
            }
            MessageType::CommandAmf0 => {
                let name = match AmfValue::read_from(&mut reader)? {
                    AmfValue::String(name) => name,
                    _ => return Err(malformed("Command")),
                };
                let transaction_id = match AmfValue::read_from(&mut reader)? {
                    AmfValue::Number(n) => n as u32,
                    _ => return Err(malformed("Command")),
                };
                PacketBody::Command(Command {
                    name,
                    transaction_id,
                    arguments: read_values(&mut reader)?,
                })
            }
            MessageType::DataAmf0 => {
                let data_type = match AmfValue::read_from(&mut reader)? {
                    AmfValue::String(data_type) => data_type,
                    _ => return Err(malformed("Data")),
                };
                PacketBody::Data(Data {
                    data_type,
                    values: read_values(&mut reader)?,
                })
            }
            MessageType::Audio => PacketBody::Audio(body),
            MessageType::Video => PacketBody::Video(body),
            MessageType::DataAmf3
            | MessageType::SharedObjectAmf3
            | MessageType::CommandAmf3
            | MessageType::SharedObjectAmf0
            | MessageType::Aggregate => PacketBody::Unhandled(body),
        };
        Ok(Self { header, body })
    }
}

pub(crate) fn media_header(message_type: MessageType, timestamp: u32, message_stream_id: u32) -> RtmpHeader {
    let chunk_stream_id = match message_type {
        MessageType::Audio => chunk_stream::AUDIO,
        _ => chunk_stream::VIDEO,
    };
    let mut header = RtmpHeader::new(ChunkType::Type0, chunk_stream_id, message_type);
    header.absolute_timestamp = timestamp;
    header.message_stream_id = message_stream_id;
    header
}

fn read_values(reader: &mut &[u8]) -> Result<Vec<AmfValue>> {
    let mut values = Vec::new();
    while !reader.is_empty() {
        values.push(AmfValue::read_from(reader)?);
    }
    Ok(values)
}

/// Writes `body` behind `header` as a chunk sequence.
///
/// The first chunk uses `header.chunk_type`; every following chunk is a
/// Type3 continuation.
pub fn write_chunked<W: Write>(
    writer: &mut W,
    header: &RtmpHeader,
    body: &[u8],
    chunk_size: u32,
    channel: &mut ChunkStreamInfo,
) -> Result<()> {
    if chunk_size == 0 {
        return Err(ProtocolError::InvalidChunkSize(chunk_size).into());
    }
    if body.len() > MAX_MESSAGE_LENGTH as usize {
        return Err(ProtocolError::MessageTooLarge(body.len()).into());
    }
    let mut header = header.clone();
    header.packet_length = body.len() as u32;

    let mut chunks = body.chunks(chunk_size as usize);
    header.write_to(writer, header.chunk_type, channel)?;
    if let Some(first) = chunks.next() {
        writer.write_all(first)?;
    }
    for chunk in chunks {
        header.write_to(writer, ChunkType::Type3, channel)?;
        writer.write_all(chunk)?;
    }
    Ok(())
}
