// src/rtmp/amf0.rs - AMF0 value codec
//
// Supported markers: Number, Boolean, String, Object, Null, Undefined,
// ECMA array and Strict array. Objects keep insertion order.

use crate::error::AmfError;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

// ============================================================================
// Type markers
// ============================================================================

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;

/// `00 00 09` terminates objects and ECMA arrays.
const OBJECT_END: [u8; 3] = [0x00, 0x00, MARKER_OBJECT_END];

/// Deepest container nesting accepted when decoding.
pub const MAX_NESTING_DEPTH: usize = 64;

/// An AMF0 value.
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(AmfObject),
    Null,
    Undefined,
    /// Object preceded by a 4-byte entry count
    EcmaArray(AmfObject),
    StrictArray(Vec<AmfValue>),
}

/// Ordered key/value map used by `Object` and `EcmaArray`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmfObject {
    properties: Vec<(String, AmfValue)>,
}

impl AmfObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an existing entry in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AmfValue>) {
        let key = key.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.properties.push((key, value)),
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AmfValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// String property lookup.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AmfValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AmfValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn body_size(&self) -> usize {
        self.properties
            .iter()
            .map(|(k, v)| string_size(k, true) + v.byte_size())
            .sum::<usize>()
            + OBJECT_END.len()
    }

    fn write_body<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for (key, value) in &self.properties {
            write_string(writer, key, true)?;
            value.write_to(writer)?;
        }
        writer.write_all(&OBJECT_END)
    }

    fn read_body(reader: &mut &[u8], depth: usize) -> Result<Self, AmfError> {
        let mut object = AmfObject::new();
        loop {
            match reader.get(..OBJECT_END.len()) {
                Some(end) if end == OBJECT_END => {
                    *reader = &reader[OBJECT_END.len()..];
                    return Ok(object);
                }
                Some(_) => {}
                None => return Err(AmfError::MissingEndMarker),
            }
            let key = read_string(reader)?;
            let value = AmfValue::read_nested(reader, depth)?;
            object.properties.push((key, value));
        }
    }
}

impl AmfValue {
    /// Encoded size in bytes, type marker included.
    pub fn byte_size(&self) -> usize {
        match self {
            AmfValue::Number(_) => 1 + 8,
            AmfValue::Boolean(_) => 1 + 1,
            AmfValue::String(s) => string_size(s, false),
            AmfValue::Object(o) => 1 + o.body_size(),
            AmfValue::Null | AmfValue::Undefined => 1,
            AmfValue::EcmaArray(o) => 1 + 4 + o.body_size(),
            AmfValue::StrictArray(items) => {
                1 + 4 + items.iter().map(AmfValue::byte_size).sum::<usize>()
            }
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            AmfValue::Number(n) => {
                writer.write_u8(MARKER_NUMBER)?;
                writer.write_f64::<BigEndian>(*n)
            }
            AmfValue::Boolean(b) => {
                writer.write_u8(MARKER_BOOLEAN)?;
                writer.write_u8(u8::from(*b))
            }
            AmfValue::String(s) => write_string(writer, s, false),
            AmfValue::Object(o) => {
                writer.write_u8(MARKER_OBJECT)?;
                o.write_body(writer)
            }
            AmfValue::Null => writer.write_u8(MARKER_NULL),
            AmfValue::Undefined => writer.write_u8(MARKER_UNDEFINED),
            AmfValue::EcmaArray(o) => {
                writer.write_u8(MARKER_ECMA_ARRAY)?;
                writer.write_u32::<BigEndian>(o.len() as u32)?;
                o.write_body(writer)
            }
            AmfValue::StrictArray(items) => {
                writer.write_u8(MARKER_STRICT_ARRAY)?;
                writer.write_u32::<BigEndian>(items.len() as u32)?;
                for item in items {
                    item.write_to(writer)?;
                }
                Ok(())
            }
        }
    }

    /// Decodes one value and advances `reader` past it.
    ///
    /// Containers nested deeper than [`MAX_NESTING_DEPTH`] are rejected.
    pub fn read_from(reader: &mut &[u8]) -> Result<Self, AmfError> {
        Self::read_nested(reader, 0)
    }

    fn read_nested(reader: &mut &[u8], depth: usize) -> Result<Self, AmfError> {
        let marker = reader.read_u8().map_err(|_| AmfError::Truncated)?;
        match marker {
            MARKER_NUMBER => Ok(AmfValue::Number(
                reader
                    .read_f64::<BigEndian>()
                    .map_err(|_| AmfError::Truncated)?,
            )),
            MARKER_BOOLEAN => Ok(AmfValue::Boolean(
                reader.read_u8().map_err(|_| AmfError::Truncated)? != 0,
            )),
            MARKER_STRING => Ok(AmfValue::String(read_string(reader)?)),
            MARKER_OBJECT => Ok(AmfValue::Object(AmfObject::read_body(
                reader,
                enter(depth)?,
            )?)),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED => Ok(AmfValue::Undefined),
            MARKER_ECMA_ARRAY => {
                // The count is advisory; the end marker terminates the body.
                reader
                    .read_u32::<BigEndian>()
                    .map_err(|_| AmfError::Truncated)?;
                Ok(AmfValue::EcmaArray(AmfObject::read_body(
                    reader,
                    enter(depth)?,
                )?))
            }
            MARKER_STRICT_ARRAY => {
                let depth = enter(depth)?;
                let count = reader
                    .read_u32::<BigEndian>()
                    .map_err(|_| AmfError::Truncated)?;
                let mut items = Vec::with_capacity((count as usize).min(reader.len()));
                for _ in 0..count {
                    items.push(AmfValue::read_nested(reader, depth)?);
                }
                Ok(AmfValue::StrictArray(items))
            }
            other => Err(AmfError::UnsupportedType(other)),
        }
    }

    /// Encodes into a fresh buffer. Fails on strings longer than 65535 bytes.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.byte_size());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Properties of an `Object` or `EcmaArray`.
    pub fn as_object(&self) -> Option<&AmfObject> {
        match self {
            AmfValue::Object(o) | AmfValue::EcmaArray(o) => Some(o),
            _ => None,
        }
    }
}

impl From<f64> for AmfValue {
    fn from(n: f64) -> Self {
        AmfValue::Number(n)
    }
}

impl From<u32> for AmfValue {
    fn from(n: u32) -> Self {
        AmfValue::Number(f64::from(n))
    }
}

impl From<bool> for AmfValue {
    fn from(b: bool) -> Self {
        AmfValue::Boolean(b)
    }
}

impl From<&str> for AmfValue {
    fn from(s: &str) -> Self {
        AmfValue::String(s.to_string())
    }
}

impl From<String> for AmfValue {
    fn from(s: String) -> Self {
        AmfValue::String(s)
    }
}

impl From<AmfObject> for AmfValue {
    fn from(o: AmfObject) -> Self {
        AmfValue::Object(o)
    }
}

fn enter(depth: usize) -> Result<usize, AmfError> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(AmfError::NestingTooDeep(MAX_NESTING_DEPTH));
    }
    Ok(depth + 1)
}

// ============================================================================
// Strings
// ============================================================================

/// Encoded string size; object keys carry no type marker.
fn string_size(s: &str, is_key: bool) -> usize {
    let marker = if is_key { 0 } else { 1 };
    marker + 2 + s.len()
}

fn write_string<W: Write>(writer: &mut W, s: &str, is_key: bool) -> io::Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            AmfError::StringTooLong(s.len()),
        )
    })?;
    if !is_key {
        writer.write_u8(MARKER_STRING)?;
    }
    writer.write_u16::<BigEndian>(len)?;
    writer.write_all(s.as_bytes())
}

/// Reads a length-prefixed string (no type marker).
fn read_string(reader: &mut &[u8]) -> Result<String, AmfError> {
    let len = reader
        .read_u16::<BigEndian>()
        .map_err(|_| AmfError::Truncated)? as usize;
    if reader.len() < len {
        return Err(AmfError::Truncated);
    }
    let (raw, rest) = reader.split_at(len);
    *reader = rest;
    String::from_utf8(raw.to_vec()).map_err(|_| AmfError::InvalidString)
}
