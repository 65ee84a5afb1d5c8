//! Protobuf tag/length/value primitives
//!
//! Only what the X Protocol messages here need: varints, zigzag, fixed 32/64
//! and length-delimited fields. Fields are always written in ascending field
//! number order, so equal messages encode to equal bytes.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("truncated message at byte {0}")]
    Truncated(usize),
    #[error("varint longer than 10 bytes at byte {0}")]
    VarintOverflow(usize),
    #[error("unsupported wire type {wire_type} for field {field}")]
    WireType { field: u32, wire_type: u8 },
    #[error("required field {field} missing from {message}")]
    MissingField { message: &'static str, field: u32 },
    #[error("unknown {message} type {value}")]
    UnknownType { message: &'static str, value: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    Len = 2,
    Fixed32 = 5,
}

/// A message that can be written as protobuf fields.
pub trait Encode {
    fn encode(&self, w: &mut Writer);

    fn to_bytes(&self) -> Bytes {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// A message that can be read back from protobuf fields.
pub trait Decode: Sized {
    fn decode(buf: &[u8]) -> Result<Self, DecodeError>;
}

#[derive(Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    fn raw_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    fn key(&mut self, field: u32, wire_type: WireType) {
        self.raw_varint((u64::from(field) << 3) | wire_type as u64);
    }

    pub fn uint(&mut self, field: u32, value: u64) {
        self.key(field, WireType::Varint);
        self.raw_varint(value);
    }

    /// `sint64`: zigzag encoded.
    pub fn sint(&mut self, field: u32, value: i64) {
        self.uint(field, ((value << 1) ^ (value >> 63)) as u64);
    }

    pub fn bool(&mut self, field: u32, value: bool) {
        self.uint(field, u64::from(value));
    }

    pub fn double(&mut self, field: u32, value: f64) {
        self.key(field, WireType::Fixed64);
        self.buf.put_f64_le(value);
    }

    pub fn float(&mut self, field: u32, value: f32) {
        self.key(field, WireType::Fixed32);
        self.buf.put_f32_le(value);
    }

    pub fn bytes(&mut self, field: u32, value: &[u8]) {
        self.key(field, WireType::Len);
        self.raw_varint(value.len() as u64);
        self.buf.put_slice(value);
    }

    pub fn string(&mut self, field: u32, value: &str) {
        self.bytes(field, value.as_bytes());
    }

    pub fn opt_string(&mut self, field: u32, value: Option<&str>) {
        if let Some(value) = value {
            self.string(field, value);
        }
    }

    pub fn message<M: Encode + ?Sized>(&mut self, field: u32, message: &M) {
        let mut nested = Writer::new();
        message.encode(&mut nested);
        self.bytes(field, &nested.buf);
    }

    pub fn opt_message<M: Encode>(&mut self, field: u32, message: Option<&M>) {
        if let Some(message) = message {
            self.message(field, message);
        }
    }

    pub fn messages<M: Encode>(&mut self, field: u32, messages: &[M]) {
        for message in messages {
            self.message(field, message);
        }
    }
}

/// A single decoded field value.
#[derive(Debug, Clone, Copy)]
pub enum Field<'a> {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    Len(&'a [u8]),
}

impl<'a> Field<'a> {
    pub fn as_u64(&self) -> u64 {
        match *self {
            Field::Varint(v) | Field::Fixed64(v) => v,
            Field::Fixed32(v) => u64::from(v),
            Field::Len(_) => 0,
        }
    }

    pub fn as_sint(&self) -> i64 {
        let v = self.as_u64();
        ((v >> 1) as i64) ^ -((v & 1) as i64)
    }

    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.as_u64())
    }

    pub fn as_f32(&self) -> f32 {
        f32::from_bits(self.as_u64() as u32)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        match *self {
            Field::Len(bytes) => bytes,
            _ => &[],
        }
    }

    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn raw_varint(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let mut value = 0u64;
        for shift in (0..70).step_by(7) {
            let byte = *self.buf.get(self.pos).ok_or(DecodeError::Truncated(self.pos))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::VarintOverflow(start))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::Truncated(self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Next `(field number, value)`, or `None` at the end of the buffer.
    pub fn next_field(&mut self) -> Result<Option<(u32, Field<'a>)>, DecodeError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let key = self.raw_varint()?;
        let field = (key >> 3) as u32;
        let value = match (key & 0x7) as u8 {
            0 => Field::Varint(self.raw_varint()?),
            1 => {
                let bytes = self.take(8)?;
                Field::Fixed64(u64::from_le_bytes(bytes.try_into().unwrap_or([0; 8])))
            }
            2 => {
                let len = self.raw_varint()? as usize;
                Field::Len(self.take(len)?)
            }
            5 => {
                let bytes = self.take(4)?;
                Field::Fixed32(u32::from_le_bytes(bytes.try_into().unwrap_or([0; 4])))
            }
            wire_type => return Err(DecodeError::WireType { field, wire_type }),
        };
        Ok(Some((field, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_and_zigzag() {
        let mut w = Writer::new();
        w.uint(1, 300);
        w.sint(2, -1);
        w.sint(3, 1);
        let bytes = w.finish();
        assert_eq!(&bytes[..], &[0x08, 0xac, 0x02, 0x10, 0x01, 0x18, 0x02]);

        let mut r = Reader::new(&bytes);
        let (f, v) = r.next_field().unwrap().unwrap();
        assert_eq!((f, v.as_u64()), (1, 300));
        let (f, v) = r.next_field().unwrap().unwrap();
        assert_eq!((f, v.as_sint()), (2, -1));
        let (f, v) = r.next_field().unwrap().unwrap();
        assert_eq!((f, v.as_sint()), (3, 1));
        assert!(r.next_field().unwrap().is_none());
    }

    #[test]
    fn truncated_length_is_reported() {
        let mut r = Reader::new(&[0x0a, 0x05, b'a']);
        assert_eq!(r.next_field().unwrap_err(), DecodeError::Truncated(2));
    }
}
