// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hand-rolled MessagePack codec.
//!
//! This is a value-level codec, not a `serde`-derive surface: the wire
//! protocol needs explicit control over tag width, map-key order and the
//! ext-timestamp widths, which a derive-based encoder does not expose.
//!
//! Supported types: nil, bool, signed/unsigned integers up to 64 bits,
//! float32/float64, UTF-8 strings, byte arrays, arrays, string-keyed maps,
//! and ext type -1 (timestamp) in its three documented widths. The encoder
//! always picks the narrowest tag that fits; map keys are written in
//! insertion order (backed by [`indexmap::IndexMap`]); [`Value::Undefined`]
//! map entries are omitted rather than encoded as nil.
//!
//! Rust integers are natively 64-bit, so [`Integer`] always carries full
//! int64/uint64 precision on the wire rather than needing a high/low-32-bit
//! split to survive a 53-bit float-safe round trip — a peer that
//! reconstructs large integers via multiply-by-2³² (and so loses precision
//! past 2⁵³) still reads ordinary msgpack int64/uint64 tags.

use indexmap::IndexMap;

use crate::error::CodecError;

/// A MessagePack integer, normalized so each representable value has exactly
/// one canonical form: anything that fits in an `i64` is `Signed`, and only
/// values in `(i64::MAX, u64::MAX]` are `Unsigned`. This makes decode(encode(v))
/// stable regardless of which constructor produced `v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integer {
    Signed(i64),
    Unsigned(u64),
}

impl Integer {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Signed(v) => Some(v),
            Self::Unsigned(v) => i64::try_from(v).ok(),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::Signed(v) => u64::try_from(v).ok(),
            Self::Unsigned(v) => Some(v),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Signed(v) => v as f64,
            Self::Unsigned(v) => v as f64,
        }
    }
}

impl From<i64> for Integer {
    fn from(v: i64) -> Self {
        Self::Signed(v)
    }
}

impl From<u64> for Integer {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(signed) => Self::Signed(signed),
            Err(_) => Self::Unsigned(v),
        }
    }
}

/// An ext type -1 timestamp: seconds since the epoch plus a nanosecond
/// remainder, matching the three documented MessagePack timestamp widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanoseconds: u32) -> Self {
        Self { seconds, nanoseconds }
    }
}

/// A self-describing MessagePack value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(Integer),
    Float32(f32),
    Float64(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
    Timestamp(Timestamp),
    /// Never encoded on its own; a map entry whose value is `Undefined` is
    /// dropped entirely rather than written as `Nil`.
    Undefined,
}

impl Value {
    pub fn int(v: i64) -> Self {
        Self::Int(Integer::Signed(v))
    }

    pub fn uint(v: u64) -> Self {
        Self::Int(Integer::from(v))
    }

    pub fn str(v: impl Into<String>) -> Self {
        Self::String(v.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => i.as_i64(),
            _ => None,
        }
    }
}

// -- Encoding ----------------------------------------------------------------

/// Encode a value to a fresh byte buffer.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

/// Encode a value, appending to an existing buffer.
pub fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Nil => buf.push(0xc0),
        Value::Undefined => buf.push(0xc0), // unreachable at top level; map encoder skips these
        Value::Bool(false) => buf.push(0xc2),
        Value::Bool(true) => buf.push(0xc3),
        Value::Int(i) => encode_int(*i, buf),
        Value::Float32(f) => {
            buf.push(0xca);
            buf.extend_from_slice(&f.to_be_bytes());
        }
        Value::Float64(f) => {
            buf.push(0xcb);
            buf.extend_from_slice(&f.to_be_bytes());
        }
        Value::String(s) => encode_str(s, buf),
        Value::Binary(b) => encode_bin(b, buf),
        Value::Array(items) => {
            encode_array_header(items.len(), buf);
            for item in items {
                encode_into(item, buf);
            }
        }
        Value::Map(map) => {
            let entries: Vec<_> =
                map.iter().filter(|(_, v)| !matches!(v, Value::Undefined)).collect();
            encode_map_header(entries.len(), buf);
            for (k, v) in entries {
                encode_str(k, buf);
                encode_into(v, buf);
            }
        }
        Value::Timestamp(ts) => encode_timestamp(*ts, buf),
    }
}

fn encode_int(i: Integer, buf: &mut Vec<u8>) {
    match i {
        Integer::Unsigned(v) => encode_uint(v, buf),
        Integer::Signed(v) if v >= 0 => encode_uint(v as u64, buf),
        Integer::Signed(v) => encode_negint(v, buf),
    }
}

fn encode_uint(v: u64, buf: &mut Vec<u8>) {
    if v <= 0x7f {
        buf.push(v as u8);
    } else if v <= u8::MAX as u64 {
        buf.push(0xcc);
        buf.push(v as u8);
    } else if v <= u16::MAX as u64 {
        buf.push(0xcd);
        buf.extend_from_slice(&(v as u16).to_be_bytes());
    } else if v <= u32::MAX as u64 {
        buf.push(0xce);
        buf.extend_from_slice(&(v as u32).to_be_bytes());
    } else {
        buf.push(0xcf);
        buf.extend_from_slice(&v.to_be_bytes());
    }
}

fn encode_negint(v: i64, buf: &mut Vec<u8>) {
    debug_assert!(v < 0);
    if v >= -32 {
        buf.push((v as i8) as u8);
    } else if v >= i8::MIN as i64 {
        buf.push(0xd0);
        buf.push(v as i8 as u8);
    } else if v >= i16::MIN as i64 {
        buf.push(0xd1);
        buf.extend_from_slice(&(v as i16).to_be_bytes());
    } else if v >= i32::MIN as i64 {
        buf.push(0xd2);
        buf.extend_from_slice(&(v as i32).to_be_bytes());
    } else {
        buf.push(0xd3);
        buf.extend_from_slice(&v.to_be_bytes());
    }
}

fn encode_str(s: &str, buf: &mut Vec<u8>) {
    let bytes = s.as_bytes();
    let len = bytes.len();
    if len <= 31 {
        buf.push(0xa0 | (len as u8));
    } else if len <= u8::MAX as usize {
        buf.push(0xd9);
        buf.push(len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(0xda);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(0xdb);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
    buf.extend_from_slice(bytes);
}

fn encode_bin(b: &[u8], buf: &mut Vec<u8>) {
    let len = b.len();
    if len <= u8::MAX as usize {
        buf.push(0xc4);
        buf.push(len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(0xc5);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(0xc6);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
    buf.extend_from_slice(b);
}

fn encode_array_header(len: usize, buf: &mut Vec<u8>) {
    if len <= 15 {
        buf.push(0x90 | (len as u8));
    } else if len <= u16::MAX as usize {
        buf.push(0xdc);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(0xdd);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

fn encode_map_header(len: usize, buf: &mut Vec<u8>) {
    if len <= 15 {
        buf.push(0x80 | (len as u8));
    } else if len <= u16::MAX as usize {
        buf.push(0xde);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(0xdf);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

fn encode_timestamp(ts: Timestamp, buf: &mut Vec<u8>) {
    if ts.nanoseconds == 0 && ts.seconds >= 0 && ts.seconds <= u32::MAX as i64 {
        buf.push(0xd6); // fixext4
        buf.push(0xff); // ext type -1
        buf.extend_from_slice(&(ts.seconds as u32).to_be_bytes());
    } else if ts.seconds >= 0 && ts.seconds < (1i64 << 34) {
        let combined = ((ts.nanoseconds as u64) << 34) | (ts.seconds as u64);
        buf.push(0xd7); // fixext8
        buf.push(0xff);
        buf.extend_from_slice(&combined.to_be_bytes());
    } else {
        buf.push(0xc7); // ext8
        buf.push(12);
        buf.push(0xff);
        buf.extend_from_slice(&ts.nanoseconds.to_be_bytes());
        buf.extend_from_slice(&ts.seconds.to_be_bytes());
    }
}

// -- Decoding ----------------------------------------------------------------

/// Decode the single value at the start of `bytes`. Trailing bytes beyond the
/// first value are ignored, matching one-frame-per-buffer framing upstream.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    decode_value(&mut cursor)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Copy exactly `N` bytes out of the cursor into a fixed array. `take`
    /// already guarantees the slice is `N` bytes long, so this never panics.
    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let slice = self.take(N)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(slice);
        Ok(buf)
    }

    fn take_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    fn take_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    fn take_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }
}

fn decode_value(c: &mut Cursor<'_>) -> Result<Value, CodecError> {
    let tag = c.take_u8()?;
    match tag {
        0x00..=0x7f => Ok(Value::uint(tag as u64)),
        0xe0..=0xff => Ok(Value::int((tag as i8) as i64)),
        0xc0 => Ok(Value::Nil),
        0xc1 => Err(CodecError::ReservedTag),
        0xc2 => Ok(Value::Bool(false)),
        0xc3 => Ok(Value::Bool(true)),
        0xcc => Ok(Value::uint(c.take_u8()? as u64)),
        0xcd => Ok(Value::uint(c.take_u16()? as u64)),
        0xce => Ok(Value::uint(c.take_u32()? as u64)),
        0xcf => Ok(Value::uint(c.take_u64()?)),
        0xd0 => Ok(Value::int((c.take_u8()? as i8) as i64)),
        0xd1 => Ok(Value::int(i16::from_be_bytes(c.take_array()?) as i64)),
        0xd2 => Ok(Value::int(i32::from_be_bytes(c.take_array()?) as i64)),
        0xd3 => Ok(Value::int(i64::from_be_bytes(c.take_array()?))),
        0xca => Ok(Value::Float32(f32::from_be_bytes(c.take_array()?))),
        0xcb => Ok(Value::Float64(f64::from_be_bytes(c.take_array()?))),
        0xa0..=0xbf => decode_str(c, (tag & 0x1f) as usize),
        0xd9 => {
            let len = c.take_u8()? as usize;
            decode_str(c, len)
        }
        0xda => {
            let len = c.take_u16()? as usize;
            decode_str(c, len)
        }
        0xdb => {
            let len = c.take_u32()? as usize;
            decode_str(c, len)
        }
        0xc4 => {
            let len = c.take_u8()? as usize;
            Ok(Value::Binary(c.take(len)?.to_vec()))
        }
        0xc5 => {
            let len = c.take_u16()? as usize;
            Ok(Value::Binary(c.take(len)?.to_vec()))
        }
        0xc6 => {
            let len = c.take_u32()? as usize;
            Ok(Value::Binary(c.take(len)?.to_vec()))
        }
        0x90..=0x9f => decode_array(c, (tag & 0x0f) as usize),
        0xdc => {
            let len = c.take_u16()? as usize;
            decode_array(c, len)
        }
        0xdd => {
            let len = c.take_u32()? as usize;
            decode_array(c, len)
        }
        0x80..=0x8f => decode_map(c, (tag & 0x0f) as usize),
        0xde => {
            let len = c.take_u16()? as usize;
            decode_map(c, len)
        }
        0xdf => {
            let len = c.take_u32()? as usize;
            decode_map(c, len)
        }
        0xd4 => decode_ext(c, 1),
        0xd5 => decode_ext(c, 2),
        0xd6 => decode_ext(c, 4),
        0xd7 => decode_ext(c, 8),
        0xd8 => decode_ext(c, 16),
        0xc7 => {
            let len = c.take_u8()? as usize;
            decode_ext(c, len)
        }
        0xc8 => {
            let len = c.take_u16()? as usize;
            decode_ext(c, len)
        }
        0xc9 => {
            let len = c.take_u32()? as usize;
            decode_ext(c, len)
        }
    }
}

fn decode_str(c: &mut Cursor<'_>, len: usize) -> Result<Value, CodecError> {
    let bytes = c.take(len)?;
    let s = std::str::from_utf8(bytes).map_err(|_| CodecError::Truncated)?;
    Ok(Value::String(s.to_owned()))
}

fn decode_array(c: &mut Cursor<'_>, len: usize) -> Result<Value, CodecError> {
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(decode_value(c)?);
    }
    Ok(Value::Array(items))
}

fn decode_map(c: &mut Cursor<'_>, len: usize) -> Result<Value, CodecError> {
    let mut map = IndexMap::with_capacity(len);
    for _ in 0..len {
        let key = decode_value(c)?;
        let key = key.as_str().ok_or(CodecError::NonStringMapKey)?.to_owned();
        let value = decode_value(c)?;
        map.insert(key, value);
    }
    Ok(Value::Map(map))
}

fn decode_ext(c: &mut Cursor<'_>, len: usize) -> Result<Value, CodecError> {
    let ext_type = c.take_u8()? as i8;
    let data = c.take(len)?;
    if ext_type != -1 {
        return Err(CodecError::UnsupportedExtType(ext_type));
    }
    match len {
        4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(data);
            Ok(Value::Timestamp(Timestamp::new(u32::from_be_bytes(buf) as i64, 0)))
        }
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(data);
            let combined = u64::from_be_bytes(buf);
            let nanoseconds = (combined >> 34) as u32;
            let seconds = (combined & 0x3_ffff_ffff) as i64;
            Ok(Value::Timestamp(Timestamp::new(seconds, nanoseconds)))
        }
        12 => {
            let mut nanos_buf = [0u8; 4];
            nanos_buf.copy_from_slice(&data[0..4]);
            let mut seconds_buf = [0u8; 8];
            seconds_buf.copy_from_slice(&data[4..12]);
            Ok(Value::Timestamp(Timestamp::new(i64::from_be_bytes(seconds_buf), u32::from_be_bytes(nanos_buf))))
        }
        other => Err(CodecError::UnsupportedTimestampWidth(other)),
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
