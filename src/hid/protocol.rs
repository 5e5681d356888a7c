//! Wire protocol for QMK firmware raw HID reports
//!
//! Report layout (input and output):
//! - Byte 0: report id, owned by the connection layer
//! - Bytes 1..: MessagePack subset
//!   - `"QMV1"` as a str (fixstr or str8)
//!   - a map header (fixmap, map16 or map32) with at most 10 entries
//!   - `uint key -> uint value` pairs, keys fit in a byte, values in two

use std::fmt;
use thiserror::Error;

/// Fixed raw endpoint size of the firmware
pub const RAW_EPSIZE: usize = 64;

/// Format marker at the start of every payload
pub const FORMAT_TAG: &str = "QMV1";

/// Maximum number of key/value pairs per message
pub const MAX_PAIRS: usize = 10;

/// Offset of the first payload byte (after the report id)
pub const PAYLOAD_OFFSET: usize = 1;

const FIXSTR_MASK: u8 = 0xa0;
const FIXMAP_MASK: u8 = 0x80;
const STR8: u8 = 0xd9;
const MAP16: u8 = 0xde;
const MAP32: u8 = 0xdf;
const UINT8: u8 = 0xcc;
const UINT16: u8 = 0xcd;
const UINT32: u8 = 0xce;
const UINT64: u8 = 0xcf;

/// Keys understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKey {
    Unknown = 0,
    Keycode = 1,
    Layer = 2,
    LedState = 3,
}

impl MessageKey {
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => MessageKey::Keycode,
            2 => MessageKey::Layer,
            3 => MessageKey::LedState,
            _ => MessageKey::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageKey::Unknown => "unknown",
            MessageKey::Keycode => "keycode",
            MessageKey::Layer => "layer",
            MessageKey::LedState => "ledstate",
        }
    }
}

/// Errors raised while decoding a report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("bad message format: {0}")]
    BadFormat(&'static str),
    #[error("message holds {0} pairs, at most 10 are supported")]
    TooManyPairs(usize),
    #[error("report is {0} bytes, at least 64 are required")]
    BufferTooShort(usize),
}

/// Errors raised while building a message or encoding it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("output buffer of {have} bytes cannot hold {need} bytes")]
    BufferTooSmall { have: usize, need: usize },
    #[error("message is full (10 pairs)")]
    TooManyPairs,
}

/// Unordered set of up to [`MAX_PAIRS`] unique `(key, value)` pairs.
/// Insertion order is kept for encoding but ignored by equality.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pairs: Vec<(u8, u16)>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing an earlier value for the same key
    pub fn insert(&mut self, key: u8, value: u16) -> Result<(), EncodeError> {
        if let Some(pair) = self.pairs.iter_mut().find(|(k, _)| *k == key) {
            pair.1 = value;
            return Ok(());
        }
        if self.pairs.len() >= MAX_PAIRS {
            return Err(EncodeError::TooManyPairs);
        }
        self.pairs.push((key, value));
        Ok(())
    }

    /// Builder form of [`Message::insert`] for known keys
    pub fn with(mut self, key: MessageKey, value: u16) -> Result<Self, EncodeError> {
        self.insert(key.as_byte(), value)?;
        Ok(self)
    }

    pub fn get(&self, key: u8) -> Option<u16> {
        self.pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    pub fn value_for(&self, key: MessageKey) -> Option<u16> {
        self.get(key.as_byte())
    }

    pub fn pairs(&self) -> &[(u8, u16)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Bytes needed to encode this message, report id excluded
    pub fn encoded_len(&self) -> usize {
        let tag = 1 + FORMAT_TAG.len();
        let header = if self.pairs.len() < 16 { 1 } else { 3 };
        let body: usize = self
            .pairs
            .iter()
            .map(|(k, v)| uint_len(u64::from(*k)) + uint_len(u64::from(*v)))
            .sum();
        tag + header + body
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.pairs.len() == other.pairs.len()
            && self.pairs.iter().all(|(k, v)| other.get(*k) == Some(*v))
    }
}

impl Eq for Message {}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match MessageKey::from_byte(*key) {
                MessageKey::Keycode => write!(f, "keycode=0x{:04X}", value)?,
                MessageKey::Unknown => write!(f, "key{}={}", key, value)?,
                known => write!(f, "{}={}", known.name(), value)?,
            }
        }
        Ok(())
    }
}

/// Decode a raw input report (report id included).
///
/// Nothing is returned unless the whole message parsed.
pub fn decode(report: &[u8]) -> Result<Message, DecodeError> {
    if report.len() < RAW_EPSIZE {
        return Err(DecodeError::BufferTooShort(report.len()));
    }

    let mut reader = Reader::new(&report[PAYLOAD_OFFSET..]);
    let tag = reader.read_tag()?;
    if tag != FORMAT_TAG.as_bytes() {
        return Err(DecodeError::BadFormat("missing QMV1 tag"));
    }

    let count = reader.read_map_len()?;
    if count > MAX_PAIRS {
        return Err(DecodeError::TooManyPairs(count));
    }

    let mut message = Message::new();
    for _ in 0..count {
        let key = u8::try_from(reader.read_uint()?)
            .map_err(|_| DecodeError::BadFormat("key does not fit in a byte"))?;
        let value = u16::try_from(reader.read_uint()?)
            .map_err(|_| DecodeError::BadFormat("value does not fit in two bytes"))?;
        // Capacity was checked against the header, so insert cannot overflow.
        message
            .insert(key, value)
            .map_err(|_| DecodeError::TooManyPairs(count))?;
    }
    Ok(message)
}

/// Encode `message` into `buf`, starting after the report id byte.
///
/// `buf` is the full output report; `buf[0]` is left untouched. Returns the
/// number of payload bytes written.
pub fn encode(message: &Message, buf: &mut [u8]) -> Result<usize, EncodeError> {
    let need = PAYLOAD_OFFSET + message.encoded_len();
    if buf.len() < need {
        return Err(EncodeError::BufferTooSmall {
            have: buf.len(),
            need,
        });
    }

    let mut writer = Writer::new(&mut buf[PAYLOAD_OFFSET..]);
    writer.write_str(FORMAT_TAG);
    writer.write_map_len(message.len());
    for (key, value) in message.pairs() {
        writer.write_uint(u64::from(*key));
        writer.write_uint(u64::from(*value));
    }
    Ok(writer.pos)
}

/// Encode into a zeroed buffer of `report_len` bytes (byte 0 stays zero)
pub fn encode_report(message: &Message, report_len: usize) -> Result<Vec<u8>, EncodeError> {
    let mut buf = vec![0u8; report_len];
    encode(message, &mut buf)?;
    Ok(buf)
}

fn uint_len(value: u64) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0xff => 2,
        0x100..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::BadFormat("truncated message"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn be(&mut self, n: usize) -> Result<u64, DecodeError> {
        Ok(self
            .take(n)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// The tag as a msgpack str, or the four bare tag bytes
    fn read_tag(&mut self) -> Result<&'a [u8], DecodeError> {
        if self.data.get(self.pos..).is_some_and(|rest| rest.starts_with(FORMAT_TAG.as_bytes())) {
            return self.take(FORMAT_TAG.len());
        }
        self.read_str()
    }

    fn read_str(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = match self.byte()? {
            b if b & 0xe0 == FIXSTR_MASK => usize::from(b & 0x1f),
            STR8 => usize::from(self.byte()?),
            _ => return Err(DecodeError::BadFormat("expected a str")),
        };
        self.take(len)
    }

    fn read_map_len(&mut self) -> Result<usize, DecodeError> {
        let len = match self.byte()? {
            b if b & 0xf0 == FIXMAP_MASK => u64::from(b & 0x0f),
            MAP16 => self.be(2)?,
            MAP32 => self.be(4)?,
            _ => return Err(DecodeError::BadFormat("expected a map header")),
        };
        usize::try_from(len).map_err(|_| DecodeError::TooManyPairs(usize::MAX))
    }

    fn read_uint(&mut self) -> Result<u64, DecodeError> {
        match self.byte()? {
            b @ 0x00..=0x7f => Ok(u64::from(b)),
            UINT8 => self.be(1),
            UINT16 => self.be(2),
            UINT32 => self.be(4),
            UINT64 => self.be(8),
            _ => Err(DecodeError::BadFormat("expected an unsigned integer")),
        }
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn write_str(&mut self, s: &str) {
        // Tag is 4 bytes, always a fixstr.
        self.put(&[FIXSTR_MASK | s.len() as u8]);
        self.put(s.as_bytes());
    }

    fn write_map_len(&mut self, len: usize) {
        if len < 16 {
            self.put(&[FIXMAP_MASK | len as u8]);
        } else {
            self.put(&[MAP16]);
            self.put(&(len as u16).to_be_bytes());
        }
    }

    fn write_uint(&mut self, value: u64) {
        match value {
            0..=0x7f => self.put(&[value as u8]),
            0x80..=0xff => self.put(&[UINT8, value as u8]),
            0x100..=0xffff => {
                self.put(&[UINT16]);
                self.put(&(value as u16).to_be_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.put(&[UINT32]);
                self.put(&(value as u32).to_be_bytes());
            }
            _ => {
                self.put(&[UINT64]);
                self.put(&value.to_be_bytes());
            }
        }
    }
}
