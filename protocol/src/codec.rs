//! # Binary Wire Codec
//!
//! Encodes and decodes the datagram payloads described in
//! [`crate::message`]. The format is deliberately primitive: a one-byte
//! message type followed by self-delimiting records that tile the payload
//! with no separators.
//!
//! ```text
//! digest record: [u8 addr_len][addr][u64 BE version]
//! delta record:  [u8 addr_len][addr][u8 key_len][key][u8 value_len][value][u64 BE version]
//! ```
//!
//! Length prefixes are a single byte, so addresses, keys, and values cap at
//! 255 bytes. Those bounds are enforced at the write path
//! ([`crate::Murmur::update_local`] and node creation); the encoder treats a
//! violation as a programming error.
//!
//! Encoding is deterministic for a fixed input order: no compression, no
//! padding, no varints. Decoding is total over any byte sequence that forms
//! a complete run of records; anything else is a [`CodecError`].

use crate::message::{Delta, Digest, MessageKind};

/// Length of a one-byte field.
const U8_LEN: usize = 1;

/// Length of a big-endian u64 field.
const U64_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while decoding a datagram. Senders are untrusted (well,
/// unauthenticated), so every decode failure is logged and dropped rather
/// than propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The buffer is empty, truncated mid-record, or otherwise malformed.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
    /// The type byte is not a known [`MessageKind`].
    #[error("unknown message type: {0}")]
    UnknownType(u8),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encoded size of a digest record.
pub fn digest_len(digest: &Digest) -> usize {
    U8_LEN + digest.addr.len() + U64_LEN
}

/// Encoded size of a delta record.
pub fn delta_len(delta: &Delta) -> usize {
    U8_LEN + delta.addr.len() + U8_LEN + delta.key.len() + U8_LEN + delta.value.len() + U64_LEN
}

/// Appends a digest record to `buf`.
pub fn encode_digest(buf: &mut Vec<u8>, digest: &Digest) {
    encode_bytes(buf, digest.addr.as_bytes());
    buf.extend_from_slice(&digest.version.to_be_bytes());
}

/// Appends a delta record to `buf`.
pub fn encode_delta(buf: &mut Vec<u8>, delta: &Delta) {
    encode_bytes(buf, delta.addr.as_bytes());
    encode_bytes(buf, delta.key.as_bytes());
    encode_bytes(buf, &delta.value);
    buf.extend_from_slice(&delta.version.to_be_bytes());
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    // Bounds are validated before data enters the peer map.
    debug_assert!(bytes.len() <= 0xff, "field exceeds 1-byte length prefix");
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(bytes);
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Splits a datagram into its message kind and payload.
pub fn decode_kind(buf: &[u8]) -> Result<(MessageKind, &[u8]), CodecError> {
    let (&type_byte, payload) = buf
        .split_first()
        .ok_or(CodecError::InvalidMessage("empty datagram"))?;
    let kind = MessageKind::from_byte(type_byte).ok_or(CodecError::UnknownType(type_byte))?;
    Ok((kind, payload))
}

/// Decodes a digest sync payload into its records. Reads until the buffer
/// is exhausted; a partial trailing record fails the whole message.
pub fn decode_digest_sync(payload: &[u8]) -> Result<Vec<Digest>, CodecError> {
    let mut reader = Reader::new(payload);
    let mut sync = Vec::new();
    while !reader.is_empty() {
        sync.push(Digest {
            addr: reader.take_string()?,
            version: reader.take_u64()?,
        });
    }
    Ok(sync)
}

/// Decodes a delta payload into its records.
pub fn decode_delta_sync(payload: &[u8]) -> Result<Vec<Delta>, CodecError> {
    let mut reader = Reader::new(payload);
    let mut sync = Vec::new();
    while !reader.is_empty() {
        sync.push(Delta {
            addr: reader.take_string()?,
            key: reader.take_string()?,
            value: reader.take_bytes()?.to_vec(),
            version: reader.take_u64()?,
        });
    }
    Ok(sync)
}

/// Cursor over a payload. Every `take_*` either consumes exactly one field
/// or fails; there is no partial consumption to reason about.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take_u8(&mut self) -> Result<u8, CodecError> {
        let (&b, rest) = self
            .buf
            .split_first()
            .ok_or(CodecError::InvalidMessage("truncated length prefix"))?;
        self.buf = rest;
        Ok(b)
    }

    fn take_u64(&mut self) -> Result<u64, CodecError> {
        if self.buf.len() < U64_LEN {
            return Err(CodecError::InvalidMessage("truncated version field"));
        }
        let (head, rest) = self.buf.split_at(U64_LEN);
        self.buf = rest;
        let mut raw = [0u8; U64_LEN];
        raw.copy_from_slice(head);
        Ok(u64::from_be_bytes(raw))
    }

    fn take_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.take_u8()? as usize;
        if self.buf.len() < len {
            return Err(CodecError::InvalidMessage("truncated field body"));
        }
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(head)
    }

    fn take_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.take_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::InvalidMessage("field is not valid utf-8"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
