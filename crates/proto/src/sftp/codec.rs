//! SFTP packet codec.
//!
//! # Frame Format
//!
//! ```text
//! uint32    length     (byte count of everything after this field)
//! byte      type
//! uint32    request-id (absent for SSH_FXP_INIT and SSH_FXP_VERSION)
//! byte[n]   payload
//! ```
//!
//! Each WebSocket message carries exactly one frame, so `length` must match the
//! message size exactly. Anything else is a framing violation.
//!
//! # Primitive Encoding
//!
//! - integers are big-endian; signed values use two's complement
//! - 64-bit values are two 32-bit words, high word first
//! - strings and opaque data carry a `uint32` byte count prefix
//! - strings are UTF-8; malformed input decodes to U+FFFD instead of failing

use super::message::MessageType;
use super::utf8;
use bytes::{BufMut, Bytes, BytesMut};
use sftpws_platform::{SftpWsError, SftpWsResult};

/// Size of the frame length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Smallest valid frame: length prefix plus type byte.
pub const MIN_FRAME_LEN: usize = LENGTH_PREFIX_LEN + 1;

fn unexpected_end() -> SftpWsError {
    SftpWsError::Protocol("Unexpected end of packet".to_string())
}

/// Cursor over the payload of a single packet.
///
/// Every read is bounds-checked; reading past the end fails with
/// "Unexpected end of packet" and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> PacketReader<'a> {
    /// Creates a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Returns the current offset.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Returns true when every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> SftpWsResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(unexpected_end());
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> SftpWsResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a big-endian `uint32`.
    pub fn read_u32(&mut self) -> SftpWsResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a big-endian two's complement `int32`.
    pub fn read_i32(&mut self) -> SftpWsResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads a `uint64` encoded as two big-endian words, high word first.
    pub fn read_u64(&mut self) -> SftpWsResult<u64> {
        if self.remaining() < 8 {
            return Err(unexpected_end());
        }
        let hi = self.read_u32()? as u64;
        let lo = self.read_u32()? as u64;
        Ok((hi << 32) | lo)
    }

    /// Reads an `int64` encoded as two big-endian words, high word first.
    pub fn read_i64(&mut self) -> SftpWsResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> SftpWsResult<&'a [u8]> {
        self.take(len)
    }

    /// Reads length-prefixed opaque data.
    pub fn read_data(&mut self) -> SftpWsResult<&'a [u8]> {
        let start = self.position;
        let len = self.read_u32()? as usize;
        self.take(len).map_err(|e| {
            self.position = start;
            e
        })
    }

    /// Reads a length-prefixed UTF-8 string.
    ///
    /// Malformed sequences are replaced with U+FFFD.
    pub fn read_string(&mut self) -> SftpWsResult<String> {
        let bytes = self.read_data()?;
        Ok(utf8::decode(bytes))
    }

    /// Skips a length-prefixed string without decoding it.
    pub fn skip_string(&mut self) -> SftpWsResult<()> {
        self.read_data().map(|_| ())
    }

    /// Returns the unread remainder and consumes it.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.position..];
        self.position = self.data.len();
        rest
    }
}

/// A decoded frame header with a cursor over its payload.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    /// Raw type byte
    pub kind: u8,
    /// Request id, absent for INIT and VERSION
    pub id: Option<u32>,
    /// Payload cursor positioned after the header
    pub payload: PacketReader<'a>,
}

impl<'a> Frame<'a> {
    /// Parses one complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`SftpWsError::Protocol`] if:
    /// - data is shorter than the minimum frame (5 bytes)
    /// - the declared length does not match the bytes that follow it
    /// - a request id is required but missing
    pub fn parse(data: &'a [u8]) -> SftpWsResult<Self> {
        if data.len() < MIN_FRAME_LEN {
            return Err(SftpWsError::Protocol(format!(
                "Frame too short: {} bytes (minimum {})",
                data.len(),
                MIN_FRAME_LEN
            )));
        }

        let mut reader = PacketReader::new(data);
        let length = reader.read_u32()? as usize;
        if length != reader.remaining() {
            return Err(SftpWsError::Protocol(format!(
                "Frame length mismatch: declared {} bytes, got {} bytes",
                length,
                reader.remaining()
            )));
        }

        let kind = reader.read_u8()?;
        let id = if MessageType::carries_request_id(kind) {
            Some(reader.read_u32().map_err(|_| {
                SftpWsError::Protocol(format!("Frame of type {} is missing its request id", kind))
            })?)
        } else {
            None
        };

        Ok(Self {
            kind,
            id,
            payload: reader,
        })
    }
}

/// Builds a single frame.
///
/// The length prefix is reserved up front and backpatched by [`finish`].
///
/// [`finish`]: PacketWriter::finish
#[derive(Debug)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    /// Starts a frame of the given type.
    ///
    /// `id` is written for every type except INIT and VERSION.
    pub fn new(kind: MessageType, id: u32) -> Self {
        Self::with_capacity(kind, id, 64)
    }

    /// Starts a frame with room for `capacity` payload bytes.
    pub fn with_capacity(kind: MessageType, id: u32, capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(MIN_FRAME_LEN + 4 + capacity);
        buf.put_u32(0);
        buf.put_u8(kind as u8);
        if MessageType::carries_request_id(kind as u8) {
            buf.put_u32(id);
        }
        Self { buf }
    }

    /// Bytes written so far, including the length prefix.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing but the header has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.len() <= MIN_FRAME_LEN
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    /// Writes a big-endian `uint32`.
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Writes a big-endian two's complement `int32`.
    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    /// Writes a `uint64` as two big-endian words, high word first.
    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u32((value >> 32) as u32);
        self.buf.put_u32(value as u32);
        self
    }

    /// Writes an `int64` as two big-endian words, high word first.
    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.write_u64(value as u64)
    }

    /// Writes length-prefixed opaque data.
    pub fn write_data(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_u32(data.len() as u32);
        self.buf.put_slice(data);
        self
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        self.write_data(value.as_bytes())
    }

    /// Writes raw bytes without a length prefix.
    pub fn write_raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    /// Backpatches the length prefix and returns the finished frame.
    pub fn finish(mut self) -> Bytes {
        let length = (self.buf.len() - LENGTH_PREFIX_LEN) as u32;
        self.buf[..LENGTH_PREFIX_LEN].copy_from_slice(&length.to_be_bytes());
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_encoding() {
        let mut writer = PacketWriter::new(MessageType::Status, 9);
        writer
            .write_u8(0xfe)
            .write_i32(-2)
            .write_u64(0x0000_0001_0000_0002)
            .write_i64(-1);
        let frame = writer.finish();

        let mut parsed = Frame::parse(&frame).unwrap();
        assert_eq!(parsed.kind, MessageType::Status as u8);
        assert_eq!(parsed.id, Some(9));
        assert_eq!(parsed.payload.read_u8().unwrap(), 0xfe);
        assert_eq!(parsed.payload.read_i32().unwrap(), -2);
        assert_eq!(parsed.payload.read_u64().unwrap(), (1u64 << 32) + 2);
        assert_eq!(parsed.payload.read_i64().unwrap(), -1);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn test_i32_big_endian_twos_complement() {
        let mut reader = PacketReader::new(&[0xff, 0xff, 0xff, 0xfe]);
        assert_eq!(reader.read_i32().unwrap(), -2);
    }

    #[test]
    fn test_u64_beyond_53_bits_is_exact() {
        let value = (1u64 << 60) + 12345;
        let mut writer = PacketWriter::new(MessageType::Data, 1);
        writer.write_u64(value);
        let frame = writer.finish();
        let mut parsed = Frame::parse(&frame).unwrap();
        assert_eq!(parsed.payload.read_u64().unwrap(), value);
    }

    #[test]
    fn test_length_backpatch() {
        let mut writer = PacketWriter::new(MessageType::Open, 3);
        writer.write_string("/a.txt");
        let frame = writer.finish();

        let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(length, frame.len() - 4);
        // type + id + (4 + 6)
        assert_eq!(length, 1 + 4 + 10);
    }

    #[test]
    fn test_init_and_version_have_no_id() {
        let mut writer = PacketWriter::new(MessageType::Init, 77);
        writer.write_u32(3);
        let frame = writer.finish();
        assert_eq!(&frame[..], &[0, 0, 0, 5, 1, 0, 0, 0, 3]);

        let mut parsed = Frame::parse(&frame).unwrap();
        assert_eq!(parsed.id, None);
        assert_eq!(parsed.payload.read_u32().unwrap(), 3);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        // declares 10 bytes, carries 9
        let data = [0, 0, 0, 10, 101, 0, 0, 0, 1, 0, 0, 0, 0];
        let err = Frame::parse(&data).unwrap_err();
        assert!(matches!(err, SftpWsError::Protocol(msg) if msg.contains("length mismatch")));

        // trailing garbage is rejected too
        let data = [0, 0, 0, 5, 1, 0, 0, 0, 3, 0xff];
        assert!(Frame::parse(&data).is_err());
    }

    #[test]
    fn test_too_short_rejected() {
        assert!(Frame::parse(&[0, 0, 0]).is_err());
        assert!(Frame::parse(&[]).is_err());
    }

    #[test]
    fn test_missing_request_id_rejected() {
        let data = [0, 0, 0, 3, 4, 0, 0];
        let err = Frame::parse(&data).unwrap_err();
        assert!(matches!(err, SftpWsError::Protocol(msg) if msg.contains("request id")));
    }

    #[test]
    fn test_unexpected_end_of_packet() {
        let mut reader = PacketReader::new(&[0, 0, 0, 8, b'a', b'b']);
        let err = reader.read_string().unwrap_err();
        match err {
            SftpWsError::Protocol(msg) => assert_eq!(msg, "Unexpected end of packet"),
            other => panic!("Expected Protocol error, got {:?}", other),
        }
        // cursor did not move
        assert_eq!(reader.position(), 0);
        assert!(reader.read_u64().is_err());
    }

    #[test]
    fn test_string_with_invalid_utf8_is_replaced() {
        let mut reader = PacketReader::new(&[0, 0, 0, 3, b'o', 0xff, b'k']);
        assert_eq!(reader.read_string().unwrap(), "o\u{FFFD}k");
    }

    #[test]
    fn test_read_rest() {
        let mut reader = PacketReader::new(&[1, 2, 3, 4]);
        reader.read_u8().unwrap();
        assert_eq!(reader.read_rest(), &[2, 3, 4]);
        assert!(reader.is_empty());
    }
}
