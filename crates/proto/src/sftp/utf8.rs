//! Streaming UTF-8 codec.
//!
//! Strings travel as UTF-8 but may be split across buffer boundaries when
//! data is produced or consumed incrementally. The decoder buffers an
//! incomplete trailing sequence until the next call, so feeding the same bytes
//! in any number of chunks yields exactly the text a one-shot decode would.
//!
//! Malformed input never fails: each maximal invalid subsequence becomes one
//! U+FFFD and decoding resumes at the next byte.

/// Replacement character emitted for malformed input.
pub const REPLACEMENT: char = '\u{FFFD}';

/// Incremental UTF-8 decoder.
#[derive(Debug, Default, Clone)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Creates a decoder with no buffered input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if an incomplete sequence is buffered.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Decodes `chunk`, appending complete characters to `out`.
    ///
    /// An incomplete sequence at the end of `chunk` is held back for the next
    /// call.
    pub fn decode(&mut self, chunk: &[u8], out: &mut String) {
        let joined: Vec<u8>;
        let mut input: &[u8] = if self.pending.is_empty() {
            chunk
        } else {
            let mut buf = std::mem::take(&mut self.pending);
            buf.extend_from_slice(chunk);
            joined = buf;
            &joined
        };

        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    out.push_str(text);
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&input[..valid]));
                    match err.error_len() {
                        Some(invalid) => {
                            out.push(REPLACEMENT);
                            input = &input[valid + invalid..];
                        }
                        None => {
                            self.pending.extend_from_slice(&input[valid..]);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Flushes buffered input at end of stream.
    ///
    /// A truncated sequence left over becomes a single U+FFFD.
    pub fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            self.pending.clear();
            out.push(REPLACEMENT);
        }
    }
}

/// Decodes a complete buffer.
pub fn decode(bytes: &[u8]) -> String {
    let mut decoder = Utf8Decoder::new();
    let mut out = String::with_capacity(bytes.len());
    decoder.decode(bytes, &mut out);
    decoder.finish(&mut out);
    out
}

/// Incremental encoder from UTF-16 code units.
///
/// Browser peers hand over text as UTF-16; a surrogate pair may be split across
/// calls, so a dangling high surrogate is kept until the next chunk. Unpaired
/// surrogates encode as U+FFFD.
#[derive(Debug, Default, Clone)]
pub struct Utf8Encoder {
    high_surrogate: Option<u16>,
}

impl Utf8Encoder {
    /// Creates an encoder with no buffered input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a high surrogate is waiting for its pair.
    pub fn has_pending(&self) -> bool {
        self.high_surrogate.is_some()
    }

    /// Encodes `units`, appending UTF-8 bytes to `out`.
    pub fn encode_utf16(&mut self, units: &[u16], out: &mut Vec<u8>) {
        for &unit in units {
            match (self.high_surrogate.take(), unit) {
                (Some(high), 0xDC00..=0xDFFF) => {
                    let code = 0x10000 + (((high as u32) - 0xD800) << 10) + ((unit as u32) - 0xDC00);
                    push_char(char::from_u32(code).unwrap_or(REPLACEMENT), out);
                }
                (pending, 0xD800..=0xDBFF) => {
                    if pending.is_some() {
                        push_char(REPLACEMENT, out);
                    }
                    self.high_surrogate = Some(unit);
                }
                (pending, _) => {
                    if pending.is_some() {
                        push_char(REPLACEMENT, out);
                    }
                    push_char(char::from_u32(unit as u32).unwrap_or(REPLACEMENT), out);
                }
            }
        }
    }

    /// Flushes a dangling high surrogate as U+FFFD.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if self.high_surrogate.take().is_some() {
            push_char(REPLACEMENT, out);
        }
    }
}

fn push_char(c: char, out: &mut Vec<u8>) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}
