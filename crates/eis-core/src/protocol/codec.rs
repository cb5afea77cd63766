//! Binary codec for encoding and decoding EI protocol messages.
//!
//! Wire format:
//! ```text
//! [object_id:8][length:4][opcode:4][args:N]
//! ```
//! Total header size: 16 bytes. All integers are in host byte order and
//! `length` covers the header plus the argument bytes.
//!
//! # Argument encoding (for beginners)
//!
//! The codec has no idea what a "device" or a "frame" is.  It only knows how
//! to lay out a small, fixed set of argument types:
//!
//! | Type              | Size on the wire                                   |
//! |-------------------|----------------------------------------------------|
//! | `uint32`, `int32` | 4 bytes                                            |
//! | `float`           | 4 bytes (IEEE 754 single precision)                |
//! | `uint64`, `int64` | 8 bytes                                            |
//! | `new_id`, `object`| 8 bytes (object ids are 64 bit)                    |
//! | `string`          | 4-byte length incl. NUL, bytes, NUL, pad to 4      |
//! | `fd`              | nothing: file descriptors travel out of band       |
//!
//! The meaning of each argument is defined by the interface catalog in
//! [`crate::protocol::interfaces`], which builds on the raw functions here.

use thiserror::Error;

/// Size of the fixed message header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Upper bound on the declared length of a single message.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The header declares more bytes than the buffer holds.
    #[error("message length overruns buffer: header says {declared}, available is {available}")]
    LengthOverrun { declared: usize, available: usize },

    /// The header declares a length that no valid message can have.
    #[error("invalid message length: {0}")]
    InvalidLength(usize),

    /// An argument could not be parsed (bad UTF-8, missing NUL, and so on).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// An argument did not have the type the message signature requires.
    #[error("argument {index} of {message}: expected {expected:?}")]
    ArgumentMismatch {
        message: &'static str,
        index: usize,
        expected: ArgType,
    },
}

/// The argument types the wire format knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float,
    String,
    NewId,
    Object,
    Fd,
}

/// One decoded (or to-be-encoded) argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Uint32(u32),
    Int32(i32),
    Uint64(u64),
    Int64(i64),
    Float(f32),
    /// `None` encodes as the null string (length 0).
    String(Option<String>),
    NewId(u64),
    Object(u64),
    /// Placeholder for a descriptor passed out of band.
    Fd,
}

impl Arg {
    /// Returns the wire type of this argument.
    pub fn arg_type(&self) -> ArgType {
        match self {
            Arg::Uint32(_) => ArgType::Uint32,
            Arg::Int32(_) => ArgType::Int32,
            Arg::Uint64(_) => ArgType::Uint64,
            Arg::Int64(_) => ArgType::Int64,
            Arg::Float(_) => ArgType::Float,
            Arg::String(_) => ArgType::String,
            Arg::NewId(_) => ArgType::NewId,
            Arg::Object(_) => ArgType::Object,
            Arg::Fd => ArgType::Fd,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Arg::Uint32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Arg::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Arg::Uint64(v) | Arg::NewId(v) | Arg::Object(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Arg::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::String(Some(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub object_id: u64,
    /// Total message length including the header.
    pub length: u32,
    pub opcode: u32,
}

/// A framed message whose arguments have not been interpreted yet.
///
/// The body can only be decoded once the receiver knows which interface
/// `object_id` belongs to, so decoding stops at the frame boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub object_id: u64,
    pub opcode: u32,
    pub body: Vec<u8>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes one message: header followed by the encoded arguments.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if a string contains an
/// interior NUL byte, and [`ProtocolError::InvalidLength`] if the message
/// would exceed [`MAX_MESSAGE_SIZE`].
///
/// # Examples
///
/// ```rust
/// use eis_core::protocol::codec::{decode, encode, Arg};
///
/// let bytes = encode(7, 1, &[Arg::Uint32(42)]).unwrap();
/// let (raw, consumed) = decode(&bytes).unwrap();
/// assert_eq!(raw.object_id, 7);
/// assert_eq!(raw.opcode, 1);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode(object_id: u64, opcode: u32, args: &[Arg]) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::new();
    for arg in args {
        encode_arg(&mut body, arg)?;
    }

    let total = HEADER_SIZE + body.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::InvalidLength(total));
    }

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&object_id.to_ne_bytes());
    buf.extend_from_slice(&(total as u32).to_ne_bytes());
    buf.extend_from_slice(&opcode.to_ne_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Reads the header at the start of `bytes` without consuming anything.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] when fewer than
/// [`HEADER_SIZE`] bytes are available and [`ProtocolError::InvalidLength`]
/// when the declared length is outside `HEADER_SIZE..=MAX_MESSAGE_SIZE`.
pub fn decode_header(bytes: &[u8]) -> Result<Header, ProtocolError> {
    require_len(bytes, HEADER_SIZE)?;

    let header = Header {
        object_id: read_u64(bytes, 0)?,
        length: read_u32(bytes, 8)?,
        opcode: read_u32(bytes, 12)?,
    };

    let length = header.length as usize;
    if !(HEADER_SIZE..=MAX_MESSAGE_SIZE).contains(&length) {
        return Err(ProtocolError::InvalidLength(length));
    }
    Ok(header)
}

/// Decodes one framed message from the beginning of `bytes`.
///
/// Returns the message and the number of bytes consumed so the caller can
/// advance its read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError::LengthOverrun`] if the declared length runs past
/// the end of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<(RawMessage, usize), ProtocolError> {
    let header = decode_header(bytes)?;
    let length = header.length as usize;
    if length > bytes.len() {
        return Err(ProtocolError::LengthOverrun {
            declared: length,
            available: bytes.len(),
        });
    }

    let raw = RawMessage {
        object_id: header.object_id,
        opcode: header.opcode,
        body: bytes[HEADER_SIZE..length].to_vec(),
    };
    Ok((raw, length))
}

/// Decodes a message body according to `signature`.
///
/// Trailing bytes after the last expected argument are ignored so that a
/// newer peer may append arguments without breaking older decoders.
///
/// # Errors
///
/// Returns [`ProtocolError::LengthOverrun`] if an argument runs past the end
/// of the body, or [`ProtocolError::MalformedPayload`] for invalid strings.
pub fn decode_args(body: &[u8], signature: &[ArgType]) -> Result<Vec<Arg>, ProtocolError> {
    let mut args = Vec::with_capacity(signature.len());
    let mut offset = 0usize;

    for ty in signature {
        let arg = match ty {
            ArgType::Uint32 => {
                let v = read_u32(body, offset)?;
                offset += 4;
                Arg::Uint32(v)
            }
            ArgType::Int32 => {
                let v = read_u32(body, offset)? as i32;
                offset += 4;
                Arg::Int32(v)
            }
            ArgType::Float => {
                let v = f32::from_bits(read_u32(body, offset)?);
                offset += 4;
                Arg::Float(v)
            }
            ArgType::Uint64 => {
                let v = read_u64(body, offset)?;
                offset += 8;
                Arg::Uint64(v)
            }
            ArgType::Int64 => {
                let v = read_u64(body, offset)? as i64;
                offset += 8;
                Arg::Int64(v)
            }
            ArgType::NewId => {
                let v = read_u64(body, offset)?;
                offset += 8;
                Arg::NewId(v)
            }
            ArgType::Object => {
                let v = read_u64(body, offset)?;
                offset += 8;
                Arg::Object(v)
            }
            ArgType::String => {
                let (s, consumed) = read_string(body, offset)?;
                offset += consumed;
                Arg::String(s)
            }
            ArgType::Fd => Arg::Fd,
        };
        args.push(arg);
    }

    Ok(args)
}

// ── Stream framing ────────────────────────────────────────────────────────────

/// Accumulates bytes from a stream and yields complete messages.
///
/// Reads from a socket arrive in arbitrary chunks; a message may be split
/// across reads or several messages may arrive in one read.  An incomplete
/// trailing message is kept until more bytes arrive.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    pending: Vec<u8>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as messages.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pops the next complete message, or `Ok(None)` if more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidLength`] as soon as a header with an
    /// impossible length is visible; the stream cannot be resynchronised
    /// after that.
    pub fn next_message(&mut self) -> Result<Option<RawMessage>, ProtocolError> {
        if self.pending.len() < HEADER_SIZE {
            return Ok(None);
        }
        let header = decode_header(&self.pending)?;
        if (header.length as usize) > self.pending.len() {
            return Ok(None);
        }
        let (raw, consumed) = decode(&self.pending)?;
        self.pending.drain(..consumed);
        Ok(Some(raw))
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn encode_arg(buf: &mut Vec<u8>, arg: &Arg) -> Result<(), ProtocolError> {
    match arg {
        Arg::Uint32(v) => buf.extend_from_slice(&v.to_ne_bytes()),
        Arg::Int32(v) => buf.extend_from_slice(&v.to_ne_bytes()),
        Arg::Float(v) => buf.extend_from_slice(&v.to_bits().to_ne_bytes()),
        Arg::Uint64(v) | Arg::NewId(v) | Arg::Object(v) => buf.extend_from_slice(&v.to_ne_bytes()),
        Arg::Int64(v) => buf.extend_from_slice(&v.to_ne_bytes()),
        Arg::String(None) => buf.extend_from_slice(&0u32.to_ne_bytes()),
        Arg::String(Some(s)) => {
            if s.as_bytes().contains(&0) {
                return Err(ProtocolError::MalformedPayload(
                    "string argument contains an interior NUL".to_string(),
                ));
            }
            let len_with_nul = s.len() + 1;
            buf.extend_from_slice(&(len_with_nul as u32).to_ne_bytes());
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
            buf.resize(buf.len() + padding(len_with_nul), 0);
        }
        Arg::Fd => {}
    }
    Ok(())
}

/// Number of zero bytes needed to align `len` to 4 bytes.
fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

fn require_len(bytes: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if bytes.len() < needed {
        Err(ProtocolError::InsufficientData {
            needed,
            available: bytes.len(),
        })
    } else {
        Ok(())
    }
}

fn require_body(body: &[u8], offset: usize, size: usize) -> Result<(), ProtocolError> {
    if offset + size > body.len() {
        Err(ProtocolError::LengthOverrun {
            declared: offset + size,
            available: body.len(),
        })
    } else {
        Ok(())
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    require_body(bytes, offset, 4)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    Ok(u32::from_ne_bytes(raw))
}

fn read_u64(bytes: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    require_body(bytes, offset, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    Ok(u64::from_ne_bytes(raw))
}

/// Reads a length-prefixed, NUL-terminated, padded string.
///
/// Returns the string (or `None` for the null string) and the number of
/// bytes consumed including padding.
fn read_string(body: &[u8], offset: usize) -> Result<(Option<String>, usize), ProtocolError> {
    let len = read_u32(body, offset)? as usize;
    if len == 0 {
        return Ok((None, 4));
    }

    let start = offset + 4;
    let padded = len + padding(len);
    require_body(body, start, padded)?;

    let with_nul = &body[start..start + len];
    let Some((&0, text)) = with_nul.split_last() else {
        return Err(ProtocolError::MalformedPayload(
            "string argument is not NUL-terminated".to_string(),
        ));
    };
    let s = std::str::from_utf8(text)
        .map_err(|e| ProtocolError::MalformedPayload(format!("string is not UTF-8: {e}")))?;
    Ok((Some(s.to_string()), 4 + padded))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
