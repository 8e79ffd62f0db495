//! Feedback protocol: addresses, signals and the datagram wire format.
//!
//! Every datagram exchanged between a prober and an echo receiver is a
//! [`Message`]: an address pattern plus zero or one typed argument.  This
//! module is responsible for:
//! - Naming the five protocol addresses and the [`Signal`] vocabulary.
//! - Serialising a [`Message`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Message`].
//! - Interpreting a decoded [`Message`] as a typed [`ProtocolMessage`],
//!   rejecting anything with the wrong arity or argument type for its address.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! The framing is Open Sound Control 1.0 compatible.  All multi-byte integers
//! are **big-endian**, every field is padded with NUL bytes to a multiple of 4.
//!
//! ```text
//! +-------------------------------+
//! | address pattern  "/probe/size"|  NUL-terminated, padded to 4
//! +-------------------------------+
//! | type tags        ",i"         |  ',' + one tag per argument, padded to 4
//! +-------------------------------+
//! | int32 (tag 'i')               |  4 bytes
//! |   -- or --                    |
//! | blob  (tag 'b')               |  4-byte length + bytes, padded to 4
//! +-------------------------------+
//! ```
//!
//! | address          | argument | direction          |
//! |------------------|----------|--------------------|
//! | `/probe/data`    | blob     | prober → receiver  |
//! | `/probe/size`    | int32    | prober → receiver  |
//! | `/probe/success` | none     | receiver → prober  |
//! | `/probe/failed`  | none     | receiver → prober  |
//! | `/probe/stop`    | none     | receiver → prober  |

use thiserror::Error;

/// Address patterns of the five protocol messages.
pub mod address {
    /// Probe payload blob.
    pub const DATA: &str = "/probe/data";
    /// Size announcement (int32, bytes).
    pub const SIZE: &str = "/probe/size";
    /// The last probe arrived intact.
    pub const SUCCESS: &str = "/probe/success";
    /// The last probe was lost while the step was still coarse.
    pub const FAILED: &str = "/probe/failed";
    /// The boundary has been located; the run is over.
    pub const STOP: &str = "/probe/stop";
}

const TAG_INT: u8 = b'i';
const TAG_BLOB: u8 = b'b';

/// Zero-payload feedback signal sent by the echo receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Success,
    Failed,
    Stop,
}

impl Signal {
    /// The address this signal travels on.
    pub fn address(self) -> &'static str {
        match self {
            Signal::Success => address::SUCCESS,
            Signal::Failed => address::FAILED,
            Signal::Stop => address::STOP,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One typed argument of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Int(i32),
    Blob(Vec<u8>),
}

impl Arg {
    fn tag(&self) -> u8 {
        match self {
            Arg::Int(_) => TAG_INT,
            Arg::Blob(_) => TAG_BLOB,
        }
    }
}

/// A decoded datagram: address pattern plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub address: String,
    pub args: Vec<Arg>,
}

impl Message {
    /// Size announcement for a probe of `size` bytes.
    ///
    /// Fails when `size` does not fit the int32 argument.
    pub fn announcement(size: u32) -> Result<Self, CodecError> {
        let value = i32::try_from(size).map_err(|_| CodecError::ValueOutOfRange(size))?;
        Ok(Self {
            address: address::SIZE.to_owned(),
            args: vec![Arg::Int(value)],
        })
    }

    /// Probe payload of exactly `len` bytes.
    pub fn payload(len: usize) -> Self {
        Self {
            address: address::DATA.to_owned(),
            args: vec![Arg::Blob(vec![0u8; len])],
        }
    }

    /// Argument-less feedback signal.
    pub fn signal(signal: Signal) -> Self {
        Self {
            address: signal.address().to_owned(),
            args: Vec::new(),
        }
    }

    /// Serialise this message into a newly allocated byte vector.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(self.encoded_len());

        write_padded_str(&mut buf, self.address.as_bytes());

        let mut tags = Vec::with_capacity(self.args.len() + 1);
        tags.push(b',');
        tags.extend(self.args.iter().map(Arg::tag));
        write_padded_str(&mut buf, &tags);

        for arg in &self.args {
            match arg {
                Arg::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
                Arg::Blob(bytes) => {
                    let len = i32::try_from(bytes.len())
                        .map_err(|_| CodecError::BlobTooLarge(bytes.len()))?;
                    buf.extend_from_slice(&len.to_be_bytes());
                    buf.extend_from_slice(bytes);
                    buf.resize(padded(buf.len()), 0);
                }
            }
        }
        Ok(buf)
    }

    /// Number of bytes [`Message::encode`] will produce.
    pub fn encoded_len(&self) -> usize {
        let address = padded(self.address.len() + 1);
        let tags = padded(self.args.len() + 2);
        let args: usize = self
            .args
            .iter()
            .map(|a| match a {
                Arg::Int(_) => 4,
                Arg::Blob(b) => 4 + padded(b.len()),
            })
            .sum();
        address + tags + args
    }

    /// Parse a [`Message`] from a raw datagram.
    ///
    /// Returns [`Err`] if the buffer is truncated, a string is not
    /// NUL-terminated, the address is not a valid `/`-prefixed pattern, the
    /// type-tag string is missing or names an unsupported type, or a blob
    /// length is negative or overruns the buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = 0;

        let raw_address = read_padded_str(buf, &mut cursor)?;
        let address = std::str::from_utf8(raw_address)
            .map_err(|_| CodecError::InvalidAddress)?
            .to_owned();
        if !address.starts_with('/') {
            return Err(CodecError::InvalidAddress);
        }

        // OSC 1.0 allows omitting the tag string for argument-less messages.
        if cursor == buf.len() {
            return Ok(Self {
                address,
                args: Vec::new(),
            });
        }

        let tags = read_padded_str(buf, &mut cursor)?;
        let Some((b',', tags)) = tags.split_first() else {
            return Err(CodecError::MissingTypeTags);
        };

        let mut args = Vec::with_capacity(tags.len());
        for &tag in tags {
            match tag {
                TAG_INT => args.push(Arg::Int(read_i32(buf, &mut cursor)?)),
                TAG_BLOB => {
                    let len = read_i32(buf, &mut cursor)?;
                    let len = usize::try_from(len).map_err(|_| CodecError::BadBlobLength)?;
                    let end = cursor
                        .checked_add(len)
                        .filter(|&end| end <= buf.len())
                        .ok_or(CodecError::BadBlobLength)?;
                    args.push(Arg::Blob(buf[cursor..end].to_vec()));
                    cursor = padded(end).min(buf.len());
                }
                other => return Err(CodecError::UnsupportedTag(char::from(other))),
            }
        }

        Ok(Self { address, args })
    }
}

/// Errors that can arise when framing or parsing a raw datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("datagram truncated")]
    Truncated,
    #[error("string field is not NUL-terminated")]
    Unterminated,
    #[error("address pattern is not a '/'-prefixed UTF-8 string")]
    InvalidAddress,
    #[error("type-tag string does not start with ','")]
    MissingTypeTags,
    #[error("unsupported argument type tag '{0}'")]
    UnsupportedTag(char),
    #[error("blob length is negative or overruns the datagram")]
    BadBlobLength,
    #[error("blob of {0} bytes cannot be framed")]
    BlobTooLarge(usize),
    #[error("value {0} does not fit an int32 argument")]
    ValueOutOfRange(u32),
}

// ---------------------------------------------------------------------------
// Typed interpretation
// ---------------------------------------------------------------------------

/// A well-formed protocol message, checked against its address contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    /// `/probe/size`: the prober announces a probe of this many bytes.
    Announcement(u32),
    /// `/probe/data`: a probe payload; only its length matters.
    Payload { len: usize },
    /// `/probe/success`, `/probe/failed`, `/probe/stop`.
    Signal(Signal),
}

/// A decoded message that violates the address contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown address {0}")]
    UnknownAddress(String),
    #[error("{address} expects {expected}, got {got}")]
    Malformed {
        address: String,
        expected: &'static str,
        got: String,
    },
    #[error("negative size announcement {0}")]
    NegativeSize(i32),
}

impl TryFrom<Message> for ProtocolMessage {
    type Error = ProtocolError;

    fn try_from(msg: Message) -> Result<Self, Self::Error> {
        let Message { address, args } = msg;
        let expected = match address.as_str() {
            address::SIZE => "one int32",
            address::DATA => "one blob",
            address::SUCCESS | address::FAILED | address::STOP => "no arguments",
            _ => return Err(ProtocolError::UnknownAddress(address)),
        };

        match (address.as_str(), args.as_slice()) {
            (address::SIZE, [Arg::Int(n)]) => u32::try_from(*n)
                .map(ProtocolMessage::Announcement)
                .map_err(|_| ProtocolError::NegativeSize(*n)),
            (address::DATA, [Arg::Blob(blob)]) => Ok(ProtocolMessage::Payload { len: blob.len() }),
            (address::SUCCESS, []) => Ok(ProtocolMessage::Signal(Signal::Success)),
            (address::FAILED, []) => Ok(ProtocolMessage::Signal(Signal::Failed)),
            (address::STOP, []) => Ok(ProtocolMessage::Signal(Signal::Stop)),
            _ => Err(ProtocolError::Malformed {
                got: describe_args(&args),
                address,
                expected,
            }),
        }
    }
}

fn describe_args(args: &[Arg]) -> String {
    if args.is_empty() {
        return "no arguments".to_owned();
    }
    let tags: String = args.iter().map(|a| char::from(a.tag())).collect();
    format!("type tags ,{tags}")
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Round `n` up to the next multiple of 4.
#[inline]
fn padded(n: usize) -> usize {
    (n + 3) & !3
}

/// Write `s`, a NUL terminator, and NUL padding to a multiple of 4.
fn write_padded_str(buf: &mut Vec<u8>, s: &[u8]) {
    buf.extend_from_slice(s);
    buf.push(0);
    buf.resize(padded(buf.len()), 0);
}

fn read_padded_str<'a>(buf: &'a [u8], cursor: &mut usize) -> Result<&'a [u8], CodecError> {
    let rest = buf.get(*cursor..).ok_or(CodecError::Truncated)?;
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(CodecError::Unterminated)?;
    let s = &rest[..nul];
    let end = *cursor + padded(nul + 1);
    if end > buf.len() {
        return Err(CodecError::Truncated);
    }
    *cursor = end;
    Ok(s)
}

fn read_i32(buf: &[u8], cursor: &mut usize) -> Result<i32, CodecError> {
    let bytes: [u8; 4] = buf
        .get(*cursor..*cursor + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(CodecError::Truncated)?;
    *cursor += 4;
    Ok(i32::from_be_bytes(bytes))
}
