//! Frame codec for the management protocol.
//!
//! Every message is a fixed 24-byte header followed by an opaque payload:
//!
//! ```text
//! magic:4 | version:1 | flags:1 | opcode:2 | request_id:8 | payload_length:4 | crc32:4
//! ```
//!
//! All integers are big-endian. The checksum covers the payload only.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, TransportError};

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 24;

/// Protocol magic number ("GFS1").
pub const MAGIC: u32 = 0x4746_5331;

/// Protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest payload accepted on the wire (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Operations understood by the management daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// Liveness check; the payload is echoed back.
    Ping = 0x0001,
    /// Fetch the volfile for a volume id.
    GetVolfile = 0x0010,
}

impl TryFrom<u16> for Opcode {
    type Error = TransportError;

    fn try_from(raw: u16) -> Result<Self> {
        match raw {
            0x0001 => Ok(Opcode::Ping),
            0x0010 => Ok(Opcode::GetVolfile),
            other => Err(TransportError::UnknownOpcode(other)),
        }
    }
}

/// Frame flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// No flags set.
    pub const NONE: FrameFlags = FrameFlags(0);
    /// Frame answers a request with the same id.
    pub const RESPONSE: FrameFlags = FrameFlags(0x01);
    /// Payload is a UTF-8 error message instead of a result.
    pub const ERROR: FrameFlags = FrameFlags(0x02);

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    pub fn with(self, other: FrameFlags) -> FrameFlags {
        FrameFlags(self.0 | other.0)
    }

    /// Raw byte representation.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Builds flags from the raw byte, rejecting unknown bits.
    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits & !0x03 != 0 {
            return Err(TransportError::InvalidFrame {
                reason: format!("unknown flag bits 0x{:02X}", bits),
            });
        }
        Ok(FrameFlags(bits))
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Control flags.
    pub flags: FrameFlags,
    /// Operation code.
    pub opcode: Opcode,
    /// Request id used to pair responses with requests.
    pub request_id: u64,
    /// Payload length in bytes.
    pub payload_length: u32,
    /// CRC32 of the payload.
    pub checksum: u32,
}

impl FrameHeader {
    /// Decodes and validates a header (magic, version, opcode, size limit).
    pub fn decode(buf: &[u8; FRAME_HEADER_SIZE]) -> Result<Self> {
        let mut cur = &buf[..];
        let magic = cur.get_u32();
        if magic != MAGIC {
            return Err(TransportError::InvalidMagic {
                expected: MAGIC,
                got: magic,
            });
        }
        let version = cur.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(TransportError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }
        let flags = FrameFlags::from_bits(cur.get_u8())?;
        let opcode = Opcode::try_from(cur.get_u16())?;
        let request_id = cur.get_u64();
        let payload_length = cur.get_u32();
        let checksum = cur.get_u32();
        if payload_length > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: payload_length,
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            flags,
            opcode,
            request_id,
            payload_length,
            checksum,
        })
    }

    fn encode_into(&self, out: &mut BytesMut) {
        out.put_u32(MAGIC);
        out.put_u8(PROTOCOL_VERSION);
        out.put_u8(self.flags.bits());
        out.put_u16(self.opcode as u16);
        out.put_u64(self.request_id);
        out.put_u32(self.payload_length);
        out.put_u32(self.checksum);
    }
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header.
    pub header: FrameHeader,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a request frame, computing length and checksum.
    pub fn new(opcode: Opcode, request_id: u64, payload: Vec<u8>) -> Self {
        Self::with_flags(opcode, request_id, payload, FrameFlags::NONE)
    }

    fn with_flags(opcode: Opcode, request_id: u64, payload: Vec<u8>, flags: FrameFlags) -> Self {
        let header = FrameHeader {
            flags,
            opcode,
            request_id,
            // oversized payloads saturate here and fail check_size on send
            payload_length: u32::try_from(payload.len()).unwrap_or(u32::MAX),
            checksum: crc32fast::hash(&payload),
        };
        Self { header, payload }
    }

    /// Builds the successful response to this request.
    pub fn make_response(&self, payload: Vec<u8>) -> Frame {
        Frame::with_flags(
            self.header.opcode,
            self.header.request_id,
            payload,
            FrameFlags::RESPONSE,
        )
    }

    /// Builds an error response to this request.
    pub fn make_error(&self, message: &str) -> Frame {
        Frame::with_flags(
            self.header.opcode,
            self.header.request_id,
            message.as_bytes().to_vec(),
            FrameFlags::RESPONSE.with(FrameFlags::ERROR),
        )
    }

    /// Operation code.
    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }

    /// Request id.
    pub fn request_id(&self) -> u64 {
        self.header.request_id
    }

    /// Whether the frame is a response.
    pub fn is_response(&self) -> bool {
        self.header.flags.contains(FrameFlags::RESPONSE)
    }

    /// Whether the frame carries an error message.
    pub fn is_error(&self) -> bool {
        self.header.flags.contains(FrameFlags::ERROR)
    }

    /// Serializes header and payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        self.header.encode_into(&mut out);
        out.put_slice(&self.payload);
        out.to_vec()
    }

    /// Decodes a complete frame from a contiguous buffer.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(TransportError::InvalidFrame {
                reason: format!("{} bytes is shorter than a header", buf.len()),
            });
        }
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        raw.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::decode(&raw)?;
        let body = &buf[FRAME_HEADER_SIZE..];
        if body.len() != header.payload_length as usize {
            return Err(TransportError::InvalidFrame {
                reason: format!(
                    "payload length {} does not match header {}",
                    body.len(),
                    header.payload_length
                ),
            });
        }
        let frame = Frame {
            header,
            payload: body.to_vec(),
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Rejects payloads larger than [`MAX_PAYLOAD_SIZE`].
    pub fn check_size(&self) -> Result<()> {
        if self.payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(TransportError::PayloadTooLarge {
                size: self.header.payload_length,
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(())
    }

    /// Verifies the payload checksum.
    pub fn validate(&self) -> Result<()> {
        let computed = crc32fast::hash(&self.payload);
        if computed != self.header.checksum {
            return Err(TransportError::ChecksumMismatch {
                expected: self.header.checksum,
                computed,
            });
        }
        Ok(())
    }
}
