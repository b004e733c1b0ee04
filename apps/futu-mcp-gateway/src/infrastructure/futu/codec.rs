//! Frame Codec
//!
//! Encodes and decodes OpenD TCP frames.
//!
//! # Frame Layout
//!
//! Every frame is a fixed 44-byte little-endian header followed by the body:
//!
//! ```text
//! "FT" | proto_id u32 | fmt u8 | ver u8 | serial u32 | body_len u32 | sha1[20] | reserved[8]
//! ```
//!
//! The gateway always speaks the JSON body format. Bodies are verified
//! against the SHA-1 digest carried in the header.

use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::{FORMAT_JSON, HEADER_FLAG, HEADER_LEN, MAX_BODY_LEN, PROTO_VERSION};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Socket read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header does not start with `FT`.
    #[error("bad frame flag: {0:?}")]
    BadFlag([u8; 2]),

    /// Body is not JSON.
    #[error("unsupported body format {0}")]
    UnsupportedFormat(u8),

    /// Body length exceeds the accepted maximum.
    #[error("frame body too large: {0} bytes")]
    BodyTooLarge(u32),

    /// Body does not match the header digest.
    #[error("body digest mismatch for proto {proto_id}")]
    DigestMismatch {
        /// Protocol id of the corrupt frame.
        proto_id: u32,
    },
}

// =============================================================================
// Header
// =============================================================================

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol id.
    pub proto_id: u32,
    /// Body format.
    pub format: u8,
    /// Request serial; echoed back on replies.
    pub serial: u32,
    /// Body length in bytes.
    pub body_len: u32,
    /// SHA-1 of the body.
    pub body_sha1: [u8; 20],
}

impl FrameHeader {
    /// Header for a JSON `body`.
    #[must_use]
    pub fn for_body(proto_id: u32, serial: u32, body: &[u8]) -> Self {
        Self {
            proto_id,
            format: FORMAT_JSON,
            serial,
            body_len: u32::try_from(body.len()).unwrap_or(u32::MAX),
            body_sha1: digest(body),
        }
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0_u8; HEADER_LEN];
        out[0..2].copy_from_slice(&HEADER_FLAG);
        out[2..6].copy_from_slice(&self.proto_id.to_le_bytes());
        out[6] = self.format;
        out[7] = PROTO_VERSION;
        out[8..12].copy_from_slice(&self.serial.to_le_bytes());
        out[12..16].copy_from_slice(&self.body_len.to_le_bytes());
        out[16..36].copy_from_slice(&self.body_sha1);
        out
    }

    /// Parse wire bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on a wrong flag, non-JSON format or oversized body.
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self, CodecError> {
        let flag = [bytes[0], bytes[1]];
        if flag != HEADER_FLAG {
            return Err(CodecError::BadFlag(flag));
        }
        let format = bytes[6];
        if format != FORMAT_JSON {
            return Err(CodecError::UnsupportedFormat(format));
        }
        let body_len = le_u32(bytes, 12);
        if body_len > MAX_BODY_LEN {
            return Err(CodecError::BodyTooLarge(body_len));
        }
        let mut body_sha1 = [0_u8; 20];
        body_sha1.copy_from_slice(&bytes[16..36]);
        Ok(Self {
            proto_id: le_u32(bytes, 2),
            format,
            serial: le_u32(bytes, 8),
            body_len,
            body_sha1,
        })
    }
}

fn le_u32(bytes: &[u8; HEADER_LEN], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn digest(body: &[u8]) -> [u8; 20] {
    let mut out = [0_u8; 20];
    out.copy_from_slice(&Sha1::digest(body));
    out
}

// =============================================================================
// Frames
// =============================================================================

/// A complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Protocol id.
    pub proto_id: u32,
    /// Serial from the header.
    pub serial: u32,
    /// JSON body.
    pub body: Vec<u8>,
}

/// Encode a frame into a single buffer.
#[must_use]
pub fn encode_frame(proto_id: u32, serial: u32, body: &[u8]) -> Vec<u8> {
    let header = FrameHeader::for_body(proto_id, serial, body);
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(body);
    out
}

/// Write one frame and flush.
///
/// # Errors
///
/// Returns an error if the socket write fails.
pub async fn write_frame<W>(
    writer: &mut W,
    proto_id: u32,
    serial: u32,
    body: &[u8],
) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&encode_frame(proto_id, serial, body))
        .await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, verifying its digest.
///
/// # Errors
///
/// Returns an error on EOF, a malformed header or a digest mismatch.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0_u8; HEADER_LEN];
    reader.read_exact(&mut raw).await?;
    let header = FrameHeader::decode(&raw)?;

    let mut body = vec![0_u8; header.body_len as usize];
    reader.read_exact(&mut body).await?;
    if digest(&body) != header.body_sha1 {
        return Err(CodecError::DigestMismatch {
            proto_id: header.proto_id,
        });
    }

    Ok(Frame {
        proto_id: header.proto_id,
        serial: header.serial,
        body,
    })
}
