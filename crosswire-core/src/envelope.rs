//! Length-prefixed envelope framing.
//!
//! All three wire protocols frame streaming payloads the same way:
//!
//! ```text
//! [flags:1][length:4 BE][payload:length]
//! ```
//!
//! The flag bits differ per protocol: `0x01` marks a compressed payload
//! everywhere, `0x02` marks the Connect end-of-stream frame, and `0x80`
//! marks the gRPC-Web trailers frame.

use bytes::Bytes;

use crate::compression::{BoxedCompression, RequestCompression};

/// Envelope flag bits.
pub mod envelope_flags {
    /// Payload is compressed.
    pub const COMPRESSED: u8 = 0x01;
    /// Connect streaming end-of-stream frame.
    pub const END_STREAM: u8 = 0x02;
    /// gRPC-Web trailers frame (high bit).
    pub const TRAILERS: u8 = 0x80;
}

/// Envelope header size: flags byte plus 4-byte length.
pub const ENVELOPE_HEADER_LEN: usize = 5;

/// Envelope framing errors.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The frame is shorter than its header claims.
    #[error("envelope too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// The compressed flag is set but no decompression pool is available.
    #[error("compressed envelope received without a negotiated compression pool")]
    CompressionRequired,

    /// Decompressing the payload failed.
    #[error("envelope decompression failed: {0}")]
    Decompress(String),

    /// Compressing the payload failed.
    #[error("envelope compression failed: {0}")]
    Compress(String),
}

impl From<EnvelopeError> for crate::RpcError {
    fn from(err: EnvelopeError) -> Self {
        crate::RpcError::unknown(err.to_string()).with_source(err)
    }
}

/// Pack a payload into an envelope frame.
///
/// When `compression` is configured and the payload meets its size
/// threshold, the payload is compressed and the `0x01` flag is set.
pub fn pack(
    payload: &[u8],
    compression: Option<&RequestCompression>,
) -> Result<Bytes, EnvelopeError> {
    let (flags, body) = match compression {
        Some(policy) if policy.should_compress(payload.len()) => {
            let compressed = policy
                .pool
                .compress(payload)
                .map_err(|e| EnvelopeError::Compress(e.to_string()))?;
            (envelope_flags::COMPRESSED, compressed)
        }
        _ => (0, Bytes::copy_from_slice(payload)),
    };

    let mut frame = Vec::with_capacity(ENVELOPE_HEADER_LEN + body.len());
    frame.push(flags);
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(Bytes::from(frame))
}

/// Unpack an envelope frame into its flags and payload.
///
/// Validates the header, slices the payload, and decompresses it when the
/// `0x01` flag is set. A compressed frame without a pool is an error.
pub fn unpack(
    frame: &[u8],
    pool: Option<&BoxedCompression>,
) -> Result<(u8, Bytes), EnvelopeError> {
    let length = message_length(frame)? as usize;
    let total = ENVELOPE_HEADER_LEN + length;
    if frame.len() < total {
        return Err(EnvelopeError::TooShort {
            expected: total,
            actual: frame.len(),
        });
    }

    let flags = frame[0];
    let payload = Bytes::copy_from_slice(&frame[ENVELOPE_HEADER_LEN..total]);

    if flags & envelope_flags::COMPRESSED == 0 {
        return Ok((flags, payload));
    }

    let Some(pool) = pool else {
        return Err(EnvelopeError::CompressionRequired);
    };
    let payload = pool
        .decompress(&payload)
        .map_err(|e| EnvelopeError::Decompress(e.to_string()))?;
    Ok((flags, payload))
}

/// Read the payload length from an envelope header without consuming the
/// payload. Used to slice back-to-back frames out of a single body.
pub fn message_length(frame: &[u8]) -> Result<u32, EnvelopeError> {
    if frame.len() < ENVELOPE_HEADER_LEN {
        return Err(EnvelopeError::TooShort {
            expected: ENVELOPE_HEADER_LEN,
            actual: frame.len(),
        });
    }
    Ok(u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]))
}
