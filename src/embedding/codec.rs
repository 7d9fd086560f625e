//! Fixed-width binary vector codec.
//!
//! Layout (version 1):
//! - magic: `b"PMVC"`
//! - version: u8 (1)
//! - element type: u8 (0 = f32, little-endian)
//! - dimension: u32 (little-endian)
//! - values: [f32; dimension] (little-endian)
//! - checksum: u32 (CRC32 of every byte before it)
//!
//! The textual form is the standard base64 of the binary form.

use base64::{engine::general_purpose::STANDARD, Engine as _};

const MAGIC: &[u8; 4] = b"PMVC";

/// Current codec version
pub const CODEC_VERSION: u8 = 1;

const ELEMENT_F32_LE: u8 = 0;

/// magic(4) + version(1) + element type(1) + dimension(4)
const PREFIX_SIZE: usize = 10;

const CHECKSUM_SIZE: usize = 4;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CodecError {
    #[error("vector component {index} is not finite")]
    NonFinite { index: usize },

    #[error("vector too large: {0} components")]
    TooLarge(usize),

    #[error("truncated vector payload: {0} bytes")]
    Truncated(usize),

    #[error("bad magic bytes")]
    BadMagic,

    #[error("unsupported codec version {0}, supported version {CODEC_VERSION}")]
    UnsupportedVersion(u8),

    #[error("unsupported element type {0}")]
    UnsupportedElement(u8),

    #[error("length mismatch: header declares {declared} components, payload is {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch: payload may be corrupted")]
    ChecksumMismatch,

    #[error("invalid base64: {0}")]
    Base64(String),
}

/// Encoded length in bytes of a vector with `dimension` components.
pub fn encoded_len(dimension: usize) -> usize {
    PREFIX_SIZE + dimension * 4 + CHECKSUM_SIZE
}

pub fn encode(vector: &[f32]) -> Result<Vec<u8>, CodecError> {
    if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
        return Err(CodecError::NonFinite { index });
    }
    let dimension = u32::try_from(vector.len()).map_err(|_| CodecError::TooLarge(vector.len()))?;

    let mut out = Vec::with_capacity(encoded_len(vector.len()));
    out.extend_from_slice(MAGIC);
    out.push(CODEC_VERSION);
    out.push(ELEMENT_F32_LE);
    out.extend_from_slice(&dimension.to_le_bytes());
    for value in vector {
        out.extend_from_slice(&value.to_le_bytes());
    }

    let checksum = crc32fast::hash(&out);
    out.extend_from_slice(&checksum.to_le_bytes());

    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() < PREFIX_SIZE + CHECKSUM_SIZE {
        return Err(CodecError::Truncated(bytes.len()));
    }

    if &bytes[0..4] != MAGIC {
        return Err(CodecError::BadMagic);
    }

    let version = bytes[4];
    if version != CODEC_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let element = bytes[5];
    if element != ELEMENT_F32_LE {
        return Err(CodecError::UnsupportedElement(element));
    }

    let dimension = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    let expected_len = dimension
        .checked_mul(4)
        .and_then(|n| n.checked_add(PREFIX_SIZE + CHECKSUM_SIZE));
    if expected_len != Some(bytes.len()) {
        return Err(CodecError::LengthMismatch {
            declared: dimension,
            actual: bytes.len(),
        });
    }

    let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
    let stored = u32::from_le_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]);
    if crc32fast::hash(body) != stored {
        return Err(CodecError::ChecksumMismatch);
    }

    Ok(body[PREFIX_SIZE..]
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn encode_text(vector: &[f32]) -> Result<String, CodecError> {
    Ok(STANDARD.encode(encode(vector)?))
}

pub fn decode_text(text: &str) -> Result<Vec<f32>, CodecError> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|err| CodecError::Base64(err.to_string()))?;
    decode(&bytes)
}
