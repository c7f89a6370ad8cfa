//! Vector codec
//!
//! Converts embedding vectors between the `f32` compute form and the
//! fixed-width storage form recorded in index files and chunk payloads.
//!
//! | Tag | Type      | Width | Mapping                               |
//! |-----|-----------|-------|---------------------------------------|
//! | 0   | `Float32` | 4     | little-endian IEEE-754, exact         |
//! | 1   | `Int8`    | 1     | `round(clamp(x, -1, 1) * 127)` as i8  |
//!
//! `Int8` assumes unit-range components (normalized embeddings). Values
//! outside [-1, 1] saturate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scale applied to unit-range components before rounding to `i8`.
pub const INT8_SCALE: f32 = 127.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Unsupported vector type tag: {0}")]
    UnsupportedVectorType(u32),

    #[error("Unknown vector type name: {0:?}")]
    UnknownVectorTypeName(String),

    #[error("Invalid encoded length: {len} bytes is not a multiple of element width {width}")]
    InvalidLength { len: usize, width: usize },

    #[error("Non-finite component at index {index}")]
    NonFinite { index: usize },

    #[error("Output buffer holds {actual} components, encoded vector has {expected}")]
    BufferSize { expected: usize, actual: usize },
}

/// Storage representation of a vector component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
#[repr(u32)]
pub enum VectorType {
    Float32 = 0,
    Int8 = 1,
}

impl VectorType {
    /// Resolve an on-disk / on-wire tag.
    pub fn from_tag(tag: u32) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(Self::Float32),
            1 => Ok(Self::Int8),
            other => Err(CodecError::UnsupportedVectorType(other)),
        }
    }

    #[inline]
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Bytes per component.
    #[inline]
    pub fn width(self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Int8 => 1,
        }
    }

    /// Largest per-component error introduced by `decode(encode(v))` for
    /// components in [-1, 1].
    pub fn step(self) -> f32 {
        match self {
            Self::Float32 => 0.0,
            Self::Int8 => 1.0 / INT8_SCALE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Int8 => "int8",
        }
    }

    /// Encoded size of a `dim`-component vector.
    #[inline]
    pub fn encoded_len(self, dim: usize) -> usize {
        dim * self.width()
    }
}

impl Default for VectorType {
    fn default() -> Self {
        Self::Int8
    }
}

impl TryFrom<u32> for VectorType {
    type Error = CodecError;

    fn try_from(tag: u32) -> Result<Self, Self::Error> {
        Self::from_tag(tag)
    }
}

impl From<VectorType> for u32 {
    fn from(ty: VectorType) -> Self {
        ty.tag()
    }
}

impl fmt::Display for VectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VectorType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int8" | "i8" => Ok(Self::Int8),
            "float32" | "f32" => Ok(Self::Float32),
            _ => Err(CodecError::UnknownVectorTypeName(s.to_string())),
        }
    }
}

#[inline]
fn quantize_i8(x: f32) -> i8 {
    (x.clamp(-1.0, 1.0) * INT8_SCALE).round() as i8
}

/// Encode a vector into its storage form.
pub fn encode(vector: &[f32], ty: VectorType) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(ty.encoded_len(vector.len()));
    encode_into(vector, ty, &mut out)?;
    Ok(out)
}

/// Append the storage form of `vector` to `out`.
///
/// On error nothing is appended.
pub fn encode_into(vector: &[f32], ty: VectorType, out: &mut Vec<u8>) -> Result<(), CodecError> {
    if let Some(index) = vector.iter().position(|x| !x.is_finite()) {
        return Err(CodecError::NonFinite { index });
    }

    out.reserve(ty.encoded_len(vector.len()));
    match ty {
        VectorType::Float32 => {
            for &x in vector {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        VectorType::Int8 => {
            out.extend(vector.iter().map(|&x| quantize_i8(x) as u8));
        }
    }
    Ok(())
}

/// Number of components stored in `bytes`.
pub fn component_count(bytes: &[u8], ty: VectorType) -> Result<usize, CodecError> {
    let width = ty.width();
    if bytes.len() % width != 0 {
        return Err(CodecError::InvalidLength {
            len: bytes.len(),
            width,
        });
    }
    Ok(bytes.len() / width)
}

/// Decode a storage-form vector back to `f32`.
pub fn decode(bytes: &[u8], ty: VectorType) -> Result<Vec<f32>, CodecError> {
    let dim = component_count(bytes, ty)?;
    let mut out = vec![0.0f32; dim];
    decode_into(bytes, ty, &mut out)?;
    Ok(out)
}

/// Decode into a caller-provided buffer of exactly the right length.
pub fn decode_into(bytes: &[u8], ty: VectorType, out: &mut [f32]) -> Result<(), CodecError> {
    let dim = component_count(bytes, ty)?;
    if dim != out.len() {
        return Err(CodecError::BufferSize {
            expected: dim,
            actual: out.len(),
        });
    }
    decode_unchecked(bytes, ty, out);
    Ok(())
}

/// Hot-path decode used by the ranking backends; lengths are validated once
/// when the index is built or loaded.
#[inline]
pub(crate) fn decode_unchecked(bytes: &[u8], ty: VectorType, out: &mut [f32]) {
    debug_assert_eq!(bytes.len(), ty.encoded_len(out.len()));
    match ty {
        VectorType::Float32 => {
            for (dst, src) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                *dst = f32::from_le_bytes([src[0], src[1], src[2], src[3]]);
            }
        }
        VectorType::Int8 => {
            let signed: &[i8] = bytemuck::cast_slice(bytes);
            for (dst, &q) in out.iter_mut().zip(signed) {
                *dst = q as f32 / INT8_SCALE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_stable() {
        assert_eq!(VectorType::Float32.tag(), 0);
        assert_eq!(VectorType::Int8.tag(), 1);
        assert_eq!(VectorType::from_tag(1).unwrap(), VectorType::Int8);
        assert_eq!(
            VectorType::from_tag(7),
            Err(CodecError::UnsupportedVectorType(7))
        );
    }

    #[test]
    fn test_int8_known_values() {
        let bytes = encode(&[1.0, -1.0, 0.0, 0.5, 0.9], VectorType::Int8).unwrap();
        let signed: Vec<i8> = bytes.iter().map(|&b| b as i8).collect();
        assert_eq!(signed, vec![127, -127, 0, 64, 114]);
    }

    #[test]
    fn test_int8_saturates_out_of_range() {
        let bytes = encode(&[3.0, -2.5], VectorType::Int8).unwrap();
        assert_eq!(bytes[0] as i8, 127);
        assert_eq!(bytes[1] as i8, -127);
    }

    #[test]
    fn test_int8_error_within_one_step() {
        let v: Vec<f32> = (0..257).map(|i| (i as f32 / 128.0) - 1.0).collect();
        let back = decode(&encode(&v, VectorType::Int8).unwrap(), VectorType::Int8).unwrap();
        let step = VectorType::Int8.step();
        for (a, b) in v.iter().zip(&back) {
            assert!((a - b).abs() <= step, "{a} decoded as {b}");
        }
    }

    #[test]
    fn test_float32_is_exact() {
        let v = vec![0.1f32, -0.333, 1e-7, 42.0];
        let back = decode(&encode(&v, VectorType::Float32).unwrap(), VectorType::Float32).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn test_rejects_non_finite() {
        let err = encode(&[0.0, f32::NAN], VectorType::Int8).unwrap_err();
        assert_eq!(err, CodecError::NonFinite { index: 1 });

        let mut out = vec![9u8];
        assert!(encode_into(&[f32::INFINITY], VectorType::Float32, &mut out).is_err());
        assert_eq!(out, vec![9u8]);
    }

    #[test]
    fn test_decode_invalid_length() {
        let err = decode(&[0, 0, 0], VectorType::Float32).unwrap_err();
        assert_eq!(err, CodecError::InvalidLength { len: 3, width: 4 });
    }

    #[test]
    fn test_decode_into_buffer_size() {
        let bytes = encode(&[0.5, 0.5], VectorType::Int8).unwrap();
        let mut out = [0.0f32; 3];
        assert_eq!(
            decode_into(&bytes, VectorType::Int8, &mut out),
            Err(CodecError::BufferSize {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_names_parse() {
        assert_eq!("int8".parse::<VectorType>().unwrap(), VectorType::Int8);
        assert_eq!("F32".parse::<VectorType>().unwrap(), VectorType::Float32);
        assert!("bf16".parse::<VectorType>().is_err());
    }

    #[test]
    fn test_tag_conversions() {
        assert_eq!(u32::from(VectorType::Int8), 1);
        assert_eq!(VectorType::try_from(0u32).unwrap(), VectorType::Float32);
        assert!(VectorType::try_from(2u32).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_int8_within_one_step(v in proptest::collection::vec(-1.5f32..1.5, 1..64)) {
            let decoded = decode(&encode(&v, VectorType::Int8).unwrap(), VectorType::Int8).unwrap();
            for (x, y) in v.iter().zip(&decoded) {
                proptest::prop_assert!((x.clamp(-1.0, 1.0) - y).abs() <= VectorType::Int8.step());
            }
        }

        #[test]
        fn prop_float32_exact(v in proptest::collection::vec(-1e6f32..1e6, 0..64)) {
            let decoded = decode(&encode(&v, VectorType::Float32).unwrap(), VectorType::Float32).unwrap();
            proptest::prop_assert_eq!(decoded, v);
        }
    }
}
