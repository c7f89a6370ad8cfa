//! Chunk payloads: the JSON objects a group of chunks is stored as.
//!
//! ```json
//! [ { "text": "...", "embedding": "<base64 of quantized bytes>", "vector_type": 1 } ]
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use triplex_core::codec::{self, CodecError};
use triplex_core::VectorType;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Malformed payload JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Chunk {chunk}: embedding is not valid base64: {source}")]
    Base64 {
        chunk: usize,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Chunk {chunk}: {source}")]
    Codec {
        chunk: usize,
        #[source]
        source: CodecError,
    },
}

/// One chunk of text with its quantized embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    /// Base64 of the encoded embedding bytes.
    pub embedding: String,
    pub vector_type: VectorType,
}

impl ChunkRecord {
    /// Quantize `vector` as `vector_type` and wrap it with `text`.
    pub fn from_vector(
        text: impl Into<String>,
        vector: &[f32],
        vector_type: VectorType,
    ) -> Result<Self, CodecError> {
        let bytes = codec::encode(vector, vector_type)?;
        Ok(Self {
            text: text.into(),
            embedding: STANDARD.encode(bytes),
            vector_type,
        })
    }

    /// Raw embedding bytes in this record's vector type.
    pub fn embedding_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.embedding)
    }

    /// Decoded embedding; `chunk` is this record's ordinal, used in errors.
    pub fn vector(&self, chunk: usize) -> Result<Vec<f32>, PayloadError> {
        let bytes = self
            .embedding_bytes()
            .map_err(|source| PayloadError::Base64 { chunk, source })?;
        codec::decode(&bytes, self.vector_type).map_err(|source| PayloadError::Codec { chunk, source })
    }
}

pub fn parse_payload(bytes: &[u8]) -> Result<Vec<ChunkRecord>, PayloadError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_payload(records: &[ChunkRecord]) -> Result<Vec<u8>, PayloadError> {
    Ok(serde_json::to_vec(records)?)
}
