//! Model artifact codec
//!
//! Artifacts are JSON-serialized [`Model`]s compressed with LZ4 or ZSTD and
//! prefixed with a one-byte codec tag, so an artifact written with either
//! algorithm can be read back without out-of-band metadata.

use serde::{Deserialize, Serialize};

use super::Model;
use crate::{Error, Result};

/// Compression algorithm for model artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// LZ4 - Fast compression (default)
    #[default]
    Lz4,
    /// ZSTD - Better ratio, slower
    Zstd,
}

impl Compression {
    /// Get algorithm name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    const fn tag(self) -> u8 {
        match self {
            Self::Lz4 => 0,
            Self::Zstd => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Lz4),
            1 => Ok(Self::Zstd),
            other => Err(Error::Storage(format!("unknown artifact codec tag {other}"))),
        }
    }

    /// Compress data using this algorithm
    ///
    /// # Errors
    /// Returns error if compression fails (e.g., ZSTD internal error)
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Self::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| Error::Storage(format!("ZSTD compression failed: {e}"))),
        }
    }

    /// Decompress data using this algorithm
    ///
    /// # Errors
    /// Returns error if decompression fails (e.g., corrupted data)
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::Storage(format!("LZ4 decompression failed: {e}"))),
            Self::Zstd => zstd::decode_all(data)
                .map_err(|e| Error::Storage(format!("ZSTD decompression failed: {e}"))),
        }
    }
}

/// Serialized architecture + weights of one model; an opaque blob to the
/// ranking store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelArtifact(Vec<u8>);

impl ModelArtifact {
    /// Serialize and compress a model.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or compression fails.
    pub fn encode(model: &Model, compression: Compression) -> Result<Self> {
        let json = serde_json::to_vec(model)?;
        let mut bytes = Vec::with_capacity(json.len() / 2 + 1);
        bytes.push(compression.tag());
        bytes.extend(compression.compress(&json)?);
        Ok(Self(bytes))
    }

    /// Decompress and deserialize the model.
    ///
    /// # Errors
    ///
    /// Returns error if the blob is empty, carries an unknown codec tag, or
    /// does not decode to a model.
    pub fn decode(&self) -> Result<Model> {
        let (&tag, payload) = self
            .0
            .split_first()
            .ok_or_else(|| Error::Storage("empty model artifact".to_string()))?;
        let json = Compression::from_tag(tag)?.decompress(payload)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Wrap raw bytes read from storage.
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw bytes for storage.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Size of the blob in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the blob is empty (never true for an encoded model).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
