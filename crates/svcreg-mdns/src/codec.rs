//! Text-field codec for service descriptors.
//!
//! A descriptor is serialized to JSON, zlib-compressed and hex-encoded. The
//! transport's TXT strings hold at most [`MAX_FIELD_LEN`] characters, so longer
//! encodings are split into consecutive chunks that are stored in record order
//! and concatenated again before decoding.
//!
//! ```text
//! Descriptor -> JSON -> zlib -> hex -> [chunk0, chunk1, ...]  (each <= 255 chars)
//! ```

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use svcreg_core::types::{null_as_default, Endpoint};
use svcreg_core::CodecError;

/// Maximum length of a single text field.
pub const MAX_FIELD_LEN: usize = 255;

/// Service descriptor carried in a node record's text fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "Service")]
    pub service: String,

    #[serde(rename = "Version")]
    pub version: String,

    #[serde(rename = "Endpoints", default, deserialize_with = "null_as_default")]
    pub endpoints: Vec<Endpoint>,

    /// Per-node metadata
    #[serde(rename = "Metadata", default, deserialize_with = "null_as_default")]
    pub metadata: HashMap<String, String>,
}

/// Encodes a descriptor into one or more text fields.
pub fn encode(descriptor: &Descriptor) -> Result<Vec<String>, CodecError> {
    let json = serde_json::to_vec(descriptor).map_err(CodecError::encode)?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(CodecError::encode)?;
    let compressed = encoder.finish().map_err(CodecError::encode)?;

    Ok(split(&hex::encode(compressed)))
}

/// Decodes text fields produced by [`encode`].
pub fn decode<S: AsRef<str>>(fields: &[S]) -> Result<Descriptor, CodecError> {
    let encoded: String = fields.iter().map(AsRef::as_ref).collect();

    let compressed = hex::decode(encoded).map_err(CodecError::decode)?;

    let mut json = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(CodecError::decode)?;

    serde_json::from_slice(&json).map_err(CodecError::decode)
}

/// Splits an ASCII string into chunks of at most [`MAX_FIELD_LEN`] characters.
fn split(encoded: &str) -> Vec<String> {
    if encoded.len() <= MAX_FIELD_LEN {
        return vec![encoded.to_string()];
    }

    // hex output is ASCII, so byte chunks are char boundaries
    encoded
        .as_bytes()
        .chunks(MAX_FIELD_LEN)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}
