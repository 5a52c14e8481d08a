//! Wire encoding for remote cache values

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use crate::domain::{ServiceError, ServiceResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Value serialization format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serialization {
    #[default]
    Json,
    /// Parsed from configuration but rejected at validation
    Binary,
}

/// JSON text on the wire, optionally gzip-compressed
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueCodec {
    compression: bool,
}

impl ValueCodec {
    pub fn new(compression: bool) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn encode(&self, json: &str) -> ServiceResult<Vec<u8>> {
        if !self.compression {
            return Ok(json.as_bytes().to_vec());
        }

        let compression_failed = |e: std::io::Error| ServiceError::internal(format!("compression failed: {}", e));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).map_err(compression_failed)?;
        encoder.finish().map_err(compression_failed)
    }

    /// Returns `None` for data that is not valid (optionally gzipped) JSON
    ///
    /// Compressed values are recognised by their magic bytes, so a reader
    /// configured either way can read values written by the other.
    pub fn decode(&self, data: &[u8]) -> Option<String> {
        let text = if data.starts_with(&GZIP_MAGIC) {
            let mut decoded = String::new();
            GzDecoder::new(data).read_to_string(&mut decoded).ok()?;
            decoded
        } else {
            String::from_utf8(data.to_vec()).ok()?
        };

        serde_json::from_str::<IgnoredAny>(&text).ok()?;
        Some(text)
    }
}
