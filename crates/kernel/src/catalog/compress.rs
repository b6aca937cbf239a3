//! Response compression.
//!
//! Clients that set `compress_response` get the record list back as a single
//! string: JSON, gzip-compressed, base64-encoded.

use std::io::Write;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::Value;

/// Compression collaborator for batch responses.
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &Value) -> Result<String>;
}

/// Gzip + base64 compressor.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCompressor {
    level: Option<u32>,
}

impl GzipCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit compression level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Some(level.min(9)),
        }
    }

    fn compression(&self) -> Compression {
        self.level.map_or_else(Compression::default, Compression::new)
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, data: &Value) -> Result<String> {
        let json = serde_json::to_vec(data).context("failed to serialize response")?;

        let mut encoder = GzEncoder::new(Vec::new(), self.compression());
        encoder
            .write_all(&json)
            .context("failed to write gzip stream")?;
        let compressed = encoder.finish().context("failed to finish gzip stream")?;

        Ok(STANDARD.encode(compressed))
    }
}
