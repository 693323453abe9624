use std::io::{Read, Write};

use bpz_core::Codec;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Gzip block codec, the default.
///
/// Each block becomes one complete gzip member, so a corrupted block fails
/// on its own CRC/header check without affecting its neighbours.
pub struct GzipCodec {
    level: Compression,
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl GzipCodec {
    /// `level` ranges from 0 (store) to 9 (smallest).
    pub fn new(level: u32) -> anyhow::Result<Self> {
        if level > 9 {
            anyhow::bail!("gzip level must be 0–9, got {}", level);
        }
        Ok(Self {
            level: Compression::new(level),
        })
    }
}

impl Codec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), self.level);
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(raw_len);
        // One byte past the declared length is enough to detect a lying entry.
        GzDecoder::new(compressed)
            .take(raw_len as u64 + 1)
            .read_to_end(&mut raw)
            .map_err(|e| anyhow::anyhow!("gzip decompress error: {}", e))?;
        if raw.len() > raw_len {
            anyhow::bail!("gzip decompress error: block inflates past its declared {} bytes", raw_len);
        }
        Ok(raw)
    }
}
