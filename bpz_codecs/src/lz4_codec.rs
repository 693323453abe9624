use bpz_core::Codec;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};

/// LZ4 block codec.
///
/// Fastest of the bundled codecs, at the cost of ratio. Every block is an
/// independent raw LZ4 block prefixed with its raw length, so a worker can
/// restore it without touching any other block. The prefix must agree with
/// the `source_size` recorded in the bpz directory before anything is
/// allocated for the output.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(compress_prepend_size(raw))
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        let prefix: [u8; 4] = compressed
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| anyhow::anyhow!("lz4 block is shorter than its length prefix"))?;
        let declared = u32::from_le_bytes(prefix) as usize;
        if declared != raw_len {
            anyhow::bail!(
                "lz4 block declares {} raw bytes, directory expects {}",
                declared,
                raw_len
            );
        }
        let raw = decompress_size_prepended(compressed)
            .map_err(|e| anyhow::anyhow!("lz4 decompress error: {}", e))?;
        Ok(raw)
    }
}
