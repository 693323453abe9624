use bpz_core::Codec;

/// Stores blocks verbatim.
///
/// A compressed bpz stream made with this codec is the directory followed by
/// the source blocks in completion order, each entry's `size` equal to its
/// `source_size`. Useful for checking block placement and the directory
/// without a compression primitive in the way.
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        if compressed.len() != raw_len {
            anyhow::bail!(
                "stored block holds {} bytes, directory expects {}",
                compressed.len(),
                raw_len
            );
        }
        Ok(compressed.to_vec())
    }
}
