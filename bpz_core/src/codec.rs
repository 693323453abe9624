/// Per-block compression primitive driven by the engine.
///
/// Implementations:
/// - Must compress/decompress each block independently. No cross-block state
///   is permitted, since blocks are processed concurrently and land in any order.
/// - Are shared by every worker thread of an engine, hence `Send + Sync`.
pub trait Codec: Send + Sync {
    /// Human-readable codec name for CLI display and logs.
    fn name(&self) -> &'static str;

    /// Compress a single independent block.
    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Decompress a single independent block.
    ///
    /// `raw_len` is the original length recorded in the directory. Codecs may
    /// use it as a capacity hint; the engine verifies the result length itself.
    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>>;
}
