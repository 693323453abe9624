mod gzip_codec;
mod lz4_codec;
mod passthrough;
mod zstd_codec;

pub use gzip_codec::GzipCodec;
pub use lz4_codec::Lz4Codec;
pub use passthrough::PassThroughCodec;
pub use zstd_codec::ZstdCodec;

use bpz_core::Codec;
use std::sync::Arc;

/// Names accepted by [`codec_by_name`], default first.
pub const CODEC_NAMES: &[&str] = &["gzip", "zstd", "lz4", "passthrough"];

/// Resolve a codec from its CLI name.
///
/// bpz streams do not record their codec, so the same name must be given to
/// compress and decompress. `level` applies to gzip and zstd; `None` picks the
/// codec's default. Giving a level to a codec without one is an error.
pub fn codec_by_name(name: &str, level: Option<i32>) -> anyhow::Result<Arc<dyn Codec>> {
    match name {
        "gzip" | "gz" => Ok(Arc::new(match level {
            Some(level) => GzipCodec::new(u32::try_from(level).map_err(|_| {
                anyhow::anyhow!("gzip level must be 0–9, got {}", level)
            })?)?,
            None => GzipCodec::default(),
        })),
        "zstd" | "z" => Ok(Arc::new(level.map(ZstdCodec::new).unwrap_or_default())),
        "lz4" | "l" => {
            reject_level("lz4", level)?;
            Ok(Arc::new(Lz4Codec))
        }
        "passthrough" | "pass" | "none" => {
            reject_level("passthrough", level)?;
            Ok(Arc::new(PassThroughCodec))
        }
        other => anyhow::bail!(
            "unknown codec '{}'. Valid options: {}",
            other,
            CODEC_NAMES.join(", ")
        ),
    }
}

fn reject_level(codec: &str, level: Option<i32>) -> anyhow::Result<()> {
    match level {
        Some(level) => anyhow::bail!("codec '{}' has no compression level (got {})", codec, level),
        None => Ok(()),
    }
}
