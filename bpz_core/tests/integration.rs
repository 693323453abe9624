/// Integration tests: drive whole compress/decompress calls through the
/// engine over in-memory streams, with the bundled codecs and a few
/// purpose-built ones for failure and concurrency checks.
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bpz_codecs::{GzipCodec, Lz4Codec, PassThroughCodec, ZstdCodec};
use bpz_core::format::BLOCK_ENTRY_SIZE;
use bpz_core::{BpzError, Codec, Directory, Engine, EngineConfig, Mode, BLOCK_SIZE};

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Generate `len` highly compressible bytes (repeating pattern).
fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

fn engine(codec: Arc<dyn Codec>) -> Engine {
    Engine::new(EngineConfig::default().with_workers(4).with_gate_capacity(8), codec).unwrap()
}

fn compress(engine: &Engine, data: &[u8]) -> Vec<u8> {
    engine
        .process(&mut Cursor::new(data), Cursor::new(Vec::new()), Mode::Compress)
        .unwrap()
        .into_inner()
}

fn decompress(engine: &Engine, data: &[u8]) -> bpz_core::Result<Vec<u8>> {
    engine
        .process(&mut Cursor::new(data), Cursor::new(Vec::new()), Mode::Decompress)
        .map(Cursor::into_inner)
}

fn directory_of(compressed: &[u8]) -> Directory {
    Directory::read_from(&mut Cursor::new(compressed)).unwrap()
}

/// Passes blocks through unchanged after a short, size-dependent delay, so
/// completions come back out of order. Records peak concurrency.
#[derive(Default)]
struct SlowCodec {
    running: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl SlowCodec {
    fn enter(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(1 + (call % 3) as u64 * 2));
    }

    fn leave(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Codec for SlowCodec {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.enter();
        self.leave();
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, compressed: &[u8], _raw_len: usize) -> anyhow::Result<Vec<u8>> {
        self.enter();
        self.leave();
        Ok(compressed.to_vec())
    }
}

/// Fails every block whose first byte equals `poison`.
struct PoisonCodec {
    poison: u8,
}

impl Codec for PoisonCodec {
    fn name(&self) -> &'static str {
        "poison"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        if raw.first() == Some(&self.poison) {
            anyhow::bail!("poisoned block");
        }
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, compressed: &[u8], _raw_len: usize) -> anyhow::Result<Vec<u8>> {
        if compressed.first() == Some(&self.poison) {
            panic!("poisoned block");
        }
        Ok(compressed.to_vec())
    }
}

// ── tests ──────────────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_boundary_lengths_gzip() {
    let engine = engine(Arc::new(GzipCodec::default()));
    let lengths = [
        0,
        1,
        BLOCK_SIZE - 1,
        BLOCK_SIZE,
        BLOCK_SIZE + 1,
        BLOCK_SIZE * 7 / 2,
        BLOCK_SIZE * 5,
    ];

    for len in lengths {
        let data = pseudo_random_bytes(len, len as u64 + 7);
        let compressed = compress(&engine, &data);
        let restored = decompress(&engine, &compressed).unwrap();
        assert_eq!(restored.len(), len);
        assert!(restored == data, "gzip round-trip should be byte-exact for {len} bytes");
    }
}

#[test]
fn test_empty_source_produces_empty_output() {
    let engine = engine(Arc::new(GzipCodec::default()));
    assert!(compress(&engine, &[]).is_empty());
    assert!(decompress(&engine, &[]).unwrap().is_empty());
}

#[test]
fn test_three_and_a_half_mib_makes_four_blocks() {
    let engine = engine(Arc::new(ZstdCodec::default()));
    let data = compressible_bytes(BLOCK_SIZE * 7 / 2);

    let compressed = compress(&engine, &data);
    let dir = directory_of(&compressed);

    assert_eq!(dir.block_count(), 4);
    let mut sizes: Vec<(i32, i32)> = dir
        .entries()
        .iter()
        .map(|e| (e.number, e.source_size))
        .collect();
    sizes.sort();
    let half = (BLOCK_SIZE / 2) as i32;
    let full = BLOCK_SIZE as i32;
    assert_eq!(sizes, vec![(0, full), (1, full), (2, full), (3, half)]);

    assert_eq!(decompress(&engine, &compressed).unwrap(), data);
}

#[test]
fn test_directory_is_consistent_with_payloads() {
    let engine = engine(Arc::new(GzipCodec::default()));
    let data = compressible_bytes(BLOCK_SIZE * 3 + 12_345);
    let compressed = compress(&engine, &data);
    let dir = directory_of(&compressed);

    assert_eq!(dir.block_count(), 4);
    assert_eq!(dir.source_len(), data.len() as u64);
    assert_eq!(dir.self_size(), 8 + 4 * BLOCK_ENTRY_SIZE);
    assert_eq!(compressed.len() as u64, dir.self_size() + dir.stored_len());

    let mut numbers: Vec<i32> = dir.entries().iter().map(|e| e.number).collect();
    numbers.sort();
    assert_eq!(numbers, vec![0, 1, 2, 3]);

    let first = dir.entries().iter().find(|e| e.number == 0).unwrap();
    assert_eq!(dir.offset_of(first.number).unwrap(), 0);

    assert!(
        dir.stored_len() < dir.source_len(),
        "gzip should shrink compressible data"
    );
}

#[test]
fn test_out_of_order_completion_restores_original_layout() {
    let codec = Arc::new(SlowCodec::default());
    let config = EngineConfig::default()
        .with_workers(8)
        .with_gate_capacity(16)
        .with_block_size(4096);
    let engine = Engine::new(config, codec).unwrap();

    let data = pseudo_random_bytes(4096 * 40 + 100, 0xDEAD_BEEF);
    let compressed = compress(&engine, &data);
    let dir = directory_of(&compressed);
    assert_eq!(dir.block_count(), 41);

    assert_eq!(decompress(&engine, &compressed).unwrap(), data);
}

#[test]
fn test_gate_bounds_concurrent_tasks() {
    let codec = Arc::new(SlowCodec::default());
    let config = EngineConfig::default()
        .with_workers(8)
        .with_gate_capacity(3)
        .with_block_size(1024);
    let engine = Engine::new(config, Arc::clone(&codec) as Arc<dyn Codec>).unwrap();

    let data = compressible_bytes(1024 * 64);
    let compressed = compress(&engine, &data);
    assert_eq!(decompress(&engine, &compressed).unwrap(), data);

    let peak = codec.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "at most 3 tasks may run at once, saw {peak}");
    assert!(peak >= 1);
    assert_eq!(engine.available_permits(), 3);
}

#[test]
fn test_corrupted_payload_fails_with_single_worker_error() {
    let engine = engine(Arc::new(GzipCodec::default()));
    let data = compressible_bytes(BLOCK_SIZE * 2 + 10);
    let mut compressed = compress(&engine, &data);
    let dir = directory_of(&compressed);

    // Wreck the gzip header of the first stored payload.
    let first_payload = dir.self_size() as usize;
    compressed[first_payload..first_payload + 4].copy_from_slice(&[0, 0, 0, 0]);
    let broken_number = dir.entries()[0].number;

    let err = decompress(&engine, &compressed).unwrap_err();
    match &err {
        BpzError::Aggregate(errors) => {
            assert_eq!(errors.len(), 1, "got {errors:?}");
            match &errors[0] {
                BpzError::Worker { block, .. } => assert_eq!(*block, broken_number),
                other => panic!("expected a worker error, got {other:?}"),
            }
        }
        other => panic!("expected an aggregate failure, got {other:?}"),
    }
    assert_eq!(err.inner_errors().len(), 1);
    assert_eq!(engine.available_permits(), engine.config().gate_capacity);
}

#[test]
fn test_bad_magic_is_a_format_error() {
    let engine = engine(Arc::new(GzipCodec::default()));
    let mut compressed = compress(&engine, &compressible_bytes(5000));
    compressed[0] ^= 0xFF;

    let err = decompress(&engine, &compressed).unwrap_err();
    assert!(matches!(err, BpzError::Format(_)), "got {err:?}");
}

#[test]
fn test_truncated_payload_is_a_format_error() {
    let engine = engine(Arc::new(Lz4Codec));
    let mut compressed = compress(&engine, &pseudo_random_bytes(BLOCK_SIZE + 500, 3));
    compressed.truncate(compressed.len() - 10);

    let err = decompress(&engine, &compressed).unwrap_err();
    assert!(matches!(err, BpzError::Format(_)), "got {err:?}");
    assert_eq!(engine.available_permits(), engine.config().gate_capacity);
}

#[test]
fn test_entry_size_beyond_stream_is_a_format_error() {
    let engine = engine(Arc::new(GzipCodec::default()));
    let mut compressed = compress(&engine, &compressible_bytes(4096));
    // First entry's stored size sits right after the preamble and block number.
    compressed[12..16].copy_from_slice(&i32::MAX.to_le_bytes());

    let err = decompress(&engine, &compressed).unwrap_err();
    match &err {
        BpzError::Format(message) => assert!(message.contains("truncated"), "got {message}"),
        other => panic!("expected a format error, got {other:?}"),
    }
    assert_eq!(engine.available_permits(), engine.config().gate_capacity);
}

#[test]
fn test_failing_blocks_release_permits_and_engine_stays_usable() {
    let config = EngineConfig::default()
        .with_workers(2)
        .with_gate_capacity(2)
        .with_block_size(16);
    let engine = Engine::new(config, Arc::new(PoisonCodec { poison: 0xAA })).unwrap();

    // Far more failing blocks than permits: a leaked permit would hang here.
    let poisoned = vec![0xAAu8; 16 * 50];
    let err = engine
        .process(&mut Cursor::new(&poisoned), Cursor::new(Vec::new()), Mode::Compress)
        .unwrap_err();
    assert!(matches!(err, BpzError::Aggregate(_)), "got {err:?}");
    assert!(!err.inner_errors().is_empty());
    assert!(err
        .inner_errors()
        .iter()
        .all(|e| matches!(e, BpzError::Worker { .. })));
    assert_eq!(engine.available_permits(), 2);

    let clean = compressible_bytes(16 * 10 + 3);
    let compressed = compress(&engine, &clean);
    assert_eq!(decompress(&engine, &compressed).unwrap(), clean);
}

#[test]
fn test_codec_panic_becomes_worker_error() {
    let config = EngineConfig::default().with_block_size(8);
    let engine = Engine::new(config, Arc::new(PoisonCodec { poison: 0x55 })).unwrap();

    let mut data = vec![0u8; 8 * 4];
    // Block 2 starts with the poison byte; compression lets it through.
    let passthrough = Engine::new(
        EngineConfig::default().with_block_size(8),
        Arc::new(PassThroughCodec),
    )
    .unwrap();
    data[16] = 0x55;
    let compressed = compress(&passthrough, &data);

    let err = decompress(&engine, &compressed).unwrap_err();
    let inner = err.inner_errors();
    assert_eq!(inner.len(), 1, "got {err:?}");
    assert!(matches!(inner[0], BpzError::Worker { block: 2, .. }));
}

#[test]
fn test_progress_is_monotonic_and_deduplicated() {
    let config = EngineConfig::default().with_block_size(1000);
    let engine = Engine::new(config, Arc::new(PassThroughCodec)).unwrap();
    let data = compressible_bytes(1000 * 250);

    let mut reported = Vec::new();
    let compressed = engine
        .process_with_progress(
            &mut Cursor::new(&data),
            Cursor::new(Vec::new()),
            Mode::Compress,
            &mut |percent| reported.push(percent),
        )
        .unwrap()
        .into_inner();

    assert_eq!(reported.len(), 100);
    assert!(reported.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(reported.first(), Some(&1));
    assert_eq!(reported.last(), Some(&100));

    let mut reported = Vec::new();
    engine
        .process_with_progress(
            &mut Cursor::new(&compressed),
            Cursor::new(Vec::new()),
            Mode::Decompress,
            &mut |percent| reported.push(percent),
        )
        .unwrap();
    assert_eq!(reported.last(), Some(&100));
    assert!(reported.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_single_partial_block() {
    let data = b"a small payload that fits in one partial block";
    let engine = engine(Arc::new(ZstdCodec::default()));

    let compressed = compress(&engine, data);
    let dir = directory_of(&compressed);
    assert_eq!(dir.block_count(), 1);
    assert_eq!(dir.entries()[0].number, 0);
    assert_eq!(dir.entries()[0].source_size, data.len() as i32);

    assert_eq!(decompress(&engine, &compressed).unwrap(), data);
}

#[test]
fn test_process_after_shutdown_fails() {
    let engine = engine(Arc::new(PassThroughCodec));
    engine.shutdown();
    let err = engine
        .process(&mut Cursor::new(b"data"), Cursor::new(Vec::new()), Mode::Compress)
        .unwrap_err();
    assert!(matches!(err, BpzError::PoolClosed), "got {err:?}");
    assert_eq!(engine.available_permits(), engine.config().gate_capacity);
}
