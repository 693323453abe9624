use std::io::{Read, Seek, SeekFrom, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::codec::Codec;
use crate::config::EngineConfig;
use crate::error::{BpzError, Result};
use crate::format::{blocks_for, BlockEntry, Directory};
use crate::gate::{Gate, Permit};
use crate::outcome::Outcome;
use crate::pool::WorkerPool;

/// Direction of a [`Engine::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Compress,
    Decompress,
}

/// Block-parallel compressor/decompressor.
///
/// # Process sequence
/// The calling thread is the only producer: it reads blocks from the source
/// in order, takes one gate permit per block, and queues the block on the
/// worker pool. Workers run the codec and write their output into the
/// destination under a single lock, so blocks land in completion order.
///
/// Compressed streams are a [`Directory`] followed by the payloads in storage
/// order. Every entry records the block's logical number, which is what the
/// decompressor uses to place the block back at its original offset.
///
/// The pool lives as long as the engine and is reused by every call.
pub struct Engine {
    config: EngineConfig,
    codec: Arc<dyn Codec>,
    pool: WorkerPool,
    gate: Arc<Gate>,
}

impl Engine {
    pub fn new(config: EngineConfig, codec: Arc<dyn Codec>) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::start(config.workers)?;
        let gate = Gate::new(config.gate_capacity);
        Ok(Self {
            config,
            codec,
            pool,
            gate,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Permits currently free in the admission gate.
    pub fn available_permits(&self) -> usize {
        self.gate.available()
    }

    /// Run one compression or decompression from `source` into `dest`.
    ///
    /// `dest` is handed to the worker threads for the duration of the call and
    /// returned on success. On failure its contents are unspecified and it is
    /// dropped.
    pub fn process<R, W>(&self, source: &mut R, dest: W, mode: Mode) -> Result<W>
    where
        R: Read + Seek + ?Sized,
        W: Write + Seek + Send + 'static,
    {
        self.run(source, dest, mode, Progress::new(None))
    }

    /// Like [`process`](Self::process), reporting whole-percent progress after
    /// each block is read. The callback fires once per distinct value.
    pub fn process_with_progress<R, W>(
        &self,
        source: &mut R,
        dest: W,
        mode: Mode,
        progress: &mut dyn FnMut(u8),
    ) -> Result<W>
    where
        R: Read + Seek + ?Sized,
        W: Write + Seek + Send + 'static,
    {
        self.run(source, dest, mode, Progress::new(Some(progress)))
    }

    /// Stop the worker pool. Later calls to `process` fail with
    /// [`BpzError::PoolClosed`].
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn run<R, W>(&self, source: &mut R, dest: W, mode: Mode, progress: Progress<'_>) -> Result<W>
    where
        R: Read + Seek + ?Sized,
        W: Write + Seek + Send + 'static,
    {
        match mode {
            Mode::Compress => self.compress(source, dest, progress),
            Mode::Decompress => self.decompress(source, dest, progress),
        }
    }

    // ── Compression ─────────────────────────────────────────────────────────

    fn compress<R, W>(&self, source: &mut R, mut dest: W, mut progress: Progress<'_>) -> Result<W>
    where
        R: Read + Seek + ?Sized,
        W: Write + Seek + Send + 'static,
    {
        let source_len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        if source_len == 0 {
            debug!("empty source; nothing to compress");
            return Ok(dest);
        }

        let block_size = self.config.block_size;
        let block_count = i32::try_from(blocks_for(source_len, block_size)).map_err(|_| {
            BpzError::config(format!(
                "{source_len} bytes need more than {} blocks of {block_size} bytes",
                i32::MAX
            ))
        })?;
        let directory = Directory::new(block_count)?;
        dest.seek(SeekFrom::Start(directory.self_size()))?;
        debug!(
            codec = self.codec.name(),
            source_len, block_count, "compression started"
        );

        let call = Arc::new(Call::new(dest, directory));
        let produced = self.produce_compressed(source, &call, source_len, &mut progress);
        call.wait_for_landing();
        produced?;
        call.check_outcome()?;

        let Sink {
            mut dest,
            directory,
            next_slot,
        } = call.take_sink()?;
        debug_assert_eq!(next_slot, directory.block_count() as usize);
        dest.seek(SeekFrom::Start(0))?;
        directory.write_to(&mut dest)?;
        dest.flush()?;
        debug!(
            source_len,
            stored_len = directory.stored_len(),
            "compression finished"
        );
        Ok(dest)
    }

    fn produce_compressed<R, W>(
        &self,
        source: &mut R,
        call: &Arc<Call<W>>,
        source_len: u64,
        progress: &mut Progress<'_>,
    ) -> Result<()>
    where
        R: Read + Seek + ?Sized,
        W: Write + Seek + Send + 'static,
    {
        let block_count = blocks_for(source_len, self.config.block_size);
        let mut position = 0u64;
        let mut number = 0i32;

        while position < source_len {
            if call.outcome.is_cancelled() {
                debug!(number, "compression cancelled; no further blocks read");
                break;
            }

            let len = (source_len - position).min(self.config.block_size as u64) as usize;
            let mut chunk = vec![0u8; len];
            source.read_exact(&mut chunk)?;
            position += len as u64;

            let permit = self.gate.acquire();
            let in_flight = InFlight::new(Arc::clone(call), permit);
            let codec = Arc::clone(&self.codec);
            // Counted before submission: a rejected task still drops its
            // InFlight, which counts it as landed.
            call.dispatched();
            self.pool.submit(move || {
                let result = guarded(|| codec.compress_block(&chunk))
                    .and_then(|compressed| in_flight.call.land_compressed(number, chunk.len(), compressed));
                if let Err(source) = result {
                    in_flight.fail(number, source);
                }
            })?;

            number += 1;
            progress.block_read(number as u64, block_count);
        }
        Ok(())
    }

    // ── Decompression ───────────────────────────────────────────────────────

    fn decompress<R, W>(&self, source: &mut R, mut dest: W, mut progress: Progress<'_>) -> Result<W>
    where
        R: Read + Seek + ?Sized,
        W: Write + Seek + Send + 'static,
    {
        let source_len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        if source_len == 0 {
            debug!("empty source; nothing to decompress");
            return Ok(dest);
        }

        let directory = Directory::read_from(source)?;
        let directory_size = directory.self_size();
        dest.seek(SeekFrom::Start(0))?;
        let entries = directory.entries().to_vec();
        debug!(
            codec = self.codec.name(),
            block_count = entries.len(),
            source_len = directory.source_len(),
            "decompression started"
        );

        let call = Arc::new(Call::new(dest, directory));
        let payload_len = source_len.saturating_sub(directory_size);
        let produced = self.produce_decompressed(source, &call, &entries, payload_len, &mut progress);
        call.wait_for_landing();
        produced?;
        call.check_outcome()?;

        let Sink { mut dest, .. } = call.take_sink()?;
        dest.flush()?;
        debug!("decompression finished");
        Ok(dest)
    }

    fn produce_decompressed<R, W>(
        &self,
        source: &mut R,
        call: &Arc<Call<W>>,
        entries: &[BlockEntry],
        mut payload_left: u64,
        progress: &mut Progress<'_>,
    ) -> Result<()>
    where
        R: Read + Seek + ?Sized,
        W: Write + Seek + Send + 'static,
    {
        let block_count = entries.len() as u64;

        for (read_index, entry) in entries.iter().copied().enumerate() {
            if call.outcome.is_cancelled() {
                debug!(read_index, "decompression cancelled; no further blocks read");
                break;
            }

            if entry.size as u64 > payload_left {
                return Err(BpzError::format(format!(
                    "block {} payload truncated: directory promises {} bytes, stream holds {payload_left}",
                    entry.number, entry.size
                )));
            }
            let expected = entry.size as usize;
            let mut payload = Vec::with_capacity(expected);
            (&mut *source).take(expected as u64).read_to_end(&mut payload)?;
            if payload.len() != expected {
                return Err(BpzError::format(format!(
                    "block {} payload truncated: directory promises {expected} bytes, stream holds {}",
                    entry.number,
                    payload.len()
                )));
            }
            payload_left -= expected as u64;

            let permit = self.gate.acquire();
            let in_flight = InFlight::new(Arc::clone(call), permit);
            let codec = Arc::clone(&self.codec);
            call.dispatched();
            self.pool.submit(move || {
                let raw_len = entry.source_size as usize;
                let result = guarded(|| codec.decompress_block(&payload, raw_len))
                    .and_then(|raw| in_flight.call.land_decompressed(entry, raw));
                if let Err(source) = result {
                    in_flight.fail(entry.number, source);
                }
            })?;

            progress.block_read(read_index as u64 + 1, block_count);
        }
        Ok(())
    }
}

/// Run a codec primitive, turning a panic into an error for its block.
fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|_| Err(anyhow::anyhow!("codec panicked")))
}

// ── Per-call shared state ───────────────────────────────────────────────────

/// Destination and directory, mutated only under the destination lock.
struct Sink<W> {
    dest: W,
    directory: Directory,
    /// Next free storage slot (compression only).
    next_slot: usize,
}

#[derive(Default)]
struct Parity {
    dispatched: usize,
    landed: usize,
}

/// State shared by the producer and every task of one `process` call.
struct Call<W> {
    sink: Mutex<Option<Sink<W>>>,
    outcome: Outcome,
    parity: Mutex<Parity>,
    all_landed: Condvar,
}

impl<W: Write + Seek> Call<W> {
    fn new(dest: W, directory: Directory) -> Self {
        Self {
            sink: Mutex::new(Some(Sink {
                dest,
                directory,
                next_slot: 0,
            })),
            outcome: Outcome::new(),
            parity: Mutex::new(Parity::default()),
            all_landed: Condvar::new(),
        }
    }

    /// Claim the next storage slot for a compressed block and append it.
    fn land_compressed(
        &self,
        number: i32,
        source_size: usize,
        compressed: Vec<u8>,
    ) -> anyhow::Result<()> {
        let size = i32::try_from(compressed.len())
            .context("compressed block does not fit the directory's size field")?;
        let source_size = i32::try_from(source_size)
            .context("source block does not fit the directory's size field")?;

        let mut guard = self.sink.lock();
        let sink = guard
            .as_mut()
            .context("destination released before the block landed")?;
        let slot = sink.next_slot;
        sink.directory.set(
            slot,
            BlockEntry {
                number,
                size,
                source_size,
            },
        )?;
        sink.dest
            .write_all(&compressed)
            .with_context(|| format!("writing compressed block into storage slot {slot}"))?;
        sink.next_slot += 1;
        trace!(number, slot, size, source_size, "block stored");
        Ok(())
    }

    /// Write a decompressed block at its original offset.
    fn land_decompressed(&self, entry: BlockEntry, raw: Vec<u8>) -> anyhow::Result<()> {
        if raw.len() != entry.source_size as usize {
            anyhow::bail!(
                "decompressed to {} bytes but directory says {}",
                raw.len(),
                entry.source_size
            );
        }

        let mut guard = self.sink.lock();
        let sink = guard
            .as_mut()
            .context("destination released before the block landed")?;
        let offset = sink.directory.offset_of(entry.number)?;
        sink.dest.seek(SeekFrom::Start(offset))?;
        sink.dest
            .write_all(&raw)
            .with_context(|| format!("writing block at offset {offset}"))?;
        trace!(number = entry.number, offset, len = raw.len(), "block restored");
        Ok(())
    }

    fn take_sink(&self) -> Result<Sink<W>> {
        let sink = self.sink.lock().take();
        debug_assert!(sink.is_some(), "destination taken twice");
        sink.ok_or_else(|| BpzError::Internal("destination taken twice".into()))
    }
}

impl<W> Call<W> {
    fn dispatched(&self) {
        self.parity.lock().dispatched += 1;
    }

    fn landed(&self) {
        let mut parity = self.parity.lock();
        parity.landed += 1;
        if parity.landed >= parity.dispatched {
            self.all_landed.notify_all();
        }
    }

    /// Block until every dispatched task has finished, successfully or not.
    fn wait_for_landing(&self) {
        let mut parity = self.parity.lock();
        while parity.landed < parity.dispatched {
            self.all_landed.wait(&mut parity);
        }
    }

    fn check_outcome(&self) -> Result<()> {
        if self.outcome.is_cancelled() {
            return Err(BpzError::Aggregate(self.outcome.take_errors()));
        }
        Ok(())
    }
}

/// Ownership a task holds while its block is in flight.
///
/// Dropping it, whichever way the task ends, returns the gate permit and then
/// counts the block as landed.
struct InFlight<W> {
    call: Arc<Call<W>>,
    permit: Option<Permit>,
}

impl<W> InFlight<W> {
    fn new(call: Arc<Call<W>>, permit: Permit) -> Self {
        Self {
            call,
            permit: Some(permit),
        }
    }

    fn fail(&self, block: i32, source: anyhow::Error) {
        warn!(block, error = %format!("{source:#}"), "block failed; cancelling");
        self.call
            .outcome
            .set_failed(BpzError::Worker { block, source });
    }
}

impl<W> Drop for InFlight<W> {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.call.landed();
    }
}

// ── Progress ────────────────────────────────────────────────────────────────

struct Progress<'a> {
    last: u8,
    callback: Option<&'a mut dyn FnMut(u8)>,
}

impl<'a> Progress<'a> {
    fn new(callback: Option<&'a mut dyn FnMut(u8)>) -> Self {
        Self { last: 0, callback }
    }

    fn block_read(&mut self, read: u64, total: u64) {
        let percent = (read * 100 / total.max(1)).min(100) as u8;
        if percent != self.last {
            self.last = percent;
            if let Some(callback) = self.callback.as_mut() {
                callback(percent);
            }
        }
    }
}
