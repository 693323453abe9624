use std::io::{Read, Write};

use crate::error::{BpzError, Result};

/// Magic value opening every bpz stream.
pub const MAGIC: u32 = 0xDEAD_BEEF;

/// Raw bytes per block; the last block of a stream may be shorter.
pub const BLOCK_SIZE: usize = 1024 * 1024;

/// Size of the directory preamble in bytes.
///   magic:u32 + block_count:i32 = 4 + 4 = 8
pub const PREAMBLE_SIZE: u64 = 8;

/// Entries reserved up front when parsing; larger directories grow as read.
const MAX_PREALLOCATED_ENTRIES: usize = 4096;

/// Size of each BlockEntry in the directory, in bytes.
///   number:i32 + size:i32 + source_size:i32 = 4 + 4 + 4 = 12
pub const BLOCK_ENTRY_SIZE: u64 = 12;

// ── Block entry ─────────────────────────────────────────────────────────────

/// One directory entry, describing a single stored block.
///
/// Entries sit in *storage order*: the order in which compressed payloads
/// follow the directory. `number` records where the block came from in the
/// original stream, which is not necessarily its storage position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    /// Logical order of the block in the original stream, 0-based.
    pub number: i32,
    /// Length of the stored (compressed) payload in bytes.
    pub size: i32,
    /// Length of the original uncompressed block in bytes.
    pub source_size: i32,
}

impl Default for BlockEntry {
    /// An unfilled slot.
    fn default() -> Self {
        Self {
            number: -1,
            size: -1,
            source_size: -1,
        }
    }
}

impl BlockEntry {
    /// Serialize to exactly `BLOCK_ENTRY_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; BLOCK_ENTRY_SIZE as usize] {
        let mut buf = [0u8; BLOCK_ENTRY_SIZE as usize];
        buf[0..4].copy_from_slice(&self.number.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.source_size.to_le_bytes());
        buf
    }

    /// Deserialize from `BLOCK_ENTRY_SIZE` bytes.
    pub fn from_bytes(buf: &[u8; BLOCK_ENTRY_SIZE as usize]) -> Self {
        let field = |at: usize| i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        Self {
            number: field(0),
            size: field(4),
            source_size: field(8),
        }
    }

    /// True once a task has recorded a landed block into this slot.
    pub fn is_filled(&self) -> bool {
        self.number >= 0 && self.size >= 0 && self.source_size >= 0
    }
}

// ── Directory ───────────────────────────────────────────────────────────────

/// Block directory written in front of the payloads.
///
/// # Layout (little-endian)
/// ```text
/// [magic:u32 = 0xDEADBEEF][block_count:i32]
/// [number:i32][size:i32][source_size:i32]   × block_count, storage order
/// [payload 0][payload 1] ... [payload N-1]   same order as the entries
/// ```
///
/// The directory size depends only on the block count, so the compressor
/// reserves it up front and overwrites it once every block has landed.
#[derive(Debug, Clone)]
pub struct Directory {
    entries: Vec<BlockEntry>,
}

impl Directory {
    /// Create a directory with `block_count` unfilled slots.
    pub fn new(block_count: i32) -> Result<Self> {
        if block_count <= 0 {
            return Err(BpzError::config(format!(
                "block count must be greater than zero, got {block_count}"
            )));
        }
        Ok(Self {
            entries: vec![BlockEntry::default(); block_count as usize],
        })
    }

    /// Number of blocks described by this directory.
    #[inline]
    pub fn block_count(&self) -> i32 {
        self.entries.len() as i32
    }

    /// Bytes occupied by the serialized directory.
    #[inline]
    pub fn self_size(&self) -> u64 {
        PREAMBLE_SIZE + self.entries.len() as u64 * BLOCK_ENTRY_SIZE
    }

    pub fn entries(&self) -> &[BlockEntry] {
        &self.entries
    }

    /// Record a landed block into storage slot `slot`.
    pub fn set(&mut self, slot: usize, entry: BlockEntry) -> Result<()> {
        let count = self.entries.len();
        let target = self.entries.get_mut(slot).ok_or_else(|| {
            BpzError::config(format!("storage slot {slot} out of range (total {count})"))
        })?;
        *target = entry;
        Ok(())
    }

    /// Total uncompressed size of all blocks in bytes.
    pub fn source_len(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.source_size.max(0) as u64)
            .sum()
    }

    /// Total stored payload size of all blocks in bytes (excluding the directory).
    pub fn stored_len(&self) -> u64 {
        self.entries.iter().map(|e| e.size.max(0) as u64).sum()
    }

    /// Absolute offset in the original stream of the block with logical order `number`.
    ///
    /// Sums the source sizes of every entry ordered before it, wherever those
    /// entries happen to be stored.
    pub fn offset_of(&self, number: i32) -> Result<u64> {
        if number < 0 || number >= self.block_count() {
            return Err(BpzError::config(format!(
                "block number {number} out of range (total {})",
                self.block_count()
            )));
        }
        Ok(self
            .entries
            .iter()
            .filter(|e| e.number < number)
            .map(|e| e.source_size.max(0) as u64)
            .sum())
    }

    /// Serialize the directory at the writer's current position.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        let mut buf = Vec::with_capacity(self.self_size() as usize);
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.block_count().to_le_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.to_bytes());
        }
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Parse a directory from the reader's current position.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut preamble = [0u8; PREAMBLE_SIZE as usize];
        read_exact_or_format(reader, &mut preamble, "directory preamble")?;

        let magic = u32::from_le_bytes([preamble[0], preamble[1], preamble[2], preamble[3]]);
        if magic != MAGIC {
            return Err(BpzError::format(format!(
                "bad magic {magic:#010x}, expected {MAGIC:#010x}; not a bpz stream"
            )));
        }

        let count = i32::from_le_bytes([preamble[4], preamble[5], preamble[6], preamble[7]]);
        if count <= 0 {
            return Err(BpzError::format(format!(
                "directory declares {count} blocks; expected at least one"
            )));
        }

        // Entries grow as they arrive, so a count the stream cannot back ends
        // in a short read rather than a huge up-front allocation.
        let mut entries = Vec::with_capacity((count as usize).min(MAX_PREALLOCATED_ENTRIES));
        let mut entry_buf = [0u8; BLOCK_ENTRY_SIZE as usize];
        for slot in 0..count as usize {
            read_exact_or_format(reader, &mut entry_buf, "directory entry")?;
            let entry = BlockEntry::from_bytes(&entry_buf);
            if !entry.is_filled() || entry.number >= count {
                return Err(BpzError::format(format!(
                    "directory entry {slot} is inconsistent: {entry:?}"
                )));
            }
            entries.push(entry);
        }

        let mut numbers: Vec<i32> = entries.iter().map(|e| e.number).collect();
        numbers.sort_unstable();
        if let Some(pair) = numbers.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(BpzError::format(format!(
                "block number {} appears twice in the directory",
                pair[0]
            )));
        }

        Ok(Self { entries })
    }
}

fn read_exact_or_format<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    what: &str,
) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(BpzError::format(format!("stream ends inside the {what}")))
        }
        Err(e) => Err(e.into()),
    }
}

/// Number of blocks needed to cover `len` source bytes.
pub fn blocks_for(len: u64, block_size: usize) -> u64 {
    len.div_ceil(block_size as u64)
}
