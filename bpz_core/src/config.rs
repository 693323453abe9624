use crate::error::{BpzError, Result};
use crate::format::BLOCK_SIZE;

/// Worker threads per hardware thread.
pub const WORKERS_PER_CPU: usize = 4;

/// Gate permits per hardware thread. Larger than the worker count so the
/// producer can read ahead while every worker is busy.
pub const PERMITS_PER_CPU: usize = 16;

/// Tuning knobs for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Worker threads in the pool.
    pub workers: usize,
    /// Maximum blocks in flight (read but not yet landed).
    pub gate_capacity: usize,
    /// Raw bytes per block.
    pub block_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            workers: cpus * WORKERS_PER_CPU,
            gate_capacity: cpus * PERMITS_PER_CPU,
            block_size: BLOCK_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_gate_capacity(mut self, gate_capacity: usize) -> Self {
        self.gate_capacity = gate_capacity;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(BpzError::config("worker count must be at least 1"));
        }
        if self.gate_capacity == 0 {
            return Err(BpzError::config("gate capacity must be at least 1"));
        }
        if self.block_size == 0 || self.block_size > i32::MAX as usize {
            return Err(BpzError::config(format!(
                "block size must be in 1..={}, got {}",
                i32::MAX,
                self.block_size
            )));
        }
        Ok(())
    }
}
