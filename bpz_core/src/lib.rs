pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod gate;
pub mod outcome;
pub mod pool;

pub use codec::Codec;
pub use config::EngineConfig;
pub use engine::{Engine, Mode};
pub use error::{BpzError, Result};
pub use format::{BlockEntry, Directory, BLOCK_SIZE, MAGIC};
pub use gate::{Gate, Permit};
pub use outcome::Outcome;
pub use pool::WorkerPool;
