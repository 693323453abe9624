use thiserror::Error;

#[derive(Debug, Error)]
pub enum BpzError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid format: {0}")]
    Format(String),
    #[error("block {block} failed: {source:#}")]
    Worker {
        block: i32,
        #[source]
        source: anyhow::Error,
    },
    #[error("{} block(s) failed during processing", .0.len())]
    Aggregate(Vec<BpzError>),
    #[error("worker pool is closing; no new tasks accepted")]
    PoolClosed,
    /// Broken engine invariant; never caused by input or configuration.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BpzError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// Errors wrapped by an aggregate failure; empty for every other variant.
    pub fn inner_errors(&self) -> &[BpzError] {
        match self {
            Self::Aggregate(errors) => errors,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, BpzError>;
