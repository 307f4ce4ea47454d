//! Crate-level error type

use crate::engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("out of memory allocating a {width}x{height} bitmap")]
    OutOfMemory { width: u32, height: u32 },

    #[error("document engine: {0}")]
    Engine(#[from] EngineError),

    #[error("page {page} is outside 0..{count}")]
    InvalidPage { page: usize, count: usize },

    #[error("document has no pages")]
    EmptyDocument,

    #[error("document requires a password")]
    PasswordRequired,

    #[error("wrong password")]
    AuthenticationFailed,

    #[error("failed to start worker threads: {0}")]
    Workers(#[from] std::io::Error),
}
