//! Error types shared across the workspace

use thiserror::Error;

/// Top-level error for the lantern core
#[derive(Error, Debug)]
pub enum Error {
    /// A pluggable backend (embedder, index, encoder, web search) failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// Retrieval pipeline error
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

/// Convenience result alias
pub type Result<T> = std::result::Result<T, Error>;
