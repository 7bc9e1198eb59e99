//! Error types for contention-bench

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("invalid configuration: {field} must be positive, got {value}")]
    InvalidConfig { field: &'static str, value: usize },

    /// The OS refused to start a thread. Treated as fatal for the session.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),

    #[error("serialization domain is no longer running")]
    DomainClosed,
}

pub type Result<T> = std::result::Result<T, BenchError>;
