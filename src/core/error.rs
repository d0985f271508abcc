//! Error types for the voxel store

use thiserror::Error;

/// Main error type for the store.
///
/// Only recoverable conditions live here: malformed saves, diffs, bytes and
/// configuration. Caller bugs (out-of-world positions, malformed regions,
/// access outside a transaction) panic instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Save depth {found} does not match world depth {expected}")]
    DepthMismatch { expected: u8, found: u8 },

    #[error("Corrupt save: {0}")]
    CorruptSave(String),

    #[error("Corrupt diff: {0}")]
    CorruptDiff(String),

    #[error("Codec error: {0}")]
    Codec(String),
}
