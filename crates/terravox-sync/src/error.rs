//! Error types for sync sessions

use thiserror::Error;

use crate::events::ClientId;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] terravox::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Client {0} is not connected")]
    UnknownClient(ClientId),
}

pub type Result<T> = std::result::Result<T, SyncError>;
