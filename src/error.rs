use std::fmt::Display;

use alloy::{sol_types, transports};

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Error raised by the fill source, snapshot stores and the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected empty RPC response")]
    NullResp,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("event decode error: {0}")]
    Decode(String),

    #[error("block out of order, expected above: {0}, got: {1}")]
    BlockOutOfOrder(u64, u64),

    #[error("volume overflow for trader {0}")]
    VolumeOverflow(crate::types::TraderId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed snapshot record in {0}: {1}")]
    MalformedSnapshot(String, String),
}

impl<E: Display> From<transports::RpcError<E>> for Error {
    fn from(value: transports::RpcError<E>) -> Self {
        match value {
            transports::RpcError::ErrorResp(ref resp) => {
                let msg = resp.message.to_ascii_lowercase();
                if (resp.code == -32600 || resp.code == -32601 || resp.code == -32602)
                    && (msg.contains("invalid") || msg.contains("not found"))
                {
                    Self::InvalidRequest(msg)
                } else {
                    Self::Transport(value.to_string())
                }
            }
            transports::RpcError::NullResp => Self::NullResp,
            _ => Self::Transport(value.to_string()),
        }
    }
}

impl From<sol_types::Error> for Error {
    fn from(value: sol_types::Error) -> Self {
        Self::Decode(value.to_string())
    }
}
