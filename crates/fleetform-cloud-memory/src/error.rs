//! Simulated cloud error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryCloudError {
    #[error("no simulated resource with id: {0}")]
    ResourceNotFound(String),

    #[error("corrupt cloud file {path}: {source}")]
    CorruptStore {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MemoryCloudError>;
