// Engine error type

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, DetourError>;

/// Failures reported by the navigation mesh engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DetourError {
    #[error("invalid parameter")]
    InvalidParam,
    #[error("tile data has wrong magic number")]
    WrongMagic,
    #[error("tile data has wrong version")]
    WrongVersion,
    #[error("tile data is truncated or malformed")]
    DataCorrupted,
    #[error("a tile already exists at that location")]
    AlreadyOccupied,
    #[error("no free tile slot for the requested reference")]
    OutOfMemory,
    #[error("polygon or tile reference is not valid")]
    InvalidRef,
}

impl From<std::io::Error> for DetourError {
    fn from(_: std::io::Error) -> Self {
        DetourError::DataCorrupted
    }
}
