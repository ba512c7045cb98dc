// Error types for mesh loading and navigation queries

use std::io;

use navmesh_detour::DetourError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read mesh file: {0}")]
    Io(#[from] io::Error),

    #[error("out of memory while staging mesh data")]
    OutOfMemory,

    #[error("corrupt mesh file: {0}")]
    CorruptFormat(String),

    #[error("unsupported mesh set version {found} (expected {expected})")]
    VersionMismatch { found: i32, expected: i32 },

    #[error("navigation engine rejected the mesh: {0}")]
    EngineInitFailed(DetourError),

    #[error("failed to add tile {index}: {source}")]
    TileAddFailed { index: usize, source: DetourError },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    #[error("no navigation polygon near the given point")]
    NoNearbyPolygon,

    #[error("navigation handle has been released")]
    Released,

    #[error("unknown navigation handle")]
    UnknownHandle,

    #[error("navigation engine error: {0}")]
    Engine(#[from] DetourError),
}
