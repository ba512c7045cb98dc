// navmesh shared library
// Logging, configuration and binary buffer helpers used by every crate in the workspace

pub mod config;
pub mod log;
pub mod util;
