// navigation - navmesh loading and path queries for game-world agents
//
// Loads mesh set files into handles and answers straight path, random point
// and raycast queries on them.

pub mod error;
pub mod format;
pub mod handle;
pub mod loader;
pub mod point;
pub mod random;
pub mod registry;

pub use error::{LoadError, QueryError};
pub use handle::NavigationHandle;
pub use loader::{load, load_from_bytes};
pub use point::Point;
pub use random::RandomSource;
pub use registry::{HandleId, HandleRegistry};
