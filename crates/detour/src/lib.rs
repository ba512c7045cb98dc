// navmesh-detour - tiled navigation mesh and query engine
// Tile payload decoding, tile linking, nearest polygon lookup, corridor search,
// straight-path funneling, random sampling and raycasts

pub mod builder;
pub mod math;
pub mod nav_mesh;
pub mod node_pool;
pub mod query;
pub mod status;
pub mod tile;

pub use builder::TileBuilder;
pub use nav_mesh::{MeshStats, NavMesh, NavMeshParams, PolyRef, TileRef};
pub use query::{NavMeshQuery, QueryFilter, RaycastHit, StraightPathPoint};
pub use status::{DetourError, Result};

/// Maximum number of vertices per navigation polygon
pub const DT_VERTS_PER_POLYGON: usize = 6;

/// Tile payload magic ('D' 'N' 'A' 'V')
pub const DT_NAVMESH_MAGIC: i32 =
    ((b'D' as i32) << 24) | ((b'N' as i32) << 16) | ((b'A' as i32) << 8) | b'V' as i32;

/// Tile payload version understood by this engine
pub const DT_NAVMESH_VERSION: i32 = 7;

/// Neighbour flag marking a portal edge to another tile
pub const DT_EXT_LINK: u16 = 0x8000;

/// Link side value for links inside a tile
pub const DT_LINK_INTERNAL: u8 = 0xff;

/// Off-mesh connection flag: the connection can be travelled both ways
pub const DT_OFFMESH_CON_BIDIR: u8 = 1;

/// Straight path vertex flags
pub const DT_STRAIGHTPATH_START: u8 = 0x01;
pub const DT_STRAIGHTPATH_END: u8 = 0x02;
pub const DT_STRAIGHTPATH_OFFMESH_CONNECTION: u8 = 0x04;
