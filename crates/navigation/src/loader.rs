// Mesh loader - reads a mesh set file and builds a navigation handle

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use navmesh_detour::{NavMesh, NavMeshQuery, PolyRef};
use navmesh_shared::util::ByteBuffer;
use tracing::{debug, error, info};

use crate::error::LoadError;
use crate::format::{MESH_SET_HEADER_SIZE, MESH_SET_VERSION, MeshSetHeader, TILE_HEADER_SIZE, TileHeader};
use crate::handle::{NODE_POOL_SIZE, NavigationHandle};

/// Load a mesh set file into a ready-to-query handle
pub fn load(path: impl AsRef<Path>) -> Result<NavigationHandle, LoadError> {
    let path = path.as_ref();
    debug!("Loading navmesh {}", path.display());

    let result = read_file(path).and_then(|data| load_from_bytes(path, data));
    if let Err(e) = &result {
        error!("Failed to load navmesh {}: {}", path.display(), e);
    }
    result
}

fn read_file(path: &Path) -> Result<Vec<u8>, LoadError> {
    let mut file = File::open(path)?;
    let expected = file.metadata()?.len() as usize;

    let mut data = Vec::new();
    data.try_reserve_exact(expected)
        .map_err(|_| LoadError::OutOfMemory)?;
    let read = file.read_to_end(&mut data)?;
    if read < expected {
        return Err(LoadError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read {} of {} bytes", read, expected),
        )));
    }
    Ok(data)
}

/// Build a handle from an in-memory mesh set. `source_path` is only recorded.
pub fn load_from_bytes(source_path: impl Into<PathBuf>, data: Vec<u8>) -> Result<NavigationHandle, LoadError> {
    let source_path = source_path.into();
    if data.len() < MESH_SET_HEADER_SIZE {
        return Err(LoadError::CorruptFormat(format!(
            "file is {} bytes, shorter than the {} byte header",
            data.len(),
            MESH_SET_HEADER_SIZE
        )));
    }

    let mut buf = ByteBuffer::from(data);
    let header = MeshSetHeader::read(&mut buf).map_err(|e| LoadError::CorruptFormat(e.to_string()))?;
    if header.version != MESH_SET_VERSION {
        return Err(LoadError::VersionMismatch {
            found: header.version,
            expected: MESH_SET_VERSION,
        });
    }
    if header.tile_count < 0 {
        return Err(LoadError::CorruptFormat(format!(
            "negative tile count {}",
            header.tile_count
        )));
    }

    let mut mesh = NavMesh::new(header.params).map_err(LoadError::EngineInitFailed)?;

    for index in 0..header.tile_count as usize {
        if buf.remaining() < TILE_HEADER_SIZE {
            return Err(LoadError::CorruptFormat(format!("tile {} header is truncated", index)));
        }
        let tile_header = TileHeader::read(&mut buf).map_err(|e| LoadError::CorruptFormat(e.to_string()))?;
        if tile_header.tile_ref == 0 || tile_header.data_size <= 0 {
            return Err(LoadError::CorruptFormat(format!(
                "tile {} has ref {:#x} and size {}",
                index, tile_header.tile_ref, tile_header.data_size
            )));
        }

        let size = tile_header.data_size as usize;
        if buf.remaining() < size {
            return Err(LoadError::CorruptFormat(format!(
                "tile {} payload is truncated ({} of {} bytes)",
                index,
                buf.remaining(),
                size
            )));
        }

        // The engine takes ownership of a buffer of its own
        let start = buf.read_pos();
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(size)
            .map_err(|_| LoadError::OutOfMemory)?;
        payload.extend_from_slice(&buf.contents()[start..start + size]);
        buf.read_skip(size)
            .map_err(|e| LoadError::CorruptFormat(e.to_string()))?;

        mesh.add_tile(payload, PolyRef::new(tile_header.tile_ref))
            .map_err(|source| LoadError::TileAddFailed { index, source })?;
    }

    let mesh = Arc::new(mesh);
    let query = NavMeshQuery::new(Arc::clone(&mesh), NODE_POOL_SIZE).map_err(LoadError::EngineInitFailed)?;

    let stats = mesh.stats();
    info!(
        "Loaded navmesh {}: {} tiles, {} BV nodes, {} polygons ({} vertices), {} triangles ({} vertices), {:.2} MB of data",
        source_path.display(),
        stats.tiles,
        stats.bv_nodes,
        stats.polys,
        stats.verts,
        stats.detail_tris,
        stats.detail_verts,
        stats.data_size as f64 / 1_048_576.0
    );

    Ok(NavigationHandle::new(source_path, mesh, query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{assign_tile_refs, write_mesh_set};
    use navmesh_detour::builder::grid_tile;
    use navmesh_detour::{DetourError, NavMeshParams};

    fn params() -> NavMeshParams {
        NavMeshParams {
            orig: [0.0, 0.0, 0.0],
            tile_width: 16.0,
            tile_height: 16.0,
            max_tiles: 4,
            max_polys: 64,
        }
    }

    fn two_tile_file() -> Vec<u8> {
        let p = params();
        let tiles = vec![grid_tile(&p, 0, 0, 4).unwrap(), grid_tile(&p, 1, 0, 4).unwrap()];
        write_mesh_set(&p, &assign_tile_refs(&p, tiles).unwrap())
    }

    #[test]
    fn test_load_counts_match_tiles() {
        let handle = load_from_bytes("mem", two_tile_file()).unwrap();
        let stats = handle.stats().unwrap();
        assert_eq!(stats.tiles, 2);
        assert_eq!(stats.polys, 32);
        assert_eq!(stats.verts, 50);
        assert_eq!(stats.detail_tris, 64);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.navmesh");
        std::fs::write(&path, two_tile_file()).unwrap();

        let handle = load(&path).unwrap();
        assert_eq!(handle.source_path(), path.as_path());
        assert_eq!(handle.stats().unwrap().tiles, 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path().join("absent.navmesh")).unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[test]
    fn test_short_file_is_corrupt() {
        let err = load_from_bytes("mem", vec![0; 35]).unwrap_err();
        assert!(matches!(err, LoadError::CorruptFormat(_)));
    }

    #[test]
    fn test_version_gate() {
        let mut data = two_tile_file();
        data[0..4].copy_from_slice(&2i32.to_le_bytes());
        let err = load_from_bytes("mem", data).unwrap_err();
        assert!(matches!(err, LoadError::VersionMismatch { found: 2, expected: 1 }));
    }

    #[test]
    fn test_negative_tile_count() {
        let mut data = two_tile_file();
        data[4..8].copy_from_slice(&(-1i32).to_le_bytes());
        let err = load_from_bytes("mem", data).unwrap_err();
        assert!(matches!(err, LoadError::CorruptFormat(_)));
    }

    #[test]
    fn test_truncated_tile() {
        let data = two_tile_file();
        for cut in [MESH_SET_HEADER_SIZE + 4, data.len() - 10] {
            let err = load_from_bytes("mem", data[..cut].to_vec()).unwrap_err();
            assert!(
                matches!(err, LoadError::CorruptFormat(_) | LoadError::TileAddFailed { .. }),
                "cut at {}: {:?}",
                cut,
                err
            );
        }
    }

    #[test]
    fn test_zero_tile_ref_rejected() {
        let mut data = two_tile_file();
        let at = MESH_SET_HEADER_SIZE;
        data[at..at + 4].copy_from_slice(&0u32.to_le_bytes());
        let err = load_from_bytes("mem", data).unwrap_err();
        assert!(matches!(err, LoadError::CorruptFormat(_)));
    }

    #[test]
    fn test_duplicate_tile_fails_to_add() {
        let p = params();
        let tiles = vec![grid_tile(&p, 0, 0, 2).unwrap(), grid_tile(&p, 0, 0, 2).unwrap()];
        let data = write_mesh_set(&p, &assign_tile_refs(&p, tiles).unwrap());
        let err = load_from_bytes("mem", data).unwrap_err();
        assert!(matches!(err, LoadError::TileAddFailed { index: 1, .. }));
    }

    #[test]
    fn test_bad_params_fail_engine_init() {
        let mut data = two_tile_file();
        // tile_width
        data[20..24].copy_from_slice(&0.0f32.to_le_bytes());
        let err = load_from_bytes("mem", data).unwrap_err();
        assert!(matches!(err, LoadError::EngineInitFailed(_)));
    }

    #[test]
    fn test_inverted_tile_bounds_fail_to_add() {
        // Tile bounds sit at offset 72 (bmin) and 84 (bmax) of the payload
        let payload = MESH_SET_HEADER_SIZE + TILE_HEADER_SIZE;
        let mut data = two_tile_file();
        data[payload + 76..payload + 80].copy_from_slice(&1.0f32.to_le_bytes());
        data[payload + 88..payload + 92].copy_from_slice(&(-1.0f32).to_le_bytes());
        let err = load_from_bytes("mem", data).unwrap_err();
        assert!(matches!(
            err,
            LoadError::TileAddFailed {
                index: 0,
                source: DetourError::DataCorrupted
            }
        ));

        let mut data = two_tile_file();
        data[payload + 84..payload + 88].copy_from_slice(&f32::INFINITY.to_le_bytes());
        let err = load_from_bytes("mem", data).unwrap_err();
        assert!(matches!(err, LoadError::TileAddFailed { index: 0, .. }));
    }
}
