// Mesh set file format
//
// A mesh set is a fixed header followed by `tile_count` records, each a small
// tile header and the tile payload in the engine's tile encoding. All values
// are little-endian.

use std::io;

use navmesh_detour::{DetourError, NavMesh, NavMeshParams, TileRef};
use navmesh_shared::util::ByteBuffer;

/// Only supported mesh set version
pub const MESH_SET_VERSION: i32 = 1;

pub const MESH_SET_HEADER_SIZE: usize = 36;
pub const TILE_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshSetHeader {
    pub version: i32,
    pub tile_count: i32,
    pub params: NavMeshParams,
}

impl MeshSetHeader {
    pub fn read(buf: &mut ByteBuffer) -> io::Result<Self> {
        let version = buf.read_i32()?;
        let tile_count = buf.read_i32()?;
        let params = NavMeshParams {
            orig: buf.read_vec3()?,
            tile_width: buf.read_f32()?,
            tile_height: buf.read_f32()?,
            max_tiles: buf.read_i32()?,
            max_polys: buf.read_i32()?,
        };
        Ok(MeshSetHeader {
            version,
            tile_count,
            params,
        })
    }

    pub fn write(&self, buf: &mut ByteBuffer) {
        buf.write_i32(self.version);
        buf.write_i32(self.tile_count);
        buf.write_vec3(&self.params.orig);
        buf.write_f32(self.params.tile_width);
        buf.write_f32(self.params.tile_height);
        buf.write_i32(self.params.max_tiles);
        buf.write_i32(self.params.max_polys);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileHeader {
    pub tile_ref: u32,
    pub data_size: i32,
}

impl TileHeader {
    pub fn read(buf: &mut ByteBuffer) -> io::Result<Self> {
        Ok(TileHeader {
            tile_ref: buf.read_u32()?,
            data_size: buf.read_i32()?,
        })
    }

    pub fn write(&self, buf: &mut ByteBuffer) {
        buf.write_u32(self.tile_ref);
        buf.write_i32(self.data_size);
    }
}

/// Serialize tile payloads into a mesh set file
pub fn write_mesh_set(params: &NavMeshParams, tiles: &[(TileRef, Vec<u8>)]) -> Vec<u8> {
    let payload: usize = tiles.iter().map(|(_, data)| TILE_HEADER_SIZE + data.len()).sum();
    let mut buf = ByteBuffer::with_capacity(MESH_SET_HEADER_SIZE + payload);

    MeshSetHeader {
        version: MESH_SET_VERSION,
        tile_count: tiles.len() as i32,
        params: *params,
    }
    .write(&mut buf);

    for (tile_ref, data) in tiles {
        TileHeader {
            tile_ref: tile_ref.id(),
            data_size: data.len() as i32,
        }
        .write(&mut buf);
        buf.append(data);
    }

    buf.into_inner()
}

/// Pair payloads with the references a fresh mesh would hand out when the
/// tiles are added in order
pub fn assign_tile_refs(
    params: &NavMeshParams,
    tiles: Vec<Vec<u8>>,
) -> Result<Vec<(TileRef, Vec<u8>)>, DetourError> {
    let mesh = NavMesh::new(*params)?;
    if tiles.len() > mesh.max_tiles() {
        return Err(DetourError::OutOfMemory);
    }
    Ok(tiles
        .into_iter()
        .enumerate()
        .map(|(i, data)| (mesh.tile_ref(i), data))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NavMeshParams {
        NavMeshParams {
            orig: [-4.0, 1.5, 2.0],
            tile_width: 32.0,
            tile_height: 16.0,
            max_tiles: 8,
            max_polys: 128,
        }
    }

    #[test]
    fn test_header_layout() {
        let data = write_mesh_set(&params(), &[]);
        assert_eq!(data.len(), MESH_SET_HEADER_SIZE);
        assert_eq!(&data[0..4], &1i32.to_le_bytes());
        assert_eq!(&data[4..8], &0i32.to_le_bytes());
        assert_eq!(&data[8..12], &(-4.0f32).to_le_bytes());
        assert_eq!(&data[28..32], &8i32.to_le_bytes());

        let header = MeshSetHeader::read(&mut ByteBuffer::from(data)).unwrap();
        assert_eq!(header.version, MESH_SET_VERSION);
        assert_eq!(header.params, params());
    }

    #[test]
    fn test_tile_records() {
        let tiles = assign_tile_refs(&params(), vec![vec![1, 2, 3], vec![4; 5]]).unwrap();
        assert_ne!(tiles[0].0, tiles[1].0);

        let data = write_mesh_set(&params(), &tiles);
        assert_eq!(data.len(), MESH_SET_HEADER_SIZE + 2 * TILE_HEADER_SIZE + 8);

        let mut buf = ByteBuffer::from(data);
        let header = MeshSetHeader::read(&mut buf).unwrap();
        assert_eq!(header.tile_count, 2);
        let th = TileHeader::read(&mut buf).unwrap();
        assert_eq!(th.tile_ref, tiles[0].0.id());
        assert_eq!(th.data_size, 3);
        assert_eq!(buf.read_bytes(3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_assign_refs_respects_capacity() {
        let mut p = params();
        p.max_tiles = 1;
        assert!(assign_tile_refs(&p, vec![vec![0], vec![0]]).is_err());
    }

    #[test]
    fn test_truncated_header() {
        let mut buf = ByteBuffer::from(vec![1, 0, 0, 0, 2]);
        let err = MeshSetHeader::read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
