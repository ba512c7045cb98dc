// TileBuilder - serialises convex polygons into tile payloads
//
// Produces the same layout the loader consumes: shared vertices, clockwise
// polygons with neighbour and portal information, one fan detail mesh per
// polygon and a quantized bounding volume tree.

use navmesh_shared::util::ByteBuffer;

use crate::math::{self, Vec3};
use crate::nav_mesh::NavMeshParams;
use crate::status::{DetourError, Result};
use crate::tile::{BvNode, MeshHeader, OffMeshConnection, Poly, PolyDetail, PolyType};
use crate::{DT_EXT_LINK, DT_LINK_INTERNAL, DT_OFFMESH_CON_BIDIR, DT_VERTS_PER_POLYGON};

const BORDER_EPS: f32 = 1e-4;

#[derive(Debug, Clone)]
struct PolygonInput {
    verts: Vec<u16>,
    flags: u16,
    area: u8,
}

#[derive(Debug, Clone)]
struct OffMeshInput {
    start: Vec3,
    end: Vec3,
    radius: f32,
    bidirectional: bool,
}

#[derive(Debug, Clone)]
pub struct TileBuilder {
    x: i32,
    y: i32,
    layer: i32,
    user_id: u32,
    bmin: Vec3,
    bmax: Vec3,
    cell_size: f32,
    walkable_height: f32,
    walkable_radius: f32,
    walkable_climb: f32,
    build_bv_tree: bool,
    verts: Vec<Vec3>,
    polys: Vec<PolygonInput>,
    off_mesh: Vec<OffMeshInput>,
}

impl TileBuilder {
    /// Tile at grid cell (x, y) covering `bmin..bmax`
    pub fn new(x: i32, y: i32, bmin: Vec3, bmax: Vec3) -> Self {
        TileBuilder {
            x,
            y,
            layer: 0,
            user_id: 0,
            bmin,
            bmax,
            cell_size: 0.3,
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
            build_bv_tree: true,
            verts: Vec::new(),
            polys: Vec::new(),
            off_mesh: Vec::new(),
        }
    }

    /// Tile covering grid cell (tx, ty) of `params`
    pub fn for_params(params: &NavMeshParams, tx: i32, ty: i32) -> Self {
        let bmin = [
            params.orig[0] + tx as f32 * params.tile_width,
            params.orig[1],
            params.orig[2] + ty as f32 * params.tile_height,
        ];
        let bmax = [
            bmin[0] + params.tile_width,
            params.orig[1],
            bmin[2] + params.tile_height,
        ];
        Self::new(tx, ty, bmin, bmax)
    }

    pub fn layer(mut self, layer: i32) -> Self {
        self.layer = layer;
        self
    }

    pub fn user_id(mut self, user_id: u32) -> Self {
        self.user_id = user_id;
        self
    }

    /// Quantization step of the bounding volume tree
    pub fn cell_size(mut self, cell_size: f32) -> Self {
        self.cell_size = cell_size;
        self
    }

    pub fn walkable_climb(mut self, climb: f32) -> Self {
        self.walkable_climb = climb;
        self
    }

    pub fn without_bv_tree(mut self) -> Self {
        self.build_bv_tree = false;
        self
    }

    pub fn poly_count(&self) -> usize {
        self.polys.len()
    }

    pub fn vert_count(&self) -> usize {
        self.verts.len()
    }

    fn add_vertex(&mut self, p: &Vec3) -> Result<u16> {
        if let Some(i) = self.verts.iter().position(|v| math::vequal(v, p)) {
            return Ok(i as u16);
        }
        let idx = u16::try_from(self.verts.len()).map_err(|_| DetourError::InvalidParam)?;
        self.verts.push(*p);
        Ok(idx)
    }

    /// Add a walkable convex polygon with flags 1 and area 0
    pub fn add_polygon(&mut self, pts: &[Vec3]) -> Result<usize> {
        self.add_polygon_with(pts, 1, 0)
    }

    /// Add a convex polygon. Either winding is accepted.
    pub fn add_polygon_with(&mut self, pts: &[Vec3], flags: u16, area: u8) -> Result<usize> {
        if pts.len() < 3 || pts.len() > DT_VERTS_PER_POLYGON || area > 0x3f {
            return Err(DetourError::InvalidParam);
        }
        let signed_area = math::poly_area_2d(pts);
        if signed_area.abs() <= f32::EPSILON {
            return Err(DetourError::InvalidParam);
        }

        let mut ordered = pts.to_vec();
        if signed_area < 0.0 {
            ordered.reverse();
        }

        let verts = ordered
            .iter()
            .map(|p| self.add_vertex(p))
            .collect::<Result<Vec<_>>>()?;
        self.polys.push(PolygonInput { verts, flags, area });
        Ok(self.polys.len() - 1)
    }

    /// Add an off-mesh connection from `start` to `end`, landing within
    /// `radius` of each point. The start must lie inside the tile on xz; the
    /// end may lie in a neighbouring tile.
    pub fn add_off_mesh_connection(
        &mut self,
        start: &Vec3,
        end: &Vec3,
        radius: f32,
        bidirectional: bool,
    ) -> Result<usize> {
        let finite = start.iter().chain(end.iter()).all(|v| v.is_finite());
        if !finite || !(radius > 0.0) || self.classify_point(start) != DT_LINK_INTERNAL {
            return Err(DetourError::InvalidParam);
        }
        self.off_mesh.push(OffMeshInput {
            start: *start,
            end: *end,
            radius,
            bidirectional,
        });
        Ok(self.off_mesh.len() - 1)
    }

    /// Neighbour direction of a point outside the tile bounds on xz, or
    /// `DT_LINK_INTERNAL` when it lies inside
    fn classify_point(&self, pt: &Vec3) -> u8 {
        let xp = pt[0] >= self.bmax[0];
        let zp = pt[2] >= self.bmax[2];
        let xm = pt[0] < self.bmin[0];
        let zm = pt[2] < self.bmin[2];
        match (xp, zp, xm, zm) {
            (true, false, false, false) => 0,
            (true, true, false, false) => 1,
            (false, true, false, false) => 2,
            (false, true, true, false) => 3,
            (false, false, true, false) => 4,
            (false, false, true, true) => 5,
            (false, false, false, true) => 6,
            (true, false, false, true) => 7,
            _ => DT_LINK_INTERNAL,
        }
    }

    /// Border direction of edge a-b, if it lies on the tile bounds
    fn border_side(&self, a: &Vec3, b: &Vec3) -> Option<u16> {
        let on = |v: f32, w: f32, bound: f32| (v - bound).abs() < BORDER_EPS && (w - bound).abs() < BORDER_EPS;
        if on(a[0], b[0], self.bmax[0]) {
            Some(0)
        } else if on(a[2], b[2], self.bmax[2]) {
            Some(2)
        } else if on(a[0], b[0], self.bmin[0]) {
            Some(4)
        } else if on(a[2], b[2], self.bmin[2]) {
            Some(6)
        } else {
            None
        }
    }

    fn neighbours(&self, ip: usize) -> [u16; DT_VERTS_PER_POLYGON] {
        let poly = &self.polys[ip];
        let nv = poly.verts.len();
        let mut neis = [0u16; DT_VERTS_PER_POLYGON];
        for j in 0..nv {
            let (a, b) = (poly.verts[j], poly.verts[(j + 1) % nv]);
            let shared = self.polys.iter().enumerate().position(|(other_ip, other)| {
                other_ip != ip
                    && (0..other.verts.len()).any(|k| {
                        other.verts[k] == b && other.verts[(k + 1) % other.verts.len()] == a
                    })
            });
            neis[j] = match shared {
                Some(other) => other as u16 + 1,
                None => self
                    .border_side(&self.verts[a as usize], &self.verts[b as usize])
                    .map_or(0, |side| DT_EXT_LINK | side),
            };
        }
        neis
    }

    fn header(&self, max_link_count: usize, detail_tri_count: usize, bv_node_count: usize) -> MeshHeader {
        let (bmin, bmax) = self
            .verts
            .iter()
            .fold((self.bmin, self.bmax), |(lo, hi), v| (math::vmin(&lo, v), math::vmax(&hi, v)));
        MeshHeader {
            x: self.x,
            y: self.y,
            layer: self.layer,
            user_id: self.user_id,
            poly_count: self.polys.len() + self.off_mesh.len(),
            vert_count: self.verts.len() + self.off_mesh.len() * 2,
            max_link_count,
            detail_mesh_count: self.polys.len(),
            detail_vert_count: 0,
            detail_tri_count,
            bv_node_count,
            off_mesh_con_count: self.off_mesh.len(),
            off_mesh_base: self.polys.len(),
            walkable_height: self.walkable_height,
            walkable_radius: self.walkable_radius,
            walkable_climb: self.walkable_climb,
            bmin,
            bmax,
            bv_quant_factor: 1.0 / self.cell_size,
        }
    }

    /// Serialise the tile
    pub fn build(&self) -> Result<Vec<u8>> {
        if self.polys.is_empty() || !(self.cell_size > 0.0) {
            return Err(DetourError::InvalidParam);
        }

        let mut polys = Vec::with_capacity(self.polys.len());
        let mut edge_count = 0;
        let mut portal_count = 0;
        for (ip, input) in self.polys.iter().enumerate() {
            let neis = self.neighbours(ip);
            let mut verts = [0u16; DT_VERTS_PER_POLYGON];
            verts[..input.verts.len()].copy_from_slice(&input.verts);
            for &nei in &neis[..input.verts.len()] {
                if nei & DT_EXT_LINK != 0 {
                    portal_count += 1;
                } else if nei != 0 {
                    edge_count += 1;
                }
            }
            polys.push(Poly {
                verts,
                neis,
                flags: input.flags,
                vert_count: input.verts.len() as u8,
                area: input.area,
                poly_type: PolyType::Ground,
            });
        }

        let mut details = Vec::with_capacity(polys.len());
        let mut tris = Vec::new();
        for poly in &polys {
            let nv = poly.vert_count;
            details.push(PolyDetail {
                vert_base: 0,
                tri_base: tris.len() as u32,
                vert_count: 0,
                tri_count: nv - 2,
            });
            for j in 2..nv {
                // Bit per triangle edge that lies on the polygon outline
                let mut edge_flags = 1 << 2;
                if j == 2 {
                    edge_flags |= 1;
                }
                if j == nv - 1 {
                    edge_flags |= 1 << 4;
                }
                tris.push([0, j - 1, j, edge_flags]);
            }
        }

        let header_for_bounds = self.header(0, 0, 0);
        let bv_tree = if self.build_bv_tree {
            self.bv_tree(&header_for_bounds)
        } else {
            Vec::new()
        };

        // Connection polygons follow the ground polygons, their two vertices
        // follow the shared ones
        let mut off_mesh_cons = Vec::with_capacity(self.off_mesh.len());
        let mut off_mesh_links = 0;
        for (i, input) in self.off_mesh.iter().enumerate() {
            let poly = u16::try_from(self.polys.len() + i).map_err(|_| DetourError::InvalidParam)?;
            let end_vert = u16::try_from(self.verts.len() + i * 2 + 1).map_err(|_| DetourError::InvalidParam)?;
            let mut verts = [0u16; DT_VERTS_PER_POLYGON];
            verts[0] = end_vert - 1;
            verts[1] = end_vert;
            polys.push(Poly {
                verts,
                neis: [0; DT_VERTS_PER_POLYGON],
                flags: 1,
                vert_count: 2,
                area: 0,
                poly_type: PolyType::OffMeshConnection,
            });

            let side = self.classify_point(&input.end);
            off_mesh_links += if side == DT_LINK_INTERNAL { 2 } else { 1 };
            off_mesh_cons.push(OffMeshConnection {
                pos: [input.start, input.end],
                rad: input.radius,
                poly,
                flags: if input.bidirectional { DT_OFFMESH_CON_BIDIR } else { 0 },
                side,
                user_id: 0,
            });
        }

        let max_links = edge_count + portal_count * 2 + off_mesh_links * 2;
        let header = self.header(max_links, tris.len(), bv_tree.len());
        let size = header.payload_size().ok_or(DetourError::InvalidParam)?;

        let mut buf = ByteBuffer::with_capacity(size);
        header.write(&mut buf);
        for v in &self.verts {
            buf.write_vec3(v);
        }
        for input in &self.off_mesh {
            buf.write_vec3(&input.start);
            buf.write_vec3(&input.end);
        }
        for poly in &polys {
            poly.write(&mut buf);
        }
        buf.write_zeros(header.max_link_count * crate::tile::LINK_SIZE);
        for detail in &details {
            detail.write(&mut buf);
        }
        for tri in &tris {
            buf.append(tri);
        }
        for node in &bv_tree {
            node.write(&mut buf);
        }
        for con in &off_mesh_cons {
            con.write(&mut buf);
        }

        Ok(buf.into_inner())
    }

    fn bv_tree(&self, header: &MeshHeader) -> Vec<BvNode> {
        let quant = header.bv_quant_factor;
        let mut items: Vec<BvNode> = self
            .polys
            .iter()
            .enumerate()
            .map(|(ip, poly)| {
                let mut node = BvNode {
                    i: ip as i32,
                    ..Default::default()
                };
                let first = self.verts[poly.verts[0] as usize];
                let (lo, hi) = poly.verts.iter().fold((first, first), |(lo, hi), &v| {
                    let p = &self.verts[v as usize];
                    (math::vmin(&lo, p), math::vmax(&hi, p))
                });
                for k in 0..3 {
                    let qmin = ((lo[k] - header.bmin[k]) * quant).floor();
                    let qmax = ((hi[k] - header.bmin[k]) * quant).ceil();
                    node.bmin[k] = qmin.clamp(0.0, 65535.0) as u16;
                    node.bmax[k] = qmax.clamp(0.0, 65535.0) as u16;
                }
                node
            })
            .collect();

        let mut nodes = Vec::with_capacity(items.len() * 2);
        let count = items.len();
        subdivide(&mut items, 0, count, &mut nodes);
        nodes
    }
}

fn subdivide(items: &mut [BvNode], imin: usize, imax: usize, nodes: &mut Vec<BvNode>) {
    let inum = imax - imin;
    let icur = nodes.len();

    if inum == 1 {
        nodes.push(items[imin]);
        return;
    }

    let mut node = BvNode {
        bmin: items[imin].bmin,
        bmax: items[imin].bmax,
        i: 0,
    };
    for it in &items[imin + 1..imax] {
        for k in 0..3 {
            node.bmin[k] = node.bmin[k].min(it.bmin[k]);
            node.bmax[k] = node.bmax[k].max(it.bmax[k]);
        }
    }
    nodes.push(node);

    let extent = |k: usize| node.bmax[k] as i32 - node.bmin[k] as i32;
    let axis = if extent(1) > extent(0) && extent(1) > extent(2) {
        1
    } else if extent(2) > extent(0) {
        2
    } else {
        0
    };
    items[imin..imax].sort_by_key(|it| it.bmin[axis]);

    let isplit = imin + inum / 2;
    subdivide(items, imin, isplit, nodes);
    subdivide(items, isplit, imax, nodes);

    // Negative index is the escape offset past this subtree
    let escape = (nodes.len() - icur) as i32;
    nodes[icur].i = -escape;
}

/// A square tile of `cells` x `cells` flat quads at the params' origin height
pub fn grid_tile(params: &NavMeshParams, tx: i32, ty: i32, cells: usize) -> Result<Vec<u8>> {
    if cells == 0 {
        return Err(DetourError::InvalidParam);
    }
    let mut builder = TileBuilder::for_params(params, tx, ty);
    let x0 = params.orig[0] + tx as f32 * params.tile_width;
    let z0 = params.orig[2] + ty as f32 * params.tile_height;
    let y = params.orig[1];
    let dx = params.tile_width / cells as f32;
    let dz = params.tile_height / cells as f32;

    for row in 0..cells {
        for col in 0..cells {
            let (ax, az) = (x0 + col as f32 * dx, z0 + row as f32 * dz);
            // Outer cells end exactly on the tile border
            let bx = if col + 1 == cells { x0 + params.tile_width } else { ax + dx };
            let bz = if row + 1 == cells { z0 + params.tile_height } else { az + dz };
            builder.add_polygon(&[[ax, y, az], [ax, y, bz], [bx, y, bz], [bx, y, az]])?;
        }
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::MeshTile;

    fn params() -> NavMeshParams {
        NavMeshParams {
            orig: [0.0, 0.0, 0.0],
            tile_width: 8.0,
            tile_height: 8.0,
            max_tiles: 4,
            max_polys: 64,
        }
    }

    #[test]
    fn test_grid_tile_decodes() {
        let data = grid_tile(&params(), 0, 0, 3).unwrap();
        let size = data.len();
        let tile = MeshTile::from_bytes(data).unwrap();
        assert_eq!(tile.polys.len(), 9);
        assert_eq!(tile.verts.len(), 16);
        assert_eq!(tile.detail_tris.len(), 18);
        assert_eq!(tile.bv_tree.len(), 17);
        assert_eq!(tile.data_size, size);
        assert_eq!(tile.header.payload_size(), Some(size));
    }

    #[test]
    fn test_neighbours_and_portals() {
        let data = grid_tile(&params(), 0, 0, 2).unwrap();
        let tile = MeshTile::from_bytes(data).unwrap();
        for poly in &tile.polys {
            let nv = poly.vert_count();
            let internal = poly.neis[..nv].iter().filter(|&&n| n != 0 && n & DT_EXT_LINK == 0).count();
            let portals = poly.neis[..nv].iter().filter(|&&n| n & DT_EXT_LINK != 0).count();
            assert_eq!(internal, 2);
            assert_eq!(portals, 2);
        }
    }

    #[test]
    fn test_winding_is_normalised() {
        let mut a = TileBuilder::new(0, 0, [0.0; 3], [4.0, 0.0, 4.0]);
        a.add_polygon(&[[0.0, 0.0, 0.0], [4.0, 0.0, 0.0], [4.0, 0.0, 4.0], [0.0, 0.0, 4.0]])
            .unwrap();
        let tile = MeshTile::from_bytes(a.build().unwrap()).unwrap();
        let verts = tile.poly_verts(&tile.polys[0]);
        assert!(math::poly_area_2d(&verts) > 0.0);
    }

    #[test]
    fn test_rejects_bad_polygons() {
        let mut b = TileBuilder::new(0, 0, [0.0; 3], [4.0, 0.0, 4.0]);
        assert!(b.add_polygon(&[[0.0; 3], [1.0, 0.0, 0.0]]).is_err());
        assert!(b.add_polygon(&[[0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]).is_err());
        assert_eq!(b.build().unwrap_err(), DetourError::InvalidParam);
    }

    #[test]
    fn test_bv_tree_escape_offsets() {
        let data = grid_tile(&params(), 0, 0, 2).unwrap();
        let tile = MeshTile::from_bytes(data).unwrap();
        // Root spans the whole tree
        assert_eq!(tile.bv_tree[0].i, -(tile.bv_tree.len() as i32));
        let leaves = tile.bv_tree.iter().filter(|n| n.i >= 0).count();
        assert_eq!(leaves, 4);
    }

    #[test]
    fn test_off_mesh_connections_follow_ground_polygons() {
        let mut b = TileBuilder::for_params(&params(), 0, 0);
        b.add_polygon(&[[0.0, 0.0, 0.0], [0.0, 0.0, 4.0], [4.0, 0.0, 4.0], [4.0, 0.0, 0.0]])
            .unwrap();
        assert_eq!(b.add_off_mesh_connection(&[1.0, 0.0, 1.0], &[3.0, 0.0, 3.0], 0.5, true).unwrap(), 0);
        assert_eq!(b.add_off_mesh_connection(&[2.0, 0.0, 2.0], &[-1.0, 0.0, 9.0], 0.5, false).unwrap(), 1);
        // Start outside the tile
        assert_eq!(
            b.add_off_mesh_connection(&[9.0, 0.0, 2.0], &[1.0, 0.0, 1.0], 0.5, false)
                .unwrap_err(),
            DetourError::InvalidParam
        );

        let tile = MeshTile::from_bytes(b.build().unwrap()).unwrap();
        assert_eq!(tile.polys.len(), 3);
        assert_eq!(tile.verts.len(), 8);
        assert_eq!(tile.header.off_mesh_base, 1);
        assert_eq!(tile.detail_meshes.len(), 1);
        assert_eq!(tile.bv_tree.len(), 1);

        let sides: Vec<u8> = tile.off_mesh_cons.iter().map(|c| c.side).collect();
        assert_eq!(sides, vec![DT_LINK_INTERNAL, 3]);
        assert!(tile.off_mesh_cons[0].is_bidirectional());
        assert!(!tile.off_mesh_cons[1].is_bidirectional());

        let con = &tile.polys[tile.off_mesh_cons[1].poly as usize];
        assert!(!con.is_ground());
        assert_eq!(con.vert_count(), 2);
        assert_eq!(tile.verts[con.verts[0] as usize], [2.0, 0.0, 2.0]);
        assert_eq!(tile.verts[con.verts[1] as usize], [-1.0, 0.0, 9.0]);
    }
}
