// Tile payload - decoding and encoding of a single navmesh tile
//
// Layout (little-endian, every section 4-byte aligned):
//   header | verts | polys | links | detail meshes | detail verts | detail tris | bv nodes | off-mesh cons

use std::ops::Deref;

use navmesh_shared::util::ByteBuffer;

use crate::math::{self, Vec3};
use crate::nav_mesh::PolyRef;
use crate::status::{DetourError, Result};
use crate::{DT_EXT_LINK, DT_NAVMESH_MAGIC, DT_NAVMESH_VERSION, DT_OFFMESH_CON_BIDIR, DT_VERTS_PER_POLYGON};

pub const MESH_HEADER_SIZE: usize = 100;
pub const VERT_SIZE: usize = 12;
pub const POLY_SIZE: usize = 32;
pub const LINK_SIZE: usize = 12;
pub const POLY_DETAIL_SIZE: usize = 12;
pub const DETAIL_TRI_SIZE: usize = 4;
pub const BV_NODE_SIZE: usize = 16;
pub const OFF_MESH_CON_SIZE: usize = 36;

/// Tile header as stored at the start of every payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshHeader {
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub user_id: u32,
    pub poly_count: usize,
    pub vert_count: usize,
    pub max_link_count: usize,
    pub detail_mesh_count: usize,
    pub detail_vert_count: usize,
    pub detail_tri_count: usize,
    pub bv_node_count: usize,
    pub off_mesh_con_count: usize,
    pub off_mesh_base: usize,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub bv_quant_factor: f32,
}

fn read_count(buf: &mut ByteBuffer) -> Result<usize> {
    usize::try_from(buf.read_i32()?).map_err(|_| DetourError::DataCorrupted)
}

fn count_i32(v: usize) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

impl MeshHeader {
    pub fn read(buf: &mut ByteBuffer) -> Result<Self> {
        let magic = buf.read_i32()?;
        if magic != DT_NAVMESH_MAGIC {
            return Err(DetourError::WrongMagic);
        }
        let version = buf.read_i32()?;
        if version != DT_NAVMESH_VERSION {
            return Err(DetourError::WrongVersion);
        }

        Ok(MeshHeader {
            x: buf.read_i32()?,
            y: buf.read_i32()?,
            layer: buf.read_i32()?,
            user_id: buf.read_u32()?,
            poly_count: read_count(buf)?,
            vert_count: read_count(buf)?,
            max_link_count: read_count(buf)?,
            detail_mesh_count: read_count(buf)?,
            detail_vert_count: read_count(buf)?,
            detail_tri_count: read_count(buf)?,
            bv_node_count: read_count(buf)?,
            off_mesh_con_count: read_count(buf)?,
            off_mesh_base: read_count(buf)?,
            walkable_height: buf.read_f32()?,
            walkable_radius: buf.read_f32()?,
            walkable_climb: buf.read_f32()?,
            bmin: buf.read_vec3()?,
            bmax: buf.read_vec3()?,
            bv_quant_factor: buf.read_f32()?,
        })
    }

    pub fn write(&self, buf: &mut ByteBuffer) {
        buf.write_i32(DT_NAVMESH_MAGIC);
        buf.write_i32(DT_NAVMESH_VERSION);
        buf.write_i32(self.x);
        buf.write_i32(self.y);
        buf.write_i32(self.layer);
        buf.write_u32(self.user_id);
        for count in [
            self.poly_count,
            self.vert_count,
            self.max_link_count,
            self.detail_mesh_count,
            self.detail_vert_count,
            self.detail_tri_count,
            self.bv_node_count,
            self.off_mesh_con_count,
            self.off_mesh_base,
        ] {
            buf.write_i32(count_i32(count));
        }
        buf.write_f32(self.walkable_height);
        buf.write_f32(self.walkable_radius);
        buf.write_f32(self.walkable_climb);
        buf.write_vec3(&self.bmin);
        buf.write_vec3(&self.bmax);
        buf.write_f32(self.bv_quant_factor);
    }

    /// Total payload size implied by the section counts, `None` on overflow
    pub fn payload_size(&self) -> Option<usize> {
        let sections = [
            (self.vert_count, VERT_SIZE),
            (self.poly_count, POLY_SIZE),
            (self.max_link_count, LINK_SIZE),
            (self.detail_mesh_count, POLY_DETAIL_SIZE),
            (self.detail_vert_count, VERT_SIZE),
            (self.detail_tri_count, DETAIL_TRI_SIZE),
            (self.bv_node_count, BV_NODE_SIZE),
            (self.off_mesh_con_count, OFF_MESH_CON_SIZE),
        ];
        sections
            .iter()
            .try_fold(MESH_HEADER_SIZE, |acc, (count, size)| {
                acc.checked_add(count.checked_mul(*size)?)
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolyType {
    Ground,
    OffMeshConnection,
}

/// A navigation polygon. Neighbour values: 0 is a wall, `idx + 1` an internal
/// neighbour, `DT_EXT_LINK | side` a portal to the adjacent tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Poly {
    pub verts: [u16; DT_VERTS_PER_POLYGON],
    pub neis: [u16; DT_VERTS_PER_POLYGON],
    pub flags: u16,
    pub vert_count: u8,
    pub area: u8,
    pub poly_type: PolyType,
}

impl Poly {
    fn read(buf: &mut ByteBuffer) -> Result<Self> {
        // firstLink is rebuilt at load time
        buf.read_u32()?;
        let mut verts = [0u16; DT_VERTS_PER_POLYGON];
        for v in verts.iter_mut() {
            *v = buf.read_u16()?;
        }
        let mut neis = [0u16; DT_VERTS_PER_POLYGON];
        for n in neis.iter_mut() {
            *n = buf.read_u16()?;
        }
        let flags = buf.read_u16()?;
        let vert_count = buf.read_u8()?;
        let area_and_type = buf.read_u8()?;
        let poly_type = if area_and_type >> 6 == 1 {
            PolyType::OffMeshConnection
        } else {
            PolyType::Ground
        };

        Ok(Poly {
            verts,
            neis,
            flags,
            vert_count,
            area: area_and_type & 0x3f,
            poly_type,
        })
    }

    pub fn write(&self, buf: &mut ByteBuffer) {
        buf.write_u32(u32::MAX);
        for v in self.verts {
            buf.write_u16(v);
        }
        for n in self.neis {
            buf.write_u16(n);
        }
        buf.write_u16(self.flags);
        buf.write_u8(self.vert_count);
        let kind = match self.poly_type {
            PolyType::Ground => 0,
            PolyType::OffMeshConnection => 1,
        };
        buf.write_u8((self.area & 0x3f) | (kind << 6));
    }

    pub fn vert_count(&self) -> usize {
        self.vert_count as usize
    }

    pub fn is_ground(&self) -> bool {
        self.poly_type == PolyType::Ground
    }
}

/// Connection from a polygon edge to a neighbouring polygon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub poly: PolyRef,
    /// Edge index; on an off-mesh connection polygon the end vertex used,
    /// and `OFF_MESH_EDGE` on a ground polygon linking into a connection
    pub edge: u8,
    /// `DT_LINK_INTERNAL` or the tile border direction
    pub side: u8,
    /// Portal limits along the edge, in 1/255 units
    pub bmin: u8,
    pub bmax: u8,
}

/// Edge value of a ground polygon link that enters an off-mesh connection
pub const OFF_MESH_EDGE: u8 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PolyDetail {
    pub vert_base: u32,
    pub tri_base: u32,
    pub vert_count: u8,
    pub tri_count: u8,
}

impl PolyDetail {
    fn read(buf: &mut ByteBuffer) -> Result<Self> {
        let detail = PolyDetail {
            vert_base: buf.read_u32()?,
            tri_base: buf.read_u32()?,
            vert_count: buf.read_u8()?,
            tri_count: buf.read_u8()?,
        };
        buf.read_skip(2)?;
        Ok(detail)
    }

    pub fn write(&self, buf: &mut ByteBuffer) {
        buf.write_u32(self.vert_base);
        buf.write_u32(self.tri_base);
        buf.write_u8(self.vert_count);
        buf.write_u8(self.tri_count);
        buf.write_zeros(2);
    }
}

/// Bounding volume node; leaves carry a polygon index, inner nodes a
/// negative escape offset
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BvNode {
    pub bmin: [u16; 3],
    pub bmax: [u16; 3],
    pub i: i32,
}

impl BvNode {
    fn read(buf: &mut ByteBuffer) -> Result<Self> {
        let mut node = BvNode::default();
        for v in node.bmin.iter_mut() {
            *v = buf.read_u16()?;
        }
        for v in node.bmax.iter_mut() {
            *v = buf.read_u16()?;
        }
        node.i = buf.read_i32()?;
        Ok(node)
    }

    pub fn write(&self, buf: &mut ByteBuffer) {
        for v in self.bmin.iter().chain(self.bmax.iter()) {
            buf.write_u16(*v);
        }
        buf.write_i32(self.i);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffMeshConnection {
    pub pos: [Vec3; 2],
    pub rad: f32,
    pub poly: u16,
    pub flags: u8,
    pub side: u8,
    pub user_id: u32,
}

impl OffMeshConnection {
    fn read(buf: &mut ByteBuffer) -> Result<Self> {
        Ok(OffMeshConnection {
            pos: [buf.read_vec3()?, buf.read_vec3()?],
            rad: buf.read_f32()?,
            poly: buf.read_u16()?,
            flags: buf.read_u8()?,
            side: buf.read_u8()?,
            user_id: buf.read_u32()?,
        })
    }

    pub fn write(&self, buf: &mut ByteBuffer) {
        buf.write_vec3(&self.pos[0]);
        buf.write_vec3(&self.pos[1]);
        buf.write_f32(self.rad);
        buf.write_u16(self.poly);
        buf.write_u8(self.flags);
        buf.write_u8(self.side);
        buf.write_u32(self.user_id);
    }

    pub fn is_bidirectional(&self) -> bool {
        self.flags & DT_OFFMESH_CON_BIDIR != 0
    }
}

/// Vertex positions of one polygon
#[derive(Debug, Clone, Copy)]
pub struct PolyVerts {
    pts: [Vec3; DT_VERTS_PER_POLYGON],
    len: usize,
}

impl Deref for PolyVerts {
    type Target = [Vec3];

    fn deref(&self) -> &[Vec3] {
        &self.pts[..self.len]
    }
}

/// A decoded tile. Links are rebuilt by the mesh when the tile is added.
#[derive(Debug, Clone)]
pub struct MeshTile {
    pub header: MeshHeader,
    pub verts: Vec<Vec3>,
    pub polys: Vec<Poly>,
    pub links: Vec<Vec<Link>>,
    pub detail_meshes: Vec<PolyDetail>,
    pub detail_verts: Vec<Vec3>,
    pub detail_tris: Vec<[u8; 4]>,
    pub bv_tree: Vec<BvNode>,
    pub off_mesh_cons: Vec<OffMeshConnection>,
    pub data_size: usize,
}

fn read_n<T>(
    buf: &mut ByteBuffer,
    count: usize,
    mut read: impl FnMut(&mut ByteBuffer) -> Result<T>,
) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(read(buf)?);
    }
    Ok(out)
}

impl MeshTile {
    /// Decode and validate a tile payload, taking ownership of the bytes
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let data_size = data.len();
        if data_size < MESH_HEADER_SIZE {
            return Err(DetourError::DataCorrupted);
        }

        let mut buf = ByteBuffer::from(data);
        let header = MeshHeader::read(&mut buf)?;
        match header.payload_size() {
            Some(size) if size <= data_size => {}
            _ => return Err(DetourError::DataCorrupted),
        }

        let verts = read_n(&mut buf, header.vert_count, |b| Ok(b.read_vec3()?))?;
        let polys = read_n(&mut buf, header.poly_count, Poly::read)?;
        buf.read_skip(header.max_link_count * LINK_SIZE)?;
        let detail_meshes = read_n(&mut buf, header.detail_mesh_count, PolyDetail::read)?;
        let detail_verts = read_n(&mut buf, header.detail_vert_count, |b| Ok(b.read_vec3()?))?;
        let detail_tris = read_n(&mut buf, header.detail_tri_count, |b| {
            Ok([b.read_u8()?, b.read_u8()?, b.read_u8()?, b.read_u8()?])
        })?;
        let bv_tree = read_n(&mut buf, header.bv_node_count, BvNode::read)?;
        let off_mesh_cons = read_n(&mut buf, header.off_mesh_con_count, OffMeshConnection::read)?;

        let tile = MeshTile {
            links: vec![Vec::new(); polys.len()],
            header,
            verts,
            polys,
            detail_meshes,
            detail_verts,
            detail_tris,
            bv_tree,
            off_mesh_cons,
            data_size,
        };
        tile.validate()?;
        Ok(tile)
    }

    /// Reject indices that would point outside the decoded arrays and
    /// bounds that are inverted or not finite
    fn validate(&self) -> Result<()> {
        let corrupt = Err(DetourError::DataCorrupted);
        let poly_count = self.polys.len();

        let (bmin, bmax) = (&self.header.bmin, &self.header.bmax);
        for k in 0..3 {
            if !bmin[k].is_finite() || !bmax[k].is_finite() || bmin[k] > bmax[k] {
                return corrupt;
            }
        }

        for poly in &self.polys {
            let nv = poly.vert_count();
            let min_verts = if poly.is_ground() { 3 } else { 2 };
            if nv < min_verts || nv > DT_VERTS_PER_POLYGON {
                return corrupt;
            }
            if poly.verts[..nv].iter().any(|&v| v as usize >= self.verts.len()) {
                return corrupt;
            }
            for &nei in &poly.neis[..nv] {
                if nei != 0 && nei & DT_EXT_LINK == 0 && nei as usize > poly_count {
                    return corrupt;
                }
            }
        }

        for (ip, detail) in self.detail_meshes.iter().enumerate() {
            let Some(poly) = self.polys.get(ip) else {
                return corrupt;
            };
            let tri_end = detail.tri_base as usize + detail.tri_count as usize;
            let vert_end = detail.vert_base as usize + detail.vert_count as usize;
            if tri_end > self.detail_tris.len() || vert_end > self.detail_verts.len() {
                return corrupt;
            }
            for tri in &self.detail_tris[detail.tri_base as usize..tri_end] {
                for &k in &tri[..3] {
                    if k >= poly.vert_count && k - poly.vert_count >= detail.vert_count {
                        return corrupt;
                    }
                }
            }
        }

        let node_count = self.bv_tree.len() as i64;
        for (n, node) in self.bv_tree.iter().enumerate() {
            let valid = if node.i >= 0 {
                (node.i as usize) < poly_count
            } else {
                n as i64 - node.i as i64 <= node_count
            };
            if !valid {
                return corrupt;
            }
        }

        let off_mesh_poly = |con: &OffMeshConnection| {
            self.polys
                .get(con.poly as usize)
                .is_some_and(|p| !p.is_ground() && p.vert_count() == 2)
        };
        if !self.off_mesh_cons.iter().all(off_mesh_poly) {
            return corrupt;
        }

        Ok(())
    }

    /// Indices of ground polygons whose bounds overlap `qmin..qmax`
    pub fn query_polygons(&self, qmin: &Vec3, qmax: &Vec3) -> Vec<usize> {
        let mut out = Vec::new();
        if !math::overlap_bounds(qmin, qmax, &self.header.bmin, &self.header.bmax) {
            return out;
        }

        if self.bv_tree.is_empty() {
            for (ip, poly) in self.polys.iter().enumerate() {
                if !poly.is_ground() {
                    continue;
                }
                let verts = self.poly_verts(poly);
                let (lo, hi) = verts
                    .iter()
                    .fold((verts[0], verts[0]), |(lo, hi), v| (math::vmin(&lo, v), math::vmax(&hi, v)));
                if math::overlap_bounds(qmin, qmax, &lo, &hi) {
                    out.push(ip);
                }
            }
            return out;
        }

        // Quantize the query box into the tile's BV space
        let tbmin = &self.header.bmin;
        let tbmax = &self.header.bmax;
        let qfac = self.header.bv_quant_factor;
        let mut bmin = [0u16; 3];
        let mut bmax = [0u16; 3];
        for k in 0..3 {
            let lo = qmin[k].max(tbmin[k]).min(tbmax[k]) - tbmin[k];
            let hi = qmax[k].max(tbmin[k]).min(tbmax[k]) - tbmin[k];
            bmin[k] = ((qfac * lo) as u16) & 0xfffe;
            bmax[k] = ((qfac * hi + 1.0) as u16) | 1;
        }

        let mut n = 0;
        while n < self.bv_tree.len() {
            let node = &self.bv_tree[n];
            let overlap = math::overlap_quant_bounds(&bmin, &bmax, &node.bmin, &node.bmax);
            let is_leaf = node.i >= 0;

            if is_leaf && overlap && self.polys[node.i as usize].is_ground() {
                out.push(node.i as usize);
            }

            if overlap || is_leaf {
                n += 1;
            } else {
                n += node.i.unsigned_abs() as usize;
            }
        }
        out
    }

    /// Nearest ground polygon to `center` inside the box `center +- half_extents`,
    /// with the closest point on it. Standing over a polygon within climb
    /// height beats a polygon that is closer in a straight line.
    pub fn find_nearest_poly(&self, center: &Vec3, half_extents: &Vec3) -> Option<(usize, Vec3)> {
        let qmin = math::vsub(center, half_extents);
        let qmax = math::vadd(center, half_extents);

        let mut nearest = None;
        let mut nearest_dist = f32::MAX;
        for ip in self.query_polygons(&qmin, &qmax) {
            let (closest, over_poly) = self.closest_point_on_poly(ip, center);
            let diff = math::vsub(center, &closest);
            let d = if over_poly {
                let d = diff[1].abs() - self.header.walkable_climb;
                if d > 0.0 { d * d } else { 0.0 }
            } else {
                math::vlen_sqr(&diff)
            };
            if d < nearest_dist {
                nearest_dist = d;
                nearest = Some((ip, closest));
            }
        }
        nearest
    }

    pub fn poly_verts(&self, poly: &Poly) -> PolyVerts {
        let mut pts = [[0.0f32; 3]; DT_VERTS_PER_POLYGON];
        let len = poly.vert_count();
        for (dst, &v) in pts.iter_mut().zip(&poly.verts[..len]) {
            *dst = self.verts[v as usize];
        }
        PolyVerts { pts, len }
    }

    /// Triangles of a polygon's detail mesh, falling back to a fan over the
    /// polygon itself when the tile carries no detail data
    pub fn detail_triangles(&self, ip: usize) -> Vec<[Vec3; 3]> {
        let poly = &self.polys[ip];
        let Some(detail) = self.detail_meshes.get(ip) else {
            let pv = self.poly_verts(poly);
            return (2..pv.len()).map(|j| [pv[0], pv[j - 1], pv[j]]).collect();
        };

        let start = detail.tri_base as usize;
        let end = start + detail.tri_count as usize;
        self.detail_tris[start..end]
            .iter()
            .map(|tri| {
                let vert = |k: u8| {
                    if k < poly.vert_count {
                        self.verts[poly.verts[k as usize] as usize]
                    } else {
                        self.detail_verts
                            [detail.vert_base as usize + (k - poly.vert_count) as usize]
                    }
                };
                [vert(tri[0]), vert(tri[1]), vert(tri[2])]
            })
            .collect()
    }

    /// Surface height of polygon `ip` below/above `pos`, if `pos` lies
    /// inside the polygon on xz
    pub fn poly_height(&self, ip: usize, pos: &Vec3) -> Option<f32> {
        let poly = &self.polys[ip];
        if !poly.is_ground() {
            return None;
        }
        let verts = self.poly_verts(poly);
        if !math::point_in_polygon(pos, &verts) {
            return None;
        }

        let tris = self.detail_triangles(ip);
        if let Some(h) = tris
            .iter()
            .find_map(|[a, b, c]| math::closest_height_point_triangle(pos, a, b, c))
        {
            return Some(h);
        }

        // Inside the polygon but on a detail edge: take the closest edge point
        Some(self.closest_point_on_detail_edges(&tris, pos)[1])
    }

    fn closest_point_on_detail_edges(&self, tris: &[[Vec3; 3]], pos: &Vec3) -> Vec3 {
        let mut dmin = f32::MAX;
        let mut closest = *pos;
        for tri in tris {
            for k in 0..3 {
                let (a, b) = (&tri[k], &tri[(k + 1) % 3]);
                let (d, t) = math::distance_pt_seg_sqr_2d(pos, a, b);
                if d < dmin {
                    dmin = d;
                    closest = math::vlerp(a, b, t);
                }
            }
        }
        closest
    }

    /// Closest point on polygon `ip` to `pos`, and whether `pos` was over it
    pub fn closest_point_on_poly(&self, ip: usize, pos: &Vec3) -> (Vec3, bool) {
        let poly = &self.polys[ip];

        if let Some(h) = self.poly_height(ip, pos) {
            return ([pos[0], h, pos[2]], true);
        }

        let verts = self.poly_verts(poly);
        if !poly.is_ground() {
            let d0 = math::vdist(pos, &verts[0]);
            let d1 = math::vdist(pos, &verts[1]);
            let u = if d0 + d1 > 0.0 { d0 / (d0 + d1) } else { 0.0 };
            return (math::vlerp(&verts[0], &verts[1], u), false);
        }

        let tris = self.detail_triangles(ip);
        (self.closest_point_on_detail_edges(&tris, pos), false)
    }

    /// Clamp `pos` onto the polygon outline on xz; inside points are returned as is
    pub fn closest_point_on_poly_boundary(&self, ip: usize, pos: &Vec3) -> Vec3 {
        let verts = self.poly_verts(&self.polys[ip]);
        let mut edge_dist = [0.0f32; DT_VERTS_PER_POLYGON];
        let mut edge_t = [0.0f32; DT_VERTS_PER_POLYGON];
        let nv = verts.len();

        if math::distance_pt_poly_edges_sqr(pos, &verts, &mut edge_dist[..nv], &mut edge_t[..nv]) {
            return *pos;
        }

        let mut imin = 0;
        for i in 1..nv {
            if edge_dist[i] < edge_dist[imin] {
                imin = i;
            }
        }
        math::vlerp(&verts[imin], &verts[(imin + 1) % nv], edge_t[imin])
    }
}
