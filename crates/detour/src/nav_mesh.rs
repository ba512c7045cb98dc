// NavMesh - tiled polygon mesh
//
// Tiles live in a fixed table of `max_tiles` slots. Polygon references pack
// salt | tile index | polygon index into 32 bits so stale references to a
// reused slot can be detected.

use std::collections::HashMap;

use tracing::debug;

use crate::math::{self, Vec3};
use crate::status::{DetourError, Result};
use crate::tile::{Link, MeshTile, OFF_MESH_EDGE};
use crate::{DT_EXT_LINK, DT_LINK_INTERNAL};

/// Reference to a polygon; 0 is the null reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PolyRef(u32);

/// Tile references use the same encoding with a zero polygon index
pub type TileRef = PolyRef;

impl PolyRef {
    pub const NULL: PolyRef = PolyRef(0);

    pub const fn new(id: u32) -> Self {
        PolyRef(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Reference of polygon `ip` inside the tile whose base reference is `self`
    pub const fn with_poly(self, ip: usize) -> Self {
        PolyRef(self.0 | ip as u32)
    }
}

impl std::fmt::Display for PolyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Parameters that define the tile grid of a mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavMeshParams {
    /// World-space origin of the tile grid
    pub orig: Vec3,
    pub tile_width: f32,
    pub tile_height: f32,
    pub max_tiles: i32,
    pub max_polys: i32,
}

/// Totals across all loaded tiles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshStats {
    pub tiles: usize,
    pub polys: usize,
    pub verts: usize,
    pub detail_tris: usize,
    pub detail_verts: usize,
    pub bv_nodes: usize,
    pub off_mesh_cons: usize,
    pub data_size: usize,
}

#[derive(Debug)]
struct TileSlot {
    salt: u32,
    tile: Option<Box<MeshTile>>,
}

#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    slots: Vec<TileSlot>,
    /// Free slot indices, lowest index last
    free_list: Vec<usize>,
    tile_lut: HashMap<(i32, i32), Vec<usize>>,
    salt_bits: u32,
    tile_bits: u32,
    poly_bits: u32,
}

impl NavMesh {
    pub fn new(params: NavMeshParams) -> Result<Self> {
        let finite = params.orig.iter().all(|v| v.is_finite());
        if !finite
            || !(params.tile_width > 0.0)
            || !(params.tile_height > 0.0)
            || params.max_tiles <= 0
            || params.max_polys <= 0
        {
            return Err(DetourError::InvalidParam);
        }

        let tile_bits = math::ilog2(math::next_pow2(params.max_tiles as u32));
        let poly_bits = math::ilog2(math::next_pow2(params.max_polys as u32));
        let used = tile_bits + poly_bits;
        if used > 22 {
            return Err(DetourError::InvalidParam);
        }
        // At least 10 salt bits are needed to detect reused slots
        let salt_bits = (32 - used).min(31);

        let max_tiles = params.max_tiles as usize;
        let slots = (0..max_tiles).map(|_| TileSlot { salt: 1, tile: None }).collect();

        Ok(NavMesh {
            params,
            slots,
            free_list: (0..max_tiles).rev().collect(),
            tile_lut: HashMap::new(),
            salt_bits,
            tile_bits,
            poly_bits,
        })
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn max_tiles(&self) -> usize {
        self.slots.len()
    }

    pub fn encode_poly_id(&self, salt: u32, it: u32, ip: u32) -> PolyRef {
        PolyRef(
            (salt << (self.poly_bits + self.tile_bits)) | (it << self.poly_bits) | ip,
        )
    }

    /// Split a reference into (salt, tile index, polygon index)
    pub fn decode_poly_id(&self, r: PolyRef) -> (u32, u32, u32) {
        let salt_mask = (1u32 << self.salt_bits) - 1;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        let poly_mask = (1u32 << self.poly_bits) - 1;
        (
            (r.0 >> (self.poly_bits + self.tile_bits)) & salt_mask,
            (r.0 >> self.poly_bits) & tile_mask,
            r.0 & poly_mask,
        )
    }

    pub fn poly_ref_base(&self, index: usize) -> PolyRef {
        let salt = self.slots.get(index).map_or(0, |s| s.salt);
        self.encode_poly_id(salt, index as u32, 0)
    }

    pub fn tile_ref(&self, index: usize) -> TileRef {
        self.poly_ref_base(index)
    }

    pub fn tile_by_index(&self, index: usize) -> Option<&MeshTile> {
        self.slots.get(index)?.tile.as_deref()
    }

    /// Occupied tiles with their slot index
    pub fn tiles(&self) -> impl Iterator<Item = (usize, &MeshTile)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.tile.as_deref().map(|t| (i, t)))
    }

    /// Tile grid cell containing `pos`
    pub fn calc_tile_loc(&self, pos: &Vec3) -> (i32, i32) {
        let tx = ((pos[0] - self.params.orig[0]) / self.params.tile_width).floor() as i32;
        let ty = ((pos[2] - self.params.orig[2]) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    /// Slot indices of every layer at grid cell (x, y)
    pub fn tiles_at(&self, x: i32, y: i32) -> &[usize] {
        self.tile_lut.get(&(x, y)).map_or(&[], Vec::as_slice)
    }

    pub fn tile_at(&self, x: i32, y: i32, layer: i32) -> Option<usize> {
        self.tiles_at(x, y).iter().copied().find(|&i| {
            self.tile_by_index(i)
                .is_some_and(|t| t.header.layer == layer)
        })
    }

    fn neighbour_tiles_at(&self, x: i32, y: i32, side: u8) -> Vec<usize> {
        let (nx, ny) = match side {
            0 => (x + 1, y),
            1 => (x + 1, y + 1),
            2 => (x, y + 1),
            3 => (x - 1, y + 1),
            4 => (x - 1, y),
            5 => (x - 1, y - 1),
            6 => (x, y - 1),
            _ => (x + 1, y - 1),
        };
        self.tiles_at(nx, ny).to_vec()
    }

    /// Resolve a polygon reference to its tile and polygon index
    pub fn tile_and_poly_by_ref(&self, r: PolyRef) -> Result<(&MeshTile, usize)> {
        if r.is_null() {
            return Err(DetourError::InvalidRef);
        }
        let (salt, it, ip) = self.decode_poly_id(r);
        let slot = self.slots.get(it as usize).ok_or(DetourError::InvalidRef)?;
        if slot.salt != salt {
            return Err(DetourError::InvalidRef);
        }
        let tile = slot.tile.as_deref().ok_or(DetourError::InvalidRef)?;
        if ip as usize >= tile.polys.len() {
            return Err(DetourError::InvalidRef);
        }
        Ok((tile, ip as usize))
    }

    pub fn is_valid_poly_ref(&self, r: PolyRef) -> bool {
        self.tile_and_poly_by_ref(r).is_ok()
    }

    /// Add a tile payload to the mesh.
    ///
    /// With a non-null `last_ref` the tile is placed in the slot and with the
    /// salt encoded in that reference, so references saved alongside the
    /// mesh stay valid. The payload bytes are consumed.
    pub fn add_tile(&mut self, data: Vec<u8>, last_ref: TileRef) -> Result<TileRef> {
        let tile = MeshTile::from_bytes(data)?;
        let (x, y, layer) = (tile.header.x, tile.header.y, tile.header.layer);

        if self.tile_at(x, y, layer).is_some() {
            return Err(DetourError::AlreadyOccupied);
        }
        if tile.polys.len() > 1usize << self.poly_bits {
            return Err(DetourError::InvalidParam);
        }

        let index = if last_ref.is_null() {
            self.free_list.pop().ok_or(DetourError::OutOfMemory)?
        } else {
            let (salt, it, _) = self.decode_poly_id(last_ref);
            let it = it as usize;
            let pos = self
                .free_list
                .iter()
                .position(|&i| i == it)
                .ok_or(DetourError::OutOfMemory)?;
            self.free_list.remove(pos);
            self.slots[it].salt = salt;
            it
        };

        self.slots[index].tile = Some(Box::new(tile));
        self.tile_lut.entry((x, y)).or_default().push(index);

        self.connect_int_links(index);
        self.base_off_mesh_links(index);
        self.connect_ext_off_mesh_links(index, index, None);

        // Other layers at the same location
        for other in self.tiles_at(x, y).to_vec() {
            if other == index {
                continue;
            }
            self.connect_ext_links(index, other, None);
            self.connect_ext_links(other, index, None);
            self.connect_ext_off_mesh_links(index, other, None);
            self.connect_ext_off_mesh_links(other, index, None);
        }

        for side in 0..8u8 {
            let opposite = math::opposite_tile(side);
            for nei in self.neighbour_tiles_at(x, y, side) {
                self.connect_ext_links(index, nei, Some(side));
                self.connect_ext_links(nei, index, Some(opposite));
                self.connect_ext_off_mesh_links(index, nei, Some(side));
                self.connect_ext_off_mesh_links(nei, index, Some(opposite));
            }
        }

        Ok(self.tile_ref(index))
    }

    fn connect_int_links(&mut self, index: usize) {
        let base = self.poly_ref_base(index);
        let Some(tile) = self.slots[index].tile.as_deref_mut() else {
            return;
        };

        for (ip, poly) in tile.polys.iter().enumerate() {
            let links = &mut tile.links[ip];
            links.clear();
            if !poly.is_ground() {
                continue;
            }
            for (j, &nei) in poly.neis[..poly.vert_count()].iter().enumerate() {
                if nei == 0 || nei & DT_EXT_LINK != 0 {
                    continue;
                }
                links.push(Link {
                    poly: base.with_poly((nei - 1) as usize),
                    edge: j as u8,
                    side: DT_LINK_INTERNAL,
                    bmin: 0,
                    bmax: 0,
                });
            }
        }
    }

    /// Snap each off-mesh connection start onto a ground polygon of the same
    /// tile and link the two both ways
    fn base_off_mesh_links(&mut self, index: usize) {
        let base = self.poly_ref_base(index);
        let Some(tile) = self.slots[index].tile.as_deref_mut() else {
            return;
        };

        for i in 0..tile.off_mesh_cons.len() {
            let con = tile.off_mesh_cons[i];
            let start = con.pos[0];
            let half_extents = [con.rad, tile.header.walkable_climb, con.rad];
            let Some((land, nearest)) = tile.find_nearest_poly(&start, &half_extents) else {
                debug!("Off-mesh connection {} start {:?} has no polygon to land on", i, start);
                continue;
            };
            if math::vdist_sqr_2d(&nearest, &start) > con.rad * con.rad {
                continue;
            }

            let cp = con.poly as usize;
            let v = tile.polys[cp].verts[0] as usize;
            tile.verts[v] = nearest;
            tile.links[cp].push(Link {
                poly: base.with_poly(land),
                edge: 0,
                side: DT_LINK_INTERNAL,
                bmin: 0,
                bmax: 0,
            });
            tile.links[land].push(Link {
                poly: base.with_poly(cp),
                edge: OFF_MESH_EDGE,
                side: DT_LINK_INTERNAL,
                bmin: 0,
                bmax: 0,
            });
        }
    }

    /// Land off-mesh connections of `target` that point at `side` on ground
    /// polygons of `index`
    fn connect_ext_off_mesh_links(&mut self, index: usize, target: usize, side: Option<u8>) {
        let (Some(tile), Some(target_tile)) = (self.tile_by_index(index), self.tile_by_index(target))
        else {
            return;
        };
        let base = self.poly_ref_base(index);
        let target_base = self.poly_ref_base(target);
        let opposite = side.map_or(DT_LINK_INTERNAL, math::opposite_tile);

        // (connection poly, snapped end, landing poly, link back)
        let mut landings = Vec::new();
        for con in &target_tile.off_mesh_cons {
            if con.side != opposite {
                continue;
            }
            let cp = con.poly as usize;
            // The start never landed, so the connection is unusable
            if target_tile.links[cp].is_empty() {
                continue;
            }
            let end = con.pos[1];
            let half_extents = [con.rad, target_tile.header.walkable_climb, con.rad];
            let Some((land, nearest)) = tile.find_nearest_poly(&end, &half_extents) else {
                continue;
            };
            if math::vdist_sqr_2d(&nearest, &end) > con.rad * con.rad {
                continue;
            }
            landings.push((cp, nearest, land, con.is_bidirectional()));
        }

        for (cp, nearest, land, bidirectional) in landings {
            if let Some(target_tile) = self.slots[target].tile.as_deref_mut() {
                let v = target_tile.polys[cp].verts[1] as usize;
                target_tile.verts[v] = nearest;
                target_tile.links[cp].push(Link {
                    poly: base.with_poly(land),
                    edge: 1,
                    side: opposite,
                    bmin: 0,
                    bmax: 0,
                });
            }
            if bidirectional {
                if let Some(tile) = self.slots[index].tile.as_deref_mut() {
                    tile.links[land].push(Link {
                        poly: target_base.with_poly(cp),
                        edge: OFF_MESH_EDGE,
                        side: side.unwrap_or(DT_LINK_INTERNAL),
                        bmin: 0,
                        bmax: 0,
                    });
                }
            }
        }
    }

    /// Link portal edges of `index` facing `side` to polygons in `target`
    fn connect_ext_links(&mut self, index: usize, target: usize, side: Option<u8>) {
        let (Some(tile), Some(target_tile)) = (self.tile_by_index(index), self.tile_by_index(target))
        else {
            return;
        };
        let target_base = self.poly_ref_base(target);

        let mut new_links = Vec::new();
        for (ip, poly) in tile.polys.iter().enumerate() {
            let nv = poly.vert_count();
            for j in 0..nv {
                let nei = poly.neis[j];
                if nei & DT_EXT_LINK == 0 {
                    continue;
                }
                let dir = (nei & 0xff) as u8;
                if side.is_some_and(|s| s != dir) {
                    continue;
                }

                let va = tile.verts[poly.verts[j] as usize];
                let vb = tile.verts[poly.verts[(j + 1) % nv] as usize];
                let connections = find_connecting_polys(
                    &va,
                    &vb,
                    target_tile,
                    target_base,
                    math::opposite_tile(dir),
                );

                for (poly_ref, [cmin, cmax]) in connections {
                    let mut link = Link {
                        poly: poly_ref,
                        edge: j as u8,
                        side: dir,
                        bmin: 0,
                        bmax: 255,
                    };
                    // Compress portal limits to a byte value
                    let axis = match dir {
                        0 | 4 => Some(2),
                        2 | 6 => Some(0),
                        _ => None,
                    };
                    if let Some(ax) = axis {
                        let span = vb[ax] - va[ax];
                        let mut tmin = (cmin - va[ax]) / span;
                        let mut tmax = (cmax - va[ax]) / span;
                        if tmin > tmax {
                            std::mem::swap(&mut tmin, &mut tmax);
                        }
                        link.bmin = (tmin.clamp(0.0, 1.0) * 255.0).round() as u8;
                        link.bmax = (tmax.clamp(0.0, 1.0) * 255.0).round() as u8;
                    }
                    new_links.push((ip, link));
                }
            }
        }

        if let Some(tile) = self.slots[index].tile.as_deref_mut() {
            for (ip, link) in new_links {
                tile.links[ip].push(link);
            }
        }
    }

    pub fn stats(&self) -> MeshStats {
        self.tiles().fold(MeshStats::default(), |mut acc, (_, tile)| {
            acc.tiles += 1;
            acc.polys += tile.polys.len();
            acc.verts += tile.verts.len();
            acc.detail_tris += tile.detail_tris.len();
            acc.detail_verts += tile.detail_verts.len();
            acc.bv_nodes += tile.bv_tree.len();
            acc.off_mesh_cons += tile.off_mesh_cons.len();
            acc.data_size += tile.data_size;
            acc
        })
    }
}

fn slab_coord(v: &Vec3, side: u8) -> f32 {
    match side {
        0 | 4 => v[0],
        2 | 6 => v[2],
        _ => 0.0,
    }
}

/// Edge end points projected onto the border: (along-border, height) pairs,
/// ordered by the along-border coordinate
fn slab_end_points(va: &Vec3, vb: &Vec3, side: u8) -> ([f32; 2], [f32; 2]) {
    let ax = match side {
        0 | 4 => 2,
        2 | 6 => 0,
        _ => return ([0.0; 2], [0.0; 2]),
    };
    if va[ax] < vb[ax] {
        ([va[ax], va[1]], [vb[ax], vb[1]])
    } else {
        ([vb[ax], vb[1]], [va[ax], va[1]])
    }
}

fn overlap_slabs(amin: &[f32; 2], amax: &[f32; 2], bmin: &[f32; 2], bmax: &[f32; 2], px: f32, py: f32) -> bool {
    // Shrink a little so slabs touching only at end points do not connect
    let minx = (amin[0] + px).max(bmin[0] + px);
    let maxx = (amax[0] - px).min(bmax[0] - px);
    if minx > maxx {
        return false;
    }

    let ad = (amax[1] - amin[1]) / (amax[0] - amin[0]);
    let ak = amin[1] - ad * amin[0];
    let bd = (bmax[1] - bmin[1]) / (bmax[0] - bmin[0]);
    let bk = bmin[1] - bd * bmin[0];
    let aminy = ad * minx + ak;
    let amaxy = ad * maxx + ak;
    let bminy = bd * minx + bk;
    let bmaxy = bd * maxx + bk;
    let dmin = bminy - aminy;
    let dmax = bmaxy - amaxy;

    // Crossing segments always overlap
    if dmin * dmax < 0.0 {
        return true;
    }

    let thr = (py * 2.0) * (py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}

/// Polygons of `tile` with a portal edge on `side` that overlaps edge va-vb.
/// Returns at most four (reference, [min, max] overlap along the border).
fn find_connecting_polys(
    va: &Vec3,
    vb: &Vec3,
    tile: &MeshTile,
    base: PolyRef,
    side: u8,
) -> Vec<(PolyRef, [f32; 2])> {
    const MAX_CONNECTIONS: usize = 4;

    let (amin, amax) = slab_end_points(va, vb, side);
    let apos = slab_coord(va, side);
    let marker = DT_EXT_LINK | side as u16;

    let mut out = Vec::new();
    for (ip, poly) in tile.polys.iter().enumerate() {
        let nv = poly.vert_count();
        for j in 0..nv {
            if poly.neis[j] != marker {
                continue;
            }
            let vc = &tile.verts[poly.verts[j] as usize];
            let vd = &tile.verts[poly.verts[(j + 1) % nv] as usize];
            if (apos - slab_coord(vc, side)).abs() > 0.01 {
                continue;
            }

            let (bmin, bmax) = slab_end_points(vc, vd, side);
            if !overlap_slabs(&amin, &amax, &bmin, &bmax, 0.01, tile.header.walkable_climb) {
                continue;
            }

            if out.len() < MAX_CONNECTIONS {
                out.push((base.with_poly(ip), [amin[0].max(bmin[0]), amax[0].min(bmax[0])]));
            }
            break;
        }
    }
    out
}
