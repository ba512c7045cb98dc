// NavMeshQuery - spatial queries over a NavMesh
//
// Nearest polygon lookup, A* corridor search, funnel straight paths,
// random point sampling and walkability raycasts.

use std::sync::Arc;

use tracing::debug;

use crate::math::{self, Vec3};
use crate::nav_mesh::{NavMesh, PolyRef};
use crate::node_pool::{NODE_CLOSED, NODE_OPEN, NodePool, NodeQueue};
use crate::status::{DetourError, Result};
use crate::tile::{MeshTile, Poly};
use crate::{DT_LINK_INTERNAL, DT_STRAIGHTPATH_END, DT_STRAIGHTPATH_OFFMESH_CONNECTION, DT_STRAIGHTPATH_START};

/// Heuristic scale for A*; slightly below 1 keeps the estimate admissible
const H_SCALE: f32 = 0.999;

/// Portals closer than this to the start point are skipped by the funnel
const PORTAL_SKIP_DIST: f32 = 0.001;

const MAX_AREAS: usize = 64;

/// Polygon filter and per-area traversal cost
#[derive(Debug, Clone)]
pub struct QueryFilter {
    pub include_flags: u16,
    pub exclude_flags: u16,
    area_cost: [f32; MAX_AREAS],
}

impl Default for QueryFilter {
    fn default() -> Self {
        QueryFilter {
            include_flags: 0xffff,
            exclude_flags: 0,
            area_cost: [1.0; MAX_AREAS],
        }
    }
}

impl QueryFilter {
    pub fn pass_filter(&self, poly: &Poly) -> bool {
        (poly.flags & self.include_flags) != 0 && (poly.flags & self.exclude_flags) == 0
    }

    pub fn area_cost(&self, area: u8) -> f32 {
        self.area_cost[area as usize % MAX_AREAS]
    }

    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        self.area_cost[area as usize % MAX_AREAS] = cost;
    }

    /// Cost of moving from `pa` to `pb` across `poly`
    pub fn cost(&self, pa: &Vec3, pb: &Vec3, poly: &Poly) -> f32 {
        math::vdist(pa, pb) * self.area_cost(poly.area)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightPathPoint {
    pub pos: Vec3,
    /// `DT_STRAIGHTPATH_START`, `DT_STRAIGHTPATH_END`,
    /// `DT_STRAIGHTPATH_OFFMESH_CONNECTION` or 0
    pub flags: u8,
    /// Polygon entered at this point; null for the end point
    pub poly: PolyRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RaycastHit {
    /// Hit parameter along the segment; `f32::MAX` when the end was reached
    pub t: f32,
    pub hit_normal: Vec3,
    /// Polygon edge that was hit
    pub hit_edge: Option<usize>,
    /// Polygons visited, starting with the start polygon
    pub path: Vec<PolyRef>,
}

pub struct NavMeshQuery {
    nav_mesh: Arc<NavMesh>,
    node_pool: NodePool,
    open_list: NodeQueue,
}

/// Off-mesh connection end point that links to `other`
fn off_mesh_end_point(tile: &MeshTile, ip: usize, other: PolyRef) -> Result<Vec3> {
    let link = tile.links[ip]
        .iter()
        .find(|l| l.poly == other)
        .ok_or(DetourError::InvalidParam)?;
    let poly = &tile.polys[ip];
    let v = *poly.verts.get(link.edge as usize).ok_or(DetourError::InvalidParam)?;
    Ok(tile.verts[v as usize])
}

/// Left and right end points of the portal between two linked polygons.
/// Entering or leaving an off-mesh connection goes through a single point.
fn portal_points(mesh: &NavMesh, from: PolyRef, to: PolyRef) -> Result<(Vec3, Vec3)> {
    let (tile, ip) = mesh.tile_and_poly_by_ref(from)?;
    let (to_tile, to_ip) = mesh.tile_and_poly_by_ref(to)?;

    let poly = &tile.polys[ip];
    let link = tile.links[ip]
        .iter()
        .find(|l| l.poly == to)
        .ok_or(DetourError::InvalidParam)?;

    if !poly.is_ground() {
        let p = off_mesh_end_point(tile, ip, to)?;
        return Ok((p, p));
    }
    if !to_tile.polys[to_ip].is_ground() {
        let p = off_mesh_end_point(to_tile, to_ip, from)?;
        return Ok((p, p));
    }

    let nv = poly.vert_count();
    let edge = link.edge as usize;
    let v0 = tile.verts[poly.verts[edge] as usize];
    let v1 = tile.verts[poly.verts[(edge + 1) % nv] as usize];

    // Tile border links may only cover part of the edge
    if link.side != DT_LINK_INTERNAL && (link.bmin != 0 || link.bmax != 255) {
        let s = 1.0 / 255.0;
        let left = math::vlerp(&v0, &v1, link.bmin as f32 * s);
        let right = math::vlerp(&v0, &v1, link.bmax as f32 * s);
        return Ok((left, right));
    }

    Ok((v0, v1))
}

fn edge_mid_point(mesh: &NavMesh, from: PolyRef, to: PolyRef) -> Result<Vec3> {
    let (left, right) = portal_points(mesh, from, to)?;
    Ok(math::vlerp(&left, &right, 0.5))
}

/// Straight path flags for a funnel apex entering `poly`
fn vertex_flags(mesh: &NavMesh, poly: PolyRef) -> u8 {
    if poly.is_null() {
        return DT_STRAIGHTPATH_END;
    }
    match mesh.tile_and_poly_by_ref(poly) {
        Ok((tile, ip)) if !tile.polys[ip].is_ground() => DT_STRAIGHTPATH_OFFMESH_CONNECTION,
        _ => 0,
    }
}

fn is_finite(v: &Vec3) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Append a straight path vertex, merging it into the previous one when
/// they coincide. Returns false once the path is complete or full.
fn append_vertex(
    out: &mut Vec<StraightPathPoint>,
    pos: Vec3,
    flags: u8,
    poly: PolyRef,
    max_points: usize,
) -> bool {
    if let Some(last) = out.last_mut() {
        if math::vequal(&last.pos, &pos) {
            last.flags = flags;
            last.poly = poly;
            return true;
        }
    }

    out.push(StraightPathPoint { pos, flags, poly });
    out.len() < max_points && flags != DT_STRAIGHTPATH_END
}

impl NavMeshQuery {
    /// Create a query context with room for `max_nodes` search nodes
    pub fn new(nav_mesh: Arc<NavMesh>, max_nodes: usize) -> Result<Self> {
        if max_nodes == 0 || max_nodes > u16::MAX as usize {
            return Err(DetourError::InvalidParam);
        }
        Ok(NavMeshQuery {
            nav_mesh,
            node_pool: NodePool::new(max_nodes),
            open_list: NodeQueue::new(),
        })
    }

    pub fn nav_mesh(&self) -> &NavMesh {
        &self.nav_mesh
    }

    pub fn max_nodes(&self) -> usize {
        self.node_pool.max_nodes()
    }

    /// Polygons whose bounds overlap the box `center +- half_extents`
    pub fn query_polygons(&self, center: &Vec3, half_extents: &Vec3, filter: &QueryFilter) -> Vec<PolyRef> {
        let mesh = &*self.nav_mesh;
        let bmin = math::vsub(center, half_extents);
        let bmax = math::vadd(center, half_extents);
        let (minx, miny) = mesh.calc_tile_loc(&bmin);
        let (maxx, maxy) = mesh.calc_tile_loc(&bmax);

        let mut out = Vec::new();
        for y in miny..=maxy {
            for x in minx..=maxx {
                for &index in mesh.tiles_at(x, y) {
                    self.query_polygons_in_tile(index, &bmin, &bmax, filter, &mut out);
                }
            }
        }
        out
    }

    fn query_polygons_in_tile(
        &self,
        index: usize,
        qmin: &Vec3,
        qmax: &Vec3,
        filter: &QueryFilter,
        out: &mut Vec<PolyRef>,
    ) {
        let mesh = &*self.nav_mesh;
        let Some(tile) = mesh.tile_by_index(index) else {
            return;
        };
        let base = mesh.poly_ref_base(index);
        out.extend(
            tile.query_polygons(qmin, qmax)
                .into_iter()
                .filter(|&ip| filter.pass_filter(&tile.polys[ip]))
                .map(|ip| base.with_poly(ip)),
        );
    }

    /// Nearest polygon to `center` within the search box, with the closest
    /// point on it. A point standing over a polygon within climb height is
    /// preferred over a polygon that is closer in a straight line.
    pub fn find_nearest_poly(
        &self,
        center: &Vec3,
        half_extents: &Vec3,
        filter: &QueryFilter,
    ) -> Result<Option<(PolyRef, Vec3)>> {
        if !is_finite(center) || !is_finite(half_extents) || half_extents.iter().any(|&e| e < 0.0) {
            return Err(DetourError::InvalidParam);
        }

        let mut nearest = None;
        let mut nearest_dist = f32::MAX;
        for r in self.query_polygons(center, half_extents, filter) {
            let (tile, ip) = self.nav_mesh.tile_and_poly_by_ref(r)?;
            let (closest, over_poly) = tile.closest_point_on_poly(ip, center);
            let diff = math::vsub(center, &closest);
            let d = if over_poly {
                let d = diff[1].abs() - tile.header.walkable_climb;
                if d > 0.0 { d * d } else { 0.0 }
            } else {
                math::vlen_sqr(&diff)
            };

            if d < nearest_dist {
                nearest_dist = d;
                nearest = Some((r, closest));
            }
        }
        Ok(nearest)
    }

    /// Closest point on a polygon, and whether `pos` lies over it
    pub fn closest_point_on_poly(&self, r: PolyRef, pos: &Vec3) -> Result<(Vec3, bool)> {
        let (tile, ip) = self.nav_mesh.tile_and_poly_by_ref(r)?;
        Ok(tile.closest_point_on_poly(ip, pos))
    }

    pub fn closest_point_on_poly_boundary(&self, r: PolyRef, pos: &Vec3) -> Result<Vec3> {
        let (tile, ip) = self.nav_mesh.tile_and_poly_by_ref(r)?;
        Ok(tile.closest_point_on_poly_boundary(ip, pos))
    }

    /// Surface height of a polygon at `pos`; `None` when `pos` is outside it
    pub fn get_poly_height(&self, r: PolyRef, pos: &Vec3) -> Result<Option<f32>> {
        if !is_finite(pos) {
            return Err(DetourError::InvalidParam);
        }
        let (tile, ip) = self.nav_mesh.tile_and_poly_by_ref(r)?;
        Ok(tile.poly_height(ip, pos))
    }

    /// A* search for a polygon corridor from `start_ref` to `end_ref`.
    ///
    /// When the goal cannot be reached the corridor ends at the explored
    /// polygon closest to `end_pos`. Corridors longer than `max_path` keep
    /// their start.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &Vec3,
        end_pos: &Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<Vec<PolyRef>> {
        let NavMeshQuery {
            nav_mesh,
            node_pool,
            open_list,
        } = self;
        let mesh: &NavMesh = nav_mesh;

        if !mesh.is_valid_poly_ref(start_ref)
            || !mesh.is_valid_poly_ref(end_ref)
            || !is_finite(start_pos)
            || !is_finite(end_pos)
            || max_path == 0
        {
            return Err(DetourError::InvalidParam);
        }

        if start_ref == end_ref {
            return Ok(vec![start_ref]);
        }

        node_pool.clear();
        open_list.clear();

        let start_idx = node_pool.get_node(start_ref, 0).ok_or(DetourError::OutOfMemory)?;
        {
            let start = node_pool.node_mut(start_idx);
            start.pos = *start_pos;
            start.parent = None;
            start.cost = 0.0;
            start.total = math::vdist(start_pos, end_pos) * H_SCALE;
            start.flags = NODE_OPEN;
        }
        open_list.push(node_pool, start_idx);

        let mut last_best = start_idx;
        let mut last_best_cost = node_pool.node(start_idx).total;
        let mut out_of_nodes = false;

        while let Some(best_idx) = open_list.pop(node_pool) {
            let best = {
                let node = node_pool.node_mut(best_idx);
                node.flags = (node.flags & !NODE_OPEN) | NODE_CLOSED;
                node.clone()
            };

            if best.id == end_ref {
                last_best = best_idx;
                break;
            }

            let (best_tile, best_ip) = mesh.tile_and_poly_by_ref(best.id)?;
            let best_poly = &best_tile.polys[best_ip];
            let parent_ref = best.parent.map(|p| node_pool.node(p).id);

            for link in &best_tile.links[best_ip] {
                let neighbour_ref = link.poly;
                if neighbour_ref.is_null() || Some(neighbour_ref) == parent_ref {
                    continue;
                }

                let Ok((neighbour_tile, neighbour_ip)) = mesh.tile_and_poly_by_ref(neighbour_ref) else {
                    continue;
                };
                let neighbour_poly = &neighbour_tile.polys[neighbour_ip];
                if !filter.pass_filter(neighbour_poly) {
                    continue;
                }

                // Crossing a tile border gets its own node state
                let cross_side = if link.side == DT_LINK_INTERNAL { 0 } else { link.side >> 1 };
                let Some(neighbour_idx) = node_pool.get_node(neighbour_ref, cross_side) else {
                    out_of_nodes = true;
                    continue;
                };

                if node_pool.node(neighbour_idx).flags == 0 {
                    node_pool.node_mut(neighbour_idx).pos = edge_mid_point(mesh, best.id, neighbour_ref)?;
                }
                let neighbour_pos = node_pool.node(neighbour_idx).pos;

                let (cost, heuristic) = if neighbour_ref == end_ref {
                    let cur_cost = filter.cost(&best.pos, &neighbour_pos, best_poly);
                    let end_cost = filter.cost(&neighbour_pos, end_pos, neighbour_poly);
                    (best.cost + cur_cost + end_cost, 0.0)
                } else {
                    let cur_cost = filter.cost(&best.pos, &neighbour_pos, best_poly);
                    (best.cost + cur_cost, math::vdist(&neighbour_pos, end_pos) * H_SCALE)
                };
                let total = cost + heuristic;

                let neighbour = node_pool.node(neighbour_idx);
                if neighbour.flags & (NODE_OPEN | NODE_CLOSED) != 0 && total >= neighbour.total {
                    continue;
                }

                let neighbour = node_pool.node_mut(neighbour_idx);
                neighbour.parent = Some(best_idx);
                neighbour.id = neighbour_ref;
                neighbour.flags = (neighbour.flags & !NODE_CLOSED) | NODE_OPEN;
                neighbour.cost = cost;
                neighbour.total = total;
                open_list.push(node_pool, neighbour_idx);

                if heuristic < last_best_cost {
                    last_best_cost = heuristic;
                    last_best = neighbour_idx;
                }
            }
        }

        let mut path = Vec::new();
        let mut cur = Some(last_best);
        while let Some(idx) = cur {
            if path.len() > node_pool.len() {
                break;
            }
            let node = node_pool.node(idx);
            path.push(node.id);
            cur = node.parent;
        }
        path.reverse();
        path.truncate(max_path);

        if node_pool.node(last_best).id != end_ref {
            debug!(
                "find_path: partial corridor {} -> {} ({} polys, out of nodes: {})",
                start_ref,
                end_ref,
                path.len(),
                out_of_nodes
            );
        }

        Ok(path)
    }

    /// Funnel a polygon corridor into straight-line waypoints.
    ///
    /// Start and end points are clamped onto the first and last corridor
    /// polygons. At most `max_points` waypoints are produced.
    pub fn find_straight_path(
        &self,
        start_pos: &Vec3,
        end_pos: &Vec3,
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<Vec<StraightPathPoint>> {
        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return Err(DetourError::InvalidParam);
        };
        if max_points == 0 || !is_finite(start_pos) || !is_finite(end_pos) {
            return Err(DetourError::InvalidParam);
        }
        let mesh = &*self.nav_mesh;

        let closest_start = self.closest_point_on_poly_boundary(first, start_pos)?;
        let closest_end = self.closest_point_on_poly_boundary(last, end_pos)?;

        let mut out = Vec::new();
        if !append_vertex(&mut out, closest_start, DT_STRAIGHTPATH_START, first, max_points) {
            return Ok(out);
        }

        if path.len() > 1 {
            let mut apex = closest_start;
            let mut left = apex;
            let mut right = apex;
            let mut apex_index = 0;
            let mut left_index = 0;
            let mut right_index = 0;
            let mut left_ref = first;
            let mut right_ref = first;

            let mut i = 0;
            while i < path.len() {
                let next_ref = path.get(i + 1).copied().unwrap_or(PolyRef::NULL);

                let (portal_left, portal_right) = if i + 1 < path.len() {
                    match portal_points(mesh, path[i], path[i + 1]) {
                        Ok(portal) => portal,
                        Err(_) => {
                            // The corridor is broken here; end the path at the
                            // closest point of the last reachable polygon
                            let clamped = self.closest_point_on_poly_boundary(path[i], end_pos)?;
                            append_vertex(&mut out, clamped, 0, path[i], max_points);
                            return Ok(out);
                        }
                    }
                } else {
                    (closest_end, closest_end)
                };

                if i == 0 && i + 1 < path.len() {
                    let (d, _) = math::distance_pt_seg_sqr_2d(&apex, &portal_left, &portal_right);
                    if d < PORTAL_SKIP_DIST * PORTAL_SKIP_DIST {
                        i += 1;
                        continue;
                    }
                }

                // Right side of the funnel
                if math::tri_area_2d(&apex, &right, &portal_right) <= 0.0 {
                    if math::vequal(&apex, &right) || math::tri_area_2d(&apex, &left, &portal_right) > 0.0 {
                        right = portal_right;
                        right_ref = next_ref;
                        right_index = i;
                    } else {
                        apex = left;
                        apex_index = left_index;
                        let flags = vertex_flags(mesh, left_ref);
                        if !append_vertex(&mut out, apex, flags, left_ref, max_points) {
                            return Ok(out);
                        }
                        left = apex;
                        right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left side of the funnel
                if math::tri_area_2d(&apex, &left, &portal_left) >= 0.0 {
                    if math::vequal(&apex, &left) || math::tri_area_2d(&apex, &right, &portal_left) < 0.0 {
                        left = portal_left;
                        left_ref = next_ref;
                        left_index = i;
                    } else {
                        apex = right;
                        apex_index = right_index;
                        let flags = vertex_flags(mesh, right_ref);
                        if !append_vertex(&mut out, apex, flags, right_ref, max_points) {
                            return Ok(out);
                        }
                        left = apex;
                        right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }
        }

        append_vertex(&mut out, closest_end, DT_STRAIGHTPATH_END, PolyRef::NULL, max_points);
        Ok(out)
    }

    /// Uniformly random point on the mesh: a tile picked uniformly, then a
    /// polygon weighted by area, then a point inside it
    pub fn find_random_point(
        &self,
        filter: &QueryFilter,
        frand: &mut dyn FnMut() -> f32,
    ) -> Result<Option<(PolyRef, Vec3)>> {
        let mesh = &*self.nav_mesh;

        let mut chosen_tile = None;
        let mut tile_sum = 0.0f32;
        for (index, _) in mesh.tiles() {
            tile_sum += 1.0;
            if frand() * tile_sum <= 1.0 {
                chosen_tile = Some(index);
            }
        }
        let Some(index) = chosen_tile else {
            return Ok(None);
        };
        let Some(tile) = mesh.tile_by_index(index) else {
            return Ok(None);
        };

        let mut chosen = None;
        let mut area_sum = 0.0f32;
        for (ip, poly) in tile.polys.iter().enumerate() {
            if !poly.is_ground() || !filter.pass_filter(poly) {
                continue;
            }
            let area = math::poly_area_2d(&tile.poly_verts(poly));
            area_sum += area;
            if frand() * area_sum <= area {
                chosen = Some(ip);
            }
        }
        let Some(ip) = chosen else {
            return Ok(None);
        };

        let verts = tile.poly_verts(&tile.polys[ip]);
        let s = frand();
        let t = frand();
        let pt = math::random_point_in_convex_poly(&verts, s, t);
        let (pt, _) = tile.closest_point_on_poly(ip, &pt);

        Ok(Some((mesh.poly_ref_base(index).with_poly(ip), pt)))
    }

    /// Random point on a polygon reachable from `start_ref` whose portals
    /// come within `max_radius` of `center`.
    ///
    /// Polygons are chosen by area over the flooded region, so the point
    /// itself may lie outside the circle.
    pub fn find_random_point_around_circle(
        &mut self,
        start_ref: PolyRef,
        center: &Vec3,
        max_radius: f32,
        filter: &QueryFilter,
        frand: &mut dyn FnMut() -> f32,
    ) -> Result<Option<(PolyRef, Vec3)>> {
        let NavMeshQuery {
            nav_mesh,
            node_pool,
            open_list,
        } = self;
        let mesh: &NavMesh = nav_mesh;

        if !is_finite(center) || !max_radius.is_finite() || max_radius < 0.0 {
            return Err(DetourError::InvalidParam);
        }
        let (start_tile, start_ip) = mesh.tile_and_poly_by_ref(start_ref)?;
        if !filter.pass_filter(&start_tile.polys[start_ip]) {
            return Err(DetourError::InvalidParam);
        }

        node_pool.clear();
        open_list.clear();

        let start_idx = node_pool.get_node(start_ref, 0).ok_or(DetourError::OutOfMemory)?;
        {
            let start = node_pool.node_mut(start_idx);
            start.pos = *center;
            start.parent = None;
            start.cost = 0.0;
            start.total = 0.0;
            start.flags = NODE_OPEN;
        }
        open_list.push(node_pool, start_idx);

        let radius_sqr = max_radius * max_radius;
        let mut area_sum = 0.0f32;
        let mut chosen: Option<PolyRef> = None;

        while let Some(best_idx) = open_list.pop(node_pool) {
            let best = {
                let node = node_pool.node_mut(best_idx);
                node.flags = (node.flags & !NODE_OPEN) | NODE_CLOSED;
                node.clone()
            };

            let (tile, ip) = mesh.tile_and_poly_by_ref(best.id)?;
            let poly = &tile.polys[ip];
            if poly.is_ground() {
                let area = math::poly_area_2d(&tile.poly_verts(poly));
                area_sum += area;
                if frand() * area_sum <= area {
                    chosen = Some(best.id);
                }
            }

            let parent_ref = best.parent.map(|p| node_pool.node(p).id);
            for link in &tile.links[ip] {
                let neighbour_ref = link.poly;
                if neighbour_ref.is_null() || Some(neighbour_ref) == parent_ref {
                    continue;
                }
                let Ok((neighbour_tile, neighbour_ip)) = mesh.tile_and_poly_by_ref(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(&neighbour_tile.polys[neighbour_ip]) {
                    continue;
                }

                let Ok((va, vb)) = portal_points(mesh, best.id, neighbour_ref) else {
                    continue;
                };
                // Skip polygons the circle does not touch
                let (dist_sqr, _) = math::distance_pt_seg_sqr_2d(center, &va, &vb);
                if dist_sqr > radius_sqr {
                    continue;
                }

                let Some(neighbour_idx) = node_pool.get_node(neighbour_ref, 0) else {
                    continue;
                };
                if node_pool.node(neighbour_idx).flags & NODE_CLOSED != 0 {
                    continue;
                }
                if node_pool.node(neighbour_idx).flags == 0 {
                    node_pool.node_mut(neighbour_idx).pos = math::vlerp(&va, &vb, 0.5);
                }

                let neighbour = node_pool.node(neighbour_idx);
                let total = best.total + math::vdist(&best.pos, &neighbour.pos);
                if neighbour.flags & NODE_OPEN != 0 && total >= neighbour.total {
                    continue;
                }

                let neighbour = node_pool.node_mut(neighbour_idx);
                neighbour.id = neighbour_ref;
                neighbour.flags = (neighbour.flags & !NODE_CLOSED) | NODE_OPEN;
                neighbour.parent = Some(best_idx);
                neighbour.total = total;
                open_list.push(node_pool, neighbour_idx);
            }
        }

        let Some(poly_ref) = chosen else {
            return Ok(None);
        };
        let (tile, ip) = mesh.tile_and_poly_by_ref(poly_ref)?;
        let verts = tile.poly_verts(&tile.polys[ip]);
        let s = frand();
        let t = frand();
        let mut pt = math::random_point_in_convex_poly(&verts, s, t);
        pt[1] = match tile.poly_height(ip, &pt) {
            Some(h) => h,
            None => tile.closest_point_on_poly(ip, &pt).0[1],
        };

        Ok(Some((poly_ref, pt)))
    }

    /// Cast a walkability ray along the mesh surface from `start_pos`
    /// (inside `start_ref`) toward `end_pos`.
    ///
    /// `t` is the hit parameter along the segment, or `f32::MAX` when the
    /// ray reaches `end_pos` unobstructed.
    pub fn raycast(
        &self,
        start_ref: PolyRef,
        start_pos: &Vec3,
        end_pos: &Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<RaycastHit> {
        let mesh = &*self.nav_mesh;
        if !mesh.is_valid_poly_ref(start_ref) || !is_finite(start_pos) || !is_finite(end_pos) {
            return Err(DetourError::InvalidParam);
        }

        let mut hit = RaycastHit {
            t: 0.0,
            hit_normal: [0.0; 3],
            hit_edge: None,
            path: Vec::new(),
        };

        // A straight ray crosses each convex polygon at most once
        let max_steps = mesh.stats().polys;
        let mut cur_ref = start_ref;
        for _ in 0..max_steps {
            let (tile, ip) = mesh.tile_and_poly_by_ref(cur_ref)?;
            let poly = &tile.polys[ip];
            let verts = tile.poly_verts(poly);
            let nv = verts.len();

            let Some(clip) = math::intersect_segment_poly_2d(start_pos, end_pos, &verts) else {
                // Could not hit the polygon; keep the previous t
                return Ok(hit);
            };
            hit.hit_edge = clip.seg_max;
            if clip.tmax > hit.t {
                hit.t = clip.tmax;
            }
            if hit.path.len() < max_path {
                hit.path.push(cur_ref);
            }

            let Some(seg_max) = clip.seg_max else {
                // The end point is inside this polygon
                hit.t = f32::MAX;
                return Ok(hit);
            };

            let mut next_ref = None;
            for link in &tile.links[ip] {
                if link.edge as usize != seg_max {
                    continue;
                }
                let Ok((next_tile, next_ip)) = mesh.tile_and_poly_by_ref(link.poly) else {
                    continue;
                };
                let next_poly = &next_tile.polys[next_ip];
                if !next_poly.is_ground() || !filter.pass_filter(next_poly) {
                    continue;
                }

                if link.side == DT_LINK_INTERNAL || (link.bmin == 0 && link.bmax == 255) {
                    next_ref = Some(link.poly);
                    break;
                }

                // Partial tile border portal: the crossing must fall inside it
                let axis = match link.side {
                    0 | 4 => 2,
                    2 | 6 => 0,
                    _ => continue,
                };
                let v0 = &verts[seg_max];
                let v1 = &verts[(seg_max + 1) % nv];
                let s = 1.0 / 255.0;
                let mut lmin = v0[axis] + (v1[axis] - v0[axis]) * (link.bmin as f32 * s);
                let mut lmax = v0[axis] + (v1[axis] - v0[axis]) * (link.bmax as f32 * s);
                if lmin > lmax {
                    std::mem::swap(&mut lmin, &mut lmax);
                }
                let c = start_pos[axis] + (end_pos[axis] - start_pos[axis]) * clip.tmax;
                if c >= lmin && c <= lmax {
                    next_ref = Some(link.poly);
                    break;
                }
            }

            let Some(next) = next_ref else {
                // No neighbour: the ray hit a wall
                let va = &verts[seg_max];
                let vb = &verts[(seg_max + 1) % nv];
                let dx = vb[0] - va[0];
                let dz = vb[2] - va[2];
                hit.hit_normal = math::vnormalize(&[dz, 0.0, -dx]);
                return Ok(hit);
            };
            cur_ref = next;
        }

        Ok(hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{TileBuilder, grid_tile};
    use crate::nav_mesh::{NavMeshParams, TileRef};

    const EXTENTS: Vec3 = [2.0, 4.0, 2.0];

    fn params(max_tiles: i32) -> NavMeshParams {
        NavMeshParams {
            orig: [0.0, 0.0, 0.0],
            tile_width: 8.0,
            tile_height: 8.0,
            max_tiles,
            max_polys: 64,
        }
    }

    fn query_for(mesh: NavMesh) -> NavMeshQuery {
        NavMeshQuery::new(Arc::new(mesh), 1024).unwrap()
    }

    fn two_tile_grid() -> NavMeshQuery {
        let p = params(4);
        let mut mesh = NavMesh::new(p).unwrap();
        mesh.add_tile(grid_tile(&p, 0, 0, 2).unwrap(), TileRef::NULL).unwrap();
        mesh.add_tile(grid_tile(&p, 1, 0, 2).unwrap(), TileRef::NULL).unwrap();
        query_for(mesh)
    }

    /// Three squares forming an L: (0..4, 0..4), (4..8, 0..4), (4..8, 4..8)
    fn l_shape() -> NavMeshQuery {
        let p = params(1);
        let mut b = TileBuilder::for_params(&p, 0, 0);
        b.add_polygon(&[[0.0, 0.0, 0.0], [0.0, 0.0, 4.0], [4.0, 0.0, 4.0], [4.0, 0.0, 0.0]])
            .unwrap();
        b.add_polygon(&[[4.0, 0.0, 0.0], [4.0, 0.0, 4.0], [8.0, 0.0, 4.0], [8.0, 0.0, 0.0]])
            .unwrap();
        b.add_polygon(&[[4.0, 0.0, 4.0], [4.0, 0.0, 8.0], [8.0, 0.0, 8.0], [8.0, 0.0, 4.0]])
            .unwrap();
        let mut mesh = NavMesh::new(p).unwrap();
        mesh.add_tile(b.build().unwrap(), TileRef::NULL).unwrap();
        query_for(mesh)
    }

    /// Two squares joined only by an off-mesh connection from the west one
    fn bridged(bidirectional: bool) -> NavMeshQuery {
        let p = params(1);
        let mut b = TileBuilder::for_params(&p, 0, 0);
        b.add_polygon(&[[0.0, 0.0, 0.0], [0.0, 0.0, 2.0], [2.0, 0.0, 2.0], [2.0, 0.0, 0.0]])
            .unwrap();
        b.add_polygon(&[[6.0, 0.0, 0.0], [6.0, 0.0, 2.0], [8.0, 0.0, 2.0], [8.0, 0.0, 0.0]])
            .unwrap();
        b.add_off_mesh_connection(&[1.5, 0.0, 1.0], &[6.5, 0.0, 1.0], 0.5, bidirectional)
            .unwrap();
        let mut mesh = NavMesh::new(p).unwrap();
        mesh.add_tile(b.build().unwrap(), TileRef::NULL).unwrap();
        query_for(mesh)
    }

    fn nearest(q: &NavMeshQuery, p: Vec3) -> (PolyRef, Vec3) {
        q.find_nearest_poly(&p, &EXTENTS, &QueryFilter::default())
            .unwrap()
            .expect("polygon near point")
    }

    fn counter_rng(seed: u32) -> impl FnMut() -> f32 {
        let mut state = seed;
        move || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32
        }
    }

    #[test]
    fn test_new_rejects_zero_nodes() {
        let mesh = Arc::new(NavMesh::new(params(1)).unwrap());
        assert!(NavMeshQuery::new(mesh, 0).is_err());
    }

    #[test]
    fn test_find_nearest_poly() {
        let q = two_tile_grid();
        let (r, p) = nearest(&q, [9.0, 1.0, 3.0]);
        assert!(!r.is_null());
        // Snapped down onto the surface
        assert_eq!(p, [9.0, 0.0, 3.0]);

        // Slightly off the mesh edge clamps to the border
        let (_, p) = nearest(&q, [17.0, 0.0, 3.0]);
        assert!((p[0] - 16.0).abs() < 1e-4);

        let far = q
            .find_nearest_poly(&[100.0, 0.0, 100.0], &EXTENTS, &QueryFilter::default())
            .unwrap();
        assert!(far.is_none());
    }

    #[test]
    fn test_query_polygons_with_and_without_bv_tree() {
        let p = params(1);
        let mut with_tree = NavMesh::new(p).unwrap();
        with_tree.add_tile(grid_tile(&p, 0, 0, 4).unwrap(), TileRef::NULL).unwrap();

        let mut b = TileBuilder::for_params(&p, 0, 0).without_bv_tree();
        for row in 0..4 {
            for col in 0..4 {
                let (x, z) = (col as f32 * 2.0, row as f32 * 2.0);
                b.add_polygon(&[[x, 0.0, z], [x, 0.0, z + 2.0], [x + 2.0, 0.0, z + 2.0], [x + 2.0, 0.0, z]])
                    .unwrap();
            }
        }
        let mut flat = NavMesh::new(p).unwrap();
        flat.add_tile(b.build().unwrap(), TileRef::NULL).unwrap();

        let filter = QueryFilter::default();
        let center = [3.0, 0.0, 3.0];
        let ext = [0.5, 1.0, 0.5];
        let a = query_for(with_tree).query_polygons(&center, &ext, &filter);
        let b = query_for(flat).query_polygons(&center, &ext, &filter);
        assert!(!a.is_empty());
        assert!(a.len() <= 4);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_find_path_across_tiles() {
        let mut q = two_tile_grid();
        let filter = QueryFilter::default();
        let (start_ref, start) = nearest(&q, [1.0, 0.0, 1.0]);
        let (end_ref, end) = nearest(&q, [15.0, 0.0, 7.0]);

        let path = q.find_path(start_ref, end_ref, &start, &end, &filter, 256).unwrap();
        assert_eq!(path.first(), Some(&start_ref));
        assert_eq!(path.last(), Some(&end_ref));
        assert!(path.len() >= 4);

        let truncated = q.find_path(start_ref, end_ref, &start, &end, &filter, 2).unwrap();
        assert_eq!(truncated, path[..2].to_vec());
    }

    #[test]
    fn test_find_path_same_polygon() {
        let mut q = two_tile_grid();
        let (r, p) = nearest(&q, [1.0, 0.0, 1.0]);
        let path = q.find_path(r, r, &p, &p, &QueryFilter::default(), 256).unwrap();
        assert_eq!(path, vec![r]);

        let straight = q.find_straight_path(&p, &p, &path, 256).unwrap();
        assert_eq!(straight.len(), 1);
        assert_eq!(straight[0].flags, DT_STRAIGHTPATH_END);
    }

    #[test]
    fn test_straight_path_turns_the_corner() {
        let mut q = l_shape();
        let filter = QueryFilter::default();
        let (start_ref, start) = nearest(&q, [1.0, 0.0, 1.0]);
        let (end_ref, end) = nearest(&q, [5.0, 0.0, 7.0]);

        let path = q.find_path(start_ref, end_ref, &start, &end, &filter, 256).unwrap();
        assert_eq!(path.len(), 3);

        let straight = q.find_straight_path(&start, &end, &path, 256).unwrap();
        let points: Vec<Vec3> = straight.iter().map(|p| p.pos).collect();
        assert_eq!(points, vec![[1.0, 0.0, 1.0], [4.0, 0.0, 4.0], [5.0, 0.0, 7.0]]);
        assert_eq!(straight[0].flags, DT_STRAIGHTPATH_START);
        assert_eq!(straight[2].flags, DT_STRAIGHTPATH_END);

        let capped = q.find_straight_path(&start, &end, &path, 2).unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn test_straight_line_has_no_corners() {
        let mut q = two_tile_grid();
        let filter = QueryFilter::default();
        let (start_ref, start) = nearest(&q, [1.0, 0.0, 2.0]);
        let (end_ref, end) = nearest(&q, [15.0, 0.0, 2.0]);
        let path = q.find_path(start_ref, end_ref, &start, &end, &filter, 256).unwrap();
        let straight = q.find_straight_path(&start, &end, &path, 256).unwrap();
        assert_eq!(straight.len(), 2);
    }

    #[test]
    fn test_raycast_inside_and_hitting_wall() {
        let q = l_shape();
        let filter = QueryFilter::default();
        let (r, start) = nearest(&q, [1.0, 0.0, 1.0]);

        let clear = q.raycast(r, &start, &[6.0, 0.0, 2.0], &filter, 256).unwrap();
        assert_eq!(clear.t, f32::MAX);
        assert_eq!(clear.path.len(), 2);

        // Straight up through z = 4 where only a wall exists above the first square
        let blocked = q.raycast(r, &start, &[1.0, 0.0, 7.0], &filter, 256).unwrap();
        assert!((blocked.t - 0.5).abs() < 1e-4);
        assert_eq!(blocked.path, vec![r]);
        assert!((blocked.hit_normal[2].abs() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_random_point_on_mesh() {
        let q = two_tile_grid();
        let mut rng = counter_rng(3);
        for _ in 0..32 {
            let (r, p) = q
                .find_random_point(&QueryFilter::default(), &mut rng)
                .unwrap()
                .unwrap();
            assert!(q.nav_mesh().is_valid_poly_ref(r));
            assert!(p[0] >= 0.0 && p[0] <= 16.0);
            assert!(p[2] >= 0.0 && p[2] <= 8.0);
            assert!(p[1].abs() < 1e-4);
        }
    }

    #[test]
    fn test_random_point_around_circle_stays_near() {
        let mut q = two_tile_grid();
        let (r, center) = nearest(&q, [2.0, 0.0, 2.0]);
        let mut rng = counter_rng(11);
        for _ in 0..32 {
            let (pr, p) = q
                .find_random_point_around_circle(r, &center, 1.0, &QueryFilter::default(), &mut rng)
                .unwrap()
                .unwrap();
            assert!(q.nav_mesh().is_valid_poly_ref(pr));
            // Only the start cell and its direct neighbours touch the circle
            assert!(p[0] <= 8.0 && p[2] <= 8.0);
        }
    }

    #[test]
    fn test_unreachable_goal_returns_partial_corridor() {
        let p = params(1);
        let mut b = TileBuilder::for_params(&p, 0, 0);
        b.add_polygon(&[[0.0, 0.0, 0.0], [0.0, 0.0, 2.0], [2.0, 0.0, 2.0], [2.0, 0.0, 0.0]])
            .unwrap();
        b.add_polygon(&[[5.0, 0.0, 5.0], [5.0, 0.0, 7.0], [7.0, 0.0, 7.0], [7.0, 0.0, 5.0]])
            .unwrap();
        let mut mesh = NavMesh::new(p).unwrap();
        mesh.add_tile(b.build().unwrap(), TileRef::NULL).unwrap();
        let mut q = query_for(mesh);

        let (a, pa) = nearest(&q, [1.0, 0.0, 1.0]);
        let (b, pb) = nearest(&q, [6.0, 0.0, 6.0]);
        assert_ne!(a, b);
        let path = q.find_path(a, b, &pa, &pb, &QueryFilter::default(), 256).unwrap();
        assert_eq!(path, vec![a]);
    }

    #[test]
    fn test_path_crosses_off_mesh_connection() {
        let mut q = bridged(false);
        let filter = QueryFilter::default();
        let (west, start) = nearest(&q, [0.5, 0.0, 1.0]);
        let (east, end) = nearest(&q, [7.5, 0.0, 1.0]);

        let path = q.find_path(west, east, &start, &end, &filter, 256).unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.first(), Some(&west));
        assert_eq!(path.last(), Some(&east));
        let (tile, ip) = q.nav_mesh().tile_and_poly_by_ref(path[1]).unwrap();
        assert!(!tile.polys[ip].is_ground());

        let straight = q.find_straight_path(&start, &end, &path, 256).unwrap();
        let points: Vec<Vec3> = straight.iter().map(|p| p.pos).collect();
        assert_eq!(
            points,
            vec![[0.5, 0.0, 1.0], [1.5, 0.0, 1.0], [6.5, 0.0, 1.0], [7.5, 0.0, 1.0]]
        );
        assert_eq!(straight[1].flags, DT_STRAIGHTPATH_OFFMESH_CONNECTION);
        assert_eq!(straight[1].poly, path[1]);
        assert_eq!(straight[2].flags, 0);
        assert_eq!(straight[3].flags, DT_STRAIGHTPATH_END);

        // One-way: the west square cannot be reached from the east one
        let back = q.find_path(east, west, &end, &start, &filter, 256).unwrap();
        assert_eq!(back, vec![east]);
    }

    #[test]
    fn test_bidirectional_connection_works_both_ways() {
        let mut q = bridged(true);
        let filter = QueryFilter::default();
        let (west, start) = nearest(&q, [0.5, 0.0, 1.0]);
        let (east, end) = nearest(&q, [7.5, 0.0, 1.0]);
        let back = q.find_path(east, west, &end, &start, &filter, 256).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.last(), Some(&west));

        // Sampling floods across the connection too
        let mut rng = counter_rng(5);
        let mut reached_east = false;
        for _ in 0..64 {
            let (r, _) = q
                .find_random_point_around_circle(west, &start, 10.0, &filter, &mut rng)
                .unwrap()
                .unwrap();
            reached_east |= r == east;
        }
        assert!(reached_east);
    }

    #[test]
    fn test_raycast_ignores_off_mesh_connection() {
        let q = bridged(true);
        let (west, start) = nearest(&q, [0.5, 0.0, 1.0]);
        let hit = q
            .raycast(west, &start, &[7.5, 0.0, 1.0], &QueryFilter::default(), 256)
            .unwrap();
        // Leaves the west square through its wall at x = 2
        assert!((hit.t - 1.5 / 7.0).abs() < 1e-4);
        assert_eq!(hit.path, vec![west]);
    }
}
