// NavigationHandle - a loaded mesh with its query context
//
// Owns the mesh and the query context exclusively. Release is explicit and
// idempotent, and also happens when the handle is dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use navmesh_detour::{MeshStats, NavMesh, NavMeshQuery, PolyRef, QueryFilter};
use tracing::debug;

use crate::error::QueryError;
use crate::point::Point;
use crate::random::RandomSource;

/// Half extents of the box searched for the nearest polygon
pub const SEARCH_EXTENTS: [f32; 3] = [2.0, 4.0, 2.0];

/// Longest polygon corridor and straight path returned by a query
pub const MAX_POLYS: usize = 256;

/// Search node capacity of the query context
pub const NODE_POOL_SIZE: usize = 1024;

/// Radius at or below which sampling covers the whole mesh
pub const MIN_SAMPLE_RADIUS: f32 = 0.0001;

/// Sampling rounds tried while no point has been collected
pub const MAX_SAMPLE_ATTEMPTS: usize = 3;

pub struct NavigationHandle {
    source_path: PathBuf,
    mesh: Option<Arc<NavMesh>>,
    query: Option<NavMeshQuery>,
}

impl std::fmt::Debug for NavigationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationHandle")
            .field("source_path", &self.source_path)
            .field("released", &self.is_released())
            .finish()
    }
}

impl NavigationHandle {
    pub(crate) fn new(source_path: PathBuf, mesh: Arc<NavMesh>, query: NavMeshQuery) -> Self {
        NavigationHandle {
            source_path,
            mesh: Some(mesh),
            query: Some(query),
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn is_released(&self) -> bool {
        self.mesh.is_none() || self.query.is_none()
    }

    /// Drop the mesh and query context. Returns false if already released.
    pub fn release(&mut self) -> bool {
        if self.mesh.is_none() && self.query.is_none() {
            return false;
        }
        // The query holds a reference to the mesh, so it goes first
        self.query = None;
        self.mesh = None;
        debug!("Released navmesh {}", self.source_path.display());
        true
    }

    pub fn stats(&self) -> Result<MeshStats, QueryError> {
        let mesh = self.mesh.as_ref().ok_or(QueryError::Released)?;
        Ok(mesh.stats())
    }

    fn query_mut(&mut self) -> Result<&mut NavMeshQuery, QueryError> {
        if self.mesh.is_none() {
            return Err(QueryError::Released);
        }
        self.query.as_mut().ok_or(QueryError::Released)
    }

    /// Waypoints of the shortest walkable path from `start` to `end`.
    ///
    /// An empty vector means no corridor could be built. When `end` is not
    /// reachable the path ends at the closest reachable point.
    pub fn find_straight_path(&mut self, start: Point, end: Point) -> Result<Vec<Point>, QueryError> {
        let filter = QueryFilter::default();
        let query = self.query_mut()?;

        let (start_ref, start_pos) = nearest_poly(query, start, &filter)?;
        let (end_ref, end_pos) = nearest_poly(query, end, &filter)?;

        let corridor = query.find_path(start_ref, end_ref, &start_pos, &end_pos, &filter, MAX_POLYS)?;
        let Some(&last) = corridor.last() else {
            return Ok(Vec::new());
        };

        let mut target = end_pos;
        if last != end_ref {
            target = query.closest_point_on_poly(last, &end_pos)?.0;
            debug!(
                "find_straight_path: {} unreachable from {}, stopping at {}",
                end,
                start,
                Point::from(target)
            );
        }

        let straight = query.find_straight_path(&start_pos, &target, &corridor, MAX_POLYS)?;
        Ok(straight.into_iter().map(|p| Point::from(p.pos)).collect())
    }

    /// Up to `max_points` random points reachable from `center` and within
    /// `max_radius` of it. A radius of (almost) zero samples the whole mesh.
    pub fn find_random_point_around_circle(
        &mut self,
        center: Point,
        max_points: usize,
        max_radius: f32,
        rng: &mut dyn RandomSource,
    ) -> Result<Vec<Point>, QueryError> {
        let filter = QueryFilter::default();
        let query = self.query_mut()?;
        let mut frand = || rng.frand();
        let mut points = Vec::with_capacity(max_points.min(MAX_POLYS));

        if max_radius <= MIN_SAMPLE_RADIUS {
            for _ in 0..max_points {
                match query.find_random_point(&filter, &mut frand) {
                    Ok(Some((_, pt))) => points.push(Point::from(pt)),
                    Ok(None) => {}
                    Err(e) => debug!("find_random_point failed: {}", e),
                }
            }
            return Ok(points);
        }

        let (start_ref, _) = nearest_poly(query, center, &filter)?;
        let center_pos: [f32; 3] = center.into();

        // Another round only happens when every sample of the previous one
        // fell outside the radius
        let mut sampled = false;
        let mut attempts = 0;
        while attempts < MAX_SAMPLE_ATTEMPTS && points.is_empty() {
            attempts += 1;
            for _ in 0..max_points - points.len() {
                let pt = match query.find_random_point_around_circle(
                    start_ref,
                    &center_pos,
                    max_radius,
                    &filter,
                    &mut frand,
                ) {
                    Ok(Some((_, pt))) => Point::from(pt),
                    Ok(None) => continue,
                    Err(e) => {
                        debug!("find_random_point_around_circle failed: {}", e);
                        continue;
                    }
                };
                sampled = true;
                if pt.distance(&center) <= max_radius {
                    points.push(pt);
                }
            }
            if !sampled {
                break;
            }
        }

        Ok(points)
    }

    /// First point where the walkable surface between `start` and `end` is
    /// interrupted, or `None` if `end` is visible from `start`
    pub fn raycast(&mut self, start: Point, end: Point) -> Result<Option<Point>, QueryError> {
        let filter = QueryFilter::default();
        let query = self.query_mut()?;

        let (start_ref, _) = nearest_poly(query, start, &filter)?;
        let (spos, epos): ([f32; 3], [f32; 3]) = (start.into(), end.into());
        let hit = query.raycast(start_ref, &spos, &epos, &filter, MAX_POLYS)?;
        if hit.t > 1.0 {
            return Ok(None);
        }

        let mut point = start.lerp(&end, hit.t);
        if let Some(&last) = hit.path.last() {
            let pos: [f32; 3] = point.into();
            // On the polygon border the height lookup may miss
            let height = match query.get_poly_height(last, &pos)? {
                Some(h) => h,
                None => query.closest_point_on_poly(last, &pos)?.0[1],
            };
            point = point.with_y(height);
        }

        Ok(Some(point))
    }
}

impl Drop for NavigationHandle {
    fn drop(&mut self) {
        self.release();
    }
}

fn nearest_poly(query: &NavMeshQuery, pos: Point, filter: &QueryFilter) -> Result<(PolyRef, [f32; 3]), QueryError> {
    let center: [f32; 3] = pos.into();
    match query.find_nearest_poly(&center, &SEARCH_EXTENTS, filter)? {
        Some(found) => Ok(found),
        None => {
            debug!("No navmesh polygon near {}", pos);
            Err(QueryError::NoNearbyPolygon)
        }
    }
}
