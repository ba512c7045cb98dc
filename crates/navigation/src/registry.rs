// HandleRegistry - caller-owned table of loaded navigation handles
//
// Callers refer to handles through opaque ids. Each entry has its own lock so
// queries on different handles run concurrently while calls on one handle
// are serialized.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use navmesh_detour::MeshStats;
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::error::{LoadError, QueryError};
use crate::handle::NavigationHandle;
use crate::loader;
use crate::point::Point;
use crate::random::RandomSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Entry {
    scene: u32,
    handle: NavigationHandle,
}

pub struct HandleRegistry {
    next_id: AtomicU64,
    entries: RwLock<HashMap<HandleId, Arc<Mutex<Entry>>>>,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        HandleRegistry {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Load a mesh file for `scene` and register the handle
    pub fn load(&self, scene: u32, path: impl AsRef<Path>) -> Result<HandleId, LoadError> {
        let handle = loader::load(path)?;
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(
            "Scene {} navmesh {} registered as handle {}",
            scene,
            handle.source_path().display(),
            id
        );
        self.entries
            .write()
            .insert(id, Arc::new(Mutex::new(Entry { scene, handle })));
        Ok(id)
    }

    /// Release and forget a handle. Returns false for unknown or already
    /// released ids.
    pub fn release(&self, id: HandleId) -> bool {
        let Some(entry) = self.entries.write().remove(&id) else {
            return false;
        };
        let mut entry = entry.lock();
        let released = entry.handle.release();
        info!("Scene {} navmesh handle {} released", entry.scene, id);
        released
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.entries.read().contains_key(&id)
    }

    pub fn scene(&self, id: HandleId) -> Option<u32> {
        let entry = self.entries.read().get(&id).cloned()?;
        let scene = entry.lock().scene;
        Some(scene)
    }

    fn with_handle<T>(
        &self,
        id: HandleId,
        f: impl FnOnce(&mut NavigationHandle) -> Result<T, QueryError>,
    ) -> Result<T, QueryError> {
        // Clone the entry out so the table lock is not held during the query
        let entry = self
            .entries
            .read()
            .get(&id)
            .cloned()
            .ok_or(QueryError::UnknownHandle)?;
        let mut entry = entry.lock();
        f(&mut entry.handle)
    }

    pub fn find_straight_path(&self, id: HandleId, start: Point, end: Point) -> Result<Vec<Point>, QueryError> {
        self.with_handle(id, |h| h.find_straight_path(start, end))
    }

    pub fn find_random_point_around_circle(
        &self,
        id: HandleId,
        center: Point,
        max_points: usize,
        max_radius: f32,
        rng: &mut dyn RandomSource,
    ) -> Result<Vec<Point>, QueryError> {
        self.with_handle(id, |h| h.find_random_point_around_circle(center, max_points, max_radius, rng))
    }

    pub fn raycast(&self, id: HandleId, start: Point, end: Point) -> Result<Option<Point>, QueryError> {
        self.with_handle(id, |h| h.raycast(start, end))
    }

    pub fn stats(&self, id: HandleId) -> Result<MeshStats, QueryError> {
        self.with_handle(id, |h| h.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{assign_tile_refs, write_mesh_set};
    use navmesh_detour::NavMeshParams;
    use navmesh_detour::builder::grid_tile;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::path::PathBuf;

    fn write_floor(dir: &Path) -> PathBuf {
        let p = NavMeshParams {
            orig: [0.0, 0.0, 0.0],
            tile_width: 16.0,
            tile_height: 16.0,
            max_tiles: 4,
            max_polys: 64,
        };
        let tiles = assign_tile_refs(&p, vec![grid_tile(&p, 0, 0, 4).unwrap()]).unwrap();
        let path = dir.join("floor.navmesh");
        std::fs::write(&path, write_mesh_set(&p, &tiles)).unwrap();
        path
    }

    #[test]
    fn test_load_query_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_floor(dir.path());
        let registry = HandleRegistry::new();

        let a = registry.load(1, &path).unwrap();
        let b = registry.load(2, &path).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.scene(b), Some(2));
        assert_eq!(registry.stats(a).unwrap().polys, 16);

        let path_points = registry
            .find_straight_path(a, Point::new(1.0, 0.0, 1.0), Point::new(15.0, 0.0, 15.0))
            .unwrap();
        assert!(path_points.len() >= 2);
        assert_eq!(path_points[0], Point::new(1.0, 0.0, 1.0));
        assert_eq!(*path_points.last().unwrap(), Point::new(15.0, 0.0, 15.0));

        let mut rng = StdRng::seed_from_u64(5);
        let points = registry
            .find_random_point_around_circle(b, Point::new(8.0, 0.0, 8.0), 4, 3.0, &mut rng)
            .unwrap();
        assert!(points.len() <= 4);

        assert!(registry.release(a));
        assert!(!registry.release(a));
        assert!(!registry.contains(a));
        assert_eq!(
            registry.raycast(a, Point::ZERO, Point::ONE),
            Err(QueryError::UnknownHandle)
        );
        assert!(registry.raycast(b, Point::new(1.0, 0.0, 1.0), Point::new(2.0, 0.0, 2.0)).unwrap().is_none());
    }

    #[test]
    fn test_failed_load_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandleRegistry::new();
        assert!(registry.load(1, dir.path().join("missing.navmesh")).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handles_are_shared_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_floor(dir.path());
        let registry = Arc::new(HandleRegistry::new());
        let ids: Vec<HandleId> = (0..4).map(|scene| registry.load(scene, &path).unwrap()).collect();

        let workers: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        let points = registry
                            .find_straight_path(id, Point::new(1.0, 0.0, 1.0), Point::new(14.0, 0.0, 3.0))
                            .unwrap();
                        assert!(!points.is_empty());
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(registry.len(), 4);
    }
}
