// navtool subcommands

use std::path::Path;

use anyhow::Context;
use navigation::format::{assign_tile_refs, write_mesh_set};
use navigation::{NavigationHandle, load};
use navmesh_detour::NavMeshParams;
use navmesh_detour::builder::grid_tile;
use navmesh_shared::config::get_config;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::{GridArgs, InfoArgs, RandomArgs, SegmentArgs};

/// Mesh totals as printed by `info --json`
#[derive(Debug, Serialize)]
struct MeshInfo {
    path: String,
    tiles: usize,
    polygons: usize,
    vertices: usize,
    detail_triangles: usize,
    detail_vertices: usize,
    bv_nodes: usize,
    off_mesh_connections: usize,
    data_size: usize,
}

fn open(mesh: &str) -> anyhow::Result<NavigationHandle> {
    load(mesh).with_context(|| format!("Failed to load navmesh {}", mesh))
}

fn mesh_info(mesh: &str, handle: &NavigationHandle) -> anyhow::Result<MeshInfo> {
    let stats = handle.stats()?;
    Ok(MeshInfo {
        path: mesh.to_string(),
        tiles: stats.tiles,
        polygons: stats.polys,
        vertices: stats.verts,
        detail_triangles: stats.detail_tris,
        detail_vertices: stats.detail_verts,
        bv_nodes: stats.bv_nodes,
        off_mesh_connections: stats.off_mesh_cons,
        data_size: stats.data_size,
    })
}

pub fn run_info(args: &InfoArgs) -> anyhow::Result<()> {
    let handle = open(&args.mesh)?;
    let info = mesh_info(&args.mesh, &handle)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    tracing::info!("Mesh: {}", info.path);
    tracing::info!("Tiles: {}", info.tiles);
    tracing::info!("BV tree nodes: {}", info.bv_nodes);
    tracing::info!("Polygons: {} ({} vertices)", info.polygons, info.vertices);
    tracing::info!(
        "Detail triangles: {} ({} vertices)",
        info.detail_triangles,
        info.detail_vertices
    );
    tracing::info!("Off-mesh connections: {}", info.off_mesh_connections);
    tracing::info!("Data size: {:.2} MB", info.data_size as f64 / 1_048_576.0);
    Ok(())
}

pub fn run_path(args: &SegmentArgs) -> anyhow::Result<()> {
    let mut handle = open(&args.mesh)?;
    let points = handle.find_straight_path(args.start, args.end)?;

    if points.is_empty() {
        tracing::info!("No path from {} to {}", args.start, args.end);
        return Ok(());
    }
    tracing::info!("Path from {} to {}: {} points", args.start, args.end, points.len());
    for (i, p) in points.iter().enumerate() {
        tracing::info!("  {:3}: {}", i, p);
    }
    Ok(())
}

fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| get_config().lock().get_u64_default("RandomSeed", 0))
}

fn resolve_count(count: Option<usize>) -> usize {
    count.unwrap_or_else(|| get_config().lock().get_int_default("MaxPoints", 10).max(0) as usize)
}

pub fn run_random(args: &RandomArgs) -> anyhow::Result<()> {
    let mut handle = open(&args.mesh)?;
    let count = resolve_count(args.count);
    let seed = resolve_seed(args.seed);
    let mut rng = if seed == 0 {
        StdRng::from_entropy()
    } else {
        StdRng::seed_from_u64(seed)
    };

    let points = handle.find_random_point_around_circle(args.center, count, args.radius, &mut rng)?;
    tracing::info!(
        "{} of {} random points around {} (radius {})",
        points.len(),
        count,
        args.center,
        args.radius
    );
    for p in &points {
        tracing::info!("  {} (distance {:.3})", p, p.distance(&args.center));
    }
    Ok(())
}

pub fn run_raycast(args: &SegmentArgs) -> anyhow::Result<()> {
    let mut handle = open(&args.mesh)?;
    match handle.raycast(args.start, args.end)? {
        Some(hit) => tracing::info!("Ray from {} to {} hits at {}", args.start, args.end, hit),
        None => tracing::info!("Ray from {} to {} is clear", args.start, args.end),
    }
    Ok(())
}

/// Mesh set bytes for a flat grid of `tiles_x` x `tiles_z` tiles
fn build_grid(args: &GridArgs) -> anyhow::Result<Vec<u8>> {
    if args.tiles_x <= 0 || args.tiles_z <= 0 || args.cells == 0 || !(args.tile_size > 0.0) {
        anyhow::bail!("Grid dimensions must be positive");
    }
    let params = NavMeshParams {
        orig: [0.0, 0.0, 0.0],
        tile_width: args.tile_size,
        tile_height: args.tile_size,
        max_tiles: args.tiles_x * args.tiles_z,
        max_polys: (args.cells * args.cells) as i32,
    };

    let mut tiles = Vec::with_capacity(params.max_tiles as usize);
    for tz in 0..args.tiles_z {
        for tx in 0..args.tiles_x {
            let data = grid_tile(&params, tx, tz, args.cells)
                .with_context(|| format!("Failed to build tile {},{}", tx, tz))?;
            tiles.push(data);
        }
    }

    let tiles = assign_tile_refs(&params, tiles)?;
    Ok(write_mesh_set(&params, &tiles))
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

pub fn run_grid(args: &GridArgs) -> anyhow::Result<()> {
    let data = build_grid(args)?;
    let out = Path::new(&args.out);
    ensure_parent_dir(out)?;
    std::fs::write(out, &data).with_context(|| format!("Failed to write {}", args.out))?;

    tracing::info!(
        "Grid: {}x{} tiles of {} units, {} cells per edge, {} bytes written to {}",
        args.tiles_x,
        args.tiles_z,
        args.tile_size,
        args.cells,
        data.len(),
        args.out
    );
    Ok(())
}
