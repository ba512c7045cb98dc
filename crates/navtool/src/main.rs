// navtool - command line front end for navmesh files
// Inspects mesh set files, runs path/random/raycast queries against them and
// generates flat grid meshes for testing.

use clap::{Args, Parser, Subcommand};

mod commands;

use navigation::Point;
use navmesh_shared::config::get_config;
use navmesh_shared::log::{initialize_logging, map_log_level};

/// Default config file name
const DEFAULT_CONFIG: &str = "navtool.conf";

/// Environment variable prefix for config overrides
const CONFIG_ENV_PREFIX: &str = "Navtool_";

#[derive(Parser, Debug)]
#[command(name = "navtool")]
#[command(about = "Navigation mesh inspection and query tool")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Console log level override (0=Off, 1=Error, 2=Info, 3=Debug, 4=Trace)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<i32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print tile, polygon and vertex totals of a mesh file
    Info(InfoArgs),
    /// Find a straight path between two points
    Path(SegmentArgs),
    /// Sample random reachable points around a center
    Random(RandomArgs),
    /// Cast a walkability ray between two points
    Raycast(SegmentArgs),
    /// Write a flat grid mesh file
    Grid(GridArgs),
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Mesh set file
    pub mesh: String,

    /// Print the totals as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SegmentArgs {
    /// Mesh set file
    pub mesh: String,

    /// Start point (format: X,Y,Z)
    #[arg(value_parser = parse_point, allow_hyphen_values = true)]
    pub start: Point,

    /// End point (format: X,Y,Z)
    #[arg(value_parser = parse_point, allow_hyphen_values = true)]
    pub end: Point,
}

#[derive(Args, Debug)]
pub struct RandomArgs {
    /// Mesh set file
    pub mesh: String,

    /// Circle center (format: X,Y,Z)
    #[arg(value_parser = parse_point, allow_hyphen_values = true)]
    pub center: Point,

    /// Number of points to request (config: MaxPoints)
    #[arg(long)]
    pub count: Option<usize>,

    /// Search radius; 0 samples the whole mesh
    #[arg(long, default_value_t = 0.0)]
    pub radius: f32,

    /// Random seed, 0 for entropy (config: RandomSeed)
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug)]
pub struct GridArgs {
    /// Output mesh set file
    pub out: String,

    /// Tiles along X
    #[arg(long = "tiles-x", default_value_t = 2)]
    pub tiles_x: i32,

    /// Tiles along Z
    #[arg(long = "tiles-z", default_value_t = 2)]
    pub tiles_z: i32,

    /// Tile edge length in world units
    #[arg(long = "tile-size", default_value_t = 32.0)]
    pub tile_size: f32,

    /// Cells per tile edge
    #[arg(long = "cells", default_value_t = 8)]
    pub cells: usize,
}

fn parse_point(input: &str) -> Result<Point, String> {
    let coords = input
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<Vec<f32>, _>>()
        .map_err(|e| format!("Invalid coordinate in '{}': {}", input, e))?;
    match coords.as_slice() {
        &[x, y, z] => Ok(Point::new(x, y, z)),
        _ => Err(format!("Expected X,Y,Z but got '{}'", input)),
    }
}

fn init_logging(log_level: Option<i32>) {
    let (log_dir, level) = {
        let config = get_config().lock();
        let dir = config.get_string_default("LogsDir", "");
        let level = config.get_int_default("LogLevel", 2);
        (if dir.is_empty() { None } else { Some(dir) }, level)
    };
    let console_level = map_log_level(log_level.unwrap_or(level));
    initialize_logging(log_dir.as_deref(), "navtool.log", console_level);
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_found = get_config().lock().set_source(&cli.config, CONFIG_ENV_PREFIX);
    init_logging(cli.log_level);
    if !config_found {
        tracing::warn!("Could not read configuration file {}, using defaults", cli.config);
    }

    match cli.command {
        Command::Info(args) => commands::run_info(&args),
        Command::Path(args) => commands::run_path(&args),
        Command::Random(args) => commands::run_random(&args),
        Command::Raycast(args) => commands::run_raycast(&args),
        Command::Grid(args) => commands::run_grid(&args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("1,-2.5, 3").unwrap(), Point::new(1.0, -2.5, 3.0));
        assert!(parse_point("1,2").is_err());
        assert!(parse_point("1,a,3").is_err());
    }

    #[test]
    fn test_cli_parses_negative_points() {
        let cli = Cli::try_parse_from(["navtool", "raycast", "m.navmesh", "-1,0,-1", "5,0,5"]).unwrap();
        match cli.command {
            Command::Raycast(args) => {
                assert_eq!(args.start, Point::new(-1.0, 0.0, -1.0));
                assert_eq!(args.end, Point::new(5.0, 0.0, 5.0));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_grid_defaults() {
        let cli = Cli::try_parse_from(["navtool", "-l", "3", "grid", "out.navmesh"]).unwrap();
        assert_eq!(cli.log_level, Some(3));
        assert_eq!(cli.config, DEFAULT_CONFIG);
        match cli.command {
            Command::Grid(args) => {
                assert_eq!(args.tiles_x, 2);
                assert_eq!(args.cells, 8);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
