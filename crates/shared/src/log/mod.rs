// Logging module
// Console and rolling-file output on top of the tracing crate

use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Map a numeric verbosity (0=Off, 1=Error, 2=Detail, 3=Debug, 4=Trace)
/// to a tracing filter directive. Higher levels never show less.
pub fn map_log_level(level: i32) -> &'static str {
    match level {
        i32::MIN..=0 => "off",
        1 => "error",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `log_level`. When `log_dir` is given a
/// daily rolling file named `file_name` is written there in addition to the
/// console output.
pub fn initialize_logging(log_dir: Option<&str>, file_name: &str, log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console = fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false);

    if let Some(dir) = log_dir {
        let path = Path::new(dir);
        if !path.exists() {
            let _ = std::fs::create_dir_all(path);
        }

        let file_appender = rolling::daily(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // The writer flushes for the whole process lifetime
        std::mem::forget(guard);

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true),
            )
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_log_level() {
        assert_eq!(map_log_level(-3), "off");
        assert_eq!(map_log_level(0), "off");
        assert_eq!(map_log_level(1), "error");
        assert_eq!(map_log_level(2), "info");
        assert_eq!(map_log_level(3), "debug");
        assert_eq!(map_log_level(9), "trace");
    }

    #[test]
    fn test_log_levels_are_monotonic() {
        use tracing_subscriber::filter::LevelFilter;
        let filters: Vec<LevelFilter> = (0..=4)
            .map(|level| map_log_level(level).parse::<LevelFilter>().unwrap())
            .collect();
        for pair in filters.windows(2) {
            assert!(pair[0] < pair[1], "{:?} should be quieter than {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_initialize_twice_is_harmless() {
        initialize_logging(None, "test.log", "info");
        initialize_logging(None, "test.log", "debug");
        tracing::info!("logging initialized");
    }
}
