// Configuration module
// INI-style `key = value` files with environment variable overrides

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

/// Global configuration singleton
static CONFIG: once_cell::sync::Lazy<Mutex<Config>> =
    once_cell::sync::Lazy::new(|| Mutex::new(Config::new()));

/// Get a reference to the global config instance
pub fn get_config() -> &'static Mutex<Config> {
    &CONFIG
}

/// Configuration store.
///
/// Values come from a flat INI-style file; an environment variable named
/// `<prefix><key>` (with `.` replaced by `_`) overrides the file value.
#[derive(Debug, Default)]
pub struct Config {
    values: HashMap<String, String>,
    filename: String,
    env_prefix: String,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file.
    /// Returns false when the file could not be read; env overrides still apply.
    pub fn set_source(&mut self, filename: &str, env_prefix: &str) -> bool {
        self.filename = filename.to_string();
        self.env_prefix = env_prefix.to_string();
        self.reload()
    }

    /// Reload the configuration file
    pub fn reload(&mut self) -> bool {
        self.values.clear();

        match std::fs::read_to_string(Path::new(&self.filename)) {
            Ok(content) => {
                self.load_str(&content);
                tracing::debug!("Loaded {} config values from {}", self.values.len(), self.filename);
                true
            }
            Err(_) => false,
        }
    }

    /// Merge `key = value` lines from an in-memory document
    pub fn load_str(&mut self, content: &str) {
        for line in content.lines() {
            if let Some((key, value)) = parse_line(line) {
                self.values.insert(key, value);
            }
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.get_env_or_config(key).is_some()
    }

    pub fn get_string_default(&self, key: &str, default: &str) -> String {
        self.get_env_or_config(key)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_bool_default(&self, key: &str, default: bool) -> bool {
        match self.get_env_or_config(key) {
            Some(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes"),
            None => default,
        }
    }

    pub fn get_int_default(&self, key: &str, default: i32) -> i32 {
        self.get_parsed(key).unwrap_or(default)
    }

    pub fn get_u64_default(&self, key: &str, default: u64) -> u64 {
        self.get_parsed(key).unwrap_or(default)
    }

    pub fn get_float_default(&self, key: &str, default: f32) -> f32 {
        self.get_parsed(key).unwrap_or(default)
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get_env_or_config(key)?.trim().parse().ok()
    }

    /// Try environment variable first, then config file
    fn get_env_or_config(&self, key: &str) -> Option<String> {
        if !self.env_prefix.is_empty() {
            let env_key = format!("{}{}", self.env_prefix, key.replace('.', "_"));
            if let Ok(val) = std::env::var(&env_key) {
                return Some(val);
            }
        }

        self.values.get(key).cloned()
    }
}

/// Split one config line into key and value.
/// Blank lines, `#`/`;` comments and `[Section]` headers yield nothing.
fn parse_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(['#', ';', '[']) {
        return None;
    }

    let (key, value) = trimmed.split_once('=')?;
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);

    Some((key.trim().to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.get_int_default("nonexistent", 42), 42);
        assert_eq!(config.get_string_default("nonexistent", "hello"), "hello");
        assert!(config.get_bool_default("nonexistent", true));
        assert!(!config.is_set("nonexistent"));
    }

    #[test]
    fn test_load_str() {
        let mut config = Config::new();
        config.load_str(
            "[navtool]\n# comment\n; another\nLogLevel = 3\nLogsDir = \"logs\"\nRandomSeed=1234\nBogus line\n",
        );
        assert_eq!(config.get_int_default("LogLevel", 0), 3);
        assert_eq!(config.get_string_default("LogsDir", ""), "logs");
        assert_eq!(config.get_u64_default("RandomSeed", 0), 1234);
        assert!(!config.is_set("Bogus line"));
    }

    #[test]
    fn test_unparsable_value_falls_back() {
        let mut config = Config::new();
        config.load_str("MaxPoints = many");
        assert_eq!(config.get_int_default("MaxPoints", 8), 8);
        assert_eq!(config.get_float_default("MaxPoints", 0.5), 0.5);
    }

    #[test]
    fn test_missing_file() {
        let mut config = Config::new();
        assert!(!config.set_source("/nonexistent/navtool.conf", "NavtoolTest_"));
        assert_eq!(config.filename(), "/nonexistent/navtool.conf");
    }
}
