//! User configuration file support.

use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default CLI options.
    pub defaults: Defaults,
}

/// Default CLI options.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Enable verbose output by default.
    pub verbose: bool,
    /// Enable quiet output by default.
    pub quiet: bool,
    /// Log filter directive used when `RUST_LOG` is unset, e.g. `conveyor=debug`.
    pub log: Option<String>,
    /// Override every job's supervisor poll interval.
    pub poll_interval_ms: Option<u64>,
}

impl Config {
    /// Load config from a specific path. Missing or broken files yield defaults.
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Get the default config file path (~/.config/conveyor/config.toml).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("conveyor").join("config.toml"))
    }

    /// Log filter for the given flags; flags beat file defaults.
    pub fn log_filter(&self, verbose: bool, quiet: bool) -> String {
        if quiet {
            return "warn".to_string();
        }
        if verbose {
            return "debug".to_string();
        }
        if let Some(log) = &self.defaults.log {
            return log.clone();
        }
        if self.defaults.quiet {
            "warn".to_string()
        } else if self.defaults.verbose {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load_from_path(Some(PathBuf::from("/nonexistent/conveyor.toml")));
        assert!(!config.defaults.verbose);
        assert_eq!(config.defaults.poll_interval_ms, None);
    }

    #[test]
    fn test_load_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[defaults]\nverbose = true\npoll_interval_ms = 250\n",
        )
        .unwrap();

        let config = Config::load_from_path(Some(path));
        assert!(config.defaults.verbose);
        assert_eq!(config.defaults.poll_interval_ms, Some(250));
    }

    #[test]
    fn test_broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[defaults\nverbose = ").unwrap();
        let config = Config::load_from_path(Some(path));
        assert!(!config.defaults.verbose);
    }

    #[test]
    fn test_log_filter_precedence() {
        let mut config = Config::default();
        assert_eq!(config.log_filter(false, false), "info");
        config.defaults.log = Some("conveyor=trace".into());
        assert_eq!(config.log_filter(false, false), "conveyor=trace");
        assert_eq!(config.log_filter(true, false), "debug");
        assert_eq!(config.log_filter(true, true), "warn");
    }
}
