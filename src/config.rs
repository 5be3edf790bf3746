//! Configuration loading and file filtering.
//!
//! Settings come from a TOML file. Besides the filter rules this covers the
//! hash worker pool, the backup root, the recent-run window and the default
//! log level. Filtering supports several strategies:
//! - Exact filename matching
//! - Glob pattern matching (against the path relative to the target root)
//! - File extension matching
//! - Regex pattern matching (against the file name)
//! - Include (whitelist) rules that override exclude rules
//!
//! Hidden entries are always skipped by the scanner, whatever the filters say.
//!
//! # Configuration File Format
//!
//! ```toml
//! [filters.exclude]
//! filenames = ["Thumbs.db", "desktop.ini"]
//! patterns = ["*.tmp", "node_modules/**"]
//! extensions = ["bak", "tmp"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//!
//! [scan]
//! workers = 0
//!
//! [backup]
//! root = "/var/backups/tidyguard"
//!
//! [ledger]
//! recent_window_secs = 300
//!
//! [logging]
//! level = "warn"
//! ```

use crate::error::ConfigError;
use crate::ledger::DEFAULT_RECENT_WINDOW_SECS;
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".tidyguardrc.toml";

/// All tidyguard settings.
///
/// Every section is optional; missing sections and fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub filters: FilterRules,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub backup: BackupSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// `[filters]`: which files a run may see.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterRules {
    #[serde(default)]
    pub exclude: ExcludeRules,

    #[serde(default)]
    pub include: IncludeRules,
}

/// Rules for excluding files from a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact file names, matched at any depth.
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Globs over the path relative to the target root.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Extensions without the dot, case-insensitive.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regexes over the file name.
    #[serde(default)]
    pub regex: Vec<String>,
}

/// Globs that re-admit files any exclusion would drop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Hash worker pool size. 0 means one worker per CPU.
    #[serde(default)]
    pub workers: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Where snapshots are written. Defaults to the per-user data directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Seconds within which a repeated run triggers a warning.
    #[serde(default = "default_recent_window_secs")]
    pub recent_window_secs: u64,
}

fn default_recent_window_secs() -> u64 {
    DEFAULT_RECENT_WINDOW_SECS as u64
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            recent_window_secs: default_recent_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default `env_logger` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Finds and loads the configuration.
    ///
    /// An explicit `config_path` must exist. Otherwise the first of
    /// `./.tidyguardrc.toml` and `~/.config/tidyguard/config.toml` that exists
    /// is used, and built-in defaults when neither does.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config").join("tidyguard").join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    /// Parses one TOML file. Missing sections take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Compiles the filter rules, rejecting bad globs and regexes.
    pub fn compile_filters(&self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(&self.filters)
    }

    /// The configured backup root, or the per-user default.
    pub fn backup_root(&self) -> PathBuf {
        self.backup
            .root
            .clone()
            .unwrap_or_else(crate::backup::BackupManager::default_root)
    }
}

/// Filter rules with every glob and regex compiled once, up front.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilters {
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_globs: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_globs: Vec<Pattern>,
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(|_| ConfigError::InvalidGlobPattern(p.clone())))
        .collect()
}

fn compile_regexes(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| ConfigError::InvalidRegexPattern {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

impl CompiledFilters {
    fn new(rules: &FilterRules) -> Result<Self, ConfigError> {
        let exclude = &rules.exclude;
        Ok(Self {
            exclude_filenames: exclude.filenames.iter().cloned().collect(),
            exclude_extensions: exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_globs: compile_globs(&exclude.patterns)?,
            exclude_regexes: compile_regexes(&exclude.regex)?,
            include_globs: compile_globs(&rules.include.patterns)?,
        })
    }

    /// Whether a file, given relative to the target root, takes part in a run.
    ///
    /// An include glob wins over every exclusion. Otherwise the file is
    /// dropped if its name, extension (case-insensitive), relative path glob
    /// or name regex is excluded.
    pub fn should_include(&self, relative: &Path) -> bool {
        if self.include_globs.iter().any(|g| g.matches_path(relative)) {
            return true;
        }

        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        if self.exclude_filenames.contains(name.as_ref()) {
            return false;
        }

        let excluded_ext = relative
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.exclude_extensions.contains(&ext));
        if excluded_ext {
            return false;
        }

        !self.exclude_globs.iter().any(|g| g.matches_path(relative))
            && !self.exclude_regexes.iter().any(|r| r.is_match(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn compile(exclude: ExcludeRules, include: IncludeRules) -> CompiledFilters {
        let config = Config {
            filters: FilterRules { exclude, include },
            ..Default::default()
        };
        config.compile_filters().unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scan.workers, 0);
        assert_eq!(config.ledger.recent_window_secs, 300);
        assert_eq!(config.logging.level, "warn");
        assert!(config.backup.root.is_none());
        assert!(config.compile_filters().is_ok());
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "[scan]\nworkers = 3\n\n[backup]\nroot = \"/srv/snapshots\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.scan.workers, 3);
        assert_eq!(config.backup_root(), PathBuf::from("/srv/snapshots"));
        assert_eq!(config.ledger.recent_window_secs, 300);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let result = Config::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[scan\nworkers = ").unwrap();

        let result = Config::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_filename_and_extension_exclusions() {
        let filters = compile(
            ExcludeRules {
                filenames: vec!["Thumbs.db".to_string()],
                extensions: vec!["part".to_string(), ".crdownload".to_string()],
                ..Default::default()
            },
            IncludeRules::default(),
        );

        assert!(!filters.should_include(Path::new("camera/Thumbs.db")));
        assert!(!filters.should_include(Path::new("movie.PART")));
        assert!(!filters.should_include(Path::new("setup.crdownload")));
        assert!(filters.should_include(Path::new("movie.mkv")));
        assert!(filters.should_include(Path::new("part")));
    }

    #[test]
    fn test_globs_match_relative_paths() {
        let filters = compile(
            ExcludeRules {
                patterns: vec!["**/node_modules/**".to_string(), "*.swp".to_string()],
                ..Default::default()
            },
            IncludeRules::default(),
        );

        assert!(!filters.should_include(Path::new("web/node_modules/left-pad/index.js")));
        assert!(!filters.should_include(Path::new("notes.swp")));
        assert!(filters.should_include(Path::new("web/my_node_modules/index.js")));
    }

    #[test]
    fn test_regex_matches_file_name_only() {
        let filters = compile(
            ExcludeRules {
                regex: vec![r"^~\$".to_string()],
                ..Default::default()
            },
            IncludeRules::default(),
        );

        assert!(!filters.should_include(Path::new("reports/~$budget.xlsx")));
        assert!(filters.should_include(Path::new("~$reports/budget.xlsx")));
    }

    #[test]
    fn test_include_wins_over_exclusions() {
        let filters = compile(
            ExcludeRules {
                extensions: vec!["log".to_string()],
                ..Default::default()
            },
            IncludeRules {
                patterns: vec!["keep/*.log".to_string()],
            },
        );

        assert!(filters.should_include(Path::new("keep/server.log")));
        assert!(!filters.should_include(Path::new("server.log")));
    }

    #[test]
    fn test_bad_patterns_fail_compilation() {
        let bad_glob = Config {
            filters: FilterRules {
                exclude: ExcludeRules {
                    patterns: vec!["[unclosed".to_string()],
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            bad_glob.compile_filters(),
            Err(ConfigError::InvalidGlobPattern(_))
        ));

        let bad_regex = Config {
            filters: FilterRules {
                include: IncludeRules::default(),
                exclude: ExcludeRules {
                    regex: vec!["(".to_string()],
                    ..Default::default()
                },
            },
            ..Default::default()
        };
        assert!(matches!(
            bad_regex.compile_filters(),
            Err(ConfigError::InvalidRegexPattern { .. })
        ));
    }
}
