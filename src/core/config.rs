//! Configuration system: TOML (or JSON) file + env var overrides + CLI overrides.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{DbkError, Result};
use crate::core::paths::{expand_home, is_within, resolve_absolute_path};
use crate::integrity::digest::HashAlgorithm;
use crate::scanner::patterns::validate_glob_pattern;

/// Full dbk configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub backup: BackupConfig,
}

/// Filesystem locations used by a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory whose immediate subdirectories are backup targets.
    pub source_dir: Option<PathBuf>,
    /// Directory that receives one timestamped folder per run.
    pub destination_dir: Option<PathBuf>,
    /// Directory for the activity log, text report and JSON summary.
    pub log_dir: PathBuf,
    /// File this configuration was loaded from (informational).
    #[serde(skip)]
    pub config_file: PathBuf,
}

/// Backup policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackupConfig {
    pub backup_age_days: u64,
    pub verify_copy: bool,
    pub delete_source: bool,
    pub excluded_patterns: Vec<String>,
    pub hash_algorithm: HashAlgorithm,
    pub parallelism: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_age_days: 30,
            verify_copy: true,
            delete_source: false,
            excluded_patterns: Vec::new(),
            hash_algorithm: HashAlgorithm::Md5,
            parallelism: 1,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = home_dir();
        Self {
            source_dir: None,
            destination_dir: None,
            log_dir: home_dir
                .join(".local")
                .join("share")
                .join("dbk")
                .join("logs"),
            config_file: home_dir.join(".config").join("dbk").join("config.toml"),
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[DBK-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

/// Flat JSON layout written by earlier versions of the tool.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyJsonConfig {
    src_dir: Option<PathBuf>,
    dst_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    verify_copy: Option<bool>,
    delete_source: Option<bool>,
    excluded_patterns: Option<Vec<String>>,
    backup_age_days: Option<u64>,
}

impl LegacyJsonConfig {
    fn into_config(self) -> Config {
        let mut cfg = Config::default();
        cfg.paths.source_dir = self.src_dir;
        cfg.paths.destination_dir = self.dst_dir;
        if let Some(log_dir) = self.log_dir {
            cfg.paths.log_dir = log_dir;
        }
        if let Some(verify) = self.verify_copy {
            cfg.backup.verify_copy = verify;
        }
        if let Some(delete) = self.delete_source {
            cfg.backup.delete_source = delete;
        }
        if let Some(patterns) = self.excluded_patterns {
            cfg.backup.excluded_patterns = patterns;
        }
        if let Some(days) = self.backup_age_days {
            cfg.backup.backup_age_days = days;
        }
        cfg
    }
}

/// Command-line overrides, applied after file and environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub source_dir: Option<PathBuf>,
    pub destination_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub no_verify: bool,
    pub delete_source: bool,
    /// Replaces the configured patterns when non-empty.
    pub exclude: Vec<String>,
    pub backup_age_days: Option<u64>,
    pub parallelism: Option<usize>,
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    /// Run-level validation is left to [`Config::validate`] so that commands which
    /// need no source directory (digest, compare, config path) still work.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|err| DbkError::io(&path_buf, err))?;
            Self::parse(&raw, &path_buf)?
        } else if is_explicit_path {
            return Err(DbkError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides()?;
        cfg.normalize_paths();
        Ok(cfg)
    }

    /// Parse TOML, or JSON when the file extension is `.json`.
    fn parse(raw: &str, path: &Path) -> Result<Self> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !is_json {
            return Ok(toml::from_str(raw)?);
        }

        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|err| DbkError::ConfigParse {
                context: "json",
                details: err.to_string(),
            })?;
        let nested = value
            .as_object()
            .is_some_and(|obj| obj.contains_key("paths") || obj.contains_key("backup"));
        let parsed = if nested {
            serde_json::from_value::<Self>(value)
        } else {
            serde_json::from_value::<LegacyJsonConfig>(value).map(LegacyJsonConfig::into_config)
        };
        parsed.map_err(|err| DbkError::ConfigParse {
            context: "json",
            details: err.to_string(),
        })
    }

    /// Apply command-line overrides. Paths are normalized again afterwards.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(src) = &overrides.source_dir {
            self.paths.source_dir = Some(src.clone());
        }
        if let Some(dst) = &overrides.destination_dir {
            self.paths.destination_dir = Some(dst.clone());
        }
        if let Some(log_dir) = &overrides.log_dir {
            self.paths.log_dir.clone_from(log_dir);
        }
        if overrides.no_verify {
            self.backup.verify_copy = false;
        }
        if overrides.delete_source {
            self.backup.delete_source = true;
        }
        if !overrides.exclude.is_empty() {
            self.backup.excluded_patterns.clone_from(&overrides.exclude);
        }
        if let Some(days) = overrides.backup_age_days {
            self.backup.backup_age_days = days;
        }
        if let Some(workers) = overrides.parallelism {
            self.backup.parallelism = workers;
        }
        self.normalize_paths();
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// Uses FNV-1a for cross-process-stable hashing.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Source directory, or an error naming the missing setting.
    pub fn source_dir(&self) -> Result<&Path> {
        self.paths
            .source_dir
            .as_deref()
            .ok_or_else(|| DbkError::InvalidConfig {
                details: "paths.source_dir is not set".to_string(),
            })
    }

    /// Destination directory, or an error naming the missing setting.
    pub fn destination_dir(&self) -> Result<&Path> {
        self.paths
            .destination_dir
            .as_deref()
            .ok_or_else(|| DbkError::InvalidConfig {
                details: "paths.destination_dir is not set".to_string(),
            })
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(env_var)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DBK_SOURCE_DIR") {
            self.paths.source_dir = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("DBK_DESTINATION_DIR") {
            self.paths.destination_dir = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("DBK_LOG_DIR") {
            self.paths.log_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DBK_BACKUP_AGE_DAYS") {
            self.backup.backup_age_days = parse_env_u64("DBK_BACKUP_AGE_DAYS", &raw)?;
        }
        if let Some(raw) = lookup("DBK_VERIFY_COPY") {
            self.backup.verify_copy = parse_env_bool("DBK_VERIFY_COPY", &raw)?;
        }
        if let Some(raw) = lookup("DBK_DELETE_SOURCE") {
            self.backup.delete_source = parse_env_bool("DBK_DELETE_SOURCE", &raw)?;
        }
        if let Some(raw) = lookup("DBK_EXCLUDED_PATTERNS") {
            self.backup.excluded_patterns = raw
                .split(',')
                .map(str::trim)
                .filter(|pat| !pat.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(raw) = lookup("DBK_HASH_ALGORITHM") {
            self.backup.hash_algorithm =
                raw.parse::<HashAlgorithm>()
                    .map_err(|details| DbkError::ConfigParse {
                        context: "env",
                        details: format!("DBK_HASH_ALGORITHM={raw:?}: {details}"),
                    })?;
        }
        if let Some(raw) = lookup("DBK_PARALLELISM") {
            self.backup.parallelism = parse_env_usize("DBK_PARALLELISM", &raw)?;
        }
        Ok(())
    }

    /// Expand `~` and strip trailing slashes for consistent comparison.
    fn normalize_paths(&mut self) {
        for slot in [&mut self.paths.source_dir, &mut self.paths.destination_dir]
            .into_iter()
            .flatten()
        {
            *slot = strip_trailing_slash(&expand_home(slot));
        }
        self.paths.log_dir = strip_trailing_slash(&expand_home(&self.paths.log_dir));
    }

    /// Check everything a backup run depends on.
    pub fn validate(&self) -> Result<()> {
        self.validate_settings()?;

        let source = self.source_dir()?;
        let destination = self.destination_dir()?;

        if resolve_absolute_path(source) == resolve_absolute_path(destination) {
            return Err(DbkError::InvalidConfig {
                details: format!(
                    "source_dir and destination_dir must differ (both {})",
                    source.display()
                ),
            });
        }
        if is_within(destination, source) {
            return Err(DbkError::InvalidConfig {
                details: format!(
                    "destination_dir {} lies inside source_dir {}",
                    destination.display(),
                    source.display()
                ),
            });
        }
        if is_within(source, destination) {
            return Err(DbkError::InvalidConfig {
                details: format!(
                    "source_dir {} lies inside destination_dir {}",
                    source.display(),
                    destination.display()
                ),
            });
        }
        Ok(())
    }

    /// Checks that do not depend on paths being configured.
    pub fn validate_settings(&self) -> Result<()> {
        if self.backup.parallelism == 0 {
            return Err(DbkError::InvalidConfig {
                details: "backup.parallelism must be >= 1".to_string(),
            });
        }
        // 2^32 days is far past anything chrono can subtract from "now".
        if self.backup.backup_age_days > u64::from(u32::MAX) {
            return Err(DbkError::InvalidConfig {
                details: format!(
                    "backup.backup_age_days is out of range: {}",
                    self.backup.backup_age_days
                ),
            });
        }
        for pattern in &self.backup.excluded_patterns {
            validate_glob_pattern(pattern)?;
        }
        Ok(())
    }
}

fn strip_trailing_slash(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.len() > 1
        && let Some(stripped) = s.strip_suffix('/')
    {
        return PathBuf::from(stripped);
    }
    path.to_path_buf()
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|error| DbkError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|error| DbkError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DbkError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: expected a boolean"),
        }),
    }
}
