pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the declaration file directly
pub const CONFIG_PATH_ENV: &str = "FLEETFORM_CONFIG_PATH";

/// Environment variable overriding `max_in_flight`
pub const PARALLELISM_ENV: &str = "FLEETFORM_PARALLELISM";

/// Project-local directory holding state, settings and the simulated cloud
pub const PROJECT_DIR: &str = ".fleetform";

const SETTINGS_FILE: &str = "settings.yaml";
const CANDIDATES: [&str; 3] = ["infra.local.kdl", "infra.kdl", ".infra.kdl"];

/// fleetform's global config directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("fleetform");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Finds the declaration file, searching from the current directory.
///
/// Search order:
/// 1. `FLEETFORM_CONFIG_PATH`
/// 2. current directory: infra.local.kdl, infra.kdl, .infra.kdl
/// 3. `./.fleetform/`, same order
/// 4. `~/.config/fleetform/infra.kdl`
pub fn find_declaration_file() -> Result<PathBuf> {
    find_declaration_file_in(&std::env::current_dir()?)
}

pub fn find_declaration_file_in(dir: &Path) -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points at a missing file: {}", CONFIG_PATH_ENV, path.display());
    }

    for filename in &CANDIDATES {
        let path = dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let project_dir = dir.join(PROJECT_DIR);
    if project_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = project_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("fleetform").join("infra.kdl");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::DeclarationFileNotFound)
}

/// Directory that owns `.fleetform/` for a declaration file
pub fn project_root(declaration: &Path) -> PathBuf {
    let parent = declaration
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    if parent.file_name().is_some_and(|n| n == PROJECT_DIR) {
        parent.parent().unwrap_or(parent).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}

/// Retry policy for provider calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Engine tuning read from `settings.yaml`
///
/// ```yaml
/// max_in_flight: 8
/// lock_timeout_secs: 1800
/// retry:
///   max_attempts: 5
///   initial_delay_ms: 500
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Steps applied concurrently
    pub max_in_flight: usize,
    pub retry: RetrySettings,
    /// Age after which a held state lock is reported as stale
    pub lock_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            retry: RetrySettings::default(),
            lock_timeout_secs: 3600,
        }
    }
}

impl EngineSettings {
    /// Loads settings for a project.
    ///
    /// `<root>/.fleetform/settings.yaml` wins over the global
    /// `~/.config/fleetform/settings.yaml`; `FLEETFORM_PARALLELISM` overrides
    /// `max_in_flight` in either case.
    pub fn load(project_root: &Path) -> Result<Self> {
        let local = project_root.join(PROJECT_DIR).join(SETTINGS_FILE);
        let global = dirs::config_dir().map(|d| d.join("fleetform").join(SETTINGS_FILE));

        let mut settings = if local.exists() {
            Self::from_file(&local)?
        } else if let Some(global) = global.filter(|g| g.exists()) {
            Self::from_file(&global)?
        } else {
            Self::default()
        };

        if let Ok(value) = std::env::var(PARALLELISM_ENV) {
            settings.max_in_flight = match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: PARALLELISM_ENV.to_string(),
                        value,
                    });
                }
            };
        }
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::InvalidSettings {
                path: path.display().to_string(),
                source,
            })?;
        tracing::debug!("Loaded engine settings from {}", path.display());
        Ok(settings)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}
