//! Configuration resolution for homewatt.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/homewatt/settings.json)
//! 3. Project config (.homewatt/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete homewatt configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub preflight: PreflightConfig,
}

/// Supervisor-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Seconds to wait between starting the worker and the server.
    /// Best-effort ordering only, not a readiness check.
    pub startup_delay_secs: u64,
    /// Seconds to wait for graceful survivor shutdown before SIGKILL.
    pub terminate_timeout_secs: u64,
    pub log_level: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: 5,
            terminate_timeout_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

/// Configuration for the periodic energy-calculation worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program and arguments; `--scheduler --interval <minutes>` is appended
    /// at launch.
    pub command: Vec<String>,
    /// Poll interval in minutes.
    pub interval_minutes: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string(), "energy_calculator.py".to_string()],
            interval_minutes: 5,
        }
    }
}

/// Configuration for the HTTP API server process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Program and arguments, used as-is. Port 8000 is a contract owned by
    /// the API component; the default merely forwards it.
    pub command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "uvicorn".to_string(),
                "api_app:app".to_string(),
                "--host".to_string(),
                "0.0.0.0".to_string(),
                "--port".to_string(),
                "8000".to_string(),
            ],
        }
    }
}

/// Shared database file configuration.
///
/// The supervisor provisions the file but never opens it; the schema is
/// owned by the worker and server processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/data/smart_home_energy.db"),
        }
    }
}

/// Pre-flight step configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PreflightConfig {
    /// Optional command run after provisioning and before either child is
    /// spawned. Startup aborts if it reports a non-zero status.
    pub patch_command: Option<Vec<String>>,
    /// Skip database file provisioning entirely.
    pub skip_provision: bool,
}

/// Configuration source priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigSource {
    Default = 0,
    Global = 1,
    Project = 2,
    Environment = 3,
    Cli = 4,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    // Load project config
    if let Some(dir) = project_dir {
        let project_path = dir.join(".homewatt").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    // Apply environment overrides
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".homewatt").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/homewatt/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("homewatt").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    // Merge supervisor config
    base.supervisor = overlay.supervisor;

    // Merge worker/server config; an empty command keeps the lower layer
    if !overlay.worker.command.is_empty() {
        base.worker.command = overlay.worker.command;
    }
    base.worker.interval_minutes = overlay.worker.interval_minutes;
    if !overlay.server.command.is_empty() {
        base.server.command = overlay.server.command;
    }

    // Merge database config
    base.database = overlay.database;

    // Merge preflight config
    if overlay.preflight.patch_command.is_some() {
        base.preflight.patch_command = overlay.preflight.patch_command;
    }
    base.preflight.skip_provision = overlay.preflight.skip_provision;
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("HOMEWATT_INTERVAL_MINUTES") {
        if let Ok(n) = val.parse() {
            config.worker.interval_minutes = n;
        }
    }
    if let Ok(val) = std::env::var("HOMEWATT_STARTUP_DELAY") {
        if let Ok(n) = val.parse() {
            config.supervisor.startup_delay_secs = n;
        }
    }
    if let Ok(val) = std::env::var("HOMEWATT_TERMINATE_TIMEOUT") {
        if let Ok(n) = val.parse() {
            config.supervisor.terminate_timeout_secs = n;
        }
    }
    if let Ok(val) = std::env::var("HOMEWATT_DB_PATH") {
        config.database.path = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("HOMEWATT_LOG_LEVEL") {
        config.supervisor.log_level = val;
    }
}
