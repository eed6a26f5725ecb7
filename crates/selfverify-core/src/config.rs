//! Configuration resolution for selfverify.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/selfverify/settings.json`)
//! 3. Explicit config file (e.g. `--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete selfverify configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Verification controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Upper bound on the post-acceptance wait for key backup recovery (ms).
    pub recovery_wait_timeout_ms: u64,
    /// Capacity of the controller's event queue.
    pub queue_capacity: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            recovery_wait_timeout_ms: 10_000,
            queue_capacity: 64,
        }
    }
}

impl VerificationConfig {
    /// Recovery wait timeout as a [`Duration`].
    pub const fn recovery_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_wait_timeout_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Reject values the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.verification.queue_capacity == 0 {
            return Err(Error::Config(
                "verification.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.verification.recovery_wait_timeout_ms == 0 {
            return Err(Error::Config(
                "verification.recovery_wait_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(Error::Config("logging.level must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Fields a config file sets; anything absent keeps the lower layer's value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigOverlay {
    pub verification: VerificationOverlay,
    pub logging: LoggingOverlay,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VerificationOverlay {
    pub recovery_wait_timeout_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingOverlay {
    pub level: Option<String>,
    pub json: Option<bool>,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config> {
    let global = global_config_path().filter(|p| p.exists());
    load_config_from(global.as_deref(), explicit_path, |key| std::env::var(key).ok())
}

/// [`load_config`] with the global file and the environment supplied by the
/// caller.
pub fn load_config_from<F>(
    global_path: Option<&Path>,
    explicit_path: Option<&Path>,
    lookup: F,
) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = Config::default();

    if let Some(path) = global_path {
        merge_config(&mut config, load_overlay_file(path)?);
    }

    // The explicit file must exist.
    if let Some(path) = explicit_path {
        merge_config(&mut config, load_overlay_file(path)?);
    }

    apply_env_overrides(&mut config, lookup);
    config.validate()?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("selfverify").join("settings.json"))
}

/// Read a single JSON config file on top of the defaults.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let mut config = Config::default();
    merge_config(&mut config, load_overlay_file(path)?);
    Ok(config)
}

/// Read the fields a single JSON config file sets.
pub fn load_overlay_file(path: &Path) -> Result<ConfigOverlay> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: ConfigOverlay) {
    if let Some(ms) = overlay.verification.recovery_wait_timeout_ms {
        base.verification.recovery_wait_timeout_ms = ms;
    }
    if let Some(capacity) = overlay.verification.queue_capacity {
        base.verification.queue_capacity = capacity;
    }
    if let Some(level) = overlay.logging.level {
        base.logging.level = level;
    }
    if let Some(json) = overlay.logging.json {
        base.logging.json = json;
    }
}

/// Apply `SELFVERIFY_*` overrides read through `lookup`.
///
/// Unparseable values are ignored and the previous value is kept.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("SELFVERIFY_RECOVERY_WAIT_TIMEOUT_MS")
        && let Ok(n) = val.parse()
    {
        config.verification.recovery_wait_timeout_ms = n;
    }
    if let Some(val) = lookup("SELFVERIFY_QUEUE_CAPACITY")
        && let Ok(n) = val.parse()
    {
        config.verification.queue_capacity = n;
    }
    if let Some(val) = lookup("SELFVERIFY_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = lookup("SELFVERIFY_LOG_JSON")
        && let Ok(b) = val.parse()
    {
        config.logging.json = b;
    }
}
