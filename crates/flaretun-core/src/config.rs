//! Settings resolution for flaretun.
//!
//! Implements hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global settings file (~/.config/flaretun/settings.json)
//! 3. Explicit settings file (`--config`)
//! 4. Environment variables
//!
//! CLI flags are applied on top by the setup binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::endpoint::QUICK_TUNNEL_SUFFIX;
use crate::error::{Error, Result};
use crate::poll::PollPolicy;

/// Complete flaretun configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub service: ServiceSettings,
    pub binary: BinarySettings,
    pub discovery: DiscoverySettings,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service: ServiceSettings::default(),
            binary: BinarySettings::default(),
            discovery: DiscoverySettings::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Host service registration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub name: String,
    /// Backoff before the service manager restarts a failed tunnel.
    pub restart_sec: u64,
    /// Pause between stop and delete, and between create and start.
    pub settle_ms: u64,
    /// POSIX user the unit runs as. `None` keeps the manager default (root).
    pub run_as: Option<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: default_service_name().to_string(),
            restart_sec: 5,
            settle_ms: 2_000,
            run_as: None,
        }
    }
}

impl ServiceSettings {
    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Where the tunnel binary comes from and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinarySettings {
    pub version: String,
    /// Full download URL; derived from `version` and the host platform when unset.
    pub download_url: Option<String>,
    pub install_dir: Option<PathBuf>,
}

impl Default for BinarySettings {
    fn default() -> Self {
        Self {
            version: "2024.12.2".to_string(),
            download_url: None,
            install_dir: None,
        }
    }
}

/// Timing of the URL discovery channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub log_poll_interval_ms: u64,
    pub log_poll_attempts: u32,
    pub journal_attempts: u32,
    pub journal_pause_ms: u64,
    pub journal_lines: usize,
    pub disposable_timeout_secs: u64,
    pub termination_grace_ms: u64,
    /// Overall budget for one discovery attempt across all channels.
    pub deadline_secs: u64,
    pub url_suffix: String,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            log_poll_interval_ms: 1_000,
            log_poll_attempts: 30,
            journal_attempts: 3,
            journal_pause_ms: 2_000,
            journal_lines: 50,
            disposable_timeout_secs: 20,
            termination_grace_ms: 3_000,
            deadline_secs: 90,
            url_suffix: QUICK_TUNNEL_SUFFIX.to_string(),
        }
    }
}

impl DiscoverySettings {
    pub const fn log_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.log_poll_interval_ms),
            self.log_poll_attempts,
        )
    }

    pub const fn journal_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.journal_pause_ms),
            self.journal_attempts,
        )
    }

    pub const fn disposable_timeout(&self) -> Duration {
        Duration::from_secs(self.disposable_timeout_secs)
    }

    pub const fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub const fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

const fn default_service_name() -> &'static str {
    if cfg!(windows) {
        "CloudflaredTunnel"
    } else {
        "cloudflared-tunnel"
    }
}

/// Load settings from the standard locations plus an optional explicit file.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    load_settings_from(global_config_path().as_deref(), explicit, |key| {
        std::env::var(key).ok()
    })
}

/// Load settings from the given files, reading environment overrides via `env`.
///
/// A missing global file is skipped; a missing explicit file is an error.
pub fn load_settings_from(
    global: Option<&Path>,
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    let mut merged = serde_json::to_value(Settings::default())?;

    if let Some(path) = global.filter(|p| p.exists()) {
        merge_values(&mut merged, load_settings_file(path)?);
    }
    if let Some(path) = explicit {
        merge_values(&mut merged, load_settings_file(path)?);
    }

    let mut settings: Settings = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid settings: {e}")))?;
    apply_env_overrides(&mut settings, env);
    Ok(settings)
}

/// Get the global settings file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|h| PathBuf::from(h).join("flaretun").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME").ok().map(|h| {
            PathBuf::from(h).join("Library/Application Support/flaretun/settings.json")
        })
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("flaretun").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_settings_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read settings file {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse settings file {}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(Error::Config(format!(
            "Settings file {} must contain a JSON object",
            path.display()
        )));
    }
    tracing::debug!("loaded settings from {}", path.display());
    Ok(value)
}

/// Deep-merge `overlay` into `base`; objects merge key by key, everything
/// else replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    if let Some(val) = env("FLARETUN_SERVICE_NAME").filter(|v| !v.is_empty()) {
        settings.service.name = val;
    }
    if let Some(val) = env("FLARETUN_INSTALL_DIR").filter(|v| !v.is_empty()) {
        settings.binary.install_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = env("FLARETUN_DOWNLOAD_URL").filter(|v| !v.is_empty()) {
        settings.binary.download_url = Some(val);
    }
    if let Some(val) = env("FLARETUN_LOG_LEVEL").filter(|v| !v.is_empty()) {
        settings.log_level = val;
    }
    if let Some(val) = env("FLARETUN_DEADLINE_SECS") {
        match val.parse() {
            Ok(n) => settings.discovery.deadline_secs = n,
            Err(_) => tracing::warn!("ignoring FLARETUN_DEADLINE_SECS={val:?}: not a number"),
        }
    }
}
