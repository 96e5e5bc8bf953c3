//! # Configuration Module
//!
//! This module owns [`TargetConfig`], the caller-supplied description of which
//! player to arbitrate and how to drive it, plus the platform-appropriate
//! locations for the config file and the daemon's runtime files.
//!
//! ## Storage
//!
//! The config file is plain JSON in the platform config directory:
//! - Linux: `~/.config/keepplaying/config.json`
//! - macOS: `~/Library/Application Support/keepplaying/config.json`
//! - Windows: `%APPDATA%\keepplaying\config.json`
//!
//! Runtime files (PID file, stop request) live in the platform data directory.
//! A missing config file is not an error: defaults are used.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller;
use crate::error::MonitorError;
use crate::session::same_process;

/// Application directory name under the platform config/data directories
const APP_DIR: &str = "keepplaying";

/// Separator between hotkey tokens, as in `ctrl+alt+p`
pub const HOTKEY_DELIMITER: char = '+';

/// Lower bound for the poll interval
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Players whose idle window label is not their executable name
const KNOWN_IDLE_TITLES: &[(&str, &str, TitleMatch)] = &[("lx-music-desktop.exe", "LX Music", TitleMatch::Suffix)];

/// An ordered chord of key tokens, e.g. `ctrl`, `alt`, `p`.
///
/// Every token is non-empty, trimmed, lowercase and names a key the player
/// controller knows how to press.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hotkey(Vec<String>);

impl Hotkey {
    /// Parse a delimited hotkey string such as `"Ctrl + Alt + P"`
    pub fn parse(text: &str) -> Result<Self, MonitorError> {
        Self::from_tokens([text])
    }

    /// Build a hotkey from a token sequence.
    ///
    /// Each entry is split on [`HOTKEY_DELIMITER`] as well, so both
    /// `["ctrl", "alt", "p"]` and `["ctrl+alt", "p"]` are accepted.
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self, MonitorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = Vec::new();

        for raw in tokens {
            for token in raw.as_ref().split(HOTKEY_DELIMITER) {
                let token = token.trim().to_lowercase();
                if token.is_empty() {
                    return Err(MonitorError::InvalidConfig(format!(
                        "empty key in hotkey '{}'",
                        raw.as_ref()
                    )));
                }
                if controller::resolve_key(&token).is_none() {
                    return Err(MonitorError::InvalidConfig(format!("unknown key '{token}'")));
                }
                keys.push(token);
            }
        }

        if keys.is_empty() {
            return Err(MonitorError::InvalidConfig("hotkey has no keys".to_string()));
        }

        Ok(Self(keys))
    }

    /// Key tokens in press order
    pub fn tokens(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(&HOTKEY_DELIMITER.to_string()))
    }
}

impl TryFrom<String> for Hotkey {
    type Error = MonitorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Hotkey::parse(&value)
    }
}

impl From<Hotkey> for String {
    fn from(hotkey: Hotkey) -> Self {
        hotkey.to_string()
    }
}

impl Default for Hotkey {
    fn default() -> Self {
        Self(vec!["ctrl".to_string(), "alt".to_string(), "p".to_string()])
    }
}

/// How the window title is compared against the player's idle label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleMatch {
    /// Idle when the title is exactly the bare label
    #[default]
    Exact,
    /// Idle when the title ends with the bare label
    Suffix,
}

/// What to arbitrate and how to drive it.
///
/// Owned by the caller; the monitor reads the latest value at the start of
/// every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Executable name of the background player
    pub process_name: String,
    /// Key chord that toggles play/pause in the player
    pub hotkey: Hotkey,
    /// Time between two ticks
    pub poll_interval_ms: u64,
    /// Time given to the player after a key press before the tick continues
    pub settle_delay_ms: u64,
    /// Window title fragments that mean "paused" (case-insensitive)
    pub paused_markers: Vec<String>,
    /// Bare window title shown when no track is loaded.
    /// Defaults to the player's known label, else the process name without `.exe`.
    pub idle_title: Option<String>,
    /// How the idle label is compared against the window title.
    /// Defaults to the player's known mode, else exact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_match: Option<TitleMatch>,
    /// Processes whose audio never counts as competing audio
    pub excluded_processes: Vec<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            process_name: "lx-music-desktop.exe".to_string(),
            hotkey: Hotkey::default(),
            poll_interval_ms: 2000,
            settle_delay_ms: 1000,
            paused_markers: vec!["- 暂停中".to_string(), "- paused".to_string()],
            idle_title: None,
            title_match: None,
            excluded_processes: Vec::new(),
        }
    }
}

impl TargetConfig {
    /// Default configuration for a given player
    pub fn for_process(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    fn known_idle_title(&self) -> Option<(&'static str, TitleMatch)> {
        KNOWN_IDLE_TITLES
            .iter()
            .find(|(process, _, _)| same_process(process, &self.process_name))
            .map(|(_, label, mode)| (*label, *mode))
    }

    /// The bare window label the player shows without track metadata
    pub fn idle_label(&self) -> String {
        if let Some(title) = self.idle_title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return title.to_string();
        }
        if let Some((label, _)) = self.known_idle_title() {
            return label.to_string();
        }

        let name = self.process_name.trim();
        let split = name.len().saturating_sub(4);
        match (name.get(..split), name.get(split..)) {
            (Some(stem), Some(ext)) if ext.eq_ignore_ascii_case(".exe") => stem.to_string(),
            _ => name.to_string(),
        }
    }

    /// How [`TargetConfig::idle_label`] is matched against the window title
    pub fn idle_match(&self) -> TitleMatch {
        self.title_match
            .or_else(|| self.known_idle_title().map(|(_, mode)| mode))
            .unwrap_or_default()
    }

    /// Whether audio from `process_name` is ignored when looking for
    /// competing audio
    pub fn is_excluded(&self, process_name: &str) -> bool {
        same_process(process_name, &self.process_name)
            || self
                .excluded_processes
                .iter()
                .any(|excluded| same_process(process_name, excluded))
    }

    /// Check the invariants `configure` relies on
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.process_name.trim().is_empty() {
            return Err(MonitorError::InvalidConfig("process name is empty".to_string()));
        }
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(MonitorError::InvalidConfig(format!(
                "poll interval {}ms is below the {MIN_POLL_INTERVAL_MS}ms minimum",
                self.poll_interval_ms
            )));
        }
        if self.hotkey.tokens().is_empty() {
            return Err(MonitorError::InvalidConfig("hotkey has no keys".to_string()));
        }
        Ok(())
    }

    /// Set one field from its textual form, as used by `config set`.
    ///
    /// List fields take comma-separated values; an empty `idle_title` clears it.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), MonitorError> {
        let mut next = self.clone();
        let value = value.trim();
        let list = || {
            value
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        let millis = |value: &str| {
            value
                .parse::<u64>()
                .map_err(|_| MonitorError::InvalidConfig(format!("'{value}' is not a number of milliseconds")))
        };

        match key {
            "process_name" => next.process_name = value.to_string(),
            "hotkey" => next.hotkey = Hotkey::parse(value)?,
            "poll_interval_ms" => next.poll_interval_ms = millis(value)?,
            "settle_delay_ms" => next.settle_delay_ms = millis(value)?,
            "paused_markers" => next.paused_markers = list(),
            "excluded_processes" => next.excluded_processes = list(),
            "idle_title" => next.idle_title = Some(value.to_string()).filter(|v| !v.is_empty()),
            "title_match" => {
                next.title_match = match value.to_lowercase().as_str() {
                    "exact" => Some(TitleMatch::Exact),
                    "suffix" => Some(TitleMatch::Suffix),
                    "" | "auto" => None,
                    other => {
                        return Err(MonitorError::InvalidConfig(format!(
                            "title_match must be 'exact', 'suffix' or 'auto', not '{other}'"
                        )))
                    }
                }
            }
            other => return Err(MonitorError::InvalidConfig(format!("unknown config key '{other}'"))),
        }

        next.validate()?;
        *self = next;
        Ok(())
    }
}

/// One-shot overrides coming from CLI flags or environment variables
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub process_name: Option<String>,
    pub hotkey: Option<String>,
    pub poll_interval_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Apply the overrides on top of `base`, validating the result
    pub fn apply(&self, base: &TargetConfig) -> Result<TargetConfig, MonitorError> {
        let mut config = base.clone();

        if let Some(process) = &self.process_name {
            config.process_name = process.trim().to_string();
        }
        if let Some(hotkey) = &self.hotkey {
            config.hotkey = Hotkey::parse(hotkey)?;
        }
        if let Some(interval) = self.poll_interval_ms {
            config.poll_interval_ms = interval;
        }

        config.validate()?;
        Ok(config)
    }
}

fn app_dir(base: Option<PathBuf>, kind: &str) -> Result<PathBuf> {
    let base = base.ok_or_else(|| anyhow::anyhow!(
        "Could not determine system {kind} directory. Please ensure your platform supports standard {kind} directories."
    ))?;

    let dir = base.join(APP_DIR);
    fs::create_dir_all(&dir)
        .with_context(|| format!(
            "Failed to create keepplaying {kind} directory at {}. Please check file permissions.",
            dir.display()
        ))?;

    Ok(dir)
}

/// Returns the platform-appropriate config directory, creating it if needed
pub fn get_config_dir() -> Result<PathBuf> {
    app_dir(dirs::config_dir(), "config")
}

/// Returns the platform-appropriate data directory for runtime files
/// (PID file, stop request), creating it if needed
pub fn get_data_dir() -> Result<PathBuf> {
    app_dir(dirs::data_dir(), "data")
}

/// Path of the JSON config file
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.json"))
}

/// Load a config file, falling back to defaults when it does not exist
pub fn load_config(path: &Path) -> Result<TargetConfig> {
    if !path.exists() {
        log::debug!("No config file at {}, using defaults", path.display());
        return Ok(TargetConfig::default());
    }

    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: TargetConfig = serde_json::from_str(&text)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path.display()))?;

    Ok(config)
}

/// Write a config file as pretty-printed JSON
pub fn save_config(config: &TargetConfig, path: &Path) -> Result<()> {
    config.validate()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let text = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(path, text).with_context(|| format!("Failed to write config file {}", path.display()))?;

    Ok(())
}
