//! TOML configuration for the watcher, the database, and the note service.
//!
//! Every section is optional; a missing file (when no `--config` flag was
//! given) falls back to [`Config::default`].
//!
//! ```toml
//! [db]
//! path = "/Users/me/.config/pdf-notes/notes.sqlite"
//!
//! [viewer]
//! app_name = "Preview"
//! poll_interval_ms = 1500
//!
//! [notes]
//! enabled = true
//! base_url = "http://127.0.0.1:8000"
//! timeout_secs = 60
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name used under the platform configuration directory.
pub const APP_DIR: &str = "pdf-notes";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub notes: NotesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// `<config_dir>/pdf-notes/notes.sqlite`, or `./notes.sqlite` when the
/// platform has no configuration directory.
fn default_db_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join("notes.sqlite"))
        .unwrap_or_else(|| PathBuf::from("notes.sqlite"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewerConfig {
    /// Application whose windows are watched.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How often the lifecycle event source samples the app state.
    #[serde(default = "default_lifecycle_interval_ms")]
    pub lifecycle_interval_ms: u64,
    /// Read page text on every page change.
    #[serde(default = "default_true")]
    pub extract_text: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            poll_interval_ms: default_poll_interval_ms(),
            lifecycle_interval_ms: default_lifecycle_interval_ms(),
            extract_text: true,
        }
    }
}

impl ViewerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lifecycle_interval(&self) -> Duration {
        Duration::from_millis(self.lifecycle_interval_ms)
    }
}

fn default_app_name() -> String {
    "Preview".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1500
}
fn default_lifecycle_interval_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Stored in `notes.note_type` for every generated note.
    #[serde(default = "default_note_type")]
    pub note_type: String,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            note_type: default_note_type(),
        }
    }
}

impl NotesConfig {
    /// Longest one note request can take, every retry and backoff included.
    pub fn request_budget(&self) -> Duration {
        let attempts = u64::from(self.max_retries) + 1;
        let backoff: Duration = (1..=self.max_retries).map(crate::notes::retry_delay).sum();
        Duration::from_secs(attempts * self.timeout_secs) + backoff
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}
fn default_note_type() -> String {
    "summary".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Resolve the configuration the CLI should use.
///
/// An explicit path must exist. Without one, the default location is read
/// when present and built-in defaults are used otherwise.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => match default_config_path() {
            Some(path) if path.exists() => load_config(&path),
            _ => Ok(Config::default()),
        },
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.viewer.app_name.trim().is_empty() {
        anyhow::bail!("viewer.app_name must not be empty");
    }
    if config.viewer.poll_interval_ms == 0 {
        anyhow::bail!("viewer.poll_interval_ms must be > 0");
    }
    if config.viewer.lifecycle_interval_ms == 0 {
        anyhow::bail!("viewer.lifecycle_interval_ms must be > 0");
    }
    if config.notes.enabled {
        if config.notes.base_url.trim().is_empty() {
            anyhow::bail!("notes.base_url must be set when notes are enabled");
        }
        if config.notes.timeout_secs == 0 {
            anyhow::bail!("notes.timeout_secs must be > 0");
        }
    }
    if config.notes.note_type.trim().is_empty() {
        anyhow::bail!("notes.note_type must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.viewer.app_name, "Preview");
        assert_eq!(config.viewer.poll_interval_ms, 1500);
        assert!(config.notes.enabled);
        assert_eq!(config.notes.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.logging.level, "info");
        assert!(config.db.path.ends_with("notes.sqlite"));
    }

    #[test]
    fn test_partial_sections() {
        let config = parse(
            r#"
            [db]
            path = "/tmp/pdf-notes/test.sqlite"

            [viewer]
            app_name = "Skim"
            poll_interval_ms = 500

            [notes]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.db.path, PathBuf::from("/tmp/pdf-notes/test.sqlite"));
        assert_eq!(config.viewer.app_name, "Skim");
        assert_eq!(config.viewer.poll_interval(), Duration::from_millis(500));
        assert!(config.viewer.extract_text);
        assert!(!config.notes.enabled);
        assert_eq!(config.notes.timeout_secs, 60);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = parse("[viewer]\npoll_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_empty_base_url_rejected_only_when_enabled() {
        assert!(parse("[notes]\nbase_url = \"\"\n").is_err());
        assert!(parse("[notes]\nenabled = false\nbase_url = \"\"\n").is_ok());
    }

    #[test]
    fn test_request_budget_covers_retries() {
        let config = parse("[notes]\ntimeout_secs = 10\nmax_retries = 2\n").unwrap();
        // 3 attempts of 10s plus 1s and 2s of backoff
        assert_eq!(config.notes.request_budget(), Duration::from_secs(33));

        let single = parse("[notes]\ntimeout_secs = 5\nmax_retries = 0\n").unwrap();
        assert_eq!(single.notes.request_budget(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = load_config(Path::new("/nonexistent/pdf-notes.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
