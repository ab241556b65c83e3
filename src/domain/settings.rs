use crate::infrastructure::bluetooth::connection::ConnectionConfig;
use crate::infrastructure::bluetooth::protocol::{InputReport, COMMAND_PSM, KNOWN_NAMES, REPORT_PSM};
use crate::infrastructure::bluetooth::scanner::NameFilter;
use crate::infrastructure::bluetooth::service::PollingConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "wiimote_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Report kind names accepted in the settings file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportModeSetting {
    Status,
    Buttons,
}

impl From<ReportModeSetting> for InputReport {
    fn from(mode: ReportModeSetting) -> Self {
        match mode {
            ReportModeSetting::Status => InputReport::Status,
            ReportModeSetting::Buttons => InputReport::Buttons,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Discovery Settings
    #[serde(default = "default_allowed_names")]
    pub allowed_names: Vec<String>,
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,

    // Connection Settings
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    #[serde(default = "default_command_psm")]
    pub command_psm: u16,
    #[serde(default = "default_report_psm")]
    pub report_psm: u16,

    // Polling Settings
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64, // 0 disables status polling
    #[serde(default)]
    pub poll_interval_ms: u64, // 0 only yields between ticks
    #[serde(default = "default_report_mode")]
    pub report_mode: ReportModeSetting,
    #[serde(default = "default_true")]
    pub continuous_reporting: bool,
    #[serde(default = "default_true")]
    pub assign_leds: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),

            allowed_names: default_allowed_names(),
            scan_duration_ms: default_scan_duration_ms(),

            connect_attempts: default_connect_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            command_psm: default_command_psm(),
            report_psm: default_report_psm(),

            status_poll_interval_ms: default_status_poll_interval_ms(),
            poll_interval_ms: 0,
            report_mode: default_report_mode(),
            continuous_reporting: true,
            assign_leds: true,
        }
    }
}

fn default_allowed_names() -> Vec<String> {
    KNOWN_NAMES.iter().map(|name| name.to_string()).collect()
}
fn default_scan_duration_ms() -> u64 {
    // 5 inquiry units of 1.28 s
    6400
}
fn default_connect_attempts() -> u32 {
    3
}
fn default_connect_retry_delay_ms() -> u64 {
    300
}
fn default_command_psm() -> u16 {
    COMMAND_PSM
}
fn default_report_psm() -> u16 {
    REPORT_PSM
}
fn default_status_poll_interval_ms() -> u64 {
    2000
}
fn default_report_mode() -> ReportModeSetting {
    ReportModeSetting::Status
}

impl Settings {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn name_filter(&self) -> NameFilter {
        NameFilter::new(self.allowed_names.iter().cloned())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            filter: self.name_filter(),
            max_attempts: self.connect_attempts,
            retry_delay: Duration::from_millis(self.connect_retry_delay_ms),
            command_psm: self.command_psm,
            report_psm: self.report_psm,
        }
    }

    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            status_interval: (self.status_poll_interval_ms > 0)
                .then(|| Duration::from_millis(self.status_poll_interval_ms)),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            report_mode: self.report_mode.into(),
            continuous_reporting: self.continuous_reporting,
            assign_leds: self.assign_leds,
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::at(settings_path))
    }

    /// Load from an explicit file; defaults when it is missing or unreadable
    pub fn at(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                if settings_path.exists() {
                    warn!(
                        "Ignoring unreadable settings {}: {}",
                        settings_path.display(),
                        e
                    );
                }
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("wiimote-link");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_protocol() {
        let settings = Settings::default();
        let connection = settings.connection_config();
        assert_eq!(connection.max_attempts, 3);
        assert_eq!(connection.retry_delay, Duration::from_millis(300));
        assert_eq!(connection.command_psm, 0x11);
        assert_eq!(connection.report_psm, 0x13);
        assert!(connection.filter.matches("Nintendo RVL-CNT-01-TR"));

        let polling = settings.polling_config();
        assert_eq!(polling.status_interval, Some(Duration::from_secs(2)));
        assert_eq!(polling.report_mode, InputReport::Status);
        assert!(polling.continuous_reporting);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{ "connect_attempts": 5, "report_mode": "buttons", "status_poll_interval_ms": 0 }"#,
        )
        .unwrap();

        assert_eq!(settings.connect_attempts, 5);
        assert_eq!(settings.connect_retry_delay_ms, 300);
        assert_eq!(settings.allowed_names.len(), 2);
        assert_eq!(settings.log_settings.level, "info");

        let polling = settings.polling_config();
        assert_eq!(polling.report_mode, InputReport::Buttons);
        assert_eq!(polling.status_interval, None);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut service = SettingsService::at(&path);
        assert_eq!(service.get().connect_attempts, 3);
        service.get_mut().allowed_names = vec!["Custom Remote".to_string()];
        service.get_mut().poll_interval_ms = 4;
        service.save().unwrap();

        let reloaded = SettingsService::at(&path);
        assert_eq!(reloaded.get().allowed_names, vec!["Custom Remote".to_string()]);
        assert_eq!(reloaded.get().polling_config().poll_interval, Duration::from_millis(4));
        assert!(reloaded.get().name_filter().matches("Custom Remote"));
        assert!(!reloaded.get().name_filter().matches("Nintendo RVL-CNT-01"));
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let service = SettingsService::at(&path);
        assert_eq!(service.get().connect_attempts, 3);
        assert_eq!(service.path(), path.as_path());
    }
}
