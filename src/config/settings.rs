use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the lifecycle engine, the retired-message archive
/// and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub lifecycle: LifecycleSettings,
    pub archive: ArchiveSettings,
    pub logging: LoggingSettings,
}

/// Timing of the message lifecycle.
#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleSettings {
    /// How long a WAIT_* state waits for peers before advancing anyway.
    pub ack_timeout_secs: u64,
    /// How long retired messages stay in memory before being purged.
    pub expired_retention_secs: u64,
    pub purge_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveSettings {
    pub enabled: bool,
    pub path: String,
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

impl LifecycleSettings {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn expired_retention(&self) -> Duration {
        Duration::from_secs(self.expired_retention_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled in from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub lifecycle: Option<PartialLifecycleSettings>,
    pub archive: Option<PartialArchiveSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLifecycleSettings {
    pub ack_timeout_secs: Option<u64>,
    pub expired_retention_secs: Option<u64>,
    pub purge_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialArchiveSettings {
    pub enabled: Option<bool>,
    pub path: Option<String>,
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleSettings::default(),
            archive: ArchiveSettings {
                enabled: false,
                path: "cbc_archive".to_string(),
                ttl_secs: None,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            ack_timeout_secs: 15,
            expired_retention_secs: 86_400,
            purge_interval_secs: 60,
        }
    }
}

impl PartialSettings {
    /// Merges with defaults.
    pub fn merge(self) -> Settings {
        let default = Settings::default();
        let lifecycle = self.lifecycle;
        let archive = self.archive;
        let logging = self.logging;

        Settings {
            lifecycle: LifecycleSettings {
                ack_timeout_secs: lifecycle
                    .as_ref()
                    .and_then(|l| l.ack_timeout_secs)
                    .unwrap_or(default.lifecycle.ack_timeout_secs),
                expired_retention_secs: lifecycle
                    .as_ref()
                    .and_then(|l| l.expired_retention_secs)
                    .unwrap_or(default.lifecycle.expired_retention_secs),
                purge_interval_secs: lifecycle
                    .as_ref()
                    .and_then(|l| l.purge_interval_secs)
                    .unwrap_or(default.lifecycle.purge_interval_secs),
            },
            archive: ArchiveSettings {
                enabled: archive
                    .as_ref()
                    .and_then(|a| a.enabled)
                    .unwrap_or(default.archive.enabled),
                path: archive
                    .as_ref()
                    .and_then(|a| a.path.clone())
                    .unwrap_or(default.archive.path),
                ttl_secs: archive
                    .as_ref()
                    .and_then(|a| a.ttl_secs)
                    .or(default.archive.ttl_secs),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}
