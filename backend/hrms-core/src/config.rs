// src/config.rs
use chrono::NaiveTime;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::face::DEFAULT_SIMILARITY_THRESHOLD;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid late-after time '{0}', expected HH:MM")]
    InvalidLateAfter(String),
    #[error("UTC offset of {0} minutes is out of range")]
    InvalidUtcOffset(i32),
    #[error("TLS needs both HRMS_CERT_PATH and HRMS_KEY_PATH")]
    IncompleteTls,
}

/// Service configuration read from `HRMS_`-prefixed environment variables
/// (after loading `.env` when present).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Server
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    /// JSON snapshot of the store, loaded at start and saved periodically.
    pub data_file: Option<String>,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    // Local time
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_late_after")]
    pub late_after: String,

    // Face verification
    pub face_engine_url: Option<String>,
    #[serde(default = "default_face_threshold")]
    pub face_match_threshold: f32,
    #[serde(default = "default_face_timeout_secs")]
    pub face_timeout_secs: u64,

    // Object storage
    pub storage_base_url: Option<String>,
    pub storage_api_key: Option<String>,
    #[serde(default = "default_storage_bucket")]
    pub storage_bucket: String,
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    // Notifications
    pub notification_webhook_url: Option<String>,
    #[serde(default = "default_notification_max_attempts")]
    pub notification_max_attempts: u32,
    #[serde(default = "default_notification_backoff_ms")]
    pub notification_backoff_ms: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_snapshot_interval_secs() -> u64 {
    60
}
fn default_utc_offset_minutes() -> i32 {
    8 * 60
}
fn default_late_after() -> String {
    "09:00".to_string()
}
fn default_face_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}
fn default_face_timeout_secs() -> u64 {
    5
}
fn default_storage_bucket() -> String {
    "hrms-documents".to_string()
}
fn default_upload_timeout_secs() -> u64 {
    10
}
fn default_notification_max_attempts() -> u32 {
    3
}
fn default_notification_backoff_ms() -> u64 {
    500
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let config = envy::prefixed("HRMS_").from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.late_threshold()?;
        if !(-24 * 60 < self.utc_offset_minutes && self.utc_offset_minutes < 24 * 60) {
            return Err(ConfigError::InvalidUtcOffset(self.utc_offset_minutes));
        }
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err(ConfigError::IncompleteTls);
        }
        Ok(())
    }

    pub fn late_threshold(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.late_after, "%H:%M")
            .map_err(|_| ConfigError::InvalidLateAfter(self.late_after.clone()))
    }

    pub fn face_timeout(&self) -> Duration {
        Duration::from_secs(self.face_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn notification_backoff(&self) -> Duration {
        Duration::from_millis(self.notification_backoff_ms)
    }

    pub fn tls_paths(&self) -> Option<(&str, &str)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert.as_str(), key.as_str())),
            _ => None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cert_path: None,
            key_path: None,
            data_file: None,
            snapshot_interval_secs: default_snapshot_interval_secs(),
            utc_offset_minutes: default_utc_offset_minutes(),
            late_after: default_late_after(),
            face_engine_url: None,
            face_match_threshold: default_face_threshold(),
            face_timeout_secs: default_face_timeout_secs(),
            storage_base_url: None,
            storage_api_key: None,
            storage_bucket: default_storage_bucket(),
            upload_timeout_secs: default_upload_timeout_secs(),
            notification_webhook_url: None,
            notification_max_attempts: default_notification_max_attempts(),
            notification_backoff_ms: default_notification_backoff_ms(),
        }
    }
}
