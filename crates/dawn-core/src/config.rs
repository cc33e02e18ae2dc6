use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

// Defaults for every tunable below.
pub const PRECONNECT_LEAD_SECS: u64 = 60; // device pre-connect starts 1 min before fire
pub const CONNECTION_TIMEOUT_MS: u64 = 15_000;
pub const RETRY_DELAY_MS: u64 = 5_000;
pub const MAX_RETRY_ATTEMPTS: u32 = 3; // retries after the first attempt
pub const SCAN_DURATION_MS: u64 = 30_000;
pub const GRACE_PERIOD_MS: u64 = 3_000;
pub const MAX_GRACE_PERIOD_MS: u64 = 3_000; // playback never waits longer on the radio
pub const INITIAL_VOLUME_PERCENT: u8 = 10;
pub const MAX_VOLUME_PERCENT: u8 = 100;
pub const VOLUME_INCREMENT_PERCENT: u8 = 1;
pub const RAMP_INTERVAL_MS: u64 = 1_000;
pub const MAX_ALARM_DURATION_SECS: u64 = 300; // 5 minutes

/// Top-level config (dawn.toml + DAWN_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DawnConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub alarm: AlarmConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_preconnect_lead_secs")]
    pub preconnect_lead_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            preconnect_lead_secs: PRECONNECT_LEAD_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn preconnect_lead(&self) -> Duration {
        Duration::from_secs(self.preconnect_lead_secs)
    }
}

/// Short-range audio device connection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// How long a single connection attempt may take before it counts as failed.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Fixed pause between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Retries after the first attempt (3 → 4 attempts in total).
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Platform-imposed end of a discovery session.
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,
    /// How long a firing alarm waits for an in-flight connection (max 3 s).
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: CONNECTION_TIMEOUT_MS,
            retry_delay_ms: RETRY_DELAY_MS,
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            scan_duration_ms: SCAN_DURATION_MS,
            grace_period_ms: GRACE_PERIOD_MS,
        }
    }
}

impl DeviceConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Output level and ramp tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_initial_volume")]
    pub initial_volume: u8,
    #[serde(default = "default_max_volume")]
    pub max_volume: u8,
    #[serde(default = "default_volume_increment")]
    pub volume_increment: u8,
    #[serde(default = "default_ramp_interval_ms")]
    pub ramp_interval_ms: u64,
    #[serde(default = "bool_true")]
    pub ramp_enabled: bool,
    /// Immediate retries when the output resource is denied.
    #[serde(default = "default_focus_retries")]
    pub focus_retries: u32,
    /// Platform default alarm sound, used when the chosen source cannot be resolved.
    #[serde(default = "default_sound")]
    pub default_sound: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            initial_volume: INITIAL_VOLUME_PERCENT,
            max_volume: MAX_VOLUME_PERCENT,
            volume_increment: VOLUME_INCREMENT_PERCENT,
            ramp_interval_ms: RAMP_INTERVAL_MS,
            ramp_enabled: true,
            focus_retries: 1,
            default_sound: default_sound(),
        }
    }
}

impl PlaybackConfig {
    pub fn ramp_interval(&self) -> Duration {
        Duration::from_millis(self.ramp_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Playback auto-stops after this long if nobody stops it.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Schedule the next day's occurrence as soon as an alarm fires.
    #[serde(default = "bool_true")]
    pub rearm_after_fire: bool,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: MAX_ALARM_DURATION_SECS,
            rearm_after_fire: true,
        }
    }
}

impl AlarmConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DawnConfig {
    /// Load config from TOML file + DAWN_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. DAWN_CONFIG env var
    ///   3. ~/.dawn/dawn.toml
    ///
    /// Nested keys use a double underscore: `DAWN_DEVICE__GRACE_PERIOD_MS=2000`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("DAWN_CONFIG").ok())
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        let config: DawnConfig = Figment::from(Serialized::defaults(DawnConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("DAWN_").ignore(&["CONFIG"]).split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        let p = &self.playback;
        if p.max_volume > 100 {
            return Err(CoreError::Config(format!(
                "playback.max_volume {} exceeds 100",
                p.max_volume
            )));
        }
        if p.initial_volume > p.max_volume {
            return Err(CoreError::Config(format!(
                "playback.initial_volume {} above max_volume {}",
                p.initial_volume, p.max_volume
            )));
        }
        if p.volume_increment == 0 || p.ramp_interval_ms == 0 {
            return Err(CoreError::Config(
                "playback ramp needs a non-zero increment and interval".to_string(),
            ));
        }
        if self.device.grace_period_ms > MAX_GRACE_PERIOD_MS {
            return Err(CoreError::Config(format!(
                "device.grace_period_ms {} exceeds {MAX_GRACE_PERIOD_MS}",
                self.device.grace_period_ms
            )));
        }
        if self.device.connection_timeout_ms == 0 {
            return Err(CoreError::Config(
                "device.connection_timeout_ms must be positive".to_string(),
            ));
        }
        if self.alarm.max_duration_secs == 0 {
            return Err(CoreError::Config(
                "alarm.max_duration_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn bool_true() -> bool {
    true
}
fn default_preconnect_lead_secs() -> u64 {
    PRECONNECT_LEAD_SECS
}
fn default_connection_timeout_ms() -> u64 {
    CONNECTION_TIMEOUT_MS
}
fn default_retry_delay_ms() -> u64 {
    RETRY_DELAY_MS
}
fn default_max_retry_attempts() -> u32 {
    MAX_RETRY_ATTEMPTS
}
fn default_scan_duration_ms() -> u64 {
    SCAN_DURATION_MS
}
fn default_grace_period_ms() -> u64 {
    GRACE_PERIOD_MS
}
fn default_initial_volume() -> u8 {
    INITIAL_VOLUME_PERCENT
}
fn default_max_volume() -> u8 {
    MAX_VOLUME_PERCENT
}
fn default_volume_increment() -> u8 {
    VOLUME_INCREMENT_PERCENT
}
fn default_ramp_interval_ms() -> u64 {
    RAMP_INTERVAL_MS
}
fn default_focus_retries() -> u32 {
    1
}
fn default_max_duration_secs() -> u64 {
    MAX_ALARM_DURATION_SECS
}
fn default_sound() -> String {
    format!("{}/.dawn/sounds/default.ogg", home_dir())
}
fn default_db_path() -> String {
    format!("{}/.dawn/dawn.db", home_dir())
}
fn default_config_path() -> String {
    format!("{}/.dawn/dawn.toml", home_dir())
}
fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_documented_timings() {
        let config = DawnConfig::default();
        assert_eq!(config.scheduler.preconnect_lead(), Duration::from_secs(60));
        assert_eq!(config.device.max_retry_attempts, 3);
        assert_eq!(config.device.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.playback.initial_volume, 10);
        assert_eq!(config.alarm.max_duration(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_and_env_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "dawn.toml",
                r#"
                [playback]
                initial_volume = 20
                ramp_enabled = false

                [alarm]
                max_duration_secs = 120
                "#,
            )?;
            jail.set_env("DAWN_DEVICE__GRACE_PERIOD_MS", "1500");

            let config = DawnConfig::load(Some("dawn.toml")).expect("config loads");
            assert_eq!(config.playback.initial_volume, 20);
            assert!(!config.playback.ramp_enabled);
            assert_eq!(config.playback.max_volume, 100);
            assert_eq!(config.alarm.max_duration_secs, 120);
            assert_eq!(config.device.grace_period_ms, 1500);
            Ok(())
        });
    }

    #[test]
    fn grace_period_above_limit_is_rejected() {
        let mut config = DawnConfig::default();
        config.device.grace_period_ms = 10_000;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn initial_volume_above_max_is_rejected() {
        let mut config = DawnConfig::default();
        config.playback.initial_volume = 90;
        config.playback.max_volume = 50;
        assert!(config.validate().is_err());
    }
}
