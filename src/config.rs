//! Configuration for the Elderband agent.

use crate::backend::BackendConfig;
use crate::core::escalation::{CounterDecay, EscalationPolicy, DEFAULT_CALL_THRESHOLD, DEFAULT_EMERGENCY_THRESHOLD};
use crate::core::identity::DEFAULT_AGE;
use crate::core::session::SessionSettings;
use crate::core::windowing::DEFAULT_WINDOW_CAPACITY;
use crate::reminder::{parse_timezone, ReminderSchedule, ReminderSlot, ReminderTopics, DEFAULT_MEDICINES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "ELDERBAND_CONFIG";

/// Longest accepted spacing between lazy identity lookups (one day).
pub const MAX_IDENTITY_RETRY_SECS: u64 = 86_400;

/// Main configuration for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub backend: BackendSettings,
    pub peripheral: PeripheralConfig,
    pub session: SessionConfig,
    pub reminders: ReminderConfig,

    /// JSON coefficients for the SBP model; built-in when unset
    pub model_path: Option<PathBuf>,

    /// Path for storing processor stats
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("elderband-agent");

        Self {
            broker: BrokerConfig::default(),
            backend: BackendSettings::default(),
            peripheral: PeripheralConfig::default(),
            session: SessionConfig::default(),
            reminders: ReminderConfig::default(),
            model_path: None,
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from `ELDERBAND_CONFIG` or the default location,
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("elderband-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Apply `ELDERBAND_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ELDERBAND_BROKER_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = lookup("ELDERBAND_BROKER_PORT") {
            self.broker.port = parse_env("ELDERBAND_BROKER_PORT", &port)?;
        }
        if let Some(url) = lookup("ELDERBAND_BACKEND_URL") {
            self.backend.base_url = url;
        }
        if let Some(path) = lookup("ELDERBAND_PERIPHERAL") {
            self.peripheral.path = PathBuf::from(path);
        }
        if let Some(capacity) = lookup("ELDERBAND_WINDOW_CAPACITY") {
            self.session.window_capacity = parse_env("ELDERBAND_WINDOW_CAPACITY", &capacity)?;
        }
        if let Some(threshold) = lookup("ELDERBAND_EMERGENCY_THRESHOLD") {
            self.session.emergency_threshold = parse_env("ELDERBAND_EMERGENCY_THRESHOLD", &threshold)?;
        }
        if let Some(threshold) = lookup("ELDERBAND_CALL_THRESHOLD") {
            self.session.call_threshold = parse_env("ELDERBAND_CALL_THRESHOLD", &threshold)?;
        }
        if let Some(decay) = lookup("ELDERBAND_COUNTER_DECAY") {
            self.session.counter_decay = CounterDecay::parse(&decay)
                .ok_or_else(|| ConfigError::Invalid(format!("ELDERBAND_COUNTER_DECAY: unknown policy '{decay}'")))?;
        }
        Ok(())
    }

    /// Reject values the processor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.window_capacity == 0 {
            return Err(ConfigError::Invalid("window capacity must be at least 1".into()));
        }
        if self.session.emergency_threshold == 0 {
            return Err(ConfigError::Invalid("emergency threshold must be at least 1".into()));
        }
        if self.session.call_threshold == 0 {
            return Err(ConfigError::Invalid("call threshold must be at least 1".into()));
        }
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Invalid("broker host is empty".into()));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("backend URL is empty".into()));
        }
        if let Err(e) = reqwest::Url::parse(&self.backend.base_url) {
            return Err(ConfigError::Invalid(format!("backend URL is invalid: {e}")));
        }
        if self.session.identity_retry_secs > MAX_IDENTITY_RETRY_SECS {
            return Err(ConfigError::Invalid(format!(
                "identity retry must be at most {MAX_IDENTITY_RETRY_SECS} seconds"
            )));
        }
        self.reminder_schedule()?;
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            window_capacity: self.session.window_capacity,
            policy: EscalationPolicy {
                emergency_threshold: self.session.emergency_threshold,
                call_threshold: self.session.call_threshold,
                decay: self.session.counter_decay,
            },
            default_age: self.session.default_age,
            identity_retry: chrono::Duration::seconds(
                self.session.identity_retry_secs.min(MAX_IDENTITY_RETRY_SECS) as i64,
            ),
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            base_url: self.backend.base_url.clone(),
            timeout: self.backend.timeout,
            legacy_contact_fallback: self.backend.legacy_contact_fallback,
        }
    }

    pub fn reminder_schedule(&self) -> Result<ReminderSchedule, ConfigError> {
        let timezone = parse_timezone(&self.reminders.timezone)
            .map_err(|e| ConfigError::Invalid(format!("reminder timezone: {e}")))?;

        if let Some(slot) = self.reminders.slots.iter().find(|s| s.time().is_none()) {
            return Err(ConfigError::Invalid(format!(
                "reminder slot '{}' has invalid time {:02}:{:02}",
                slot.label, slot.hour, slot.minute
            )));
        }

        Ok(ReminderSchedule::new(timezone, self.reminders.slots.clone()))
    }

    pub fn reminder_topics(&self) -> ReminderTopics {
        ReminderTopics {
            flag: self.broker.reminder_topic.clone(),
            info: self.broker.reminder_info_topic.clone(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{key}: {e}")))
}

/// MQTT broker connection and topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_prefix: String,
    pub keep_alive_secs: u64,
    /// Inbound telemetry
    pub data_topic: String,
    /// Outbound reminder flag
    pub reminder_topic: String,
    /// Outbound reminder details
    pub reminder_info_topic: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_prefix: "elderband".to_string(),
            keep_alive_secs: 30,
            data_topic: "elder_band/data".to_string(),
            reminder_topic: "elder_band/medication".to_string(),
            reminder_info_topic: "elder_band/cmd".to_string(),
        }
    }
}

/// Record-store connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub legacy_contact_fallback: bool,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            timeout: Duration::from_millis(3000),
            legacy_contact_fallback: false,
        }
    }
}

/// Actuation peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    pub path: PathBuf,
    /// Fail startup instead of running without the peripheral
    pub required: bool,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/ttyACM0"),
            required: false,
            timeout: Duration::from_millis(2000),
        }
    }
}

/// Aggregation and escalation tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub window_capacity: usize,
    pub emergency_threshold: u32,
    pub call_threshold: u32,
    pub counter_decay: CounterDecay,
    pub default_age: u32,
    pub identity_retry_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            emergency_threshold: DEFAULT_EMERGENCY_THRESHOLD,
            call_threshold: DEFAULT_CALL_THRESHOLD,
            counter_decay: CounterDecay::Decay,
            default_age: DEFAULT_AGE,
            identity_retry_secs: 30,
        }
    }
}

/// Medication reminder schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    pub enabled: bool,
    /// IANA timezone the slots are expressed in
    pub timezone: String,
    pub slots: Vec<ReminderSlot>,
    pub medicines: Vec<String>,
    /// Publish `"false"` this long after each reminder
    pub dismiss_after_secs: Option<u64>,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: "UTC".to_string(),
            slots: ReminderSlot::defaults(),
            medicines: DEFAULT_MEDICINES.iter().map(|m| m.to_string()).collect(),
            dismiss_after_secs: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.data_topic, "elder_band/data");
        assert_eq!(config.backend.base_url, "http://127.0.0.1:8000/api");
        assert_eq!(config.peripheral.path, PathBuf::from("/dev/ttyACM0"));
        assert_eq!(config.session.window_capacity, 5);
        assert_eq!(config.session.emergency_threshold, 3);
        assert_eq!(config.session.call_threshold, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"session":{"emergency_threshold":4},"backend":{"timeout":500}}"#).unwrap();
        assert_eq!(config.session.emergency_threshold, 4);
        assert_eq!(config.session.window_capacity, 5);
        assert_eq!(config.backend.timeout, Duration::from_millis(500));
        assert_eq!(config.broker.host, "localhost");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[
                ("ELDERBAND_BROKER_HOST", "broker.local"),
                ("ELDERBAND_BROKER_PORT", "8883"),
                ("ELDERBAND_WINDOW_CAPACITY", "10"),
                ("ELDERBAND_COUNTER_DECAY", "reset"),
            ]))
            .unwrap();

        assert_eq!(config.broker.host, "broker.local");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.session_settings().window_capacity, 10);
        assert_eq!(config.session_settings().policy.decay, CounterDecay::Reset);
    }

    #[test]
    fn test_bad_env_values_rejected() {
        let mut config = Config::default();
        assert!(matches!(
            config.apply_env_overrides(env(&[("ELDERBAND_BROKER_PORT", "not-a-port")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            config.apply_env_overrides(env(&[("ELDERBAND_COUNTER_DECAY", "sometimes")])),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.session.window_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.reminders.timezone = "Nowhere/City".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.reminders.slots.push(ReminderSlot::new("late", 24, 30));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.backend.base_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_huge_identity_retry_is_rejected() {
        let mut config = Config::default();
        config.session.identity_retry_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(
            config.session_settings().identity_retry,
            chrono::Duration::seconds(MAX_IDENTITY_RETRY_SECS as i64)
        );

        config.session.identity_retry_secs = MAX_IDENTITY_RETRY_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("elderband-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");

        let mut config = Config::default();
        config.broker.host = "10.0.0.2".to_string();
        config.reminders.dismiss_after_secs = Some(60);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
