use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::sensor::SensorRef;

pub const DEFAULT_MAX_INTERVAL: f32 = 0.8;
pub const DEFAULT_MAX_TEMP: f32 = 30.0;
pub const DEFAULT_MIN_TEMP: f32 = 10.0;
pub const DEFAULT_MAX_AGE_MINUTES: f32 = 30.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("missing attribute '{0}'")]
    MissingField(&'static str),
    #[error("no matching switch entities found")]
    NoActuators,
    #[error("no temperature sensors configured")]
    NoSensors,
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureLimits {
    pub min_temp: f32,
    pub max_temp: f32,
}

impl Default for TemperatureLimits {
    fn default() -> Self {
        Self {
            min_temp: DEFAULT_MIN_TEMP,
            max_temp: DEFAULT_MAX_TEMP,
        }
    }
}

impl TemperatureLimits {
    pub fn clamp(self, value: f32) -> f32 {
        value.clamp(self.min_temp, self.max_temp)
    }
}

/// Per-instance block as written by the user. Reference fields stay loosely
/// typed because they accept several shapes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawThermostatConfig {
    pub friendly_name: Option<String>,
    pub heat_switch: Option<Value>,
    pub temp_sensor: Option<Value>,
    pub max_interval: Option<f32>,
    pub max_temp: Option<f32>,
    pub min_temp: Option<f32>,
    pub max_age: Option<f32>,
    #[serde(rename = "DEBUG", default)]
    pub debug: Option<Flag>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    pub fn is_set(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Text(text) => matches!(
                text.trim().to_ascii_lowercase().as_str(),
                "yes" | "true" | "on" | "1"
            ),
        }
    }
}

impl RawThermostatConfig {
    pub fn debug(&self) -> bool {
        self.debug.as_ref().is_some_and(Flag::is_set)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatConfig {
    pub device_id: String,
    pub friendly_name: String,
    pub heat_switches: Vec<String>,
    pub sensors: Vec<SensorRef>,
    pub max_interval: f32,
    pub limits: TemperatureLimits,
    pub max_age: Duration,
    pub debug: bool,
}

impl ThermostatConfig {
    pub fn from_raw(device_id: &str, raw: &RawThermostatConfig) -> Result<Self, ConfigError> {
        let heat_switch = raw
            .heat_switch
            .as_ref()
            .ok_or(ConfigError::MissingField("heat_switch"))?;
        let temp_sensor = raw
            .temp_sensor
            .as_ref()
            .ok_or(ConfigError::MissingField("temp_sensor"))?;

        let heat_switches = parse_switches(heat_switch);
        if heat_switches.is_empty() {
            return Err(ConfigError::NoActuators);
        }
        let sensors = parse_sensors(temp_sensor);
        if sensors.is_empty() {
            return Err(ConfigError::NoSensors);
        }

        let max_interval = raw.max_interval.unwrap_or(DEFAULT_MAX_INTERVAL);
        if !max_interval.is_finite() || max_interval < 0.0 {
            return Err(invalid("max_interval", "must be a non-negative number"));
        }

        let limits = TemperatureLimits {
            min_temp: raw.min_temp.unwrap_or(DEFAULT_MIN_TEMP),
            max_temp: raw.max_temp.unwrap_or(DEFAULT_MAX_TEMP),
        };
        if !limits.min_temp.is_finite()
            || !limits.max_temp.is_finite()
            || limits.min_temp > limits.max_temp
        {
            return Err(invalid("min_temp", "must not exceed max_temp"));
        }

        let max_age_minutes = raw.max_age.unwrap_or(DEFAULT_MAX_AGE_MINUTES);
        if !max_age_minutes.is_finite() || max_age_minutes <= 0.0 {
            return Err(invalid("max_age", "must be a positive number of minutes"));
        }
        let max_age = Duration::try_from_secs_f32(max_age_minutes * 60.0)
            .map_err(|_| invalid("max_age", "is too large"))?;

        Ok(Self {
            device_id: device_id.to_string(),
            friendly_name: raw
                .friendly_name
                .clone()
                .unwrap_or_else(|| device_id.to_string()),
            heat_switches,
            sensors,
            max_interval,
            limits,
            max_age,
            debug: raw.debug(),
        })
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn entries(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn parse_switches(value: &Value) -> Vec<String> {
    let mut switches: Vec<String> = Vec::new();
    let mut push = |entity: &str| {
        let entity = entity.trim();
        if !entity.is_empty() && !switches.iter().any(|known| known == entity) {
            switches.push(entity.to_string());
        }
    };

    for entry in entries(value) {
        match entry {
            Value::String(entity) => push(entity),
            Value::Object(map) => map.keys().for_each(|entity| push(entity)),
            other => warn!("unknown switch configuration: {other}"),
        }
    }
    switches
}

fn parse_sensors(value: &Value) -> Vec<SensorRef> {
    let mut sensors: Vec<SensorRef> = Vec::new();
    let mut push = |sensor: Option<SensorRef>| {
        if let Some(sensor) = sensor {
            if !sensors.contains(&sensor) {
                sensors.push(sensor);
            }
        }
    };

    for entry in entries(value) {
        match entry {
            Value::String(raw) => push(SensorRef::parse(raw)),
            Value::Object(map) => {
                for (entity, attribute) in map {
                    match attribute.as_str().map(str::trim) {
                        Some(attribute) if !attribute.is_empty() && !entity.trim().is_empty() => {
                            push(Some(SensorRef::with_attribute(entity.trim(), attribute)))
                        }
                        _ => push(SensorRef::parse(entity)),
                    }
                }
            }
            other => warn!("unknown sensor configuration: {other}"),
        }
    }
    sensors
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub publish_watchdog_secs: u64,
    pub registration_retry_secs: u64,
    pub persist_interval_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            publish_watchdog_secs: 5 * 60,
            registration_retry_secs: 60,
            persist_interval_secs: 24 * 60 * 60,
        }
    }
}

/// Upper bound for every timer period: one year.
pub const MAX_TIMER_SECS: u64 = 365 * 24 * 60 * 60;

impl TimingConfig {
    pub fn publish_watchdog(&self) -> Duration {
        bounded(self.publish_watchdog_secs)
    }

    pub fn registration_retry(&self) -> Duration {
        bounded(self.registration_retry_secs)
    }

    pub fn persist_interval(&self) -> Duration {
        bounded(self.persist_interval_secs)
    }
}

fn bounded(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(1, MAX_TIMER_SECS))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: "virtual-thermostat".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatestreamConfig {
    pub base_topic: String,
    pub service_topic: String,
    /// Seconds to wait for retained entity states before instances start.
    pub sync_secs: u64,
}

impl Default for StatestreamConfig {
    fn default() -> Self {
        Self {
            base_topic: "homeassistant/statestream".to_string(),
            service_topic: "homeassistant/service".to_string(),
            sync_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub statestream: StatestreamConfig,
    pub discovery_prefix: String,
    pub data_dir: PathBuf,
    pub timing: TimingConfig,
    pub thermostats: BTreeMap<String, RawThermostatConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            statestream: StatestreamConfig::default(),
            discovery_prefix: "homeassistant".to_string(),
            data_dir: PathBuf::from("./.thermostat"),
            timing: TimingConfig::default(),
            thermostats: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    pub fn debug_requested(&self) -> bool {
        self.thermostats.values().any(RawThermostatConfig::debug)
    }
}
