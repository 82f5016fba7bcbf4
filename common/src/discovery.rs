//! Home Assistant MQTT discovery document for the climate entity.

use serde::Serialize;

use crate::{
    config::TemperatureLimits,
    topics::{
        SUFFIX_ATTRIBUTES, SUFFIX_SET_MODE, SUFFIX_SET_POWER, SUFFIX_SET_TARGET_TEMP,
        SUFFIX_STATE, topic_base,
    },
    types::HvacMode,
};

pub const MANUFACTURER: &str = "Valitron AB";
pub const MODEL: &str = "Virtual Thermostat";
pub const UNIQUE_ID_PREFIX: &str = "virtual_thermostat_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub friendly_name: String,
    pub firmware_version: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>, friendly_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            friendly_name: friendly_name.into(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            manufacturer: MANUFACTURER.to_string(),
            model: MODEL.to_string(),
        }
    }

    pub fn unique_id(&self) -> String {
        format!("{UNIQUE_ID_PREFIX}{}", self.device_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryDevice {
    pub identifiers: Vec<String>,
    pub name: String,
    pub sw_version: String,
    pub manufacturer: String,
    pub model: String,
}

/// Topics are relative to `~`, which the platform expands to the device base.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryConfig {
    #[serde(rename = "~")]
    pub base: String,
    pub device: DiscoveryDevice,
    pub name: String,
    pub unique_id: String,
    pub action_topic: String,
    pub action_template: &'static str,
    pub current_temperature_topic: String,
    pub current_temperature_template: &'static str,
    pub json_attributes_topic: String,
    pub max_temp: f32,
    pub min_temp: f32,
    pub mode_command_topic: String,
    pub mode_state_topic: String,
    pub mode_state_template: &'static str,
    pub modes: [&'static str; 2],
    pub power_command_topic: String,
    pub temperature_command_topic: String,
    pub temperature_state_topic: String,
    pub temperature_state_template: &'static str,
    pub temperature_unit: &'static str,
    pub temp_step: &'static str,
}

impl DiscoveryConfig {
    pub fn new(identity: &DeviceIdentity, limits: TemperatureLimits) -> Self {
        let relative = |suffix: &str| format!("~{suffix}");
        let unique_id = identity.unique_id();

        Self {
            base: topic_base(&identity.device_id),
            device: DiscoveryDevice {
                identifiers: vec![unique_id.clone()],
                name: identity.friendly_name.clone(),
                sw_version: identity.firmware_version.clone(),
                manufacturer: identity.manufacturer.clone(),
                model: identity.model.clone(),
            },
            name: identity.friendly_name.clone(),
            unique_id,
            action_topic: relative(SUFFIX_STATE),
            action_template: "{{ value_json.action }}",
            current_temperature_topic: relative(SUFFIX_STATE),
            current_temperature_template: "{{ value_json.current_temperature }}",
            json_attributes_topic: relative(SUFFIX_ATTRIBUTES),
            max_temp: limits.max_temp,
            min_temp: limits.min_temp,
            mode_command_topic: relative(SUFFIX_SET_MODE),
            mode_state_topic: relative(SUFFIX_STATE),
            mode_state_template: "{{ value_json.mode }}",
            modes: [HvacMode::Off.as_str(), HvacMode::Heat.as_str()],
            power_command_topic: relative(SUFFIX_SET_POWER),
            temperature_command_topic: relative(SUFFIX_SET_TARGET_TEMP),
            temperature_state_topic: relative(SUFFIX_STATE),
            temperature_state_template: "{{ value_json.target_temp }}",
            temperature_unit: "C",
            temp_step: "0.5",
        }
    }
}
