use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sensor::SensorStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacMode {
    #[default]
    Off,
    Heat,
}

impl HvacMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "heat" => Some(Self::Heat),
            _ => None,
        }
    }
}

/// Label published as the climate entity's current action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacAction {
    Off,
    Idle,
    Heating,
}

impl HvacAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Idle => "idle",
            Self::Heating => "heating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    #[default]
    Off,
}

impl SwitchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }

    /// Reads a host switch state such as `"on"` or `"OFF"`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }

    /// Name of the `switch` service that moves an entity into this state.
    pub fn service(self) -> &'static str {
        match self {
            Self::On => "turn_on",
            Self::Off => "turn_off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerDecision {
    pub actuator_state: SwitchState,
    pub action_label: HvacAction,
}

impl ControllerDecision {
    pub const OFF: Self = Self {
        actuator_state: SwitchState::Off,
        action_label: HvacAction::Off,
    };
}

/// Payload of the `state` topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatePayload {
    pub current_temperature: f32,
    pub target_temp: f32,
    pub action: &'static str,
    pub mode: &'static str,
}

/// Payload of the `attributes` topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributesPayload {
    pub sensor_data: BTreeMap<String, SensorStatus>,
    pub valid_sensors: usize,
    pub max_age: f32,
}
