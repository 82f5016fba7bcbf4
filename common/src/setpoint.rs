use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::{config::TemperatureLimits, types::HvacMode};

pub const DEFAULT_TARGET_TEMP: f32 = 18.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("'{0}' is not a valid temperature")]
    InvalidTemperature(String),
    #[error("'{0}' is not a supported mode (expected off or heat)")]
    InvalidMode(String),
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("payload of {0} bytes exceeds the size limit")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointField {
    TargetTemp,
    HighTemp,
    LowTemp,
    Mode,
}

/// The user-controlled record persisted between restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Setpoint {
    #[serde(deserialize_with = "lenient_temperature")]
    pub target_temp: f32,
    #[serde(deserialize_with = "lenient_temperature")]
    pub high_temp: f32,
    #[serde(deserialize_with = "lenient_temperature")]
    pub low_temp: f32,
    #[serde(deserialize_with = "lenient_mode")]
    pub mode: HvacMode,
}

impl Default for Setpoint {
    fn default() -> Self {
        Self {
            target_temp: DEFAULT_TARGET_TEMP,
            high_temp: DEFAULT_TARGET_TEMP,
            low_temp: DEFAULT_TARGET_TEMP,
            mode: HvacMode::Off,
        }
    }
}

impl Setpoint {
    pub fn sanitize(&mut self, limits: TemperatureLimits) {
        self.target_temp = limits.clamp(self.target_temp);
        self.high_temp = limits.clamp(self.high_temp);
        self.low_temp = limits.clamp(self.low_temp);
    }

    /// Updates one field from a raw command payload.
    ///
    /// Temperatures must parse as finite numbers and are clamped into
    /// `limits`; the mode must be `off` or `heat`. A rejected payload leaves
    /// the record untouched.
    pub fn apply_command(
        &mut self,
        field: SetpointField,
        raw: &str,
        limits: TemperatureLimits,
    ) -> Result<(), CommandError> {
        let slot = match field {
            SetpointField::TargetTemp => &mut self.target_temp,
            SetpointField::HighTemp => &mut self.high_temp,
            SetpointField::LowTemp => &mut self.low_temp,
            SetpointField::Mode => {
                self.mode = HvacMode::parse(raw)
                    .ok_or_else(|| CommandError::InvalidMode(raw.to_string()))?;
                return Ok(());
            }
        };

        let value = raw
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| CommandError::InvalidTemperature(raw.to_string()))?;
        *slot = limits.clamp(value);
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f32),
    Text(String),
}

fn lenient_temperature<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    let value = match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(value) => value,
        NumberOrText::Text(text) => text
            .trim()
            .parse::<f32>()
            .map_err(|_| de::Error::custom(format!("'{text}' is not a temperature")))?,
    };
    if !value.is_finite() {
        return Err(de::Error::custom("temperature must be finite"));
    }
    Ok(value)
}

fn lenient_mode<'de, D: Deserializer<'de>>(deserializer: D) -> Result<HvacMode, D::Error> {
    let text = String::deserialize(deserializer)?;
    HvacMode::parse(&text).ok_or_else(|| de::Error::custom(format!("unknown mode '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LIMITS: TemperatureLimits = TemperatureLimits {
        min_temp: 10.0,
        max_temp: 30.0,
    };

    #[test]
    fn empty_record_loads_defaults() {
        let setpoint: Setpoint = serde_json::from_str("{}").unwrap();
        assert_eq!(setpoint, Setpoint::default());
        assert_eq!(setpoint.target_temp, 18.0);
        assert_eq!(setpoint.mode, HvacMode::Off);
    }

    #[test]
    fn accepts_numeric_strings_and_fills_missing_fields() {
        let setpoint: Setpoint =
            serde_json::from_str(r#"{"target_temp": "21.5", "mode": "HEAT", "low_temp": 17}"#)
                .unwrap();

        assert_eq!(
            setpoint,
            Setpoint {
                target_temp: 21.5,
                high_temp: 18.0,
                low_temp: 17.0,
                mode: HvacMode::Heat,
            }
        );
    }

    #[test]
    fn rejects_garbage_temperature_in_file() {
        let parsed = serde_json::from_str::<Setpoint>(r#"{"target_temp": "warm"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn serializes_as_flat_record() {
        let setpoint = Setpoint {
            target_temp: 20.5,
            mode: HvacMode::Heat,
            ..Setpoint::default()
        };
        let json = serde_json::to_value(&setpoint).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "target_temp": 20.5,
                "high_temp": 18.0,
                "low_temp": 18.0,
                "mode": "heat",
            })
        );
    }

    #[test]
    fn applies_numeric_commands() {
        let mut setpoint = Setpoint::default();

        setpoint
            .apply_command(SetpointField::TargetTemp, " 21.5 ", LIMITS)
            .unwrap();
        setpoint
            .apply_command(SetpointField::HighTemp, "23", LIMITS)
            .unwrap();
        setpoint
            .apply_command(SetpointField::LowTemp, "16.5", LIMITS)
            .unwrap();

        assert_eq!(setpoint.target_temp, 21.5);
        assert_eq!(setpoint.high_temp, 23.0);
        assert_eq!(setpoint.low_temp, 16.5);
    }

    #[test]
    fn clamps_temperatures_into_limits() {
        let mut setpoint = Setpoint::default();

        setpoint
            .apply_command(SetpointField::TargetTemp, "45", LIMITS)
            .unwrap();
        assert_eq!(setpoint.target_temp, 30.0);

        setpoint
            .apply_command(SetpointField::TargetTemp, "-3", LIMITS)
            .unwrap();
        assert_eq!(setpoint.target_temp, 10.0);
    }

    #[test]
    fn rejects_non_numeric_temperature_without_mutation() {
        let mut setpoint = Setpoint::default();

        for raw in ["warm", "", "NaN", "inf"] {
            let err = setpoint
                .apply_command(SetpointField::TargetTemp, raw, LIMITS)
                .unwrap_err();
            assert_eq!(err, CommandError::InvalidTemperature(raw.to_string()));
        }
        assert_eq!(setpoint, Setpoint::default());
    }

    #[test]
    fn mode_commands_are_validated() {
        let mut setpoint = Setpoint::default();

        setpoint
            .apply_command(SetpointField::Mode, "Heat", LIMITS)
            .unwrap();
        assert_eq!(setpoint.mode, HvacMode::Heat);

        let err = setpoint
            .apply_command(SetpointField::Mode, "cool", LIMITS)
            .unwrap_err();
        assert_eq!(err, CommandError::InvalidMode("cool".to_string()));
        assert_eq!(setpoint.mode, HvacMode::Heat);
    }

    #[test]
    fn sanitize_pulls_loaded_values_into_limits() {
        let mut setpoint = Setpoint {
            target_temp: 42.0,
            high_temp: 5.0,
            ..Setpoint::default()
        };
        setpoint.sanitize(LIMITS);

        assert_eq!(setpoint.target_temp, 30.0);
        assert_eq!(setpoint.high_temp, 10.0);
        assert_eq!(setpoint.low_temp, 18.0);
    }
}
