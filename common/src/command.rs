//! Inbound command topics under `virtual_thermostat/<device_id>/`.

use crate::{
    config::TemperatureLimits,
    setpoint::{CommandError, Setpoint, SetpointField},
    topics::{
        SUFFIX_ATTRIBUTES, SUFFIX_SET_HIGH_TEMP, SUFFIX_SET_LOW_TEMP, SUFFIX_SET_MODE,
        SUFFIX_SET_POWER, SUFFIX_SET_TARGET_TEMP, SUFFIX_STATE, TOPIC_PREFIX,
    },
};

pub const MAX_PAYLOAD_BYTES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    SetTargetTemp,
    SetHighTemp,
    SetLowTemp,
    SetMode,
    SetPower,
}

impl CommandKind {
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            SUFFIX_SET_TARGET_TEMP => Some(Self::SetTargetTemp),
            SUFFIX_SET_HIGH_TEMP => Some(Self::SetHighTemp),
            SUFFIX_SET_LOW_TEMP => Some(Self::SetLowTemp),
            SUFFIX_SET_MODE => Some(Self::SetMode),
            SUFFIX_SET_POWER => Some(Self::SetPower),
            _ => None,
        }
    }

    /// Setpoint field written by this command; `set_power` writes none.
    pub fn field(self) -> Option<SetpointField> {
        match self {
            Self::SetTargetTemp => Some(SetpointField::TargetTemp),
            Self::SetHighTemp => Some(SetpointField::HighTemp),
            Self::SetLowTemp => Some(SetpointField::LowTemp),
            Self::SetMode => Some(SetpointField::Mode),
            Self::SetPower => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Another device's topic, a foreign namespace, or our own output.
    Ignored,
    Command(CommandKind),
    Unknown(&'a str),
}

pub fn route<'a>(topic: &'a str, topic_base: &str) -> Route<'a> {
    if !topic.starts_with(TOPIC_PREFIX) {
        return Route::Ignored;
    }
    let Some(suffix) = topic.strip_prefix(topic_base) else {
        return Route::Ignored;
    };
    if suffix == SUFFIX_STATE || suffix == SUFFIX_ATTRIBUTES {
        return Route::Ignored;
    }
    match CommandKind::from_suffix(suffix) {
        Some(kind) => Route::Command(kind),
        None => Route::Unknown(suffix),
    }
}

pub fn decode_payload(payload: &[u8]) -> Result<&str, CommandError> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(CommandError::PayloadTooLarge(payload.len()));
    }
    std::str::from_utf8(payload).map_err(|_| CommandError::NotUtf8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Updated(SetpointField),
    /// `set_power` is accepted so the platform's power toggle does not error,
    /// but it changes nothing; mode is the only on/off control.
    PowerAcknowledged,
}

pub fn execute(
    kind: CommandKind,
    raw: &str,
    setpoint: &mut Setpoint,
    limits: TemperatureLimits,
) -> Result<Outcome, CommandError> {
    match kind.field() {
        Some(field) => {
            setpoint.apply_command(field, raw, limits)?;
            Ok(Outcome::Updated(field))
        }
        None => Ok(Outcome::PowerAcknowledged),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HvacMode;

    const BASE: &str = "virtual_thermostat/hall/";

    #[test]
    fn routes_known_suffixes() {
        let cases = [
            ("set_target_temp", CommandKind::SetTargetTemp),
            ("set_high_temp", CommandKind::SetHighTemp),
            ("set_low_temp", CommandKind::SetLowTemp),
            ("set_mode", CommandKind::SetMode),
            ("set_power", CommandKind::SetPower),
        ];
        for (suffix, kind) in cases {
            let topic = format!("{BASE}{suffix}");
            assert_eq!(route(&topic, BASE), Route::Command(kind));
        }
    }

    #[test]
    fn ignores_own_output_and_foreign_topics() {
        assert_eq!(route("virtual_thermostat/hall/state", BASE), Route::Ignored);
        assert_eq!(route("virtual_thermostat/hall/attributes", BASE), Route::Ignored);
        assert_eq!(
            route("virtual_thermostat/office/set_mode", BASE),
            Route::Ignored
        );
        assert_eq!(route("zigbee2mqtt/hall/set_mode", BASE), Route::Ignored);
    }

    #[test]
    fn reports_unknown_suffix_in_own_namespace() {
        assert_eq!(
            route("virtual_thermostat/hall/set_fan_mode", BASE),
            Route::Unknown("set_fan_mode")
        );
    }

    #[test]
    fn rejects_oversized_and_binary_payloads() {
        assert_eq!(decode_payload(b"21.5"), Ok("21.5"));
        assert_eq!(
            decode_payload(&[b'1'; MAX_PAYLOAD_BYTES + 1]),
            Err(CommandError::PayloadTooLarge(MAX_PAYLOAD_BYTES + 1))
        );
        assert_eq!(decode_payload(&[0xff, 0xfe]), Err(CommandError::NotUtf8));
    }

    #[test]
    fn set_power_leaves_setpoint_alone() {
        let mut setpoint = Setpoint {
            mode: HvacMode::Heat,
            ..Setpoint::default()
        };
        let before = setpoint.clone();

        let outcome = execute(
            CommandKind::SetPower,
            "OFF",
            &mut setpoint,
            TemperatureLimits::default(),
        )
        .unwrap();

        assert_eq!(outcome, Outcome::PowerAcknowledged);
        assert_eq!(setpoint, before);
    }

    #[test]
    fn execute_updates_the_matching_field() {
        let mut setpoint = Setpoint::default();

        let outcome = execute(
            CommandKind::SetMode,
            "heat",
            &mut setpoint,
            TemperatureLimits::default(),
        )
        .unwrap();

        assert_eq!(outcome, Outcome::Updated(SetpointField::Mode));
        assert_eq!(setpoint.mode, HvacMode::Heat);
    }
}
