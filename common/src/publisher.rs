use thiserror::Error;
use tracing::debug;

use crate::{
    host::{HostError, Transport},
    sensor::AggregatedReading,
    setpoint::Setpoint,
    topics::{attributes_topic, state_topic},
    types::{AttributesPayload, ControllerDecision, StatePayload},
};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to publish {topic}: {source}")]
    Transport { topic: String, source: HostError },
}

pub fn state_payload(
    reading: &AggregatedReading,
    decision: &ControllerDecision,
    setpoint: &Setpoint,
) -> StatePayload {
    StatePayload {
        current_temperature: reading.current_temperature,
        target_temp: setpoint.target_temp,
        action: decision.action_label.as_str(),
        mode: setpoint.mode.as_str(),
    }
}

pub fn attributes_payload(reading: &AggregatedReading) -> AttributesPayload {
    AttributesPayload {
        sensor_data: reading.per_sensor.clone(),
        valid_sensors: reading.valid_count,
        max_age: reading.max_age_minutes,
    }
}

/// Publishes the `state` record followed by the `attributes` record.
pub fn publish<T: Transport + ?Sized>(
    transport: &T,
    device_id: &str,
    reading: &AggregatedReading,
    decision: &ControllerDecision,
    setpoint: &Setpoint,
) -> Result<(), PublishError> {
    let state = state_payload(reading, decision, setpoint);
    send(transport, state_topic(device_id), serde_json::to_vec(&state)?)?;
    debug!(?state, "state published");

    let attributes = attributes_payload(reading);
    send(
        transport,
        attributes_topic(device_id),
        serde_json::to_vec(&attributes)?,
    )
}

fn send<T: Transport + ?Sized>(
    transport: &T,
    topic: String,
    payload: Vec<u8>,
) -> Result<(), PublishError> {
    transport
        .publish(&topic, payload, false)
        .map_err(|source| PublishError::Transport { topic, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fake::FakeTransport,
        sensor::SensorStatus,
        types::{HvacAction, HvacMode, SwitchState},
    };
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn reading() -> AggregatedReading {
        let mut per_sensor = BTreeMap::new();
        per_sensor.insert(
            "sensor.hall".to_string(),
            SensorStatus {
                value: Some(17.0),
                valid: true,
                message: None,
                seconds_since_update: Some(42),
                last_updated: Some(Utc.with_ymd_and_hms(2026, 1, 10, 11, 59, 18).unwrap()),
            },
        );
        per_sensor.insert(
            "sensor.attic".to_string(),
            SensorStatus {
                message: Some("Entity not found".to_string()),
                ..SensorStatus::default()
            },
        );
        AggregatedReading {
            current_temperature: 17.0,
            valid_count: 1,
            max_age_minutes: 30.0,
            per_sensor,
        }
    }

    #[test]
    fn publishes_state_then_attributes() {
        let transport = FakeTransport::new();
        let decision = ControllerDecision {
            actuator_state: SwitchState::On,
            action_label: HvacAction::Heating,
        };
        let setpoint = Setpoint {
            mode: HvacMode::Heat,
            ..Setpoint::default()
        };

        publish(&transport, "hall", &reading(), &decision, &setpoint).unwrap();

        let topics: Vec<String> = transport
            .published()
            .into_iter()
            .map(|message| message.topic)
            .collect();
        assert_eq!(
            topics,
            vec![
                "virtual_thermostat/hall/state",
                "virtual_thermostat/hall/attributes"
            ]
        );

        assert_eq!(
            transport.last_json("virtual_thermostat/hall/state").unwrap(),
            json!({
                "current_temperature": 17.0,
                "target_temp": 18.0,
                "action": "heating",
                "mode": "heat",
            })
        );
        assert_eq!(
            transport
                .last_json("virtual_thermostat/hall/attributes")
                .unwrap(),
            json!({
                "sensor_data": {
                    "sensor.attic": {
                        "value": null,
                        "valid": false,
                        "message": "Entity not found",
                        "seconds_since_update": null,
                        "last_updated": null,
                    },
                    "sensor.hall": {
                        "value": 17.0,
                        "valid": true,
                        "message": null,
                        "seconds_since_update": 42,
                        "last_updated": "2026-01-10T11:59:18Z",
                    },
                },
                "valid_sensors": 1,
                "max_age": 30.0,
            })
        );
    }
}
