use crate::{
    sensor::AggregatedReading,
    types::{ControllerDecision, HvacAction, HvacMode, SwitchState},
};

/// Dead-band limits around a target: `(lowest, highest)`.
pub fn band(target: f32, max_interval: f32) -> (f32, f32) {
    let half = max_interval / 2.0;
    (target - half, target + half)
}

/// On/off decision for one evaluation cycle.
///
/// Below `lowest` heats, at or above `highest` stops, and anywhere in between
/// keeps `current`. Mode off or an empty reading always yields off.
pub fn decide(
    reading: &AggregatedReading,
    mode: HvacMode,
    target: f32,
    max_interval: f32,
    current: SwitchState,
) -> ControllerDecision {
    if mode == HvacMode::Off || !reading.has_data() {
        return ControllerDecision::OFF;
    }

    let (lowest, highest) = band(target, max_interval);
    let temperature = reading.current_temperature;

    let actuator_state = if temperature < lowest {
        SwitchState::On
    } else if temperature >= highest {
        SwitchState::Off
    } else {
        current
    };

    let action_label = match actuator_state {
        SwitchState::On => HvacAction::Heating,
        SwitchState::Off => HvacAction::Idle,
    };

    ControllerDecision {
        actuator_state,
        action_label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const TARGET: f32 = 18.0;
    const INTERVAL: f32 = 0.8;

    fn reading(temperature: f32, valid_count: usize) -> AggregatedReading {
        AggregatedReading {
            current_temperature: temperature,
            valid_count,
            max_age_minutes: 30.0,
            per_sensor: BTreeMap::new(),
        }
    }

    fn heat(temperature: f32, current: SwitchState) -> ControllerDecision {
        decide(
            &reading(temperature, 1),
            HvacMode::Heat,
            TARGET,
            INTERVAL,
            current,
        )
    }

    #[test]
    fn cold_room_turns_heating_on() {
        let decision = heat(17.0, SwitchState::Off);
        assert_eq!(decision.actuator_state, SwitchState::On);
        assert_eq!(decision.action_label, HvacAction::Heating);
    }

    #[test]
    fn warm_room_turns_heating_off() {
        let decision = heat(18.5, SwitchState::On);
        assert_eq!(decision.actuator_state, SwitchState::Off);
        assert_eq!(decision.action_label, HvacAction::Idle);
    }

    #[test]
    fn inside_band_keeps_previous_state() {
        for current in [SwitchState::On, SwitchState::Off] {
            for temperature in [17.7, 18.0, 18.3] {
                assert_eq!(heat(temperature, current).actuator_state, current);
            }
        }
        assert_eq!(heat(18.0, SwitchState::On).action_label, HvacAction::Heating);
        assert_eq!(heat(18.0, SwitchState::Off).action_label, HvacAction::Idle);
    }

    #[test]
    fn upper_boundary_is_inclusive_off() {
        let (_, highest) = band(TARGET, INTERVAL);
        assert_eq!(heat(highest, SwitchState::On).actuator_state, SwitchState::Off);
    }

    #[test]
    fn lower_boundary_alone_does_not_turn_on() {
        let (lowest, _) = band(TARGET, INTERVAL);
        assert_eq!(heat(lowest, SwitchState::Off).actuator_state, SwitchState::Off);
        assert_eq!(heat(lowest, SwitchState::On).actuator_state, SwitchState::On);

        let just_below = lowest - 0.01;
        assert_eq!(heat(just_below, SwitchState::Off).actuator_state, SwitchState::On);
    }

    #[test]
    fn no_valid_sensors_forces_off_in_any_mode() {
        for mode in [HvacMode::Heat, HvacMode::Off] {
            for current in [SwitchState::On, SwitchState::Off] {
                let decision = decide(&reading(0.0, 0), mode, TARGET, INTERVAL, current);
                assert_eq!(decision, ControllerDecision::OFF);
            }
        }
    }

    #[test]
    fn mode_off_ignores_temperature() {
        let decision = decide(
            &reading(5.0, 2),
            HvacMode::Off,
            TARGET,
            INTERVAL,
            SwitchState::On,
        );
        assert_eq!(decision, ControllerDecision::OFF);
    }

    #[test]
    fn repeated_cycles_inside_band_are_stable() {
        let mut state = heat(17.0, SwitchState::Off).actuator_state;
        for temperature in [17.7, 17.9, 18.1, 18.3, 17.8] {
            let next = heat(temperature, state).actuator_state;
            assert_eq!(next, state);
            state = next;
        }
        assert_eq!(state, SwitchState::On);
    }
}
