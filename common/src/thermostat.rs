use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    actuator::{self, ApplyReport},
    command::{self, Outcome, Route},
    config::{ConfigError, ThermostatConfig},
    discovery::{DeviceIdentity, DiscoveryConfig},
    host::{Host, Transport},
    hysteresis,
    publisher::{self, PublishError},
    sensor::{self, AggregatedReading},
    setpoint::{CommandError, Setpoint},
    topics::{discovery_topic, topic_base},
    types::{ControllerDecision, SwitchState},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub reading: AggregatedReading,
    pub decision: ControllerDecision,
    pub actuators: ApplyReport,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Ignored,
    Unknown,
    Rejected(CommandError),
    Applied(Outcome),
}

impl MessageOutcome {
    pub fn requires_evaluation(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

#[derive(Debug, Clone)]
pub struct ThermostatEngine {
    config: ThermostatConfig,
    identity: DeviceIdentity,
    topic_base: String,
    setpoint: Setpoint,
    switches: Vec<String>,
    switch_state: SwitchState,
}

impl ThermostatEngine {
    /// Keeps the configured switches the host knows about; at least one must
    /// exist. The first switch's reported state seeds the hysteresis memory.
    pub fn new<H: Host + ?Sized>(
        config: ThermostatConfig,
        mut setpoint: Setpoint,
        host: &H,
    ) -> Result<Self, ConfigError> {
        let switches: Vec<String> = config
            .heat_switches
            .iter()
            .filter(|entity_id| {
                let exists = host.entity_exists(entity_id);
                if !exists {
                    error!("{entity_id} does not exist, skipping");
                }
                exists
            })
            .cloned()
            .collect();

        let Some(first) = switches.first() else {
            return Err(ConfigError::NoActuators);
        };
        let switch_state = host
            .state(first, None)
            .ok()
            .and_then(|state| SwitchState::parse(&state))
            .unwrap_or_default();
        debug!(?switches, initial = switch_state.as_str(), "switches configured");

        setpoint.sanitize(config.limits);

        Ok(Self {
            identity: DeviceIdentity::new(&config.device_id, &config.friendly_name),
            topic_base: topic_base(&config.device_id),
            config,
            setpoint,
            switches,
            switch_state,
        })
    }

    pub fn config(&self) -> &ThermostatConfig {
        &self.config
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn setpoint(&self) -> &Setpoint {
        &self.setpoint
    }

    pub fn switches(&self) -> &[String] {
        &self.switches
    }

    pub fn switch_state(&self) -> SwitchState {
        self.switch_state
    }

    pub fn announce<T: Transport + ?Sized>(
        &self,
        transport: &T,
        discovery_prefix: &str,
    ) -> Result<(), PublishError> {
        let topic = discovery_topic(discovery_prefix, &self.identity.device_id);
        let document = DiscoveryConfig::new(&self.identity, self.config.limits);
        transport
            .publish(&topic, serde_json::to_vec(&document)?, false)
            .map_err(|source| PublishError::Transport {
                topic: topic.clone(),
                source,
            })?;
        info!(%topic, "published discovery config for {}", self.identity.friendly_name);
        Ok(())
    }

    /// Aggregates sensors, decides, and drives every switch.
    pub fn evaluate<H: Host + ?Sized>(&mut self, host: &H, now: DateTime<Utc>) -> Evaluation {
        let reading = sensor::aggregate(&self.config.sensors, now, self.config.max_age, host);
        let decision = hysteresis::decide(
            &reading,
            self.setpoint.mode,
            self.setpoint.target_temp,
            self.config.max_interval,
            self.switch_state,
        );
        let actuators = actuator::apply(&self.switches, decision.actuator_state, host);
        self.switch_state = decision.actuator_state;

        debug!(
            temperature = reading.current_temperature,
            valid_sensors = reading.valid_count,
            target = self.setpoint.target_temp,
            mode = self.setpoint.mode.as_str(),
            action = decision.action_label.as_str(),
            "evaluated"
        );

        Evaluation {
            reading,
            decision,
            actuators,
        }
    }

    /// One full cycle: evaluate, then publish state and attributes.
    /// Publish failures are logged, never returned.
    pub fn run_cycle<H, T>(&mut self, host: &H, transport: &T, now: DateTime<Utc>) -> Evaluation
    where
        H: Host + ?Sized,
        T: Transport + ?Sized,
    {
        let evaluation = self.evaluate(host, now);
        if let Err(err) = publisher::publish(
            transport,
            &self.identity.device_id,
            &evaluation.reading,
            &evaluation.decision,
            &self.setpoint,
        ) {
            warn!("state publish failed: {err}");
        }
        evaluation
    }

    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) -> MessageOutcome {
        let kind = match command::route(topic, &self.topic_base) {
            Route::Ignored => return MessageOutcome::Ignored,
            Route::Unknown(suffix) => {
                info!("no handler found for topic ~{suffix}");
                return MessageOutcome::Unknown;
            }
            Route::Command(kind) => kind,
        };

        let result = command::decode_payload(payload).and_then(|raw| {
            command::execute(kind, raw, &mut self.setpoint, self.config.limits)
        });
        match result {
            Ok(outcome) => {
                debug!(?kind, ?outcome, setpoint = ?self.setpoint, "command applied");
                MessageOutcome::Applied(outcome)
            }
            Err(err) => {
                warn!(%topic, "rejected command: {err}");
                MessageOutcome::Rejected(err)
            }
        }
    }
}
