pub mod actuator;
pub mod command;
pub mod config;
pub mod discovery;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod host;
pub mod hysteresis;
pub mod publisher;
pub mod sensor;
pub mod setpoint;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use config::{
    AppConfig, ConfigError, MqttConfig, RawThermostatConfig, StatestreamConfig,
    TemperatureLimits, ThermostatConfig, TimingConfig,
};
pub use discovery::{DeviceIdentity, DiscoveryConfig};
pub use host::{Host, HostError, Transport};
pub use publisher::PublishError;
pub use sensor::{AggregatedReading, SensorRef, SensorStatus};
pub use setpoint::{CommandError, Setpoint};
pub use thermostat::{Evaluation, MessageOutcome, ThermostatEngine};
pub use topics::*;
pub use types::{ControllerDecision, HvacAction, HvacMode, SwitchState};
