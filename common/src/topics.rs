pub const TOPIC_PREFIX: &str = "virtual_thermostat/";

pub const SUFFIX_STATE: &str = "state";
pub const SUFFIX_ATTRIBUTES: &str = "attributes";

pub const SUFFIX_SET_TARGET_TEMP: &str = "set_target_temp";
pub const SUFFIX_SET_HIGH_TEMP: &str = "set_high_temp";
pub const SUFFIX_SET_LOW_TEMP: &str = "set_low_temp";
pub const SUFFIX_SET_MODE: &str = "set_mode";
pub const SUFFIX_SET_POWER: &str = "set_power";

/// `virtual_thermostat/<device_id>/`, the `~` of the discovery document.
pub fn topic_base(device_id: &str) -> String {
    format!("{TOPIC_PREFIX}{device_id}/")
}

pub fn state_topic(device_id: &str) -> String {
    format!("{}{SUFFIX_STATE}", topic_base(device_id))
}

pub fn attributes_topic(device_id: &str) -> String {
    format!("{}{SUFFIX_ATTRIBUTES}", topic_base(device_id))
}

/// Wildcard covering every inbound command of one device.
pub fn command_subscription(device_id: &str) -> String {
    format!("{}#", topic_base(device_id))
}

pub fn discovery_topic(discovery_prefix: &str, device_id: &str) -> String {
    format!(
        "{}/climate/{device_id}/config",
        discovery_prefix.trim_end_matches('/')
    )
}
