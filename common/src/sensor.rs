use std::{collections::BTreeMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::host::Host;

pub const MSG_ENTITY_NOT_FOUND: &str = "Entity not found";
pub const MSG_UNREADABLE: &str = "Unable to read sensor state";

/// A temperature source: an entity's state, or one of its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorRef {
    pub entity_id: String,
    pub attribute: Option<String>,
}

impl SensorRef {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            attribute: None,
        }
    }

    pub fn with_attribute(entity_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            attribute: Some(attribute.into()),
        }
    }

    /// Parses either `sensor.id` or the compound `sensor.id,attribute` form.
    pub fn parse(raw: &str) -> Option<Self> {
        let (entity, attribute) = match raw.split_once(',') {
            Some((entity, attribute)) => (entity.trim(), Some(attribute.trim())),
            None => (raw.trim(), None),
        };
        if entity.is_empty() {
            return None;
        }
        Some(match attribute.filter(|attribute| !attribute.is_empty()) {
            Some(attribute) => Self::with_attribute(entity, attribute),
            None => Self::new(entity),
        })
    }

    /// Key used for this sensor in the published diagnostics.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SensorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attribute {
            Some(attribute) => write!(f, "{},{}", self.entity_id, attribute),
            None => f.write_str(&self.entity_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorStatus {
    pub value: Option<f32>,
    pub valid: bool,
    pub message: Option<String>,
    pub seconds_since_update: Option<i64>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedReading {
    pub current_temperature: f32,
    pub valid_count: usize,
    pub max_age_minutes: f32,
    pub per_sensor: BTreeMap<String, SensorStatus>,
}

impl AggregatedReading {
    pub fn has_data(&self) -> bool {
        self.valid_count > 0
    }
}

/// Reads every sensor and averages the ones that are present, numeric and
/// fresher than `max_age`.
///
/// With one valid sensor its value passes through untouched; with none the
/// temperature is `0.0` and `valid_count` is zero, which callers must treat
/// as "no data".
pub fn aggregate<H: Host + ?Sized>(
    sensors: &[SensorRef],
    now: DateTime<Utc>,
    max_age: Duration,
    host: &H,
) -> AggregatedReading {
    let mut per_sensor = BTreeMap::new();
    let mut sum = 0.0_f32;
    let mut valid_count = 0;

    for sensor in sensors {
        let status = read_sensor(sensor, now, max_age, host);
        if status.valid {
            if let Some(value) = status.value {
                sum += value;
                valid_count += 1;
            }
        } else {
            debug!(
                sensor = %sensor,
                reason = status.message.as_deref().unwrap_or("unknown"),
                "sensor excluded from aggregation"
            );
        }
        per_sensor.insert(sensor.key(), status);
    }

    let mut temperature = sum;
    if valid_count > 1 {
        temperature /= valid_count as f32;
    }

    AggregatedReading {
        current_temperature: round_tenth(temperature),
        valid_count,
        max_age_minutes: max_age.as_secs_f32() / 60.0,
        per_sensor,
    }
}

fn read_sensor<H: Host + ?Sized>(
    sensor: &SensorRef,
    now: DateTime<Utc>,
    max_age: Duration,
    host: &H,
) -> SensorStatus {
    let mut status = SensorStatus::default();

    if !host.entity_exists(&sensor.entity_id) {
        status.message = Some(MSG_ENTITY_NOT_FOUND.to_string());
        return status;
    }

    let last_updated = match host.last_updated(&sensor.entity_id) {
        Ok(last_updated) => last_updated,
        Err(err) => {
            status.message = Some(err.to_string());
            return status;
        }
    };

    // Wall-clock age; a timestamp from the future reads as zero.
    let age_secs = (now - last_updated).num_seconds().max(0);
    status.last_updated = Some(last_updated);
    status.seconds_since_update = Some(age_secs);

    let mut valid = true;
    if age_secs as f64 > max_age.as_secs_f64() {
        valid = false;
        status.message = Some(format!(
            "Too old data: last updated {} minutes ago",
            age_secs / 60
        ));
    }

    match host.state(&sensor.entity_id, sensor.attribute.as_deref()) {
        Ok(raw) => match parse_temperature(&raw) {
            Some(value) => status.value = Some(value),
            None => {
                valid = false;
                status
                    .message
                    .get_or_insert_with(|| MSG_UNREADABLE.to_string());
            }
        },
        Err(err) => {
            valid = false;
            status.message.get_or_insert_with(|| err.to_string());
        }
    }

    status.valid = valid;
    status
}

fn parse_temperature(raw: &str) -> Option<f32> {
    raw.trim()
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
}

pub(crate) fn round_tenth(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}
