//! Entity mirror fed by Home Assistant's `mqtt_statestream` integration.
//!
//! Entity data arrives as `<base>/<domain>/<object_id>/<leaf>`: the `state`
//! leaf carries the raw state, `last_updated` an RFC 3339 timestamp, and any
//! other leaf one JSON-encoded attribute. Switches are driven by publishing
//! service requests under the configured service topic.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard},
};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;

use virtual_thermostat_common::{Host, HostError, StatestreamConfig, SwitchState, Transport};

const LEAF_STATE: &str = "state";
const LEAF_LAST_UPDATED: &str = "last_updated";

#[derive(Debug, Default, Clone)]
struct CachedEntity {
    state: Option<String>,
    last_updated: Option<DateTime<Utc>>,
    attributes: HashMap<String, String>,
}

pub struct StatestreamHost<T> {
    transport: T,
    base_topic: String,
    service_topic: String,
    entities: RwLock<HashMap<String, CachedEntity>>,
}

impl<T: Transport> StatestreamHost<T> {
    pub fn new(transport: T, config: &StatestreamConfig) -> Self {
        Self {
            transport,
            base_topic: config.base_topic.trim_end_matches('/').to_string(),
            service_topic: config.service_topic.trim_end_matches('/').to_string(),
            entities: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscription(&self) -> String {
        format!("{}/#", self.base_topic)
    }

    pub fn handles(&self, topic: &str) -> bool {
        topic
            .strip_prefix(&self.base_topic)
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Folds one statestream message into the cache. Returns the entity id
    /// when a known entity changed.
    pub fn ingest(&self, topic: &str, payload: &[u8], now: DateTime<Utc>) -> Option<String> {
        let rest = topic.strip_prefix(&self.base_topic)?.strip_prefix('/')?;
        let mut parts = rest.splitn(3, '/');
        let (domain, object_id, leaf) = (parts.next()?, parts.next()?, parts.next()?);
        if domain.is_empty() || object_id.is_empty() || leaf.is_empty() || leaf.contains('/') {
            return None;
        }

        let entity_id = format!("{domain}.{object_id}");
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();

        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if leaf == LEAF_STATE && text.is_empty() {
            let removed = entities.remove(&entity_id)?;
            debug!(%entity_id, "entity removed");
            return removed.state.map(|_| entity_id);
        }

        let entity = entities.entry(entity_id.clone()).or_default();
        match leaf {
            LEAF_STATE => {
                // A timestamp seen before the first state belongs to that state.
                let keep_timestamp = entity.state.is_none() && entity.last_updated.is_some();
                entity.state = Some(text.to_string());
                if !keep_timestamp {
                    entity.last_updated = Some(now);
                }
            }
            LEAF_LAST_UPDATED => match parse_timestamp(text) {
                Some(timestamp) => entity.last_updated = Some(timestamp),
                None => debug!(%entity_id, "ignoring unparsable timestamp {text:?}"),
            },
            attribute => {
                entity
                    .attributes
                    .insert(attribute.to_string(), attribute_value(text));
            }
        }

        entity.state.is_some().then_some(entity_id)
    }

    fn entities(&self) -> RwLockReadGuard<'_, HashMap<String, CachedEntity>> {
        self.entities.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_entity<R>(
        &self,
        entity_id: &str,
        read: impl FnOnce(&CachedEntity) -> Result<R, HostError>,
    ) -> Result<R, HostError> {
        match self.entities().get(entity_id) {
            Some(entity) if entity.state.is_some() => read(entity),
            _ => Err(HostError::EntityNotFound(entity_id.to_string())),
        }
    }
}

impl<T: Transport> Host for StatestreamHost<T> {
    fn entity_exists(&self, entity_id: &str) -> bool {
        self.with_entity(entity_id, |_| Ok(())).is_ok()
    }

    fn state(&self, entity_id: &str, attribute: Option<&str>) -> Result<String, HostError> {
        self.with_entity(entity_id, |entity| match attribute {
            None => Ok(entity.state.clone().unwrap_or_default()),
            Some(name) => {
                entity
                    .attributes
                    .get(name)
                    .cloned()
                    .ok_or_else(|| HostError::AttributeNotFound {
                        entity_id: entity_id.to_string(),
                        attribute: name.to_string(),
                    })
            }
        })
    }

    fn last_updated(&self, entity_id: &str) -> Result<DateTime<Utc>, HostError> {
        self.with_entity(entity_id, |entity| {
            entity
                .last_updated
                .ok_or_else(|| HostError::InvalidTimestamp(entity_id.to_string()))
        })
    }

    fn set_switch(&self, entity_id: &str, state: SwitchState) -> Result<(), HostError> {
        let domain = entity_id
            .split_once('.')
            .map_or("homeassistant", |(domain, _)| domain);
        let topic = format!("{}/{domain}/{}", self.service_topic, state.service());
        let payload = serde_json::to_vec(&json!({ "entity_id": entity_id }))
            .map_err(|err| HostError::Request(err.to_string()))?;
        debug!(%topic, %entity_id, "calling switch service");
        self.transport.publish(&topic, payload, false)
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let raw = serde_json::from_str::<String>(text).unwrap_or_else(|_| text.to_string());
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

fn attribute_value(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(value)) => value,
        Ok(value) => value.to_string(),
        Err(_) => text.to_string(),
    }
}
