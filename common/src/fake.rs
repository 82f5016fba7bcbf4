//! In-memory `Host` and `Transport` used by tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

use chrono::{DateTime, Utc};

use crate::{
    host::{Host, HostError, Transport},
    types::SwitchState,
};

#[derive(Debug, Clone)]
struct FakeEntity {
    state: String,
    attributes: BTreeMap<String, String>,
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct FakeHost {
    entities: Mutex<BTreeMap<String, FakeEntity>>,
    switch_calls: Mutex<Vec<(String, SwitchState)>>,
    failing_switches: Mutex<BTreeSet<String>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, entity_id: &str, state: &str, last_updated: DateTime<Utc>) {
        let mut entities = self.entities.lock().unwrap();
        let entity = entities
            .entry(entity_id.to_string())
            .or_insert_with(|| FakeEntity {
                state: String::new(),
                attributes: BTreeMap::new(),
                last_updated: None,
            });
        entity.state = state.to_string();
        entity.last_updated = Some(last_updated);
    }

    /// Registers an entity whose timestamp cannot be read.
    pub fn set_state_without_timestamp(&self, entity_id: &str, state: &str) {
        self.entities.lock().unwrap().insert(
            entity_id.to_string(),
            FakeEntity {
                state: state.to_string(),
                attributes: BTreeMap::new(),
                last_updated: None,
            },
        );
    }

    pub fn set_attribute(&self, entity_id: &str, attribute: &str, value: &str) {
        if let Some(entity) = self.entities.lock().unwrap().get_mut(entity_id) {
            entity
                .attributes
                .insert(attribute.to_string(), value.to_string());
        }
    }

    pub fn remove(&self, entity_id: &str) {
        self.entities.lock().unwrap().remove(entity_id);
    }

    pub fn fail_switch(&self, entity_id: &str) {
        self.failing_switches
            .lock()
            .unwrap()
            .insert(entity_id.to_string());
    }

    pub fn switch_calls(&self) -> Vec<(String, SwitchState)> {
        self.switch_calls.lock().unwrap().clone()
    }
}

impl Host for FakeHost {
    fn entity_exists(&self, entity_id: &str) -> bool {
        self.entities.lock().unwrap().contains_key(entity_id)
    }

    fn state(&self, entity_id: &str, attribute: Option<&str>) -> Result<String, HostError> {
        let entities = self.entities.lock().unwrap();
        let entity = entities
            .get(entity_id)
            .ok_or_else(|| HostError::EntityNotFound(entity_id.to_string()))?;
        match attribute {
            None => Ok(entity.state.clone()),
            Some(name) => entity.attributes.get(name).cloned().ok_or_else(|| {
                HostError::AttributeNotFound {
                    entity_id: entity_id.to_string(),
                    attribute: name.to_string(),
                }
            }),
        }
    }

    fn last_updated(&self, entity_id: &str) -> Result<DateTime<Utc>, HostError> {
        self.entities
            .lock()
            .unwrap()
            .get(entity_id)
            .and_then(|entity| entity.last_updated)
            .ok_or_else(|| HostError::InvalidTimestamp(entity_id.to_string()))
    }

    fn set_switch(&self, entity_id: &str, state: SwitchState) -> Result<(), HostError> {
        self.switch_calls
            .lock()
            .unwrap()
            .push((entity_id.to_string(), state));
        if self.failing_switches.lock().unwrap().contains(entity_id) {
            return Err(HostError::Request(format!("{entity_id} unavailable")));
        }
        if let Some(entity) = self.entities.lock().unwrap().get_mut(entity_id) {
            entity.state = state.as_str().to_string();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    published: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<String>>,
    unsubscriptions: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|message| message.topic == topic)
            .map(|message| message.payload.clone())
            .collect()
    }

    pub fn last_json(&self, topic: &str) -> Option<serde_json::Value> {
        self.published_on(topic)
            .last()
            .and_then(|payload| serde_json::from_str(payload).ok())
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        self.unsubscriptions.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), HostError> {
        self.published.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
            retain,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), HostError> {
        self.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), HostError> {
        self.unsubscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }
}
