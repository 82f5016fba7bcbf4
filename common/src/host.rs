//! Seams to the home-automation platform and the pub/sub transport.
//!
//! Both traits are synchronous: implementations either answer from a local
//! cache or enqueue a request without waiting for it to complete, so the
//! engine never suspends while evaluating.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::SwitchState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("entity {0} not found")]
    EntityNotFound(String),
    #[error("attribute '{attribute}' not found on {entity_id}")]
    AttributeNotFound { entity_id: String, attribute: String },
    #[error("entity {0} has no usable last-updated timestamp")]
    InvalidTimestamp(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// Entity registry, state store and service invocation of the host platform.
pub trait Host {
    fn entity_exists(&self, entity_id: &str) -> bool;

    /// Raw state of an entity, or of one of its attributes.
    fn state(&self, entity_id: &str, attribute: Option<&str>) -> Result<String, HostError>;

    fn last_updated(&self, entity_id: &str) -> Result<DateTime<Utc>, HostError>;

    fn set_switch(&self, entity_id: &str, state: SwitchState) -> Result<(), HostError>;
}

pub trait Transport {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), HostError>;

    fn subscribe(&self, topic: &str) -> Result<(), HostError>;

    fn unsubscribe(&self, topic: &str) -> Result<(), HostError>;
}

impl<T: Host + ?Sized> Host for Arc<T> {
    fn entity_exists(&self, entity_id: &str) -> bool {
        (**self).entity_exists(entity_id)
    }

    fn state(&self, entity_id: &str, attribute: Option<&str>) -> Result<String, HostError> {
        (**self).state(entity_id, attribute)
    }

    fn last_updated(&self, entity_id: &str) -> Result<DateTime<Utc>, HostError> {
        (**self).last_updated(entity_id)
    }

    fn set_switch(&self, entity_id: &str, state: SwitchState) -> Result<(), HostError> {
        (**self).set_switch(entity_id, state)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), HostError> {
        (**self).publish(topic, payload, retain)
    }

    fn subscribe(&self, topic: &str) -> Result<(), HostError> {
        (**self).subscribe(topic)
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), HostError> {
        (**self).unsubscribe(topic)
    }
}
