use std::{collections::BTreeSet, future, pin::Pin, time::Duration};

use chrono::Utc;
use tokio::{
    sync::mpsc,
    time::{interval_at, sleep, Instant, Sleep},
};
use tracing::{debug, info, warn};

use virtual_thermostat_common::{
    command_subscription, ConfigError, Host, ThermostatConfig, ThermostatEngine, TimingConfig,
    Transport,
};

use crate::store::SetpointStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A host entity changed state, timestamp or attributes.
    EntityChanged(String),
    Message { topic: String, payload: Vec<u8> },
    Reconnected,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub discovery_prefix: String,
    pub timing: TimingConfig,
}

type Timer = Option<Pin<Box<Sleep>>>;

fn arm(after: Duration) -> Timer {
    Some(Box::pin(sleep(after)))
}

async fn expired(timer: &mut Timer) {
    match timer {
        Some(deadline) => deadline.as_mut().await,
        None => future::pending().await,
    }
}

/// One thermostat: the engine plus its timers, driven by a single task.
pub struct Instance<H, T> {
    engine: ThermostatEngine,
    host: H,
    transport: T,
    store: SetpointStore,
    settings: InstanceSettings,
    command_topic: String,
    listening: BTreeSet<String>,
    unresolved: BTreeSet<String>,
}

impl<H: Host, T: Transport> Instance<H, T> {
    /// Loads the setpoint, announces the device, subscribes to its commands,
    /// registers sensor listeners and publishes the first state.
    pub async fn start(
        config: ThermostatConfig,
        host: H,
        transport: T,
        store: SetpointStore,
        settings: InstanceSettings,
    ) -> Result<Self, ConfigError> {
        let setpoint = store.load_or_default().await;
        let engine = ThermostatEngine::new(config, setpoint, &host)?;
        let command_topic = command_subscription(&engine.config().device_id);
        let unresolved = engine
            .config()
            .sensors
            .iter()
            .map(|sensor| sensor.entity_id.clone())
            .collect();

        let mut instance = Self {
            engine,
            host,
            transport,
            store,
            settings,
            command_topic,
            listening: BTreeSet::new(),
            unresolved,
        };

        if let Err(err) = instance
            .engine
            .announce(&instance.transport, &instance.settings.discovery_prefix)
        {
            warn!("discovery publish failed: {err}");
        }
        instance.subscribe();
        instance.register_listeners();
        instance.cycle();

        info!(
            name = %instance.engine.identity().friendly_name,
            switches = ?instance.engine.switches(),
            "thermostat started"
        );
        Ok(instance)
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        let timing = self.settings.timing.clone();
        let mut watchdog = arm(timing.publish_watchdog());
        let mut retry = self.retry_timer();
        let persist_period = timing.persist_interval();
        let mut persist = interval_at(Instant::now() + persist_period, persist_period);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(Event::EntityChanged(entity_id)) => {
                        if self.listening.contains(&entity_id) {
                            debug!(%entity_id, "sensor changed");
                            self.cycle();
                            watchdog = arm(timing.publish_watchdog());
                        }
                    }
                    Some(Event::Message { topic, payload }) => {
                        if self.engine.handle_message(&topic, &payload).requires_evaluation() {
                            self.cycle();
                            watchdog = arm(timing.publish_watchdog());
                        }
                    }
                    Some(Event::Reconnected) => self.subscribe(),
                    Some(Event::Shutdown) | None => break,
                },
                () = expired(&mut watchdog) => {
                    debug!("no publish for {:?}, forcing an update", timing.publish_watchdog());
                    self.cycle();
                    watchdog = arm(timing.publish_watchdog());
                }
                () = expired(&mut retry) => {
                    self.register_listeners();
                    retry = self.retry_timer();
                }
                _ = persist.tick() => self.persist().await,
            }
        }

        self.shutdown().await;
    }

    fn cycle(&mut self) {
        self.engine.run_cycle(&self.host, &self.transport, Utc::now());
    }

    fn subscribe(&self) {
        match self.transport.subscribe(&self.command_topic) {
            Ok(()) => debug!(topic = %self.command_topic, "subscribed"),
            Err(err) => warn!("subscribe to {} failed: {err}", self.command_topic),
        }
    }

    fn register_listeners(&mut self) {
        let host = &self.host;
        let (found, missing): (BTreeSet<String>, BTreeSet<String>) =
            std::mem::take(&mut self.unresolved)
                .into_iter()
                .partition(|entity_id| host.entity_exists(entity_id));

        for entity_id in &found {
            debug!(%entity_id, "listening for changes");
        }
        for entity_id in &missing {
            warn!(
                "{entity_id} not found, retrying in {:?}",
                self.settings.timing.registration_retry()
            );
        }
        self.listening.extend(found);
        self.unresolved = missing;
    }

    fn retry_timer(&self) -> Timer {
        if self.unresolved.is_empty() {
            None
        } else {
            arm(self.settings.timing.registration_retry())
        }
    }

    async fn persist(&self) {
        match self.store.save(self.engine.setpoint()).await {
            Ok(()) => debug!(path = %self.store.path().display(), "setpoint saved"),
            Err(err) => warn!(
                "failed to save setpoint to {}: {err:#}",
                self.store.path().display()
            ),
        }
    }

    async fn shutdown(self) {
        if let Err(err) = self.transport.unsubscribe(&self.command_topic) {
            warn!("unsubscribe from {} failed: {err}", self.command_topic);
        }
        self.persist().await;
        info!("thermostat stopped");
    }
}
