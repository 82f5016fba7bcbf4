use std::{
    ops::ControlFlow,
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use anyhow::Context;
use chrono::Utc;
use rumqttc::{AsyncClient, Event as MqttEvent, Incoming, MqttOptions, Outgoing};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

use virtual_thermostat_common::{
    AppConfig, RawThermostatConfig, ThermostatConfig, Transport, TOPIC_PREFIX,
};

use crate::{
    instance::{Event, Instance, InstanceSettings},
    statestream::StatestreamHost,
    store::SetpointStore,
    transport::MqttTransport,
};

const DEFAULT_CONFIG_PATH: &str = "./thermostat.json";
const INSTANCE_QUEUE: usize = 64;
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

type MqttHost = StatestreamHost<MqttTransport>;

/// Senders of every running instance; the MQTT loop fans events out to all.
#[derive(Clone, Default)]
struct Dispatcher {
    senders: Arc<RwLock<Vec<mpsc::Sender<Event>>>>,
}

impl Dispatcher {
    fn register(&self, sender: mpsc::Sender<Event>) {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
    }

    fn senders(&self) -> Vec<mpsc::Sender<Event>> {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entity changes are frequent and superseded by the next one, so a full
    /// queue drops them. Commands and reconnects wait for room.
    async fn broadcast(&self, event: Event) {
        for sender in self.senders() {
            if matches!(event, Event::EntityChanged(_)) {
                if let Err(mpsc::error::TrySendError::Full(dropped)) =
                    sender.try_send(event.clone())
                {
                    warn!("instance queue full, dropping {dropped:?}");
                }
            } else if sender.send(event.clone()).await.is_err() {
                debug!("instance stopped, not delivering {event:?}");
            }
        }
    }
}

struct Running {
    device_id: String,
    events: mpsc::Sender<Event>,
    task: JoinHandle<()>,
}

pub async fn run() -> anyhow::Result<()> {
    let config = load_config().await?;
    init_tracing(config.debug_requested());

    let mut mqtt_options = MqttOptions::new(
        config.mqtt.client_id.clone(),
        config.mqtt.host.clone(),
        config.mqtt.port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !config.mqtt.user.is_empty() {
        mqtt_options.set_credentials(config.mqtt.user.clone(), config.mqtt.pass.clone());
    }
    let (client, eventloop) = AsyncClient::new(mqtt_options, 256);
    let transport = MqttTransport::new(client);
    let host = Arc::new(StatestreamHost::new(transport.clone(), &config.statestream));

    let dispatcher = Dispatcher::default();
    let mqtt_task = spawn_mqtt_loop(
        host.clone(),
        transport.clone(),
        dispatcher.clone(),
        eventloop,
    );

    info!(
        "waiting {}s for entity states from {}",
        config.statestream.sync_secs, config.statestream.base_topic
    );
    tokio::time::sleep(Duration::from_secs(config.statestream.sync_secs)).await;

    let settings = InstanceSettings {
        discovery_prefix: config.discovery_prefix.clone(),
        timing: config.timing.clone(),
    };
    let mut running = Vec::new();
    for (device_id, raw) in &config.thermostats {
        let span = info_span!("thermostat", %device_id);
        let started = start_instance(device_id, raw, &config, &host, &transport, &settings)
            .instrument(span.clone())
            .await;
        let Some(instance) = started else {
            continue;
        };

        let (events, receiver) = mpsc::channel(INSTANCE_QUEUE);
        dispatcher.register(events.clone());
        running.push(Running {
            device_id: device_id.clone(),
            events,
            task: tokio::spawn(instance.run(receiver).instrument(span)),
        });
    }

    if running.is_empty() {
        anyhow::bail!("no thermostat could be started");
    }
    info!("{} thermostat(s) running", running.len());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    for instance in &running {
        if instance.events.send(Event::Shutdown).await.is_err() {
            warn!("{} already stopped", instance.device_id);
        }
    }
    for instance in running {
        if let Err(err) = instance.task.await {
            error!("{} did not shut down cleanly: {err}", instance.device_id);
        }
    }

    if let Err(err) = transport.disconnect().await {
        warn!("mqtt disconnect failed: {err}");
    }
    // Queued unsubscribes and the disconnect only leave once the loop polls them.
    if tokio::time::timeout(DISCONNECT_GRACE, mqtt_task).await.is_err() {
        warn!("mqtt loop did not flush within {DISCONNECT_GRACE:?}");
    }
    Ok(())
}

async fn start_instance(
    device_id: &str,
    raw: &RawThermostatConfig,
    config: &AppConfig,
    host: &Arc<MqttHost>,
    transport: &MqttTransport,
    settings: &InstanceSettings,
) -> Option<Instance<Arc<MqttHost>, MqttTransport>> {
    let thermostat = match ThermostatConfig::from_raw(device_id, raw) {
        Ok(thermostat) => thermostat,
        Err(err) => {
            error!("invalid configuration: {err}");
            return None;
        }
    };

    let store = SetpointStore::new(config.data_dir.join(format!("{device_id}.json")));
    match Instance::start(
        thermostat,
        host.clone(),
        transport.clone(),
        store,
        settings.clone(),
    )
    .await
    {
        Ok(instance) => Some(instance),
        Err(err) => {
            error!("failed to start: {err}");
            None
        }
    }
}

fn spawn_mqtt_loop(
    host: Arc<MqttHost>,
    transport: MqttTransport,
    dispatcher: Dispatcher,
    mut eventloop: rumqttc::EventLoop,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(event) => {
                    if handle_mqtt_event(&host, &transport, &dispatcher, event)
                        .await
                        .is_break()
                    {
                        info!("mqtt disconnected");
                        break;
                    }
                }
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

/// Routes one event-loop event. Breaks once our disconnect has been sent.
async fn handle_mqtt_event<S: Transport, T: Transport>(
    host: &StatestreamHost<S>,
    transport: &T,
    dispatcher: &Dispatcher,
    event: MqttEvent,
) -> ControlFlow<()> {
    match event {
        MqttEvent::Incoming(Incoming::Publish(message)) => {
            if host.handles(&message.topic) {
                let changed = host.ingest(&message.topic, &message.payload, Utc::now());
                if let Some(entity_id) = changed {
                    dispatcher.broadcast(Event::EntityChanged(entity_id)).await;
                }
            } else if message.topic.starts_with(TOPIC_PREFIX) {
                dispatcher
                    .broadcast(Event::Message {
                        topic: message.topic,
                        payload: message.payload.to_vec(),
                    })
                    .await;
            } else {
                debug!(topic = %message.topic, "ignoring message");
            }
        }
        MqttEvent::Incoming(Incoming::ConnAck(_)) => {
            info!("mqtt connected");
            if let Err(err) = transport.subscribe(&host.subscription()) {
                warn!("statestream subscribe failed: {err}");
            }
            dispatcher.broadcast(Event::Reconnected).await;
        }
        MqttEvent::Outgoing(Outgoing::Disconnect) => return ControlFlow::Break(()),
        _ => {}
    }
    ControlFlow::Continue(())
}

async fn load_config() -> anyhow::Result<AppConfig> {
    let path = std::env::var("THERMOSTAT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let raw = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let mut config: AppConfig = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut AppConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("MQTT_HOST") {
        config.mqtt.host = host;
    }
    if let Some(port) = var("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        config.mqtt.port = port;
    }
    if let Some(user) = var("MQTT_USER") {
        config.mqtt.user = user;
    }
    if let Some(pass) = var("MQTT_PASS") {
        config.mqtt.pass = pass;
    }
    if let Some(data_dir) = var("THERMOSTAT_DATA_DIR") {
        config.data_dir = PathBuf::from(data_dir);
    }
}

/// `RUST_LOG` wins; otherwise `DEBUG` on any thermostat raises this
/// workspace's crates to debug.
fn default_filter(debug: bool) -> &'static str {
    if debug {
        "info,virtual_thermostat=debug,virtual_thermostat_common=debug"
    } else {
        "info"
    }
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, QoS};
    use std::collections::HashMap;
    use virtual_thermostat_common::fake::FakeTransport;

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config: AppConfig = serde_json::from_str(
            r#"{"mqtt": {"host": "broker.lan", "port": 1884, "user": "ha"}}"#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            ("MQTT_HOST", "10.0.0.2"),
            ("MQTT_PORT", "not-a-port"),
            ("MQTT_PASS", "secret"),
            ("THERMOSTAT_DATA_DIR", "/var/lib/thermostat"),
        ]
        .into_iter()
        .collect();

        apply_env_overrides(&mut config, |key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.mqtt.host, "10.0.0.2");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.mqtt.user, "ha");
        assert_eq!(config.mqtt.pass, "secret");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/thermostat"));
    }

    #[test]
    fn debug_flag_selects_verbose_filter() {
        assert_eq!(default_filter(false), "info");
        assert!(default_filter(true).contains("virtual_thermostat_common=debug"));
    }

    #[tokio::test]
    async fn dispatcher_reaches_every_instance() {
        let dispatcher = Dispatcher::default();
        let (first, mut first_rx) = mpsc::channel(4);
        let (second, mut second_rx) = mpsc::channel(4);
        dispatcher.register(first);
        dispatcher.register(second);

        dispatcher
            .broadcast(Event::EntityChanged("sensor.hall".to_string()))
            .await;

        let expected = Some(Event::EntityChanged("sensor.hall".to_string()));
        assert_eq!(first_rx.recv().await, expected);
        assert_eq!(second_rx.recv().await, expected);
    }

    #[tokio::test]
    async fn dispatcher_skips_closed_instances() {
        let dispatcher = Dispatcher::default();
        let (closed, closed_rx) = mpsc::channel(1);
        let (open, mut open_rx) = mpsc::channel(1);
        drop(closed_rx);
        dispatcher.register(closed);
        dispatcher.register(open);

        dispatcher.broadcast(Event::Reconnected).await;

        assert_eq!(open_rx.recv().await, Some(Event::Reconnected));
    }

    #[tokio::test]
    async fn full_queue_drops_entity_changes_but_waits_for_commands() {
        let dispatcher = Dispatcher::default();
        let (sender, mut receiver) = mpsc::channel(1);
        dispatcher.register(sender);
        dispatcher.broadcast(Event::Reconnected).await;

        dispatcher
            .broadcast(Event::EntityChanged("sensor.hall".to_string()))
            .await;

        let command = Event::Message {
            topic: "virtual_thermostat/hall/set_mode".to_string(),
            payload: b"heat".to_vec(),
        };
        let pending = {
            let dispatcher = dispatcher.clone();
            let command = command.clone();
            tokio::spawn(async move { dispatcher.broadcast(command).await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        assert_eq!(receiver.recv().await, Some(Event::Reconnected));
        pending.await.unwrap();
        assert_eq!(receiver.recv().await, Some(command));
        assert!(receiver.try_recv().is_err());
    }

    fn statestream() -> StatestreamHost<FakeTransport> {
        StatestreamHost::new(FakeTransport::new(), &Default::default())
    }

    #[tokio::test]
    async fn mqtt_events_are_routed_to_instances() {
        let host = statestream();
        let transport = FakeTransport::new();
        let dispatcher = Dispatcher::default();
        let (sender, mut receiver) = mpsc::channel(8);
        dispatcher.register(sender);

        let state = Publish::new(
            "homeassistant/statestream/sensor/hall/state",
            QoS::AtMostOnce,
            "21.0",
        );
        let command = Publish::new("virtual_thermostat/hall/set_mode", QoS::AtMostOnce, "off");
        let other = Publish::new("zigbee2mqtt/lamp", QoS::AtMostOnce, "{}");
        for message in [state, command, other] {
            let flow = handle_mqtt_event(
                &host,
                &transport,
                &dispatcher,
                MqttEvent::Incoming(Incoming::Publish(message)),
            )
            .await;
            assert!(flow.is_continue());
        }

        assert_eq!(
            receiver.recv().await,
            Some(Event::EntityChanged("sensor.hall".to_string()))
        );
        assert_eq!(
            receiver.recv().await,
            Some(Event::Message {
                topic: "virtual_thermostat/hall/set_mode".to_string(),
                payload: b"off".to_vec(),
            })
        );
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn connack_resubscribes_and_notifies() {
        let host = statestream();
        let transport = FakeTransport::new();
        let dispatcher = Dispatcher::default();
        let (sender, mut receiver) = mpsc::channel(8);
        dispatcher.register(sender);

        let connack = ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        };
        let flow = handle_mqtt_event(
            &host,
            &transport,
            &dispatcher,
            MqttEvent::Incoming(Incoming::ConnAck(connack)),
        )
        .await;

        assert!(flow.is_continue());
        assert_eq!(
            transport.subscriptions(),
            vec!["homeassistant/statestream/#".to_string()]
        );
        assert_eq!(receiver.recv().await, Some(Event::Reconnected));
    }

    #[tokio::test]
    async fn loop_stops_only_after_disconnect_is_sent() {
        let host = statestream();
        let transport = FakeTransport::new();
        let dispatcher = Dispatcher::default();

        let unsubscribe = handle_mqtt_event(
            &host,
            &transport,
            &dispatcher,
            MqttEvent::Outgoing(Outgoing::Unsubscribe(1)),
        )
        .await;
        let disconnect = handle_mqtt_event(
            &host,
            &transport,
            &dispatcher,
            MqttEvent::Outgoing(Outgoing::Disconnect),
        )
        .await;

        assert!(unsubscribe.is_continue());
        assert!(disconnect.is_break());
    }
}
