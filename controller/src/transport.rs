use rumqttc::{AsyncClient, ClientError, QoS};

use virtual_thermostat_common::{HostError, Transport};

/// [`Transport`] over a `rumqttc` client. Requests are queued with the
/// non-blocking `try_*` calls and flushed by the event loop task.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.client.disconnect().await
    }
}

impl Transport for MqttTransport {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), HostError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload)
            .map_err(request_error)
    }

    fn subscribe(&self, topic: &str) -> Result<(), HostError> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(request_error)
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), HostError> {
        self.client.try_unsubscribe(topic).map_err(request_error)
    }
}

fn request_error(err: ClientError) -> HostError {
    HostError::Request(err.to_string())
}
