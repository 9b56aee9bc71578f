//! Message sink capability and its MQTT adapter.

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::SinkConfig;
use crate::error::{ConnectionError, PublishError};

/// A topic-addressed publish capability over the message bus.
///
/// Session state changes only through explicit `connect` / `disconnect`
/// calls, never as a side effect of a publish outcome.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Perform the network handshake. Failure is fatal: the caller aborts
    /// startup.
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Deliver `payload` to `topic` with at-least-once semantics.
    ///
    /// Suspends until the transport accepts the delivery; a failure is
    /// recoverable by the caller.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;

    /// Flush outstanding deliveries and release the session. Idempotent;
    /// failures are logged, never returned.
    async fn disconnect(&mut self);
}

/// Message sink backed by an MQTT broker.
///
/// `connect` completes only once the broker acknowledges the session. A
/// background driver task then polls the event loop for the lifetime of the
/// session: delivery acknowledgements, keep-alive pings and transport-level
/// reconnects all live there.
pub struct MqttSink {
    config: SinkConfig,
    client: Option<AsyncClient>,
    driver: Option<JoinHandle<()>>,
}

/// Request-queue depth between the client handle and the event loop.
const REQUEST_QUEUE_CAPACITY: usize = 10;

impl MqttSink {
    pub fn new(config: SinkConfig) -> Self {
        Self {
            config,
            client: None,
            driver: None,
        }
    }
}

#[async_trait]
impl MessageSink for MqttSink {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        let endpoint = self.config.endpoint();

        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);

        // Drive the event loop until the broker acknowledges the session, so
        // a dead or rejecting broker fails startup instead of surfacing as
        // publish errors later.
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.connect_timeout_ms);
        loop {
            let event = tokio::time::timeout_at(deadline, eventloop.poll())
                .await
                .map_err(|_| {
                    ConnectionError::new(&endpoint, "Timed out waiting for broker acknowledgement")
                })?
                .map_err(|e| ConnectionError::new(&endpoint, e))?;

            match event {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    if ack.code == ConnectReturnCode::Success {
                        break;
                    }
                    return Err(ConnectionError::new(
                        &endpoint,
                        format!("Broker rejected connection: {:?}", ack.code),
                    ));
                }
                other => trace!(event = ?other, "Ignoring event before connection ack"),
            }
        }

        info!(
            broker = %endpoint,
            client_id = %self.config.client_id,
            "Connected to MQTT broker"
        );

        let driver = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(event) => trace!(event = ?event, "MQTT event"),
                    Err(e) => {
                        // The next poll re-establishes the transport; backing
                        // off keeps a dead broker from busy-looping us.
                        error!(error = %e, "MQTT event loop error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        self.client = Some(client);
        self.driver = Some(driver);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let Some(client) = self.client.as_ref() else {
            return Err(PublishError::new(topic, "Not connected"));
        };

        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| PublishError::new(topic, e))?;

        debug!(topic = %topic, "Handed payload to the transport");
        Ok(())
    }

    async fn disconnect(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        // The disconnect request goes through the same queue as pending
        // publishes, so the event loop writes those out first.
        if let Err(e) = client.disconnect().await {
            warn!(broker = %self.config.endpoint(), error = %e, "MQTT disconnect failed");
        }

        // Give the event loop a moment to drain before stopping it.
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }

        info!(broker = %self.config.endpoint(), "Disconnected from MQTT broker");
    }
}
