//! Streaming data-plane transport.
//!
//! The broker's streaming layer is an external collaborator: it owns the
//! wire protocol, persistence, and its own reconnect machinery. This module
//! defines the narrow seam the SDK needs (connect, dedup-aware publish, and
//! pull-subscribe with manual acks) plus the JetStream implementation used
//! in production. Tests drive the sessions through the same traits with
//! in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream;
use async_nats::jetstream::consumer::PullConsumer;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};

use crate::error::{ClientError, Result};

/// Header carrying the deduplication message id
const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// Options for opening the streaming transport. Mirrors the reconnect policy
/// of the control-plane connection so both planes degrade together.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Broker address as `host:port`
    pub server: String,
    /// Connection token
    pub token: String,
    /// Enable the transport's built-in reconnection
    pub reconnect: bool,
    /// Maximum transport reconnect attempts
    pub max_reconnect: u32,
    /// Delay between transport reconnect attempts
    pub reconnect_interval: Duration,
    /// Timeout for the initial transport connect
    pub connect_timeout: Duration,
}

/// One received message, owned by the transport until acknowledged
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Message payload
    fn payload(&self) -> Bytes;

    /// Acknowledge this delivery to the broker. Idempotence is whatever the
    /// transport provides; the SDK does not track ack state.
    async fn ack(&self) -> Result<()>;
}

/// A pull-based subscription bound to one durable name
#[async_trait]
pub trait StreamSubscription: Send {
    /// Request up to `batch` messages, waiting at most `max_wait` before
    /// returning fewer (possibly zero).
    async fn fetch(&mut self, batch: usize, max_wait: Duration) -> Result<Vec<Box<dyn Delivery>>>;
}

/// A live streaming connection
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Publish `payload` to `subject` with a deduplication id, waiting up to
    /// `ack_wait` for the broker's acknowledgment.
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        msg_id: &str,
        ack_wait: Duration,
    ) -> Result<()>;

    /// Open a manual-ack pull subscription on `station` under `durable`
    async fn pull_subscribe(
        &self,
        station: &str,
        durable: &str,
    ) -> Result<Box<dyn StreamSubscription>>;

    /// Flush and release the connection
    async fn close(&self) -> Result<()>;
}

/// Opens streaming transports
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// Connect to the broker, resolving only once the transport is ready
    async fn connect(&self, opts: &TransportOptions) -> Result<Arc<dyn StreamTransport>>;
}

/// JetStream-backed [`StreamTransport`]
pub struct JetStreamTransport {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

#[async_trait]
impl StreamTransport for JetStreamTransport {
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        msg_id: &str,
        ack_wait: Duration,
    ) -> Result<()> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(MSG_ID_HEADER, msg_id);

        let ack = self
            .jetstream
            .publish_with_headers(subject.to_string(), headers, payload)
            .await
            .map_err(|e| ClientError::transport(format!("publish to {subject} failed: {e}")))?;

        // The broker acks asynchronously; bound the wait here so a stuck
        // broker surfaces as a timeout rather than a hang.
        tokio::time::timeout(ack_wait, ack)
            .await
            .map_err(|_| {
                ClientError::transport(format!(
                    "no publish acknowledgment within {}ms",
                    ack_wait.as_millis()
                ))
            })?
            .map_err(|e| ClientError::transport(format!("publish not acknowledged: {e}")))?;
        Ok(())
    }

    async fn pull_subscribe(
        &self,
        station: &str,
        durable: &str,
    ) -> Result<Box<dyn StreamSubscription>> {
        let stream = self
            .jetstream
            .get_stream(station)
            .await
            .map_err(|e| ClientError::subscription(format!("station {station} lookup: {e}")))?;

        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                durable,
                jetstream::consumer::pull::Config {
                    durable_name: Some(durable.to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ClientError::subscription(format!("durable {durable}: {e}")))?;

        debug!(station, durable, "pull subscription opened");
        Ok(Box::new(JetStreamSubscription { consumer }))
    }

    async fn close(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| ClientError::transport(format!("flush on close: {e}")))
    }
}

struct JetStreamSubscription {
    consumer: PullConsumer,
}

#[async_trait]
impl StreamSubscription for JetStreamSubscription {
    async fn fetch(&mut self, batch: usize, max_wait: Duration) -> Result<Vec<Box<dyn Delivery>>> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(batch)
            .expires(max_wait)
            .messages()
            .await
            .map_err(|e| ClientError::transport(format!("pull request failed: {e}")))?;

        let mut deliveries: Vec<Box<dyn Delivery>> = Vec::new();
        while let Some(message) = messages.next().await {
            let message =
                message.map_err(|e| ClientError::transport(format!("pull stream error: {e}")))?;
            deliveries.push(Box::new(JetStreamDelivery { message }));
        }
        Ok(deliveries)
    }
}

struct JetStreamDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> Bytes {
        self.message.payload.clone()
    }

    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| ClientError::transport(format!("ack failed: {e}")))
    }
}

/// Default [`TransportConnector`] connecting over NATS/JetStream
#[derive(Debug, Clone, Copy, Default)]
pub struct JetStreamConnector;

#[async_trait]
impl TransportConnector for JetStreamConnector {
    async fn connect(&self, opts: &TransportOptions) -> Result<Arc<dyn StreamTransport>> {
        let max_reconnects = if opts.reconnect {
            Some(opts.max_reconnect as usize)
        } else {
            Some(0)
        };
        let reconnect_interval = opts.reconnect_interval;

        let client = async_nats::ConnectOptions::new()
            .token(opts.token.clone())
            .connection_timeout(opts.connect_timeout)
            .max_reconnects(max_reconnects)
            .reconnect_delay_callback(move |_attempt| reconnect_interval)
            .connect(format!("nats://{}", opts.server))
            .await
            .map_err(|e| {
                ClientError::transport(format!("broker connect to {} failed: {e}", opts.server))
            })?;

        info!(server = %opts.server, "streaming transport connected");
        let jetstream = jetstream::new(client.clone());
        Ok(Arc::new(JetStreamTransport { client, jetstream }))
    }
}
