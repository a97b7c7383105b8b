//! Control-plane HTTP API.
//!
//! Resource lifecycle (factories, stations, producers, consumers) goes
//! through authenticated REST calls. The API sits behind the [`ControlApi`]
//! trait so session teardown can be exercised in tests without an HTTP
//! server; [`HttpControlApi`] is the production implementation.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::StationOptions;
use crate::error::{ClientError, Result};

/// Role reported for application-created producers and consumers
const APPLICATION_ROLE: &str = "application";

/// Control-plane resource lifecycle operations.
///
/// Every call carries the current access token; tokens rotate, so callers
/// snapshot the token per request rather than per session.
#[async_trait]
pub trait ControlApi: Send + Sync + 'static {
    /// Create a factory
    async fn create_factory(&self, token: &str, name: &str, description: &str) -> Result<()>;
    /// Remove a factory
    async fn remove_factory(&self, token: &str, factory_name: &str) -> Result<()>;
    /// Create a station under a factory
    async fn create_station(
        &self,
        token: &str,
        name: &str,
        factory_name: &str,
        options: &StationOptions,
    ) -> Result<()>;
    /// Remove a station
    async fn remove_station(&self, token: &str, station_name: &str) -> Result<()>;
    /// Register a producer on a station
    async fn create_producer(
        &self,
        token: &str,
        name: &str,
        station_name: &str,
        connection_id: &str,
    ) -> Result<()>;
    /// Deregister a producer
    async fn destroy_producer(&self, token: &str, name: &str, station_name: &str) -> Result<()>;
    /// Register a consumer on a station. `group` may be empty.
    async fn create_consumer(
        &self,
        token: &str,
        name: &str,
        station_name: &str,
        connection_id: &str,
        group: &str,
    ) -> Result<()>;
    /// Deregister a consumer
    async fn destroy_consumer(&self, token: &str, name: &str, station_name: &str) -> Result<()>;
}

#[derive(Serialize)]
struct CreateFactoryRequest<'a> {
    name: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
struct RemoveFactoryRequest<'a> {
    factory_name: &'a str,
}

#[derive(Serialize)]
struct CreateStationRequest<'a> {
    name: &'a str,
    factory_name: &'a str,
    retention_type: &'a str,
    retention_value: u64,
    storage_type: &'a str,
    replicas: u32,
    dedup_enabled: bool,
    dedup_window_in_ms: u64,
}

#[derive(Serialize)]
struct RemoveStationRequest<'a> {
    station_name: &'a str,
}

#[derive(Serialize)]
struct CreateProducerRequest<'a> {
    name: &'a str,
    station_name: &'a str,
    connection_id: &'a str,
    producer_type: &'a str,
}

#[derive(Serialize)]
struct DestroyProducerRequest<'a> {
    name: &'a str,
    station_name: &'a str,
}

#[derive(Serialize)]
struct CreateConsumerRequest<'a> {
    name: &'a str,
    station_name: &'a str,
    connection_id: &'a str,
    consumer_type: &'a str,
    consumers_group: &'a str,
}

#[derive(Serialize)]
struct DestroyConsumerRequest<'a> {
    name: &'a str,
    station_name: &'a str,
}

/// HTTP implementation of [`ControlApi`]
pub struct HttpControlApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpControlApi {
    /// Create a client addressing the control plane at `host:port`
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("http://{host}:{port}"),
        }
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, token: &str, body: &B) -> Result<()> {
        debug!(path, "control plane request");
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::ControlPlane {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn create_factory(&self, token: &str, name: &str, description: &str) -> Result<()> {
        self.post(
            "/api/factories/createFactory",
            token,
            &CreateFactoryRequest { name, description },
        )
        .await
    }

    async fn remove_factory(&self, token: &str, factory_name: &str) -> Result<()> {
        self.post(
            "/api/factories/removeFactory",
            token,
            &RemoveFactoryRequest { factory_name },
        )
        .await
    }

    async fn create_station(
        &self,
        token: &str,
        name: &str,
        factory_name: &str,
        options: &StationOptions,
    ) -> Result<()> {
        self.post(
            "/api/stations/createStation",
            token,
            &CreateStationRequest {
                name,
                factory_name,
                retention_type: options.retention.kind(),
                retention_value: options.retention.value(),
                storage_type: options.storage.as_str(),
                replicas: options.replicas,
                dedup_enabled: options.dedup_enabled,
                dedup_window_in_ms: options.dedup_window.as_millis() as u64,
            },
        )
        .await
    }

    async fn remove_station(&self, token: &str, station_name: &str) -> Result<()> {
        self.post(
            "/api/stations/removeStation",
            token,
            &RemoveStationRequest { station_name },
        )
        .await
    }

    async fn create_producer(
        &self,
        token: &str,
        name: &str,
        station_name: &str,
        connection_id: &str,
    ) -> Result<()> {
        self.post(
            "/api/producers/createProducer",
            token,
            &CreateProducerRequest {
                name,
                station_name,
                connection_id,
                producer_type: APPLICATION_ROLE,
            },
        )
        .await
    }

    async fn destroy_producer(&self, token: &str, name: &str, station_name: &str) -> Result<()> {
        self.post(
            "/api/producers/destroyProducer",
            token,
            &DestroyProducerRequest { name, station_name },
        )
        .await
    }

    async fn create_consumer(
        &self,
        token: &str,
        name: &str,
        station_name: &str,
        connection_id: &str,
        group: &str,
    ) -> Result<()> {
        self.post(
            "/api/consumers/createConsumer",
            token,
            &CreateConsumerRequest {
                name,
                station_name,
                connection_id,
                consumer_type: APPLICATION_ROLE,
                consumers_group: group,
            },
        )
        .await
    }

    async fn destroy_consumer(&self, token: &str, name: &str, station_name: &str) -> Result<()> {
        self.post(
            "/api/consumers/destroyConsumer",
            token,
            &DestroyConsumerRequest { name, station_name },
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{RetentionPolicy, StorageKind};
    use std::time::Duration;

    #[test]
    fn test_create_station_body_fields() {
        let options = StationOptions::new()
            .with_retention(RetentionPolicy::Messages(5000))
            .with_storage(StorageKind::Memory)
            .with_replicas(3)
            .with_dedup(true, Duration::from_millis(1500));

        let body = serde_json::to_value(CreateStationRequest {
            name: "orders",
            factory_name: "shop",
            retention_type: options.retention.kind(),
            retention_value: options.retention.value(),
            storage_type: options.storage.as_str(),
            replicas: options.replicas,
            dedup_enabled: options.dedup_enabled,
            dedup_window_in_ms: options.dedup_window.as_millis() as u64,
        })
        .unwrap();

        assert_eq!(body["name"], "orders");
        assert_eq!(body["factory_name"], "shop");
        assert_eq!(body["retention_type"], "messages");
        assert_eq!(body["retention_value"], 5000);
        assert_eq!(body["storage_type"], "memory");
        assert_eq!(body["replicas"], 3);
        assert_eq!(body["dedup_enabled"], true);
        assert_eq!(body["dedup_window_in_ms"], 1500);
    }

    #[test]
    fn test_session_body_fields() {
        let body = serde_json::to_value(CreateConsumerRequest {
            name: "worker-1",
            station_name: "orders",
            connection_id: "c-9",
            consumer_type: APPLICATION_ROLE,
            consumers_group: "workers",
        })
        .unwrap();
        assert_eq!(body["consumer_type"], "application");
        assert_eq!(body["consumers_group"], "workers");
        assert_eq!(body["connection_id"], "c-9");

        let body = serde_json::to_value(CreateProducerRequest {
            name: "p",
            station_name: "orders",
            connection_id: "c-9",
            producer_type: APPLICATION_ROLE,
        })
        .unwrap();
        assert_eq!(body["producer_type"], "application");
    }
}
