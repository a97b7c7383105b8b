#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Rust client SDK for the Foundry message-broker platform.
//!
//! The client keeps two planes open: a control-plane connection
//! (authentication, token refresh, resource lifecycle) and a streaming
//! data plane for publish / pull-subscribe. Producer and consumer sessions
//! are created through the client and then operate against the transport
//! independently.
//!
//! # Example
//!
//! ```rust,no_run
//! use foundry_client::{ConnectOptions, ConsumerEvent, ConsumerOptions, FoundryClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FoundryClient::connect(
//!         ConnectOptions::new("foundry.example.com", "ordering-app", "connection-token"),
//!     )
//!     .await?;
//!
//!     let producer = client.producer("orders", "web-frontend").await?;
//!     producer.produce("order placed").await?;
//!
//!     let mut consumer = client
//!         .consumer("orders", "order-worker", ConsumerOptions::new().with_group("workers"))
//!         .await?;
//!     while let Some(event) = consumer.recv().await {
//!         match event {
//!             ConsumerEvent::Message(message) => message.ack().await?,
//!             ConsumerEvent::Error(error) => eprintln!("consumer error: {error}"),
//!         }
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

mod api;
mod config;
mod connection;
mod consumer;
mod error;
mod link;
mod message;
mod producer;
mod station;
mod transport;

pub use api::{ControlApi, HttpControlApi};
pub use config::{
    ConnectOptions, ConsumerOptions, RetentionPolicy, StationOptions, StorageKind,
    DEFAULT_BROKER_PORT, DEFAULT_PORT, MAX_RECONNECT_CAP,
};
pub use connection::{ConnectionHandle, ConnectionState, FoundryClient};
pub use consumer::{Consumer, ConsumerEvent, ConsumerState};
pub use error::{ClientError, Result};
pub use link::{
    AuthRequest, AuthResponse, ControlDialer, ControlLink, RefreshRequest, TcpControlDialer,
    TokenRefresh,
};
pub use message::Message;
pub use producer::{Producer, DEFAULT_ACK_WAIT};
pub use station::{Factory, Station};
pub use transport::{
    Delivery, JetStreamConnector, JetStreamTransport, StreamSubscription, StreamTransport,
    TransportConnector, TransportOptions,
};
