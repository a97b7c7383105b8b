//! Producer session.
//!
//! A producer binds a logical name to one station's destination subject and
//! publishes through the streaming transport with broker-side deduplication:
//! every publish carries a freshly generated unique message id, and the
//! broker suppresses duplicates of that id inside the station's dedup
//! window.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::ConnectionHandle;
use crate::error::Result;

/// Default time to wait for the broker's publish acknowledgment
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(15);

/// Suffix of the subject producers publish to and consumers pull from
pub(crate) const SUBJECT_SUFFIX: &str = "final";

pub(crate) fn station_subject(station_name: &str) -> String {
    format!("{station_name}.{SUBJECT_SUFFIX}")
}

/// A producer session bound to one station.
///
/// Immutable after creation except for [`destroy`](Self::destroy).
pub struct Producer {
    name: String,
    station_name: String,
    subject: String,
    handle: ConnectionHandle,
}

impl Producer {
    pub(crate) async fn create(
        handle: ConnectionHandle,
        station_name: &str,
        name: &str,
    ) -> Result<Self> {
        let name = name.to_lowercase();
        let station_name = station_name.to_lowercase();

        let (token, connection_id) = handle.authorization().await?;
        handle
            .api()
            .create_producer(&token, &name, &station_name, &connection_id)
            .await?;
        info!(producer = %name, station = %station_name, "producer created");

        Ok(Self {
            subject: station_subject(&station_name),
            name,
            station_name,
            handle,
        })
    }

    /// Producer name (lower-cased)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Station this producer publishes to (lower-cased)
    pub fn station_name(&self) -> &str {
        &self.station_name
    }

    /// Publish a message, waiting up to [`DEFAULT_ACK_WAIT`] for the
    /// broker's acknowledgment.
    pub async fn produce(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.produce_with_ack_wait(payload, DEFAULT_ACK_WAIT).await
    }

    /// Publish a message with an explicit acknowledgment deadline.
    ///
    /// Fails with [`ClientError::ConnectionInactive`](crate::ClientError::ConnectionInactive)
    /// while disconnected; transport failures (ack timeout, broker
    /// unavailable) are propagated as
    /// [`ClientError::Transport`](crate::ClientError::Transport).
    pub async fn produce_with_ack_wait(
        &self,
        payload: impl Into<Bytes>,
        ack_wait: Duration,
    ) -> Result<()> {
        let transport = self.handle.transport().await?;
        let msg_id = Uuid::new_v4().to_string();
        debug!(subject = %self.subject, %msg_id, "publishing");
        transport
            .publish(&self.subject, payload.into(), &msg_id, ack_wait)
            .await
    }

    /// Deregister this producer from the control plane.
    ///
    /// Local state is untouched, so repeated calls are safe; the remote side
    /// may report "not found" on the second attempt.
    pub async fn destroy(&self) -> Result<()> {
        let token = self.handle.access_token().await?;
        self.handle
            .api()
            .destroy_producer(&token, &self.name, &self.station_name)
            .await
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("name", &self.name)
            .field("station_name", &self.station_name)
            .field("subject", &self.subject)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_subject() {
        assert_eq!(station_subject("orders"), "orders.final");
    }
}
