//! Received message wrapper.

use bytes::Bytes;

use crate::error::Result;
use crate::transport::Delivery;

/// A message delivered to a consumer session.
///
/// Wraps the transport-level delivery; acknowledging forwards straight to
/// the transport. The SDK keeps no ack state of its own; idempotence and
/// redelivery are whatever the broker provides.
pub struct Message {
    delivery: Box<dyn Delivery>,
}

impl Message {
    pub(crate) fn new(delivery: Box<dyn Delivery>) -> Self {
        Self { delivery }
    }

    /// Message payload
    pub fn payload(&self) -> Bytes {
        self.delivery.payload()
    }

    /// Acknowledge this message to the broker
    pub async fn ack(&self) -> Result<()> {
        self.delivery.ack().await
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.delivery.payload().len())
            .finish()
    }
}
