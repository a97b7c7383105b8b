//! Control-plane socket link.
//!
//! The connection manager authenticates over a persistent socket to the
//! control plane and keeps it open for token refreshes. The socket sits
//! behind the [`ControlLink`]/[`ControlDialer`] traits so the reconnection
//! state machine can be driven with injected faults instead of real sockets.
//!
//! Wire format: one JSON object per line, in both directions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::Result;

/// Authentication payload sent as the first frame after dialing.
///
/// `connection_id` is empty on an initial connect; reconnects present the
/// previously assigned id so the broker can correlate the session.
#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    /// Application username
    pub username: &'a str,
    /// Connection token
    pub broker_creds: &'a str,
    /// Previously assigned connection id, or empty
    pub connection_id: &'a str,
}

/// First inbound frame after a successful handshake
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    /// Connection id assigned by the control plane
    pub connection_id: String,
    /// Short-lived access token for control-plane HTTP calls
    pub access_token: String,
    /// Milliseconds until the access token expires (0 = no expiry)
    pub access_token_exp: u64,
}

/// Outbound frame requesting a fresh access token
#[derive(Debug, Serialize)]
pub struct RefreshRequest {
    /// Always true
    pub resend_access_token: bool,
}

/// Inbound frame carrying a refreshed access token
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefresh {
    /// The new access token
    pub access_token: String,
    /// Milliseconds until the new token expires
    pub access_token_exp: u64,
}

/// A live control-plane socket
#[async_trait]
pub trait ControlLink: Send {
    /// Send one frame
    async fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Receive the next frame. `Ok(None)` means the peer closed the socket.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;

    /// Close the socket. Errors during shutdown are ignored.
    async fn close(&mut self);
}

/// Dials control-plane sockets
#[async_trait]
pub trait ControlDialer: Send + Sync + 'static {
    /// Open a link to the control plane at `host:port`
    async fn dial(&self, host: &str, port: u16) -> Result<Box<dyn ControlLink>>;
}

/// TCP implementation of [`ControlLink`] speaking newline-delimited JSON
pub struct TcpControlLink {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

#[async_trait]
impl ControlLink for TcpControlLink {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.write_all(frame).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let read = self.reader.read_until(b'\n', &mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    async fn close(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Default [`ControlDialer`] connecting over plain TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpControlDialer;

#[async_trait]
impl ControlDialer for TcpControlDialer {
    async fn dial(&self, host: &str, port: u16) -> Result<Box<dyn ControlLink>> {
        debug!(host, port, "dialing control plane");
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Box::new(TcpControlLink {
            reader: BufReader::new(read_half),
            writer: write_half,
        }))
    }
}
