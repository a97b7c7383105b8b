//! Connection lifecycle and reconnection.
//!
//! [`FoundryClient::connect`] dials the control plane, authenticates, opens
//! the streaming transport, and then hands the live control socket to a
//! single supervisor task. The supervisor exclusively owns the socket for
//! the lifetime of the connection: it reads token-refresh frames, fires the
//! refresh timer, and drives the reconnection state machine
//!
//! ```text
//! ACTIVE → DISCONNECTED → RECONNECTING → (ACTIVE | FAILED)
//! ```
//!
//! Because one task owns the socket, an in-flight connect can never race a
//! reconnect attempt. Sessions hold a [`ConnectionHandle`] and never touch
//! the socket directly.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{ControlApi, HttpControlApi};
use crate::config::{ConnectOptions, ConsumerOptions, StationOptions};
use crate::consumer::Consumer;
use crate::error::{ClientError, Result};
use crate::link::{
    AuthRequest, AuthResponse, ControlDialer, ControlLink, RefreshRequest, TcpControlDialer,
    TokenRefresh,
};
use crate::producer::Producer;
use crate::station::{Factory, Station};
use crate::transport::{
    JetStreamConnector, StreamTransport, TransportConnector, TransportOptions,
};

/// Stand-in delay for a timer that must not fire
const PARKED: Duration = Duration::from_secs(365 * 24 * 3600);

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Authenticated and the streaming transport is ready
    Active = 0,
    /// Control socket lost; reconnection not yet started
    Disconnected = 1,
    /// Reconnection attempts in progress
    Reconnecting = 2,
    /// Reconnection budget exhausted (terminal)
    Failed = 3,
    /// Closed by the caller, or cleaned up with reconnection disabled (terminal)
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Disconnected,
            2 => Self::Reconnecting,
            3 => Self::Failed,
            _ => Self::Closed,
        }
    }
}

#[derive(Default)]
struct Credentials {
    connection_id: String,
    access_token: String,
}

/// State shared between the supervisor task and connection handles
pub(crate) struct Shared {
    state: AtomicU8,
    attempts: AtomicU32,
    creds: RwLock<Credentials>,
    transport: RwLock<Option<Arc<dyn StreamTransport>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            attempts: AtomicU32::new(0),
            creds: RwLock::new(Credentials::default()),
            transport: RwLock::new(None),
        }
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn begin_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Store fresh credentials and transport, reset the attempt counter,
    /// and mark the connection active.
    async fn install(&self, auth: &AuthResponse, transport: Arc<dyn StreamTransport>) {
        {
            let mut creds = self.creds.write().await;
            creds.connection_id = auth.connection_id.clone();
            creds.access_token = auth.access_token.clone();
        }
        let previous = self.transport.write().await.replace(transport);
        if let Some(old) = previous {
            let _ = old.close().await;
        }
        self.attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Active);
    }

    async fn update_token(&self, access_token: String) {
        self.creds.write().await.access_token = access_token;
    }

    /// Clear credentials, close the transport, and enter a terminal state
    async fn teardown(&self, final_state: ConnectionState) {
        {
            let mut creds = self.creds.write().await;
            creds.connection_id.clear();
            creds.access_token.clear();
        }
        if let Some(transport) = self.transport.write().await.take() {
            let _ = transport.close().await;
        }
        self.set_state(final_state);
    }

    async fn connection_id(&self) -> String {
        self.creds.read().await.connection_id.clone()
    }
}

/// Cheap clonable handle to a live connection.
///
/// Sessions receive the handle explicitly at creation; it is the only way
/// they reach the transport, the access token, or the control-plane API.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    api: Arc<dyn ControlApi>,
}

impl ConnectionHandle {
    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// True while authenticated and the transport is usable
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Reconnection attempts made in the current outage (0 while active)
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts()
    }

    /// Snapshot of the current access token. Fails with
    /// [`ClientError::ConnectionInactive`] while disconnected.
    pub(crate) async fn access_token(&self) -> Result<String> {
        if !self.is_active() {
            return Err(ClientError::ConnectionInactive);
        }
        Ok(self.shared.creds.read().await.access_token.clone())
    }

    /// Access token plus the connection id, for resource-creation calls
    pub(crate) async fn authorization(&self) -> Result<(String, String)> {
        if !self.is_active() {
            return Err(ClientError::ConnectionInactive);
        }
        let creds = self.shared.creds.read().await;
        Ok((creds.access_token.clone(), creds.connection_id.clone()))
    }

    /// The streaming transport, while active
    pub(crate) async fn transport(&self) -> Result<Arc<dyn StreamTransport>> {
        if !self.is_active() {
            return Err(ClientError::ConnectionInactive);
        }
        self.shared
            .transport
            .read()
            .await
            .clone()
            .ok_or(ClientError::ConnectionInactive)
    }

    pub(crate) fn api(&self) -> &Arc<dyn ControlApi> {
        &self.api
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish()
    }
}

/// Client for the Foundry message-broker platform.
///
/// Owns the control-plane connection and produces sessions bound to it.
/// Dropping the client (or calling [`close`](Self::close)) tears the
/// connection down.
pub struct FoundryClient {
    handle: ConnectionHandle,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl FoundryClient {
    /// Connect to the platform.
    ///
    /// Authenticates with the control plane, opens the streaming transport,
    /// and resolves only once both are ready. Fails with
    /// [`ClientError::ConnectionTimeout`] if no active connection is
    /// established within `opts.timeout`.
    pub async fn connect(opts: ConnectOptions) -> Result<Self> {
        let api = Arc::new(HttpControlApi::new(opts.normalized_host(), opts.port));
        Self::connect_with(
            opts,
            Arc::new(TcpControlDialer),
            Arc::new(JetStreamConnector),
            api,
        )
        .await
    }

    /// Connect with injected collaborators. This is the seam the tests use
    /// to drive the state machine without real sockets.
    pub async fn connect_with(
        opts: ConnectOptions,
        dialer: Arc<dyn ControlDialer>,
        connector: Arc<dyn TransportConnector>,
        api: Arc<dyn ControlApi>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::new());

        let established = tokio::time::timeout(
            opts.timeout,
            establish(dialer.as_ref(), connector.as_ref(), &opts, ""),
        )
        .await
        .map_err(|_| ClientError::ConnectionTimeout)??;

        let Established {
            link,
            auth,
            transport,
        } = established;
        shared.install(&auth, transport).await;
        info!(connection_id = %auth.connection_id, "connected");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = tokio::spawn(supervise(
            shared.clone(),
            dialer,
            connector,
            opts,
            link,
            auth.access_token_exp,
            shutdown_rx,
        ));

        Ok(Self {
            handle: ConnectionHandle { shared, api },
            shutdown,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// A clonable handle to pass to sessions
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// True while authenticated and the transport is usable
    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// Reconnection attempts made in the current outage
    pub fn reconnect_attempts(&self) -> u32 {
        self.handle.reconnect_attempts()
    }

    /// Close the connection: stop the supervisor and refresh timer, close
    /// the control socket and transport, clear credentials. Idempotent.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let task = self.supervisor.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
        // The supervisor normally performs teardown; cover the case where
        // it was already gone.
        if !matches!(
            self.handle.state(),
            ConnectionState::Failed | ConnectionState::Closed
        ) {
            self.handle.shared.teardown(ConnectionState::Closed).await;
        }
    }

    /// Create a factory on the control plane
    pub async fn create_factory(&self, name: &str, description: &str) -> Result<Factory> {
        Factory::create(self.handle.clone(), name, description).await
    }

    /// Handle to an existing factory
    pub fn factory(&self, name: &str) -> Factory {
        Factory::attach(self.handle.clone(), name)
    }

    /// Create a station under a factory
    pub async fn create_station(
        &self,
        name: &str,
        factory_name: &str,
        options: StationOptions,
    ) -> Result<Station> {
        Station::create(self.handle.clone(), name, factory_name, options).await
    }

    /// Handle to an existing station
    pub fn station(&self, name: &str) -> Station {
        Station::attach(self.handle.clone(), name)
    }

    /// Register a producer session on a station
    pub async fn producer(&self, station_name: &str, name: &str) -> Result<Producer> {
        Producer::create(self.handle.clone(), station_name, name).await
    }

    /// Register a consumer session on a station and start its pull loop
    pub async fn consumer(
        &self,
        station_name: &str,
        name: &str,
        options: ConsumerOptions,
    ) -> Result<Consumer> {
        Consumer::create(self.handle.clone(), station_name, name, options).await
    }
}

struct Established {
    link: Box<dyn ControlLink>,
    auth: AuthResponse,
    transport: Arc<dyn StreamTransport>,
}

/// One full connect sequence: dial, authenticate, open the transport.
/// Used verbatim for both the initial connect and every reconnect attempt.
async fn establish(
    dialer: &dyn ControlDialer,
    connector: &dyn TransportConnector,
    opts: &ConnectOptions,
    connection_id: &str,
) -> Result<Established> {
    let mut link = dialer.dial(opts.normalized_host(), opts.port).await?;

    let frame = serde_json::to_vec(&AuthRequest {
        username: &opts.username,
        broker_creds: &opts.connection_token,
        connection_id,
    })?;
    link.send(&frame).await?;

    let response = link.recv().await?.ok_or_else(|| {
        ClientError::Handshake("control socket closed during handshake".to_string())
    })?;
    let auth: AuthResponse = serde_json::from_slice(&response)
        .map_err(|e| ClientError::InvalidResponse(format!("malformed auth response: {e}")))?;

    let transport = connector
        .connect(&TransportOptions {
            server: format!(
                "{}:{}",
                opts.normalized_broker_host(),
                opts.broker_port
            ),
            token: opts.connection_token.clone(),
            reconnect: opts.reconnect,
            max_reconnect: opts.effective_max_reconnect(),
            reconnect_interval: opts.reconnect_interval,
            connect_timeout: opts.timeout,
        })
        .await?;

    Ok(Established {
        link,
        auth,
        transport,
    })
}

enum SessionEnd {
    Shutdown,
    LinkLost,
}

enum Reconnected {
    Active {
        link: Box<dyn ControlLink>,
        token_exp: u64,
    },
    Shutdown,
    Exhausted,
}

/// Supervisor task: owns the control socket and drives the state machine
async fn supervise(
    shared: Arc<Shared>,
    dialer: Arc<dyn ControlDialer>,
    connector: Arc<dyn TransportConnector>,
    opts: ConnectOptions,
    mut link: Box<dyn ControlLink>,
    mut token_exp_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let end = run_session(link.as_mut(), &shared, &mut shutdown, token_exp_ms).await;
        link.close().await;

        match end {
            SessionEnd::Shutdown => {
                shared.teardown(ConnectionState::Closed).await;
                return;
            }
            SessionEnd::LinkLost => {
                shared.set_state(ConnectionState::Disconnected);
                warn!("control socket closed");
            }
        }

        if !opts.reconnect || opts.effective_max_reconnect() == 0 {
            info!("reconnection disabled, cleaning up");
            shared.teardown(ConnectionState::Closed).await;
            return;
        }

        shared.set_state(ConnectionState::Reconnecting);
        match reconnect(
            &shared,
            dialer.as_ref(),
            connector.as_ref(),
            &opts,
            &mut shutdown,
        )
        .await
        {
            Reconnected::Active {
                link: new_link,
                token_exp,
            } => {
                link = new_link;
                token_exp_ms = token_exp;
            }
            Reconnected::Shutdown => {
                shared.teardown(ConnectionState::Closed).await;
                return;
            }
            Reconnected::Exhausted => {
                error!(
                    attempts = opts.effective_max_reconnect(),
                    "reconnection attempts exhausted"
                );
                shared.teardown(ConnectionState::Failed).await;
                return;
            }
        }
    }
}

fn refresh_delay(exp_ms: u64) -> Duration {
    // 0 means the token never expires
    if exp_ms == 0 {
        PARKED
    } else {
        Duration::from_millis(exp_ms)
    }
}

/// Serve one active session: token refreshes in both directions, until the
/// socket drops or the client shuts down.
async fn run_session(
    link: &mut dyn ControlLink,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
    token_exp_ms: u64,
) -> SessionEnd {
    let refresh = tokio::time::sleep(refresh_delay(token_exp_ms));
    tokio::pin!(refresh);
    let mut refresh_cadence = token_exp_ms;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return SessionEnd::Shutdown,

            _ = refresh.as_mut() => {
                if shared.state() != ConnectionState::Active {
                    refresh.as_mut().reset(tokio::time::Instant::now() + PARKED);
                    continue;
                }
                debug!("requesting access token refresh");
                let frame = match serde_json::to_vec(&RefreshRequest { resend_access_token: true }) {
                    Ok(frame) => frame,
                    Err(error) => {
                        warn!(%error, "failed to encode refresh request");
                        continue;
                    }
                };
                if link.send(&frame).await.is_err() {
                    return SessionEnd::LinkLost;
                }
                // Keep asking at the same cadence until the broker answers
                refresh.as_mut().reset(
                    tokio::time::Instant::now() + refresh_delay(refresh_cadence),
                );
            }

            frame = link.recv() => match frame {
                Ok(Some(bytes)) => match serde_json::from_slice::<TokenRefresh>(&bytes) {
                    Ok(token) => {
                        debug!(exp_ms = token.access_token_exp, "access token refreshed");
                        shared.update_token(token.access_token).await;
                        refresh_cadence = token.access_token_exp;
                        refresh.as_mut().reset(
                            tokio::time::Instant::now() + refresh_delay(token.access_token_exp),
                        );
                    }
                    Err(error) => debug!(%error, "ignoring unrecognized control frame"),
                },
                Ok(None) => return SessionEnd::LinkLost,
                Err(error) => {
                    warn!(%error, "control socket read failed");
                    return SessionEnd::LinkLost;
                }
            },
        }
    }
}

/// Retry the full connect sequence until it succeeds, the budget runs out,
/// or the client shuts down. The attempt counter lives in shared state so
/// handles can observe it; it resets inside `install` on success.
async fn reconnect(
    shared: &Shared,
    dialer: &dyn ControlDialer,
    connector: &dyn TransportConnector,
    opts: &ConnectOptions,
    shutdown: &mut watch::Receiver<bool>,
) -> Reconnected {
    let budget = opts.effective_max_reconnect();

    while shared.attempts() < budget {
        let attempt = shared.begin_attempt();

        tokio::select! {
            _ = tokio::time::sleep(opts.reconnect_interval) => {}
            _ = shutdown.changed() => return Reconnected::Shutdown,
        }

        // Original credentials are reused; the previously assigned
        // connection id is presented so the broker correlates the session.
        // Each attempt runs under its own deadline, so a hung dial or a
        // silent peer consumes the budget instead of stalling here.
        let connection_id = shared.connection_id().await;
        let result = tokio::select! {
            result = tokio::time::timeout(
                opts.timeout,
                establish(dialer, connector, opts, &connection_id),
            ) => result.unwrap_or(Err(ClientError::ConnectionTimeout)),
            _ = shutdown.changed() => return Reconnected::Shutdown,
        };

        match result {
            Ok(Established {
                link,
                auth,
                transport,
            }) => {
                let token_exp = auth.access_token_exp;
                shared.install(&auth, transport).await;
                info!(attempt, connection_id = %auth.connection_id, "reconnected");
                return Reconnected::Active { link, token_exp };
            }
            Err(error) => warn!(attempt, budget, %error, "reconnect attempt failed"),
        }
    }

    Reconnected::Exhausted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            ConnectionState::Active,
            ConnectionState::Disconnected,
            ConnectionState::Reconnecting,
            ConnectionState::Failed,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_refresh_delay_zero_parks_timer() {
        assert_eq!(refresh_delay(0), PARKED);
        assert_eq!(refresh_delay(250), Duration::from_millis(250));
    }
}
