//! Consumer session.
//!
//! A consumer binds a name (and optional group) to one station and runs a
//! continuous pull loop against the streaming transport:
//!
//! ```text
//! CREATED → SUBSCRIBING → PULLING → (PULLING | STOPPED | ERROR)
//! ```
//!
//! Subscription setup happens asynchronously after creation, so setup
//! failures arrive as [`ConsumerEvent::Error`] on the event channel instead
//! of a returned error, since no caller is synchronously waiting on them.
//! Deliveries are emitted in transport order; the session never buffers or
//! reorders beyond the channel itself.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ConsumerOptions;
use crate::connection::ConnectionHandle;
use crate::error::{ClientError, Result};
use crate::message::Message;

/// Events emitted by a consumer session
pub enum ConsumerEvent {
    /// A delivered message, in transport delivery order
    Message(Message),
    /// A background failure (subscription setup or a failed pull)
    Error(ClientError),
}

impl std::fmt::Debug for ConsumerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
        }
    }
}

/// Consumer session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
    /// Session registered, subscription not yet opened
    Created = 0,
    /// Pull subscription being opened
    Subscribing = 1,
    /// Pull loop running
    Pulling = 2,
    /// Pull loop stopped (destroyed or listeners gone)
    Stopped = 3,
    /// Subscription setup failed
    Error = 4,
}

impl ConsumerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Subscribing,
            2 => Self::Pulling,
            3 => Self::Stopped,
            _ => Self::Error,
        }
    }
}

/// A consumer session bound to one station.
///
/// The pull loop runs in a background task; the session owns the
/// subscription handle exclusively and releases it on
/// [`destroy`](Self::destroy).
pub struct Consumer {
    name: String,
    group: Option<String>,
    station_name: String,
    handle: ConnectionHandle,
    events: mpsc::UnboundedReceiver<ConsumerEvent>,
    state: Arc<AtomicU8>,
    stop: watch::Sender<bool>,
    pull_task: Option<JoinHandle<()>>,
}

impl Consumer {
    pub(crate) async fn create(
        handle: ConnectionHandle,
        station_name: &str,
        name: &str,
        options: ConsumerOptions,
    ) -> Result<Self> {
        let name = name.to_lowercase();
        let station_name = station_name.to_lowercase();
        let group = options.group.as_deref().map(str::to_lowercase);

        let (token, connection_id) = handle.authorization().await?;
        handle
            .api()
            .create_consumer(
                &token,
                &name,
                &station_name,
                &connection_id,
                group.as_deref().unwrap_or(""),
            )
            .await?;
        info!(consumer = %name, station = %station_name, group = group.as_deref().unwrap_or(""), "consumer created");

        // The durable name is what lets instances sharing a group coordinate
        // broker-side delivery; a lone consumer is durable under its own name.
        let durable = group.clone().unwrap_or_else(|| name.clone());

        let (events_tx, events) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        let state = Arc::new(AtomicU8::new(ConsumerState::Created as u8));

        let pull_task = tokio::spawn(run_pull_loop(
            handle.clone(),
            station_name.clone(),
            durable,
            options,
            events_tx,
            state.clone(),
            stop_rx,
        ));

        Ok(Self {
            name,
            group,
            station_name,
            handle,
            events,
            state,
            stop,
            pull_task: Some(pull_task),
        })
    }

    /// Consumer name (lower-cased)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consumer group, if any (lower-cased)
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Station this consumer pulls from (lower-cased)
    pub fn station_name(&self) -> &str {
        &self.station_name
    }

    /// Current session state
    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Receive the next event.
    ///
    /// Returns `None` once the session has been destroyed and all pending
    /// events have been drained.
    pub async fn recv(&mut self) -> Option<ConsumerEvent> {
        self.events.recv().await
    }

    /// Receive the next event without waiting
    pub fn try_recv(&mut self) -> Option<ConsumerEvent> {
        self.events.try_recv().ok()
    }

    /// Stop the pull loop, release the subscription, and deregister this
    /// consumer from the control plane.
    ///
    /// Cooperative: an in-flight pull already dispatched to the broker is
    /// awaited, but its deliveries are discarded; once `destroy` returns,
    /// no further events are emitted. Delivered-but-unacknowledged messages
    /// are left to the broker's redelivery policy.
    pub async fn destroy(&mut self) -> Result<()> {
        let _ = self.stop.send(true);
        if let Some(task) = self.pull_task.take() {
            let _ = task.await;
        }
        // Close the channel and drop anything still buffered so nothing is
        // observed after teardown.
        self.events.close();
        while self.events.try_recv().is_ok() {}

        let token = self.handle.access_token().await?;
        self.handle
            .api()
            .destroy_consumer(&token, &self.name, &self.station_name)
            .await
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("station_name", &self.station_name)
            .field("state", &self.state())
            .finish()
    }
}

fn set_state(state: &AtomicU8, value: ConsumerState) {
    state.store(value as u8, Ordering::SeqCst);
}

/// Background pull loop: open the subscription, pull once immediately, then
/// pull on every tick. Pulls run sequentially inside this task, so there is
/// never more than one in flight; steady-state cadence is one pull per
/// `pull_interval`.
async fn run_pull_loop(
    handle: ConnectionHandle,
    station_name: String,
    durable: String,
    options: ConsumerOptions,
    events: mpsc::UnboundedSender<ConsumerEvent>,
    state: Arc<AtomicU8>,
    mut stop: watch::Receiver<bool>,
) {
    set_state(&state, ConsumerState::Subscribing);

    let transport = match handle.transport().await {
        Ok(transport) => transport,
        Err(error) => {
            let _ = events.send(ConsumerEvent::Error(error));
            set_state(&state, ConsumerState::Error);
            return;
        }
    };

    let mut subscription = match transport.pull_subscribe(&station_name, &durable).await {
        Ok(subscription) => subscription,
        Err(error) => {
            warn!(station = %station_name, %durable, %error, "subscription setup failed");
            let _ = events.send(ConsumerEvent::Error(error));
            set_state(&state, ConsumerState::Error);
            return;
        }
    };

    set_state(&state, ConsumerState::Pulling);
    debug!(station = %station_name, %durable, "pull loop started");

    // First tick fires immediately: that is the initial pull at
    // subscription time. Delay semantics keep the steady-state cadence at
    // one pull per interval even after a slow fetch.
    let mut ticker = tokio::time::interval(options.pull_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = stop.changed() => break,

            _ = ticker.tick() => {
                match subscription.fetch(options.batch_size, options.batch_max_wait).await {
                    Ok(deliveries) => {
                        for delivery in deliveries {
                            // Suppress deliveries from a pull that was in
                            // flight when destroy was requested.
                            if *stop.borrow() {
                                set_state(&state, ConsumerState::Stopped);
                                return;
                            }
                            if events.send(ConsumerEvent::Message(Message::new(delivery))).is_err() {
                                // All listeners are gone
                                set_state(&state, ConsumerState::Stopped);
                                return;
                            }
                        }
                    }
                    Err(error) => {
                        warn!(station = %station_name, %durable, %error, "pull failed");
                        if events.send(ConsumerEvent::Error(error)).is_err() {
                            set_state(&state, ConsumerState::Stopped);
                            return;
                        }
                    }
                }
            }
        }
    }

    set_state(&state, ConsumerState::Stopped);
    debug!(station = %station_name, %durable, "pull loop stopped");
}
