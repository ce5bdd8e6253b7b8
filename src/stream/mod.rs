pub mod stomp;
pub mod websocket;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use uuid::Uuid;

use crate::errors::ReplayError;
use crate::telemetry::{CarState, TelemetryStore, decode_batch};

pub use websocket::StompConnector;

/// Destination that accepts snapshot requests.
pub const SNAPSHOT_DESTINATION: &str = "/app/race/data";

/// Correlation token routing pushed snapshots back to the viewer that requested them. Stable for
/// the lifetime of a controller; not a credential.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(format!("client-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-viewer topic on which snapshots for `session_key` are pushed.
pub fn topic_for(session_key: u32, client_id: &ClientId) -> String {
    format!("/topic/race/{session_key}/{client_id}")
}

/// Body of a snapshot request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    pub year: i32,
    pub session_key: u32,
    /// Requested virtual time, epoch milliseconds
    pub start_time: i64,
    pub client_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Lifecycle and data events reported by a transport.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// The backend confirmed the connection.
    Opened,
    /// A message arrived on the subscription.
    Message(String),
    /// The transport is gone, either cleanly or with a failure reason.
    Closed { reason: Option<String> },
}

/// A transport event stamped with the connection it came from.
#[derive(Clone, Debug)]
pub struct SessionEvent {
    generation: u64,
    event: TransportEvent,
}

impl SessionEvent {
    pub fn event(&self) -> &TransportEvent {
        &self.event
    }
}

/// Handle a transport uses to report events back to its owning session.
#[derive(Clone, Debug)]
pub struct EventSink {
    generation: u64,
    tx: UnboundedSender<SessionEvent>,
}

impl EventSink {
    /// Returns `false` once the session side has gone away.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// An open connection to the streaming backend.
pub trait Transport: Send {
    fn subscribe(&mut self, topic: &str) -> Result<(), ReplayError>;

    fn publish(&mut self, destination: &str, body: String) -> Result<(), ReplayError>;

    /// Tear down the connection. Events emitted afterwards are ignored by the session.
    fn close(&mut self);
}

/// Factory for transports. Opening must not block: the connection is established in the
/// background and confirmed with [`TransportEvent::Opened`].
pub trait Connector: Send {
    fn open(&mut self, sink: EventSink) -> Result<Box<dyn Transport>, ReplayError>;
}

/// What handling a [`SessionEvent`] changed.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamOutcome {
    StateChanged(SubscriptionState),
    /// A batch was merged into the store.
    Merged(Vec<CarState>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SessionBinding {
    year: i32,
    session_key: u32,
}

/// Owner of the single backend subscription for one (year, session) pair.
///
/// Connections are never retried here; after a transport failure the session stays
/// `Disconnected` until the owner calls [`connect`](Self::connect) again. Every connection gets a
/// new generation number so events still in flight from a torn-down transport are discarded.
pub struct StreamSession {
    client_id: ClientId,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    binding: Option<SessionBinding>,
    state: SubscriptionState,
    generation: u64,
    events_tx: UnboundedSender<SessionEvent>,
    last_received_at: Option<Instant>,
    last_requested: Option<DateTime<Utc>>,
    stale_tolerance: Option<TimeDelta>,
}

impl StreamSession {
    pub fn new(
        client_id: ClientId,
        connector: Box<dyn Connector>,
        events_tx: UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            client_id,
            connector,
            transport: None,
            binding: None,
            state: SubscriptionState::Disconnected,
            generation: 0,
            events_tx,
            last_received_at: None,
            last_requested: None,
            stale_tolerance: None,
        }
    }

    /// Drop pushed batches whose newest sample is farther than `tolerance` from the most recently
    /// requested virtual time. Without a tolerance every batch is merged in arrival order.
    pub fn with_stale_tolerance(mut self, tolerance: Option<Duration>) -> Self {
        self.stale_tolerance =
            tolerance.map(|tolerance| TimeDelta::from_std(tolerance).unwrap_or(TimeDelta::MAX));
        self
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn session_key(&self) -> Option<u32> {
        self.binding.map(|binding| binding.session_key)
    }

    pub fn last_received_at(&self) -> Option<Instant> {
        self.last_received_at
    }

    /// Whether a batch was merged within the last `window`.
    pub fn is_receiving(&self, window: Duration) -> bool {
        self.last_received_at
            .is_some_and(|received| received.elapsed() < window)
    }

    /// Open a fresh subscription for `session_key`, tearing down any existing one first.
    pub fn connect(&mut self, year: i32, session_key: u32) -> Result<(), ReplayError> {
        self.disconnect();

        self.generation += 1;
        self.binding = Some(SessionBinding { year, session_key });
        let sink = EventSink {
            generation: self.generation,
            tx: self.events_tx.clone(),
        };

        match self.connector.open(sink) {
            Ok(transport) => {
                info!(
                    "Stream: connecting to session {} as {}",
                    session_key, self.client_id
                );
                self.transport = Some(transport);
                self.state = SubscriptionState::Connecting;
                Ok(())
            }
            Err(e) => {
                warn!("Stream: could not open transport: {}", e);
                self.state = SubscriptionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Tear down the subscription and transport. Safe to call repeatedly; returns `true` only
    /// when the state actually changed.
    pub fn disconnect(&mut self) -> bool {
        if let Some(mut transport) = self.transport.take() {
            debug!("Stream: closing transport generation {}", self.generation);
            transport.close();
        }
        // invalidate anything still queued from the old transport
        self.generation += 1;
        self.last_requested = None;

        let changed = self.state != SubscriptionState::Disconnected;
        self.state = SubscriptionState::Disconnected;
        changed
    }

    /// Fire-and-forget request for a snapshot at `virtual_time`. Silently skipped unless
    /// connected; the response arrives later as a pushed batch.
    pub fn request_snapshot(&mut self, virtual_time: DateTime<Utc>) -> bool {
        let (Some(binding), Some(transport)) = (self.binding, self.transport.as_mut()) else {
            return false;
        };
        if self.state != SubscriptionState::Connected {
            debug!("Stream: not connected, skipping snapshot request");
            return false;
        }

        let request = SnapshotRequest {
            year: binding.year,
            session_key: binding.session_key,
            start_time: virtual_time.timestamp_millis(),
            client_id: self.client_id.to_string(),
        };
        let body = match serde_json::to_string(&request) {
            Ok(body) => body,
            Err(e) => {
                warn!("Stream: {}", ReplayError::RequestEncoding { source: e });
                return false;
            }
        };

        match transport.publish(SNAPSHOT_DESTINATION, body) {
            Ok(()) => {
                self.last_requested = Some(virtual_time);
                true
            }
            Err(e) => {
                // the transport reports its own Closed event; nothing to retry here
                warn!("Stream: snapshot request failed: {}", e);
                false
            }
        }
    }

    /// Apply one transport event. Events from superseded transports are ignored.
    pub fn handle_event(
        &mut self,
        event: SessionEvent,
        store: &mut TelemetryStore,
    ) -> Option<StreamOutcome> {
        if event.generation != self.generation {
            debug!(
                "Stream: ignoring event from stale transport generation {}",
                event.generation
            );
            return None;
        }

        match event.event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message(body) => self.on_message(&body, store),
            TransportEvent::Closed { reason } => {
                match reason {
                    Some(reason) => warn!("Stream: transport closed: {}", reason),
                    None => info!("Stream: transport closed"),
                }
                self.transport = None;
                self.generation += 1;
                if self.state == SubscriptionState::Disconnected {
                    return None;
                }
                self.state = SubscriptionState::Disconnected;
                Some(StreamOutcome::StateChanged(SubscriptionState::Disconnected))
            }
        }
    }

    fn on_opened(&mut self) -> Option<StreamOutcome> {
        let binding = self.binding?;
        let transport = self.transport.as_mut()?;
        if self.state == SubscriptionState::Connected {
            return None;
        }

        let topic = topic_for(binding.session_key, &self.client_id);
        if let Err(e) = transport.subscribe(&topic) {
            warn!("Stream: could not subscribe to {}: {}", topic, e);
            return None;
        }
        info!("Stream: subscribed to {}", topic);
        self.state = SubscriptionState::Connected;
        Some(StreamOutcome::StateChanged(SubscriptionState::Connected))
    }

    fn on_message(&mut self, body: &str, store: &mut TelemetryStore) -> Option<StreamOutcome> {
        let batch = match decode_batch(body) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Stream: dropping push: {}", e);
                return None;
            }
        };
        if batch.is_empty() {
            return None;
        }
        if self.is_stale(&batch) {
            debug!("Stream: dropping batch for a superseded virtual time");
            return None;
        }

        self.last_received_at = Some(Instant::now());
        store.merge_batch(batch.iter().cloned());
        Some(StreamOutcome::Merged(batch))
    }

    fn is_stale(&self, batch: &[CarState]) -> bool {
        let (Some(tolerance), Some(requested)) = (self.stale_tolerance, self.last_requested) else {
            return false;
        };
        batch
            .iter()
            .map(|car| car.timestamp)
            .max()
            .is_some_and(|newest| (newest - requested).abs() > tolerance)
    }
}
