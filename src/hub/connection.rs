//! Connection records and their delivery loop
//!
//! Opening a connection yields two halves: the [`Connection`] record handed
//! to the hub, and the [`DeliveryLoop`] that owns the transport and is the
//! only consumer of the outbox.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::{FlappyoError, Result};
use crate::models::Payload;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity, used as the live-set key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound half of a duplex client transport
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write one text frame
    async fn send_text(&mut self, payload: &str) -> Result<()>;

    /// Close the transport. Must be safe to call more than once.
    async fn close(&mut self);
}

/// Lifecycle of an outbox. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutboxState {
    Open,
    /// No new payloads; what is queued still gets written
    Closed,
    /// No new payloads; the queue and any in-flight write are dropped
    Evicted,
}

/// Producer side of a connection's bounded outbox
///
/// Cloned into every fan-out step targeting the connection. Closing is
/// one-way: a closed outbox rejects every later enqueue with
/// [`FlappyoError::OutboxClosed`]. Evicting goes further and also tears
/// down the delivery loop, even in the middle of a write.
#[derive(Clone)]
pub struct Outbox {
    id: ConnectionId,
    tx: mpsc::Sender<Payload>,
    state: Arc<watch::Sender<OutboxState>>,
}

impl Outbox {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        *self.state.borrow() != OutboxState::Open || self.tx.is_closed()
    }

    pub fn is_evicted(&self) -> bool {
        *self.state.borrow() == OutboxState::Evicted
    }

    /// Close the outbox. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == OutboxState::Open {
                *state = OutboxState::Closed;
                true
            } else {
                false
            }
        })
    }

    /// Close the outbox and make the delivery loop give up on everything it
    /// holds. Returns `true` only for the call that evicted it.
    pub fn evict(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == OutboxState::Evicted {
                false
            } else {
                *state = OutboxState::Evicted;
                true
            }
        })
    }

    /// Enqueue a payload, waiting while the outbox is full
    ///
    /// With `timeout` set the wait for room is bounded and fails with
    /// [`FlappyoError::OutboxTimeout`]; with `None` it waits until room frees
    /// up or the outbox is closed.
    pub async fn enqueue(&self, payload: Payload, timeout: Option<Duration>) -> Result<()> {
        if self.is_closed() {
            return Err(FlappyoError::OutboxClosed { id: self.id });
        }

        let reserved = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.tx.reserve())
                .await
                .map_err(|_| FlappyoError::OutboxTimeout {
                    id: self.id,
                    waited: limit,
                })?,
            None => self.tx.reserve().await,
        };
        let permit = reserved.map_err(|_| FlappyoError::OutboxClosed { id: self.id })?;

        // The outbox may have been closed while we waited for room.
        if *self.state.borrow() != OutboxState::Open {
            return Err(FlappyoError::OutboxClosed { id: self.id });
        }

        permit.send(payload);
        Ok(())
    }
}

/// Hub-side record of one client session
pub struct Connection {
    outbox: Outbox,
}

impl Connection {
    /// Create a connection around `transport` with an empty outbox
    pub fn open<T: Transport>(transport: T, outbox_capacity: usize) -> (Self, DeliveryLoop<T>) {
        Self::with_id(ConnectionId::next(), transport, outbox_capacity)
    }

    pub(crate) fn with_id<T: Transport>(
        id: ConnectionId,
        transport: T,
        outbox_capacity: usize,
    ) -> (Self, DeliveryLoop<T>) {
        let (tx, rx) = mpsc::channel(outbox_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(OutboxState::Open);

        let outbox = Outbox {
            id,
            tx,
            state: Arc::new(state_tx),
        };
        let delivery = DeliveryLoop {
            id,
            transport,
            rx,
            state: state_rx,
        };

        (Self { outbox }, delivery)
    }

    pub fn id(&self) -> ConnectionId {
        self.outbox.id
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub(crate) fn into_outbox(self) -> Outbox {
        self.outbox
    }
}

/// Why a delivery loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The outbox was closed and everything queued was written
    Drained,
    /// A write failed; the rest of the outbox was discarded
    TransportFailed,
    /// The outbox was evicted; queued payloads and any in-flight write were
    /// dropped
    Evicted,
}

/// Consumer side of a connection: drains the outbox into the transport
pub struct DeliveryLoop<T> {
    id: ConnectionId,
    transport: T,
    rx: mpsc::Receiver<Payload>,
    state: watch::Receiver<OutboxState>,
}

impl<T: Transport> DeliveryLoop<T> {
    /// Write queued payloads until the outbox is closed and empty, a write
    /// fails, or the outbox is evicted. The transport is closed on the way
    /// out in every case.
    pub async fn run(mut self) -> DeliveryOutcome {
        let mut closing = false;

        let outcome = loop {
            let state = *self.state.borrow_and_update();
            if state == OutboxState::Evicted {
                debug!(connection = %self.id, "Outbox evicted, dropping queue");
                break DeliveryOutcome::Evicted;
            }
            if state == OutboxState::Closed && !closing {
                debug!(connection = %self.id, "Outbox closed, draining");
                closing = true;
                self.rx.close();
            }

            tokio::select! {
                biased;
                changed = self.state.changed(), if !closing => {
                    if changed.is_err() {
                        // Every Outbox handle is gone; nothing more can arrive.
                        closing = true;
                        self.rx.close();
                    }
                }
                payload = self.rx.recv() => match payload {
                    Some(payload) => {
                        // A stuck write must not outlive an eviction.
                        let written = tokio::select! {
                            biased;
                            _ = evicted(&mut self.state) => None,
                            result = self.transport.send_text(&payload) => Some(result),
                        };
                        match written {
                            Some(Ok(())) => {}
                            Some(Err(e)) => {
                                debug!(connection = %self.id, "Write failed: {}", e);
                                break DeliveryOutcome::TransportFailed;
                            }
                            None => {
                                debug!(connection = %self.id, "Outbox evicted during write");
                                break DeliveryOutcome::Evicted;
                            }
                        }
                    }
                    None => break DeliveryOutcome::Drained,
                }
            }
        };

        self.rx.close();
        self.transport.close().await;
        outcome
    }

    /// Close the transport without delivering anything
    pub async fn abandon(mut self) {
        self.rx.close();
        self.transport.close().await;
    }
}

/// Resolve once the outbox is evicted. Never resolves if every Outbox handle
/// is dropped first.
async fn evicted(state: &mut watch::Receiver<OutboxState>) {
    loop {
        if *state.borrow_and_update() == OutboxState::Evicted {
            return;
        }
        if state.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
