//! Connection registry and broadcast hub
//!
//! [`Hub`] is a cheap, cloneable handle over three channels feeding a single
//! control loop ([`HubRunner`]). The loop is the only code that touches the
//! live-connection set, so the set needs no lock. Every notification is fanned
//! out by its own task, keeping the loop free to service registrations while
//! a slow client back-pressures a broadcast.

mod connection;
mod fanout;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::error::{FlappyoError, Result};
use crate::models::NotificationEvent;

pub use connection::{Connection, ConnectionId, DeliveryLoop, DeliveryOutcome, Outbox, Transport};
pub use fanout::FanoutReport;

use fanout::Subscriber;

/// Read-only snapshot of the live-connection set
pub type LiveSet = Arc<BTreeSet<ConnectionId>>;

/// Hub tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Payloads buffered per connection before fan-out waits
    pub outbox_capacity: usize,
    /// Notifications buffered ahead of the control loop
    pub notify_capacity: usize,
    /// How long a fan-out waits on a full outbox before evicting the
    /// connection. `None` waits indefinitely.
    pub enqueue_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 256,
            notify_capacity: 1024,
            enqueue_timeout: Some(Duration::from_secs(5)),
        }
    }
}

struct NotifyRequest {
    event: NotificationEvent,
    reply: Option<oneshot::Sender<FanoutReport>>,
}

/// Everything the control loop reacts to
enum HubEvent {
    Register(Connection),
    Unregister(ConnectionId),
    Notify(NotifyRequest),
}

/// Handle used by route handlers and connection sessions
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::UnboundedSender<Connection>,
    unregister_tx: mpsc::UnboundedSender<ConnectionId>,
    notify_tx: mpsc::Sender<NotifyRequest>,
    live: watch::Receiver<LiveSet>,
    outbox_capacity: usize,
}

impl Hub {
    /// Create a hub handle and the control loop that serves it
    ///
    /// Nothing happens until [`HubRunner::run`] is polled.
    pub fn new(config: HubConfig) -> (Self, HubRunner) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::channel(config.notify_capacity.max(1));
        let (live_tx, live_rx) = watch::channel(LiveSet::default());

        let hub = Self {
            register_tx,
            unregister_tx,
            notify_tx,
            live: live_rx,
            outbox_capacity: config.outbox_capacity,
        };
        let runner = HubRunner {
            config,
            register_rx,
            unregister_rx,
            notify_rx,
            live_tx,
            connections: HashMap::new(),
            fanouts: JoinSet::new(),
        };

        (hub, runner)
    }

    /// Wrap a freshly upgraded transport in a connection sized for this hub
    pub fn open_connection<T: Transport>(&self, transport: T) -> (Connection, DeliveryLoop<T>) {
        Connection::open(transport, self.outbox_capacity)
    }

    /// Add a connection to the live set
    ///
    /// The connection is moved in, so it can only ever be registered once.
    pub fn register(&self, connection: Connection) -> Result<()> {
        self.register_tx
            .send(connection)
            .map_err(|_| FlappyoError::HubClosed)
    }

    /// Remove a connection from the live set and close its outbox
    ///
    /// Unregistering an id that is no longer live is a no-op.
    pub fn unregister(&self, id: ConnectionId) -> Result<()> {
        self.unregister_tx
            .send(id)
            .map_err(|_| FlappyoError::HubClosed)
    }

    /// Queue a notification for fan-out, waiting while the queue is full
    pub async fn notify(&self, event: NotificationEvent) -> Result<()> {
        self.notify_tx
            .send(NotifyRequest { event, reply: None })
            .await
            .map_err(|_| FlappyoError::HubClosed)
    }

    /// Queue a notification and wait until its fan-out has finished
    pub async fn broadcast(&self, event: NotificationEvent) -> Result<FanoutReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.notify_tx
            .send(NotifyRequest {
                event,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| FlappyoError::HubClosed)?;

        reply_rx.await.map_err(|_| FlappyoError::HubClosed)
    }

    /// Run one connection's full lifecycle
    ///
    /// Registers the connection, drives its delivery loop in place until the
    /// outbox is closed or evicted or a write fails, then unregisters it
    /// exactly once.
    pub async fn attach<T: Transport>(
        &self,
        connection: Connection,
        delivery: DeliveryLoop<T>,
    ) -> Result<DeliveryOutcome> {
        let id = connection.id();

        if let Err(e) = self.register(connection) {
            delivery.abandon().await;
            return Err(e);
        }
        info!(connection = %id, "Connection registered");

        let outcome = delivery.run().await;

        if let Err(e) = self.unregister(id) {
            // The hub already closed every outbox on its way down.
            debug!(connection = %id, "Unregister skipped: {}", e);
        }
        info!(connection = %id, "Connection finished ({:?})", outcome);

        Ok(outcome)
    }

    /// Snapshot of the live set as of the last processed event
    pub fn live_connections(&self) -> LiveSet {
        self.live.borrow().clone()
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    /// Wait until the live set satisfies `predicate`
    pub async fn wait_for_live<F>(&self, mut predicate: F) -> Result<LiveSet>
    where
        F: FnMut(&BTreeSet<ConnectionId>) -> bool,
    {
        let mut live = self.live.clone();
        let set = live
            .wait_for(|set| predicate(set))
            .await
            .map_err(|_| FlappyoError::HubClosed)?;
        Ok(Arc::clone(&set))
    }
}

/// The hub's control loop and the state only it may touch
pub struct HubRunner {
    config: HubConfig,
    register_rx: mpsc::UnboundedReceiver<Connection>,
    unregister_rx: mpsc::UnboundedReceiver<ConnectionId>,
    notify_rx: mpsc::Receiver<NotifyRequest>,
    live_tx: watch::Sender<LiveSet>,
    connections: HashMap<ConnectionId, Subscriber>,
    fanouts: JoinSet<FanoutReport>,
}

impl HubRunner {
    /// Serve hub events until `shutdown` flips to true or its sender is
    /// dropped. On the way out every outbox is closed and in-flight fan-outs
    /// are aborted.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Hub control loop started");

        loop {
            let event = tokio::select! {
                Some(connection) = self.register_rx.recv() => HubEvent::Register(connection),
                Some(id) = self.unregister_rx.recv() => HubEvent::Unregister(id),
                Some(request) = self.notify_rx.recv() => HubEvent::Notify(request),
                Some(joined) = self.fanouts.join_next(), if !self.fanouts.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Fan-out task failed: {}", e);
                    }
                    continue;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Hub shutting down");
                        break;
                    }
                    continue;
                }
                else => break,
            };

            self.handle(event);
        }

        self.shut_down().await;
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(connection) => match self.connections.entry(connection.id()) {
                Entry::Occupied(entry) => {
                    // Keep the live record; release the newcomer's session.
                    warn!(connection = %entry.key(), "Already registered, ignoring duplicate");
                    connection.outbox().close();
                }
                Entry::Vacant(entry) => {
                    let id = *entry.key();
                    entry.insert(Subscriber::new(connection.into_outbox()));
                    debug!(connection = %id, "Added to live set ({} live)", self.connections.len());
                    self.publish();
                }
            },
            HubEvent::Unregister(id) => match self.connections.remove(&id) {
                Some(subscriber) => {
                    subscriber.outbox().close();
                    debug!(connection = %id, "Removed from live set ({} live)", self.connections.len());
                    self.publish();
                }
                None => debug!(connection = %id, "Already unregistered"),
            },
            HubEvent::Notify(NotifyRequest { event, reply }) => {
                info!("yo {}", event.origin);
                let steps = self
                    .connections
                    .values_mut()
                    .map(Subscriber::next_step)
                    .collect();
                self.fanouts.spawn(fanout::fan_out(
                    event,
                    steps,
                    self.config.enqueue_timeout,
                    reply,
                ));
            }
        }
    }

    fn publish(&self) {
        let live: BTreeSet<ConnectionId> = self.connections.keys().copied().collect();
        self.live_tx.send_replace(Arc::new(live));
    }

    async fn shut_down(mut self) {
        for (_, subscriber) in self.connections.drain() {
            subscriber.outbox().close();
        }
        self.publish();

        // Connections that never made it into the live set still need their
        // delivery loops released.
        self.register_rx.close();
        while let Ok(connection) = self.register_rx.try_recv() {
            connection.outbox().close();
        }

        self.fanouts.shutdown().await;
        info!("Hub control loop stopped");
    }
}
