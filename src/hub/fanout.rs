//! Fan-out of one notification to a snapshot of the live set
//!
//! Each notification gets its own task. To keep per-connection order when
//! several of those tasks overlap, the control loop chains the steps that
//! target the same connection: a step only starts enqueueing once the step
//! of the previous notification for that connection has finished. Chains of
//! different connections never wait on each other.

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::connection::Outbox;
use crate::error::FlappyoError;
use crate::models::{NotificationEvent, Payload};

/// Outcome of one fan-out round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Outboxes the payload was enqueued on
    pub delivered: usize,
    /// Outboxes that were already closed, or an encode failure
    pub skipped: usize,
    /// Outboxes that stayed full past the enqueue timeout and were evicted
    pub evicted: usize,
}

/// Live-set entry owned by the control loop
pub(crate) struct Subscriber {
    outbox: Outbox,
    /// Completes when the latest step handed out for this connection is done
    turn: Option<oneshot::Receiver<()>>,
}

impl Subscriber {
    pub(crate) fn new(outbox: Outbox) -> Self {
        Self { outbox, turn: None }
    }

    pub(crate) fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Hand out the next step in this connection's chain
    pub(crate) fn next_step(&mut self) -> FanoutStep {
        let (done, turn) = oneshot::channel();
        let after = self.turn.replace(turn);

        FanoutStep {
            outbox: self.outbox.clone(),
            after,
            done,
        }
    }
}

/// One connection's share of a fan-out round
pub(crate) struct FanoutStep {
    outbox: Outbox,
    after: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

enum StepResult {
    Delivered,
    Skipped,
    Evicted,
}

impl FanoutStep {
    async fn deliver(self, payload: Payload, timeout: Option<Duration>) -> StepResult {
        // A dropped predecessor (aborted round) also releases the turn.
        if let Some(previous) = self.after {
            let _ = previous.await;
        }

        let result = match self.outbox.enqueue(payload, timeout).await {
            Ok(()) => StepResult::Delivered,
            Err(FlappyoError::OutboxTimeout { id, waited }) => {
                warn!(connection = %id, "Outbox full for {:?}, evicting slow consumer", waited);
                self.outbox.evict();
                StepResult::Evicted
            }
            Err(e) => {
                debug!("Skipping fan-out step: {}", e);
                StepResult::Skipped
            }
        };

        let _ = self.done.send(());
        result
    }
}

/// Encode `event` once and enqueue it on every outbox in `steps`
pub(crate) async fn fan_out(
    event: NotificationEvent,
    steps: Vec<FanoutStep>,
    timeout: Option<Duration>,
    reply: Option<oneshot::Sender<FanoutReport>>,
) -> FanoutReport {
    let mut report = FanoutReport::default();

    match event.encode() {
        Ok(payload) => {
            let results = join_all(
                steps
                    .into_iter()
                    .map(|step| step.deliver(payload.clone(), timeout)),
            )
            .await;

            for result in results {
                match result {
                    StepResult::Delivered => report.delivered += 1,
                    StepResult::Skipped => report.skipped += 1,
                    StepResult::Evicted => report.evicted += 1,
                }
            }
        }
        Err(e) => {
            // Dropping the steps releases every chained turn.
            error!("Could not encode notification from {:?}: {}", event.origin, e);
            report.skipped = steps.len();
        }
    }

    debug!(
        "Fan-out for {:?} done: {} delivered, {} skipped, {} evicted",
        event.origin, report.delivered, report.skipped, report.evicted
    );

    if let Some(reply) = reply {
        let _ = reply.send(report);
    }
    report
}
