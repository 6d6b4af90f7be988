//! Background status polling for eService payments
//!
//! eService reports pending payments through a callback and settles them
//! later. A pending callback queues the payment here; a worker then asks the
//! order status API until it gets a terminal answer or the retry budget runs
//! out, in which case the payment is marked abandoned.

use crate::config::PollingPolicy;
use crate::error::{AppResult, InfrastructureError};
use crate::payments::host::StatusTaskScheduler;
use crate::payments::providers::EserviceAdapter;
use crate::payments::types::{Payment, PaymentId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub type StatusTaskReceiver = mpsc::UnboundedReceiver<PaymentId>;

/// Sending half of the polling queue, handed to the eService backend
#[derive(Debug, Clone)]
pub struct StatusTaskQueue {
    sender: mpsc::UnboundedSender<PaymentId>,
}

pub fn status_task_channel() -> (StatusTaskQueue, StatusTaskReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (StatusTaskQueue { sender }, receiver)
}

impl StatusTaskScheduler for StatusTaskQueue {
    fn schedule(&self, payment_id: PaymentId) -> AppResult<()> {
        self.sender.send(payment_id).map_err(|_| {
            InfrastructureError::Scheduler {
                message: format!("status worker stopped, cannot poll payment {}", payment_id),
            }
            .into()
        })
    }
}

/// How a polling task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Settled,
    Abandoned,
    PaymentMissing,
}

/// Poll the order status until it is terminal, at most `max_retries + 1` times.
pub async fn poll_payment_status(
    adapter: &EserviceAdapter,
    payment_id: PaymentId,
    policy: &PollingPolicy,
) -> PollOutcome {
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.delay).await;
        }

        match adapter.check_order_status(payment_id).await {
            Ok(true) => {
                info!("Payment {} settled after {} attempt(s)", payment_id, attempt + 1);
                return PollOutcome::Settled;
            }
            Ok(false) => {
                debug!("Payment {} not settled yet (attempt {})", payment_id, attempt + 1);
            }
            Err(e) if e.is_not_found() => {
                error!("Payment does not exist pk={}", payment_id);
                return PollOutcome::PaymentMissing;
            }
            Err(e) => {
                warn!(
                    "Status check for payment {} failed (attempt {}): {}",
                    payment_id,
                    attempt + 1,
                    e
                );
            }
        }
    }

    warn!(
        "Giving up on payment {} after {} retries, marking it abandoned",
        payment_id, policy.max_retries
    );
    if let Err(e) = adapter
        .payments()
        .atomic_update(payment_id, Box::new(|p: &mut Payment| p.abandon()))
        .await
    {
        error!("Failed to mark payment {} abandoned: {}", payment_id, e);
    }
    PollOutcome::Abandoned
}

/// Receive queued payment ids and poll each one in its own task
pub async fn run_status_worker(
    mut receiver: StatusTaskReceiver,
    adapter: Arc<EserviceAdapter>,
    policy: PollingPolicy,
) {
    info!("eService status worker started");
    while let Some(payment_id) = receiver.recv().await {
        let adapter = adapter.clone();
        let policy = policy.clone();
        tokio::spawn(async move {
            poll_payment_status(&adapter, payment_id, &policy).await;
        });
    }
    info!("eService status worker stopped");
}
