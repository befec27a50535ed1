//! Transport-independent consume loops.
//!
//! Both loops take one `outstanding` permit per delivery, run the handler and
//! settle the delivery before releasing the permit, so `max_outstanding = 1`
//! serialises handlers across every consumer sharing the semaphore.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{Disposition, MessageHandler, QueueError, QueueMessage, QueueResult};
use crate::common::bounded::pause;

/// Broker handle that settles one delivery.
#[async_trait]
pub trait Settlement: Send {
    async fn settle(self: Box<Self>, disposition: Disposition) -> QueueResult<()>;
}

/// A delivery paired with the handle that settles it.
pub struct Inbound {
    pub message: QueueMessage,
    pub settlement: Box<dyn Settlement>,
}

/// Run the handler on one delivery and settle it exactly once.
pub async fn deliver(
    inbound: Inbound,
    handler: &dyn MessageHandler,
    cancel: &CancellationToken,
) -> Disposition {
    let Inbound {
        message,
        settlement,
    } = inbound;
    let id = message.id.clone();

    let disposition = handler.handle(message, cancel.clone()).await;

    match settlement.settle(disposition).await {
        Ok(()) => debug!(job_id = %id, "Settled message with {:?}", disposition),
        // The broker redelivers once the channel lease lapses.
        Err(e) => error!(job_id = %id, "Failed to {:?} message: {}", disposition, e),
    }
    disposition
}

fn limiter_closed() -> QueueError {
    QueueError::SubscriptionFailed("outstanding limiter closed".to_string())
}

/// Consume a pushed delivery stream until cancelled or the stream fails.
pub async fn stream_consume<S>(
    mut deliveries: S,
    outstanding: Arc<Semaphore>,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) -> QueueResult<()>
where
    S: Stream<Item = QueueResult<Inbound>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            next = deliveries.next() => next,
        };

        let inbound = match next {
            Some(Ok(inbound)) => inbound,
            Some(Err(e)) => return Err(e),
            None => {
                return Err(QueueError::SubscriptionFailed(
                    "consumer stream closed".to_string(),
                ));
            }
        };

        let _permit = outstanding.acquire().await.map_err(|_| limiter_closed())?;
        deliver(inbound, handler.as_ref(), &cancel).await;
    }
}

/// Pull one delivery at a time with `fetch`, sleeping `poll_interval` when empty.
pub async fn poll_consume<F, Fut>(
    mut fetch: F,
    poll_interval: Duration,
    outstanding: Arc<Semaphore>,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) -> QueueResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = QueueResult<Option<Inbound>>>,
{
    loop {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            permit = outstanding.clone().acquire_owned() => permit.map_err(|_| limiter_closed())?,
        };

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            fetched = fetch() => fetched?,
        };

        match fetched {
            Some(inbound) => {
                deliver(inbound, handler.as_ref(), &cancel).await;
                drop(permit);
            }
            None => {
                drop(permit);
                if !pause(poll_interval, &cancel).await {
                    return Ok(());
                }
            }
        }
    }
}
