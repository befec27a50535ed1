use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker, message::Delivery, options::*, types::FieldTable, types::ShortString,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::consume::{poll_consume, stream_consume, Inbound, Settlement};
use super::{
    derive_message_id, Disposition, JobPublisher, MessageHandler, QueueError, QueueMessage, QueueResult,
    ReceiveSettings,
};

#[derive(Clone)]
pub struct RabbitMqService {
    url: String,
    conn: Arc<Mutex<Connection>>,
    channel: Arc<Mutex<Channel>>,
}

impl RabbitMqService {
    async fn connect(url: &str) -> QueueResult<(Connection, Channel)> {
        info!("Connecting to RabbitMQ");
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| QueueError::ConnectionFailed(format!("create channel: {}", e)))?;

        info!("Connected to RabbitMQ");
        Ok((conn, channel))
    }

    pub async fn new(url: &str) -> QueueResult<Self> {
        let (conn, channel) = Self::connect(url).await?;

        Ok(Self {
            url: url.to_string(),
            conn: Arc::new(Mutex::new(conn)),
            channel: Arc::new(Mutex::new(channel)),
        })
    }

    async fn reconnect(&self) -> QueueResult<()> {
        warn!("RabbitMQ connection dropped, reconnecting...");
        let (conn, channel) = Self::connect(&self.url).await?;
        *self.conn.lock().await = conn;
        *self.channel.lock().await = channel;
        Ok(())
    }

    async fn publish_internal(&self, queue: &str, payload: &[u8], message_id: &str) -> QueueResult<()> {
        let channel = self.channel.lock().await;

        declare(&channel, queue).await?;

        let properties = BasicProperties::default()
            .with_delivery_mode(2) // Persistent
            .with_content_type(ShortString::from("application/json"))
            .with_message_id(ShortString::from(message_id.to_string()));

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| QueueError::PublishFailed(e.to_string()))?
            .await
            .map_err(|e| QueueError::PublishFailed(format!("confirmation: {}", e)))?;

        Ok(())
    }

    /// Publish a job and return the message id the worker will see.
    pub async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<String> {
        let message_id = Uuid::new_v4().to_string();

        if let Err(e) = self.publish_internal(queue, payload, &message_id).await {
            warn!("RabbitMQ publish failed: {}. Retrying after reconnect.", e);
            self.reconnect().await?;
            self.publish_internal(queue, payload, &message_id).await?;
        }

        debug!(message_id = %message_id, "Published job to '{}'", queue);
        Ok(message_id)
    }

    /// Feed deliveries from `queue` to `handler` until `cancel` fires.
    ///
    /// Returns `Ok(())` on cancellation and an error when the transport fails;
    /// the caller treats the latter as fatal.
    pub async fn subscribe(
        &self,
        queue: &str,
        settings: &ReceiveSettings,
        handler: Arc<dyn MessageHandler>,
        cancel: &CancellationToken,
    ) -> QueueResult<()> {
        let channel = self
            .conn
            .lock()
            .await
            .create_channel()
            .await
            .map_err(|e| QueueError::SubscriptionFailed(format!("create channel: {}", e)))?;

        declare(&channel, queue).await?;

        let max_outstanding = settings.max_outstanding.max(1);
        // Shared by every consumer on this channel.
        channel
            .basic_qos(max_outstanding, BasicQosOptions { global: true })
            .await?;

        let outstanding = Arc::new(Semaphore::new(max_outstanding as usize));
        // Consumers beyond the outstanding cap would only wait on the semaphore.
        let consumer_count = settings.effective_concurrency();
        let cancel = cancel.child_token();
        let mut consumers = JoinSet::new();

        for index in 0..consumer_count {
            if settings.synchronous {
                let channel = channel.clone();
                let queue = queue.to_string();
                let fetch = move || {
                    let channel = channel.clone();
                    let queue = queue.clone();
                    async move {
                        let fetched = channel.basic_get(&queue, BasicGetOptions::default()).await?;
                        Ok::<_, QueueError>(fetched.map(|message| inbound(message.delivery)))
                    }
                };
                consumers.spawn(poll_consume(
                    fetch,
                    settings.poll_interval,
                    outstanding.clone(),
                    handler.clone(),
                    cancel.clone(),
                ));
            } else {
                let consumer = channel
                    .basic_consume(
                        queue,
                        &format!("clip-worker-{}", index),
                        BasicConsumeOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
                let deliveries =
                    Box::pin(consumer.map(|next| next.map(inbound).map_err(QueueError::from)));
                consumers.spawn(stream_consume(
                    deliveries,
                    outstanding.clone(),
                    handler.clone(),
                    cancel.clone(),
                ));
            }
        }

        info!(
            "Listening on '{}' (consumers={}, max_outstanding={}, synchronous={})",
            queue, consumer_count, max_outstanding, settings.synchronous
        );

        let mut result = Ok(());
        while let Some(joined) = consumers.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(QueueError::SubscriptionFailed(format!("consumer task failed: {}", e)))
            });
            if let Err(e) = outcome {
                if result.is_ok() {
                    error!("Consumer stopped: {}", e);
                    cancel.cancel();
                    result = Err(e);
                }
            }
        }

        result
    }
}

async fn declare(channel: &Channel, queue: &str) -> QueueResult<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| QueueError::SubscriptionFailed(format!("declare '{}': {}", queue, e)))?;
    Ok(())
}

#[async_trait]
impl JobPublisher for RabbitMqService {
    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<String> {
        RabbitMqService::publish(self, queue, payload).await
    }
}

struct AmqpSettlement {
    acker: Acker,
}

#[async_trait]
impl Settlement for AmqpSettlement {
    async fn settle(self: Box<Self>, disposition: Disposition) -> QueueResult<()> {
        match disposition {
            Disposition::Ack => self.acker.ack(BasicAckOptions::default()).await?,
            Disposition::Nack => {
                self.acker
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..BasicNackOptions::default()
                    })
                    .await?
            }
        };
        Ok(())
    }
}

fn inbound(delivery: Delivery) -> Inbound {
    let id = delivery
        .properties
        .message_id()
        .as_ref()
        .map(|id| id.as_str().to_string())
        .unwrap_or_else(|| derive_message_id(&delivery.data));

    Inbound {
        message: QueueMessage {
            id,
            payload: delivery.data,
            redelivered: delivery.redelivered,
        },
        settlement: Box::new(AmqpSettlement {
            acker: delivery.acker,
        }),
    }
}
