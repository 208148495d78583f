// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Batch Processing
//!
//! The batch processor takes the current contents of the message buffer, decodes every
//! payload into the consumer's message type, hands the whole batch to the handler once,
//! and settles the batch with the broker as a unit:
//!
//! - handler success: cumulative ack up to the highest delivery tag in the batch
//! - handler or decode failure: cumulative nack up to the same tag, without requeue,
//!   so the broker dead-letters the batch (or drops it when the queue has no
//!   dead-letter exchange)
//!
//! Cumulative settlement is only correct because a consumer owns exactly one channel
//! and the batch is always the oldest run of unsettled deliveries on it.

use crate::{
    errors::{AmqpError, HandlerError},
    handler::BatchHandler,
    message::BufferedMessage,
    otel,
};
use async_trait::async_trait;
use lapin::{
    options::{BasicAckOptions, BasicNackOptions},
    Channel,
};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, marker::PhantomData, sync::Arc};
use tracing::{debug, error, info};

/// Settles deliveries with the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledges `delivery_tag`, and every earlier tag when `multiple` is set.
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError>;

    /// Rejects `delivery_tag`, and every earlier tag when `multiple` is set.
    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool)
        -> Result<(), AmqpError>;
}

#[async_trait]
impl Acknowledger for Channel {
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError> {
        match self
            .basic_ack(delivery_tag, BasicAckOptions { multiple })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), delivery_tag, "error whiling ack msg");
                Err(AmqpError::AckMessageError {})
            }
            _ => Ok(()),
        }
    }

    async fn nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), AmqpError> {
        match self
            .basic_nack(delivery_tag, BasicNackOptions { multiple, requeue })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), delivery_tag, "error whiling nack msg");
                Err(AmqpError::NackMessageError {})
            }
            _ => Ok(()),
        }
    }
}

/// How a flushed batch was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing was buffered.
    Empty,
    /// The handler succeeded and the batch was acknowledged up to `delivery_tag`.
    Acked { delivery_tag: u64, size: usize },
    /// The batch failed and was rejected up to `delivery_tag` without requeue.
    Rejected { delivery_tag: u64, size: usize },
}

/// Decodes, handles and settles batches for one queue.
pub struct BatchProcessor<T, H, A> {
    queue: String,
    handler: Arc<H>,
    acker: Arc<A>,
    tracer: BoxedTracer,
    _message: PhantomData<fn() -> T>,
}

impl<T, H, A> BatchProcessor<T, H, A>
where
    T: DeserializeOwned + Send + 'static,
    H: BatchHandler<T>,
    A: Acknowledger,
{
    /// Creates a processor for the batches of `queue`.
    ///
    /// # Parameters
    /// * `queue` - The consumed queue, used in logs and spans
    /// * `handler` - The handler called once per batch
    /// * `acker` - The channel deliveries are settled on
    ///
    /// # Returns
    /// A new BatchProcessor instance
    pub fn new(queue: &str, handler: Arc<H>, acker: Arc<A>) -> Self {
        BatchProcessor {
            queue: queue.to_owned(),
            handler,
            acker,
            tracer: global::tracer(otel::TRACER_NAME),
            _message: PhantomData,
        }
    }

    /// Processes everything in `buffer` as one batch, leaving `buffer` empty.
    ///
    /// `buffer` is the shared buffer borrowed through its lock guard, so the swap
    /// and the whole processing cycle happen while the lock is held.
    ///
    /// # Errors
    /// Only broker failures while acking or nacking are returned. Handler and
    /// decode failures are turned into `BatchOutcome::Rejected`.
    pub async fn flush(
        &self,
        buffer: &mut Vec<BufferedMessage>,
    ) -> Result<BatchOutcome, AmqpError> {
        let batch = std::mem::take(buffer);

        let (Some(first), Some(delivery_tag)) = (
            batch.first(),
            batch.iter().map(BufferedMessage::delivery_tag).max(),
        ) else {
            return Ok(BatchOutcome::Empty);
        };
        let size = batch.len();

        let mut span =
            otel::new_batch_span(&self.tracer, first.trace_context(), &self.queue, size);

        debug!(
            queue = %self.queue,
            batch_size = size,
            delivery_tag,
            oldest_ms = first.received_at().elapsed().as_millis() as u64,
            "processing batch"
        );

        match self.process(&batch).await {
            Ok(()) => {
                if let Err(err) = self.acker.ack(delivery_tag, true).await {
                    span.record_error(&err);
                    span.set_status(Status::Error {
                        description: Cow::from("error to ack batch"),
                    });
                    return Err(err);
                }

                span.set_status(Status::Ok);
                info!(
                    queue = %self.queue,
                    batch_size = size,
                    delivery_tag,
                    "successfully processed batch"
                );

                Ok(BatchOutcome::Acked { delivery_tag, size })
            }
            Err(err) => {
                error!(
                    queue = %self.queue,
                    batch_size = size,
                    delivery_tag,
                    error = err.to_string(),
                    "failure to process batch, rejecting it"
                );
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from(err.to_string()),
                });

                self.acker.nack(delivery_tag, true, false).await?;

                Ok(BatchOutcome::Rejected { delivery_tag, size })
            }
        }
    }

    async fn process(&self, batch: &[BufferedMessage]) -> Result<(), HandlerError> {
        let messages = batch
            .iter()
            .map(|msg| serde_json::from_slice::<T>(msg.payload()))
            .collect::<Result<Vec<T>, _>>()?;

        self.handler.handle(messages).await
    }
}
