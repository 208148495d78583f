// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Buffer
//!
//! Received messages wait here until a flush hands them to the batch processor.
//! Two things trigger a flush: the buffer reaching the batch size on `append`,
//! and the flush timer calling `flush_on_timeout`.
//!
//! One async mutex guards the buffer. A flush runs entirely while it is held,
//! including the handler call and the ack/nack round trip, so batches never
//! overlap and nothing is appended while a batch is in flight.

use crate::{
    batch::{Acknowledger, BatchOutcome, BatchProcessor},
    config::BatchConfig,
    errors::AmqpError,
    handler::BatchHandler,
    message::BufferedMessage,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

struct BufferState {
    messages: Vec<BufferedMessage>,
    closed: bool,
}

/// Result of a call that may flush: `None` when no flush happened.
pub type FlushResult = Option<Result<BatchOutcome, AmqpError>>;

pub struct MessageBuffer<T, H, A> {
    state: Mutex<BufferState>,
    batch_size: usize,
    processor: BatchProcessor<T, H, A>,
}

impl<T, H, A> MessageBuffer<T, H, A>
where
    T: DeserializeOwned + Send + 'static,
    H: BatchHandler<T>,
    A: Acknowledger,
{
    /// Creates an empty, open buffer.
    ///
    /// # Parameters
    /// * `cfg` - The consumer's batch configuration
    /// * `handler` - The handler called once per batch
    /// * `acker` - The channel deliveries are settled on
    ///
    /// # Returns
    /// A new MessageBuffer instance
    pub fn new(cfg: &BatchConfig, handler: Arc<H>, acker: Arc<A>) -> Self {
        MessageBuffer {
            state: Mutex::new(BufferState {
                messages: Vec::with_capacity(cfg.batch_size()),
                closed: false,
            }),
            batch_size: cfg.batch_size(),
            processor: BatchProcessor::new(cfg.queue(), handler, acker),
        }
    }

    /// Buffers `message`, flushing before returning if the batch is now full.
    ///
    /// Messages appended after `close` are dropped; the broker redelivers them
    /// once the channel is gone.
    pub async fn append(&self, message: BufferedMessage) -> FlushResult {
        let mut state = self.state.lock().await;

        if state.closed {
            debug!(
                delivery_tag = message.delivery_tag(),
                "buffer closed, dropping message"
            );
            return None;
        }

        state.messages.push(message);
        if state.messages.len() < self.batch_size {
            return None;
        }

        Some(self.processor.flush(&mut state.messages).await)
    }

    /// Flushes whatever is buffered. Does nothing when the buffer is empty.
    pub async fn flush_on_timeout(&self) -> FlushResult {
        let mut state = self.state.lock().await;

        if state.closed || state.messages.is_empty() {
            return None;
        }

        debug!(pending = state.messages.len(), "batch timeout elapsed");
        Some(self.processor.flush(&mut state.messages).await)
    }

    /// Stops admitting messages and discards what is buffered.
    ///
    /// Waits for an in-flight flush to finish. Returns the number of discarded
    /// messages.
    pub async fn close(&self) -> usize {
        let mut state = self.state.lock().await;
        state.closed = true;

        let dropped = state.messages.len();
        state.messages.clear();

        if dropped > 0 {
            debug!(dropped, "buffer closed with unprocessed messages");
        }

        dropped
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Logs the broker failure of a flush, if any.
pub(crate) fn log_flush_failure(result: &FlushResult) {
    if let Some(Err(err)) = result {
        error!(error = err.to_string(), "failure to settle batch with the broker");
    }
}
