// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use crate::otel;
use lapin::message::Delivery;
use opentelemetry::Context;
use tokio::time::Instant;

/// A received, not yet processed message.
///
/// Owned by the message buffer until it is swapped out into a batch, and
/// never modified after creation.
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    payload: Vec<u8>,
    delivery_tag: u64,
    received_at: Instant,
    trace_context: Context,
}

impl BufferedMessage {
    /// Creates a message without trace context, received now.
    ///
    /// # Parameters
    /// * `delivery_tag` - The channel-scoped delivery tag
    /// * `payload` - The raw message body
    ///
    /// # Returns
    /// A new BufferedMessage instance
    pub fn new(delivery_tag: u64, payload: Vec<u8>) -> BufferedMessage {
        BufferedMessage {
            payload,
            delivery_tag,
            received_at: Instant::now(),
            trace_context: Context::new(),
        }
    }

    /// Takes the payload and tag of a broker delivery, along with any trace
    /// context propagated in its headers.
    pub fn from_delivery(delivery: Delivery) -> BufferedMessage {
        BufferedMessage {
            trace_context: otel::extract_context(&delivery.properties),
            delivery_tag: delivery.delivery_tag,
            received_at: Instant::now(),
            payload: delivery.data,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn trace_context(&self) -> &Context {
        &self.trace_context
    }
}
