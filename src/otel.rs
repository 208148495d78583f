// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Trace context published alongside a message travels in its AMQP headers.
//! The context is extracted when the message is buffered, and the batch that
//! eventually contains the message is processed inside a consumer span
//! parented on the first message's context.

use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, ShortString},
};
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    propagation::Extractor,
    trace::{Span, SpanKind, Tracer},
    Context, KeyValue,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::error;

/// Name of the tracer used for batch spans.
pub(crate) const TRACER_NAME: &str = "amqp batch consumer";

/// Reads OpenTelemetry context out of RabbitMQ message headers.
pub(crate) struct RabbitMQTracePropagator<'a> {
    headers: &'a BTreeMap<ShortString, AMQPValue>,
}

impl<'a> RabbitMQTracePropagator<'a> {
    pub(crate) fn new(headers: &'a BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Extractor for RabbitMQTracePropagator<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|header_value| {
            if let AMQPValue::LongString(header_value) = header_value {
                std::str::from_utf8(header_value.as_bytes())
                    .map_err(|e| error!("Error decoding header value {:?}", e))
                    .ok()
            } else {
                None
            }
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|header| header.as_str()).collect()
    }
}

/// Extracts the propagated trace context from message properties.
///
/// # Parameters
/// * `props` - The AMQP properties of a delivery
///
/// # Returns
/// The extracted context, or an empty one for messages without headers
pub fn extract_context(props: &AMQPProperties) -> Context {
    let Some(headers) = props.headers() else {
        return Context::new();
    };

    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&RabbitMQTracePropagator::new(headers.inner()))
    })
}

/// Starts the consumer span covering the processing of one batch.
///
/// # Parameters
/// * `tracer` - The tracer creating the span
/// * `parent` - The trace context of the first message of the batch
/// * `queue` - The consumed queue
/// * `size` - The number of messages in the batch
///
/// # Returns
/// The started span
pub fn new_batch_span(
    tracer: &BoxedTracer,
    parent: &Context,
    queue: &str,
    size: usize,
) -> BoxedSpan {
    let mut span = tracer
        .span_builder(Cow::from(format!("{} process", queue)))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, parent);

    span.set_attribute(KeyValue::new("messaging.destination.name", queue.to_owned()));
    span.set_attribute(KeyValue::new("messaging.batch.message_count", size as i64));

    span
}
