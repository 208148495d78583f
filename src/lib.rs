// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod batch;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod message;
pub mod orders;
pub mod queue;
pub mod topology;

pub use batch::{Acknowledger, BatchOutcome};
pub use config::{BatchConfig, DeadLetterSettings, RabbitMqConfig};
pub use consumer::{BatchConsumer, ConsumerState};
pub use errors::{AmqpError, HandlerError};
pub use handler::BatchHandler;
