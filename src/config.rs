// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Configuration
//!
//! Broker connection settings are read from the environment. Batch settings are
//! built per consumer and validated once, at construction; they never change for
//! the lifetime of the consumer.

use crate::errors::AmqpError;
use envconfig::Envconfig;
use std::{str::FromStr, time::Duration};

/// Connection settings for the RabbitMQ broker.
#[derive(Envconfig, Debug, Clone)]
pub struct RabbitMqConfig {
    #[envconfig(from = "RABBITMQ_HOST", default = "localhost")]
    pub host: String,

    #[envconfig(from = "RABBITMQ_PORT", default = "5672")]
    pub port: u16,

    #[envconfig(from = "RABBITMQ_USER", default = "guest")]
    pub user: String,

    #[envconfig(from = "RABBITMQ_PASSWORD", default = "guest")]
    pub password: String,

    #[envconfig(from = "RABBITMQ_VHOST", default = "")]
    pub vhost: String,

    #[envconfig(from = "APP_NAME", default = "batch-consumer")]
    pub connection_name: String,
}

impl RabbitMqConfig {
    /// AMQP URI for this broker. An empty vhost leaves the broker default in place.
    pub fn uri(&self) -> String {
        let base = format!(
            "amqp://{}:{}@{}:{}",
            self.user, self.password, self.host, self.port
        );

        if self.vhost.is_empty() {
            base
        } else {
            format!("{}/{}", base, self.vhost)
        }
    }
}

/// Where rejected messages of a queue end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterSettings {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl DeadLetterSettings {
    /// Creates the dead-letter settings of one consumer.
    ///
    /// # Parameters
    /// * `exchange` - The dead-letter exchange
    /// * `queue` - The dead-letter queue
    /// * `routing_key` - The key binding the queue to the exchange
    ///
    /// # Returns
    /// A new DeadLetterSettings instance
    pub fn new(exchange: &str, queue: &str, routing_key: &str) -> DeadLetterSettings {
        DeadLetterSettings {
            exchange: exchange.to_owned(),
            queue: queue.to_owned(),
            routing_key: routing_key.to_owned(),
        }
    }
}

/// Batching behaviour of one consumer.
///
/// A batch is flushed when `batch_size` messages are buffered or when
/// `batch_timeout` elapses with at least one message buffered, whichever
/// comes first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    queue: String,
    batch_size: usize,
    batch_timeout: Duration,
    dead_letter: DeadLetterSettings,
}

impl BatchConfig {
    /// Validates and builds a batch configuration.
    ///
    /// # Parameters
    /// * `queue` - The queue to consume
    /// * `batch_size` - The number of messages that triggers a flush
    /// * `batch_timeout` - The flush timer period
    /// * `dead_letter` - Where rejected batches are routed
    ///
    /// # Returns
    /// A new BatchConfig instance
    ///
    /// # Errors
    /// `AmqpError::InvalidConfig` when the queue name is empty, the batch size or
    /// timeout is zero, or the derived prefetch does not fit the AMQP prefetch field.
    pub fn new(
        queue: &str,
        batch_size: usize,
        batch_timeout: Duration,
        dead_letter: DeadLetterSettings,
    ) -> Result<BatchConfig, AmqpError> {
        if queue.is_empty() {
            return Err(AmqpError::InvalidConfig("queue name is empty".to_owned()));
        }

        if batch_size == 0 {
            return Err(AmqpError::InvalidConfig(format!(
                "batch size for `{}` must be positive",
                queue
            )));
        }

        if batch_size.saturating_mul(2) > u16::MAX as usize {
            return Err(AmqpError::InvalidConfig(format!(
                "batch size {} for `{}` exceeds the prefetch limit",
                batch_size, queue
            )));
        }

        if batch_timeout.is_zero() {
            return Err(AmqpError::InvalidConfig(format!(
                "batch timeout for `{}` must be positive",
                queue
            )));
        }

        Ok(BatchConfig {
            queue: queue.to_owned(),
            batch_size,
            batch_timeout,
            dead_letter,
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batch_timeout(&self) -> Duration {
        self.batch_timeout
    }

    pub fn dead_letter(&self) -> &DeadLetterSettings {
        &self.dead_letter
    }

    /// Prefetch count for the channel: room for a full next batch while the
    /// current one is being processed.
    pub fn prefetch_count(&self) -> u16 {
        // bounded in `new`
        (self.batch_size * 2) as u16
    }
}

/// Whole seconds read from an environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvSecsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvSecsDurationError;

impl FromStr for EnvSecsDuration {
    type Err = ParseEnvSecsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secs = s.parse::<u64>().map_err(|_| ParseEnvSecsDurationError)?;

        Ok(EnvSecsDuration(Duration::from_secs(secs)))
    }
}
