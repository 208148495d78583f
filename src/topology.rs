// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares the exchanges, queues and bindings a batch consumer depends on.
//!
//! The main components are:
//! - `Topology` trait: Interface for topology management
//! - `AmqpTopology`: Implementation of the Topology trait for RabbitMQ
//! - `DeadLetterTopology`: the dead-letter exchange, dead-letter queue, binding and
//!   main queue derived from a `BatchConfig`
//!
//! Every declaration is idempotent on the broker side, so provisioning runs on each
//! startup. Any declaration failure aborts the startup.

use crate::{
    config::BatchConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Trait defining the interface for topology management.
#[async_trait]
pub trait Topology<'tp> {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: &'tp ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: &'tp QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: &'tp QueueBinding) -> Self;

    /// Declares everything registered so far on the broker.
    async fn install(&self) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Topology trait.
///
/// Queues are declared in registration order, after all exchanges and before
/// any binding.
pub struct AmqpTopology<'tp> {
    channel: Arc<Channel>,
    pub(crate) queues: Vec<&'tp QueueDefinition>,
    pub(crate) queues_binding: Vec<&'tp QueueBinding<'tp>>,
    pub(crate) exchanges: Vec<&'tp ExchangeDefinition<'tp>>,
}

impl<'tp> AmqpTopology<'tp> {
    /// Creates a new AmqpTopology instance.
    ///
    /// # Parameters
    /// * `channel` - A channel to the RabbitMQ server
    ///
    /// # Returns
    /// A new AmqpTopology instance
    pub fn new(channel: Arc<Channel>) -> AmqpTopology<'tp> {
        AmqpTopology {
            channel,
            queues: vec![],
            queues_binding: vec![],
            exchanges: vec![],
        }
    }
}

#[async_trait]
impl<'tp> Topology<'tp> for AmqpTopology<'tp> {
    fn exchange(mut self, def: &'tp ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: &'tp QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: &'tp QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Declares exchanges, then queues, then queue bindings.
    async fn install(&self) -> Result<(), AmqpError> {
        self.install_exchange().await?;
        self.install_queue().await?;
        self.binding_queues().await
    }
}

impl AmqpTopology<'_> {
    async fn install_exchange(&self) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            match self
                .channel
                .exchange_declare(
                    exch.name,
                    exch.kind(),
                    ExchangeDeclareOptions {
                        passive: false,
                        durable: exch.durable,
                        auto_delete: exch.delete,
                        internal: exch.internal,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = exch.name,
                        "error to declare the exchange"
                    );
                    Err(AmqpError::DeclareExchangeError(exch.name.to_owned()))
                }
                _ => Ok(()),
            }?;

            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queue(&self) -> Result<(), AmqpError> {
        for def in &self.queues {
            debug!("creating queue: {}", def.name);

            match self
                .channel
                .queue_declare(
                    &def.name,
                    QueueDeclareOptions {
                        passive: false,
                        durable: def.durable,
                        exclusive: def.exclusive,
                        auto_delete: def.delete,
                        nowait: false,
                    },
                    def.arguments(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = def.name,
                        "error to declare the queue"
                    );
                    Err(AmqpError::DeclareQueueError(def.name.clone()))
                }
                _ => {
                    debug!("queue: {} was created", def.name);
                    Ok(())
                }
            }?;
        }

        Ok(())
    }

    async fn binding_queues(&self) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            match self
                .channel
                .queue_bind(
                    binding.queue_name,
                    binding.exchange_name,
                    binding.routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error to bind queue to exchange");

                    Err(AmqpError::BindingExchangeToQueueError(
                        binding.exchange_name.to_owned(),
                        binding.queue_name.to_owned(),
                    ))
                }
                _ => Ok(()),
            }?;
        }

        Ok(())
    }
}

/// The dead-letter path of one consumer and the queue it protects.
///
/// - dead-letter exchange: direct, durable
/// - dead-letter queue: durable, non-exclusive, not auto-deleted, bound to the
///   exchange with the configured routing key
/// - main queue: non-durable, non-exclusive, not auto-deleted, dead-lettering to
///   the exchange with the same routing key
#[derive(Debug, Clone)]
pub struct DeadLetterTopology<'a> {
    pub exchange: ExchangeDefinition<'a>,
    pub dead_letter_queue: QueueDefinition,
    pub binding: QueueBinding<'a>,
    pub queue: QueueDefinition,
}

impl<'a> DeadLetterTopology<'a> {
    /// Derives the dead-letter topology of one consumer.
    ///
    /// # Parameters
    /// * `cfg` - The consumer's batch configuration
    ///
    /// # Returns
    /// A DeadLetterTopology borrowing its names from `cfg`
    pub fn new(cfg: &'a BatchConfig) -> DeadLetterTopology<'a> {
        let dl = cfg.dead_letter();

        DeadLetterTopology {
            exchange: ExchangeDefinition::new(&dl.exchange).durable(),
            dead_letter_queue: QueueDefinition::new(&dl.queue).durable(),
            binding: QueueBinding::new(&dl.queue)
                .exchange(&dl.exchange)
                .routing_key(&dl.routing_key),
            queue: QueueDefinition::new(cfg.queue()).dead_letter(&dl.exchange, &dl.routing_key),
        }
    }

    /// Declares the whole topology on `channel`.
    ///
    /// # Parameters
    /// * `channel` - A channel to the RabbitMQ server
    ///
    /// # Returns
    /// Ok(()) if every declaration succeeded, or the first declaration error
    pub async fn install(&self, channel: Arc<Channel>) -> Result<(), AmqpError> {
        AmqpTopology::new(channel)
            .exchange(&self.exchange)
            .queue(&self.dead_letter_queue)
            .queue(&self.queue)
            .queue_binding(&self.binding)
            .install()
            .await
    }
}

/// Provisions the dead-letter topology for `cfg`.
///
/// # Parameters
/// * `channel` - A channel to the RabbitMQ server
/// * `cfg` - The consumer's batch configuration
///
/// # Returns
/// Ok(()) if every declaration succeeded, or the first declaration error
pub async fn provision(channel: Arc<Channel>, cfg: &BatchConfig) -> Result<(), AmqpError> {
    debug!(queue = cfg.queue(), "provisioning topology");
    DeadLetterTopology::new(cfg).install(channel).await
}
