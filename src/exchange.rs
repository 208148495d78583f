// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Exchanges declared by the batch consumer. The only one is the dead-letter
//! exchange, which is always a direct exchange so that the routing key chosen
//! for dead-lettering selects the dead-letter queue.

/// Definition of a direct RabbitMQ exchange.
///
/// Exchanges are never auto-deleted nor internal; those flags are kept so the
/// declaration options stay explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition<'ex> {
    pub(crate) name: &'ex str,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) internal: bool,
}

impl<'ex> ExchangeDefinition<'ex> {
    /// Creates a new non-durable direct exchange definition.
    ///
    /// # Parameters
    /// * `name` - The name of the exchange
    ///
    /// # Returns
    /// A new ExchangeDefinition instance
    pub fn new(name: &'ex str) -> ExchangeDefinition<'ex> {
        ExchangeDefinition {
            name,
            delete: false,
            durable: false,
            internal: false,
        }
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// The lapin exchange type used to declare it.
    pub(crate) fn kind(&self) -> lapin::ExchangeKind {
        lapin::ExchangeKind::Direct
    }
}
