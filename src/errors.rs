// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Batch Consumer
//!
//! `AmqpError` covers everything that can go wrong while talking to the broker:
//! connection and channel setup, topology declaration, consumer registration and
//! the acknowledgement calls made at the end of each batch.
//!
//! `HandlerError` is what a batch handler reports. It never escapes the batch
//! processor: any `HandlerError` turns into a cumulative rejection of the batch.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Invalid batch or broker configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not allowed in the current lifecycle state
    #[error("invalid consumer state: {0}")]
    InvalidState(String),

    /// Startup was cancelled before the consumer reached `Running`
    #[error("startup cancelled")]
    Cancelled,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error registering the consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error acknowledging a batch
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a batch
    #[error("failure to nack message")]
    NackMessageError,
}

/// Failure reported while turning a batch into domain work.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A payload in the batch was not valid JSON for the declared message type
    #[error("failure to parse payload: {0}")]
    ParsePayload(#[from] serde_json::Error),

    /// The audit-log service could not be reached or answered with an error status
    #[error("audit log request failed: {0}")]
    AuditLog(#[from] reqwest::Error),

    /// Any other failure signalled by a handler
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}
