// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation and teardown of AMQP connections and channels,
//! and the prefetch (QoS) setting a batching consumer needs on its channel.

use crate::{config::RabbitMqConfig, errors::AmqpError};
use lapin::{
    options::BasicQosOptions, types::LongString, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Creates a new AMQP channel for communication with RabbitMQ.
///
/// Establishes a connection using `cfg`, then creates a single channel on it.
/// Both are wrapped in `Arc` so the receive loop and the flush timer can share them.
///
/// # Parameters
/// * `cfg` - The broker connection settings
///
/// # Returns
/// * `Result<(Arc<Connection>, Arc<Channel>), AmqpError>` -
///   the connection and channel on success, or an error on failure.
pub async fn new_amqp_channel(
    cfg: &RabbitMqConfig,
) -> Result<(Arc<Connection>, Arc<Channel>), AmqpError> {
    debug!(host = %cfg.host, port = cfg.port, "creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.connection_name.clone()));

    let conn = match Connection::connect(&cfg.uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError {})
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            close_connection(&conn).await;
            Err(AmqpError::ChannelError {})
        }
    }
}

/// Limits the number of unacknowledged deliveries on `channel` to `prefetch_count`.
///
/// The limit applies to each consumer on the channel, not to the channel as a whole.
///
/// # Parameters
/// * `channel` - The channel to configure
/// * `prefetch_count` - The maximum number of unacknowledged deliveries
pub async fn configure_qos(channel: &Channel, prefetch_count: u16) -> Result<(), AmqpError> {
    debug!(prefetch_count, "configuring channel qos");

    match channel
        .basic_qos(prefetch_count, BasicQosOptions { global: false })
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "failure to configure qos");
            Err(AmqpError::QoSDeclarationError(err.to_string()))
        }
        _ => Ok(()),
    }
}

/// Closes the channel. Failures are logged and otherwise ignored.
pub async fn close_channel(channel: &Channel) {
    if let Err(err) = channel.close(REPLY_SUCCESS, "consumer stopped").await {
        warn!(error = err.to_string(), "error closing the channel");
    } else {
        debug!("channel closed");
    }
}

/// Closes the connection. Failures are logged and otherwise ignored.
pub async fn close_connection(conn: &Connection) {
    if let Err(err) = conn.close(REPLY_SUCCESS, "consumer stopped").await {
        warn!(error = err.to_string(), "error closing the connection");
    } else {
        debug!("connection closed");
    }
}
